//! Voltage supplies consumed by drivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub trait Regulator: Send + Sync {
    /// Output voltage in microvolts.
    fn get_voltage(&self) -> Result<i32>;
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
    fn is_enabled(&self) -> bool;
}

/// Supply with a settable output, reference counted enable.
pub struct FixedRegulator {
    microvolts: AtomicI32,
    use_count: AtomicU32,
    fault: Mutex<Option<Error>>,
}

impl FixedRegulator {
    pub fn new(microvolts: i32) -> Arc<Self> {
        Arc::new(Self {
            microvolts: AtomicI32::new(microvolts),
            use_count: AtomicU32::new(0),
            fault: Mutex::new(None),
        })
    }

    pub fn set_voltage(&self, microvolts: i32) {
        self.microvolts.store(microvolts, Ordering::Relaxed);
    }

    /// Make subsequent voltage reads fail with `fault`.
    pub fn set_fault(&self, fault: Option<Error>) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = fault;
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::Acquire)
    }
}

impl Regulator for FixedRegulator {
    fn get_voltage(&self) -> Result<i32> {
        match *self.fault.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(fault) => Err(fault),
            None => Ok(self.microvolts.load(Ordering::Relaxed)),
        }
    }

    fn enable(&self) -> Result<()> {
        self.use_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                log::warn!("unbalanced regulator disable");
                Error::Invalid
            })
    }

    fn is_enabled(&self) -> bool {
        self.use_count() > 0
    }
}

/// Supplies by name. A supply that has not been added yet defers the probe asking for it.
#[derive(Default)]
pub struct Regulators {
    supplies: Mutex<HashMap<String, Arc<dyn Regulator>>>,
}

impl Regulators {
    pub fn add(&self, supply: impl Into<String>, regulator: Arc<dyn Regulator>) {
        self.supplies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(supply.into(), regulator);
    }

    pub fn remove(&self, supply: &str) -> Option<Arc<dyn Regulator>> {
        self.supplies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(supply)
    }

    pub fn get(&self, supply: &str) -> Result<Arc<dyn Regulator>> {
        self.supplies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(supply)
            .cloned()
            .ok_or(Error::ProbeDefer)
    }
}

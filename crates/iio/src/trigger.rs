//! Triggers pace buffered capture: each edge runs the consumer's poll function once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::IioDev;
use crate::error::{Error, Result};
use crate::time;

/// Sampling frequency of a new hrtimer trigger, in Hz.
pub const HRTIMER_DEFAULT_SAMPLING_FREQUENCY: u32 = 100;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Bottom half of a trigger consumer.
///
/// Runs in the trigger's worker thread, one invocation at a time. Every invocation must end
/// with [`Trigger::notify_done`], otherwise no further edges are delivered.
pub trait TriggerHandler: Send + Sync {
    fn handle(&self, pf: &PollFunc<'_>);
}

/// Context handed to a [`TriggerHandler`].
pub struct PollFunc<'a> {
    pub dev: &'a IioDev,
    pub trigger: &'a Trigger,
    /// Time of the edge.
    pub timestamp: i64,
}

/// Hooks a trigger provider implements to start and stop its edges.
pub trait TriggerOps: Send + Sync {
    fn set_state(&self, trigger: &Arc<Trigger>, enabled: bool) -> Result<()>;
}

pub struct Trigger {
    name: String,
    consumer: Mutex<Option<Weak<IioDev>>>,
    ops: Option<Arc<dyn TriggerOps>>,
    busy: AtomicBool,
    completed: AtomicU64,
    missed: AtomicU64,
}

impl Trigger {
    /// A trigger whose edges are raised by calling [`Trigger::poll`].
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    pub fn with_ops(name: impl Into<String>, ops: Arc<dyn TriggerOps>) -> Arc<Self> {
        Self::build(name.into(), Some(ops))
    }

    fn build(name: String, ops: Option<Arc<dyn TriggerOps>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            consumer: Mutex::new(None),
            ops,
            busy: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn attach(&self, dev: Weak<IioDev>) {
        *self.consumer.lock().unwrap_or_else(|e| e.into_inner()) = Some(dev);
    }

    pub(crate) fn detach(&self) {
        *self.consumer.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn consumer(&self) -> Option<Arc<IioDev>> {
        self.consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_state(self: &Arc<Self>, enabled: bool) -> Result<()> {
        match &self.ops {
            Some(ops) => ops.set_state(self, enabled),
            None => Ok(()),
        }
    }

    /// Raise one edge. Dropped if the previous edge has not been handled yet.
    pub fn poll(&self) {
        let Some(dev) = self.consumer() else {
            return;
        };

        if self.busy.swap(true, Ordering::AcqRel) {
            self.missed.fetch_add(1, Ordering::Relaxed);
            log::trace!("{}: edge dropped, handler still running", self.name);
            return;
        }

        dev.run_pollfunc(self, time::get_time_ns());
    }

    /// Called by the handler once it is finished with the current edge.
    pub fn notify_done(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Edges that ran to completion.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Edges dropped because the handler was still busy.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

struct Running {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: JoinHandle<()>,
}

/// Periodic edge source backed by a timer thread.
pub struct Hrtimer {
    period_ns: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

impl Default for Hrtimer {
    fn default() -> Self {
        Self {
            period_ns: Arc::new(AtomicU64::new(
                NSEC_PER_SEC / HRTIMER_DEFAULT_SAMPLING_FREQUENCY as u64,
            )),
            running: Mutex::new(None),
        }
    }
}

impl Hrtimer {
    pub fn sampling_frequency(&self) -> u32 {
        (NSEC_PER_SEC / self.period_ns.load(Ordering::Relaxed)) as u32
    }

    /// Takes effect from the next period.
    pub fn set_sampling_frequency(&self, hz: u32) -> Result<()> {
        if hz == 0 || hz as u64 > NSEC_PER_SEC {
            return Err(Error::Invalid);
        }

        self.period_ns.store(NSEC_PER_SEC / hz as u64, Ordering::Relaxed);
        Ok(())
    }

    fn start(&self, trigger: &Arc<Trigger>) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Ok(());
        }

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let period_ns = Arc::clone(&self.period_ns);
        let weak = Arc::downgrade(trigger);
        let stopper = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(format!("hrtimer-{}", trigger.name()))
            .spawn(move || {
                let (lock, cvar) = &*stopper;
                let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());

                loop {
                    let period = Duration::from_nanos(period_ns.load(Ordering::Relaxed));
                    stopped = cvar
                        .wait_timeout_while(stopped, period, |stopped| !*stopped)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;

                    if *stopped {
                        break;
                    }

                    let Some(trigger) = weak.upgrade() else {
                        break;
                    };

                    drop(stopped);
                    trigger.poll();
                    drop(trigger);
                    stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
                }
            })
            .map_err(|e| {
                log::error!("failed to spawn timer thread: {e}");
                Error::Busy
            })?;

        *running = Some(Running { stop, thread });
        Ok(())
    }

    fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(Running { stop, thread }) = running {
            let (lock, cvar) = &*stop;
            *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
            cvar.notify_all();

            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                log::warn!("timer thread panicked");
            }
        }
    }
}

impl TriggerOps for Hrtimer {
    fn set_state(&self, trigger: &Arc<Trigger>, enabled: bool) -> Result<()> {
        if enabled {
            self.start(trigger)
        } else {
            self.stop();
            Ok(())
        }
    }
}

impl Drop for Hrtimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A trigger created on demand rather than provided by hardware.
pub struct SwTrigger {
    trigger: Arc<Trigger>,
    hrtimer: Arc<Hrtimer>,
}

impl SwTrigger {
    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }

    pub fn name(&self) -> &str {
        self.trigger.name()
    }

    pub fn sampling_frequency(&self) -> u32 {
        self.hrtimer.sampling_frequency()
    }

    pub fn set_sampling_frequency(&self, hz: u32) -> Result<()> {
        self.hrtimer.set_sampling_frequency(hz)
    }
}

/// Registry of software triggers.
#[derive(Default)]
pub struct SwTriggers {
    triggers: Mutex<Vec<Arc<SwTrigger>>>,
}

impl SwTriggers {
    /// Create a trigger of the given type. Only `"hrtimer"` is known.
    pub fn create(&self, kind: &str, name: &str) -> Result<Arc<SwTrigger>> {
        if kind != "hrtimer" {
            return Err(Error::NotSupported);
        }

        let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
        if triggers.iter().any(|t| t.name() == name) {
            return Err(Error::Exists);
        }

        let hrtimer = Arc::new(Hrtimer::default());
        let ops: Arc<dyn TriggerOps> = hrtimer.clone();
        let sw = Arc::new(SwTrigger {
            trigger: Trigger::with_ops(name, ops),
            hrtimer,
        });

        triggers.push(Arc::clone(&sw));
        log::debug!("created hrtimer trigger {name}");

        Ok(sw)
    }

    /// Stop and forget a trigger.
    pub fn destroy(&self, sw: &Arc<SwTrigger>) -> Result<()> {
        let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
        let index = triggers
            .iter()
            .position(|t| Arc::ptr_eq(t, sw))
            .ok_or(Error::NoDevice)?;

        triggers.remove(index);
        drop(triggers);

        sw.hrtimer.stop();
        sw.trigger.detach();
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<SwTrigger>> {
        self.triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }
}

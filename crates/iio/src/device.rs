use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::{Buffer, ScanLayout};
use crate::channel::{ChanInfo, ChanSpec, ChanType, ScanMask};
use crate::error::{Error, Result};
use crate::trigger::{PollFunc, Trigger, TriggerHandler};
use crate::value::Value;

/// Operations a driver provides for its device.
pub trait IioInfo: Send + Sync {
    fn read_raw(&self, chan: &ChanSpec, info: ChanInfo) -> Result<Value>;

    /// Called before buffered capture starts with the channels about to be captured.
    fn update_scan_mode(&self, _mask: ScanMask) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct State {
    id: Option<usize>,
    pollfunc: Option<Arc<dyn TriggerHandler>>,
    trigger: Option<Arc<Trigger>>,
    trigger_immutable: bool,
    buffer_enabled: bool,
    active_scan_mask: ScanMask,
}

/// An industrial I/O device: a set of channels readable on demand and, once a triggered
/// buffer is set up, capturable into a [`Buffer`].
pub struct IioDev {
    name: String,
    channels: Vec<ChanSpec>,
    info: Arc<dyn IioInfo>,
    buffer: Buffer,
    state: Mutex<State>,
}

impl IioDev {
    pub fn new(name: impl Into<String>, channels: Vec<ChanSpec>, info: Arc<dyn IioInfo>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            channels,
            info,
            buffer: Buffer::default(),
            state: Mutex::new(State::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> &[ChanSpec] {
        &self.channels
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// `iio:deviceN` once registered.
    pub fn dev_name(&self) -> Option<String> {
        self.lock().id.map(|id| format!("iio:device{id}"))
    }

    pub fn is_registered(&self) -> bool {
        self.lock().id.is_some()
    }

    /// Read one attribute of the channel at `index` in [`IioDev::channels`].
    pub fn read_channel(&self, index: usize, info: ChanInfo) -> Result<Value> {
        let chan = self.channels.get(index).ok_or(Error::Invalid)?;

        if !chan.supports(info) {
            return Err(Error::NotSupported);
        }

        self.info.read_raw(chan, info)
    }

    /// Find a voltage channel by its channel number.
    pub fn voltage_channel(&self, channel: u32) -> Option<usize> {
        self.channels
            .iter()
            .position(|chan| chan.chan_type == ChanType::Voltage && chan.channel == channel)
    }

    pub fn triggered_buffer_setup(&self, handler: Arc<dyn TriggerHandler>) -> Result<()> {
        let mut state = self.lock();
        if state.pollfunc.is_some() {
            return Err(Error::Busy);
        }

        state.pollfunc = Some(handler);
        Ok(())
    }

    pub fn triggered_buffer_cleanup(&self) {
        if let Err(e) = self.disable_buffer() {
            log::warn!("{}: failed to disable buffer: {e}", self.name);
        }

        self.lock().pollfunc = None;
    }

    /// Bind a trigger that user space cannot replace.
    pub fn set_immutable_trigger(&self, trigger: Arc<Trigger>) {
        let mut state = self.lock();
        state.trigger = Some(trigger);
        state.trigger_immutable = true;
    }

    pub fn set_trigger(&self, trigger: Arc<Trigger>) -> Result<()> {
        let mut state = self.lock();
        if state.trigger_immutable || state.buffer_enabled {
            return Err(Error::Busy);
        }

        state.trigger = Some(trigger);
        Ok(())
    }

    pub fn trigger(&self) -> Option<Arc<Trigger>> {
        self.lock().trigger.clone()
    }

    pub fn is_buffer_enabled(&self) -> bool {
        self.lock().buffer_enabled
    }

    pub fn active_scan_mask(&self) -> ScanMask {
        self.lock().active_scan_mask
    }

    /// Start buffered capture of the channels whose scan index is in `mask`.
    pub fn enable_buffer(self: &Arc<Self>, mask: ScanMask) -> Result<()> {
        let trigger = {
            let mut state = self.lock();

            if state.buffer_enabled {
                return Err(Error::Busy);
            }
            if state.pollfunc.is_none() {
                return Err(Error::Invalid);
            }
            let trigger = state.trigger.clone().ok_or(Error::Invalid)?;

            let layout = self.layout_for(mask)?;
            self.info.update_scan_mode(mask)?;
            self.buffer.configure(layout);

            state.active_scan_mask = mask;
            state.buffer_enabled = true;
            trigger
        };

        trigger.attach(Arc::downgrade(self));

        if let Err(e) = trigger.set_state(true) {
            trigger.detach();
            self.lock().buffer_enabled = false;
            return Err(e);
        }

        log::debug!("{}: buffer enabled, {} scan elements", self.name, mask.count());
        Ok(())
    }

    pub fn disable_buffer(&self) -> Result<()> {
        let trigger = {
            let mut state = self.lock();
            if !state.buffer_enabled {
                return Ok(());
            }

            state.buffer_enabled = false;
            state.trigger.clone()
        };

        if let Some(trigger) = trigger {
            trigger.set_state(false)?;
            trigger.detach();
        }

        Ok(())
    }

    fn layout_for(&self, mask: ScanMask) -> Result<ScanLayout> {
        let mut layout = ScanLayout::default();

        for index in mask.iter() {
            let chan = self
                .channels
                .iter()
                .find(|chan| chan.scan_index == index)
                .ok_or(Error::Invalid)?;

            match chan.chan_type {
                ChanType::Voltage => layout.samples += 1,
                ChanType::Timestamp => layout.timestamp = true,
            }
        }

        if layout.samples == 0 {
            return Err(Error::Invalid);
        }

        Ok(layout)
    }

    pub fn push_to_buffers_with_timestamp(&self, data: &[u16], timestamp: i64) {
        if !self.buffer.push_with_timestamp(data, timestamp) {
            log::trace!("{}: buffer full, scan dropped", self.name);
        }
    }

    pub(crate) fn run_pollfunc(&self, trigger: &Trigger, timestamp: i64) {
        let pollfunc = {
            let state = self.lock();
            state.pollfunc.clone().filter(|_| state.buffer_enabled)
        };

        match pollfunc {
            Some(handler) => handler.handle(&PollFunc {
                dev: self,
                trigger,
                timestamp,
            }),
            None => trigger.notify_done(),
        }
    }
}

/// Registered devices.
#[derive(Default)]
pub struct Registry {
    devices: Mutex<Vec<Arc<IioDev>>>,
    next_id: AtomicUsize,
}

impl Registry {
    /// Make a device visible. Returns its number.
    pub fn register(&self, dev: &Arc<IioDev>) -> Result<usize> {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        if devices.iter().any(|d| Arc::ptr_eq(d, dev)) {
            return Err(Error::Exists);
        }

        crate::time::init();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        dev.lock().id = Some(id);
        devices.push(Arc::clone(dev));

        log::info!("{}: registered as iio:device{id}", dev.name());
        Ok(id)
    }

    /// Hide a device again, stopping any capture in progress.
    pub fn unregister(&self, dev: &Arc<IioDev>) -> Result<()> {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let index = devices
            .iter()
            .position(|d| Arc::ptr_eq(d, dev))
            .ok_or(Error::NoDevice)?;

        devices.remove(index);
        drop(devices);

        dev.disable_buffer()?;
        dev.lock().id = None;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<IioDev>> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Fake {
        scans: AtomicU32,
    }

    impl IioInfo for Fake {
        fn read_raw(&self, chan: &ChanSpec, info: ChanInfo) -> Result<Value> {
            match info {
                ChanInfo::Raw => Ok(Value::Int(chan.channel as i32 * 10)),
                _ => Err(Error::NotSupported),
            }
        }

        fn update_scan_mode(&self, _mask: ScanMask) -> Result<()> {
            self.scans.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    impl TriggerHandler for Fake {
        fn handle(&self, pf: &PollFunc<'_>) {
            pf.dev.push_to_buffers_with_timestamp(&[1, 2], pf.timestamp);
            pf.trigger.notify_done();
        }
    }

    fn fake_dev() -> (Arc<IioDev>, Arc<Fake>) {
        let fake = Arc::new(Fake {
            scans: AtomicU32::new(0),
        });
        let channels = vec![
            ChanSpec::voltage(0, "CH0", 12, 16, 0),
            ChanSpec::voltage(1, "CH1", 12, 16, 0),
            ChanSpec::soft_timestamp(2),
        ];
        let info: Arc<dyn IioInfo> = fake.clone();
        (IioDev::new("fake", channels, info), fake)
    }

    #[test]
    fn register_and_unregister() {
        let registry = Registry::default();
        let (dev, _) = fake_dev();

        assert_eq!(registry.register(&dev), Ok(0));
        assert_eq!(registry.register(&dev), Err(Error::Exists));
        assert_eq!(dev.dev_name().as_deref(), Some("iio:device0"));
        assert!(registry.find("fake").is_some());

        registry.unregister(&dev).unwrap();
        assert!(registry.is_empty());
        assert!(!dev.is_registered());
        assert_eq!(registry.unregister(&dev), Err(Error::NoDevice));
    }

    #[test]
    fn read_channel_checks_info_mask() {
        let (dev, _) = fake_dev();

        assert_eq!(dev.read_channel(1, ChanInfo::Raw), Ok(Value::Int(10)));
        assert_eq!(dev.read_channel(1, ChanInfo::Offset), Err(Error::NotSupported));
        assert_eq!(dev.read_channel(9, ChanInfo::Raw), Err(Error::Invalid));
        assert_eq!(dev.voltage_channel(1), Some(1));
    }

    #[test]
    fn buffered_capture() {
        let (dev, fake) = fake_dev();
        let trigger = Trigger::new("manual");

        assert_eq!(dev.enable_buffer(ScanMask::new(0b111)), Err(Error::Invalid));

        let handler: Arc<dyn TriggerHandler> = fake.clone();
        dev.triggered_buffer_setup(handler).unwrap();
        dev.set_immutable_trigger(trigger.clone());
        assert_eq!(dev.set_trigger(Trigger::new("other")), Err(Error::Busy));

        assert_eq!(dev.enable_buffer(ScanMask::new(0b1000)), Err(Error::Invalid));
        assert_eq!(dev.enable_buffer(ScanMask::new(0b100)), Err(Error::Invalid));

        dev.enable_buffer(ScanMask::new(0b111)).unwrap();
        assert_eq!(fake.scans.load(Ordering::Relaxed), 1);
        assert_eq!(dev.enable_buffer(ScanMask::new(0b111)), Err(Error::Busy));

        trigger.poll();
        trigger.poll();
        assert_eq!(trigger.completed(), 2);

        let scan = dev.buffer().try_read_scan().unwrap();
        assert_eq!(scan.samples, [1, 2]);
        assert!(scan.timestamp.is_some());
        assert_eq!(dev.buffer().len(), 1);

        dev.triggered_buffer_cleanup();
        assert!(!dev.is_buffer_enabled());

        trigger.poll();
        assert_eq!(trigger.completed(), 2);
    }
}

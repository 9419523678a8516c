//! ADS79xx as an industrial I/O device: probe, remove, channel reads and buffered capture.

use std::fmt;
use std::iter;
use std::sync::{Arc, Mutex, MutexGuard};

use ads79xx::{Ads79xx, ChannelSet, ChipId, ChipInfo};
use embedded_hal::spi::SpiDevice;
use iio::{
    ChanInfo, ChanSpec, Error, Iio, IioDev, IioInfo, PollFunc, Regulator, Regulators, ScanMask,
    SwTrigger, TriggerHandler, Value,
};

use crate::link::Setup;

pub const DRIVER_NAME: &str = "ti-ads79xx";

/// Supply the full-scale range is derived from.
pub const VREF_SUPPLY: &str = "vref";

/// SPI device identifiers this driver binds to.
pub fn device_ids() -> impl Iterator<Item = (&'static str, ChipId)> {
    ChipId::ALL.into_iter().map(|id| (id.device_id(), id))
}

fn to_iio<E: embedded_hal::spi::Error>(e: ads79xx::Error<E>) -> Error {
    match e {
        ads79xx::Error::Spi(e) => Error::Transport(e.kind()),
        ads79xx::Error::ChannelMismatch { .. } => Error::Again,
        ads79xx::Error::InvalidChannel(_) => Error::Invalid,
    }
}

/// Voltage channels followed by the software timestamp.
fn channels(chip: &ChipInfo) -> Vec<ChanSpec> {
    chip.channels()
        .map(|ch| {
            ChanSpec::voltage(
                ch.index as u32,
                ch.datasheet_name(),
                ch.real_bits,
                ch.storage_bits,
                ch.shift,
            )
        })
        .chain(iter::once(ChanSpec::soft_timestamp(chip.num_channels as u32)))
        .collect()
}

/// Per-device state shared between channel reads and the trigger handler.
///
/// The mutex serialises single-shot reads, scan reconfiguration and scans, which all drive
/// the same SPI device and buffers.
struct State<SPI> {
    adc: Mutex<Ads79xx<SPI>>,
    reg: Arc<dyn Regulator>,
    name: String,
}

impl<SPI: SpiDevice<u16>> State<SPI> {
    fn lock(&self) -> MutexGuard<'_, Ads79xx<SPI>> {
        self.adc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scan_direct(&self, channel: u8) -> iio::Result<u16> {
        self.lock().scan_direct(channel).map_err(to_iio)
    }

    /// Full-scale range in millivolts.
    fn get_range(&self) -> iio::Result<i32> {
        let vref = self.reg.get_voltage()?;
        Ok(self.lock().full_scale_mv(vref))
    }
}

impl<SPI: SpiDevice<u16> + Send> IioInfo for State<SPI> {
    fn read_raw(&self, chan: &ChanSpec, info: ChanInfo) -> iio::Result<Value> {
        match info {
            ChanInfo::Raw => {
                let code = self.scan_direct(chan.address as u8)?;
                Ok(Value::Int((code >> chan.scan_type.shift) as i32))
            }
            ChanInfo::Scale => {
                let range = self.get_range()?;
                Ok(Value::Fractional(range, (1 << chan.scan_type.realbits) - 1))
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn update_scan_mode(&self, mask: ScanMask) -> iio::Result<()> {
        let mut adc = self.lock();
        let num_channels = adc.chip().num_channels as u32;

        let channels: ChannelSet = mask
            .iter()
            .filter(|&index| index < num_channels)
            .map(|index| index as u8)
            .collect();

        adc.update_scan_mode(channels).map_err(to_iio)
    }
}

impl<SPI: SpiDevice<u16> + Send> TriggerHandler for State<SPI> {
    fn handle(&self, pf: &PollFunc<'_>) {
        {
            let mut adc = self.lock();

            match adc.scan() {
                Ok(payload) => {
                    pf.dev
                        .push_to_buffers_with_timestamp(payload, iio::time::get_time_ns());
                }
                Err(e) => log::debug!("{}: scan failed: {e}", self.name),
            }
        }

        pf.trigger.notify_done();
    }
}

/// A failed probe. Hands the SPI device back so the bus can retry later.
pub struct ProbeError<SPI> {
    pub error: Error,
    spi: Option<SPI>,
}

impl<SPI> ProbeError<SPI> {
    fn new(error: Error, spi: SPI) -> Self {
        Self {
            error,
            spi: Some(spi),
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.error == Error::ProbeDefer
    }

    pub fn into_spi(self) -> Option<SPI> {
        self.spi
    }
}

impl<SPI> fmt::Debug for ProbeError<SPI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<SPI> fmt::Display for ProbeError<SPI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe failed: {}", self.error)
    }
}

/// A bound ADS79xx.
pub struct Ads79xxDriver<SPI> {
    dev: Arc<IioDev>,
    state: Arc<State<SPI>>,
    trigger: Arc<SwTrigger>,
}

impl<SPI> fmt::Debug for Ads79xxDriver<SPI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ads79xxDriver")
            .field("dev", &self.dev.name())
            .field("trigger", &self.trigger.name())
            .finish_non_exhaustive()
    }
}

/// Release the device, handing the SPI device back when nothing else holds on to it.
fn reclaim<SPI: SpiDevice<u16>>(dev: Option<Arc<IioDev>>, state: Arc<State<SPI>>) -> Option<SPI> {
    drop(dev);

    let state = Arc::try_unwrap(state).ok()?;
    let adc = state.adc.into_inner().unwrap_or_else(|e| e.into_inner());
    Some(adc.release())
}

impl<SPI> Ads79xxDriver<SPI>
where
    SPI: SpiDevice<u16> + Setup + Send + 'static,
{
    /// Bind to `spi`, which the bus matched against `id`.
    ///
    /// `bus_name` names the SPI device, e.g. `spi0.0`, and is also the name of the hrtimer
    /// trigger created for continuous capture. Anything set up before a failure is undone.
    pub fn probe(
        mut spi: SPI,
        id: &str,
        bus_name: &str,
        iio: &Iio,
        regulators: &Regulators,
    ) -> Result<Self, ProbeError<SPI>> {
        if let Err(kind) = spi.set_bits_per_word(16) {
            log::error!("{bus_name}: Error in spi setup.");
            return Err(ProbeError::new(Error::Transport(kind), spi));
        }

        let Some(chip) = ChipId::from_device_id(id) else {
            log::error!("{bus_name}: unknown device id {id}");
            return Err(ProbeError::new(Error::NoDevice, spi));
        };

        let adc = Ads79xx::new(spi, chip);

        let reg = match regulators.get(VREF_SUPPLY) {
            Ok(reg) => reg,
            Err(e) => {
                if e != Error::ProbeDefer {
                    log::error!("{bus_name}: Failed to get regulator \"vref\".");
                } else {
                    log::debug!("{bus_name}: regulator \"vref\" not ready, deferring");
                }
                return Err(ProbeError::new(e, adc.release()));
            }
        };

        if let Err(e) = reg.enable() {
            log::error!("{bus_name}: Failed to enable regulator \"vref\".");
            return Err(ProbeError::new(e, adc.release()));
        }

        let state = Arc::new(State {
            adc: Mutex::new(adc),
            reg: Arc::clone(&reg),
            name: bus_name.to_owned(),
        });

        let info: Arc<dyn IioInfo> = state.clone();
        let dev = IioDev::new(id, channels(chip.info()), info);

        let fail = |error: Error, dev: Arc<IioDev>, state: Arc<State<SPI>>| {
            if let Err(e) = state.reg.disable() {
                log::warn!("{bus_name}: failed to disable regulator: {e}");
            }
            ProbeError {
                error,
                spi: reclaim(Some(dev), state),
            }
        };

        let handler: Arc<dyn TriggerHandler> = state.clone();
        if let Err(e) = dev.triggered_buffer_setup(handler) {
            log::error!("{bus_name}: Failed to setup triggered buffer.");
            return Err(fail(e, dev, state));
        }

        if let Err(e) = iio.devices.register(&dev) {
            log::error!("{bus_name}: Failed to register iio device.");
            dev.triggered_buffer_cleanup();
            return Err(fail(e, dev, state));
        }

        // The buffer layer has no continuous mode, so bring our own periodic trigger.
        let trigger = match iio.triggers.create("hrtimer", bus_name) {
            Ok(trigger) => trigger,
            Err(e) => {
                log::error!("{bus_name}: Failed to create hrtimer trigger.");
                if let Err(e) = iio.devices.unregister(&dev) {
                    log::warn!("{bus_name}: failed to unregister: {e}");
                }
                dev.triggered_buffer_cleanup();
                return Err(fail(e, dev, state));
            }
        };

        dev.set_immutable_trigger(Arc::clone(trigger.trigger()));

        Ok(Self {
            dev,
            state,
            trigger,
        })
    }

    /// Unbind, in the reverse order of probe. Returns the SPI device unless someone still holds
    /// a reference to the IIO device.
    pub fn remove(self, iio: &Iio) -> Option<SPI> {
        let Self {
            dev,
            state,
            trigger,
        } = self;

        if let Err(e) = iio.devices.unregister(&dev) {
            log::warn!("{}: failed to unregister: {e}", state.name);
        }
        if let Err(e) = iio.triggers.destroy(&trigger) {
            log::warn!("{}: failed to destroy trigger: {e}", state.name);
        }
        dev.triggered_buffer_cleanup();
        if let Err(e) = state.reg.disable() {
            log::warn!("{}: failed to disable regulator: {e}", state.name);
        }

        drop(trigger);
        reclaim(Some(dev), state)
    }

    pub fn dev(&self) -> &Arc<IioDev> {
        &self.dev
    }

    pub fn trigger(&self) -> &Arc<SwTrigger> {
        &self.trigger
    }

    pub fn chip(&self) -> &'static ChipInfo {
        self.state.lock().chip()
    }

    /// Read an attribute of analog input `channel`.
    pub fn read(&self, channel: u32, info: ChanInfo) -> iio::Result<Value> {
        let index = self.dev.voltage_channel(channel).ok_or(Error::Invalid)?;
        self.dev.read_channel(index, info)
    }

    /// Start buffered capture of `inputs`, optionally with timestamps.
    pub fn enable_buffer(&self, inputs: &[u32], timestamp: bool) -> iio::Result<()> {
        let num_channels = self.chip().num_channels as u32;
        if inputs.iter().any(|&input| input >= num_channels) {
            return Err(Error::Invalid);
        }

        let mut mask: ScanMask = inputs.iter().copied().collect();
        if timestamp {
            mask.set(num_channels);
        }

        self.dev.enable_buffer(mask)
    }

    pub fn disable_buffer(&self) -> iio::Result<()> {
        self.dev.disable_buffer()
    }
}

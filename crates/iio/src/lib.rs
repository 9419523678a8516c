//! Host-side industrial I/O framework: channel descriptors, triggered scan buffers, software
//! triggers, device registration and voltage regulators.

pub mod buffer;
pub mod channel;
pub mod device;
pub mod error;
pub mod regulator;
pub mod time;
pub mod trigger;
pub mod value;

pub use buffer::{Buffer, Scan, ScanLayout};
pub use channel::{ChanInfo, ChanSpec, ChanType, ScanMask};
pub use device::{IioDev, IioInfo, Registry};
pub use error::{Error, Result};
pub use regulator::{FixedRegulator, Regulator, Regulators};
pub use trigger::{PollFunc, SwTrigger, SwTriggers, Trigger, TriggerHandler};
pub use value::Value;

/// Device and trigger registries shared by every driver.
#[derive(Default)]
pub struct Iio {
    pub devices: Registry,
    pub triggers: SwTriggers,
}

impl Iio {
    pub fn new() -> Self {
        Self::default()
    }
}

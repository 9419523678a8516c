//! Texas Instruments ADS7950 - ADS7961 ADCs exposed as industrial I/O devices.

pub mod driver;
pub mod link;
#[cfg(feature = "raspberry_pi")]
pub mod raspberry_pi;
pub mod sim;

pub use driver::{Ads79xxDriver, ProbeError};

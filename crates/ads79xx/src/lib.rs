//! Provides a driver for the Texas Instruments ADS7950 - ADS7961 family of ADCs via the `embedded-hal` ecosystem.
//!
//! The SPI device must be set up for 16 bit words in SPI mode 0. Every word is sent as its own
//! transaction so chip-select toggles between words, which the chip needs to frame a sample.

#![no_std]
#![forbid(unsafe_code)]

#[cfg(test)]
extern crate std;

use core::fmt;

use embedded_hal::spi::SpiDevice;

pub mod chip;
pub mod command;
pub mod scan;

pub use chip::{ChannelSpec, ChipId, ChipInfo};
pub use command::{Range, Response, Settings};
pub use scan::{ChannelSet, ScanBuffers, TagMismatch};

/// Largest channel count in the family.
pub const MAX_CHANNELS: usize = 16;

/// Errors for this crate
#[derive(Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// SPI communication error
    Spi(E),
    /// The chip returned a conversion for a different channel than requested
    ChannelMismatch { expected: u8, found: u8 },
    /// The chip has no such channel
    InvalidChannel(u8),
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spi(e) => write!(f, "SPI error: {e:?}"),
            Self::ChannelMismatch { expected, found } => {
                write!(f, "requested channel {expected} but received channel {found}")
            }
            Self::InvalidChannel(ch) => write!(f, "channel {ch} does not exist"),
        }
    }
}

/// ADS79xx driver
pub struct Ads79xx<SPI> {
    scan: ScanBuffers,
    spi: SPI,
    chip: &'static ChipInfo,
    settings: Settings,
    single_tx: u16,
    single_rx: u16,
}

impl<SPI: SpiDevice<u16>> Ads79xx<SPI> {
    /// Creates a new driver in manual mode with the 2 x Vref input range.
    pub fn new(spi: SPI, chip: ChipId) -> Self {
        Self::with_range(spi, chip, Range::DoubleVref)
    }

    pub fn with_range(spi: SPI, chip: ChipId, range: Range) -> Self {
        Self {
            scan: ScanBuffers::new(),
            spi,
            chip: chip.info(),
            settings: Settings::manual(range),
            single_tx: 0,
            single_rx: 0,
        }
    }

    pub fn chip(&self) -> &'static ChipInfo {
        self.chip
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Read one channel and return its 12 bit conversion code.
    ///
    /// The first frame programs the channel, the second keeps the chip clocked while it
    /// converts and the third clocks the result out.
    ///
    /// The three frames are separate transactions. On a shared bus another device may be
    /// addressed between them, which the chip tolerates, but the frames are not atomic.
    pub fn scan_direct(&mut self, channel: u8) -> Result<u16, Error<SPI::Error>> {
        if channel >= self.chip.num_channels {
            return Err(Error::InvalidChannel(channel));
        }

        self.single_tx = command::encode(channel, self.settings);

        let mut rx = [0];
        self.spi.write(&[self.single_tx]).map_err(Error::Spi)?;
        self.spi.write(&[self.single_tx]).map_err(Error::Spi)?;
        self.spi.read(&mut rx).map_err(Error::Spi)?;
        self.single_rx = rx[0];

        let response = Response(self.single_rx);

        if response.tag() != channel {
            return Err(Error::ChannelMismatch {
                expected: channel,
                found: response.tag(),
            });
        }

        Ok(response.code())
    }

    /// Read one channel and return the code scaled to the part's resolution.
    pub fn read(&mut self, channel: u8) -> Result<u16, Error<SPI::Error>> {
        Ok(self.scan_direct(channel)? >> self.chip.shift())
    }

    /// Rebuild the scan exchange for a new set of channels.
    pub fn update_scan_mode(&mut self, channels: ChannelSet) -> Result<(), Error<SPI::Error>> {
        if let Some(ch) = channels.invalid() {
            return Err(Error::InvalidChannel(ch));
        }

        match channels.last() {
            Some(ch) if ch >= self.chip.num_channels => Err(Error::InvalidChannel(ch)),
            _ => {
                self.scan.prepare(channels, self.settings);
                Ok(())
            }
        }
    }

    pub fn scan_buffers(&self) -> &ScanBuffers {
        &self.scan
    }

    /// Run the prepared scan and return the raw words for the scan set, in ascending channel
    /// order. Channel tags are left in the upper four bits.
    pub fn scan(&mut self) -> Result<&[u16], Error<SPI::Error>> {
        self.scan.exchange(&mut self.spi).map_err(Error::Spi)?;

        if let Some(mismatch) = self.scan.check_tags() {
            log::debug!(
                "{}: scan word {} carries channel {} instead of {}",
                self.chip.name,
                mismatch.position,
                mismatch.found,
                mismatch.expected
            );
        }

        Ok(self.scan.payload())
    }

    /// Full-scale input in millivolts for a reference of `vref_uv` microvolts.
    pub fn full_scale_mv(&self, vref_uv: i32) -> i32 {
        self.settings.full_scale_mv(vref_uv)
    }

    /// Give back the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::spi::{Error as _, ErrorKind, ErrorType, Operation};
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    struct MockError;

    impl embedded_hal::spi::Error for MockError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Answers every frame with the next scripted word and records what was sent.
    #[derive(Default)]
    struct MockSpi {
        replies: Vec<u16>,
        sent: Vec<u16>,
        frames: usize,
        fail: bool,
    }

    impl MockSpi {
        fn replying(replies: &[u16]) -> Self {
            Self {
                replies: replies.iter().rev().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl ErrorType for MockSpi {
        type Error = MockError;
    }

    impl SpiDevice<u16> for MockSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u16>]) -> Result<(), MockError> {
            if self.fail {
                return Err(MockError);
            }

            assert_eq!(operations.len(), 1, "One operation per chip-select frame");
            self.frames += 1;

            let reply = self.replies.pop().unwrap_or(0);

            match &mut operations[0] {
                Operation::Write(words) => {
                    assert_eq!(words.len(), 1);
                    self.sent.push(words[0]);
                }
                Operation::Read(words) => {
                    assert_eq!(words.len(), 1);
                    self.sent.push(0);
                    words[0] = reply;
                }
                Operation::Transfer(read, write) => {
                    assert_eq!((read.len(), write.len()), (1, 1));
                    self.sent.push(write[0]);
                    read[0] = reply;
                }
                _ => panic!("Not an expected operation"),
            }

            Ok(())
        }
    }

    #[test]
    fn single_shot_12_bit() {
        let spi = MockSpi::replying(&[0, 0, 0x3ABC]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7950);

        assert_eq!(adc.scan_direct(3), Ok(0xABC));

        let spi = adc.release();
        let cmd = command::encode(3, Settings::default());
        assert_eq!(spi.sent, [cmd, cmd, 0]);
        assert_eq!(spi.frames, 3);
    }

    #[test]
    fn read_shifts_by_resolution() {
        let spi = MockSpi::replying(&[0, 0, 0x3ABC]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7950);
        assert_eq!(adc.read(3), Ok(2748));

        let spi = MockSpi::replying(&[0, 0, 0x2FFC]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7955);
        assert_eq!(adc.read(2), Ok(1023));

        let spi = MockSpi::replying(&[0, 0, 0x1FF0]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7959);
        assert_eq!(adc.read(1), Ok(255));
    }

    #[test]
    fn single_shot_wrong_channel() {
        let spi = MockSpi::replying(&[0, 0, 0x2001]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7954);

        assert_eq!(
            adc.scan_direct(1),
            Err(Error::ChannelMismatch {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn single_shot_rejects_missing_channel() {
        let mut adc = Ads79xx::new(MockSpi::default(), ChipId::Ads7950);

        assert_eq!(adc.scan_direct(4), Err(Error::InvalidChannel(4)));
        assert_eq!(adc.release().frames, 0);
    }

    #[test]
    fn single_shot_transport_error() {
        let spi = MockSpi {
            fail: true,
            ..MockSpi::default()
        };
        let mut adc = Ads79xx::new(spi, ChipId::Ads7953);

        match adc.scan_direct(0) {
            Err(Error::Spi(e)) => assert_eq!(e.kind(), ErrorKind::Other),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn scan_discards_leading_words() {
        let spi = MockSpi::replying(&[0x0000, 0x0000, 0x0AAA, 0x1BBB]);
        let mut adc = Ads79xx::new(spi, ChipId::Ads7951);

        adc.update_scan_mode(ChannelSet::new(0b11)).unwrap();
        assert_eq!(adc.scan(), Ok(&[0x0AAA, 0x1BBB][..]));

        let settings = adc.settings();
        let spi = adc.release();
        assert_eq!(
            spi.sent,
            [command::encode(0, settings), command::encode(1, settings), 0, 0]
        );
        assert_eq!(spi.frames, 4);
    }

    #[test]
    fn scan_set_must_fit_the_chip() {
        let mut adc = Ads79xx::new(MockSpi::default(), ChipId::Ads7950);

        assert_eq!(
            adc.update_scan_mode(ChannelSet::new(0x0011)),
            Err(Error::InvalidChannel(4))
        );
        assert_eq!(adc.scan_buffers().words(), 0);
    }

    #[test]
    fn scan_set_rejects_channels_past_15() {
        let mut adc = Ads79xx::new(MockSpi::default(), ChipId::Ads7957);
        let set: ChannelSet = [1, 17].into_iter().collect();

        assert_eq!(adc.update_scan_mode(set), Err(Error::InvalidChannel(17)));
        assert_eq!(adc.scan_buffers().words(), 0);
    }

    #[test]
    fn full_scale_follows_range() {
        let adc = Ads79xx::new(MockSpi::default(), ChipId::Ads7950);
        assert_eq!(adc.full_scale_mv(2_500_000), 5000);

        let adc = Ads79xx::with_range(MockSpi::default(), ChipId::Ads7950, Range::Vref);
        assert_eq!(adc.full_scale_mv(2_500_000), 2500);
    }
}

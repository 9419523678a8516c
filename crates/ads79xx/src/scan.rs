//! Buffered scan pipeline.
//!
//! The chip converts during the frame after a command and clocks the result out in the frame
//! after that, so the result for the command in word `k` arrives in word `k + 2`. A scan of `n`
//! channels is therefore `n` commands followed by two padding words, and the first two words
//! received belong to whatever was programmed before the scan started.

use embedded_hal::spi::SpiDevice;

use crate::command::{encode, Response, Settings};
use crate::MAX_CHANNELS;

/// Words between a command and its result.
pub const PIPELINE_OFFSET: usize = 2;

/// Set of analog inputs, iterated lowest first.
///
/// Channels past 15 have no place in the set. The first one inserted is remembered so the
/// set can be rejected rather than silently programming a different input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelSet {
    bits: u16,
    invalid: Option<u8>,
}

impl ChannelSet {
    pub const fn new(bits: u16) -> Self {
        Self {
            bits,
            invalid: None,
        }
    }

    pub fn bits(self) -> u16 {
        self.bits
    }

    pub fn count(self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn contains(self, channel: u8) -> bool {
        channel < 16 && self.bits & (1 << channel) != 0
    }

    pub fn insert(&mut self, channel: u8) {
        if channel < 16 {
            self.bits |= 1 << channel;
        } else if self.invalid.is_none() {
            self.invalid = Some(channel);
        }
    }

    /// First channel inserted that does not fit in the set.
    pub fn invalid(self) -> Option<u8> {
        self.invalid
    }

    /// Highest channel in the set.
    pub fn last(self) -> Option<u8> {
        (self.bits != 0).then(|| 15 - self.bits.leading_zeros() as u8)
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..16).filter(move |&channel| self.contains(channel))
    }
}

impl FromIterator<u8> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = Self::default();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

/// Receive buffer pinned to its own cache line, as DMA capable controllers invalidate whole
/// lines around a transfer.
#[derive(Clone, Debug)]
#[repr(C, align(64))]
struct RxBuffer([u16; MAX_CHANNELS + 10]);

/// Mismatch between the channel commanded and the channel the chip reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagMismatch {
    /// Position in the payload.
    pub position: usize,
    pub expected: u8,
    pub found: u8,
}

/// Transmit and receive words for one scan, rebuilt whenever the scan set changes.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct ScanBuffers {
    rx: RxBuffer,
    tx: [u16; MAX_CHANNELS + 2],
    channels: ChannelSet,
    len: usize,
}

impl Default for ScanBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanBuffers {
    pub fn new() -> Self {
        Self {
            rx: RxBuffer([0; MAX_CHANNELS + 10]),
            tx: [0; MAX_CHANNELS + 2],
            channels: ChannelSet::default(),
            len: 0,
        }
    }

    /// Write one command per channel in ascending order followed by the padding words.
    pub fn prepare(&mut self, channels: ChannelSet, settings: Settings) {
        let mut words = 0;

        for channel in channels.iter() {
            self.tx[words] = encode(channel, settings);
            words += 1;
        }

        self.tx[words] = 0;
        self.tx[words + 1] = 0;

        self.channels = channels;
        self.len = (words + PIPELINE_OFFSET) * 2;
    }

    pub fn channels(&self) -> ChannelSet {
        self.channels
    }

    /// Transfer length in bytes.
    pub fn len_bytes(&self) -> usize {
        self.len
    }

    /// Transfer length in words.
    pub fn words(&self) -> usize {
        self.len / 2
    }

    pub fn tx(&self) -> &[u16] {
        &self.tx[..self.words()]
    }

    /// Everything received in the last exchange, including the two stale leading words.
    pub fn rx(&self) -> &[u16] {
        &self.rx.0[..self.words()]
    }

    /// Samples for the scan set, in scan order.
    pub fn payload(&self) -> &[u16] {
        let words = self.words();
        &self.rx.0[PIPELINE_OFFSET.min(words)..words]
    }

    /// Run the prepared exchange. Each word is its own chip-select frame.
    pub fn exchange<SPI: SpiDevice<u16>>(&mut self, spi: &mut SPI) -> Result<(), SPI::Error> {
        let words = self.words();

        for (rx, tx) in self.rx.0[..words]
            .chunks_mut(1)
            .zip(self.tx[..words].chunks(1))
        {
            spi.transfer(rx, tx)?;
        }

        Ok(())
    }

    /// First payload word whose channel tag does not match the command that produced it.
    pub fn check_tags(&self) -> Option<TagMismatch> {
        self.channels
            .iter()
            .zip(self.payload())
            .enumerate()
            .find_map(|(position, (expected, &word))| {
                let found = Response(word).tag();
                (found != expected).then_some(TagMismatch {
                    position,
                    expected,
                    found,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of};

    #[test]
    fn prepare_layout() {
        let settings = Settings::default();

        for bits in [0x0001, 0x0092, 0x8001, 0xFFFF, 0x5A5A] {
            let set = ChannelSet::new(bits);
            let mut buffers = ScanBuffers::new();

            buffers.prepare(set, settings);

            let n = set.count();
            assert_eq!(buffers.words(), n + 2);
            assert_eq!(buffers.len_bytes(), (n + 2) * 2);

            for (word, channel) in buffers.tx()[..n].iter().zip(set.iter()) {
                assert_eq!(*word, encode(channel, settings));
            }

            assert_eq!(&buffers.tx()[n..], &[0, 0]);
        }
    }

    #[test]
    fn prepare_147() {
        let settings = Settings::default();
        let mut buffers = ScanBuffers::new();

        buffers.prepare([1, 4, 7].into_iter().collect(), settings);

        assert_eq!(
            buffers.tx(),
            &[encode(1, settings), encode(4, settings), encode(7, settings), 0, 0]
        );
        assert_eq!(buffers.len_bytes(), 10);
    }

    #[test]
    fn shrinking_the_set_clears_stale_commands() {
        let settings = Settings::default();
        let mut buffers = ScanBuffers::new();

        buffers.prepare(ChannelSet::new(0x000F), settings);
        buffers.prepare(ChannelSet::new(0x0001), settings);

        assert_eq!(buffers.tx(), &[encode(0, settings), 0, 0]);
    }

    #[test]
    fn rx_owns_its_cache_line() {
        assert_eq!(align_of::<RxBuffer>(), 64);
        assert_eq!(offset_of!(ScanBuffers, rx), 0);
        assert!(offset_of!(ScanBuffers, tx) >= 64);
    }

    #[test]
    fn channel_set() {
        let set: ChannelSet = [7, 1, 4].into_iter().collect();

        assert_eq!(set.count(), 3);
        assert_eq!(set.last(), Some(7));
        assert!(set.iter().eq([1, 4, 7]));
        assert!(!set.contains(16));
        assert_eq!(ChannelSet::default().last(), None);
    }

    #[test]
    fn channel_set_keeps_out_of_range_inserts() {
        let set: ChannelSet = [3, 17, 20].into_iter().collect();

        assert_eq!(set.bits(), 1 << 3);
        assert_eq!(set.invalid(), Some(17));
        assert!(!set.contains(1));
    }

    #[test]
    fn tag_check() {
        let mut buffers = ScanBuffers::new();

        buffers.prepare(ChannelSet::new(0b11), Settings::default());
        buffers.rx.0[..4].copy_from_slice(&[0x0000, 0x0000, 0x0AAA, 0x1BBB]);
        assert_eq!(buffers.payload(), &[0x0AAA, 0x1BBB]);
        assert_eq!(buffers.check_tags(), None);

        buffers.rx.0[3] = 0x2BBB;
        assert_eq!(
            buffers.check_tags(),
            Some(TagMismatch {
                position: 1,
                expected: 1,
                found: 2
            })
        );
    }
}

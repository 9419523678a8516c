//! Control word encoding and response decoding.
//!
//! Control word, MSB first:
//!
//! | 15..12 | 11    | 10..7   | 6     | 5..0 |
//! |--------|-------|---------|-------|------|
//! | mode   | write | channel | range | 0    |
//!
//! Response word: bits 15..12 echo the channel whose conversion is carried in bits 11..0.

use core::ops::BitOr;

/// Manual channel select mode.
pub const MANUAL: u16 = 1 << 12;
/// Latch the lower bits as the new mode, channel and range.
pub const WRITE: u16 = 1 << 11;
/// Input range of 2 x Vref.
pub const RANGE_5V: u16 = 1 << 6;

const CHANNEL_SHIFT: u16 = 7;

/// Build the control word for reading `channel` with `settings`.
pub fn encode(channel: u8, settings: Settings) -> u16 {
    MANUAL | WRITE | ((channel as u16 & 0xF) << CHANNEL_SHIFT) | settings.bits()
}

/// Full-scale input range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Range {
    /// 0 V to Vref.
    Vref,
    /// 0 V to 2 x Vref.
    #[default]
    DoubleVref,
}

/// Bits OR-ed into every command. Only ever holds [`MANUAL`] and [`RANGE_5V`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings(u16);

impl Settings {
    pub const MANUAL: Self = Self(MANUAL);
    pub const RANGE_5V: Self = Self(RANGE_5V);

    /// Manual mode with the given input range.
    pub fn manual(range: Range) -> Self {
        match range {
            Range::Vref => Self::MANUAL,
            Range::DoubleVref => Self::MANUAL | Self::RANGE_5V,
        }
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn range(self) -> Range {
        if self.contains(Self::RANGE_5V) {
            Range::DoubleVref
        } else {
            Range::Vref
        }
    }

    /// Full-scale input in millivolts for a reference of `vref_uv` microvolts.
    pub fn full_scale_mv(self, vref_uv: i32) -> i32 {
        let mv = vref_uv / 1000;

        match self.range() {
            Range::Vref => mv,
            Range::DoubleVref => mv * 2,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::manual(Range::default())
    }
}

impl BitOr for Settings {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A word clocked out by the chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response(pub u16);

impl Response {
    /// Channel the conversion belongs to.
    pub fn tag(self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// 12 bit conversion code. Lower resolution parts leave the unused low bits at zero.
    pub fn code(self) -> u16 {
        self.0 & 0x0FFF
    }
}

//! Channel descriptors and scan masks.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChanType {
    Voltage,
    Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Unsigned,
    Signed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Cpu,
    Big,
    Little,
}

/// Layout of one channel's sample within a buffered scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanType {
    pub sign: Sign,
    pub realbits: u8,
    pub storagebits: u8,
    pub shift: u8,
    pub endianness: Endianness,
}

impl ScanType {
    /// Extract the value from a stored sample.
    pub fn decode(&self, raw: u16) -> u16 {
        let mask = 1u64
            .checked_shl(self.realbits as u32)
            .map_or(u64::MAX, |bit| bit - 1) as u16;
        raw.checked_shr(self.shift as u32).unwrap_or(0) & mask
    }
}

/// Attributes a channel can be queried for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChanInfo {
    Raw = 0,
    Processed = 1,
    Scale = 2,
    Offset = 3,
}

/// Set of [`ChanInfo`] attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InfoMask(u8);

impl InfoMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, info: ChanInfo) -> Self {
        Self(self.0 | 1 << info as u8)
    }

    pub fn contains(self, info: ChanInfo) -> bool {
        self.0 & 1 << info as u8 != 0
    }
}

/// Description of one channel exposed by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanSpec {
    pub chan_type: ChanType,
    pub channel: u32,
    /// Driver private channel address.
    pub address: u32,
    pub datasheet_name: &'static str,
    pub scan_index: u32,
    pub scan_type: ScanType,
    pub info_mask_separate: InfoMask,
    pub info_mask_shared_by_type: InfoMask,
}

impl ChanSpec {
    /// Unsigned voltage channel with a raw value of its own and a scale shared by all voltage
    /// channels.
    pub fn voltage(index: u32, name: &'static str, realbits: u8, storagebits: u8, shift: u8) -> Self {
        Self {
            chan_type: ChanType::Voltage,
            channel: index,
            address: index,
            datasheet_name: name,
            scan_index: index,
            scan_type: ScanType {
                sign: Sign::Unsigned,
                realbits,
                storagebits,
                shift,
                endianness: Endianness::Cpu,
            },
            info_mask_separate: InfoMask::empty().with(ChanInfo::Raw),
            info_mask_shared_by_type: InfoMask::empty().with(ChanInfo::Scale),
        }
    }

    /// Software timestamp channel, 64 bit signed nanoseconds.
    pub fn soft_timestamp(scan_index: u32) -> Self {
        Self {
            chan_type: ChanType::Timestamp,
            channel: u32::MAX,
            address: 0,
            datasheet_name: "timestamp",
            scan_index,
            scan_type: ScanType {
                sign: Sign::Signed,
                realbits: 64,
                storagebits: 64,
                shift: 0,
                endianness: Endianness::Cpu,
            },
            info_mask_separate: InfoMask::empty(),
            info_mask_shared_by_type: InfoMask::empty(),
        }
    }

    pub fn supports(&self, info: ChanInfo) -> bool {
        self.info_mask_separate.contains(info) || self.info_mask_shared_by_type.contains(info)
    }
}

impl fmt::Display for ChanSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chan_type {
            ChanType::Voltage => write!(f, "in_voltage{}", self.channel),
            ChanType::Timestamp => f.write_str("in_timestamp"),
        }
    }
}

/// Set of scan indices enabled for buffered capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanMask(u64);

impl ScanMask {
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Add `index`. Indices past 63 do not fit and are ignored.
    pub fn set(&mut self, index: u32) {
        if index < 64 {
            self.0 |= 1 << index;
        }
    }

    pub fn contains(self, index: u32) -> bool {
        index < 64 && self.0 & (1 << index) != 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..64).filter(move |&index| self.contains(index))
    }
}

impl FromIterator<u32> for ScanMask {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut mask = Self::default();
        for index in iter {
            mask.set(index);
        }
        mask
    }
}

use core::fmt;

/// Every part in the family, in datasheet order.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChipId {
    Ads7950 = 0,
    Ads7951 = 1,
    Ads7952 = 2,
    Ads7953 = 3,
    Ads7954 = 4,
    Ads7955 = 5,
    Ads7956 = 6,
    Ads7957 = 7,
    Ads7958 = 8,
    Ads7959 = 9,
    Ads7960 = 10,
    Ads7961 = 11,
}

/// Static description of one chip variant.
#[derive(Debug, PartialEq, Eq)]
pub struct ChipInfo {
    pub id: ChipId,
    /// SPI device identifier, e.g. `"ti-ads7953"`.
    pub name: &'static str,
    pub num_channels: u8,
    pub real_bits: u8,
}

const fn chip(id: ChipId, name: &'static str, num_channels: u8, real_bits: u8) -> ChipInfo {
    ChipInfo {
        id,
        name,
        num_channels,
        real_bits,
    }
}

static CHIPS: [ChipInfo; 12] = [
    chip(ChipId::Ads7950, "ti-ads7950", 4, 12),
    chip(ChipId::Ads7951, "ti-ads7951", 8, 12),
    chip(ChipId::Ads7952, "ti-ads7952", 12, 12),
    chip(ChipId::Ads7953, "ti-ads7953", 16, 12),
    chip(ChipId::Ads7954, "ti-ads7954", 4, 10),
    chip(ChipId::Ads7955, "ti-ads7955", 8, 10),
    chip(ChipId::Ads7956, "ti-ads7956", 12, 10),
    chip(ChipId::Ads7957, "ti-ads7957", 16, 10),
    chip(ChipId::Ads7958, "ti-ads7958", 4, 8),
    chip(ChipId::Ads7959, "ti-ads7959", 8, 8),
    chip(ChipId::Ads7960, "ti-ads7960", 12, 8),
    chip(ChipId::Ads7961, "ti-ads7961", 16, 8),
];

static NAMES: [&str; crate::MAX_CHANNELS] = [
    "CH0", "CH1", "CH2", "CH3", "CH4", "CH5", "CH6", "CH7", "CH8", "CH9", "CH10", "CH11", "CH12",
    "CH13", "CH14", "CH15",
];

impl ChipId {
    /// All twelve variants.
    pub const ALL: [ChipId; 12] = [
        Self::Ads7950,
        Self::Ads7951,
        Self::Ads7952,
        Self::Ads7953,
        Self::Ads7954,
        Self::Ads7955,
        Self::Ads7956,
        Self::Ads7957,
        Self::Ads7958,
        Self::Ads7959,
        Self::Ads7960,
        Self::Ads7961,
    ];

    pub fn info(self) -> &'static ChipInfo {
        &CHIPS[self as usize]
    }

    /// The SPI device identifier this variant is matched by.
    pub fn device_id(self) -> &'static str {
        self.info().name
    }

    /// Look up a variant by its SPI device identifier.
    pub fn from_device_id(id: &str) -> Option<Self> {
        CHIPS.iter().find(|info| info.name == id).map(|info| info.id)
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_id())
    }
}

impl ChipInfo {
    /// Shift that left-aligns a conversion code of this resolution within the 12 bit field.
    pub fn shift(&self) -> u8 {
        12 - self.real_bits
    }

    /// Largest code a conversion can produce after normalisation.
    pub fn max_code(&self) -> u16 {
        (1 << self.real_bits) - 1
    }

    /// Descriptors for every analog input, lowest index first.
    pub fn channels(&self) -> impl Iterator<Item = ChannelSpec> + '_ {
        (0..self.num_channels).map(move |index| ChannelSpec {
            index,
            real_bits: self.real_bits,
            storage_bits: 16,
            shift: self.shift(),
        })
    }
}

/// One analog input. Samples are unsigned and CPU-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub index: u8,
    pub real_bits: u8,
    pub storage_bits: u8,
    pub shift: u8,
}

impl ChannelSpec {
    pub fn datasheet_name(&self) -> &'static str {
        NAMES[self.index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_round_trip() {
        for id in ChipId::ALL {
            assert_eq!(ChipId::from_device_id(id.device_id()), Some(id));
            assert_eq!(id.info().id, id);
        }

        assert_eq!(ChipId::from_device_id("ti-ads7953"), Some(ChipId::Ads7953));
        assert_eq!(ChipId::from_device_id("ti-ads7962"), None);
    }

    #[test]
    fn shift_follows_resolution() {
        for id in ChipId::ALL {
            let info = id.info();
            let expected = match info.real_bits {
                12 => 0,
                10 => 2,
                8 => 4,
                bits => panic!("unexpected resolution {bits}"),
            };

            assert_eq!(info.shift(), expected);
            assert!(info.channels().all(|ch| ch.shift == expected && ch.storage_bits == 16));
        }
    }

    #[test]
    fn channel_count_matches_variant() {
        let counts = [4, 8, 12, 16];

        for (n, id) in ChipId::ALL.into_iter().enumerate() {
            let info = id.info();
            assert_eq!(info.num_channels, counts[n % 4]);
            assert_eq!(info.channels().count(), info.num_channels as usize);
        }
    }

    #[test]
    fn channel_names() {
        let info = ChipId::Ads7961.info();
        let last = info.channels().last().unwrap();

        assert_eq!(last.index, 15);
        assert_eq!(last.datasheet_name(), "CH15");
        assert_eq!(info.max_code(), 255);
        assert_eq!(ChipId::Ads7950.info().max_code(), 4095);
    }
}

//! Simulated ADS79xx chip for running the driver without hardware.

use std::sync::{Arc, Mutex};

use ads79xx::command::{MANUAL, RANGE_5V, WRITE};
use ads79xx::{ChipId, ChipInfo};
use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use crate::link::Setup;

/// Analog inputs shared between the simulated chip and whoever drives them.
#[derive(Clone)]
pub struct Inputs {
    microvolts: Arc<Mutex<Vec<i32>>>,
}

impl Inputs {
    pub fn new(channels: usize) -> Self {
        Self {
            microvolts: Arc::new(Mutex::new(vec![0; channels])),
        }
    }

    pub fn set(&self, channel: usize, microvolts: i32) {
        if let Some(input) = self
            .microvolts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(channel)
        {
            *input = microvolts;
        }
    }

    pub fn get(&self, channel: usize) -> i32 {
        self.microvolts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .copied()
            .unwrap_or(0)
    }
}

/// Cycle accurate model of the chip in manual mode.
///
/// A command clocked in during frame `k` selects the channel converted during frame `k + 1`,
/// whose result is clocked out during frame `k + 2`.
pub struct SimAds79xx {
    chip: &'static ChipInfo,
    inputs: Inputs,
    vref_uv: i32,
    bits_per_word: u8,
    selected: u8,
    double_range: bool,
    converted: u16,
    frames: usize,
}

impl SimAds79xx {
    pub fn new(chip: ChipId, inputs: Inputs, vref_uv: i32) -> Self {
        Self {
            chip: chip.info(),
            inputs,
            vref_uv,
            bits_per_word: 8,
            selected: 0,
            double_range: false,
            converted: 0,
            frames: 0,
        }
    }

    /// Chip-select frames seen so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn convert(&self, channel: u8) -> u16 {
        let full_scale = if self.double_range {
            self.vref_uv as i64 * 2
        } else {
            self.vref_uv as i64
        };

        let input = (self.inputs.get(channel as usize) as i64).clamp(0, full_scale);
        let code = if full_scale == 0 {
            0
        } else {
            (input * self.chip.max_code() as i64 / full_scale) as u16
        };

        ((channel as u16) << 12) | (code << self.chip.shift())
    }

    fn frame(&mut self, word: u16) -> u16 {
        let out = self.converted;
        self.converted = self.convert(self.selected);

        if word & 0xF000 == MANUAL && word & WRITE != 0 {
            self.selected = ((word >> 7) & 0xF) as u8 % self.chip.num_channels;
            self.double_range = word & RANGE_5V != 0;
        }

        self.frames += 1;
        out
    }
}

impl Setup for SimAds79xx {
    fn set_bits_per_word(&mut self, bits: u8) -> Result<(), ErrorKind> {
        match bits {
            16 => {
                self.bits_per_word = bits;
                Ok(())
            }
            _ => Err(ErrorKind::Other),
        }
    }
}

impl ErrorType for SimAds79xx {
    type Error = ErrorKind;
}

impl SpiDevice<u16> for SimAds79xx {
    fn transaction(&mut self, operations: &mut [Operation<'_, u16>]) -> Result<(), ErrorKind> {
        if self.bits_per_word != 16 {
            return Err(ErrorKind::Other);
        }

        // One chip-select frame carries exactly one word.
        let words: usize = operations
            .iter()
            .map(|op| match op {
                Operation::Write(words) => words.len(),
                Operation::Read(words) | Operation::TransferInPlace(words) => words.len(),
                Operation::Transfer(read, write) => read.len().max(write.len()),
                Operation::DelayNs(_) => 0,
            })
            .sum();

        if words != 1 {
            return Err(ErrorKind::ChipSelectFault);
        }

        for op in operations {
            match op {
                Operation::Write(words) => {
                    self.frame(words[0]);
                }
                Operation::Read(words) => words[0] = self.frame(0),
                Operation::Transfer(read, write) => {
                    let out = self.frame(write.first().copied().unwrap_or(0));
                    if let Some(word) = read.first_mut() {
                        *word = out;
                    }
                }
                Operation::TransferInPlace(words) => words[0] = self.frame(words[0]),
                Operation::DelayNs(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ads79xx::{Ads79xx, ChannelSet};

    fn sim(chip: ChipId) -> (SimAds79xx, Inputs) {
        let inputs = Inputs::new(chip.info().num_channels as usize);
        let mut sim = SimAds79xx::new(chip, inputs.clone(), 2_500_000);
        sim.set_bits_per_word(16).unwrap();
        (sim, inputs)
    }

    #[test]
    fn single_shot_against_the_model() {
        let (sim, inputs) = sim(ChipId::Ads7953);
        inputs.set(5, 2_500_000);

        let mut adc = Ads79xx::new(sim, ChipId::Ads7953);
        assert_eq!(adc.scan_direct(5), Ok(2047));
        assert_eq!(adc.read(0), Ok(0));
        assert_eq!(adc.release().frames(), 6);
    }

    #[test]
    fn scan_against_the_model() {
        let (sim, inputs) = sim(ChipId::Ads7955);
        inputs.set(1, 5_000_000);
        inputs.set(4, 1_250_000);
        inputs.set(7, 0);

        let mut adc = Ads79xx::new(sim, ChipId::Ads7955);
        adc.update_scan_mode([1, 4, 7].into_iter().collect::<ChannelSet>())
            .unwrap();

        // The model starts with nothing programmed, the payload is valid from the first scan.
        let payload = adc.scan().unwrap().to_vec();
        assert_eq!(payload, [0x1FFC, 0x43FC, 0x7000]);
        assert_eq!(adc.scan_buffers().check_tags(), None);
    }

    #[test]
    fn multi_word_frames_are_rejected() {
        let (mut sim, _) = sim(ChipId::Ads7950);

        assert_eq!(sim.write(&[0x1840, 0x1840]), Err(ErrorKind::ChipSelectFault));
    }

    #[test]
    fn requires_16_bit_setup() {
        let mut sim = SimAds79xx::new(ChipId::Ads7950, Inputs::new(4), 2_500_000);

        assert_eq!(sim.write(&[0x1840]), Err(ErrorKind::Other));
    }
}

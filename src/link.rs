//! 16 bit word SPI links.

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

/// Link level configuration applied at probe time.
pub trait Setup {
    fn set_bits_per_word(&mut self, bits: u8) -> Result<(), ErrorKind>;
}

/// Presents a byte oriented SPI device as a 16 bit one, each word sent MSB first.
///
/// Chip-select framing is left to the inner device, so one `u16` transaction is one
/// chip-select frame on the wire.
pub struct WordLink<D> {
    inner: D,
    bits_per_word: u8,
}

impl<D> WordLink<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            bits_per_word: 8,
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D> Setup for WordLink<D> {
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

impl<D: SpiDevice<u8>> ErrorType for WordLink<D> {
    type Error = D::Error;
}

fn to_bytes(words: &[u16], len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    bytes.resize(len * 2, 0);
    bytes
}

fn from_bytes(words: &mut [u16], bytes: &[u8]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
}

impl<D: SpiDevice<u8>> SpiDevice<u16> for WordLink<D> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u16>]) -> Result<(), Self::Error> {
        debug_assert_eq!(self.bits_per_word, 16, "link used before setup");

        let (tx, mut rx): (Vec<Vec<u8>>, Vec<Vec<u8>>) = operations
            .iter()
            .map(|op| match op {
                Operation::Write(words) => (to_bytes(words, words.len()), Vec::new()),
                Operation::Read(words) => (Vec::new(), vec![0; words.len() * 2]),
                Operation::Transfer(read, write) => {
                    let len = read.len().max(write.len());
                    (to_bytes(write, len), vec![0; len * 2])
                }
                Operation::TransferInPlace(words) => {
                    (to_bytes(words, words.len()), vec![0; words.len() * 2])
                }
                Operation::DelayNs(_) => (Vec::new(), Vec::new()),
            })
            .unzip();

        {
            let mut bytes = Vec::with_capacity(operations.len());

            for ((op, tx), rx) in operations.iter().zip(&tx).zip(rx.iter_mut()) {
                bytes.push(match op {
                    Operation::Write(_) => Operation::Write(tx.as_slice()),
                    Operation::Read(_) => Operation::Read(rx.as_mut_slice()),
                    Operation::Transfer(..) | Operation::TransferInPlace(_) => {
                        Operation::Transfer(rx.as_mut_slice(), tx.as_slice())
                    }
                    Operation::DelayNs(ns) => Operation::DelayNs(*ns),
                });
            }

            self.inner.transaction(&mut bytes)?;
        }

        for (op, rx) in operations.iter_mut().zip(&rx) {
            match op {
                Operation::Read(words)
                | Operation::Transfer(words, _)
                | Operation::TransferInPlace(words) => from_bytes(words, rx),
                Operation::Write(_) | Operation::DelayNs(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Loops every byte back incremented by one and records what was written.
    #[derive(Default)]
    struct ByteLoop {
        written: Vec<u8>,
        transactions: usize,
    }

    impl ErrorType for ByteLoop {
        type Error = Infallible;
    }

    impl SpiDevice<u8> for ByteLoop {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
            self.transactions += 1;

            for op in operations {
                match op {
                    Operation::Write(bytes) => self.written.extend_from_slice(bytes),
                    Operation::Read(bytes) => bytes.fill(0xEE),
                    Operation::Transfer(read, write) => {
                        self.written.extend_from_slice(write);
                        for (r, w) in read.iter_mut().zip(write.iter()) {
                            *r = w.wrapping_add(1);
                        }
                    }
                    Operation::TransferInPlace(bytes) => {
                        self.written.extend_from_slice(bytes);
                        bytes.iter_mut().for_each(|b| *b = b.wrapping_add(1));
                    }
                    Operation::DelayNs(_) => {}
                }
            }

            Ok(())
        }
    }

    #[test]
    fn setup_accepts_16_bit_words_only() {
        let mut link = WordLink::new(ByteLoop::default());

        assert_eq!(link.set_bits_per_word(8), Err(ErrorKind::Other));
        assert_eq!(link.set_bits_per_word(16), Ok(()));
    }

    #[test]
    fn words_are_big_endian() {
        let mut link = WordLink::new(ByteLoop::default());
        link.set_bits_per_word(16).unwrap();

        let mut read = [0u16; 1];
        link.write(&[0x1840]).unwrap();
        link.transfer(&mut read, &[0x1BC0]).unwrap();
        assert_eq!(read, [0x1CC1]);

        let mut read = [0u16; 1];
        link.read(&mut read).unwrap();
        assert_eq!(read, [0xEEEE]);

        let inner = link.into_inner();
        assert_eq!(inner.written, [0x18, 0x40, 0x1B, 0xC0]);
        assert_eq!(inner.transactions, 3);
    }

    #[test]
    fn uneven_transfer_pads_writes() {
        let mut link = WordLink::new(ByteLoop::default());
        link.set_bits_per_word(16).unwrap();

        let mut read = [0u16; 2];
        link.transfer(&mut read, &[0x0102]).unwrap();
        assert_eq!(read, [0x0203, 0x0101]);
    }
}

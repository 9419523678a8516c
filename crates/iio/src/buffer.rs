//! Scan ring buffer between a trigger handler and its consumer.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Scans held by a freshly created buffer.
pub const DEFAULT_LENGTH: usize = 128;

/// Fixed capacity FIFO.
pub struct RingBuffer<T> {
    ring: Vec<T>,
    head: usize,
    tail: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            // head == tail means empty, so one slot is never used.
            ring: vec![T::default(); capacity + 1],
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.len() - 1
    }

    pub fn len(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            (self.ring.len() - self.head) + self.tail
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.head == (self.tail + 1) % self.ring.len()
    }

    /// Number of elements that can be enqueued until the ring buffer is full.
    pub fn available_len(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn enqueue(&mut self, val: T) -> bool {
        if self.is_full() {
            false
        } else {
            self.ring[self.tail] = val;
            self.tail = (self.tail + 1) % self.ring.len();
            true
        }
    }

    /// Enqueue all of `vals` or none of them.
    pub fn enqueue_all(&mut self, vals: &[T]) -> bool {
        if self.available_len() < vals.len() {
            return false;
        }

        for &val in vals {
            self.ring[self.tail] = val;
            self.tail = (self.tail + 1) % self.ring.len();
        }

        true
    }

    pub fn dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            None
        } else {
            let val = self.ring[self.head];
            self.head = (self.head + 1) % self.ring.len();
            Some(val)
        }
    }

    pub fn empty(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// Byte layout of one scan record: the enabled samples as `u16`, then the timestamp on the
/// next 8 byte boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanLayout {
    pub samples: usize,
    pub timestamp: bool,
}

impl ScanLayout {
    pub fn timestamp_offset(&self) -> usize {
        (self.samples * 2).next_multiple_of(8)
    }

    pub fn bytes(&self) -> usize {
        if self.timestamp {
            self.timestamp_offset() + 8
        } else {
            self.samples * 2
        }
    }

    fn encode(&self, samples: &[u16], timestamp: i64, out: &mut Vec<u8>) {
        out.clear();
        out.resize(self.bytes(), 0);

        for (chunk, sample) in out.chunks_exact_mut(2).zip(samples).take(self.samples) {
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }

        if self.timestamp {
            let offset = self.timestamp_offset();
            out[offset..offset + 8].copy_from_slice(&timestamp.to_ne_bytes());
        }
    }

    /// Decode one record produced with this layout.
    pub fn decode(&self, record: &[u8]) -> Scan {
        let samples = record[..self.samples * 2]
            .chunks_exact(2)
            .map(|chunk| u16::from_ne_bytes([chunk[0], chunk[1]]))
            .collect();

        let timestamp = self.timestamp.then(|| {
            let offset = self.timestamp_offset();
            let mut bytes = [0; 8];
            bytes.copy_from_slice(&record[offset..offset + 8]);
            i64::from_ne_bytes(bytes)
        });

        Scan { samples, timestamp }
    }
}

/// One decoded scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scan {
    pub samples: Vec<u16>,
    /// Nanoseconds, see [`crate::time::get_time_ns`].
    pub timestamp: Option<i64>,
}

struct Inner {
    ring: RingBuffer<u8>,
    layout: ScanLayout,
    length: usize,
    overruns: u64,
    record: Vec<u8>,
}

impl Inner {
    fn pop_record(&mut self, out: &mut [u8]) -> bool {
        let bytes = self.layout.bytes();
        if bytes == 0 || self.ring.len() < bytes {
            return false;
        }

        for byte in &mut out[..bytes] {
            *byte = self.ring.dequeue().unwrap_or_default();
        }

        true
    }
}

/// FIFO of whole scan records. Records that do not fit are dropped, never split.
pub struct Buffer {
    inner: Mutex<Inner>,
    readable: Condvar,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_LENGTH)
    }
}

impl Buffer {
    /// Buffer holding up to `length` scans.
    pub fn new(length: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: RingBuffer::with_capacity(0),
                layout: ScanLayout::default(),
                length,
                overruns: 0,
                record: Vec::new(),
            }),
            readable: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resize for a new record layout, discarding anything queued.
    pub fn configure(&self, layout: ScanLayout) {
        let mut inner = self.lock();
        inner.ring = RingBuffer::with_capacity(inner.length * layout.bytes());
        inner.layout = layout;
        inner.overruns = 0;
    }

    pub fn layout(&self) -> ScanLayout {
        self.lock().layout
    }

    /// Queue one scan. Returns `false` and counts an overrun if the buffer is full.
    pub fn push_with_timestamp(&self, samples: &[u16], timestamp: i64) -> bool {
        let mut inner = self.lock();
        let Inner {
            ring,
            layout,
            overruns,
            record,
            ..
        } = &mut *inner;

        layout.encode(samples, timestamp, record);

        if !ring.enqueue_all(record) {
            *overruns += 1;
            return false;
        }

        drop(inner);
        self.readable.notify_all();
        true
    }

    /// Scans waiting to be read.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        match inner.layout.bytes() {
            0 => 0,
            bytes => inner.ring.len() / bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scans dropped because the buffer was full.
    pub fn overruns(&self) -> u64 {
        self.lock().overruns
    }

    /// Copy out as many whole records as fit in `out`. Returns the number of bytes written.
    pub fn read_bytes(&self, out: &mut [u8]) -> usize {
        let mut inner = self.lock();
        let bytes = inner.layout.bytes();
        let mut written = 0;

        while bytes != 0 && out.len() - written >= bytes {
            if !inner.pop_record(&mut out[written..]) {
                break;
            }
            written += bytes;
        }

        written
    }

    pub fn try_read_scan(&self) -> Option<Scan> {
        let mut inner = self.lock();
        Self::pop_scan(&mut inner)
    }

    /// Wait up to `timeout` for a scan to arrive.
    pub fn read_scan_timeout(&self, timeout: Duration) -> Option<Scan> {
        let inner = self.lock();
        let (mut inner, _) = self
            .readable
            .wait_timeout_while(inner, timeout, |inner| {
                inner.layout.bytes() == 0 || inner.ring.len() < inner.layout.bytes()
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Self::pop_scan(&mut inner)
    }

    fn pop_scan(inner: &mut Inner) -> Option<Scan> {
        let mut record = vec![0; inner.layout.bytes()];
        inner
            .pop_record(&mut record)
            .then(|| inner.layout.decode(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer() {
        let mut ring = RingBuffer::<u8>::with_capacity(3);

        assert!(ring.enqueue(1));
        assert!(ring.enqueue_all(&[2, 3]));
        assert!(ring.is_full());
        assert!(!ring.enqueue(4));
        assert_eq!(ring.dequeue(), Some(1));
        assert!(!ring.enqueue_all(&[4, 5]));
        assert!(ring.enqueue_all(&[4]));
        assert_eq!(ring.len(), 3);
        assert_eq!((ring.dequeue(), ring.dequeue(), ring.dequeue()), (Some(2), Some(3), Some(4)));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn layout_pads_timestamp() {
        let layout = ScanLayout {
            samples: 3,
            timestamp: true,
        };
        assert_eq!(layout.timestamp_offset(), 8);
        assert_eq!(layout.bytes(), 16);

        let layout = ScanLayout {
            samples: 4,
            timestamp: true,
        };
        assert_eq!(layout.bytes(), 16);

        let layout = ScanLayout {
            samples: 5,
            timestamp: false,
        };
        assert_eq!(layout.bytes(), 10);
    }

    #[test]
    fn push_and_read() {
        let buffer = Buffer::new(4);
        buffer.configure(ScanLayout {
            samples: 2,
            timestamp: true,
        });

        assert!(buffer.push_with_timestamp(&[0x0AAA, 0x1BBB], 42));
        assert_eq!(buffer.len(), 1);

        let scan = buffer.try_read_scan().unwrap();
        assert_eq!(scan.samples, [0x0AAA, 0x1BBB]);
        assert_eq!(scan.timestamp, Some(42));
        assert_eq!(buffer.try_read_scan(), None);
    }

    #[test]
    fn full_buffer_drops_whole_scans() {
        let buffer = Buffer::new(2);
        buffer.configure(ScanLayout {
            samples: 1,
            timestamp: true,
        });

        assert!(buffer.push_with_timestamp(&[1], 1));
        assert!(buffer.push_with_timestamp(&[2], 2));
        assert!(!buffer.push_with_timestamp(&[3], 3));
        assert_eq!(buffer.overruns(), 1);

        let mut out = [0; 40];
        assert_eq!(buffer.read_bytes(&mut out), 32);

        let layout = buffer.layout();
        assert_eq!(layout.decode(&out[16..32]).samples, [2]);
        assert_eq!(layout.decode(&out[16..32]).timestamp, Some(2));
    }

    #[test]
    fn blocking_read_times_out() {
        let buffer = Buffer::new(1);
        buffer.configure(ScanLayout {
            samples: 1,
            timestamp: false,
        });

        assert_eq!(buffer.read_scan_timeout(Duration::from_millis(10)), None);
    }
}

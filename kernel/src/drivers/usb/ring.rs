//! Lock-free keyboard report ring
//!
//! Single producer (the USB interrupt handler) and single consumer (the main
//! loop). `head` is written only by the producer, `tail` only by the consumer;
//! both are free-running counters so the ring holds exactly `N` reports.
//! When the ring is full a push drops the new report and the oldest entries
//! stay queued.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// HID boot keyboard report length
pub const REPORT_SIZE: usize = 8;

/// Ring capacity used by the keyboard pipe
pub const REPORT_RING_CAPACITY: usize = 16;

/// One keyboard report as received from the device
pub type Report = [u8; REPORT_SIZE];

pub struct ReportRing<const N: usize> {
    slots: [UnsafeCell<Report>; N],
    /// Next slot to fill; producer-owned
    head: AtomicUsize,
    /// Next slot to drain; consumer-owned
    tail: AtomicUsize,
}

// SAFETY: a slot is written by the producer only while it lies outside
// [tail, head), and read by the consumer only while inside it. The Release
// store of `head` publishes the slot contents before the consumer can see it.
unsafe impl<const N: usize> Sync for ReportRing<N> {}

impl<const N: usize> ReportRing<N> {
    const EMPTY_SLOT: UnsafeCell<Report> = UnsafeCell::new([0; REPORT_SIZE]);

    pub const fn new() -> Self {
        Self {
            slots: [Self::EMPTY_SLOT; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side. Copies up to [`REPORT_SIZE`] bytes (short reports are
    /// zero-padded). Returns false if the ring was full and the report dropped.
    pub fn push(&self, data: &[u8]) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= N {
            return false;
        }

        let mut report = [0u8; REPORT_SIZE];
        let len = data.len().min(REPORT_SIZE);
        report[..len].copy_from_slice(&data[..len]);

        // SAFETY: slot `head % N` is outside [tail, head), consumer won't touch it.
        unsafe {
            *self.slots[head % N].get() = report;
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side. Never blocks.
    pub fn pop(&self) -> Option<Report> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        // SAFETY: slot `tail % N` is inside [tail, head), producer won't touch it.
        let report = unsafe { *self.slots[tail % N].get() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(report)
    }

    /// Consumer side: discard everything queued.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }
}

impl<const N: usize> Default for ReportRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(tag: u8) -> Report {
        [0, 0, tag, 0, 0, 0, 0, 0]
    }

    #[test]
    fn fifo_order_up_to_capacity() {
        let ring: ReportRing<REPORT_RING_CAPACITY> = ReportRing::new();
        for i in 0..REPORT_RING_CAPACITY as u8 {
            assert!(ring.push(&report(i)));
        }
        assert_eq!(ring.len(), REPORT_RING_CAPACITY);
        for i in 0..REPORT_RING_CAPACITY as u8 {
            assert_eq!(ring.pop(), Some(report(i)));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn overflow_drops_newest() {
        let ring: ReportRing<REPORT_RING_CAPACITY> = ReportRing::new();
        for i in 0..REPORT_RING_CAPACITY as u8 {
            assert!(ring.push(&report(i)));
        }
        assert!(!ring.push(&report(0xEE)));
        assert_eq!(ring.len(), REPORT_RING_CAPACITY);

        let drained: alloc::vec::Vec<Report> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained.len(), REPORT_RING_CAPACITY);
        assert_eq!(drained[0], report(0));
        assert_eq!(drained[REPORT_RING_CAPACITY - 1], report(REPORT_RING_CAPACITY as u8 - 1));
        assert!(!drained.contains(&report(0xEE)));
    }

    #[test]
    fn wraps_around_many_times() {
        let ring: ReportRing<4> = ReportRing::new();
        for i in 0..100u8 {
            assert!(ring.push(&report(i)));
            assert_eq!(ring.pop(), Some(report(i)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn short_reports_are_padded() {
        let ring: ReportRing<2> = ReportRing::new();
        ring.push(&[0x02, 0x00, 0x04]);
        assert_eq!(ring.pop(), Some([0x02, 0x00, 0x04, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn clear_discards_pending() {
        let ring: ReportRing<4> = ReportRing::new();
        ring.push(&report(1));
        ring.push(&report(2));
        ring.clear();
        assert_eq!(ring.pop(), None);
        assert!(ring.push(&report(3)));
        assert_eq!(ring.pop(), Some(report(3)));
    }
}

//! USB HID boot-protocol keyboard decoding
//!
//! Turns the 8-byte boot reports delivered by the keyboard pipe into key
//! press/release events with US-layout ASCII. Each report is diffed against
//! the previous one:
//! - Byte 0: modifier bits (LCtrl, LShift, LAlt, LGui, RCtrl, RShift, RAlt, RGui)
//! - Byte 1: reserved
//! - Bytes 2-7: up to 6 pressed usage IDs (0 = none, 1 = rollover error)
//!
//! Events are queued in a bounded lock-free queue and can be drained
//! synchronously or through [`KeyStream`].

use core::{
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll},
};

use crossbeam_queue::ArrayQueue;
use futures_util::{stream::Stream, task::AtomicWaker};
use spin::Mutex;

use super::dwc2::{Dwc2Host, Dwc2Registers};
use super::ring::{Report, REPORT_SIZE};
use crate::arch_impl::Platform;

/// Decoded events held before the consumer drains them
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Usage ID reported in every key slot on phantom-key rollover
const USAGE_ROLLOVER: u8 = 0x01;
const USAGE_CAPS_LOCK: u8 = 0x39;
/// Usage IDs 0xE0..=0xE7 are the modifier bits of byte 0
const USAGE_LEFT_CTRL: u8 = 0xE0;

// =============================================================================
// Modifiers
// =============================================================================

/// Modifier byte of a boot report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const LEFT_CTRL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CTRL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;

    /// Returns true if any shift key is pressed
    pub fn shift(&self) -> bool {
        self.0 & (Self::LEFT_SHIFT | Self::RIGHT_SHIFT) != 0
    }

    /// Returns true if any ctrl key is pressed
    pub fn ctrl(&self) -> bool {
        self.0 & (Self::LEFT_CTRL | Self::RIGHT_CTRL) != 0
    }

    /// Returns true if any alt key is pressed
    pub fn alt(&self) -> bool {
        self.0 & (Self::LEFT_ALT | Self::RIGHT_ALT) != 0
    }
}

/// One key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// HID usage ID; modifiers appear as 0xE0..=0xE7
    pub usage: u8,
    pub pressed: bool,
    pub modifiers: Modifiers,
    /// Character produced by a press, if any
    pub ascii: Option<u8>,
}

// =============================================================================
// Usage ID → ASCII (US layout)
// =============================================================================

/// Punctuation and digits: (usage, plain, shifted)
const SYMBOLS: [(u8, u8, u8); 21] = [
    (0x1E, b'1', b'!'),
    (0x1F, b'2', b'@'),
    (0x20, b'3', b'#'),
    (0x21, b'4', b'$'),
    (0x22, b'5', b'%'),
    (0x23, b'6', b'^'),
    (0x24, b'7', b'&'),
    (0x25, b'8', b'*'),
    (0x26, b'9', b'('),
    (0x27, b'0', b')'),
    (0x2D, b'-', b'_'),
    (0x2E, b'=', b'+'),
    (0x2F, b'[', b'{'),
    (0x30, b']', b'}'),
    (0x31, b'\\', b'|'),
    (0x33, b';', b':'),
    (0x34, b'\'', b'"'),
    (0x35, b'`', b'~'),
    (0x36, b',', b'<'),
    (0x37, b'.', b'>'),
    (0x38, b'/', b'?'),
];

/// Translate a pressed usage ID to ASCII.
pub fn usage_to_ascii(usage: u8, modifiers: Modifiers, caps_lock: bool) -> Option<u8> {
    match usage {
        0x04..=0x1D => {
            let lower = b'a' + (usage - 0x04);
            if modifiers.ctrl() {
                // Ctrl+letter → control character
                Some(lower & 0x1F)
            } else if modifiers.shift() ^ caps_lock {
                Some(lower.to_ascii_uppercase())
            } else {
                Some(lower)
            }
        }
        0x28 => Some(b'\n'),
        0x29 => Some(0x1B),
        0x2A => Some(0x08),
        0x2B => Some(b'\t'),
        0x2C => Some(b' '),
        _ => SYMBOLS
            .iter()
            .find(|(u, _, _)| *u == usage)
            .map(|&(_, plain, shifted)| if modifiers.shift() { shifted } else { plain }),
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Boot-report decoder with a bounded event queue.
///
/// `process` is called from one context (the main loop pumping reports);
/// events may be consumed from another.
pub struct KeyboardDecoder {
    previous: Mutex<Report>,
    caps_lock: AtomicBool,
    events: ArrayQueue<KeyEvent>,
    waker: AtomicWaker,
}

impl Default for KeyboardDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardDecoder {
    pub fn new() -> Self {
        Self {
            previous: Mutex::new([0; REPORT_SIZE]),
            caps_lock: AtomicBool::new(false),
            events: ArrayQueue::new(EVENT_QUEUE_CAPACITY),
            waker: AtomicWaker::new(),
        }
    }

    pub fn caps_lock(&self) -> bool {
        self.caps_lock.load(Ordering::Relaxed)
    }

    /// Diff `report` against the previous one and queue the transitions.
    /// Returns the number of events queued.
    pub fn process(&self, report: &Report) -> usize {
        let keys = &report[2..];
        if keys.iter().all(|&k| k == USAGE_ROLLOVER) {
            return 0;
        }

        let mut previous = self.previous.lock();
        let modifiers = Modifiers(report[0]);
        let old_modifiers = Modifiers(previous[0]);
        let old_keys = &previous[2..];
        let mut queued = 0;

        for bit in 0..8u8 {
            let mask = 1 << bit;
            if (modifiers.0 ^ old_modifiers.0) & mask != 0 {
                queued += self.emit(USAGE_LEFT_CTRL + bit, modifiers.0 & mask != 0, modifiers, None);
            }
        }

        for &usage in old_keys {
            if is_key(usage) && !keys.contains(&usage) {
                queued += self.emit(usage, false, modifiers, None);
            }
        }

        for &usage in keys {
            if !is_key(usage) || old_keys.contains(&usage) {
                continue;
            }
            if usage == USAGE_CAPS_LOCK {
                self.caps_lock.fetch_xor(true, Ordering::Relaxed);
            }
            let ascii = usage_to_ascii(usage, modifiers, self.caps_lock());
            queued += self.emit(usage, true, modifiers, ascii);
        }

        *previous = *report;
        drop(previous);

        if queued > 0 {
            self.waker.wake();
        }
        queued
    }

    fn emit(&self, usage: u8, pressed: bool, modifiers: Modifiers, ascii: Option<u8>) -> usize {
        let event = KeyEvent {
            usage,
            pressed,
            modifiers,
            ascii,
        };
        // full queue drops the newest event
        usize::from(self.events.push(event).is_ok())
    }

    /// Drain every queued report from `host`. Main loop only.
    pub fn pump<R: Dwc2Registers, P: Platform>(&self, host: &Dwc2Host<R, P>) -> usize {
        let mut reports = 0;
        while let Some(report) = host.pop_report() {
            self.process(&report);
            reports += 1;
        }
        reports
    }

    pub fn pop(&self) -> Option<KeyEvent> {
        self.events.pop()
    }

    /// Next character from a key press, skipping events without one.
    pub fn getc(&self) -> Option<u8> {
        while let Some(event) = self.events.pop() {
            if let (true, Some(c)) = (event.pressed, event.ascii) {
                return Some(c);
            }
        }
        None
    }

    pub fn has_key(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn stream(&self) -> KeyStream<'_> {
        KeyStream { decoder: self }
    }
}

fn is_key(usage: u8) -> bool {
    usage > USAGE_ROLLOVER
}

// =============================================================================
// Async stream
// =============================================================================

/// Stream of decoded key events
pub struct KeyStream<'a> {
    decoder: &'a KeyboardDecoder,
}

impl Stream for KeyStream<'_> {
    type Item = KeyEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<KeyEvent>> {
        let decoder = self.decoder;

        // fast path
        if let Some(event) = decoder.events.pop() {
            return Poll::Ready(Some(event));
        }

        decoder.waker.register(cx.waker());
        match decoder.events.pop() {
            Some(event) => {
                decoder.waker.take();
                Poll::Ready(Some(event))
            }
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use futures_util::{task::noop_waker_ref, StreamExt};

    fn keys(modifiers: u8, pressed: &[u8]) -> Report {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = modifiers;
        report[2..2 + pressed.len()].copy_from_slice(pressed);
        report
    }

    fn drain(decoder: &KeyboardDecoder) -> Vec<KeyEvent> {
        core::iter::from_fn(|| decoder.pop()).collect()
    }

    #[test]
    fn test_press_and_release() {
        let decoder = KeyboardDecoder::new();
        assert_eq!(decoder.process(&keys(0, &[0x04])), 1);
        assert_eq!(decoder.process(&keys(0, &[0x04])), 0);
        assert_eq!(decoder.process(&keys(0, &[])), 1);

        let events = drain(&decoder);
        assert_eq!(events.len(), 2);
        assert!(events[0].pressed);
        assert_eq!(events[0].ascii, Some(b'a'));
        assert_eq!((events[1].usage, events[1].pressed), (0x04, false));
    }

    #[test]
    fn test_shift_and_symbols() {
        let decoder = KeyboardDecoder::new();
        decoder.process(&keys(Modifiers::LEFT_SHIFT, &[0x05, 0x1F]));

        let events = drain(&decoder);
        // shift press, then the two keys
        assert_eq!(events[0].usage, 0xE1);
        assert_eq!(events[1].ascii, Some(b'B'));
        assert_eq!(events[2].ascii, Some(b'@'));
    }

    #[test]
    fn test_caps_lock_toggles_letters_only() {
        let decoder = KeyboardDecoder::new();
        decoder.process(&keys(0, &[USAGE_CAPS_LOCK]));
        decoder.process(&keys(0, &[]));
        assert!(decoder.caps_lock());

        decoder.process(&keys(0, &[0x06, 0x2D]));
        assert_eq!(decoder.getc(), Some(b'C'));
        assert_eq!(decoder.getc(), Some(b'-'));

        decoder.process(&keys(0, &[]));
        decoder.process(&keys(0, &[USAGE_CAPS_LOCK]));
        assert!(!decoder.caps_lock());
    }

    #[test]
    fn test_ctrl_letter_is_control_char() {
        assert_eq!(usage_to_ascii(0x06, Modifiers(Modifiers::RIGHT_CTRL), false), Some(0x03));
        assert_eq!(usage_to_ascii(0x28, Modifiers::default(), false), Some(b'\n'));
        assert_eq!(usage_to_ascii(0x3A, Modifiers::default(), false), None);
    }

    #[test]
    fn test_rollover_report_ignored() {
        let decoder = KeyboardDecoder::new();
        decoder.process(&keys(0, &[0x04]));
        assert_eq!(decoder.process(&[0, 0, 1, 1, 1, 1, 1, 1]), 0);
        // still held: no new press after the rollover
        assert_eq!(decoder.process(&keys(0, &[0x04])), 0);
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let decoder = KeyboardDecoder::new();
        for i in 0..EVENT_QUEUE_CAPACITY {
            let usage = 0x04 + (i % 2) as u8;
            decoder.process(&keys(0, &[usage]));
        }
        assert_eq!(decoder.process(&keys(0, &[0x10])), 0);
        assert_eq!(drain(&decoder).len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_stream_yields_queued_events() {
        let decoder = KeyboardDecoder::new();
        let mut stream = decoder.stream();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert_eq!(stream.poll_next_unpin(&mut cx), Poll::Pending);
        decoder.process(&keys(0, &[0x2C]));
        match stream.poll_next_unpin(&mut cx) {
            Poll::Ready(Some(event)) => assert_eq!(event.ascii, Some(b' ')),
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! USB debug counters.
//!
//! Each counter has a single writer (the ISR, the tick handler, or the
//! control engine) and is read only for diagnostics, so relaxed atomics are
//! enough and snapshots may be slightly torn.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct DebugCounters {
    /// USB interrupts taken
    pub irq: AtomicU64,
    /// Interrupts that carried a keyboard channel event
    pub keyboard_irq: AtomicU64,
    /// Keyboard transfers that delivered data
    pub data: AtomicU64,
    /// Keyboard polls answered with NAK
    pub nak: AtomicU64,
    /// Keyboard transfers that ended in STALL/XACTERR/BBLERR/AHBERR
    pub error: AtomicU64,
    /// Times the keyboard channel was armed
    pub restart: AtomicU64,
    /// Root port interrupts
    pub port_irq: AtomicU64,
    /// Stuck transfers the watchdog forced to restart
    pub watchdog_kick: AtomicU64,
    /// NAK retries consumed by control transfers
    pub control_retries: AtomicU64,
}

impl DebugCounters {
    pub const fn new() -> Self {
        Self {
            irq: AtomicU64::new(0),
            keyboard_irq: AtomicU64::new(0),
            data: AtomicU64::new(0),
            nak: AtomicU64::new(0),
            error: AtomicU64::new(0),
            restart: AtomicU64::new(0),
            port_irq: AtomicU64::new(0),
            watchdog_kick: AtomicU64::new(0),
            control_retries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DebugStats {
        DebugStats {
            irq_count: self.irq.load(Ordering::Relaxed),
            keyboard_irq_count: self.keyboard_irq.load(Ordering::Relaxed),
            data_count: self.data.load(Ordering::Relaxed),
            nak_count: self.nak.load(Ordering::Relaxed),
            error_count: self.error.load(Ordering::Relaxed),
            restart_count: self.restart.load(Ordering::Relaxed),
            port_irq_count: self.port_irq.load(Ordering::Relaxed),
            watchdog_kick_count: self.watchdog_kick.load(Ordering::Relaxed),
            control_retries: self.control_retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the debug counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugStats {
    pub irq_count: u64,
    pub keyboard_irq_count: u64,
    pub data_count: u64,
    pub nak_count: u64,
    pub error_count: u64,
    pub restart_count: u64,
    pub port_irq_count: u64,
    pub watchdog_kick_count: u64,
    pub control_retries: u64,
}

impl fmt::Display for DebugStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[usb] irq={} kbd={} data={} nak={} err={} restart={} port={} watchdog={} ctrl_retry={}",
            self.irq_count,
            self.keyboard_irq_count,
            self.data_count,
            self.nak_count,
            self.error_count,
            self.restart_count,
            self.port_irq_count,
            self.watchdog_kick_count,
            self.control_retries,
        )
    }
}

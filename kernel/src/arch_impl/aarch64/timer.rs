//! ARM64 Generic Timer (CNTPCT_EL0, CNTFRQ_EL0) operations.

use aarch64_cpu::asm::barrier;
use aarch64_cpu::registers::{CNTFRQ_EL0, CNTPCT_EL0};
use tock_registers::interfaces::Readable;

/// Fallback when firmware leaves CNTFRQ_EL0 unprogrammed (Pi firmware: 19.2 MHz).
const DEFAULT_FREQUENCY_HZ: u64 = 19_200_000;

/// Read the physical counter, ordered after preceding instructions.
#[inline(always)]
pub fn read_counter() -> u64 {
    barrier::isb(barrier::SY);
    CNTPCT_EL0.get()
}

/// Get timer frequency in Hz
#[inline]
pub fn frequency_hz() -> u64 {
    match CNTFRQ_EL0.get() {
        0 => DEFAULT_FREQUENCY_HZ,
        hz => hz,
    }
}

/// Busy-wait for `us` microseconds against the generic counter.
pub fn delay_us(us: u64) {
    let ticks = us.saturating_mul(frequency_hz()) / 1_000_000;
    let start = read_counter();
    while read_counter().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}

/// Busy-wait for `ms` milliseconds.
#[inline]
pub fn delay_ms(ms: u64) {
    delay_us(ms.saturating_mul(1000));
}

//! Architecture-agnostic traits for hardware abstraction.
//!
//! These traits define the interface between architecture-specific code and
//! the drivers. Each architecture must implement these traits; host-side
//! tests provide in-memory implementations.

/// Services a DMA-capable driver consumes from the platform.
///
/// Cache maintenance, barriers, bus-address translation and delays. All
/// methods take `&self` so one instance can be shared by the interrupt
/// handler and the main loop.
pub trait Platform {
    /// Write back (clean) every cache line overlapping `[addr, addr + len)`
    /// so the device observes CPU writes.
    fn clean_range(&self, addr: usize, len: usize);

    /// Invalidate every cache line overlapping `[addr, addr + len)` so the
    /// CPU observes device writes.
    fn invalidate_range(&self, addr: usize, len: usize);

    /// Full-system data memory barrier.
    fn memory_barrier(&self);

    /// Translate a CPU address into the address the DMA engine must be
    /// programmed with.
    fn bus_address(&self, addr: usize) -> u32;

    /// Busy-wait for `ms` milliseconds. Never called from interrupt context.
    fn sleep_ms(&self, ms: u32);

    /// Busy-wait for `us` microseconds.
    fn sleep_us(&self, us: u32);
}

impl<T: Platform + ?Sized> Platform for &T {
    #[inline]
    fn clean_range(&self, addr: usize, len: usize) {
        (**self).clean_range(addr, len)
    }

    #[inline]
    fn invalidate_range(&self, addr: usize, len: usize) {
        (**self).invalidate_range(addr, len)
    }

    #[inline]
    fn memory_barrier(&self) {
        (**self).memory_barrier()
    }

    #[inline]
    fn bus_address(&self, addr: usize) -> u32 {
        (**self).bus_address(addr)
    }

    #[inline]
    fn sleep_ms(&self, ms: u32) {
        (**self).sleep_ms(ms)
    }

    #[inline]
    fn sleep_us(&self, us: u32) {
        (**self).sleep_us(us)
    }
}

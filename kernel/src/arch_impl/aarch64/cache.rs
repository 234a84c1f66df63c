//! ARM64 data-cache maintenance for DMA buffers.
//!
//! The DWC2 DMA engine is not cache-coherent with the Cortex-A53 cluster, so
//! every buffer handed to the controller must be cleaned first and every
//! buffer read back must be invalidated.

use aarch64_cpu::asm::barrier;

/// Cortex-A53 data cache line size.
pub const CACHE_LINE: usize = 64;

/// Clean a range of memory to the point of coherency before a device reads it.
///
/// Must be called after the CPU fills a DMA buffer and before the channel
/// is enabled.
#[inline]
pub fn dma_cache_clean(addr: usize, len: usize) {
    let start = addr & !(CACHE_LINE - 1);
    let end = (addr + len + CACHE_LINE - 1) & !(CACHE_LINE - 1);
    for line in (start..end).step_by(CACHE_LINE) {
        unsafe {
            core::arch::asm!("dc cvac, {}", in(reg) line, options(nostack));
        }
    }
    barrier::dsb(barrier::SY);
}

/// Invalidate a range of memory in CPU caches around a device DMA write.
///
/// Called before arming an IN transfer (so no dirty line is evicted over
/// the incoming data) and again after completion, before the CPU reads.
#[inline]
pub fn dma_cache_invalidate(addr: usize, len: usize) {
    let start = addr & !(CACHE_LINE - 1);
    let end = (addr + len + CACHE_LINE - 1) & !(CACHE_LINE - 1);
    for line in (start..end).step_by(CACHE_LINE) {
        unsafe {
            core::arch::asm!("dc civac, {}", in(reg) line, options(nostack));
        }
    }
    barrier::dsb(barrier::SY);
}

/// Full-system data synchronization barrier.
#[inline]
pub fn dsb_sy() {
    barrier::dsb(barrier::SY);
}

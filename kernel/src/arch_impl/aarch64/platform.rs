//! BCM2710 platform services for the USB host stack.

use crate::arch_impl::traits::Platform;
use crate::platform_config;

use super::{cache, timer};

/// Pi Zero 2 W: identity-mapped kernel, VideoCore bus alias for DMA.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bcm2710Platform;

impl Platform for Bcm2710Platform {
    #[inline]
    fn clean_range(&self, addr: usize, len: usize) {
        cache::dma_cache_clean(addr, len);
    }

    #[inline]
    fn invalidate_range(&self, addr: usize, len: usize) {
        cache::dma_cache_invalidate(addr, len);
    }

    #[inline]
    fn memory_barrier(&self) {
        cache::dsb_sy();
    }

    #[inline]
    fn bus_address(&self, addr: usize) -> u32 {
        platform_config::phys_to_bus(addr as u64)
    }

    fn sleep_ms(&self, ms: u32) {
        timer::delay_ms(ms as u64);
    }

    fn sleep_us(&self, us: u32) {
        timer::delay_us(us as u64);
    }
}

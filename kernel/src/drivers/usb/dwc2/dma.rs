//! DMA buffers shared with the DWC2 controller.
//!
//! A [`DmaBuffer`] is owned either by the CPU or by the controller. Ownership
//! moves only through the methods here, which issue the cache maintenance the
//! move requires:
//!
//! - `release_to_device`: CPU wrote the buffer, clean before arming (OUT/SETUP)
//! - `prepare_receive`: invalidate before arming an IN transfer
//! - `acquire_from_device`: invalidate after completion, before the CPU reads
//!
//! Reading or writing the contents while the controller owns the buffer is a
//! bug; `bytes`/`bytes_mut` report it as `None` rather than hand out a view.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch_impl::Platform;

/// Cortex-A53 cache line; DMA buffers are aligned and sized to it
pub const DMA_ALIGN: usize = 64;

#[repr(C, align(64))]
pub struct DmaBuffer<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
    device_owned: AtomicBool,
}

// SAFETY: access to `bytes` is gated on `device_owned`; the owner of the
// surrounding pipe (a mutex for control, the ISR for the keyboard) serializes
// CPU access.
unsafe impl<const N: usize> Sync for DmaBuffer<N> {}

impl<const N: usize> DmaBuffer<N> {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
            device_owned: AtomicBool::new(false),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// CPU address of the first byte
    pub fn addr(&self) -> usize {
        self.bytes.get() as usize
    }

    pub fn bus_address<P: Platform>(&self, platform: &P) -> u32 {
        platform.bus_address(self.addr())
    }

    pub fn is_device_owned(&self) -> bool {
        self.device_owned.load(Ordering::Acquire)
    }

    /// Copy `data` into the buffer. Fails if the controller owns it or it
    /// doesn't fit.
    pub fn fill(&self, data: &[u8]) -> bool {
        match self.bytes_mut() {
            Some(bytes) if data.len() <= N => {
                bytes[..data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    /// CPU view of the contents, `None` while the controller owns them.
    pub fn bytes(&self) -> Option<&[u8; N]> {
        if self.is_device_owned() {
            return None;
        }
        // SAFETY: CPU-owned; the controller is not writing.
        Some(unsafe { &*self.bytes.get() })
    }

    #[allow(clippy::mut_from_ref)]
    pub fn bytes_mut(&self) -> Option<&mut [u8; N]> {
        if self.is_device_owned() {
            return None;
        }
        // SAFETY: CPU-owned and the pipe owner serializes CPU access.
        Some(unsafe { &mut *self.bytes.get() })
    }

    /// Hand the first `len` bytes to the controller for an OUT or SETUP stage.
    pub fn release_to_device<P: Platform>(&self, platform: &P, len: usize) {
        platform.clean_range(self.addr(), len.clamp(1, N));
        self.device_owned.store(true, Ordering::Release);
    }

    /// Hand the buffer to the controller for an IN stage of up to `len` bytes.
    pub fn prepare_receive<P: Platform>(&self, platform: &P, len: usize) {
        platform.invalidate_range(self.addr(), len.clamp(1, N));
        self.device_owned.store(true, Ordering::Release);
    }

    /// Take the buffer back after the controller finished with it.
    /// `received` is the number of bytes the controller wrote, 0 for OUT.
    pub fn acquire_from_device<P: Platform>(&self, platform: &P, received: usize) {
        if received > 0 {
            platform.invalidate_range(self.addr(), received.min(N));
        }
        self.device_owned.store(false, Ordering::Release);
    }
}

impl<const N: usize> Default for DmaBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

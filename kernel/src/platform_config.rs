//! Board hardware configuration for the Raspberry Pi Zero 2 W.
//!
//! Provides the hardware addresses the USB stack depends on. Defaults are
//! the BCM2710 values so the normal boot path works unchanged; board
//! bring-up code may override them with `apply_overrides()` before the USB
//! controller is initialized.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// =============================================================================
// Hardware address atomics with BCM2710 defaults
// =============================================================================

/// DWC2 OTG core register window (ARM physical).
static DWC2_BASE_PHYS: AtomicU64 = AtomicU64::new(0x3F98_0000);

/// VideoCore bus alias ORed into DMA addresses (L2-uncached alias).
static DMA_BUS_ALIAS: AtomicU32 = AtomicU32::new(0xC000_0000);

/// USB interrupt line on the VideoCore interrupt controller.
static USB_IRQ: AtomicU32 = AtomicU32::new(9);

/// Bits of an ARM physical address that survive translation to a bus address.
const BUS_OFFSET_MASK: u32 = 0x3FFF_FFFF;

// =============================================================================
// Accessor functions
// =============================================================================

/// DWC2 core physical base address.
/// BCM2710: 0x3F98_0000
#[inline]
pub fn dwc2_base_phys() -> u64 {
    DWC2_BASE_PHYS.load(Ordering::Relaxed)
}

/// Bus alias for DMA-visible addresses.
/// BCM2710: 0xC000_0000
#[inline]
pub fn dma_bus_alias() -> u32 {
    DMA_BUS_ALIAS.load(Ordering::Relaxed)
}

/// USB controller interrupt number.
#[inline]
pub fn usb_irq() -> u32 {
    USB_IRQ.load(Ordering::Relaxed)
}

/// Translate an ARM physical address to the address the DWC2 DMA engine sees.
#[inline]
pub fn phys_to_bus(phys: u64) -> u32 {
    (phys as u32 & BUS_OFFSET_MASK) | dma_bus_alias()
}

// =============================================================================
// Board overrides
// =============================================================================

/// Values discovered by board bring-up (firmware properties or device tree).
/// Zero fields keep the current default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardOverrides {
    pub dwc2_base_phys: u64,
    pub dma_bus_alias: u32,
    pub usb_irq: u32,
}

/// Apply board overrides. Returns true if anything changed.
pub fn apply_overrides(overrides: &BoardOverrides) -> bool {
    let mut changed = false;

    if overrides.dwc2_base_phys != 0 {
        DWC2_BASE_PHYS.store(overrides.dwc2_base_phys, Ordering::Relaxed);
        changed = true;
    }
    if overrides.dma_bus_alias != 0 {
        DMA_BUS_ALIAS.store(overrides.dma_bus_alias, Ordering::Relaxed);
        changed = true;
    }
    if overrides.usb_irq != 0 {
        USB_IRQ.store(overrides.usb_irq, Ordering::Relaxed);
        changed = true;
    }

    changed
}

//! AArch64 (ARM64) architecture implementation.
//!
//! This module provides the AArch64 Hardware Abstraction Layer (HAL) for
//! the Pi Zero 2 W: data-cache maintenance, the generic timer, and the
//! [`Bcm2710Platform`] that bundles them for the drivers.

pub mod cache;
pub mod platform;
pub mod timer;

// Re-export commonly used items
pub use platform::Bcm2710Platform;

//! Architecture abstraction layer for VibeOS.
//!
//! This module provides the architecture-agnostic [`Platform`] trait the
//! drivers program against, and the current architecture's implementation.
//! Code outside this module should use the trait rather than the
//! architecture-specific types directly.
//!
//! # Supported Architectures
//!
//! - `aarch64`: Raspberry Pi Zero 2 W (BCM2710, Cortex-A53)

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64 as current;

pub mod traits;
pub use traits::*;

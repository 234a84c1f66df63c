//! VibeOS kernel library: the DWC2 USB host stack and the platform services
//! it runs on.
//!
//! Unit tests build for the host with std so they can use the standard test
//! harness; the kernel itself is `no_std`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch_impl;
pub mod drivers;
pub mod logger;
pub mod platform_config;

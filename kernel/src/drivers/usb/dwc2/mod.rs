//! DWC2 (Synopsys DesignWare USB 2.0 OTG) host controller driver.
//!
//! Drives the BCM2710's OTG core in host mode with internal DMA. All state
//! lives in one [`Dwc2Host`] context:
//!
//! - Channel 0 runs control transfers synchronously from the main loop
//!   (enumeration, hub bring-up, HID setup).
//! - Channel 1 runs the keyboard interrupt-IN pipe, driven from the USB
//!   interrupt handler and handing reports to the main loop through a
//!   lock-free ring.
//! - A 10 ms tick runs the stuck-transfer watchdog and root port recovery.
//!
//! State touched from the interrupt handler is held in atomics with one
//! writer per field. The spin mutexes guard main-loop-only state and are
//! never taken by the interrupt handler.

pub mod config;
pub mod dma;
pub mod regs;
pub mod stats;

mod bringup;
mod control;
mod enumerate;
mod hub;
mod keyboard;
mod watchdog;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use super::error::{Result, UsbError};
use super::ring::{Report, ReportRing, REPORT_RING_CAPACITY};
use crate::arch_impl::Platform;

pub use config::HostConfig;
pub use control::DeviceTarget;
pub use enumerate::{KeyboardEndpoint, UsbDevice, MAX_DEVICES};
pub use regs::{Dwc2Registers, MmioRegs, UsbSpeed};
pub use stats::DebugStats;
pub use watchdog::RecoveryState;

use control::ControlPipe;
use enumerate::DeviceRegistry;
use keyboard::KeyboardPipe;
use stats::DebugCounters;
use watchdog::PortRecovery;

/// DWC2 host controller context
pub struct Dwc2Host<R: Dwc2Registers, P: Platform> {
    regs: R,
    platform: P,
    config: HostConfig,
    /// Channel 0 and its DMA buffer; main loop only
    control: Mutex<ControlPipe>,
    /// Enumerated devices; main loop only
    registry: Mutex<DeviceRegistry>,
    keyboard: KeyboardPipe,
    reports: ReportRing<REPORT_RING_CAPACITY>,
    recovery: PortRecovery,
    counters: DebugCounters,
    /// 10 ms ticks since creation; written only by `tick`
    ticks: AtomicU32,
    /// Root port speed as last read by bring-up or enumeration
    root_speed: AtomicU8,
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    pub fn new(regs: R, platform: P, config: HostConfig) -> Self {
        Self {
            regs,
            platform,
            config,
            control: Mutex::new(ControlPipe::new()),
            registry: Mutex::new(DeviceRegistry::new()),
            keyboard: KeyboardPipe::new(),
            reports: ReportRing::new(),
            recovery: PortRecovery::new(),
            counters: DebugCounters::new(),
            ticks: AtomicU32::new(0),
            root_speed: AtomicU8::new(UsbSpeed::Full as u8),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Pop the oldest keyboard report into `buf`.
    ///
    /// Returns the number of bytes copied, or 0 when nothing is queued.
    /// Fails with [`UsbError::NoKeyboard`] when no keyboard is usable: never
    /// enumerated, unplugged, or given up on by port recovery. Never blocks.
    pub fn poll_keyboard(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.keyboard.is_online() {
            return Err(UsbError::NoKeyboard);
        }
        if buf.is_empty() {
            return Err(UsbError::BufferTooSmall);
        }
        match self.reports.pop() {
            Some(report) => {
                let len = buf.len().min(report.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    /// Pop the oldest keyboard report, if any.
    pub fn pop_report(&self) -> Option<Report> {
        self.reports.pop()
    }

    pub fn get_debug_stats(&self) -> DebugStats {
        self.counters.snapshot()
    }

    /// Log the counters in one line. Main loop only.
    pub fn log_stats(&self) {
        log::info!("{}", self.get_debug_stats());
    }

    pub fn root_speed(&self) -> UsbSpeed {
        UsbSpeed::from_raw(self.root_speed.load(Ordering::Relaxed))
    }

    /// Current tick count
    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Poll `done` up to `iterations` times with a 1 us pause between polls.
    fn wait_for<F: Fn() -> bool>(&self, iterations: u32, done: F) -> Result<()> {
        for _ in 0..iterations {
            if done() {
                return Ok(());
            }
            self.platform.sleep_us(1);
        }
        if done() {
            Ok(())
        } else {
            Err(UsbError::Timeout)
        }
    }

    /// `wait_for` without the sleep, for the tick handler.
    fn spin_for<F: Fn() -> bool>(&self, iterations: u32, done: F) -> Result<()> {
        for _ in 0..iterations {
            if done() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        if done() {
            Ok(())
        } else {
            Err(UsbError::Timeout)
        }
    }
}

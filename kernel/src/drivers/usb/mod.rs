//! USB subsystem for VibeOS
//!
//! Provides the DWC2 host controller driver and its class support:
//! - DWC2 host controller (control transfers, enumeration, hubs)
//! - HID boot keyboard polling and decoding
//! - USB standard descriptor types and request builders
//!
//! The kernel drives one controller instance through the free functions
//! below: `init` once at boot, `irq_handler` from the USB interrupt line,
//! `tick` every 10 ms, and `poll_keyboard`/`getc` from the main loop.

pub mod descriptors;
pub mod dwc2;
pub mod error;
pub mod hid;
pub mod request;
pub mod ring;

pub use error::{Result, UsbError};

#[cfg(target_arch = "aarch64")]
pub use controller::*;

#[cfg(target_arch = "aarch64")]
mod controller {
    use conquer_once::spin::OnceCell;

    use super::dwc2::{DebugStats, Dwc2Host, HostConfig, MmioRegs, UsbDevice};
    use super::error::{Result, UsbError};
    use super::hid::KeyboardDecoder;
    use crate::arch_impl::aarch64::Bcm2710Platform;
    use crate::platform_config;

    pub type Host = Dwc2Host<MmioRegs, Bcm2710Platform>;

    static USB: OnceCell<Host> = OnceCell::uninit();
    static KEYBOARD: OnceCell<KeyboardDecoder> = OnceCell::uninit();

    /// The controller, once `init` has created it.
    pub fn host() -> Option<&'static Host> {
        USB.get()
    }

    /// Bring up the controller, enumerate the root port and start polling
    /// the keyboard if one was found. Main loop only; blocks for up to a few
    /// hundred milliseconds per device.
    pub fn init() -> Result<()> {
        let _ = USB.try_init_once(|| {
            // SAFETY: the DWC2 window is identity-mapped as device memory
            // for the kernel's lifetime and this is the only driver for it.
            let regs = unsafe { MmioRegs::new(platform_config::dwc2_base_phys() as usize) };
            Dwc2Host::new(regs, Bcm2710Platform, HostConfig::DEFAULT)
        });
        let _ = KEYBOARD.try_init_once(KeyboardDecoder::new);
        let host = USB.get().ok_or(UsbError::NotInitialized)?;

        log::info!(
            "usb: DWC2 at {:#x}, irq {}",
            platform_config::dwc2_base_phys(),
            platform_config::usb_irq()
        );
        host.init_host()?;
        host.enumerate_root_device()?;

        match host.start_keyboard_polling() {
            Ok(()) => Ok(()),
            Err(UsbError::NoKeyboard) => {
                log::info!("usb: no boot keyboard found");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-run enumeration of the root port and restart keyboard polling.
    pub fn enumerate_root_device() -> Result<()> {
        let host = USB.get().ok_or(UsbError::NotInitialized)?;
        host.enumerate_root_device()?;
        match host.start_keyboard_polling() {
            Err(UsbError::NoKeyboard) => Ok(()),
            other => other,
        }
    }

    /// Copy the next keyboard report into `buf`; 0 when none is queued.
    /// Errors when the controller is down or no keyboard is usable.
    pub fn poll_keyboard(buf: &mut [u8]) -> Result<usize> {
        USB.get().ok_or(UsbError::NotInitialized)?.poll_keyboard(buf)
    }

    /// Next typed character, decoding any queued reports first.
    pub fn getc() -> Option<u8> {
        let host = USB.get()?;
        let decoder = KEYBOARD.get()?;
        decoder.pump(host);
        decoder.getc()
    }

    /// Decoder for consumers that want key events rather than characters.
    pub fn keyboard_decoder() -> Option<&'static KeyboardDecoder> {
        KEYBOARD.get()
    }

    pub fn devices() -> alloc::vec::Vec<UsbDevice> {
        USB.get().map(|host| host.devices()).unwrap_or_default()
    }

    pub fn get_debug_stats() -> DebugStats {
        USB.get().map(|host| host.get_debug_stats()).unwrap_or_default()
    }

    /// Print the debug counters. Main loop only.
    pub fn log_stats() {
        if let Some(host) = USB.get() {
            host.log_stats();
        }
    }

    /// 10 ms timer callback
    pub fn tick() {
        if let Some(host) = USB.get() {
            host.tick();
        }
    }

    /// USB interrupt line handler
    pub fn irq_handler() {
        if let Some(host) = USB.get() {
            host.irq_handler();
        }
    }
}

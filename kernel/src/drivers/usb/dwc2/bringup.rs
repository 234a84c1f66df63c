//! Host core bring-up: soft reset, host mode, FIFOs and the root port.

use core::sync::atomic::Ordering;

use super::regs::{bits::*, Dwc2Registers, Reg, UsbSpeed, KEYBOARD_CHANNEL};
use super::Dwc2Host;
use crate::arch_impl::Platform;
use crate::drivers::usb::error::{Result, UsbError};

/// FIFO sizes in 32-bit words
const RX_FIFO_WORDS: u32 = 0x400;
const NP_TX_FIFO_WORDS: u32 = 0x400;
const P_TX_FIFO_WORDS: u32 = 0x400;

/// Time the PHY needs after forcing host mode
const FORCE_HOST_SETTLE_MS: u32 = 25;

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Bring the core up in host mode with DMA and enable the root port.
    ///
    /// Returns the speed of the device on the root port. Interrupts are
    /// unmasked for the root port and the keyboard channel only.
    pub fn init_host(&self) -> Result<UsbSpeed> {
        let iterations = self.config.core_reset_iterations;

        // Interrupts stay off until the port is up
        self.regs.write(Reg::Gahbcfg, 0);
        self.regs.write(Reg::Gintmsk, 0);

        self.wait_for(iterations, || self.regs.read(Reg::Grstctl) & GRSTCTL_AHB_IDLE != 0)
            .inspect_err(|_| log::warn!("usb: AHB never went idle"))?;
        self.regs.write(Reg::Grstctl, GRSTCTL_CSRST);
        self.wait_for(iterations, || self.regs.read(Reg::Grstctl) & GRSTCTL_CSRST == 0)
            .inspect_err(|_| log::warn!("usb: core soft reset did not complete"))?;

        self.regs.modify(Reg::Gusbcfg, GUSBCFG_FORCE_DEV, GUSBCFG_FORCE_HOST);
        self.platform.sleep_ms(FORCE_HOST_SETTLE_MS);

        self.regs.write(Reg::Hcfg, HCFG_FSLSPCLKSEL_48MHZ);
        self.regs.write(Reg::Grxfsiz, RX_FIFO_WORDS);
        self.regs.write(Reg::Gnptxfsiz, NP_TX_FIFO_WORDS << 16 | RX_FIFO_WORDS);
        self.regs.write(Reg::Hptxfsiz, P_TX_FIFO_WORDS << 16 | (RX_FIFO_WORDS + NP_TX_FIFO_WORDS));
        self.flush_fifos()?;

        self.power_root_port()?;
        let speed = self.reset_root_port()?;

        self.regs.write(Reg::Gintsts, u32::MAX);
        self.regs.write(Reg::Gintmsk, GINTSTS_HPRTINT | GINTSTS_HCINT);
        self.regs.write(Reg::Haintmsk, 1 << KEYBOARD_CHANNEL);
        self.regs.write(Reg::Gahbcfg, GAHBCFG_DMA_EN | GAHBCFG_GLBL_INTR_EN);

        self.root_speed.store(speed as u8, Ordering::Relaxed);
        log::info!("usb: DWC2 host up, root device at {:?} speed", speed);
        Ok(speed)
    }

    fn flush_fifos(&self) -> Result<()> {
        let iterations = self.config.core_reset_iterations;
        self.regs.write(Reg::Grstctl, GRSTCTL_TXFFLSH | GRSTCTL_TXFNUM_ALL);
        self.wait_for(iterations, || self.regs.read(Reg::Grstctl) & GRSTCTL_TXFFLSH == 0)?;
        self.regs.write(Reg::Grstctl, GRSTCTL_RXFFLSH);
        self.wait_for(iterations, || self.regs.read(Reg::Grstctl) & GRSTCTL_RXFFLSH == 0)
    }

    /// Power the root port and wait for a device.
    fn power_root_port(&self) -> Result<()> {
        let hprt = self.regs.hprt0();
        self.regs.set_hprt0((hprt & !HPRT_W1C_MASK) | HPRT_PWR);

        for _ in 0..self.config.connect_wait_ms {
            if self.regs.hprt0() & HPRT_CONN_STS != 0 {
                return Ok(());
            }
            self.platform.sleep_ms(1);
        }
        if self.regs.hprt0() & HPRT_CONN_STS != 0 {
            return Ok(());
        }
        log::warn!("usb: no device on the root port");
        Err(UsbError::Timeout)
    }

    /// Reset the root port and wait for it to enable.
    fn reset_root_port(&self) -> Result<UsbSpeed> {
        let hprt = self.regs.hprt0();
        self.regs.set_hprt0((hprt & !HPRT_W1C_MASK) | HPRT_RST);
        self.platform.sleep_ms(self.config.port_reset_ms);

        let hprt = self.regs.hprt0();
        self.regs.set_hprt0(hprt & !HPRT_W1C_MASK & !HPRT_RST);

        self.wait_for(self.config.core_reset_iterations, || self.regs.hprt0() & HPRT_ENA != 0)
            .inspect_err(|_| log::warn!("usb: root port did not enable after reset"))?;
        self.platform.sleep_ms(self.config.port_recovery_ms);

        let hprt = self.regs.hprt0();
        // acknowledge the change bits raised by the reset, leaving ENA alone
        self.regs.set_hprt0(hprt & !HPRT_ENA);
        Ok(UsbSpeed::from_hprt(hprt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::dwc2::mock::{MockDevice, MockHardware};
    use crate::drivers::usb::dwc2::HostConfig;

    fn host(hw: &MockHardware) -> Dwc2Host<&MockHardware, &MockHardware> {
        Dwc2Host::new(hw, hw, HostConfig::DEFAULT.with_connect_wait_ms(20))
    }

    #[test]
    fn test_bring_up_reports_root_speed() {
        let hw = MockHardware::new();
        hw.attach_root(MockDevice::keyboard(UsbSpeed::Low));
        let host = host(&hw);

        assert_eq!(host.init_host(), Ok(UsbSpeed::Low));
        assert_eq!(host.root_speed(), UsbSpeed::Low);

        assert_eq!(hw.read(Reg::Gahbcfg), GAHBCFG_DMA_EN | GAHBCFG_GLBL_INTR_EN);
        assert_eq!(hw.read(Reg::Gintmsk), GINTSTS_HPRTINT | GINTSTS_HCINT);
        assert_eq!(hw.read(Reg::Haintmsk), 1 << KEYBOARD_CHANNEL);
        let gusbcfg = hw.read(Reg::Gusbcfg);
        assert_ne!(gusbcfg & GUSBCFG_FORCE_HOST, 0);
        assert_eq!(gusbcfg & GUSBCFG_FORCE_DEV, 0);
        assert_ne!(hw.hprt0() & HPRT_ENA, 0);
    }

    #[test]
    fn test_port_writes_never_clear_enable() {
        let hw = MockHardware::new();
        hw.attach_root(MockDevice::generic(UsbSpeed::Full));
        let host = host(&hw);

        host.init_host().unwrap();

        let writes = hw.hprt_writes();
        assert!(writes.iter().any(|w| w & HPRT_RST != 0));
        assert!(writes.iter().all(|w| w & HPRT_ENA == 0));
        assert!(hw.slept_ms() >= host.config().port_reset_ms as u64);
    }

    #[test]
    fn test_no_device_times_out() {
        let hw = MockHardware::new();
        hw.set_root_disconnected();
        let host = host(&hw);

        assert_eq!(host.init_host(), Err(UsbError::Timeout));
        assert_eq!(hw.read(Reg::Gahbcfg), 0);
    }

    #[test]
    fn test_port_that_never_enables_times_out() {
        let hw = MockHardware::new();
        hw.attach_root(MockDevice::generic(UsbSpeed::Full));
        hw.set_auto_enable_on_reset(false);
        let host = Dwc2Host::new(
            &hw,
            &hw,
            HostConfig::DEFAULT.with_connect_wait_ms(20).with_poll_iterations(16),
        );

        assert_eq!(host.init_host(), Err(UsbError::Timeout));
    }
}

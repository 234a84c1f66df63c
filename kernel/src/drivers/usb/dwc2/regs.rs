//! DWC2 OTG core register interface (host mode).
//!
//! The driver reaches hardware only through [`Dwc2Registers`]. [`MmioRegs`]
//! implements it over the real register window with a `tock-registers`
//! layout; the test mock implements it over plain memory.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_structs;
use tock_registers::registers::{ReadOnly, ReadWrite};

/// Host channels implemented by the BCM2710 core
pub const NUM_CHANNELS: usize = 8;

/// Channel reserved for enumeration and other control transfers
pub const CONTROL_CHANNEL: u8 = 0;

/// Channel reserved for the keyboard interrupt-IN pipe
pub const KEYBOARD_CHANNEL: u8 = 1;

// =============================================================================
// Register Bit Definitions
// =============================================================================

pub mod bits {
    // GAHBCFG
    pub const GAHBCFG_GLBL_INTR_EN: u32 = 1 << 0;
    pub const GAHBCFG_DMA_EN: u32 = 1 << 5;

    // GUSBCFG
    pub const GUSBCFG_PHYSEL: u32 = 1 << 6;
    pub const GUSBCFG_FORCE_HOST: u32 = 1 << 29;
    pub const GUSBCFG_FORCE_DEV: u32 = 1 << 30;

    // GRSTCTL
    pub const GRSTCTL_CSRST: u32 = 1 << 0;
    pub const GRSTCTL_RXFFLSH: u32 = 1 << 4;
    pub const GRSTCTL_TXFFLSH: u32 = 1 << 5;
    pub const GRSTCTL_TXFNUM_ALL: u32 = 0x10 << 6;
    pub const GRSTCTL_AHB_IDLE: u32 = 1 << 31;

    // GINTSTS / GINTMSK
    pub const GINTSTS_CURMOD: u32 = 1 << 0;
    pub const GINTSTS_HPRTINT: u32 = 1 << 24;
    pub const GINTSTS_HCINT: u32 = 1 << 25;

    // HCFG
    pub const HCFG_FSLSPCLKSEL_48MHZ: u32 = 1;

    // HPRT0
    pub const HPRT_CONN_STS: u32 = 1 << 0;
    pub const HPRT_CONN_DET: u32 = 1 << 1;
    pub const HPRT_ENA: u32 = 1 << 2;
    pub const HPRT_ENA_CHNG: u32 = 1 << 3;
    pub const HPRT_OVRCUR_ACT: u32 = 1 << 4;
    pub const HPRT_OVRCUR_CHNG: u32 = 1 << 5;
    pub const HPRT_RST: u32 = 1 << 8;
    pub const HPRT_PWR: u32 = 1 << 12;
    pub const HPRT_SPD_MASK: u32 = 0x3 << 17;
    pub const HPRT_SPD_SHIFT: u32 = 17;

    /// Write-1-to-clear bits; must be masked out of every read-modify-write
    pub const HPRT_W1C_MASK: u32 = HPRT_CONN_DET | HPRT_ENA | HPRT_ENA_CHNG | HPRT_OVRCUR_CHNG;

    // HCCHAR
    pub const HCCHAR_MPS_MASK: u32 = 0x7FF;
    pub const HCCHAR_EPNUM_SHIFT: u32 = 11;
    pub const HCCHAR_EPDIR_IN: u32 = 1 << 15;
    pub const HCCHAR_LSDEV: u32 = 1 << 17;
    pub const HCCHAR_EPTYPE_CTRL: u32 = 0 << 18;
    pub const HCCHAR_EPTYPE_INTR: u32 = 3 << 18;
    pub const HCCHAR_MC_SHIFT: u32 = 20;
    pub const HCCHAR_DEVADDR_SHIFT: u32 = 22;
    pub const HCCHAR_DEVADDR_MASK: u32 = 0x7F << 22;
    pub const HCCHAR_ODDFRM: u32 = 1 << 29;
    pub const HCCHAR_CHDIS: u32 = 1 << 30;
    pub const HCCHAR_CHENA: u32 = 1 << 31;

    // HCINT / HCINTMSK
    pub const HCINT_XFERCOMPL: u32 = 1 << 0;
    pub const HCINT_CHHLTD: u32 = 1 << 1;
    pub const HCINT_AHBERR: u32 = 1 << 2;
    pub const HCINT_STALL: u32 = 1 << 3;
    pub const HCINT_NAK: u32 = 1 << 4;
    pub const HCINT_ACK: u32 = 1 << 5;
    pub const HCINT_NYET: u32 = 1 << 6;
    pub const HCINT_XACTERR: u32 = 1 << 7;
    pub const HCINT_BBLERR: u32 = 1 << 8;
    pub const HCINT_ALL: u32 = 0x7FF;

    // HCTSIZ
    pub const HCTSIZ_XFERSIZE_MASK: u32 = 0x7FFFF;
    pub const HCTSIZ_PKTCNT_SHIFT: u32 = 19;
    pub const HCTSIZ_PKTCNT_MASK: u32 = 0x3FF << 19;
    pub const HCTSIZ_PID_SHIFT: u32 = 29;
    pub const HCTSIZ_PID_MASK: u32 = 0x3 << 29;

    // HFNUM
    pub const HFNUM_FRNUM_MASK: u32 = 0xFFFF;
}

/// Data PID as encoded in HCTSIZ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Pid {
    Data0 = 0,
    Data2 = 1,
    Data1 = 2,
    Setup = 3,
}

impl Pid {
    pub fn from_hctsiz(hctsiz: u32) -> Self {
        match (hctsiz & bits::HCTSIZ_PID_MASK) >> bits::HCTSIZ_PID_SHIFT {
            0 => Pid::Data0,
            1 => Pid::Data2,
            2 => Pid::Data1,
            _ => Pid::Setup,
        }
    }
}

/// Encode an HCTSIZ value.
pub fn hctsiz(xfer_size: u32, packet_count: u32, pid: Pid) -> u32 {
    (xfer_size & bits::HCTSIZ_XFERSIZE_MASK)
        | ((packet_count << bits::HCTSIZ_PKTCNT_SHIFT) & bits::HCTSIZ_PKTCNT_MASK)
        | ((pid as u32) << bits::HCTSIZ_PID_SHIFT)
}

/// Device speed, encoded as in HPRT0.SPD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UsbSpeed {
    High = 0,
    Full = 1,
    Low = 2,
}

impl UsbSpeed {
    pub fn from_hprt(hprt: u32) -> Self {
        Self::from_raw(((hprt & bits::HPRT_SPD_MASK) >> bits::HPRT_SPD_SHIFT) as u8)
    }

    /// Decode the stored representation; unknown values read as Full.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => UsbSpeed::High,
            2 => UsbSpeed::Low,
            _ => UsbSpeed::Full,
        }
    }

    /// Default control pipe max packet size before the descriptor is read
    pub fn default_control_mps(self) -> u16 {
        match self {
            UsbSpeed::Low => 8,
            _ => 64,
        }
    }
}

/// One register of the DWC2 core, channel registers carrying their channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Gahbcfg,
    Gusbcfg,
    Grstctl,
    Gintsts,
    Gintmsk,
    Grxfsiz,
    Gnptxfsiz,
    Hptxfsiz,
    Hcfg,
    Hfnum,
    Haint,
    Haintmsk,
    Hprt0,
    Hcchar(u8),
    Hcsplt(u8),
    Hcint(u8),
    Hcintmsk(u8),
    Hctsiz(u8),
    Hcdma(u8),
}

/// Register-level access to a DWC2 core.
///
/// Implementors provide raw `read`/`write`; the named accessors are what the
/// driver calls.
pub trait Dwc2Registers {
    fn read(&self, reg: Reg) -> u32;
    fn write(&self, reg: Reg, value: u32);

    fn gintsts(&self) -> u32 {
        self.read(Reg::Gintsts)
    }

    /// GINTSTS is write-1-to-clear
    fn clear_gintsts(&self, mask: u32) {
        self.write(Reg::Gintsts, mask)
    }

    fn hfnum(&self) -> u32 {
        self.read(Reg::Hfnum)
    }

    fn haint(&self) -> u32 {
        self.read(Reg::Haint)
    }

    fn hprt0(&self) -> u32 {
        self.read(Reg::Hprt0)
    }

    fn set_hprt0(&self, value: u32) {
        self.write(Reg::Hprt0, value)
    }

    fn hcchar(&self, ch: u8) -> u32 {
        self.read(Reg::Hcchar(ch))
    }

    fn set_hcchar(&self, ch: u8, value: u32) {
        self.write(Reg::Hcchar(ch), value)
    }

    fn set_hcsplt(&self, ch: u8, value: u32) {
        self.write(Reg::Hcsplt(ch), value)
    }

    fn hcint(&self, ch: u8) -> u32 {
        self.read(Reg::Hcint(ch))
    }

    /// HCINT is write-1-to-clear
    fn clear_hcint(&self, ch: u8, mask: u32) {
        self.write(Reg::Hcint(ch), mask)
    }

    fn set_hcintmsk(&self, ch: u8, value: u32) {
        self.write(Reg::Hcintmsk(ch), value)
    }

    fn hctsiz(&self, ch: u8) -> u32 {
        self.read(Reg::Hctsiz(ch))
    }

    fn set_hctsiz(&self, ch: u8, value: u32) {
        self.write(Reg::Hctsiz(ch), value)
    }

    fn set_hcdma(&self, ch: u8, bus_addr: u32) {
        self.write(Reg::Hcdma(ch), bus_addr)
    }

    /// Set bits with a read-modify-write; never use on W1C registers.
    fn modify(&self, reg: Reg, clear: u32, set: u32) {
        let value = self.read(reg);
        self.write(reg, (value & !clear) | set);
    }
}

impl<T: Dwc2Registers + ?Sized> Dwc2Registers for &T {
    #[inline]
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    #[inline]
    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

// =============================================================================
// MMIO Register Block
// =============================================================================

register_structs! {
    HostChannelRegs {
        (0x00 => hcchar: ReadWrite<u32>),
        (0x04 => hcsplt: ReadWrite<u32>),
        (0x08 => hcint: ReadWrite<u32>),
        (0x0c => hcintmsk: ReadWrite<u32>),
        (0x10 => hctsiz: ReadWrite<u32>),
        (0x14 => hcdma: ReadWrite<u32>),
        (0x18 => _reserved0),
        (0x20 => @END),
    },
    Dwc2RegisterBlock {
        (0x000 => gotgctl: ReadWrite<u32>),
        (0x004 => gotgint: ReadWrite<u32>),
        (0x008 => gahbcfg: ReadWrite<u32>),
        (0x00c => gusbcfg: ReadWrite<u32>),
        (0x010 => grstctl: ReadWrite<u32>),
        (0x014 => gintsts: ReadWrite<u32>),
        (0x018 => gintmsk: ReadWrite<u32>),
        (0x01c => grxstsr: ReadOnly<u32>),
        (0x020 => grxstsp: ReadOnly<u32>),
        (0x024 => grxfsiz: ReadWrite<u32>),
        (0x028 => gnptxfsiz: ReadWrite<u32>),
        (0x02c => _reserved0),
        (0x100 => hptxfsiz: ReadWrite<u32>),
        (0x104 => _reserved1),
        (0x400 => hcfg: ReadWrite<u32>),
        (0x404 => hfir: ReadWrite<u32>),
        (0x408 => hfnum: ReadOnly<u32>),
        (0x40c => _reserved2),
        (0x414 => haint: ReadOnly<u32>),
        (0x418 => haintmsk: ReadWrite<u32>),
        (0x41c => _reserved3),
        (0x440 => hprt0: ReadWrite<u32>),
        (0x444 => _reserved4),
        (0x500 => channels: [HostChannelRegs; NUM_CHANNELS]),
        (0x600 => @END),
    }
}

/// The DWC2 register window mapped at a fixed address.
pub struct MmioRegs {
    block: &'static Dwc2RegisterBlock,
}

// SAFETY: the register block is device memory; every access is a single
// volatile load or store and the driver partitions channel ownership.
unsafe impl Send for MmioRegs {}
unsafe impl Sync for MmioRegs {}

impl MmioRegs {
    /// # Safety
    ///
    /// `base` must be the virtual address of the DWC2 register window, mapped
    /// as device memory for the rest of the kernel's lifetime, and no other
    /// `MmioRegs` may drive the same core.
    pub unsafe fn new(base: usize) -> Self {
        Self {
            block: &*(base as *const Dwc2RegisterBlock),
        }
    }

    fn channel(&self, ch: u8) -> &HostChannelRegs {
        &self.block.channels[ch as usize % NUM_CHANNELS]
    }
}

impl Dwc2Registers for MmioRegs {
    fn read(&self, reg: Reg) -> u32 {
        let b = self.block;
        match reg {
            Reg::Gahbcfg => b.gahbcfg.get(),
            Reg::Gusbcfg => b.gusbcfg.get(),
            Reg::Grstctl => b.grstctl.get(),
            Reg::Gintsts => b.gintsts.get(),
            Reg::Gintmsk => b.gintmsk.get(),
            Reg::Grxfsiz => b.grxfsiz.get(),
            Reg::Gnptxfsiz => b.gnptxfsiz.get(),
            Reg::Hptxfsiz => b.hptxfsiz.get(),
            Reg::Hcfg => b.hcfg.get(),
            Reg::Hfnum => b.hfnum.get(),
            Reg::Haint => b.haint.get(),
            Reg::Haintmsk => b.haintmsk.get(),
            Reg::Hprt0 => b.hprt0.get(),
            Reg::Hcchar(ch) => self.channel(ch).hcchar.get(),
            Reg::Hcsplt(ch) => self.channel(ch).hcsplt.get(),
            Reg::Hcint(ch) => self.channel(ch).hcint.get(),
            Reg::Hcintmsk(ch) => self.channel(ch).hcintmsk.get(),
            Reg::Hctsiz(ch) => self.channel(ch).hctsiz.get(),
            Reg::Hcdma(ch) => self.channel(ch).hcdma.get(),
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let b = self.block;
        match reg {
            Reg::Gahbcfg => b.gahbcfg.set(value),
            Reg::Gusbcfg => b.gusbcfg.set(value),
            Reg::Grstctl => b.grstctl.set(value),
            Reg::Gintsts => b.gintsts.set(value),
            Reg::Gintmsk => b.gintmsk.set(value),
            Reg::Grxfsiz => b.grxfsiz.set(value),
            Reg::Gnptxfsiz => b.gnptxfsiz.set(value),
            Reg::Hptxfsiz => b.hptxfsiz.set(value),
            Reg::Hcfg => b.hcfg.set(value),
            // read-only
            Reg::Hfnum | Reg::Haint => {}
            Reg::Haintmsk => b.haintmsk.set(value),
            Reg::Hprt0 => b.hprt0.set(value),
            Reg::Hcchar(ch) => self.channel(ch).hcchar.set(value),
            Reg::Hcsplt(ch) => self.channel(ch).hcsplt.set(value),
            Reg::Hcint(ch) => self.channel(ch).hcint.set(value),
            Reg::Hcintmsk(ch) => self.channel(ch).hcintmsk.set(value),
            Reg::Hctsiz(ch) => self.channel(ch).hctsiz.set(value),
            Reg::Hcdma(ch) => self.channel(ch).hcdma.set(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_block_layout() {
        assert_eq!(core::mem::size_of::<HostChannelRegs>(), 0x20);
        assert_eq!(core::mem::size_of::<Dwc2RegisterBlock>(), 0x600);
    }

    #[test]
    fn test_hctsiz_encoding() {
        let value = hctsiz(18, 1, Pid::Data1);
        assert_eq!(value & bits::HCTSIZ_XFERSIZE_MASK, 18);
        assert_eq!((value & bits::HCTSIZ_PKTCNT_MASK) >> bits::HCTSIZ_PKTCNT_SHIFT, 1);
        assert_eq!(Pid::from_hctsiz(value), Pid::Data1);
        assert_eq!(Pid::from_hctsiz(hctsiz(8, 1, Pid::Setup)), Pid::Setup);
    }

    #[test]
    fn test_speed_decoding() {
        assert_eq!(UsbSpeed::from_hprt(0), UsbSpeed::High);
        assert_eq!(UsbSpeed::from_hprt(1 << 17), UsbSpeed::Full);
        assert_eq!(UsbSpeed::from_hprt(2 << 17), UsbSpeed::Low);
        assert_eq!(UsbSpeed::Low.default_control_mps(), 8);
        assert_eq!(UsbSpeed::Full.default_control_mps(), 64);
    }
}

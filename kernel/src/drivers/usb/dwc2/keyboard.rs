//! Keyboard interrupt-IN polling and the USB interrupt handler.
//!
//! One transfer is outstanding on the keyboard channel at a time. The
//! interrupt handler consumes its completion, queues any report in the ring
//! and re-arms the channel before returning. Nothing here logs or blocks.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};

use super::dma::DmaBuffer;
use super::enumerate::KeyboardEndpoint;
use super::regs::{bits::*, hctsiz, Dwc2Registers, Pid, UsbSpeed, CONTROL_CHANNEL, KEYBOARD_CHANNEL, NUM_CHANNELS};
use super::stats::DebugCounters;
use super::watchdog::RecoveryState;
use super::Dwc2Host;
use crate::arch_impl::Platform;
use crate::drivers::usb::error::{Result, UsbError};
use crate::drivers::usb::ring::REPORT_SIZE;

/// Channel interrupts routed to the handler for the keyboard pipe
const KEYBOARD_HCINT_MASK: u32 = HCINT_CHHLTD | HCINT_XACTERR | HCINT_BBLERR;

const HCINT_ERRORS: u32 = HCINT_STALL | HCINT_XACTERR | HCINT_BBLERR | HCINT_AHBERR;

/// Channel 1 state. Every field is an atomic because the interrupt handler,
/// the tick handler and the main loop all look at it.
pub(crate) struct KeyboardPipe {
    /// Boxed so the bus address programmed into HCDMA survives moves of the
    /// host while a transfer is armed
    buffer: Box<DmaBuffer<REPORT_SIZE>>,
    /// A keyboard is attached and configured
    online: AtomicBool,
    /// Polling was requested by the main loop
    polling: AtomicBool,
    /// A transfer is armed and has not completed
    pub(super) pending: AtomicBool,
    /// Next expected data PID is DATA1
    toggle: AtomicBool,
    address: AtomicU8,
    endpoint: AtomicU8,
    speed: AtomicU8,
    max_packet: AtomicU16,
    /// Bytes requested by the armed transfer
    requested: AtomicU16,
    /// Tick of the last arm or completion
    last_activity: AtomicU32,
}

impl KeyboardPipe {
    pub fn new() -> Self {
        Self {
            buffer: Box::new(DmaBuffer::new()),
            online: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            toggle: AtomicBool::new(false),
            address: AtomicU8::new(0),
            endpoint: AtomicU8::new(0),
            speed: AtomicU8::new(UsbSpeed::Full as u8),
            max_packet: AtomicU16::new(8),
            requested: AtomicU16::new(0),
            last_activity: AtomicU32::new(0),
        }
    }

    /// Point the pipe at a newly configured keyboard. Polling starts with DATA0.
    pub fn attach(&self, keyboard: &KeyboardEndpoint) {
        self.address.store(keyboard.address, Ordering::Relaxed);
        self.endpoint.store(keyboard.endpoint, Ordering::Relaxed);
        self.speed.store(keyboard.speed as u8, Ordering::Relaxed);
        self.max_packet.store(keyboard.max_packet_size, Ordering::Relaxed);
        self.toggle.store(false, Ordering::Relaxed);
        self.pending.store(false, Ordering::Relaxed);
        self.online.store(true, Ordering::Release);
    }

    pub fn set_offline(&self) {
        self.online.store(false, Ordering::Release);
        self.polling.store(false, Ordering::Release);
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> u32 {
        self.last_activity.load(Ordering::Acquire)
    }

    pub fn reset_toggle(&self) {
        self.toggle.store(false, Ordering::Relaxed);
    }

    fn next_pid(&self) -> Pid {
        if self.toggle.load(Ordering::Relaxed) {
            Pid::Data1
        } else {
            Pid::Data0
        }
    }
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Begin continuous polling of the recorded keyboard.
    ///
    /// Does nothing if a transfer is already outstanding or port recovery is
    /// in progress. If the channel is still enabled from an earlier
    /// transfer, a disable is requested and the halt interrupt re-arms it.
    pub fn start_keyboard_polling(&self) -> Result<()> {
        if !self.keyboard.is_online() {
            return Err(UsbError::NoKeyboard);
        }
        self.keyboard.polling.store(true, Ordering::Release);

        if self.keyboard.is_pending() || self.recovery.state() != RecoveryState::Idle {
            return Ok(());
        }

        let ch = KEYBOARD_CHANNEL;
        let hcchar = self.regs.hcchar(ch);
        if hcchar & HCCHAR_CHENA != 0 {
            self.regs.set_hcintmsk(ch, KEYBOARD_HCINT_MASK);
            self.regs.set_hcchar(ch, hcchar | HCCHAR_CHDIS | HCCHAR_CHENA);
            return Ok(());
        }

        self.arm_keyboard();
        log::info!(
            "usb: keyboard polling started (device {}, endpoint {})",
            self.keyboard.address.load(Ordering::Relaxed),
            self.keyboard.endpoint.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Stop polling and forget the keyboard. Main loop only.
    pub(crate) fn detach_keyboard(&self) {
        self.keyboard.set_offline();
        self.regs.set_hcintmsk(KEYBOARD_CHANNEL, 0);
        self.halt_channel(KEYBOARD_CHANNEL);
        self.keyboard.buffer.acquire_from_device(&self.platform, 0);
    }

    /// Arm the keyboard channel for one interrupt-IN transfer.
    pub(crate) fn arm_keyboard(&self) {
        let ch = KEYBOARD_CHANNEL;
        let pipe = &self.keyboard;
        let mps = pipe.max_packet.load(Ordering::Relaxed);
        // one boot report per transfer, whatever the endpoint's packet size
        let len = (mps as usize).clamp(1, REPORT_SIZE);

        let mut hcchar = (mps as u32 & HCCHAR_MPS_MASK)
            | (pipe.endpoint.load(Ordering::Relaxed) as u32) << HCCHAR_EPNUM_SHIFT
            | HCCHAR_EPDIR_IN
            | HCCHAR_EPTYPE_INTR
            | 1 << HCCHAR_MC_SHIFT
            | (pipe.address.load(Ordering::Relaxed) as u32) << HCCHAR_DEVADDR_SHIFT;
        if UsbSpeed::from_raw(pipe.speed.load(Ordering::Relaxed)) == UsbSpeed::Low {
            hcchar |= HCCHAR_LSDEV;
        }
        if self.regs.hfnum() & 1 != 0 {
            hcchar |= HCCHAR_ODDFRM;
        }

        self.regs.set_hcsplt(ch, 0);
        self.regs.clear_hcint(ch, HCINT_ALL);
        self.regs.set_hcintmsk(ch, KEYBOARD_HCINT_MASK);

        pipe.buffer.prepare_receive(&self.platform, len);
        self.regs.set_hcdma(ch, pipe.buffer.bus_address(&self.platform));
        self.regs.set_hctsiz(ch, hctsiz(len as u32, 1, pipe.next_pid()));
        pipe.requested.store(len as u16, Ordering::Relaxed);

        // marked pending before enabling; the completion may arrive at once
        pipe.pending.store(true, Ordering::Release);
        pipe.last_activity.store(self.now(), Ordering::Release);
        DebugCounters::bump(&self.counters.restart);

        self.platform.memory_barrier();
        self.regs.set_hcchar(ch, hcchar | HCCHAR_CHENA);
    }

    /// USB controller interrupt handler.
    pub fn irq_handler(&self) {
        DebugCounters::bump(&self.counters.irq);
        let gintsts = self.regs.gintsts();

        if gintsts & GINTSTS_HPRTINT != 0 {
            self.handle_port_interrupt();
        }

        if gintsts & GINTSTS_HCINT != 0 {
            let haint = self.regs.haint();
            for ch in 0..NUM_CHANNELS as u8 {
                if haint & (1 << ch) == 0 {
                    continue;
                }
                match ch {
                    KEYBOARD_CHANNEL => self.handle_keyboard_channel(),
                    // polled by the control engine
                    CONTROL_CHANNEL => {}
                    _ => self.regs.clear_hcint(ch, HCINT_ALL),
                }
            }
        }

        self.regs.clear_gintsts(gintsts);
    }

    fn handle_keyboard_channel(&self) {
        let ch = KEYBOARD_CHANNEL;
        let pipe = &self.keyboard;
        DebugCounters::bump(&self.counters.keyboard_irq);

        let hcint = self.regs.hcint(ch);
        self.regs.clear_hcint(ch, hcint);
        pipe.pending.store(false, Ordering::Release);

        let data = hcint & HCINT_XFERCOMPL != 0
            || (hcint & HCINT_CHHLTD != 0 && hcint & HCINT_ACK != 0);
        if data {
            let requested = pipe.requested.load(Ordering::Relaxed) as usize;
            let remaining = (self.regs.hctsiz(ch) & HCTSIZ_XFERSIZE_MASK) as usize;
            let received = requested.saturating_sub(remaining);
            pipe.buffer.acquire_from_device(&self.platform, received);
            if received > 0 {
                if let Some(bytes) = pipe.buffer.bytes() {
                    self.reports.push(&bytes[..received]);
                    DebugCounters::bump(&self.counters.data);
                }
            }
            pipe.toggle.fetch_xor(true, Ordering::Relaxed);
        } else {
            pipe.buffer.acquire_from_device(&self.platform, 0);
            if hcint & HCINT_NAK != 0 {
                DebugCounters::bump(&self.counters.nak);
            } else if hcint & HCINT_ERRORS != 0 {
                DebugCounters::bump(&self.counters.error);
            }
        }
        pipe.last_activity.store(self.now(), Ordering::Release);

        if pipe.is_online() && pipe.is_polling() && self.recovery.state() == RecoveryState::Idle {
            self.arm_keyboard();
        }
    }

    fn handle_port_interrupt(&self) {
        DebugCounters::bump(&self.counters.port_irq);
        let hprt = self.regs.hprt0();

        // Acknowledge the change bits. ENA is write-1-to-clear as well and
        // must not be written back.
        self.regs.set_hprt0(hprt & !HPRT_ENA);

        if hprt & HPRT_CONN_DET != 0 && hprt & HPRT_CONN_STS == 0 {
            self.keyboard.set_offline();
            self.recovery.cancel();
            return;
        }

        let enable_lost = hprt & HPRT_ENA_CHNG != 0 && hprt & HPRT_ENA == 0 && hprt & HPRT_CONN_STS != 0;
        if enable_lost && self.keyboard.is_online() && self.recovery.state() == RecoveryState::Idle {
            self.keyboard.pending.store(false, Ordering::Release);
            self.regs.set_hprt0((hprt & !HPRT_W1C_MASK) | HPRT_RST);
            self.recovery.begin(self.now());
        }
    }
}

//! Control transfer engine (channel 0).
//!
//! Runs SETUP, optional DATA and STATUS stages back to back, busy-polling
//! the channel for each. Must never run in interrupt context.

use alloc::boxed::Box;

use super::dma::DmaBuffer;
use super::regs::{bits::*, hctsiz, Dwc2Registers, Pid, UsbSpeed, CONTROL_CHANNEL};
use super::stats::DebugCounters;
use super::Dwc2Host;
use crate::arch_impl::Platform;
use crate::drivers::usb::descriptors::SetupPacket;
use crate::drivers::usb::error::{Result, UsbError};

/// Largest DATA stage a control transfer may carry
pub const CONTROL_BUFFER_SIZE: usize = 512;

/// Channel 0 and the DMA buffer every control stage goes through
pub(crate) struct ControlPipe {
    /// Heap-allocated so its bus address does not depend on where the host lives
    buffer: Box<DmaBuffer<CONTROL_BUFFER_SIZE>>,
}

impl ControlPipe {
    pub fn new() -> Self {
        Self {
            buffer: Box::new(DmaBuffer::new()),
        }
    }
}

/// Where a control transfer is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTarget {
    pub address: u8,
    pub speed: UsbSpeed,
    /// Endpoint 0 max packet size
    pub max_packet_size: u16,
}

impl DeviceTarget {
    /// A freshly reset device answering at address 0
    pub fn default_address(speed: UsbSpeed) -> Self {
        Self {
            address: 0,
            speed,
            max_packet_size: speed.default_control_mps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Setup,
    Data,
    Status,
    Complete,
}

/// What the channel reported for one arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Done,
    Nak,
}

/// One stage as programmed into the channel
#[derive(Debug, Clone, Copy)]
struct StagePlan {
    pid: Pid,
    dir_in: bool,
    len: usize,
    retries: u32,
}

/// Decode HCINT: transfer-complete, then halted+ACK, then halted+NAK, then
/// the error bits. A halt with no other bit counts as done.
fn classify(hcint: u32) -> Option<Result<Completion>> {
    if hcint & HCINT_XFERCOMPL != 0 {
        return Some(Ok(Completion::Done));
    }
    let halted = hcint & HCINT_CHHLTD != 0;
    if halted && hcint & HCINT_ACK != 0 {
        return Some(Ok(Completion::Done));
    }
    if halted && hcint & HCINT_NAK != 0 {
        return Some(Ok(Completion::Nak));
    }
    if hcint & HCINT_STALL != 0 {
        return Some(Err(UsbError::Stall));
    }
    if hcint & HCINT_XACTERR != 0 {
        return Some(Err(UsbError::TransactionError));
    }
    if hcint & HCINT_BBLERR != 0 {
        return Some(Err(UsbError::Babble));
    }
    if hcint & HCINT_AHBERR != 0 {
        return Some(Err(UsbError::AhbError));
    }
    if halted {
        return Some(Ok(Completion::Done));
    }
    None
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Run one control transfer.
    ///
    /// `data` must be at least `wLength` bytes when the request has a DATA
    /// stage. Returns the number of DATA bytes transferred.
    pub(crate) fn control_transfer(
        &self,
        target: DeviceTarget,
        setup: SetupPacket,
        data: Option<&mut [u8]>,
    ) -> Result<usize> {
        let len = setup.w_length as usize;
        let dir_in = setup.is_in();
        if len > CONTROL_BUFFER_SIZE {
            return Err(UsbError::BufferTooSmall);
        }
        let mut data = data;
        if len > 0 && data.as_ref().map_or(0, |d| d.len()) < len {
            return Err(UsbError::BufferTooSmall);
        }

        let pipe = self.control.lock();
        let mut transferred = 0;
        let mut stage = Stage::Setup;

        loop {
            stage = match stage {
                Stage::Setup => {
                    if !pipe.buffer.fill(&setup.to_bytes()) {
                        return Err(UsbError::ChannelBusy);
                    }
                    let plan = StagePlan {
                        pid: Pid::Setup,
                        dir_in: false,
                        len: SetupPacket::SIZE,
                        retries: self.config.setup_retries,
                    };
                    self.run_stage(&pipe, target, plan)?;
                    if len > 0 {
                        Stage::Data
                    } else {
                        Stage::Status
                    }
                }
                Stage::Data => {
                    if !dir_in {
                        if let Some(out) = data.as_deref() {
                            if !pipe.buffer.fill(&out[..len]) {
                                return Err(UsbError::ChannelBusy);
                            }
                        }
                    }
                    let plan = StagePlan {
                        pid: Pid::Data1,
                        dir_in,
                        len,
                        retries: self.config.data_retries,
                    };
                    transferred = self.run_stage(&pipe, target, plan)?;
                    if dir_in {
                        if let (Some(dest), Some(bytes)) = (data.as_deref_mut(), pipe.buffer.bytes()) {
                            dest[..transferred].copy_from_slice(&bytes[..transferred]);
                        }
                    }
                    Stage::Status
                }
                Stage::Status => {
                    let plan = StagePlan {
                        pid: Pid::Data1,
                        dir_in: len == 0 || !dir_in,
                        len: 0,
                        retries: self.config.status_retries,
                    };
                    self.run_stage(&pipe, target, plan)?;
                    Stage::Complete
                }
                Stage::Complete => return Ok(transferred),
            };
        }
    }

    /// Arm channel 0 for one stage and wait for it, retrying NAKs within the
    /// stage's budget. Returns bytes moved (received for IN, sent for OUT).
    fn run_stage(&self, pipe: &ControlPipe, target: DeviceTarget, plan: StagePlan) -> Result<usize> {
        let ch = CONTROL_CHANNEL;
        let mut retries = 0;

        loop {
            self.arm_control(pipe, target, plan);

            match self.wait_for_completion(ch) {
                Ok(Completion::Done) => {
                    let remaining = (self.regs.hctsiz(ch) & HCTSIZ_XFERSIZE_MASK) as usize;
                    let moved = plan.len.saturating_sub(remaining);
                    pipe.buffer.acquire_from_device(&self.platform, if plan.dir_in { moved } else { 0 });
                    self.regs.clear_hcint(ch, HCINT_ALL);
                    return Ok(if plan.dir_in { moved } else { plan.len });
                }
                Ok(Completion::Nak) => {
                    pipe.buffer.acquire_from_device(&self.platform, 0);
                    self.regs.clear_hcint(ch, HCINT_ALL);
                    if retries >= plan.retries {
                        log::warn!(
                            "usb: control {:?} stage to device {} exhausted {} NAK retries",
                            plan.pid,
                            target.address,
                            plan.retries
                        );
                        return Err(UsbError::Timeout);
                    }
                    retries += 1;
                    DebugCounters::bump(&self.counters.control_retries);
                    self.platform.sleep_us(self.config.nak_backoff_us);
                }
                Err(e) => {
                    if e == UsbError::Timeout {
                        self.halt_channel(ch);
                    }
                    self.regs.clear_hcint(ch, HCINT_ALL);
                    pipe.buffer.acquire_from_device(&self.platform, 0);
                    return Err(e);
                }
            }
        }
    }

    /// Program channel 0 and hand the buffer to the controller.
    fn arm_control(&self, pipe: &ControlPipe, target: DeviceTarget, plan: StagePlan) {
        let ch = CONTROL_CHANNEL;
        let mps = target.max_packet_size.max(8) as usize;
        let packets = plan.len.div_ceil(mps).max(1) as u32;

        let mut hcchar = (mps as u32 & HCCHAR_MPS_MASK)
            | HCCHAR_EPTYPE_CTRL
            | 1 << HCCHAR_MC_SHIFT
            | (target.address as u32) << HCCHAR_DEVADDR_SHIFT;
        if plan.dir_in {
            hcchar |= HCCHAR_EPDIR_IN;
        }
        if target.speed == UsbSpeed::Low {
            hcchar |= HCCHAR_LSDEV;
        }

        self.regs.set_hcsplt(ch, 0);
        self.regs.clear_hcint(ch, HCINT_ALL);
        // polled, so never routed to the interrupt controller
        self.regs.set_hcintmsk(ch, 0);

        if plan.dir_in {
            pipe.buffer.prepare_receive(&self.platform, plan.len);
        } else {
            pipe.buffer.release_to_device(&self.platform, plan.len);
        }

        self.regs.set_hcdma(ch, pipe.buffer.bus_address(&self.platform));
        self.regs.set_hctsiz(ch, hctsiz(plan.len as u32, packets, plan.pid));
        self.platform.memory_barrier();
        self.regs.set_hcchar(ch, hcchar | HCCHAR_CHENA);
    }

    /// Poll HCINT until the channel reports something or the budget expires.
    fn wait_for_completion(&self, ch: u8) -> Result<Completion> {
        for _ in 0..self.config.poll_iterations {
            if let Some(outcome) = classify(self.regs.hcint(ch)) {
                return outcome;
            }
            self.platform.sleep_us(1);
        }
        Err(UsbError::Timeout)
    }

    /// Force a channel to halt and wait (bounded) for the confirmation.
    /// Returns false if the channel never confirmed. Main loop only.
    pub(crate) fn halt_channel(&self, ch: u8) -> bool {
        self.halt_channel_with(ch, true)
    }

    /// [`Self::halt_channel`] with a bare spin instead of sleeps; used from
    /// the tick handler.
    pub(crate) fn halt_channel_spinning(&self, ch: u8) -> bool {
        self.halt_channel_with(ch, false)
    }

    fn halt_channel_with(&self, ch: u8, may_sleep: bool) -> bool {
        let hcchar = self.regs.hcchar(ch);
        if hcchar & HCCHAR_CHENA == 0 {
            self.regs.clear_hcint(ch, HCINT_ALL);
            return true;
        }
        self.regs.set_hcchar(ch, hcchar | HCCHAR_CHDIS | HCCHAR_CHENA);
        let confirmed = || self.regs.hcint(ch) & HCINT_CHHLTD != 0;
        let iterations = self.config.halt_wait_iterations;
        let halted = if may_sleep {
            self.wait_for(iterations, confirmed)
        } else {
            self.spin_for(iterations, confirmed)
        }
        .is_ok();
        self.regs.clear_hcint(ch, HCINT_ALL);
        halted
    }
}

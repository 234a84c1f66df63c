//! In-memory DWC2 core and USB bus for tests.
//!
//! [`MockHardware`] implements both [`Dwc2Registers`] and [`Platform`], so a
//! host can be built as `Dwc2Host::new(&hw, &hw, config)`. Control transfers
//! on channel 0 are answered synchronously by a small device model (device,
//! configuration and hub descriptors, hub ports, SET_ADDRESS). The interrupt
//! channel stays armed until the test completes it with `complete_channel`.
//! Outcomes queued with `inject` replace the model's answer for one arm.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::regs::{bits::*, Dwc2Registers, Pid, Reg, UsbSpeed, NUM_CHANNELS};
use crate::arch_impl::Platform;
use crate::drivers::usb::descriptors::{
    class_code, descriptor_type, hid_request, port_change, port_feature, port_status, request,
    SetupPacket,
};

/// First bus address handed out for DMA buffers
const DMA_BUS_BASE: u32 = 0x1000_0000;
/// Bus address space reserved per registered buffer
const DMA_WINDOW: u32 = 0x1_0000;

/// HCINT value for a NAKed transaction
pub const OUTCOME_NAK: u32 = HCINT_CHHLTD | HCINT_NAK;
/// HCINT value for a STALL handshake
pub const OUTCOME_STALL: u32 = HCINT_CHHLTD | HCINT_STALL;
/// HCINT value for a bus transaction error
pub const OUTCOME_XACTERR: u32 = HCINT_CHHLTD | HCINT_XACTERR;
/// HCINT value for a successful transfer
pub const OUTCOME_COMPLETE: u32 = HCINT_XFERCOMPL | HCINT_CHHLTD | HCINT_ACK;
/// The channel never answers
pub const OUTCOME_SILENT: u32 = 0;

/// Cache maintenance and channel arms, in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEvent {
    Clean(usize, usize),
    Invalidate(usize, usize),
    Enable(u8),
}

/// One downstream port of a mock hub
#[derive(Debug, Clone, Copy, Default)]
pub struct MockPort {
    pub status: u16,
    pub change: u16,
    /// Index of the attached device in the bus model
    pub child: Option<usize>,
}

/// A device on the mock bus
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub speed: UsbSpeed,
    pub device_descriptor: [u8; 18],
    pub config_descriptor: Vec<u8>,
    /// Downstream ports; empty unless the device is a hub
    pub hub_ports: Vec<MockPort>,
    /// bRequest values this device answers with STALL
    pub stall_requests: Vec<u8>,
    address: Option<u8>,
    parent: Option<(usize, u8)>,
    configuration: u16,
    protocol: Option<u16>,
    idle: Option<u16>,
}

impl MockDevice {
    fn new(speed: UsbSpeed, class: u8, max_packet0: u8, config_descriptor: Vec<u8>) -> Self {
        let mut device_descriptor = [0u8; 18];
        device_descriptor[0] = 18;
        device_descriptor[1] = descriptor_type::DEVICE;
        device_descriptor[2] = 0x00;
        device_descriptor[3] = 0x02;
        device_descriptor[4] = class;
        device_descriptor[7] = max_packet0;
        device_descriptor[8] = 0x34;
        device_descriptor[9] = 0x12;
        device_descriptor[17] = 1;
        Self {
            speed,
            device_descriptor,
            config_descriptor,
            hub_ports: Vec::new(),
            stall_requests: Vec::new(),
            address: None,
            parent: None,
            configuration: 0,
            protocol: None,
            idle: None,
        }
    }

    /// Boot keyboard with one interrupt-IN endpoint (0x81, 8 bytes, 10 ms)
    pub fn keyboard(speed: UsbSpeed) -> Self {
        let config = config_descriptor(&[
            // interface 0: HID, boot, keyboard
            9, descriptor_type::INTERFACE, 0, 0, 1, class_code::HID, 1, 1, 0,
            // HID class descriptor
            9, descriptor_type::HID, 0x11, 0x01, 0, 1, 0x22, 63, 0,
            // endpoint 0x81 interrupt IN
            7, descriptor_type::ENDPOINT, 0x81, 0x03, 8, 0, 10,
        ]);
        Self::new(speed, 0, 8, config)
    }

    /// Hub with `ports` downstream ports, nothing attached
    pub fn hub(ports: u8) -> Self {
        let config = config_descriptor(&[
            9, descriptor_type::INTERFACE, 0, 0, 1, class_code::HUB, 0, 0, 0,
            7, descriptor_type::ENDPOINT, 0x81, 0x03, 1, 0, 12,
        ]);
        let mut device = Self::new(UsbSpeed::Full, class_code::HUB, 64, config);
        device.hub_ports = vec![MockPort::default(); ports as usize];
        device
    }

    /// Vendor-specific device with no endpoints the host cares about
    pub fn generic(speed: UsbSpeed) -> Self {
        let config = config_descriptor(&[9, descriptor_type::INTERFACE, 0, 0, 0, 0xFF, 0, 0, 0]);
        Self::new(speed, 0, 64, config)
    }

    fn hub_descriptor(&self) -> Vec<u8> {
        vec![9, descriptor_type::HUB, self.hub_ports.len() as u8, 0, 0, 50, 0, 0, 0xFF]
    }
}

fn config_descriptor(tail: &[u8]) -> Vec<u8> {
    let total = (9 + tail.len()) as u16;
    let mut bytes = vec![
        9,
        descriptor_type::CONFIGURATION,
        total as u8,
        (total >> 8) as u8,
        1,
        1,
        0,
        0xA0,
        50,
    ];
    bytes.extend_from_slice(tail);
    bytes
}

#[derive(Debug, Clone, Copy, Default)]
struct MockChannel {
    hcchar: u32,
    hcsplt: u32,
    hcint: u32,
    hcintmsk: u32,
    hctsiz: u32,
    hcdma: u32,
    setup: Option<SetupPacket>,
    enables: u32,
}

struct MockState {
    gahbcfg: u32,
    gusbcfg: u32,
    grstctl: u32,
    gintsts: u32,
    gintmsk: u32,
    grxfsiz: u32,
    gnptxfsiz: u32,
    hptxfsiz: u32,
    hcfg: u32,
    hfnum: u32,
    haintmsk: u32,
    hprt0: u32,
    channels: [MockChannel; NUM_CHANNELS],
    outcomes: [VecDeque<u32>; NUM_CHANNELS],
    devices: Vec<MockDevice>,
    dma: Vec<usize>,
    events: Vec<MockEvent>,
    hprt_writes: Vec<u32>,
    requests: Vec<(u8, SetupPacket)>,
    slept_ms: u64,
    slept_us: u64,
    auto_enable_on_reset: bool,
    /// Channels that ignore CHDIS, one bit per channel
    wedged: u32,
}

/// In-memory DWC2 core, USB bus and platform services
pub struct MockHardware {
    state: RefCell<MockState>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    /// Root port powered, connected and enabled at full speed; nothing attached.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockState {
                gahbcfg: 0,
                gusbcfg: 0,
                grstctl: 0,
                gintsts: 0,
                gintmsk: 0,
                grxfsiz: 0,
                gnptxfsiz: 0,
                hptxfsiz: 0,
                hcfg: 0,
                hfnum: 0,
                haintmsk: 0,
                hprt0: HPRT_CONN_STS | HPRT_ENA | HPRT_PWR | (UsbSpeed::Full as u32) << HPRT_SPD_SHIFT,
                channels: [MockChannel::default(); NUM_CHANNELS],
                outcomes: core::array::from_fn(|_| VecDeque::new()),
                devices: Vec::new(),
                dma: Vec::new(),
                events: Vec::new(),
                hprt_writes: Vec::new(),
                requests: Vec::new(),
                slept_ms: 0,
                slept_us: 0,
                auto_enable_on_reset: true,
                wedged: 0,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Bus topology
    // -------------------------------------------------------------------------

    /// Attach `device` to the root port in the default (address 0) state.
    pub fn attach_root(&self, mut device: MockDevice) -> usize {
        let mut s = self.state.borrow_mut();
        let speed = device.speed;
        device.address = Some(0);
        device.parent = None;
        s.devices.push(device);
        s.hprt0 = (s.hprt0 & !HPRT_SPD_MASK) | (speed as u32) << HPRT_SPD_SHIFT;
        s.devices.len() - 1
    }

    /// Plug `device` into `port` (1-based) of the hub at index `hub`.
    pub fn attach_to_hub(&self, hub: usize, port: u8, mut device: MockDevice) -> usize {
        let mut s = self.state.borrow_mut();
        let speed_bits = match device.speed {
            UsbSpeed::Low => port_status::LOW_SPEED,
            UsbSpeed::High => port_status::HIGH_SPEED,
            UsbSpeed::Full => 0,
        };
        device.parent = Some((hub, port));
        s.devices.push(device);
        let index = s.devices.len() - 1;
        let slot = &mut s.devices[hub].hub_ports[port as usize - 1];
        slot.status |= port_status::CONNECTION | speed_bits;
        slot.change |= port_change::C_CONNECTION;
        slot.child = Some(index);
        index
    }

    pub fn device_address(&self, index: usize) -> Option<u8> {
        self.state.borrow().devices[index].address
    }

    pub fn device_configuration(&self, index: usize) -> u16 {
        self.state.borrow().devices[index].configuration
    }

    /// (SET_PROTOCOL value, SET_IDLE value) received by the device
    pub fn hid_settings(&self, index: usize) -> (Option<u16>, Option<u16>) {
        let s = self.state.borrow();
        (s.devices[index].protocol, s.devices[index].idle)
    }

    pub fn port_status(&self, hub: usize, port: u8) -> MockPort {
        self.state.borrow().devices[hub].hub_ports[port as usize - 1]
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Answer the next arm of `ch` with `hcint` instead of the device model.
    pub fn inject(&self, ch: u8, hcint: u32) {
        self.state.borrow_mut().outcomes[ch as usize].push_back(hcint);
    }

    /// Finish the transfer armed on `ch`: copy `data` into its DMA buffer,
    /// update the remaining size and raise `hcint`.
    pub fn complete_channel(&self, ch: u8, hcint: u32, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        let c = s.channels[ch as usize];
        let requested = c.hctsiz & HCTSIZ_XFERSIZE_MASK;
        let written = (data.len() as u32).min(requested);
        if written > 0 {
            let addr = s.resolve(c.hcdma);
            // SAFETY: the buffer is device-owned while the channel is armed.
            unsafe {
                core::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, written as usize);
            }
        }
        let c = &mut s.channels[ch as usize];
        c.hctsiz = (c.hctsiz & !HCTSIZ_XFERSIZE_MASK) | (requested - written);
        c.hcint |= hcint;
        c.hcchar &= !HCCHAR_CHENA;
    }

    /// Port drops its enable while the device stays connected.
    pub fn lose_port_enable(&self) {
        let mut s = self.state.borrow_mut();
        s.hprt0 = (s.hprt0 & !HPRT_ENA) | HPRT_ENA_CHNG;
    }

    pub fn set_port_enabled(&self, enabled: bool) {
        let mut s = self.state.borrow_mut();
        if enabled {
            s.hprt0 |= HPRT_ENA;
        } else {
            s.hprt0 &= !HPRT_ENA;
        }
    }

    /// Device unplugged from the root port.
    pub fn disconnect_root(&self) {
        let mut s = self.state.borrow_mut();
        s.hprt0 = (s.hprt0 & !(HPRT_CONN_STS | HPRT_ENA)) | HPRT_CONN_DET;
    }

    /// Root port with nothing attached and not enabled.
    pub fn set_root_disconnected(&self) {
        let mut s = self.state.borrow_mut();
        s.hprt0 &= !(HPRT_CONN_STS | HPRT_ENA);
    }

    /// Whether releasing root port reset enables the port immediately.
    pub fn set_auto_enable_on_reset(&self, enable: bool) {
        self.state.borrow_mut().auto_enable_on_reset = enable;
    }

    /// A wedged channel ignores disable requests and never reports CHHLTD.
    pub fn set_channel_wedged(&self, ch: u8, wedged: bool) {
        let mut s = self.state.borrow_mut();
        if wedged {
            s.wedged |= 1 << ch;
        } else {
            s.wedged &= !(1 << ch);
        }
    }

    pub fn set_frame_number(&self, frame: u32) {
        self.state.borrow_mut().hfnum = frame & HFNUM_FRNUM_MASK;
    }

    // -------------------------------------------------------------------------
    // Recorders
    // -------------------------------------------------------------------------

    /// Times `ch` has been enabled
    pub fn enables(&self, ch: u8) -> u32 {
        self.state.borrow().channels[ch as usize].enables
    }

    pub fn channel_enabled(&self, ch: u8) -> bool {
        self.state.borrow().channels[ch as usize].hcchar & HCCHAR_CHENA != 0
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Every value written to HPRT0
    pub fn hprt_writes(&self) -> Vec<u32> {
        self.state.borrow().hprt_writes.clone()
    }

    /// SETUP packets seen, with the device address they were sent to
    pub fn requests(&self) -> Vec<(u8, SetupPacket)> {
        self.state.borrow().requests.clone()
    }

    pub fn slept_ms(&self) -> u64 {
        self.state.borrow().slept_ms
    }

    pub fn slept_us(&self) -> u64 {
        self.state.borrow().slept_us
    }
}

impl MockState {
    fn resolve(&self, bus: u32) -> usize {
        let offset = bus.wrapping_sub(DMA_BUS_BASE);
        let index = (offset / DMA_WINDOW) as usize;
        self.dma.get(index).copied().unwrap_or(0) + (offset % DMA_WINDOW) as usize
    }

    fn haint(&self) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.hcint & c.hcintmsk != 0)
            .fold(0, |acc, (i, _)| acc | 1 << i)
    }

    fn gintsts(&self) -> u32 {
        let mut value = self.gintsts | GINTSTS_CURMOD;
        if self.haint() & self.haintmsk != 0 {
            value |= GINTSTS_HCINT;
        }
        if self.hprt0 & (HPRT_CONN_DET | HPRT_ENA_CHNG | HPRT_OVRCUR_CHNG) != 0 {
            value |= GINTSTS_HPRTINT;
        }
        value
    }

    fn write_hprt0(&mut self, value: u32) {
        self.hprt_writes.push(value);
        let old = self.hprt0;
        let mut new = old & !(value & HPRT_W1C_MASK);
        new = (new & !(HPRT_PWR | HPRT_RST)) | (value & (HPRT_PWR | HPRT_RST));
        if new & HPRT_RST != 0 {
            new &= !HPRT_ENA;
        }
        let reset_released = old & HPRT_RST != 0 && new & HPRT_RST == 0;
        if reset_released && new & HPRT_CONN_STS != 0 && self.auto_enable_on_reset {
            new |= HPRT_ENA;
        }
        self.hprt0 = new;
    }

    fn write_hcchar(&mut self, ch: usize, value: u32) {
        let was_enabled = self.channels[ch].hcchar & HCCHAR_CHENA != 0;
        if value & HCCHAR_CHDIS != 0 {
            if self.wedged & (1 << ch) != 0 {
                return;
            }
            let c = &mut self.channels[ch];
            c.hcchar = value & !(HCCHAR_CHENA | HCCHAR_CHDIS);
            if was_enabled {
                c.hcint |= HCINT_CHHLTD;
            }
            return;
        }

        self.channels[ch].hcchar = value;
        if value & HCCHAR_CHENA == 0 {
            return;
        }
        self.channels[ch].enables += 1;
        self.events.push(MockEvent::Enable(ch as u8));

        if let Some(outcome) = self.outcomes[ch].pop_front() {
            if outcome != OUTCOME_SILENT {
                self.halt(ch, outcome);
            }
            return;
        }
        if value & HCCHAR_EPTYPE_INTR == HCCHAR_EPTYPE_CTRL {
            self.control_stage(ch);
        }
    }

    fn halt(&mut self, ch: usize, hcint: u32) {
        let c = &mut self.channels[ch];
        c.hcint |= hcint;
        c.hcchar &= !HCCHAR_CHENA;
    }

    fn complete(&mut self, ch: usize, remaining: u32) {
        let c = &mut self.channels[ch];
        c.hctsiz = (c.hctsiz & !HCTSIZ_XFERSIZE_MASK) | remaining;
        self.halt(ch, OUTCOME_COMPLETE);
    }

    fn control_stage(&mut self, ch: usize) {
        let c = self.channels[ch];
        let address = ((c.hcchar & HCCHAR_DEVADDR_MASK) >> HCCHAR_DEVADDR_SHIFT) as u8;
        let dir_in = c.hcchar & HCCHAR_EPDIR_IN != 0;
        let len = c.hctsiz & HCTSIZ_XFERSIZE_MASK;

        let Some(device) = self.find_device(address) else {
            self.halt(ch, OUTCOME_XACTERR);
            return;
        };

        if Pid::from_hctsiz(c.hctsiz) == Pid::Setup {
            let mut raw = [0u8; 8];
            let addr = self.resolve(c.hcdma);
            // SAFETY: the SETUP buffer was released to the device before arming.
            unsafe {
                core::ptr::copy_nonoverlapping(addr as *const u8, raw.as_mut_ptr(), 8);
            }
            let setup = SetupPacket::from_bytes(&raw);
            self.requests.push((address, setup));
            self.channels[ch].setup = Some(setup);
            let b_request = setup.b_request;
            if self.devices[device].stall_requests.contains(&b_request) || !supported(&setup) {
                self.halt(ch, OUTCOME_STALL);
                return;
            }
            self.complete(ch, 0);
            return;
        }

        let Some(setup) = self.channels[ch].setup else {
            self.halt(ch, OUTCOME_STALL);
            return;
        };

        if len > 0 {
            if dir_in {
                let response = self.respond(device, &setup);
                let written = (response.len() as u32).min(len);
                let addr = self.resolve(c.hcdma);
                // SAFETY: the buffer was handed to the device for this IN stage.
                unsafe {
                    core::ptr::copy_nonoverlapping(response.as_ptr(), addr as *mut u8, written as usize);
                }
                self.complete(ch, len - written);
            } else {
                self.complete(ch, 0);
            }
            return;
        }

        self.channels[ch].setup = None;
        self.apply(device, &setup);
        self.complete(ch, 0);
    }

    fn reachable(&self, index: usize) -> bool {
        match self.devices[index].parent {
            None => self.hprt0 & HPRT_CONN_STS != 0 && self.hprt0 & HPRT_ENA != 0,
            Some((hub, port)) => {
                let status = self.devices[hub].hub_ports[port as usize - 1].status;
                status & port_status::ENABLE != 0 && self.reachable(hub)
            }
        }
    }

    fn find_device(&self, address: u8) -> Option<usize> {
        (0..self.devices.len())
            .find(|&i| self.devices[i].address == Some(address) && self.reachable(i))
    }

    fn respond(&self, device: usize, setup: &SetupPacket) -> Vec<u8> {
        let d = &self.devices[device];
        let kind = (setup.w_value >> 8) as u8;
        match (setup.bm_request_type, setup.b_request) {
            (0x80, request::GET_DESCRIPTOR) => match kind {
                descriptor_type::DEVICE => d.device_descriptor.to_vec(),
                descriptor_type::CONFIGURATION => d.config_descriptor.clone(),
                _ => Vec::new(),
            },
            (0xA0, request::GET_DESCRIPTOR) if !d.hub_ports.is_empty() => d.hub_descriptor(),
            (0xA3, request::GET_STATUS) => {
                match d.hub_ports.get((setup.w_index as usize).wrapping_sub(1)) {
                    Some(port) => {
                        let mut bytes = port.status.to_le_bytes().to_vec();
                        bytes.extend_from_slice(&port.change.to_le_bytes());
                        bytes
                    }
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn apply(&mut self, device: usize, setup: &SetupPacket) {
        let port_index = (setup.w_index as usize).wrapping_sub(1);
        match (setup.bm_request_type, setup.b_request) {
            (0x00, request::SET_ADDRESS) => {
                self.devices[device].address = Some(setup.w_value as u8);
            }
            (0x00, request::SET_CONFIGURATION) => {
                self.devices[device].configuration = setup.w_value;
            }
            (0x23, request::SET_FEATURE) => {
                let Some(port) = self.devices[device].hub_ports.get_mut(port_index) else {
                    return;
                };
                let mut reset_child = None;
                match setup.w_value {
                    port_feature::POWER => port.status |= port_status::POWER,
                    port_feature::RESET if port.status & port_status::CONNECTION != 0 => {
                        port.status |= port_status::ENABLE;
                        port.change |= port_change::C_RESET;
                        reset_child = port.child;
                    }
                    _ => {}
                }
                // a reset device answers at the default address
                if let Some(child) = reset_child {
                    self.devices[child].address = Some(0);
                }
            }
            (0x23, request::CLEAR_FEATURE) => {
                let Some(port) = self.devices[device].hub_ports.get_mut(port_index) else {
                    return;
                };
                match setup.w_value {
                    port_feature::C_RESET => port.change &= !port_change::C_RESET,
                    port_feature::C_CONNECTION => port.change &= !port_change::C_CONNECTION,
                    port_feature::ENABLE => port.status &= !port_status::ENABLE,
                    _ => {}
                }
            }
            (0x21, hid_request::SET_PROTOCOL) => self.devices[device].protocol = Some(setup.w_value),
            (0x21, hid_request::SET_IDLE) => self.devices[device].idle = Some(setup.w_value),
            _ => {}
        }
    }
}

fn supported(setup: &SetupPacket) -> bool {
    matches!(
        (setup.bm_request_type, setup.b_request),
        (0x80, request::GET_DESCRIPTOR)
            | (0xA0, request::GET_DESCRIPTOR)
            | (0xA3, request::GET_STATUS)
            | (0x00, request::SET_ADDRESS)
            | (0x00, request::SET_CONFIGURATION)
            | (0x23, request::SET_FEATURE)
            | (0x23, request::CLEAR_FEATURE)
            | (0x21, hid_request::SET_PROTOCOL)
            | (0x21, hid_request::SET_IDLE)
    )
}

impl Dwc2Registers for MockHardware {
    fn read(&self, reg: Reg) -> u32 {
        let s = self.state.borrow();
        match reg {
            Reg::Gahbcfg => s.gahbcfg,
            Reg::Gusbcfg => s.gusbcfg,
            Reg::Grstctl => s.grstctl | GRSTCTL_AHB_IDLE,
            Reg::Gintsts => s.gintsts(),
            Reg::Gintmsk => s.gintmsk,
            Reg::Grxfsiz => s.grxfsiz,
            Reg::Gnptxfsiz => s.gnptxfsiz,
            Reg::Hptxfsiz => s.hptxfsiz,
            Reg::Hcfg => s.hcfg,
            Reg::Hfnum => s.hfnum,
            Reg::Haint => s.haint(),
            Reg::Haintmsk => s.haintmsk,
            Reg::Hprt0 => s.hprt0,
            Reg::Hcchar(ch) => s.channels[ch as usize].hcchar,
            Reg::Hcsplt(ch) => s.channels[ch as usize].hcsplt,
            Reg::Hcint(ch) => s.channels[ch as usize].hcint,
            Reg::Hcintmsk(ch) => s.channels[ch as usize].hcintmsk,
            Reg::Hctsiz(ch) => s.channels[ch as usize].hctsiz,
            Reg::Hcdma(ch) => s.channels[ch as usize].hcdma,
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        let mut s = self.state.borrow_mut();
        match reg {
            Reg::Gahbcfg => s.gahbcfg = value,
            Reg::Gusbcfg => s.gusbcfg = value,
            // soft reset and FIFO flushes complete immediately
            Reg::Grstctl => s.grstctl = value & !(GRSTCTL_CSRST | GRSTCTL_TXFFLSH | GRSTCTL_RXFFLSH),
            Reg::Gintsts => s.gintsts &= !value,
            Reg::Gintmsk => s.gintmsk = value,
            Reg::Grxfsiz => s.grxfsiz = value,
            Reg::Gnptxfsiz => s.gnptxfsiz = value,
            Reg::Hptxfsiz => s.hptxfsiz = value,
            Reg::Hcfg => s.hcfg = value,
            Reg::Hfnum | Reg::Haint => {}
            Reg::Haintmsk => s.haintmsk = value,
            Reg::Hprt0 => s.write_hprt0(value),
            Reg::Hcchar(ch) => s.write_hcchar(ch as usize, value),
            Reg::Hcsplt(ch) => s.channels[ch as usize].hcsplt = value,
            Reg::Hcint(ch) => s.channels[ch as usize].hcint &= !value,
            Reg::Hcintmsk(ch) => s.channels[ch as usize].hcintmsk = value,
            Reg::Hctsiz(ch) => s.channels[ch as usize].hctsiz = value,
            Reg::Hcdma(ch) => s.channels[ch as usize].hcdma = value,
        }
    }
}

impl Platform for MockHardware {
    fn clean_range(&self, addr: usize, len: usize) {
        self.state.borrow_mut().events.push(MockEvent::Clean(addr, len));
    }

    fn invalidate_range(&self, addr: usize, len: usize) {
        self.state.borrow_mut().events.push(MockEvent::Invalidate(addr, len));
    }

    fn memory_barrier(&self) {}

    fn bus_address(&self, addr: usize) -> u32 {
        let mut s = self.state.borrow_mut();
        let index = match s.dma.iter().position(|&base| base == addr) {
            Some(index) => index,
            None => {
                s.dma.push(addr);
                s.dma.len() - 1
            }
        };
        DMA_BUS_BASE + index as u32 * DMA_WINDOW
    }

    fn sleep_ms(&self, ms: u32) {
        self.state.borrow_mut().slept_ms += ms as u64;
    }

    fn sleep_us(&self, us: u32) {
        self.state.borrow_mut().slept_us += us as u64;
    }
}

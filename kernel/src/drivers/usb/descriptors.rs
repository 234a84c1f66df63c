//! USB Standard Descriptor Types
//!
//! Defines the standard USB descriptor structures used for device enumeration
//! and configuration, plus the hub class descriptor and port status words.
//! All parsing is bounds-checked against the slice it reads from.

/// USB Device Descriptor (18 bytes)
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

impl DeviceDescriptor {
    pub const SIZE: usize = 18;

    /// Offset of bMaxPacketSize0, readable from the first 8-byte fetch.
    pub const MAX_PACKET_OFFSET: usize = 7;

    /// Parse a full device descriptor.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[1] != descriptor_type::DEVICE {
            return None;
        }
        Some(Self {
            b_length: bytes[0],
            b_descriptor_type: bytes[1],
            bcd_usb: le16(bytes, 2),
            b_device_class: bytes[4],
            b_device_sub_class: bytes[5],
            b_device_protocol: bytes[6],
            b_max_packet_size0: bytes[7],
            id_vendor: le16(bytes, 8),
            id_product: le16(bytes, 10),
            bcd_device: le16(bytes, 12),
            i_manufacturer: bytes[14],
            i_product: bytes[15],
            i_serial_number: bytes[16],
            b_num_configurations: bytes[17],
        })
    }

    pub fn is_hub(&self) -> bool {
        self.b_device_class == class_code::HUB
    }
}

/// USB Configuration Descriptor (9 bytes, followed by interface/endpoint descriptors)
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct ConfigDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

impl ConfigDescriptor {
    pub const SIZE: usize = 9;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[1] != descriptor_type::CONFIGURATION {
            return None;
        }
        Some(Self {
            b_length: bytes[0],
            b_descriptor_type: bytes[1],
            w_total_length: le16(bytes, 2),
            b_num_interfaces: bytes[4],
            b_configuration_value: bytes[5],
            i_configuration: bytes[6],
            bm_attributes: bytes[7],
            b_max_power: bytes[8],
        })
    }
}

/// USB Interface Descriptor (9 bytes)
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct InterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

impl InterfaceDescriptor {
    pub const SIZE: usize = 9;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[1] != descriptor_type::INTERFACE {
            return None;
        }
        Some(Self {
            b_length: bytes[0],
            b_descriptor_type: bytes[1],
            b_interface_number: bytes[2],
            b_alternate_setting: bytes[3],
            b_num_endpoints: bytes[4],
            b_interface_class: bytes[5],
            b_interface_sub_class: bytes[6],
            b_interface_protocol: bytes[7],
            i_interface: bytes[8],
        })
    }

    /// HID interface speaking the boot keyboard protocol
    pub fn is_boot_keyboard(&self) -> bool {
        self.b_interface_class == class_code::HID
            && self.b_interface_sub_class == hid_subclass::BOOT
            && self.b_interface_protocol == hid_protocol::KEYBOARD
    }

    pub fn is_hub(&self) -> bool {
        self.b_interface_class == class_code::HUB
    }
}

/// USB Endpoint Descriptor (7 bytes)
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

impl EndpointDescriptor {
    pub const SIZE: usize = 7;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[1] != descriptor_type::ENDPOINT {
            return None;
        }
        Some(Self {
            b_length: bytes[0],
            b_descriptor_type: bytes[1],
            b_endpoint_address: bytes[2],
            bm_attributes: bytes[3],
            w_max_packet_size: le16(bytes, 4),
            b_interval: bytes[6],
        })
    }

    /// Get endpoint number (bits 3:0)
    pub fn endpoint_number(&self) -> u8 {
        self.b_endpoint_address & 0x0F
    }

    /// Check if this is an IN endpoint (bit 7 = 1)
    pub fn is_in(&self) -> bool {
        self.b_endpoint_address & 0x80 != 0
    }

    /// Get transfer type (bits 1:0 of bmAttributes)
    pub fn transfer_type(&self) -> u8 {
        self.bm_attributes & 0x03
    }

    /// Check if this is an interrupt endpoint
    pub fn is_interrupt(&self) -> bool {
        self.transfer_type() == 3
    }

    /// Max packet size without the high-bandwidth multiplier bits
    pub fn max_packet_size(&self) -> u16 {
        self.w_max_packet_size & 0x07FF
    }
}

/// USB Hub Class Descriptor (7 bytes minimum, variable-length port bitmaps follow)
#[derive(Clone, Copy, Debug)]
pub struct HubDescriptor {
    pub b_desc_length: u8,
    pub b_descriptor_type: u8,
    pub b_nbr_ports: u8,
    pub w_hub_characteristics: u16,
    /// Time from power-on to power-good, in 2 ms units
    pub b_pwr_on_2_pwr_good: u8,
    pub b_hub_contr_current: u8,
}

impl HubDescriptor {
    pub const MIN_SIZE: usize = 7;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::MIN_SIZE || bytes[1] != descriptor_type::HUB {
            return None;
        }
        Some(Self {
            b_desc_length: bytes[0],
            b_descriptor_type: bytes[1],
            b_nbr_ports: bytes[2],
            w_hub_characteristics: le16(bytes, 3),
            b_pwr_on_2_pwr_good: bytes[5],
            b_hub_contr_current: bytes[6],
        })
    }
}

/// Hub port status as returned by GET_PORT_STATUS (wPortStatus, wPortChange)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortStatus {
    pub status: u16,
    pub change: u16,
}

impl PortStatus {
    pub const SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            status: le16(bytes, 0),
            change: le16(bytes, 2),
        })
    }

    pub fn connected(&self) -> bool {
        self.status & port_status::CONNECTION != 0
    }

    pub fn enabled(&self) -> bool {
        self.status & port_status::ENABLE != 0
    }
}

/// USB Setup Packet (8 bytes)
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    /// Serialize in wire order (little-endian fields).
    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.w_value.to_le_bytes();
        let index = self.w_index.to_le_bytes();
        let length = self.w_length.to_le_bytes();
        [
            self.bm_request_type,
            self.b_request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: le16(bytes, 2),
            w_index: le16(bytes, 4),
            w_length: le16(bytes, 6),
        }
    }

    /// Device-to-host data stage (bmRequestType bit 7)
    pub fn is_in(&self) -> bool {
        self.bm_request_type & request_type::DIR_IN != 0
    }
}

/// Iterator over the sub-descriptors of a configuration descriptor.
///
/// Walks by each descriptor's bLength until the declared total length or the
/// buffer end, whichever comes first. A zero or truncated length ends the walk.
pub struct DescriptorIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> DescriptorIter<'a> {
    /// `bytes` is the whole configuration descriptor as fetched.
    pub fn new(bytes: &'a [u8]) -> Self {
        let end = match ConfigDescriptor::parse(bytes) {
            Some(cfg) => (cfg.w_total_length as usize).min(bytes.len()),
            None => 0,
        };
        Self {
            bytes: &bytes[..end],
            offset: if end == 0 { 0 } else { ConfigDescriptor::SIZE.min(end) },
        }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    /// (bDescriptorType, full descriptor bytes)
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.offset..)?;
        if rest.len() < 2 {
            return None;
        }
        let len = rest[0] as usize;
        if len < 2 || len > rest.len() {
            return None;
        }
        self.offset += len;
        Some((rest[1], &rest[..len]))
    }
}

fn le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// bmRequestType fields
pub mod request_type {
    pub const DIR_IN: u8 = 0x80;
    pub const DIR_OUT: u8 = 0x00;
    pub const TYPE_STANDARD: u8 = 0x00;
    pub const TYPE_CLASS: u8 = 0x20;
    pub const RECIPIENT_DEVICE: u8 = 0x00;
    pub const RECIPIENT_INTERFACE: u8 = 0x01;
    pub const RECIPIENT_OTHER: u8 = 0x03;
}

/// USB Descriptor Types
pub mod descriptor_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const HID: u8 = 0x21;
    pub const HUB: u8 = 0x29;
}

/// USB Class Codes
pub mod class_code {
    pub const HID: u8 = 0x03;
    pub const HUB: u8 = 0x09;
}

/// USB HID Subclass Codes
pub mod hid_subclass {
    pub const BOOT: u8 = 0x01;
}

/// USB HID Protocol Codes
pub mod hid_protocol {
    pub const KEYBOARD: u8 = 0x01;
    pub const MOUSE: u8 = 0x02;
}

/// USB Standard Requests
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_CONFIGURATION: u8 = 0x09;
}

/// USB HID Class Requests
pub mod hid_request {
    pub const SET_IDLE: u8 = 0x0A;
    pub const SET_PROTOCOL: u8 = 0x0B;
}

/// Hub port feature selectors (SET/CLEAR_PORT_FEATURE wValue)
pub mod port_feature {
    pub const CONNECTION: u16 = 0;
    pub const ENABLE: u16 = 1;
    pub const RESET: u16 = 4;
    pub const POWER: u16 = 8;
    pub const C_CONNECTION: u16 = 16;
    pub const C_ENABLE: u16 = 17;
    pub const C_RESET: u16 = 20;
}

/// wPortStatus bits
pub mod port_status {
    pub const CONNECTION: u16 = 1 << 0;
    pub const ENABLE: u16 = 1 << 1;
    pub const RESET: u16 = 1 << 4;
    pub const POWER: u16 = 1 << 8;
    pub const LOW_SPEED: u16 = 1 << 9;
    pub const HIGH_SPEED: u16 = 1 << 10;
}

/// wPortChange bits
pub mod port_change {
    pub const C_CONNECTION: u16 = 1 << 0;
    pub const C_ENABLE: u16 = 1 << 1;
    pub const C_RESET: u16 = 1 << 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(tail: &[u8]) -> [u8; 64] {
        let mut buf = [0u8; 64];
        let total = 9 + tail.len();
        buf[..9].copy_from_slice(&[9, 2, total as u8, 0, 1, 1, 0, 0xA0, 50]);
        buf[9..total].copy_from_slice(tail);
        buf
    }

    #[test]
    fn setup_packet_wire_order() {
        let setup = SetupPacket {
            bm_request_type: 0x80,
            b_request: request::GET_DESCRIPTOR,
            w_value: 0x0100,
            w_index: 0x0409,
            w_length: 18,
        };
        assert_eq!(setup.to_bytes(), [0x80, 0x06, 0x00, 0x01, 0x09, 0x04, 18, 0]);
        assert!(setup.is_in());
    }

    #[test]
    fn device_descriptor_rejects_short_or_wrong_type() {
        let mut raw = [0u8; 18];
        raw[0] = 18;
        raw[1] = descriptor_type::DEVICE;
        raw[4] = class_code::HUB;
        raw[7] = 64;
        let desc = DeviceDescriptor::parse(&raw).unwrap();
        assert!(desc.is_hub());
        assert_eq!({ desc.b_max_packet_size0 }, 64);

        assert!(DeviceDescriptor::parse(&raw[..8]).is_none());
        raw[1] = descriptor_type::CONFIGURATION;
        assert!(DeviceDescriptor::parse(&raw).is_none());
    }

    #[test]
    fn descriptor_walk_stops_at_total_length() {
        // interface + endpoint, then trailing garbage past wTotalLength
        let buf = config_with(&[
            9, 4, 0, 0, 1, 3, 1, 1, 0, //
            7, 5, 0x81, 3, 8, 0, 10,
        ]);
        let kinds: alloc::vec::Vec<u8> = DescriptorIter::new(&buf).map(|(t, _)| t).collect();
        assert_eq!(kinds, [descriptor_type::INTERFACE, descriptor_type::ENDPOINT]);
    }

    #[test]
    fn descriptor_walk_stops_on_zero_length() {
        let buf = config_with(&[0, 4, 0, 0]);
        assert_eq!(DescriptorIter::new(&buf).count(), 0);
    }

    #[test]
    fn descriptor_walk_clamps_to_buffer() {
        let mut buf = config_with(&[9, 4, 0, 0, 1, 3, 1, 1, 0]);
        // claim far more than we fetched
        buf[2] = 0xFF;
        buf[3] = 0x01;
        let count = DescriptorIter::new(&buf[..18]).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn port_status_bits() {
        let status = PortStatus::parse(&[0x03, 0x01, 0x10, 0x00]).unwrap();
        assert!(status.connected());
        assert!(status.enabled());
        assert_eq!(status.change, port_change::C_RESET);
        assert!(PortStatus::parse(&[0, 0]).is_none());
    }

    #[test]
    fn endpoint_helpers() {
        let ep = EndpointDescriptor::parse(&[7, 5, 0x81, 0x03, 0x08, 0x18, 10]).unwrap();
        assert!(ep.is_in());
        assert!(ep.is_interrupt());
        assert_eq!(ep.endpoint_number(), 1);
        assert_eq!(ep.max_packet_size(), 8);
    }
}

//! USB Request Builder
//!
//! Maps the standard, hub and HID class requests this host issues to
//! [`SetupPacket`]s. Every function is pure; the only validation is the
//! range check on device addresses.

use super::descriptors::{
    descriptor_type, hid_request, request, request_type, PortStatus, SetupPacket,
};
use super::error::{Result, UsbError};

/// Highest assignable USB device address
pub const MAX_ADDRESS: u8 = 127;

/// HID boot protocol value for SET_PROTOCOL
pub const HID_PROTOCOL_BOOT: u16 = 0;

const DEVICE_IN: u8 = request_type::DIR_IN | request_type::TYPE_STANDARD | request_type::RECIPIENT_DEVICE;
const DEVICE_OUT: u8 = request_type::DIR_OUT | request_type::TYPE_STANDARD | request_type::RECIPIENT_DEVICE;
const HUB_CLASS_IN: u8 = request_type::DIR_IN | request_type::TYPE_CLASS | request_type::RECIPIENT_DEVICE;
const PORT_CLASS_IN: u8 = request_type::DIR_IN | request_type::TYPE_CLASS | request_type::RECIPIENT_OTHER;
const PORT_CLASS_OUT: u8 = request_type::DIR_OUT | request_type::TYPE_CLASS | request_type::RECIPIENT_OTHER;
const INTERFACE_CLASS_OUT: u8 =
    request_type::DIR_OUT | request_type::TYPE_CLASS | request_type::RECIPIENT_INTERFACE;

/// GET_DESCRIPTOR(Device), first `length` bytes
pub fn get_device_descriptor(length: u16) -> SetupPacket {
    get_descriptor(DEVICE_IN, descriptor_type::DEVICE, 0, length)
}

/// GET_DESCRIPTOR(Configuration `index`)
pub fn get_config_descriptor(index: u8, length: u16) -> SetupPacket {
    get_descriptor(DEVICE_IN, descriptor_type::CONFIGURATION, index, length)
}

/// Hub class GET_DESCRIPTOR(Hub)
pub fn get_hub_descriptor(length: u16) -> SetupPacket {
    get_descriptor(HUB_CLASS_IN, descriptor_type::HUB, 0, length)
}

fn get_descriptor(bm_request_type: u8, kind: u8, index: u8, length: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type,
        b_request: request::GET_DESCRIPTOR,
        w_value: (kind as u16) << 8 | index as u16,
        w_index: 0,
        w_length: length,
    }
}

/// SET_ADDRESS; rejects anything above 127. Address 0 returns the device
/// to the default state; the registry never hands it out.
pub fn set_address(address: u8) -> Result<SetupPacket> {
    if address > MAX_ADDRESS {
        return Err(UsbError::InvalidAddress);
    }
    Ok(SetupPacket {
        bm_request_type: DEVICE_OUT,
        b_request: request::SET_ADDRESS,
        w_value: address as u16,
        w_index: 0,
        w_length: 0,
    })
}

pub fn set_configuration(value: u8) -> SetupPacket {
    SetupPacket {
        bm_request_type: DEVICE_OUT,
        b_request: request::SET_CONFIGURATION,
        w_value: value as u16,
        w_index: 0,
        w_length: 0,
    }
}

/// Hub GET_STATUS on a port; answers with a 4-byte [`PortStatus`]
pub fn get_port_status(port: u8) -> SetupPacket {
    SetupPacket {
        bm_request_type: PORT_CLASS_IN,
        b_request: request::GET_STATUS,
        w_value: 0,
        w_index: port as u16,
        w_length: PortStatus::SIZE as u16,
    }
}

pub fn set_port_feature(port: u8, feature: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type: PORT_CLASS_OUT,
        b_request: request::SET_FEATURE,
        w_value: feature,
        w_index: port as u16,
        w_length: 0,
    }
}

pub fn clear_port_feature(port: u8, feature: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type: PORT_CLASS_OUT,
        b_request: request::CLEAR_FEATURE,
        w_value: feature,
        w_index: port as u16,
        w_length: 0,
    }
}

/// HID SET_PROTOCOL on `interface` (0 = boot, 1 = report)
pub fn hid_set_protocol(interface: u8, protocol: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type: INTERFACE_CLASS_OUT,
        b_request: hid_request::SET_PROTOCOL,
        w_value: protocol,
        w_index: interface as u16,
        w_length: 0,
    }
}

/// HID SET_IDLE; `duration` in 4 ms units, 0 = report only on change
pub fn hid_set_idle(interface: u8, duration: u8) -> SetupPacket {
    SetupPacket {
        bm_request_type: INTERFACE_CLASS_OUT,
        b_request: hid_request::SET_IDLE,
        w_value: (duration as u16) << 8,
        w_index: interface as u16,
        w_length: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::descriptors::port_feature;

    fn round_trip(setup: SetupPacket) -> SetupPacket {
        SetupPacket::from_bytes(&setup.to_bytes())
    }

    #[test]
    fn every_request_survives_the_wire() {
        let built = [
            get_device_descriptor(8),
            get_device_descriptor(18),
            get_config_descriptor(0, 256),
            get_hub_descriptor(9),
            set_address(0).unwrap(),
            set_address(1).unwrap(),
            set_address(127).unwrap(),
            set_configuration(1),
            get_port_status(4),
            set_port_feature(2, port_feature::POWER),
            set_port_feature(2, port_feature::RESET),
            clear_port_feature(3, port_feature::C_RESET),
            hid_set_protocol(0, HID_PROTOCOL_BOOT),
            hid_set_idle(1, 0),
        ];
        for setup in built {
            let parsed = round_trip(setup);
            assert_eq!({ parsed.bm_request_type }, { setup.bm_request_type });
            assert_eq!({ parsed.b_request }, { setup.b_request });
            assert_eq!({ parsed.w_value }, { setup.w_value });
            assert_eq!({ parsed.w_index }, { setup.w_index });
            assert_eq!({ parsed.w_length }, { setup.w_length });
        }
    }

    #[test]
    fn request_encodings() {
        assert_eq!(
            get_device_descriptor(8).to_bytes(),
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00]
        );
        assert_eq!(
            get_hub_descriptor(9).to_bytes(),
            [0xA0, 0x06, 0x00, 0x29, 0x00, 0x00, 0x09, 0x00]
        );
        assert_eq!(
            get_port_status(3).to_bytes(),
            [0xA3, 0x00, 0x00, 0x00, 0x03, 0x00, 0x04, 0x00]
        );
        assert_eq!(
            set_port_feature(1, port_feature::RESET).to_bytes(),
            [0x23, 0x03, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            hid_set_protocol(2, HID_PROTOCOL_BOOT).to_bytes(),
            [0x21, 0x0B, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn set_address_range() {
        assert_eq!({ set_address(0).unwrap().w_value }, 0);
        assert_eq!(set_address(128), Err(UsbError::InvalidAddress));
        assert_eq!(set_address(255), Err(UsbError::InvalidAddress));
        assert_eq!({ set_address(5).unwrap().w_value }, 5);
    }
}

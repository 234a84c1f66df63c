//! Hub port bring-up.
//!
//! Ports are powered, reset and enumerated one at a time in ascending order.
//! A failure on one port is logged and the walk moves on to the next.
//! Devices behind a high-speed hub need split transactions, which this host
//! doesn't issue; such ports enumerate only if the hub forwards them as-is.

use super::control::DeviceTarget;
use super::regs::{Dwc2Registers, UsbSpeed};
use super::Dwc2Host;
use crate::arch_impl::Platform;
use crate::drivers::usb::descriptors::{port_feature, port_status, HubDescriptor, PortStatus};
use crate::drivers::usb::error::{Result, UsbError};
use crate::drivers::usb::request;

/// Hub descriptor fetch size; covers the port bitmaps of a 7+ port hub
const HUB_DESCRIPTOR_SIZE: usize = 16;

/// Speed of the device behind a hub port
fn port_speed(status: &PortStatus) -> UsbSpeed {
    if status.status & port_status::LOW_SPEED != 0 {
        UsbSpeed::Low
    } else if status.status & port_status::HIGH_SPEED != 0 {
        UsbSpeed::High
    } else {
        UsbSpeed::Full
    }
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Bring up every downstream port of `hub`, which sits `depth` levels
    /// below the root port.
    pub(crate) fn enumerate_hub(&self, hub: DeviceTarget, depth: u8) -> Result<()> {
        if depth >= self.config.max_hub_depth {
            log::warn!("usb: hub {} exceeds nesting limit {}", hub.address, self.config.max_hub_depth);
            return Err(UsbError::HubDepthExceeded);
        }

        let mut raw = [0u8; HUB_DESCRIPTOR_SIZE];
        let n = self.control_transfer(
            hub,
            request::get_hub_descriptor(HUB_DESCRIPTOR_SIZE as u16),
            Some(&mut raw),
        )?;
        let descriptor = HubDescriptor::parse(&raw[..n]).ok_or(UsbError::InvalidDescriptor)?;
        let ports = descriptor.b_nbr_ports;

        if let Some(record) = self.registry.lock().find_mut(hub.address) {
            record.is_hub = true;
            record.hub_ports = ports;
        }
        log::info!("usb: hub {} has {} port(s)", hub.address, ports);

        for port in 1..=ports {
            match self.bring_up_port(hub, port, depth) {
                Ok(Some(address)) => {
                    log::info!("usb: hub {} port {} -> device {}", hub.address, port, address)
                }
                Ok(None) => {}
                Err(e) => log::warn!("usb: hub {} port {} failed: {}", hub.address, port, e),
            }
        }
        Ok(())
    }

    fn port_status(&self, hub: DeviceTarget, port: u8) -> Result<PortStatus> {
        let mut raw = [0u8; PortStatus::SIZE];
        let n = self.control_transfer(hub, request::get_port_status(port), Some(&mut raw))?;
        PortStatus::parse(&raw[..n]).ok_or(UsbError::InvalidDescriptor)
    }

    /// Power, reset and enumerate one port. `Ok(None)` means nothing usable
    /// is attached.
    fn bring_up_port(&self, hub: DeviceTarget, port: u8, depth: u8) -> Result<Option<u8>> {
        self.control_transfer(hub, request::set_port_feature(port, port_feature::POWER), None)?;
        self.platform.sleep_ms(self.config.port_power_good_ms);

        let status = self.port_status(hub, port)?;
        if !status.connected() {
            return Ok(None);
        }

        self.control_transfer(hub, request::set_port_feature(port, port_feature::RESET), None)?;
        self.platform.sleep_ms(self.config.port_reset_ms);

        let status = self.port_status(hub, port)?;
        self.control_transfer(hub, request::clear_port_feature(port, port_feature::C_RESET), None)?;
        if !status.enabled() {
            log::warn!("usb: hub {} port {} not enabled after reset", hub.address, port);
            return Ok(None);
        }

        let speed = port_speed(&status);
        self.platform.sleep_ms(self.config.port_recovery_ms);
        self.enumerate_device(hub.address, port, speed, depth + 1).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::descriptors::request as std_request;
    use crate::drivers::usb::dwc2::mock::{MockDevice, MockHardware};
    use crate::drivers::usb::dwc2::HostConfig;

    fn host(hw: &MockHardware) -> Dwc2Host<&MockHardware, &MockHardware> {
        Dwc2Host::new(hw, hw, HostConfig::DEFAULT.with_poll_iterations(16))
    }

    /// Device descriptor fetches sent to address 0, one per enumeration
    fn default_address_fetches(hw: &MockHardware) -> usize {
        hw.requests()
            .iter()
            .filter(|(addr, setup)| *addr == 0 && setup.b_request == std_request::GET_DESCRIPTOR)
            .count()
    }

    #[test]
    fn test_port_speed_bits() {
        let low = PortStatus {
            status: port_status::CONNECTION | port_status::LOW_SPEED,
            change: 0,
        };
        let high = PortStatus {
            status: port_status::CONNECTION | port_status::HIGH_SPEED,
            change: 0,
        };
        assert_eq!(port_speed(&low), UsbSpeed::Low);
        assert_eq!(port_speed(&high), UsbSpeed::High);
        assert_eq!(port_speed(&PortStatus::default()), UsbSpeed::Full);
    }

    #[test]
    fn test_hub_enumerates_occupied_ports_in_order() {
        let hw = MockHardware::new();
        let hub = hw.attach_root(MockDevice::hub(4));
        let on_two = hw.attach_to_hub(hub, 2, MockDevice::generic(UsbSpeed::Full));
        let on_four = hw.attach_to_hub(hub, 4, MockDevice::keyboard(UsbSpeed::Low));
        let host = host(&hw);

        host.enumerate_root_device().unwrap();

        // hub itself plus ports 2 and 4
        assert_eq!(default_address_fetches(&hw), 3);
        assert_eq!(hw.device_address(hub), Some(1));
        assert_eq!(hw.device_address(on_two), Some(2));
        assert_eq!(hw.device_address(on_four), Some(3));

        let devices = host.devices();
        assert_eq!(devices.len(), 3);
        assert!(devices[0].is_hub);
        assert_eq!(devices[0].hub_ports, 4);
        assert_eq!((devices[1].parent_address, devices[1].parent_port), (1, 2));
        assert_eq!((devices[2].parent_address, devices[2].parent_port), (1, 4));
        assert_eq!(devices[2].speed, UsbSpeed::Low);

        assert_eq!(host.keyboard().map(|k| k.address), Some(3));
        // every port was powered, only occupied ones were reset
        assert!(hw.port_status(hub, 1).status & port_status::POWER != 0);
        assert!(hw.port_status(hub, 1).status & port_status::ENABLE == 0);
        assert_eq!(hw.port_status(hub, 2).change & crate::drivers::usb::descriptors::port_change::C_RESET, 0);
    }

    #[test]
    fn test_failed_port_does_not_stop_siblings() {
        let hw = MockHardware::new();
        let hub = hw.attach_root(MockDevice::hub(3));
        let mut broken = MockDevice::generic(UsbSpeed::Full);
        broken.stall_requests = alloc::vec![std_request::SET_CONFIGURATION];
        hw.attach_to_hub(hub, 1, broken);
        let good = hw.attach_to_hub(hub, 3, MockDevice::generic(UsbSpeed::Full));
        let host = host(&hw);

        host.enumerate_root_device().unwrap();

        assert_eq!(hw.device_configuration(good), 1);
        assert_eq!(host.devices().len(), 3);
    }

    #[test]
    fn test_full_registry_skips_device_but_keeps_walking_ports() {
        use crate::drivers::usb::dwc2::MAX_DEVICES;

        let hw = MockHardware::new();
        let hub = hw.attach_root(MockDevice::hub(18));
        let mut attached = alloc::vec::Vec::new();
        for port in 1..=16 {
            attached.push(hw.attach_to_hub(hub, port, MockDevice::generic(UsbSpeed::Full)));
        }
        let last = hw.attach_to_hub(hub, 18, MockDevice::generic(UsbSpeed::Full));
        let host = host(&hw);

        assert_eq!(host.enumerate_root_device(), Ok(()));

        // hub plus ports 1..=15 fill the registry
        assert_eq!(host.devices().len(), MAX_DEVICES);
        assert_eq!(default_address_fetches(&hw), MAX_DEVICES);
        assert_eq!(hw.device_address(attached[14]), Some(MAX_DEVICES as u8));
        // reset back to the default address, never assigned one
        assert_eq!(hw.device_address(attached[15]), Some(0));
        assert_eq!(hw.device_configuration(attached[15]), 0);

        // ports after the overflow are still powered and probed
        assert_ne!(hw.port_status(hub, 17).status & port_status::POWER, 0);
        let tail = hw.port_status(hub, 18).status;
        assert_ne!(tail & port_status::POWER, 0);
        assert_ne!(tail & port_status::ENABLE, 0);
        assert_eq!(hw.device_address(last), Some(0));
        assert_eq!(hw.device_configuration(last), 0);
    }

    #[test]
    fn test_nested_hubs_are_bounded() {
        let hw = MockHardware::new();
        let outer = hw.attach_root(MockDevice::hub(1));
        let inner = hw.attach_to_hub(outer, 1, MockDevice::hub(1));
        let leaf = hw.attach_to_hub(inner, 1, MockDevice::generic(UsbSpeed::Full));
        let host = Dwc2Host::new(
            &hw,
            &hw,
            HostConfig::DEFAULT.with_poll_iterations(16).with_max_hub_depth(1),
        );

        host.enumerate_root_device().unwrap();

        // inner hub is addressed but its ports are never walked
        assert_eq!(hw.device_address(inner), Some(2));
        assert_eq!(hw.device_address(leaf), None);
    }

    #[test]
    fn test_empty_hub() {
        let hw = MockHardware::new();
        hw.attach_root(MockDevice::hub(2));
        let host = host(&hw);

        host.enumerate_root_device().unwrap();

        assert_eq!(default_address_fetches(&hw), 1);
        assert_eq!(host.devices().len(), 1);
    }
}

//! Device enumeration and the device registry.

use super::control::DeviceTarget;
use super::regs::{bits::*, Dwc2Registers, UsbSpeed};
use super::Dwc2Host;
use crate::arch_impl::Platform;
use crate::drivers::usb::descriptors::{
    descriptor_type, ConfigDescriptor, DescriptorIter, DeviceDescriptor, EndpointDescriptor,
    InterfaceDescriptor,
};
use crate::drivers::usb::error::{Result, UsbError};
use crate::drivers::usb::request::{self, HID_PROTOCOL_BOOT, MAX_ADDRESS};

/// Registry capacity
pub const MAX_DEVICES: usize = 16;

/// Configuration descriptor fetch size
const CONFIG_BUFFER_SIZE: usize = 256;

/// An enumerated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDevice {
    pub address: u8,
    pub speed: UsbSpeed,
    /// Endpoint 0 max packet size
    pub max_packet_size: u16,
    /// 0 for the device on the root port
    pub parent_address: u8,
    /// 0 for the device on the root port
    pub parent_port: u8,
    pub is_hub: bool,
    pub hub_ports: u8,
}

impl UsbDevice {
    const EMPTY: UsbDevice = UsbDevice {
        address: 0,
        speed: UsbSpeed::Full,
        max_packet_size: 0,
        parent_address: 0,
        parent_port: 0,
        is_hub: false,
        hub_ports: 0,
    };

    pub fn target(&self) -> DeviceTarget {
        DeviceTarget {
            address: self.address,
            speed: self.speed,
            max_packet_size: self.max_packet_size,
        }
    }
}

/// The boot keyboard's interrupt-IN endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardEndpoint {
    pub address: u8,
    pub speed: UsbSpeed,
    pub interface: u8,
    /// Endpoint number without the direction bit
    pub endpoint: u8,
    pub max_packet_size: u16,
    /// bInterval as reported by the device
    pub interval: u8,
}

/// Fixed-capacity record of enumerated devices. Reset only by a full
/// re-enumeration; addresses are handed out monotonically.
pub(crate) struct DeviceRegistry {
    devices: [UsbDevice; MAX_DEVICES],
    count: usize,
    next_address: u8,
    keyboard: Option<KeyboardEndpoint>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: [UsbDevice::EMPTY; MAX_DEVICES],
            count: 0,
            next_address: 1,
            keyboard: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_full(&self) -> bool {
        self.count >= MAX_DEVICES
    }

    pub fn allocate_address(&mut self) -> Result<u8> {
        if self.next_address > MAX_ADDRESS {
            return Err(UsbError::RegistryFull);
        }
        let address = self.next_address;
        self.next_address += 1;
        Ok(address)
    }

    pub fn record(&mut self, device: UsbDevice) -> Result<()> {
        if self.is_full() {
            return Err(UsbError::RegistryFull);
        }
        self.devices[self.count] = device;
        self.count += 1;
        Ok(())
    }

    pub fn devices(&self) -> &[UsbDevice] {
        &self.devices[..self.count]
    }

    pub fn find_mut(&mut self, address: u8) -> Option<&mut UsbDevice> {
        self.devices[..self.count].iter_mut().find(|d| d.address == address)
    }

    pub fn keyboard(&self) -> Option<KeyboardEndpoint> {
        self.keyboard
    }

    /// Record the keyboard unless one is already known.
    pub fn set_keyboard(&mut self, keyboard: KeyboardEndpoint) -> bool {
        if self.keyboard.is_some() {
            return false;
        }
        self.keyboard = Some(keyboard);
        true
    }
}

/// What the configuration walk found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ConfigSummary {
    configuration_value: u8,
    has_hub_interface: bool,
    /// (interface number, first interrupt-IN endpoint) of a boot keyboard
    keyboard: Option<(u8, EndpointDescriptorInfo)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointDescriptorInfo {
    number: u8,
    max_packet_size: u16,
    interval: u8,
}

/// Walk a configuration descriptor's interfaces and endpoints.
fn scan_configuration(bytes: &[u8]) -> Result<ConfigSummary> {
    let config = ConfigDescriptor::parse(bytes).ok_or(UsbError::InvalidDescriptor)?;
    let mut summary = ConfigSummary {
        configuration_value: config.b_configuration_value,
        ..ConfigSummary::default()
    };
    let mut keyboard_interface = None;

    for (kind, raw) in DescriptorIter::new(bytes) {
        match kind {
            descriptor_type::INTERFACE => {
                let Some(iface) = InterfaceDescriptor::parse(raw) else {
                    continue;
                };
                if iface.is_hub() {
                    summary.has_hub_interface = true;
                }
                keyboard_interface = iface.is_boot_keyboard().then_some(iface.b_interface_number);
            }
            descriptor_type::ENDPOINT => {
                let (Some(interface), None) = (keyboard_interface, summary.keyboard) else {
                    continue;
                };
                let Some(ep) = EndpointDescriptor::parse(raw) else {
                    continue;
                };
                if ep.is_in() && ep.is_interrupt() {
                    summary.keyboard = Some((
                        interface,
                        EndpointDescriptorInfo {
                            number: ep.endpoint_number(),
                            max_packet_size: ep.max_packet_size(),
                            interval: ep.b_interval,
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    Ok(summary)
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Enumerate whatever is attached to the root port, descending into hubs.
    ///
    /// Clears the registry first. The root port must already be enabled
    /// (see `init_host`).
    pub fn enumerate_root_device(&self) -> Result<()> {
        let hprt = self.regs.hprt0();
        if hprt & HPRT_CONN_STS == 0 || hprt & HPRT_ENA == 0 {
            log::warn!("usb: root port not enabled (HPRT0={:#010x})", hprt);
            return Err(UsbError::PortDisabled);
        }
        let speed = UsbSpeed::from_hprt(hprt);
        self.root_speed.store(speed as u8, core::sync::atomic::Ordering::Relaxed);

        self.detach_keyboard();
        self.registry.lock().reset();

        let address = self.enumerate_device(0, 0, speed, 0)?;
        let count = self.registry.lock().devices().len();
        log::info!(
            "usb: enumeration complete, root device at address {}, {} device(s)",
            address,
            count
        );
        Ok(())
    }

    /// Enumerate the device answering at address 0 below `parent_address`
    /// port `parent_port`. Returns its new address.
    pub(crate) fn enumerate_device(
        &self,
        parent_address: u8,
        parent_port: u8,
        speed: UsbSpeed,
        depth: u8,
    ) -> Result<u8> {
        if self.registry.lock().is_full() {
            log::warn!("usb: registry full, skipping device on {}:{}", parent_address, parent_port);
            return Err(UsbError::RegistryFull);
        }

        // First 8 bytes at address 0 give bMaxPacketSize0
        let default = DeviceTarget::default_address(speed);
        let mut desc = [0u8; DeviceDescriptor::SIZE];
        let n = self.control_transfer(default, request::get_device_descriptor(8), Some(&mut desc[..8]))?;
        if n < 8 {
            return Err(UsbError::InvalidDescriptor);
        }
        let max_packet_size = match desc[DeviceDescriptor::MAX_PACKET_OFFSET] {
            mps @ (8 | 16 | 32 | 64) => mps as u16,
            _ => default.max_packet_size,
        };

        let address = self.registry.lock().allocate_address()?;
        let addressing = DeviceTarget {
            max_packet_size,
            ..default
        };
        self.control_transfer(addressing, request::set_address(address)?, None)?;
        self.platform.sleep_ms(self.config.set_address_settle_ms);

        let target = DeviceTarget {
            address,
            speed,
            max_packet_size,
        };
        self.registry.lock().record(UsbDevice {
            address,
            speed,
            max_packet_size,
            parent_address,
            parent_port,
            is_hub: false,
            hub_ports: 0,
        })?;

        let n = self.control_transfer(
            target,
            request::get_device_descriptor(DeviceDescriptor::SIZE as u16),
            Some(&mut desc),
        )?;
        let device = DeviceDescriptor::parse(&desc[..n]).ok_or(UsbError::InvalidDescriptor)?;
        log::debug!(
            "usb: device {} id {:04x}:{:04x} class {:#04x} mps0 {}",
            address,
            { device.id_vendor },
            { device.id_product },
            { device.b_device_class },
            max_packet_size
        );

        let mut config = [0u8; CONFIG_BUFFER_SIZE];
        let n = self.control_transfer(
            target,
            request::get_config_descriptor(0, CONFIG_BUFFER_SIZE as u16),
            Some(&mut config),
        )?;
        let summary = scan_configuration(&config[..n])?;
        let is_hub = device.is_hub() || summary.has_hub_interface;

        self.control_transfer(target, request::set_configuration(summary.configuration_value), None)?;
        self.platform.sleep_ms(self.config.set_address_settle_ms);

        if let Some((interface, ep)) = summary.keyboard {
            self.configure_keyboard(KeyboardEndpoint {
                address,
                speed,
                interface,
                endpoint: ep.number,
                max_packet_size: ep.max_packet_size,
                interval: ep.interval,
            });
        }

        if is_hub {
            self.enumerate_hub(target, depth)?;
        }

        Ok(address)
    }

    /// Record the keyboard and put it in boot protocol. The class requests
    /// are best effort; many keyboards boot in boot protocol anyway.
    fn configure_keyboard(&self, keyboard: KeyboardEndpoint) {
        if !self.registry.lock().set_keyboard(keyboard) {
            log::info!("usb: ignoring additional keyboard at address {}", keyboard.address);
            return;
        }

        let target = match self.registry.lock().find_mut(keyboard.address) {
            Some(device) => device.target(),
            None => return,
        };
        if let Err(e) =
            self.control_transfer(target, request::hid_set_protocol(keyboard.interface, HID_PROTOCOL_BOOT), None)
        {
            log::warn!("usb: keyboard {} SET_PROTOCOL failed: {}", keyboard.address, e);
        }
        if let Err(e) = self.control_transfer(target, request::hid_set_idle(keyboard.interface, 0), None) {
            log::warn!("usb: keyboard {} SET_IDLE failed: {}", keyboard.address, e);
        }

        self.keyboard.attach(&keyboard);
        log::info!(
            "usb: keyboard at address {} endpoint {} (mps {}, interval {})",
            keyboard.address,
            keyboard.endpoint,
            keyboard.max_packet_size,
            keyboard.interval
        );
    }

    /// Copy of the registry, in enumeration order.
    pub fn devices(&self) -> alloc::vec::Vec<UsbDevice> {
        self.registry.lock().devices().to_vec()
    }

    /// The recorded keyboard, if one was found and is still attached.
    pub fn keyboard(&self) -> Option<KeyboardEndpoint> {
        if !self.keyboard.is_online() {
            return None;
        }
        self.registry.lock().keyboard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::dwc2::mock::{MockDevice, MockHardware, OUTCOME_STALL};
    use crate::drivers::usb::dwc2::regs::CONTROL_CHANNEL;
    use crate::drivers::usb::dwc2::HostConfig;

    fn host(hw: &MockHardware) -> Dwc2Host<&MockHardware, &MockHardware> {
        Dwc2Host::new(hw, hw, HostConfig::DEFAULT.with_poll_iterations(16))
    }

    #[test]
    fn test_scan_finds_boot_keyboard_endpoint() {
        let config = MockDevice::keyboard(UsbSpeed::Low).config_descriptor;
        let summary = scan_configuration(&config).unwrap();
        assert_eq!(summary.configuration_value, 1);
        assert!(!summary.has_hub_interface);
        assert_eq!(
            summary.keyboard,
            Some((
                0,
                EndpointDescriptorInfo {
                    number: 1,
                    max_packet_size: 8,
                    interval: 10
                }
            ))
        );
    }

    #[test]
    fn test_scan_ignores_endpoints_of_other_interfaces() {
        let mut config = MockDevice::generic(UsbSpeed::Full).config_descriptor;
        config.extend_from_slice(&[7, descriptor_type::ENDPOINT, 0x81, 0x03, 8, 0, 10]);
        let total = config.len() as u8;
        config[2] = total;
        let summary = scan_configuration(&config).unwrap();
        assert_eq!(summary.keyboard, None);
    }

    #[test]
    fn test_scan_rejects_garbage() {
        assert_eq!(scan_configuration(&[1, 2, 3]), Err(UsbError::InvalidDescriptor));
    }

    #[test]
    fn test_registry_addresses_are_monotonic_and_bounded() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.allocate_address(), Ok(1));
        assert_eq!(registry.allocate_address(), Ok(2));
        registry.next_address = MAX_ADDRESS;
        assert_eq!(registry.allocate_address(), Ok(MAX_ADDRESS));
        assert_eq!(registry.allocate_address(), Err(UsbError::RegistryFull));
    }

    #[test]
    fn test_registry_capacity() {
        let mut registry = DeviceRegistry::new();
        for i in 0..MAX_DEVICES {
            let device = UsbDevice {
                address: i as u8 + 1,
                ..UsbDevice::EMPTY
            };
            assert!(registry.record(device).is_ok());
        }
        assert!(registry.is_full());
        assert_eq!(registry.record(UsbDevice::EMPTY), Err(UsbError::RegistryFull));
        registry.reset();
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn test_enumerate_keyboard_on_root_port() {
        let hw = MockHardware::new();
        let kbd = hw.attach_root(MockDevice::keyboard(UsbSpeed::Low));
        let host = host(&hw);

        host.enumerate_root_device().unwrap();

        assert_eq!(hw.device_address(kbd), Some(1));
        assert_eq!(hw.device_configuration(kbd), 1);
        assert_eq!(hw.hid_settings(kbd), (Some(0), Some(0)));

        let devices = host.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, 1);
        assert_eq!(devices[0].speed, UsbSpeed::Low);
        assert_eq!(devices[0].max_packet_size, 8);
        assert!(!devices[0].is_hub);

        let keyboard = host.keyboard().unwrap();
        assert_eq!(keyboard.address, 1);
        assert_eq!(keyboard.endpoint, 1);
        assert_eq!(keyboard.interval, 10);
    }

    #[test]
    fn test_hid_setup_failure_is_not_fatal() {
        let hw = MockHardware::new();
        let mut device = MockDevice::keyboard(UsbSpeed::Full);
        device.stall_requests = alloc::vec![0x0A, 0x0B];
        hw.attach_root(device);
        let host = host(&hw);

        host.enumerate_root_device().unwrap();

        assert!(host.keyboard().is_some());
    }

    #[test]
    fn test_enumeration_requires_enabled_port() {
        let hw = MockHardware::new();
        hw.set_root_disconnected();
        let host = host(&hw);

        assert_eq!(host.enumerate_root_device(), Err(UsbError::PortDisabled));
        assert_eq!(hw.enables(CONTROL_CHANNEL), 0);
    }

    #[test]
    fn test_stalled_descriptor_aborts_device() {
        let hw = MockHardware::new();
        hw.attach_root(MockDevice::generic(UsbSpeed::Full));
        hw.inject(CONTROL_CHANNEL, OUTCOME_STALL);
        let host = host(&hw);

        assert_eq!(host.enumerate_root_device(), Err(UsbError::Stall));
        assert!(host.devices().is_empty());
    }

    #[test]
    fn test_high_speed_root_device() {
        let hw = MockHardware::new();
        let dev = hw.attach_root(MockDevice::generic(UsbSpeed::High));
        let host = host(&hw);

        host.enumerate_root_device().unwrap();
        assert_eq!(hw.device_address(dev), Some(1));
        assert_eq!(host.devices()[0].speed, UsbSpeed::High);
    }
}

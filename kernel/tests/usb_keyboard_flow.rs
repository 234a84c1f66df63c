//! End-to-end keyboard flow against the in-memory DWC2 core: bring-up,
//! enumeration through a hub, interrupt-driven polling and key decoding.

use kernel::drivers::usb::dwc2::mock::{
    MockDevice, MockHardware, OUTCOME_COMPLETE, OUTCOME_NAK, OUTCOME_XACTERR,
};
use kernel::drivers::usb::dwc2::regs::KEYBOARD_CHANNEL;
use kernel::drivers::usb::dwc2::{Dwc2Host, HostConfig, RecoveryState, UsbSpeed};
use kernel::drivers::usb::hid::{KeyboardDecoder, Modifiers};
use kernel::drivers::usb::UsbError;

type Host<'a> = Dwc2Host<&'a MockHardware, &'a MockHardware>;

fn keyboard_behind_hub(hw: &MockHardware) -> Host<'_> {
    let hub = hw.attach_root(MockDevice::hub(4));
    hw.attach_to_hub(hub, 3, MockDevice::keyboard(UsbSpeed::Low));

    let host = Dwc2Host::new(hw, hw, HostConfig::DEFAULT.with_poll_iterations(64));
    assert_eq!(host.init_host(), Ok(UsbSpeed::Full));
    host.enumerate_root_device().expect("enumeration");
    host.start_keyboard_polling().expect("keyboard present");
    host
}

fn deliver(hw: &MockHardware, host: &Host<'_>, report: [u8; 8]) {
    hw.complete_channel(KEYBOARD_CHANNEL, OUTCOME_COMPLETE, &report);
    host.irq_handler();
}

#[test]
fn typed_keys_reach_the_decoder() {
    let hw = MockHardware::new();
    let host = keyboard_behind_hub(&hw);

    let devices = host.devices();
    assert_eq!(devices.len(), 2);
    assert!(devices[0].is_hub);
    assert_eq!((devices[1].parent_address, devices[1].parent_port), (1, 3));
    let keyboard = host.keyboard().expect("keyboard recorded");
    assert_eq!(keyboard.address, 2);
    assert_eq!(keyboard.speed, UsbSpeed::Low);

    // "Hi"
    deliver(&hw, &host, [Modifiers::LEFT_SHIFT, 0, 0x0B, 0, 0, 0, 0, 0]);
    deliver(&hw, &host, [0; 8]);
    deliver(&hw, &host, [0, 0, 0x0C, 0, 0, 0, 0, 0]);
    deliver(&hw, &host, [0; 8]);

    let decoder = KeyboardDecoder::new();
    assert_eq!(decoder.pump(&host), 4);
    assert_eq!(decoder.getc(), Some(b'H'));
    assert_eq!(decoder.getc(), Some(b'i'));
    assert_eq!(decoder.getc(), None);

    let stats = host.get_debug_stats();
    assert_eq!(stats.data_count, 4);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.watchdog_kick_count, 0);
}

#[test]
fn raw_reports_survive_naks_and_errors() {
    let hw = MockHardware::new();
    let host = keyboard_behind_hub(&hw);

    for _ in 0..10 {
        hw.complete_channel(KEYBOARD_CHANNEL, OUTCOME_NAK, &[]);
        host.irq_handler();
        host.tick();
    }
    hw.complete_channel(KEYBOARD_CHANNEL, OUTCOME_XACTERR, &[]);
    host.irq_handler();
    deliver(&hw, &host, [0, 0, 0x04, 0, 0, 0, 0, 0]);

    let mut buf = [0u8; 8];
    assert_eq!(host.poll_keyboard(&mut buf), Ok(8));
    assert_eq!(buf[2], 0x04);
    assert_eq!(host.poll_keyboard(&mut buf), Ok(0));

    let stats = host.get_debug_stats();
    assert_eq!(stats.nak_count, 10);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.data_count, 1);
    assert_eq!(stats.watchdog_kick_count, 0);
    assert!(hw.channel_enabled(KEYBOARD_CHANNEL));
}

#[test]
fn silent_keyboard_is_kicked_by_the_watchdog() {
    let hw = MockHardware::new();
    let host = keyboard_behind_hub(&hw);

    for _ in 0..5 {
        host.tick();
    }
    assert_eq!(host.get_debug_stats().watchdog_kick_count, 1);

    deliver(&hw, &host, [0, 0, 0x05, 0, 0, 0, 0, 0]);
    assert!(host.pop_report().is_some());
}

#[test]
fn unplug_stops_polling() {
    let hw = MockHardware::new();
    let host = keyboard_behind_hub(&hw);

    hw.disconnect_root();
    host.irq_handler();

    assert_eq!(host.recovery_state(), RecoveryState::Idle);
    assert!(host.keyboard().is_none());
    assert_eq!(host.start_keyboard_polling(), Err(UsbError::NoKeyboard));
    assert_eq!(host.poll_keyboard(&mut [0u8; 8]), Err(UsbError::NoKeyboard));
    assert_eq!(host.enumerate_root_device(), Err(UsbError::PortDisabled));
}

//! Periodic tick: stuck-transfer watchdog and root port recovery.
//!
//! `tick` is called every 10 ms from the timer's deferred context. Port
//! recovery runs first; the watchdog and the fallback re-arm only run while
//! recovery is idle. Nothing here sleeps; bounded waits spin.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use super::regs::{bits::*, Dwc2Registers, KEYBOARD_CHANNEL};
use super::stats::DebugCounters;
use super::Dwc2Host;
use crate::arch_impl::Platform;

/// Root port recovery phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecoveryState {
    Idle = 0,
    /// Port reset asserted after the port lost its enable
    ResetAsserted = 1,
    /// Reset released, waiting for the port to report enabled
    WaitingForEnable = 2,
}

impl RecoveryState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RecoveryState::ResetAsserted,
            2 => RecoveryState::WaitingForEnable,
            _ => RecoveryState::Idle,
        }
    }
}

/// Recovery state machine. The interrupt handler moves it out of `Idle`;
/// only `tick` advances it afterwards.
pub(crate) struct PortRecovery {
    state: AtomicU8,
    /// Tick at which the current phase began
    phase_start: AtomicU32,
}

impl PortRecovery {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RecoveryState::Idle as u8),
            phase_start: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> RecoveryState {
        RecoveryState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn enter(&self, state: RecoveryState, now: u32) {
        self.phase_start.store(now, Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Reset has just been asserted.
    pub fn begin(&self, now: u32) {
        self.enter(RecoveryState::ResetAsserted, now);
    }

    pub fn cancel(&self) {
        self.state.store(RecoveryState::Idle as u8, Ordering::Release);
    }

    fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.phase_start.load(Ordering::Relaxed))
    }
}

impl<R: Dwc2Registers, P: Platform> Dwc2Host<R, P> {
    /// Advance the 10 ms tick.
    pub fn tick(&self) {
        let now = self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

        self.advance_recovery(now);
        if self.recovery.state() != RecoveryState::Idle {
            return;
        }

        let pipe = &self.keyboard;
        if !pipe.is_online() || !pipe.is_polling() {
            return;
        }

        if pipe.is_pending() {
            if now.wrapping_sub(pipe.last_activity()) >= self.config.watchdog_ticks {
                self.restart_stuck_transfer();
            }
        } else if self.regs.hcchar(KEYBOARD_CHANNEL) & HCCHAR_CHENA == 0 {
            self.arm_keyboard();
        }
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    fn advance_recovery(&self, now: u32) {
        match self.recovery.state() {
            RecoveryState::Idle => {}
            RecoveryState::ResetAsserted => {
                if self.recovery.elapsed(now) >= self.config.recovery_reset_ticks {
                    let hprt = self.regs.hprt0();
                    self.regs.set_hprt0(hprt & !HPRT_W1C_MASK & !HPRT_RST);
                    self.recovery.enter(RecoveryState::WaitingForEnable, now);
                }
            }
            RecoveryState::WaitingForEnable => {
                let hprt = self.regs.hprt0();
                if hprt & HPRT_ENA != 0 {
                    self.recovery.cancel();
                    log::info!("usb: root port re-enabled, resuming keyboard polling");
                    self.keyboard.reset_toggle();
                    self.regs.set_hcintmsk(KEYBOARD_CHANNEL, 0);
                    self.halt_channel_spinning(KEYBOARD_CHANNEL);
                    if self.keyboard.is_online() && self.keyboard.is_polling() {
                        self.arm_keyboard();
                    }
                } else if self.recovery.elapsed(now) >= self.config.recovery_enable_ticks {
                    log::warn!("usb: root port did not re-enable, keyboard unavailable until replugged");
                    self.recovery.cancel();
                    self.keyboard.set_offline();
                }
            }
        }
    }

    /// Force the keyboard channel to halt and start a fresh transfer.
    fn restart_stuck_transfer(&self) {
        let ch = KEYBOARD_CHANNEL;
        // keep the forced halt away from the interrupt handler
        self.regs.set_hcintmsk(ch, 0);
        self.halt_channel_spinning(ch);
        self.regs.clear_hcint(ch, HCINT_ALL);
        DebugCounters::bump(&self.counters.watchdog_kick);
        self.arm_keyboard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::dwc2::mock::{MockDevice, MockHardware, OUTCOME_NAK};
    use crate::drivers::usb::dwc2::regs::UsbSpeed;
    use crate::drivers::usb::dwc2::HostConfig;
    use crate::drivers::usb::UsbError;

    fn polling_host(hw: &MockHardware) -> Dwc2Host<&MockHardware, &MockHardware> {
        hw.attach_root(MockDevice::keyboard(UsbSpeed::Full));
        let host = Dwc2Host::new(hw, hw, HostConfig::DEFAULT.with_poll_iterations(16));
        host.init_host().unwrap();
        host.enumerate_root_device().unwrap();
        host.start_keyboard_polling().unwrap();
        host
    }

    fn ticks(host: &Dwc2Host<&MockHardware, &MockHardware>, n: u32) {
        for _ in 0..n {
            host.tick();
        }
    }

    #[test]
    fn test_stuck_transfer_restarted_once_after_five_ticks() {
        let hw = MockHardware::new();
        let host = polling_host(&hw);
        let enables = hw.enables(KEYBOARD_CHANNEL);

        ticks(&host, 4);
        assert_eq!(host.get_debug_stats().watchdog_kick_count, 0);

        host.tick();
        assert_eq!(host.get_debug_stats().watchdog_kick_count, 1);
        assert_eq!(hw.enables(KEYBOARD_CHANNEL), enables + 1);
        assert!(hw.channel_enabled(KEYBOARD_CHANNEL));

        // the fresh transfer gets its own five ticks
        ticks(&host, 4);
        assert_eq!(host.get_debug_stats().watchdog_kick_count, 1);
    }

    #[test]
    fn test_restart_of_wedged_channel_spins_instead_of_sleeping() {
        let hw = MockHardware::new();
        let host = polling_host(&hw);
        hw.set_channel_wedged(KEYBOARD_CHANNEL, true);
        let slept_us = hw.slept_us();
        let slept_ms = hw.slept_ms();

        ticks(&host, 5);

        assert_eq!(host.get_debug_stats().watchdog_kick_count, 1);
        assert_eq!(hw.slept_us(), slept_us);
        assert_eq!(hw.slept_ms(), slept_ms);
    }

    #[test]
    fn test_completion_at_tick_four_prevents_restart() {
        let hw = MockHardware::new();
        let host = polling_host(&hw);

        ticks(&host, 4);
        hw.complete_channel(KEYBOARD_CHANNEL, OUTCOME_NAK, &[]);
        host.irq_handler();
        host.tick();

        assert_eq!(host.get_debug_stats().watchdog_kick_count, 0);
    }

    #[test]
    fn test_tick_rearms_idle_channel() {
        let hw = MockHardware::new();
        let host = polling_host(&hw);

        // completion that was never serviced by the interrupt handler
        hw.complete_channel(KEYBOARD_CHANNEL, OUTCOME_NAK, &[]);
        host.keyboard.pending.store(false, Ordering::Release);
        let enables = hw.enables(KEYBOARD_CHANNEL);

        host.tick();

        assert_eq!(hw.enables(KEYBOARD_CHANNEL), enables + 1);
        assert!(host.keyboard.is_pending());
    }

    #[test]
    fn test_recovery_resumes_when_enable_returns() {
        let hw = MockHardware::new();
        let host = polling_host_without_auto_enable(&hw);

        hw.lose_port_enable();
        host.irq_handler();
        assert_eq!(host.recovery_state(), RecoveryState::ResetAsserted);
        let writes = hw.hprt_writes().len();

        ticks(&host, 4);
        assert_eq!(host.recovery_state(), RecoveryState::ResetAsserted);
        host.tick();
        assert_eq!(host.recovery_state(), RecoveryState::WaitingForEnable);
        assert_eq!(hw.hprt_writes().len(), writes + 1);
        assert_eq!(hw.hprt_writes().last().copied().unwrap_or(HPRT_RST) & HPRT_RST, 0);

        // port comes back two ticks into the wait
        host.tick();
        hw.set_port_enabled(true);
        let enables = hw.enables(KEYBOARD_CHANNEL);
        host.tick();

        assert_eq!(host.recovery_state(), RecoveryState::Idle);
        assert_eq!(hw.enables(KEYBOARD_CHANNEL), enables + 1);
        assert!(host.keyboard().is_some());
    }

    #[test]
    fn test_recovery_gives_up_without_second_reset() {
        let hw = MockHardware::new();
        let host = polling_host_without_auto_enable(&hw);

        hw.lose_port_enable();
        host.irq_handler();

        ticks(&host, 14);
        assert_eq!(host.recovery_state(), RecoveryState::WaitingForEnable);
        host.tick();
        assert_eq!(host.recovery_state(), RecoveryState::Idle);
        assert!(host.keyboard().is_none());
        assert_eq!(host.poll_keyboard(&mut [0u8; 8]), Err(UsbError::NoKeyboard));

        let resets = hw.hprt_writes().iter().filter(|w| *w & HPRT_RST != 0).count();
        ticks(&host, 20);
        let after = hw.hprt_writes().iter().filter(|w| *w & HPRT_RST != 0).count();
        assert_eq!(resets, after);
        assert!(hw.hprt_writes().iter().all(|w| w & HPRT_ENA == 0));
    }

    #[test]
    fn test_watchdog_paused_during_recovery() {
        let hw = MockHardware::new();
        let host = polling_host_without_auto_enable(&hw);

        hw.lose_port_enable();
        host.irq_handler();
        ticks(&host, 8);

        assert_eq!(host.get_debug_stats().watchdog_kick_count, 0);
    }

    /// Polling host whose root port stays disabled after a recovery reset.
    fn polling_host_without_auto_enable(hw: &MockHardware) -> Dwc2Host<&MockHardware, &MockHardware> {
        let host = polling_host(hw);
        hw.set_auto_enable_on_reset(false);
        host
    }
}

//! DWC2 host timing and retry budgets.

/// Every timing and budget constant used by the host stack.
///
/// Build from [`HostConfig::DEFAULT`] and adjust with the `with_*` setters;
/// tests use them to shrink poll budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// NAK retries for the SETUP stage
    pub setup_retries: u32,
    /// NAK retries for the DATA stage
    pub data_retries: u32,
    /// NAK retries for the STATUS stage
    pub status_retries: u32,
    /// Completion polls per arm, each followed by a 1 us sleep
    pub poll_iterations: u32,
    /// Delay before re-arming after a NAK
    pub nak_backoff_us: u32,
    /// Polls waiting for CHHLTD after a forced channel disable
    pub halt_wait_iterations: u32,
    pub set_address_settle_ms: u32,
    pub port_power_good_ms: u32,
    pub port_reset_ms: u32,
    /// Recovery time after a port reset before talking to the device
    pub port_recovery_ms: u32,
    /// Ticks a keyboard transfer may stay pending before the watchdog fires
    pub watchdog_ticks: u32,
    /// Ticks the root port reset is held during port-loss recovery
    pub recovery_reset_ticks: u32,
    /// Ticks to wait for the port to re-enable after recovery reset
    pub recovery_enable_ticks: u32,
    /// Maximum hub nesting below the root port
    pub max_hub_depth: u8,
    /// Polls waiting for core soft reset and AHB idle
    pub core_reset_iterations: u32,
    /// How long host bring-up waits for a device to connect
    pub connect_wait_ms: u32,
}

impl HostConfig {
    pub const DEFAULT: HostConfig = HostConfig {
        setup_retries: 5,
        data_retries: 10,
        status_retries: 5,
        poll_iterations: 100_000,
        nak_backoff_us: 1000,
        halt_wait_iterations: 1000,
        set_address_settle_ms: 10,
        port_power_good_ms: 100,
        port_reset_ms: 50,
        port_recovery_ms: 10,
        watchdog_ticks: 5,
        recovery_reset_ticks: 5,
        recovery_enable_ticks: 10,
        max_hub_depth: 5,
        core_reset_iterations: 100_000,
        connect_wait_ms: 500,
    };

    pub const fn with_retries(mut self, setup: u32, data: u32, status: u32) -> Self {
        self.setup_retries = setup;
        self.data_retries = data;
        self.status_retries = status;
        self
    }

    pub const fn with_poll_iterations(mut self, iterations: u32) -> Self {
        self.poll_iterations = iterations;
        self
    }

    pub const fn with_halt_wait_iterations(mut self, iterations: u32) -> Self {
        self.halt_wait_iterations = iterations;
        self
    }

    pub const fn with_watchdog_ticks(mut self, ticks: u32) -> Self {
        self.watchdog_ticks = ticks;
        self
    }

    pub const fn with_recovery_ticks(mut self, reset: u32, enable: u32) -> Self {
        self.recovery_reset_ticks = reset;
        self.recovery_enable_ticks = enable;
        self
    }

    pub const fn with_max_hub_depth(mut self, depth: u8) -> Self {
        self.max_hub_depth = depth;
        self
    }

    pub const fn with_connect_wait_ms(mut self, ms: u32) -> Self {
        self.connect_wait_ms = ms;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

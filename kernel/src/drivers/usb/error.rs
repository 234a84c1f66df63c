//! USB Error Types
//!
//! Every failure in the host stack is reported through [`UsbError`]. Protocol
//! errors (stall, babble, transaction, AHB) abort the current transfer,
//! transient NAKs are retried by the control engine until the budget runs out
//! (then [`UsbError::Timeout`]), and resource exhaustion aborts only the
//! enumeration branch that hit it.

use core::fmt;

/// Result alias used throughout the USB subsystem.
pub type Result<T> = core::result::Result<T, UsbError>;

/// USB host error conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// Device answered with a STALL handshake
    Stall,
    /// CRC, bit-stuff or response-timeout error on the bus
    TransactionError,
    /// Device sent more data than the channel expected
    Babble,
    /// DMA fetch or store failed on the AHB (bad bus address)
    AhbError,
    /// Retry budget or a bounded hardware wait was exhausted
    Timeout,
    /// Device address outside 0..=127
    InvalidAddress,
    /// Requested length does not fit the supplied or DMA buffer
    BufferTooSmall,
    /// Device registry or address space is full
    RegistryFull,
    /// Descriptor shorter than its fixed header or malformed
    InvalidDescriptor,
    /// Hub nesting deeper than the configured limit
    HubDepthExceeded,
    /// No boot keyboard has been enumerated (or it went away)
    NoKeyboard,
    /// Root port has no device or could not be enabled
    PortDisabled,
    /// Host channel is still busy with a previous transfer
    ChannelBusy,
    /// The controller has not been brought up
    NotInitialized,
}

impl UsbError {
    /// Negative error code for C-style callers and diagnostics.
    pub fn code(&self) -> i32 {
        match self {
            UsbError::Stall => -1,
            UsbError::TransactionError => -2,
            UsbError::Babble => -3,
            UsbError::AhbError => -4,
            UsbError::Timeout => -5,
            UsbError::InvalidAddress => -6,
            UsbError::BufferTooSmall => -7,
            UsbError::RegistryFull => -8,
            UsbError::InvalidDescriptor => -9,
            UsbError::HubDepthExceeded => -10,
            UsbError::NoKeyboard => -11,
            UsbError::PortDisabled => -12,
            UsbError::ChannelBusy => -13,
            UsbError::NotInitialized => -14,
        }
    }

    /// Protocol errors are fatal for the current transfer and never retried.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            UsbError::Stall | UsbError::TransactionError | UsbError::Babble | UsbError::AhbError
        )
    }
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::Stall => write!(f, "endpoint stalled"),
            UsbError::TransactionError => write!(f, "transaction error"),
            UsbError::Babble => write!(f, "babble detected"),
            UsbError::AhbError => write!(f, "AHB DMA error"),
            UsbError::Timeout => write!(f, "transfer timed out"),
            UsbError::InvalidAddress => write!(f, "invalid device address"),
            UsbError::BufferTooSmall => write!(f, "buffer too small"),
            UsbError::RegistryFull => write!(f, "device registry full"),
            UsbError::InvalidDescriptor => write!(f, "invalid descriptor"),
            UsbError::HubDepthExceeded => write!(f, "hub nesting too deep"),
            UsbError::NoKeyboard => write!(f, "no keyboard attached"),
            UsbError::PortDisabled => write!(f, "port disabled"),
            UsbError::ChannelBusy => write!(f, "channel busy"),
            UsbError::NotInitialized => write!(f, "controller not initialized"),
        }
    }
}

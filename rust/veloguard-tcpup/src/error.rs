//! Error types for VeloGuard tcpup translator

use crate::fsm::TcpState;
use thiserror::Error;

/// Result type alias for tcpup operations
pub type Result<T> = std::result::Result<T, TcpupError>;

/// Main error type for the tcpup translator
///
/// Silent drops and "reset required" outcomes are not errors; they are
/// reported through [`crate::translator::Verdict`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TcpupError {
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Packet too short: expected {expected}, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid IP version: {0}")]
    InvalidIpVersion(u8),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Protocol violation in {state}: flags {flags:#04x}")]
    ProtocolViolation { state: TcpState, flags: u8 },

    #[error("Unsupported address family: {0:#04x}")]
    UnsupportedAddressFamily(u8),

    #[error("Output buffer too small: need {needed}, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Config error: {0}")]
    Config(String),
}

impl TcpupError {
    /// Whether this error was caused by untrusted packet contents
    /// rather than by the caller (buffer sizing, configuration).
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            TcpupError::InvalidPacket(_)
                | TcpupError::PacketTooShort { .. }
                | TcpupError::InvalidIpVersion(_)
                | TcpupError::Malformed(_)
                | TcpupError::ProtocolViolation { .. }
                | TcpupError::UnsupportedAddressFamily(_)
        )
    }
}

/// Ensure `out` can hold `needed` bytes.
pub(crate) fn ensure_capacity(out: &[u8], needed: usize) -> Result<()> {
    if out.len() < needed {
        return Err(TcpupError::BufferTooSmall { needed, capacity: out.len() });
    }
    Ok(())
}

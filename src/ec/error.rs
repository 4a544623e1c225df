use std::io;

use thiserror::Error;

/// Failures raised at the embedded-controller boundary.
#[derive(Debug, Error)]
pub enum EcError {
    /// A register name or address that the active register map does not know.
    /// Raised before any port is touched.
    #[error("InvalidRegister: {0}")]
    InvalidRegister(String),

    /// The controller kept its busy bit set past the per-attempt deadline.
    #[error("HardwareTimeout: register 0x{address:02X} did not respond within {waited_ms} ms")]
    HardwareTimeout { address: u8, waited_ms: u64 },

    /// The process lacks the privilege to touch the I/O ports.
    #[error("HardwareAccessDenied: {0}")]
    HardwareAccessDenied(String),

    #[error("PortFault: {0}")]
    PortFault(#[from] io::Error),

    /// The register worker thread has gone away.
    #[error("TransportClosed: register worker is not running")]
    TransportClosed,
}

impl EcError {
    /// Whether the transport should spend retry budget on this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EcError::HardwareTimeout { .. } | EcError::HardwareAccessDenied(_) | EcError::PortFault(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EcError::InvalidRegister(_) => "InvalidRegister",
            EcError::HardwareTimeout { .. } => "HardwareTimeout",
            EcError::HardwareAccessDenied(_) => "HardwareAccessDenied",
            EcError::PortFault(_) => "PortFault",
            EcError::TransportClosed => "TransportClosed",
        }
    }
}

pub type EcResult<T> = Result<T, EcError>;

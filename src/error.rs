//! Errors returned when processing received PDUs.

use crate::{circuit::CircuitId, pdu::DecodeError};

/// Reason a received PDU was refused.
#[derive(Debug, thiserror::Error)]
pub enum PduError {
    /// The PDU could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The PDU didn't carry the configured password.
    #[error("authentication failure")]
    AuthenticationFailure,
    /// The PDU was received on a circuit we don't know.
    #[error("unknown circuit {0}")]
    UnknownCircuit(CircuitId),
    /// The PDU was received on a circuit which is administratively disabled.
    #[error("circuit {0} is disabled")]
    CircuitDisabled(CircuitId),
    /// A hello was received for the wrong kind of medium.
    #[error("hello type doesn't match the circuit medium")]
    MediumMismatch,
    /// The PDU is for a level the circuit doesn't run.
    #[error("no common level with the sender")]
    LevelMismatch,
    /// A level 1 hello from a router in a different area.
    #[error("no common area address with the sender")]
    AreaMismatch,
    /// A PDU other than a hello was received from a neighbor without an `Up` adjacency.
    #[error("no adjacency with the sender")]
    NoAdjacency,
}

impl PduError {
    /// Checks if this error was caused by a malformed PDU.
    pub fn is_malformed(&self) -> bool {
        matches!(self, PduError::Decode(DecodeError::MalformedPdu(_)))
    }
}

/// Reason a [`Config`](crate::Config) can't be used to build a router.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No area address is configured.
    #[error("at least one area address is required")]
    NoAreaAddress,
    /// More area addresses than a router can carry are configured.
    #[error("at most {max} area addresses are supported, got {got}")]
    TooManyAreaAddresses { max: usize, got: usize },
    /// Circuit id 0 is reserved for the router itself.
    #[error("circuit id 0 is reserved")]
    ReservedCircuitId,
    /// Two circuits share the same id.
    #[error("duplicate circuit id {0}")]
    DuplicateCircuit(CircuitId),
    /// A circuit advertises a zero hold time.
    #[error("circuit {0} has a zero hold time")]
    ZeroHoldTime(CircuitId),
    /// The refresh interval doesn't leave time to refresh LSPs before they expire.
    #[error("LSP refresh interval must be shorter than the LSP lifetime")]
    RefreshInterval,
    /// A periodic timer is configured with a zero interval.
    #[error("timer {0} must not be zero")]
    ZeroInterval(&'static str),
}

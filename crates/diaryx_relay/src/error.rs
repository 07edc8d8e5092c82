use thiserror::Error;

/// A binary frame that does not parse as `type + payload`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Truncated varUint")]
    TruncatedVarUint,

    #[error("varUint does not fit in 64 bits")]
    VarUintOverflow,

    #[error("Byte array declares {declared} bytes but only {available} remain")]
    TruncatedByteArray { declared: u64, available: usize },

    #[error("Presence update declares {declared} entries but ended after {decoded}")]
    TruncatedPresence { declared: u64, decoded: usize },
}

/// The merge engine rejected its input. The session state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    #[error("Malformed peer state: {0}")]
    MalformedState(String),
}

/// Everything that can end a single connection.
///
/// None of these are fatal to the process or to other connections in the
/// same session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid document target: '{0}'")]
    InvalidTarget(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Merge engine rejected update: {0}")]
    MergeApply(#[from] MergeError),

    #[error("Transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("Keepalive timed out")]
    KeepaliveTimeout,

    #[error("Outbound queue overflowed")]
    SlowConsumer,
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

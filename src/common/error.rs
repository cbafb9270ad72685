//! Error types for minisearch

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Wire Errors ===
    #[error("Malformed message: {0}")]
    Codec(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // === Transport Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Remote error from {node}: {message}")]
    Remote { node: String, message: String },

    #[error("No handler registered for action {0}")]
    UnknownAction(String),

    #[error("Handler already registered for action {0}")]
    DuplicateHandler(String),

    // === Coordination Errors ===
    #[error("Stale term: incoming {incoming}, current {current}")]
    StaleTerm { incoming: u64, current: u64 },

    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    #[error("Join rejected: {0}")]
    JoinRejected(String),

    #[error("Publication failed: {0}")]
    PublicationFailed(String),

    // === Cluster State Errors ===
    #[error("Stale cluster state: version {incoming} is not newer than {current}")]
    StaleState { incoming: u64, current: u64 },

    #[error("Cluster state conflict: {0}")]
    StateConflict(String),

    #[error("Master service stopped")]
    MasterStopped,

    // === Metadata Errors ===
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Invalid index name [{name}]: {reason}")]
    InvalidIndexName { name: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Persistence Errors ===
    #[error("Persisted state corrupted: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::StateConflict(_)
        )
    }

    /// Message carried back to a peer when a handler fails
    pub fn to_remote_message(&self) -> String {
        self.to_string()
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

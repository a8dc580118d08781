use crate::types::ScalarType;

pub type Result<T> = std::result::Result<T, ProcessGroupError>;

#[derive(Debug, thiserror::Error)]
pub enum ProcessGroupError {
    #[error("invalid collective input: {reason}")]
    InvalidInput { reason: String },

    #[error("unsupported element type {scalar_type} for the communication library")]
    UnsupportedScalarType { scalar_type: ScalarType },

    #[error("invalid device-set key {key:?}: empty or not derived from the device list")]
    InvalidDeviceKey { key: String },

    #[error("cannot create communicators for an empty device list")]
    EmptyDeviceList,

    #[error("invalid rank {rank}: group size is {size}")]
    InvalidRank { rank: u32, size: u32 },

    #[error("root {root} out of range: must be below {limit}")]
    InvalidRoot { root: usize, limit: usize },

    #[error("unexpected unique id length received from the store: expected {expected} bytes, got {actual}")]
    UniqueIdLength { expected: usize, actual: usize },

    #[error("store key {key:?} did not appear within {timeout_ms}ms")]
    StoreTimeout { key: String, timeout_ms: u64 },

    #[error("coordination store error: {message}")]
    Store { message: String },

    #[error("process group id {group_id:?} is already in use in this process")]
    DuplicateGroupId { group_id: String },

    #[error("device runtime error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("communication library error: {message}")]
    Comm {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProcessGroupError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a `Device` error with just a message.
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Comm` error with just a message.
    pub fn comm(message: impl Into<String>) -> Self {
        Self::Comm {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Comm` error with a message and a source error.
    pub fn comm_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Comm {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

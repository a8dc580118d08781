use crate::error::{ProcessGroupError, Result};

/// Rank of a process within its process group (0-indexed).
pub type Rank = u32;

/// Index of a device local to this process.
pub type DeviceIndex = usize;

/// Size in bytes of a communication-library unique id.
pub const UNIQUE_ID_BYTES: usize = 128;

/// Element kinds a caller's buffer can carry.
///
/// This is wider than what the communication library accepts; see
/// [`DataType::from_scalar`] for the supported subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::I16 | ScalarType::F16 | ScalarType::BF16 => 2,
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::U8 => "u8",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F16 => "f16",
            ScalarType::BF16 => "bf16",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Element types understood by the communication library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    U8 = 1,
    I32 = 2,
    I64 = 3,
    F16 = 4,
    F32 = 5,
    F64 = 6,
}

impl DataType {
    /// Map a caller element type onto the communication library's table.
    ///
    /// Anything outside the table is rejected rather than reinterpreted.
    pub fn from_scalar(scalar_type: ScalarType) -> Result<Self> {
        match scalar_type {
            ScalarType::I8 => Ok(DataType::I8),
            ScalarType::U8 => Ok(DataType::U8),
            ScalarType::I32 => Ok(DataType::I32),
            ScalarType::I64 => Ok(DataType::I64),
            ScalarType::F16 => Ok(DataType::F16),
            ScalarType::F32 => Ok(DataType::F32),
            ScalarType::F64 => Ok(DataType::F64),
            other => Err(ProcessGroupError::UnsupportedScalarType { scalar_type: other }),
        }
    }

    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::F16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction operations for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceOp {
    Min,
    Max,
    /// Element-wise sum across global ranks.
    #[default]
    Sum,
    /// Element-wise product across global ranks.
    Product,
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Product => f.write_str("product"),
        }
    }
}

/// Opaque communication-context identifier shared by every participant of
/// one communicator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UniqueId([u8; UNIQUE_ID_BYTES]);

impl UniqueId {
    pub const fn new(bytes: [u8; UNIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Rebuild an id received from the coordination store.
    ///
    /// The payload must be exactly [`UNIQUE_ID_BYTES`] long; anything else
    /// means the store or a peer speaks a different format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let internal: [u8; UNIQUE_ID_BYTES] =
            bytes
                .try_into()
                .map_err(|_| ProcessGroupError::UniqueIdLength {
                    expected: UNIQUE_ID_BYTES,
                    actual: bytes.len(),
                })?;
        Ok(Self(internal))
    }

    pub fn as_bytes(&self) -> &[u8; UNIQUE_ID_BYTES] {
        &self.0
    }
}

impl std::fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UniqueId(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Handle to a device execution queue owned by a [`DeviceRuntime`](crate::DeviceRuntime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Handle to a device-side synchronization marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Handle to a per-device communicator owned by a [`CommBackend`](crate::CommBackend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommHandle(pub u64);

/// Creation flags for device events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    /// Skip timestamp capture. Cheaper to record, query and wait on.
    pub disable_timing: bool,
}

impl EventFlags {
    pub const DISABLE_TIMING: EventFlags = EventFlags {
        disable_timing: true,
    };
}

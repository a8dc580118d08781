//! Process-group collective communication over multiple local devices.
//!
//! A [`ProcessGroup`] is one process's membership in a group of processes
//! that run collectives (allreduce, broadcast, reduce, allgather) across all
//! of their local devices. Communicators are created lazily per ordered
//! device set through a unique-id rendezvous over a coordination [`Store`],
//! then cached. Each collective returns a [`WorkHandle`] backed by device
//! events.
//!
//! The device runtime and the communication library are traits
//! ([`DeviceRuntime`], [`CommBackend`]); the `procgroup-nccl` crate binds them
//! to CUDA and NCCL, and [`sim`] provides an in-process simulation.

pub mod buffer;
pub mod collective;
pub mod comm;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod group;
pub mod sim;
pub mod store;
pub mod types;
pub mod work;

pub use buffer::DeviceBuffer;
pub use collective::{AllreduceOptions, BroadcastOptions, ReduceOptions};
pub use comm::{CommBackend, grouped};
pub use config::ProcessGroupConfig;
pub use context::CommContext;
pub use device::{DeviceGuard, DeviceRuntime};
pub use error::{ProcessGroupError, Result};
pub use group::{CommunicatorBundle, DeviceKey, ProcessGroup};
pub use store::{MemoryStore, Store};
pub use types::{
    CommHandle, DataType, DeviceIndex, EventFlags, EventHandle, Rank, ReduceOp, ScalarType,
    StreamHandle, UNIQUE_ID_BYTES, UniqueId,
};
pub use work::{WorkHandle, WorkState};

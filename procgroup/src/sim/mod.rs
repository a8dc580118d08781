//! In-process simulated devices and interconnect.
//!
//! A [`SimRuntime`] stands in for one process's device runtime and a
//! [`SimBackend`] for its communication library. Every simulated process of a
//! job shares one [`SimFabric`], so several [`CommContext`](crate::CommContext)s
//! in a single test binary behave like separate processes exchanging data.

mod backend;
mod element;
mod fabric;
mod runtime;
mod tensor;

pub use backend::SimBackend;
pub use element::{Element, F16};
pub use fabric::SimFabric;
pub use runtime::{SimGate, SimRuntime};
pub use tensor::SimTensor;

use std::sync::Arc;

/// Runtime and communication library for one simulated process with
/// `device_count` devices attached to `fabric`.
pub fn local_backend(device_count: usize, fabric: &Arc<SimFabric>) -> (Arc<SimRuntime>, Arc<SimBackend>) {
    let runtime = SimRuntime::new(device_count);
    let backend = Arc::new(SimBackend::new(Arc::clone(&runtime), Arc::clone(fabric)));
    (runtime, backend)
}

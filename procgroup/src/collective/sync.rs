use crate::device::{DeviceGuard, DeviceRuntime};
use crate::error::Result;
use crate::group::CommunicatorBundle;

/// Order each communication stream of `bundle` after the work already queued
/// on its device's current compute stream.
///
/// Records the bundle's sync event on the compute stream and makes the
/// communication stream wait on it. Nothing blocks on the host.
pub(crate) fn sync_streams(runtime: &dyn DeviceRuntime, bundle: &CommunicatorBundle) -> Result<()> {
    let guard = DeviceGuard::new(runtime)?;
    let per_device = bundle
        .devices()
        .iter()
        .zip(bundle.events())
        .zip(bundle.streams());
    for ((&device, &event), &comm_stream) in per_device {
        guard.set(device)?;
        let compute_stream = runtime.current_stream(device)?;
        runtime.record_event(event, compute_stream)?;
        runtime.stream_wait_event(comm_stream, event)?;
    }
    Ok(())
}

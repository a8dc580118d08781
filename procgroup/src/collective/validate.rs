use std::collections::HashSet;

use crate::buffer::DeviceBuffer;
use crate::error::{ProcessGroupError, Result};
use crate::types::{DataType, DeviceIndex, Rank};

/// Check a collective's buffers before any device work is enqueued.
///
/// `inputs[i]` and `outputs[i]` form device `i`'s pair; every output must hold
/// `multiplier` times as many elements as its input. Returns the
/// communication element type shared by all buffers.
pub(crate) fn validate<I, O>(
    inputs: &[I],
    outputs: &[O],
    multiplier: usize,
    device_count: usize,
) -> Result<DataType>
where
    I: DeviceBuffer,
    O: DeviceBuffer,
{
    if inputs.len() != outputs.len() {
        return Err(ProcessGroupError::invalid_input(
            "input buffer list must have the same length as the output buffer list",
        ));
    }
    let Some(first) = inputs.first() else {
        return Err(ProcessGroupError::invalid_input(
            "the number of input buffers must not be zero",
        ));
    };
    if inputs.len() > device_count {
        return Err(ProcessGroupError::invalid_input(format!(
            "{} input buffers but only {device_count} devices are visible",
            inputs.len()
        )));
    }

    let numel = first.numel();
    let scalar_type = first.scalar_type();
    let mut used = HashSet::with_capacity(inputs.len());

    for (input, output) in inputs.iter().zip(outputs) {
        let (Some(in_dev), Some(out_dev)) = (input.device(), output.device()) else {
            return Err(ProcessGroupError::invalid_input(
                "only dense device buffers are supported for collective operations",
            ));
        };
        if let Some(dev) = [in_dev, out_dev].into_iter().find(|&d| d >= device_count) {
            return Err(ProcessGroupError::invalid_input(format!(
                "buffer on device {dev} but only {device_count} devices are visible"
            )));
        }
        if input.is_sparse() || output.is_sparse() {
            return Err(ProcessGroupError::invalid_input(
                "only dense device buffers are supported for collective operations",
            ));
        }
        if input.scalar_type() != scalar_type || output.scalar_type() != scalar_type {
            return Err(ProcessGroupError::invalid_input(
                "expecting all buffers to have identical element type",
            ));
        }
        if input.numel() != numel {
            return Err(ProcessGroupError::invalid_input(
                "expecting all input buffers to have identical number of elements",
            ));
        }
        if output.numel() != numel * multiplier {
            return Err(ProcessGroupError::invalid_input(format!(
                "output has {} elements, expected {} ({numel} x {multiplier})",
                output.numel(),
                numel * multiplier
            )));
        }
        if !input.is_contiguous() || !output.is_contiguous() {
            return Err(ProcessGroupError::invalid_input(
                "expecting all buffers to be contiguous",
            ));
        }
        if !used.insert(in_dev) {
            return Err(ProcessGroupError::invalid_input(format!(
                "expecting inputs on different devices, device {in_dev} appears twice"
            )));
        }
        if in_dev != out_dev {
            return Err(ProcessGroupError::invalid_input(format!(
                "expecting input and output on the same device, got {in_dev} and {out_dev}"
            )));
        }
    }

    DataType::from_scalar(scalar_type)
}

/// Local devices of validated inputs, in input order.
pub(crate) fn devices_of<B: DeviceBuffer>(buffers: &[B]) -> Result<Vec<DeviceIndex>> {
    buffers
        .iter()
        .map(|b| {
            b.device().ok_or_else(|| {
                ProcessGroupError::invalid_input("only dense device buffers are supported")
            })
        })
        .collect()
}

/// Flatten a `(process rank, local buffer index)` root into the global rank
/// space of a group with `size` processes and `n` buffers per process.
pub(crate) fn global_root(root_rank: Rank, root_tensor: usize, size: u32, n: usize) -> Result<usize> {
    if root_rank >= size {
        return Err(ProcessGroupError::InvalidRoot {
            root: root_rank as usize,
            limit: size as usize,
        });
    }
    if root_tensor >= n {
        return Err(ProcessGroupError::InvalidRoot {
            root: root_tensor,
            limit: n,
        });
    }
    Ok(root_rank as usize * n + root_tensor)
}

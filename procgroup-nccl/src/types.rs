use cudarc::nccl::sys;
use procgroup::{DataType, ReduceOp};

/// Convert a procgroup DataType to the NCCL data type.
pub fn to_nccl_dtype(dt: DataType) -> sys::ncclDataType_t {
    match dt {
        DataType::I8 => sys::ncclDataType_t::ncclInt8,
        DataType::U8 => sys::ncclDataType_t::ncclUint8,
        DataType::I32 => sys::ncclDataType_t::ncclInt32,
        DataType::I64 => sys::ncclDataType_t::ncclInt64,
        DataType::F16 => sys::ncclDataType_t::ncclFloat16,
        DataType::F32 => sys::ncclDataType_t::ncclFloat32,
        DataType::F64 => sys::ncclDataType_t::ncclFloat64,
    }
}

/// Convert a procgroup ReduceOp to the NCCL reduce operation.
pub fn to_nccl_op(op: ReduceOp) -> sys::ncclRedOp_t {
    match op {
        ReduceOp::Min => sys::ncclRedOp_t::ncclMin,
        ReduceOp::Max => sys::ncclRedOp_t::ncclMax,
        ReduceOp::Sum => sys::ncclRedOp_t::ncclSum,
        ReduceOp::Product => sys::ncclRedOp_t::ncclProd,
    }
}

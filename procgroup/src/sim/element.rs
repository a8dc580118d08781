//! Typed element access and element-wise reduction over raw device bytes.

use crate::error::{ProcessGroupError, Result};
use crate::types::{DataType, ReduceOp, ScalarType};

/// IEEE 754 half-precision float: sign(1) + exponent(5) + mantissa(10).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct F16(pub u16);

impl F16 {
    const INFINITY: u16 = 0x7C00;
    const QUIET_NAN: u16 = 0x7E00;

    /// Round-to-nearest-even conversion.
    pub fn from_f32(v: f32) -> Self {
        let bits = v.to_bits();
        let sign = ((bits >> 16) & 0x8000) as u16;
        let exp = ((bits >> 23) & 0xFF) as i32;
        let man = bits & 0x007F_FFFF;

        let magnitude = match exp {
            0xFF if man != 0 => Self::QUIET_NAN,
            0xFF => Self::INFINITY,
            _ => {
                // Exponent rebiased from 127 to 15.
                let e = exp - 112;
                if e >= 0x1F {
                    Self::INFINITY
                } else if e > 0 {
                    // A mantissa carry may bump the exponent, up to infinity.
                    shift_round(((e as u32) << 23) | man, 13) as u16
                } else if e >= -10 {
                    // Below the smallest normal: units of 2^-24.
                    shift_round(man | 0x0080_0000, (14 - e) as u32) as u16
                } else {
                    0
                }
            }
        };
        F16(sign | magnitude)
    }

    pub fn to_f32(self) -> f32 {
        let sign = ((self.0 & 0x8000) as u32) << 16;
        let exp = ((self.0 >> 10) & 0x1F) as u32;
        let man = (self.0 & 0x03FF) as u32;

        let magnitude = match exp {
            0 => man as f32 * 2f32.powi(-24),
            0x1F if man == 0 => f32::INFINITY,
            0x1F => f32::NAN,
            _ => return f32::from_bits(sign | ((exp + 112) << 23) | (man << 13)),
        };
        f32::from_bits(sign | magnitude.to_bits())
    }
}

/// `x >> shift`, rounded to nearest with ties to even.
fn shift_round(x: u32, shift: u32) -> u32 {
    let kept = x >> shift;
    let rest = x & ((1 << shift) - 1);
    let half = 1 << (shift - 1);
    if rest > half || (rest == half && kept & 1 == 1) {
        kept + 1
    } else {
        kept
    }
}

/// Host-side element type that can be copied into and out of simulated
/// device memory.
pub trait Element: Copy + Send + Sync + 'static {
    const SCALAR_TYPE: ScalarType;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($($ty:ty => $scalar:ident),*) => {
        $(
            impl Element for $ty {
                const SCALAR_TYPE: ScalarType = ScalarType::$scalar;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_element!(i8 => I8, u8 => U8, i16 => I16, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

impl Element for F16 {
    const SCALAR_TYPE: ScalarType = ScalarType::F16;

    fn read_le(bytes: &[u8]) -> Self {
        F16(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn write_le(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0.to_le_bytes());
    }
}

impl Element for bool {
    const SCALAR_TYPE: ScalarType = ScalarType::Bool;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}

/// Encode a host slice into little-endian device bytes.
pub(crate) fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let size = T::SCALAR_TYPE.size_in_bytes();
    let mut bytes = vec![0u8; values.len() * size];
    for (v, chunk) in values.iter().zip(bytes.chunks_exact_mut(size)) {
        v.write_le(chunk);
    }
    bytes
}

pub(crate) fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::SCALAR_TYPE.size_in_bytes())
        .map(T::read_le)
        .collect()
}

/// Types that support the four reduction operations.
trait Reducible: Element {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Product => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Product => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, u8, i32, i64);
impl_reducible!(float: f32, f64);

impl Reducible for F16 {
    #[inline]
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
        F16::from_f32(f32::reduce(a.to_f32(), b.to_f32(), op))
    }
}

/// Element-wise `acc = acc op src` on byte slices interpreted as `dtype`.
pub(crate) fn reduce_into(acc: &mut [u8], src: &[u8], dtype: DataType, op: ReduceOp) -> Result<()> {
    if acc.len() != src.len() {
        return Err(ProcessGroupError::comm(format!(
            "reduce length mismatch: {} vs {} bytes",
            acc.len(),
            src.len()
        )));
    }
    match dtype {
        DataType::I8 => reduce_typed::<i8>(acc, src, op),
        DataType::U8 => reduce_typed::<u8>(acc, src, op),
        DataType::I32 => reduce_typed::<i32>(acc, src, op),
        DataType::I64 => reduce_typed::<i64>(acc, src, op),
        DataType::F16 => reduce_typed::<F16>(acc, src, op),
        DataType::F32 => reduce_typed::<f32>(acc, src, op),
        DataType::F64 => reduce_typed::<f64>(acc, src, op),
    }
    Ok(())
}

fn reduce_typed<T: Reducible>(acc: &mut [u8], src: &[u8], op: ReduceOp) {
    let size = T::SCALAR_TYPE.size_in_bytes();
    for (a, b) in acc.chunks_exact_mut(size).zip(src.chunks_exact(size)) {
        T::reduce(T::read_le(a), T::read_le(b), op).write_le(a);
    }
}

// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::zeroone::{ConstOne, ConstZero};

/// Every `Operand` in this crate has an underlying `ScalarTy`, the type of
/// every element in a `Dense`/`Chunked` array operand or the type of the
/// sole element of a `Scalar` operand. The `ScalarTy` is dynamically
/// inspected to select the operation body and promoted result type for any
/// evaluation step, the same role it plays in the teacher's SIMD dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScalarTy {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarTy {
    /// Returns the `ScalarTy` that's the join of `self` and `other`: the
    /// type both should be promoted to when used as the two operands of a
    /// binary operator. Used by `InputValidator` for dtype seeding and by
    /// `DefaultKernel` for dispatch.
    pub fn join(self, other: Self) -> Self {
        use ScalarTy::*;
        match (self, other) {
            (U8, U16) => U16,
            (U8, U32) => U32,
            (U8, U64) => U64,
            (U16, U32) => U32,
            (U16, U64) => U64,
            (U32, U64) => U64,

            (I8, I16) => I16,
            (I8, I32) => I32,
            (I8, I64) => I64,
            (I16, I32) => I32,
            (I16, I64) => I64,
            (I32, I64) => I64,

            (U8, I8) => I16,
            (U8, I16) => I16,
            (U8, I32) => I32,
            (U8, I64) => I64,
            (U16, I16) => I32,
            (U16, I32) => I32,
            (U16, I64) => I64,
            (U32, I32) => I64,
            (U32, I64) => I64,
            (U64, I64) => F64,

            (F32, U8) => F32,
            (F32, U16) => F32,
            (F32, U32) => F32,
            (F32, U64) => F64,
            (F32, I8) => F32,
            (F32, I16) => F32,
            (F32, I32) => F32,
            (F32, I64) => F64,

            (F64, _) => F64,

            (a, b) if a == b => a,
            (x, y) => y.join(x),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarTy::F32 | ScalarTy::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float() && self != ScalarTy::Bool
    }

    pub fn size_of(self) -> usize {
        use ScalarTy::*;
        match self {
            Bool | U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }

    /// Identity element for the SUM reduction, staged as `f64`. Only used
    /// for a float dtype; reduce.rs seeds an integer dtype's SUM/PROD
    /// accumulator natively instead, so overflow wraps rather than
    /// saturating through this path.
    pub fn sum_identity(self) -> f64 {
        0.0
    }

    pub fn prod_identity(self) -> f64 {
        1.0
    }

    /// Identity element for MIN: the dtype's maximum representable value,
    /// or `+inf` for floats.
    pub fn min_identity(self) -> f64 {
        use ScalarTy::*;
        match self {
            Bool => 1.0,
            U8 => u8::MAX as f64,
            U16 => u16::MAX as f64,
            U32 => u32::MAX as f64,
            U64 => u64::MAX as f64,
            I8 => i8::MAX as f64,
            I16 => i16::MAX as f64,
            I32 => i32::MAX as f64,
            I64 => i64::MAX as f64,
            F32 => f32::INFINITY as f64,
            F64 => f64::INFINITY,
        }
    }

    /// Identity element for MAX: the dtype's minimum representable value,
    /// or `-inf` for floats.
    pub fn max_identity(self) -> f64 {
        use ScalarTy::*;
        match self {
            Bool => 0.0,
            U8 | U16 | U32 | U64 => 0.0,
            I8 => i8::MIN as f64,
            I16 => i16::MIN as f64,
            I32 => i32::MIN as f64,
            I64 => i64::MIN as f64,
            F32 => f32::NEG_INFINITY as f64,
            F64 => f64::NEG_INFINITY,
        }
    }
}

/// Marker trait for every Rust type usable as a `ScalarTy`'s element
/// representation. Mirrors the teacher's `ScalarT`.
pub trait ScalarT: Sized + Copy + ConstZero + ConstOne + 'static {
    const TY: ScalarTy;
}

impl ScalarT for bool {
    const TY: ScalarTy = ScalarTy::Bool;
}
impl ScalarT for u8 {
    const TY: ScalarTy = ScalarTy::U8;
}
impl ScalarT for u16 {
    const TY: ScalarTy = ScalarTy::U16;
}
impl ScalarT for u32 {
    const TY: ScalarTy = ScalarTy::U32;
}
impl ScalarT for u64 {
    const TY: ScalarTy = ScalarTy::U64;
}
impl ScalarT for i8 {
    const TY: ScalarTy = ScalarTy::I8;
}
impl ScalarT for i16 {
    const TY: ScalarTy = ScalarTy::I16;
}
impl ScalarT for i32 {
    const TY: ScalarTy = ScalarTy::I32;
}
impl ScalarT for i64 {
    const TY: ScalarTy = ScalarTy::I64;
}
impl ScalarT for f32 {
    const TY: ScalarTy = ScalarTy::F32;
}
impl ScalarT for f64 {
    const TY: ScalarTy = ScalarTy::F64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_commutative_on_equal_types() {
        assert_eq!(ScalarTy::F32.join(ScalarTy::F32), ScalarTy::F32);
    }

    #[test]
    fn join_promotes_narrow_to_wide() {
        assert_eq!(ScalarTy::U8.join(ScalarTy::U16), ScalarTy::U16);
        assert_eq!(ScalarTy::U16.join(ScalarTy::U8), ScalarTy::U16);
    }

    #[test]
    fn join_promotes_to_float_when_mixed_with_f64() {
        assert_eq!(ScalarTy::I32.join(ScalarTy::F64), ScalarTy::F64);
    }

    #[test]
    fn integer_identities_match_dtype_bounds() {
        assert_eq!(ScalarTy::U8.min_identity(), u8::MAX as f64);
        assert_eq!(ScalarTy::I8.max_identity(), i8::MIN as f64);
    }
}

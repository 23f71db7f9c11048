// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `ReductionEngine` (§4.6): the six decomposable reductions (`sum`, `prod`,
//! `min`, `max`, `any`, `all`), each defined by an identity element and an
//! associative, commutative merge operator so a chunked evaluation can
//! reduce every chunk locally and merge the partials without ever holding
//! the whole array in memory. `mean`/`std`/`var` are not decomposable as a
//! single pass over one quantity; `lazy.rs` builds them from `sum`/`sum of
//! squares`/element counts instead of asking this module for them directly.
//! A reduction like `median` that has no identity/merge pair at all is
//! simply not offered here — there is no fallback "whole-array" path.

use crate::kernel::KernelBuffer;
use crate::operand::ScalarValue;
use crate::scalarty::ScalarTy;
use crate::shape::{row_major_strides, AxisSlice};
use tracing::trace;

/// One of the six decomposable reductions `LazyNode` exposes as derived
/// stats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    Any,
    All,
}

/// A reduction's running partial. SUM/PROD over an integer dtype accumulate
/// natively in `i128` (wide enough to hold any dtype up to 64 bits without
/// losing precision) and truncate back to the dtype's width after every
/// merge, so overflow wraps the same way `ops.rs`'s non-reduction arithmetic
/// does. Every other combination — MIN/MAX, ANY/ALL, SUM/PROD over a float
/// dtype — stays staged through `f64`, since those never overflow their
/// input's representable range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Accumulator {
    Int(i128, ScalarTy),
    Float(f64),
}

impl ReduceOp {
    /// The dtype of a reduction's result: `Any`/`All` always answer in
    /// `Bool`, the others keep the input's dtype (callers needing a widened
    /// accumulator, e.g. summing `u8`s, promote before calling in).
    pub fn result_ty(self, input_ty: ScalarTy) -> ScalarTy {
        match self {
            ReduceOp::Any | ReduceOp::All => ScalarTy::Bool,
            _ => input_ty,
        }
    }

    /// True for SUM/PROD over an integer dtype, the only combination that
    /// accumulates natively instead of through `f64`.
    fn wraps(self, ty: ScalarTy) -> bool {
        matches!(self, ReduceOp::Sum | ReduceOp::Prod) && ty.is_integer()
    }

    /// Identity element for this reduction and input dtype.
    pub fn identity(self, ty: ScalarTy) -> Accumulator {
        if self.wraps(ty) {
            let seed = match self {
                ReduceOp::Sum => 0,
                ReduceOp::Prod => 1,
                _ => unreachable!("wraps() only returns true for Sum/Prod"),
            };
            return Accumulator::Int(seed, ty);
        }
        Accumulator::Float(match self {
            ReduceOp::Sum => ty.sum_identity(),
            ReduceOp::Prod => ty.prod_identity(),
            ReduceOp::Min => ty.min_identity(),
            ReduceOp::Max => ty.max_identity(),
            ReduceOp::Any => 0.0,
            ReduceOp::All => 1.0,
        })
    }

    /// The merge operator: associative and commutative, so chunks can be
    /// folded in any order.
    pub fn merge(self, a: Accumulator, b: Accumulator) -> Accumulator {
        use Accumulator::*;
        match (self, a, b) {
            (ReduceOp::Sum, Int(x, ty), Int(y, _)) => Int(truncate_int(x.wrapping_add(y), ty), ty),
            (ReduceOp::Prod, Int(x, ty), Int(y, _)) => Int(truncate_int(x.wrapping_mul(y), ty), ty),
            (ReduceOp::Sum, Float(x), Float(y)) => Float(x + y),
            (ReduceOp::Prod, Float(x), Float(y)) => Float(x * y),
            (ReduceOp::Min, Float(x), Float(y)) => Float(x.min(y)),
            (ReduceOp::Max, Float(x), Float(y)) => Float(x.max(y)),
            (ReduceOp::Any, Float(x), Float(y)) => Float(bool_to_f64(x != 0.0 || y != 0.0)),
            (ReduceOp::All, Float(x), Float(y)) => Float(bool_to_f64(x != 0.0 && y != 0.0)),
            (op, a, b) => unreachable!("mismatched accumulator variants for {:?}: {:?}, {:?}", op, a, b),
        }
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Truncates `v` to `ty`'s bit width and widens it back to `i128`, the same
/// bit-pattern-preserving narrowing an integer-to-integer `as` cast always
/// performs (unlike a float-to-integer cast, which saturates instead).
fn truncate_int(v: i128, ty: ScalarTy) -> i128 {
    use ScalarTy::*;
    match ty {
        U8 => v as u8 as i128,
        U16 => v as u16 as i128,
        U32 => v as u32 as i128,
        U64 => v as u64 as i128,
        I8 => v as i8 as i128,
        I16 => v as i16 as i128,
        I32 => v as i32 as i128,
        I64 => v as i64 as i128,
        Bool | F32 | F64 => v,
    }
}

fn int_elems(buffer: &KernelBuffer) -> Vec<i128> {
    use KernelBuffer::*;
    match buffer {
        U8(v) => v.iter().map(|&x| x as i128).collect(),
        U16(v) => v.iter().map(|&x| x as i128).collect(),
        U32(v) => v.iter().map(|&x| x as i128).collect(),
        U64(v) => v.iter().map(|&x| x as i128).collect(),
        I8(v) => v.iter().map(|&x| x as i128).collect(),
        I16(v) => v.iter().map(|&x| x as i128).collect(),
        I32(v) => v.iter().map(|&x| x as i128).collect(),
        I64(v) => v.iter().map(|&x| x as i128).collect(),
        Bool(_) | F32(_) | F64(_) => unreachable!("int_elems called on a non-integer buffer"),
    }
}

fn buffer_to_f64(buffer: &KernelBuffer) -> Vec<f64> {
    use KernelBuffer::*;
    match buffer {
        Bool(v) => v.iter().map(|&x| bool_to_f64(x)).collect(),
        U8(v) => v.iter().map(|&x| x as f64).collect(),
        U16(v) => v.iter().map(|&x| x as f64).collect(),
        U32(v) => v.iter().map(|&x| x as f64).collect(),
        U64(v) => v.iter().map(|&x| x as f64).collect(),
        I8(v) => v.iter().map(|&x| x as f64).collect(),
        I16(v) => v.iter().map(|&x| x as f64).collect(),
        I32(v) => v.iter().map(|&x| x as f64).collect(),
        I64(v) => v.iter().map(|&x| x as f64).collect(),
        F32(v) => v.iter().map(|&x| x as f64).collect(),
        F64(v) => v.clone(),
    }
}

/// Stages `buffer`'s elements as accumulator seeds for `op`: native `i128`
/// for SUM/PROD over an integer dtype, `f64` for everything else.
fn buffer_to_acc(op: ReduceOp, buffer: &KernelBuffer) -> Vec<Accumulator> {
    let ty = buffer.ty();
    if op.wraps(ty) {
        int_elems(buffer)
            .into_iter()
            .map(|v| Accumulator::Int(v, ty))
            .collect()
    } else {
        buffer_to_f64(buffer)
            .into_iter()
            .map(Accumulator::Float)
            .collect()
    }
}

macro_rules! narrow_variant {
    ($v:expr, $T:ty) => {
        match $v {
            Accumulator::Int(i, _) => i as $T,
            Accumulator::Float(f) => f as $T,
        }
    };
}

fn acc_to_scalar(ty: ScalarTy, acc: Accumulator) -> ScalarValue {
    use ScalarTy::*;
    match ty {
        Bool => ScalarValue::Bool(match acc {
            Accumulator::Int(i, _) => i != 0,
            Accumulator::Float(f) => f != 0.0,
        }),
        U8 => ScalarValue::U8(narrow_variant!(acc, u8)),
        U16 => ScalarValue::U16(narrow_variant!(acc, u16)),
        U32 => ScalarValue::U32(narrow_variant!(acc, u32)),
        U64 => ScalarValue::U64(narrow_variant!(acc, u64)),
        I8 => ScalarValue::I8(narrow_variant!(acc, i8)),
        I16 => ScalarValue::I16(narrow_variant!(acc, i16)),
        I32 => ScalarValue::I32(narrow_variant!(acc, i32)),
        I64 => ScalarValue::I64(narrow_variant!(acc, i64)),
        F32 => ScalarValue::F32(narrow_variant!(acc, f32)),
        F64 => ScalarValue::F64(narrow_variant!(acc, f64)),
    }
}

/// Reduces the whole of `buffer` (ignoring shape) down to one scalar.
pub fn reduce_all(op: ReduceOp, buffer: &KernelBuffer) -> ScalarValue {
    let input_ty = buffer.ty();
    let ty = op.result_ty(input_ty);
    let acc = buffer_to_acc(op, buffer)
        .into_iter()
        .fold(op.identity(input_ty), |acc, v| op.merge(acc, v));
    acc_to_scalar(ty, acc)
}

/// Reduces `buffer` (shaped `local_shape`) along `axes` (0-indexed into
/// `local_shape`, any order, no duplicates), leaving the other axes intact.
/// Returns the partial result as a flat row-major accumulator buffer plus
/// its (reduced) shape — `driver.rs` narrows it back to the result dtype and
/// merges it into the whole-array accumulator once every chunk has
/// contributed.
pub fn reduce_local(
    op: ReduceOp,
    buffer: &KernelBuffer,
    local_shape: &[usize],
    axes: &[usize],
) -> (Vec<Accumulator>, Vec<usize>) {
    trace!(?axes, local_shape = ?local_shape, "reduce_local");
    if axes.is_empty() {
        return (buffer_to_acc(op, buffer), local_shape.to_vec());
    }
    let input_ty = buffer.ty();
    let values = buffer_to_acc(op, buffer);
    let out_shape: Vec<usize> = local_shape
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect();
    let out_total: usize = out_shape.iter().product::<usize>().max(1);
    let mut out = vec![op.identity(input_ty); out_total];
    let out_strides = row_major_strides(&out_shape);

    let total: usize = local_shape.iter().product();
    let mut idx = vec![0usize; local_shape.len()];
    for pos in 0..total {
        let mut rem = pos;
        for d in (0..local_shape.len()).rev() {
            let dim = local_shape[d].max(1);
            idx[d] = rem % dim;
            rem /= dim;
        }
        let mut out_pos = 0usize;
        let mut out_axis = 0usize;
        for d in 0..local_shape.len() {
            if axes.contains(&d) {
                continue;
            }
            out_pos += idx[d] * out_strides[out_axis];
            out_axis += 1;
        }
        out[out_pos] = op.merge(out[out_pos], values[pos]);
    }
    (out, out_shape)
}

/// Merges a chunk's local partial (`local`, shaped `local_shape`, already
/// reduced over the reduction axes) into the whole-array accumulator
/// `global` (shaped `global_shape`) at the retained-axis position described
/// by `offset` — the start of `chunk_slice` on each retained axis, in the
/// same order as `local_shape`.
pub fn accumulate(
    op: ReduceOp,
    global: &mut [Accumulator],
    global_shape: &[usize],
    local: &[Accumulator],
    local_shape: &[usize],
    offset: &[usize],
) {
    if local_shape.is_empty() {
        global[0] = op.merge(global[0], local[0]);
        return;
    }
    let global_strides = row_major_strides(global_shape);
    let local_strides = row_major_strides(local_shape);
    let total: usize = local_shape.iter().product();
    let mut idx = vec![0usize; local_shape.len()];
    for pos in 0..total {
        let mut rem = pos;
        for d in (0..local_shape.len()).rev() {
            let dim = local_shape[d].max(1);
            idx[d] = rem % dim;
            rem /= dim;
        }
        let mut global_pos = 0usize;
        for d in 0..local_shape.len() {
            global_pos += (offset[d] + idx[d]) * global_strides[d];
        }
        let local_pos: usize = idx
            .iter()
            .zip(local_strides.iter())
            .map(|(&i, &s)| i * s)
            .sum();
        global[global_pos] = op.merge(global[global_pos], local[local_pos]);
    }
}

/// Narrows an accumulator buffer back to the reduction's result dtype, as a
/// dense row-major `KernelBuffer`.
pub fn finalize(op: ReduceOp, input_ty: ScalarTy, values: &[Accumulator]) -> KernelBuffer {
    let ty = op.result_ty(input_ty);
    use ScalarTy::*;
    match ty {
        Bool => KernelBuffer::Bool(
            values
                .iter()
                .map(|&v| match v {
                    Accumulator::Int(i, _) => i != 0,
                    Accumulator::Float(f) => f != 0.0,
                })
                .collect(),
        ),
        U8 => KernelBuffer::U8(values.iter().map(|&v| narrow_variant!(v, u8)).collect()),
        U16 => KernelBuffer::U16(values.iter().map(|&v| narrow_variant!(v, u16)).collect()),
        U32 => KernelBuffer::U32(values.iter().map(|&v| narrow_variant!(v, u32)).collect()),
        U64 => KernelBuffer::U64(values.iter().map(|&v| narrow_variant!(v, u64)).collect()),
        I8 => KernelBuffer::I8(values.iter().map(|&v| narrow_variant!(v, i8)).collect()),
        I16 => KernelBuffer::I16(values.iter().map(|&v| narrow_variant!(v, i16)).collect()),
        I32 => KernelBuffer::I32(values.iter().map(|&v| narrow_variant!(v, i32)).collect()),
        I64 => KernelBuffer::I64(values.iter().map(|&v| narrow_variant!(v, i64)).collect()),
        F32 => KernelBuffer::F32(values.iter().map(|&v| narrow_variant!(v, f32)).collect()),
        F64 => KernelBuffer::F64(values.iter().map(|&v| narrow_variant!(v, f64)).collect()),
    }
}

/// Start offset on each retained axis of `chunk_slice`, in the order
/// `reduce_local`'s output keeps its axes (every axis not in `axes`).
pub fn retained_offset(chunk_slice: &[AxisSlice], axes: &[usize]) -> Vec<usize> {
    chunk_slice
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, s)| s.start.unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_reduces_whole_buffer() {
        let buf = KernelBuffer::F64(vec![1.0, 2.0, 3.0, 4.0]);
        let result = reduce_all(ReduceOp::Sum, &buf);
        assert_eq!(result, ScalarValue::F64(10.0));
    }

    #[test]
    fn sum_wraps_on_integer_overflow() {
        let buf = KernelBuffer::U8(vec![200, 200]);
        let result = reduce_all(ReduceOp::Sum, &buf);
        assert_eq!(result, ScalarValue::U8(144));
    }

    #[test]
    fn prod_wraps_on_integer_overflow() {
        let buf = KernelBuffer::U8(vec![200, 3]);
        let result = reduce_all(ReduceOp::Prod, &buf);
        assert_eq!(result, ScalarValue::U8(88)); // 600 mod 256
    }

    #[test]
    fn any_and_all_short_circuit_over_bools() {
        let some_true = KernelBuffer::Bool(vec![false, false, true]);
        assert_eq!(reduce_all(ReduceOp::Any, &some_true), ScalarValue::Bool(true));
        assert_eq!(reduce_all(ReduceOp::All, &some_true), ScalarValue::Bool(false));
    }

    #[test]
    fn reduce_local_collapses_named_axis() {
        // shape (2, 3), row-major: [[1,2,3],[4,5,6]]; sum over axis 0.
        let buf = KernelBuffer::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let (values, shape) = reduce_local(ReduceOp::Sum, &buf, &[2, 3], &[0]);
        assert_eq!(shape, vec![3]);
        assert_eq!(
            values,
            vec![
                Accumulator::Float(5.0),
                Accumulator::Float(7.0),
                Accumulator::Float(9.0),
            ]
        );
    }

    #[test]
    fn reduce_local_wraps_integer_axis_sum() {
        // shape (2, 2): [[200, 0], [200, 0]]; sum over axis 0 wraps column 0.
        let buf = KernelBuffer::U8(vec![200, 0, 200, 0]);
        let (values, shape) = reduce_local(ReduceOp::Sum, &buf, &[2, 2], &[0]);
        assert_eq!(shape, vec![2]);
        assert_eq!(
            values,
            vec![Accumulator::Int(144, ScalarTy::U8), Accumulator::Int(0, ScalarTy::U8)]
        );
    }

    #[test]
    fn accumulate_merges_partial_at_offset() {
        let mut global = vec![ReduceOp::Sum.identity(ScalarTy::F64); 4];
        accumulate(
            ReduceOp::Sum,
            &mut global,
            &[4],
            &[Accumulator::Float(10.0), Accumulator::Float(20.0)],
            &[2],
            &[2],
        );
        assert_eq!(
            global,
            vec![
                Accumulator::Float(0.0),
                Accumulator::Float(0.0),
                Accumulator::Float(10.0),
                Accumulator::Float(20.0),
            ]
        );
    }

    #[test]
    fn finalize_narrows_back_to_integer_dtype() {
        let values = [Accumulator::Float(10.0), Accumulator::Float(20.0)];
        let buf = finalize(ReduceOp::Min, ScalarTy::U8, &values);
        assert_eq!(buf, KernelBuffer::U8(vec![10, 20]));
    }

    #[test]
    fn finalize_wraps_integer_sum_accumulator() {
        let values = [Accumulator::Int(400, ScalarTy::U8)];
        let buf = finalize(ReduceOp::Sum, ScalarTy::U8, &values);
        assert_eq!(buf, KernelBuffer::U8(vec![144]));
    }
}

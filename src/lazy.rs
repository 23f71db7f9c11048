// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `LazyNode` (§3, §4.7): the user-facing expression object. Holds an
//! expression string and an operand table; every operator method returns a
//! *new* node built by `expr::fuse`/`expr::build_binary`/`expr::apply_unary`
//! rather than mutating `self` in place. `shape` is memoized after its
//! first successful computation; `dtype` is never cached, since it's cheap
//! to recompute (one `DefaultKernel::evaluate` call over single-element
//! scalar samples) and the expression text it depends on never changes
//! after construction anyway.

use std::cell::RefCell;

use crate::container::MemContainer;
use crate::driver::{self, EvalDriver};
use crate::error::{Error, Result};
use crate::expr::{self, Combine, UnaryCombine};
use crate::kernel::{DefaultKernel, Kernel, KernelOperand};
use crate::operand::{DenseArray, Operand, OperandTable, ScalarValue};
use crate::options::EvalOptions;
use crate::persist;
use crate::reduce::ReduceOp;
use crate::scalarty::ScalarTy;
use crate::shape::AxisSlice;

/// A symbolic, not-yet-evaluated expression over named operands. See the
/// module doc comment for the mutation/memoization contract.
#[derive(Clone)]
pub struct LazyNode {
    expr: String,
    operands: OperandTable,
    shape: RefCell<Option<Vec<usize>>>,
}

impl LazyNode {
    /// Wraps a single operand as a node whose whole expression is that
    /// operand's placeholder (`o0`).
    pub fn from_operand(operand: Operand) -> LazyNode {
        let mut operands = OperandTable::new();
        operands.push(operand);
        LazyNode {
            expr: expr::leaf(0),
            operands,
            shape: RefCell::new(None),
        }
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn operand_table(&self) -> &OperandTable {
        &self.operands
    }

    fn operand_vec(&self) -> Vec<Operand> {
        (0..self.operands.len())
            .map(|i| self.operands.get(i).expect("index within table bounds").clone())
            .collect()
    }

    /// The broadcast shape of the expression's array operands (§4.3 Rule
    /// 3/5), memoized after its first successful computation.
    pub fn shape(&self) -> Result<Vec<usize>> {
        if let Some(shape) = self.shape.borrow().as_ref() {
            return Ok(shape.clone());
        }
        let validation = crate::validate::validate(&self.operand_vec(), None)?;
        *self.shape.borrow_mut() = Some(validation.shape.clone());
        Ok(validation.shape)
    }

    /// The expression's result type, found by evaluating it on a
    /// single-element scalar sample of every operand (`1`/`1.0`/`true`,
    /// chosen so an integer division in the expression never samples a
    /// divide-by-zero). Never cached: the expression text is fixed once a
    /// node is built, so recomputation is cheap and the cache would save
    /// nothing but a `DefaultKernel::evaluate` call over one element.
    pub fn dtype(&self) -> Result<ScalarTy> {
        let samples: Vec<KernelOperand> = (0..self.operands.len())
            .map(|i| {
                let ty = self.operands.get(i).expect("index within table bounds").ty();
                KernelOperand::Scalar(sample_value(ty))
            })
            .collect();
        let kernel = DefaultKernel::new();
        kernel
            .evaluate(&self.expr, &samples)
            .map(|buffer| buffer.ty())
    }

    fn combine_with_node(&self, combine: Combine, other: &LazyNode) -> LazyNode {
        let mut operands = self.operands.clone();
        let fused = expr::fuse(&self.expr, &mut operands, combine, &other.expr, &other.operands);
        LazyNode {
            expr: fused,
            operands,
            shape: RefCell::new(None),
        }
    }

    fn combine_with_scalar(&self, combine: Combine, value: ScalarValue) -> LazyNode {
        let fused = expr::build_binary(combine, &self.expr, &value.literal());
        LazyNode {
            expr: fused,
            operands: self.operands.clone(),
            shape: RefCell::new(None),
        }
    }

    fn unary(&self, combine: UnaryCombine) -> LazyNode {
        LazyNode {
            expr: expr::apply_unary(combine, &self.expr),
            operands: self.operands.clone(),
            shape: RefCell::new(None),
        }
    }

    fn driver() -> EvalDriver<'static> {
        // `DefaultKernel` is a unit struct; a `'static` reference to it
        // costs nothing and lets every call site build a fresh driver
        // without threading a kernel reference through every method.
        static KERNEL: DefaultKernel = DefaultKernel;
        EvalDriver::new(&KERNEL)
    }

    /// Evaluates the whole expression chunk by chunk into a freshly
    /// allocated container, using the driver's own geometry choice.
    pub fn eval(&self) -> Result<MemContainer> {
        Self::driver().chunks_eval(&self.expr, &self.operands)
    }

    /// Evaluates the whole expression, honoring `options`' output-geometry
    /// overrides (`chunks`, `blocks`, `output_locator`).
    pub fn eval_with_options(&self, options: &EvalOptions) -> Result<MemContainer> {
        Self::driver().chunks_eval_with_options(&self.expr, &self.operands, options)
    }

    /// Slicing sugar (`__getitem__`): evaluates the expression only over
    /// the requested region, returning a dense result.
    pub fn getitem(&self, item: &[AxisSlice]) -> Result<DenseArray> {
        Self::driver().slices_eval(&self.expr, &self.operands, item)
    }

    /// Evaluates the whole expression eagerly into a dense in-memory
    /// result, discarding any chunked structure. Used internally by the
    /// derived statistics (§4.7) to materialize an intermediate that the
    /// next reduction pass needs fully in memory; also useful directly for
    /// a caller who knows the result is small.
    pub fn materialize(&self) -> Result<Operand> {
        let shape = self.shape()?;
        let whole: Vec<AxisSlice> = shape.iter().map(|&d| AxisSlice::range(0, d)).collect();
        let array = self.getitem(&whole)?;
        Ok(dense_to_operand(array))
    }

    fn reduce_op(&self, op: ReduceOp, axes: Option<&[usize]>) -> Result<Operand> {
        Self::driver().reduce(&self.expr, &self.operands, op, axes)
    }

    pub fn sum(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::Sum, axes)
    }

    pub fn prod(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::Prod, axes)
    }

    pub fn min(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::Min, axes)
    }

    pub fn max(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::Max, axes)
    }

    pub fn any(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::Any, axes)
    }

    pub fn all(&self, axes: Option<&[usize]>) -> Result<Operand> {
        self.reduce_op(ReduceOp::All, axes)
    }

    /// `mean ≡ sum / count(axis)` (§4.7): the division is built as a new
    /// node over the (already collapsed) sum and evaluated immediately,
    /// since a reduction's result is small enough that deferring it buys
    /// nothing.
    pub fn mean(&self, axes: Option<&[usize]>) -> Result<Operand> {
        let full_shape = self.shape()?;
        let axes_vec = resolve_axes(axes, full_shape.len());
        let count = reduced_count(&full_shape, &axes_vec)?;
        let sum = self.sum(Some(&axes_vec))?;
        divide_by_count(sum, count)
    }

    /// `var`/`std` (§4.7): mean with `keepdims` so it broadcasts against
    /// `self`, the squared centered deviation, materialized (the driver
    /// can't fuse a second reduction over an expression whose chunk shapes
    /// no longer align once a dense broadcast operand enters it), then
    /// reduced again with the `ddof` correction applied to the divisor.
    pub fn var(&self, axes: Option<&[usize]>, ddof: usize) -> Result<Operand> {
        let full_shape = self.shape()?;
        let axes_vec = resolve_axes(axes, full_shape.len());
        let count = reduced_count(&full_shape, &axes_vec)?;
        if count <= ddof {
            return Err(Error::reduction(format!(
                "ddof ({}) must be smaller than the reduced element count ({})",
                ddof, count
            )));
        }

        let sum = self.sum(Some(&axes_vec))?;
        let mean = divide_by_count(sum, count)?;
        let mean_keepdims = reshape_keepdims(mean, &full_shape, &axes_vec)?;
        let mean_node = LazyNode::from_operand(mean_keepdims);

        let deviation = self.sub(&mean_node);
        let squared = deviation.mul(&deviation);
        let materialized = squared.materialize()?;

        let sq_node = LazyNode::from_operand(materialized);
        let sq_sum = sq_node.sum(Some(&axes_vec))?;
        divide_by_count(sq_sum, count - ddof)
    }

    pub fn std(&self, axes: Option<&[usize]>, ddof: usize) -> Result<Operand> {
        let variance = self.var(axes, ddof)?;
        LazyNode::from_operand(variance).sqrt().materialize()
    }

    /// Persists this node's expression and every operand's locator into
    /// `out_locator`'s metadata (§4.8). Every array operand must already be
    /// a chunked container with its own locator.
    pub fn save(&self, out_locator: &str) -> Result<()> {
        persist::save(&self.expr, &self.operands, out_locator)
    }

    /// Reopens a persisted expression (§4.8), re-resolving every operand
    /// locator against `resolve` (the caller's own container lookup — this
    /// crate has no notion of a filesystem path to resolve a locator
    /// against on its own) and re-validating the expression against the
    /// reconstructed operand table and function allow-list.
    pub fn open(locator: &str, resolve: impl Fn(&str) -> Result<Operand>) -> Result<LazyNode> {
        let persisted = persist::open(locator)?;
        let mut operands = OperandTable::new();
        let mut names: Vec<String> = persisted.operand_locators.keys().cloned().collect();
        names.sort_by_key(|n| n[1..].parse::<usize>().unwrap_or(usize::MAX));
        for name in &names {
            let operand_locator = &persisted.operand_locators[name];
            operands.push(resolve(operand_locator)?);
        }
        let kernel = DefaultKernel::new();
        let arg_names: Vec<String> = (0..operands.len()).map(OperandTable::name).collect();
        kernel.validate(&persisted.expression, &arg_names)?;
        Ok(LazyNode {
            expr: persisted.expression,
            operands,
            shape: RefCell::new(None),
        })
    }
}

macro_rules! binary_infix_ops {
    ($(($name:ident, $scalar_name:ident, $op:literal)),* $(,)?) => {
        impl LazyNode {
            $(
                pub fn $name(&self, other: &LazyNode) -> LazyNode {
                    self.combine_with_node(Combine::Infix($op), other)
                }
                pub fn $scalar_name(&self, value: impl Into<ScalarValue>) -> LazyNode {
                    self.combine_with_scalar(Combine::Infix($op), value.into())
                }
            )*
        }
    };
}

binary_infix_ops! {
    (add, add_scalar, "+"),
    (sub, sub_scalar, "-"),
    (mul, mul_scalar, "*"),
    (div, div_scalar, "/"),
    (rem, rem_scalar, "%"),
    (pow, pow_scalar, "**"),
    (bitand, bitand_scalar, "&"),
    (bitor, bitor_scalar, "|"),
    (bitxor, bitxor_scalar, "^"),
    (lt, lt_scalar, "<"),
    (le, le_scalar, "<="),
    (eq, eq_scalar, "=="),
    (ne, ne_scalar, "!="),
    (ge, ge_scalar, ">="),
    (gt, gt_scalar, ">"),
}

macro_rules! binary_call_ops {
    ($(($name:ident, $scalar_name:ident, $func:literal)),* $(,)?) => {
        impl LazyNode {
            $(
                pub fn $name(&self, other: &LazyNode) -> LazyNode {
                    self.combine_with_node(Combine::Call($func), other)
                }
                pub fn $scalar_name(&self, value: impl Into<ScalarValue>) -> LazyNode {
                    self.combine_with_scalar(Combine::Call($func), value.into())
                }
            )*
        }
    };
}

binary_call_ops! {
    (atan2, atan2_scalar, "arctan2"),
    (contains, contains_scalar, "contains"),
}

macro_rules! logical_ops {
    ($(($name:ident, $op:literal)),* $(,)?) => {
        impl LazyNode {
            $(
                pub fn $name(&self, other: &LazyNode) -> LazyNode {
                    self.combine_with_node(Combine::Keyword($op), other)
                }
            )*
        }
    };
}

logical_ops! {
    (and, "and"),
    (or, "or"),
}

macro_rules! unary_call_ops {
    ($($name:ident => $func:literal),* $(,)?) => {
        impl LazyNode {
            $(
                pub fn $name(&self) -> LazyNode {
                    self.unary(UnaryCombine::Call($func))
                }
            )*
        }
    };
}

unary_call_ops! {
    sin => "sin", cos => "cos", tan => "tan", sqrt => "sqrt",
    sinh => "sinh", cosh => "cosh", tanh => "tanh",
    arcsin => "arcsin", arccos => "arccos", arctan => "arctan",
    arcsinh => "arcsinh", arccosh => "arccosh", arctanh => "arctanh",
    exp => "exp", expm1 => "expm1",
    log => "log", log10 => "log10", log1p => "log1p",
    conj => "conj", real => "real", imag => "imag", abs => "abs",
    isnan => "isnan", isinf => "isinf", isfinite => "isfinite",
}

impl LazyNode {
    pub fn neg(&self) -> LazyNode {
        self.unary(UnaryCombine::Prefix("-"))
    }

    pub fn invert(&self) -> LazyNode {
        self.unary(UnaryCombine::Prefix("~"))
    }

    pub fn not(&self) -> LazyNode {
        self.unary(UnaryCombine::Not)
    }
}

fn sample_value(ty: ScalarTy) -> ScalarValue {
    use ScalarTy::*;
    match ty {
        Bool => ScalarValue::Bool(true),
        U8 => ScalarValue::U8(1),
        U16 => ScalarValue::U16(1),
        U32 => ScalarValue::U32(1),
        U64 => ScalarValue::U64(1),
        I8 => ScalarValue::I8(1),
        I16 => ScalarValue::I16(1),
        I32 => ScalarValue::I32(1),
        I64 => ScalarValue::I64(1),
        F32 => ScalarValue::F32(1.0),
        F64 => ScalarValue::F64(1.0),
    }
}

fn resolve_axes(axes: Option<&[usize]>, rank: usize) -> Vec<usize> {
    axes.map(<[usize]>::to_vec).unwrap_or_else(|| (0..rank).collect())
}

fn reduced_count(full_shape: &[usize], axes: &[usize]) -> Result<usize> {
    let mut count = 1usize;
    for &axis in axes {
        let dim = *full_shape.get(axis).ok_or_else(|| {
            Error::shape(format!(
                "reduction axis {} out of range for shape {:?}",
                axis, full_shape
            ))
        })?;
        count *= dim;
    }
    Ok(count)
}

/// Wraps `operand` as a node and divides by `count`, evaluating the
/// division immediately (the operand is already reduction-sized, never
/// worth deferring).
fn divide_by_count(operand: Operand, count: usize) -> Result<Operand> {
    LazyNode::from_operand(operand).div_scalar(count as f64).materialize()
}

/// Reinserts size-1 axes at every reduced position so `operand` broadcasts
/// against the original, full-rank expression (`keepdims`). Row-major
/// layout means this is a pure shape relabeling: no bytes move.
fn reshape_keepdims(operand: Operand, full_shape: &[usize], axes: &[usize]) -> Result<Operand> {
    let keep_shape: Vec<usize> = full_shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
        .collect();
    match operand {
        Operand::Dense(_, array) => Ok(Operand::dense(DenseArray::new(
            keep_shape,
            array.ty,
            array.bytes,
        ))),
        Operand::Scalar(_, value) => {
            let bytes = driver::single_scalar_bytes(value);
            Ok(Operand::dense(DenseArray::new(keep_shape, value.ty(), bytes)))
        }
        Operand::Chunked(..) => unreachable!("reduce() never returns a chunked operand"),
    }
}

fn dense_to_operand(array: DenseArray) -> Operand {
    if array.shape.is_empty() {
        let buffer = crate::kernel::KernelBuffer::from_bytes(array.ty, &array.bytes)
            .expect("materialized scalar buffer matches its own declared dtype");
        Operand::scalar(driver::single_scalar(buffer))
    } else {
        Operand::dense(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, MemContainer};

    fn dense_f64(shape: Vec<usize>, data: &[f64]) -> Operand {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        Operand::dense(DenseArray::new(shape, ScalarTy::F64, bytes))
    }

    #[test]
    fn shape_is_memoized_after_first_success() {
        let node = LazyNode::from_operand(dense_f64(vec![2, 3], &[0.0; 6]));
        assert_eq!(node.shape().unwrap(), vec![2, 3]);
        assert!(node.shape.borrow().is_some());
        assert_eq!(node.shape().unwrap(), vec![2, 3]);
    }

    #[test]
    fn dtype_promotes_across_mixed_operand_types() {
        let a = LazyNode::from_operand(Operand::scalar(1i32));
        let b = LazyNode::from_operand(Operand::scalar(2.0f64));
        let fused = a.add(&b);
        assert_eq!(fused.dtype().unwrap(), ScalarTy::F64);
    }

    #[test]
    fn add_scalar_inlines_a_literal_without_growing_the_operand_table() {
        let node = LazyNode::from_operand(dense_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]));
        let fused = node.add_scalar(5i64);
        assert_eq!(fused.operand_table().len(), 1);
        assert_eq!(fused.expr(), "(o0 + 5)");
    }

    #[test]
    fn add_scalar_renders_bool_literal_in_grammar_spelling() {
        let node = LazyNode::from_operand(Operand::scalar(true));
        let fused = node.and(&LazyNode::from_operand(Operand::scalar(false)));
        assert!(fused.expr().contains("o0"));
        let literal = ScalarValue::Bool(true).literal();
        assert_eq!(literal, "True");
    }

    #[test]
    fn fuse_deduplicates_a_shared_operand_instance() {
        let shared = dense_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]);
        let node = LazyNode::from_operand(shared.clone());
        let other = LazyNode::from_operand(shared);
        let fused = node.add(&other);
        assert_eq!(fused.operand_table().len(), 1);
        assert_eq!(fused.expr(), "(o0 + o0)");
    }

    #[test]
    fn chunks_eval_sums_two_dense_operands() {
        let a = LazyNode::from_operand(dense_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]));
        let b = LazyNode::from_operand(dense_f64(vec![4], &[10.0, 10.0, 10.0, 10.0]));
        let fused = a.add(&b);
        let out: MemContainer = fused.eval().unwrap();
        let mut bytes = Vec::new();
        out.decompress_chunk(0, &mut bytes).unwrap();
        let got: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(got, vec![11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn mean_of_a_dense_vector_divides_sum_by_count() {
        let node = LazyNode::from_operand(dense_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]));
        let result = node.mean(None).unwrap();
        match result {
            Operand::Scalar(_, ScalarValue::F64(v)) => assert!((v - 2.5).abs() < 1e-9),
            other => panic!("expected an f64 scalar, got {:?}", other.ty()),
        }
    }

    #[test]
    fn var_matches_the_population_variance_with_ddof_zero() {
        let node = LazyNode::from_operand(dense_f64(vec![4], &[2.0, 4.0, 4.0, 4.0]));
        let result = node.var(None, 0).unwrap();
        match result {
            Operand::Scalar(_, ScalarValue::F64(v)) => assert!((v - 0.75).abs() < 1e-9),
            other => panic!("expected an f64 scalar, got {:?}", other.ty()),
        }
    }

    #[test]
    fn var_rejects_ddof_at_least_the_reduced_count() {
        let node = LazyNode::from_operand(dense_f64(vec![2], &[1.0, 2.0]));
        assert!(node.var(None, 2).is_err());
    }

    #[test]
    fn getitem_reads_a_sub_range() {
        let node = LazyNode::from_operand(dense_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]));
        let slice = node.getitem(&[AxisSlice::range(1, 3)]).unwrap();
        let got: Vec<f64> = slice
            .bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(got, vec![2.0, 3.0]);
    }
}

// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::container::Container;
use crate::scalarty::ScalarTy;

/// A stable, monotonically-issued token identifying one operand *instance*,
/// independent of its value. `ExpressionString::fuse` compares these (not
/// `PartialEq` on the operand's contents) to decide whether the right-hand
/// table's entry is "the same operand" as one already in the left-hand
/// table, standing in for the teacher's scoped equality-overload guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(u64);

impl OperandId {
    pub fn fresh() -> OperandId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OperandId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A single-element operand. Rendered textually (by `ExpressionString`) as
/// its decimal/boolean literal when inlined into an expression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    pub fn ty(&self) -> ScalarTy {
        use ScalarValue::*;
        match self {
            Bool(_) => ScalarTy::Bool,
            U8(_) => ScalarTy::U8,
            U16(_) => ScalarTy::U16,
            U32(_) => ScalarTy::U32,
            U64(_) => ScalarTy::U64,
            I8(_) => ScalarTy::I8,
            I16(_) => ScalarTy::I16,
            I32(_) => ScalarTy::I32,
            I64(_) => ScalarTy::I64,
            F32(_) => ScalarTy::F32,
            F64(_) => ScalarTy::F64,
        }
    }

    /// Value as `f64`, for kernel dispatch that stages arithmetic/identity
    /// values in a single wide type before narrowing to the result dtype.
    pub fn as_f64(&self) -> f64 {
        use ScalarValue::*;
        match *self {
            Bool(b) => b as u8 as f64,
            U8(v) => v as f64,
            U16(v) => v as f64,
            U32(v) => v as f64,
            U64(v) => v as f64,
            I8(v) => v as f64,
            I16(v) => v as f64,
            I32(v) => v as f64,
            I64(v) => v as f64,
            F32(v) => v as f64,
            F64(v) => v,
        }
    }

    /// Renders the value the way `ExpressionString::build_*` inlines a
    /// scalar operand directly into the expression text. `Bool` renders as
    /// `True`/`False` (the grammar's boolean literal spelling), not Rust's
    /// own `true`/`false`, which the lexer would tokenize as a plain,
    /// unknown identifier.
    pub fn literal(&self) -> String {
        use ScalarValue::*;
        match *self {
            Bool(b) => if b { "True" } else { "False" }.to_string(),
            U8(v) => v.to_string(),
            U16(v) => v.to_string(),
            U32(v) => v.to_string(),
            U64(v) => v.to_string(),
            I8(v) => v.to_string(),
            I16(v) => v.to_string(),
            I32(v) => v.to_string(),
            I64(v) => v.to_string(),
            F32(v) => format!("{:?}", v),
            F64(v) => format!("{:?}", v),
        }
    }
}

/// A dense, fully in-memory N-D buffer: raw bytes plus the shape/dtype
/// needed to reinterpret them. Used for operands small enough (or
/// intermediate enough) not to warrant chunked storage.
#[derive(Clone, Debug)]
pub struct DenseArray {
    pub shape: Vec<usize>,
    pub ty: ScalarTy,
    pub bytes: Vec<u8>,
}

impl DenseArray {
    pub fn new(shape: Vec<usize>, ty: ScalarTy, bytes: Vec<u8>) -> DenseArray {
        let expected = shape.iter().product::<usize>() * ty.size_of();
        assert_eq!(bytes.len(), expected, "dense array byte length mismatch");
        DenseArray { shape, ty, bytes }
    }
}

/// A named input to an expression: a scalar, a dense buffer, or a reference
/// to a chunked `Container`. Identity (`OperandId`) distinguishes "same
/// instance" from "equal value", which matters during expression fusion.
#[derive(Clone)]
pub enum Operand {
    Scalar(OperandId, ScalarValue),
    Dense(OperandId, DenseArray),
    Chunked(OperandId, Rc<dyn Container>),
}

impl Operand {
    pub fn scalar(v: impl Into<ScalarValue>) -> Operand {
        Operand::Scalar(OperandId::fresh(), v.into())
    }

    pub fn dense(array: DenseArray) -> Operand {
        Operand::Dense(OperandId::fresh(), array)
    }

    pub fn chunked(container: Rc<dyn Container>) -> Operand {
        Operand::Chunked(OperandId::fresh(), container)
    }

    pub fn id(&self) -> OperandId {
        match self {
            Operand::Scalar(id, _) => *id,
            Operand::Dense(id, _) => *id,
            Operand::Chunked(id, _) => *id,
        }
    }

    pub fn ty(&self) -> ScalarTy {
        match self {
            Operand::Scalar(_, v) => v.ty(),
            Operand::Dense(_, a) => a.ty,
            Operand::Chunked(_, c) => c.dtype(),
        }
    }

    /// `None` for scalars, which carry no shape.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            Operand::Scalar(..) => None,
            Operand::Dense(_, a) => Some(a.shape.clone()),
            Operand::Chunked(_, c) => Some(c.shape().to_vec()),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Operand::Chunked(..))
    }
}

macro_rules! impl_scalar_value_from {
    ($($T:ty => $ctor:ident),* $(,)?) => {
        $(
            impl From<$T> for ScalarValue {
                fn from(v: $T) -> ScalarValue {
                    ScalarValue::$ctor(v)
                }
            }
            impl From<$T> for Operand {
                fn from(v: $T) -> Operand {
                    Operand::scalar(v)
                }
            }
        )*
    }
}

impl_scalar_value_from! {
    bool => Bool,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    f32 => F32, f64 => F64,
}

/// Ordered mapping from placeholder name (`o0`, `o1`, ...) to `Operand`.
/// Names are assigned in insertion order; `fuse` relies on that order to
/// rebase the right-hand table's placeholders.
#[derive(Clone, Default)]
pub struct OperandTable {
    operands: Vec<Operand>,
}

impl OperandTable {
    pub fn new() -> OperandTable {
        OperandTable {
            operands: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Operand)> {
        self.operands.iter().enumerate()
    }

    pub fn name(index: usize) -> String {
        format!("o{}", index)
    }

    /// Appends `operand`, returning its placeholder index (`o<index>`).
    pub fn push(&mut self, operand: Operand) -> usize {
        let idx = self.operands.len();
        self.operands.push(operand);
        idx
    }

    /// Finds an existing entry with the same `OperandId`, used by `fuse` to
    /// decide whether a right-hand operand should be deduplicated against
    /// one already present on the left.
    pub fn find_by_id(&self, id: OperandId) -> Option<usize> {
        self.operands.iter().position(|op| op.id() == id)
    }
}

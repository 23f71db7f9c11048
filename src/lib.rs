// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * A lazy, chunked, out-of-core N-dimensional array expression engine.
 *
 * A [`lazy::LazyNode`] records an arithmetic/comparison/logical/function
 * expression over named operands as plain text (`(o0 + o1)`, never an
 * in-memory AST) plus a flat operand table. Nothing is evaluated until the
 * caller asks for a result — a full materialization, a sub-slice, or a
 * reduction — at which point [`driver::EvalDriver`] walks the output's
 * chunks one at a time, asking [`fetch::OperandFetcher`] to materialize each
 * operand's contribution to that chunk and [`kernel::Kernel`] to evaluate
 * the expression over the resulting buffers. No operand, nor any
 * intermediate result, is ever held fully in memory unless it already was
 * (a dense array) or unless the expression is free of any chunked operand
 * at all.
 *
 * The building blocks below mirror the same division of labor the crate
 * this one is descended from used for its SIMD operator tables: a small,
 * closed repertoire of type-specialized inner loops (`ops.rs`), a dynamic
 * dispatcher over them keyed by a runtime type tag (`kernel.rs`), and an
 * outer driver that amortizes that dispatch over many elements at once
 * rather than paying it per element.
 */

#[macro_use]
mod macros;

mod traits;
mod zeroone;
mod consts;
mod scalarty;
mod ops;

mod error;
mod operand;
mod container;
mod grammar;
mod kernel;
mod shape;
mod expr;
mod validate;
mod chunk;
mod fetch;
mod reduce;
mod driver;
mod lazy;
mod persist;
mod options;

// These are the public API. Intentionally narrow and dynamically-typed.
pub use consts::{default_block_elems, DEFAULT_BLOCK_BYTES};
pub use container::{Container, LazyChunkHeader, MemContainer};
pub use error::{Error, Result};
pub use kernel::{DefaultKernel, Kernel, KernelBuffer, KernelOperand};
pub use lazy::LazyNode;
pub use operand::{DenseArray, Operand, OperandId, OperandTable, ScalarValue};
pub use options::{DriverArgs, EvalOptions};
pub use persist::{open, PersistedExpr};
pub use reduce::ReduceOp;
pub use scalarty::{ScalarT, ScalarTy};
pub use shape::AxisSlice;

// TODO:
//   1. all-zero chunk skip on the fast path (Container exposes the
//      metadata via `get_lazychunk`, EvalDriver doesn't consult it yet).
//   2. user-defined block functions (the `Call`-style escape hatch
//      `original_source` exposes) beyond the closed operator grammar.

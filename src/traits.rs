// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::scalarty::ScalarT;

/// Returned by an individual op-table entry when a `(SRC, DST)` pairing
/// makes no sense (e.g. `sin` over integers, `bitand` over floats). The
/// kernel turns this into `Error::Kernel`.
#[derive(Debug)]
pub enum OpError {
    Unsupported,
}

/// A unary elementwise operator over homogeneous slices, dispatched once
/// per chunk by `DefaultKernel`.
pub trait UnOp<SRC: ScalarT, DST: ScalarT> {
    fn apply_slice(src: &[SRC], dst: &mut [DST]) -> Result<(), OpError>;

    fn apply_const(src: SRC) -> Result<DST, OpError>;
}

/// A binary elementwise operator over homogeneous slices and/or constants.
pub trait BinOp<SRC: ScalarT, DST: ScalarT> {
    fn apply_slice_slice(lhs: &[SRC], rhs: &[SRC], dst: &mut [DST]) -> Result<(), OpError>;

    fn apply_slice_const(lhs: &[SRC], rhs: SRC, dst: &mut [DST]) -> Result<(), OpError>;

    fn apply_const_slice(lhs: SRC, rhs: &[SRC], dst: &mut [DST]) -> Result<(), OpError>;

    fn apply_const_const(lhs: SRC, rhs: SRC) -> Result<DST, OpError>;
}

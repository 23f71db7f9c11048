// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `InputValidator` (§4.3): classifies an operand set, checks broadcast
//! compatibility among the array-like operands, and decides fast-path
//! eligibility ahead of `EvalDriver` choosing a traversal strategy.

use crate::error::{Error, Result};
use crate::operand::Operand;
use crate::scalarty::ScalarTy;
use crate::shape::broadcast_shape;

/// The outcome `EvalDriver` dispatches on: the operation's result shape,
/// its seed dtype (the `Kernel` may still widen it once the first chunk is
/// evaluated), and whether every array operand is chunk/block-aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub shape: Vec<usize>,
    pub dtype: ScalarTy,
    pub fast_path: bool,
}

/// Classifies `operands` (plus an optional pre-supplied `out`) and decides
/// fast-path eligibility. Rule numbers below match §4.3.
pub fn validate(operands: &[Operand], out: Option<&Operand>) -> Result<Validation> {
    // Rule 1: reject an empty operand set.
    if operands.is_empty() {
        return Err(Error::expression("expression has no operands"));
    }

    // Rule 2: array-like operands (anything with a shape) drive broadcast
    // and chunking checks; scalars are ignored for both.
    let arrays: Vec<&Operand> = operands.iter().filter(|o| o.shape().is_some()).collect();

    // Rule 3: broadcast-compatibility across every array operand (plus
    // `out`, if it's itself an array).
    let mut shapes: Vec<Vec<usize>> = arrays.iter().map(|o| o.shape().unwrap()).collect();
    if let Some(out_shape) = out.and_then(Operand::shape) {
        shapes.push(out_shape);
    }
    let shape_refs: Vec<&[usize]> = shapes.iter().map(Vec::as_slice).collect();
    let broadcast = if shape_refs.is_empty() {
        Vec::new()
    } else {
        broadcast_shape(&shape_refs)?
    };

    let chunked: Vec<&Operand> = arrays.iter().copied().filter(|o| o.is_chunked()).collect();

    // Rule 4: nothing chunked means no fast path, and shape/dtype come from
    // the first array operand (or `out`, if that's all there is).
    if chunked.is_empty() {
        let (shape, dtype) = match arrays.first() {
            Some(a) => (a.shape().unwrap(), a.ty()),
            None => match out {
                Some(o) => (o.shape().unwrap_or_default(), o.ty()),
                None => (Vec::new(), operands[0].ty()),
            },
        };
        return Ok(Validation {
            shape,
            dtype,
            fast_path: false,
        });
    }

    // Rule 5: the reference is the first chunked operand; fast_path holds
    // iff every chunked operand (and a chunked `out`) shares its chunks and
    // blocks, no operand's trailing block dims diverge from its chunk dims,
    // and no operand (dense or chunked) needs broadcasting against the
    // result shape — the fast path reads every operand's matching chunk
    // verbatim and never projects a smaller operand's slice.
    let reference = chunked[0];
    let (ref_chunks, ref_blocks) = chunked_geometry(reference);

    let mut equal_chunks = true;
    let mut equal_blocks = true;
    let mut candidates = chunked.clone();
    if let Some(o) = out {
        if o.is_chunked() {
            candidates.push(o);
        }
    }
    for op in &candidates {
        let (chunks, blocks) = chunked_geometry(op);
        if chunks != ref_chunks {
            equal_chunks = false;
        }
        if blocks != ref_blocks {
            equal_blocks = false;
        }
        if trailing_mismatch(&chunks, &blocks) {
            equal_blocks = false;
        }
    }
    let no_broadcasting = arrays
        .iter()
        .all(|op| op.shape().as_deref() == Some(broadcast.as_slice()));

    // Rule 6: dtype seeds from `out` if supplied, else from the reference.
    let dtype = out.map(Operand::ty).unwrap_or_else(|| reference.ty());

    Ok(Validation {
        shape: broadcast,
        dtype,
        fast_path: equal_chunks && equal_blocks && no_broadcasting,
    })
}

fn chunked_geometry(operand: &Operand) -> (Vec<usize>, Vec<usize>) {
    match operand {
        Operand::Chunked(_, container) => (container.chunks().to_vec(), container.blocks().to_vec()),
        _ => (Vec::new(), Vec::new()),
    }
}

/// True when this operand's trailing block dims don't match its trailing
/// chunk dims, which disqualifies the fast path even if two operands'
/// chunk/block tuples otherwise agree.
fn trailing_mismatch(chunks: &[usize], blocks: &[usize]) -> bool {
    if chunks.is_empty() || blocks.is_empty() {
        return false;
    }
    chunks.last() != blocks.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemContainer;
    use crate::operand::Operand;
    use std::rc::Rc;

    fn chunked(shape: Vec<usize>, chunks: Vec<usize>, blocks: Vec<usize>) -> Operand {
        let c = MemContainer::create_empty(shape, chunks, blocks, ScalarTy::F64);
        Operand::chunked(Rc::new(c))
    }

    #[test]
    fn rejects_empty_operand_set() {
        assert!(validate(&[], None).is_err());
    }

    #[test]
    fn scalars_only_skip_broadcast_and_fast_path() {
        let v = validate(&[Operand::scalar(1.0f64)], None).unwrap();
        assert!(!v.fast_path);
        assert!(v.shape.is_empty());
    }

    #[test]
    fn dense_only_operands_never_take_fast_path() {
        let a = Operand::dense(crate::operand::DenseArray::new(
            vec![4],
            ScalarTy::F64,
            vec![0u8; 32],
        ));
        let v = validate(&[a], None).unwrap();
        assert!(!v.fast_path);
        assert_eq!(v.shape, vec![4]);
    }

    #[test]
    fn matching_chunked_operands_take_fast_path() {
        let a = chunked(vec![8], vec![4], vec![4]);
        let b = chunked(vec![8], vec![4], vec![4]);
        let v = validate(&[a, b], None).unwrap();
        assert!(v.fast_path);
        assert_eq!(v.shape, vec![8]);
    }

    #[test]
    fn mismatched_chunks_fall_back_from_fast_path() {
        let a = chunked(vec![8], vec![4], vec![4]);
        let b = chunked(vec![8], vec![2], vec![2]);
        let v = validate(&[a, b], None).unwrap();
        assert!(!v.fast_path);
    }

    #[test]
    fn incompatible_shapes_are_rejected() {
        let a = Operand::dense(crate::operand::DenseArray::new(
            vec![3],
            ScalarTy::F64,
            vec![0u8; 24],
        ));
        let b = Operand::dense(crate::operand::DenseArray::new(
            vec![4],
            ScalarTy::F64,
            vec![0u8; 32],
        ));
        assert!(validate(&[a, b], None).is_err());
    }
}

// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Shape and slice algebra: broadcast-shape computation, the projection of
//! a reference slice onto a smaller (broadcast) operand, and the
//! slice-intersection test `EvalDriver::slices_eval` uses to filter chunks
//! against a requested item. Only `step == 1` slices are supported anywhere
//! in this crate; anything else is rejected where the slice first enters
//! (input parsing), not here.

use crate::error::{Error, Result};

/// A half-open range along one axis, `step` always implicitly 1. `None`
/// bounds are open (unbounded) ends, the way a bare `:` behaves in a
/// multi-dimensional index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisSlice {
    pub start: Option<usize>,
    pub stop: Option<usize>,
}

impl AxisSlice {
    pub fn full() -> AxisSlice {
        AxisSlice {
            start: None,
            stop: None,
        }
    }

    pub fn range(start: usize, stop: usize) -> AxisSlice {
        AxisSlice {
            start: Some(start),
            stop: Some(stop),
        }
    }

    /// Normalizes against an axis length: fills open bounds, clamps to
    /// `[0, len]`, and guarantees `start <= stop`.
    pub fn resolve(&self, len: usize) -> (usize, usize) {
        let start = self.start.unwrap_or(0).min(len);
        let stop = self.stop.unwrap_or(len).min(len).max(start);
        (start, stop)
    }
}

/// Row-major (C order) strides for `shape`: the last axis varies fastest.
/// Shared by every module that walks a flat byte buffer against an N-D
/// shape (`fetch.rs`, `reduce.rs`, `driver.rs`).
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Computes the broadcast shape of a set of operand shapes using the
/// classical right-aligned NumPy rule: shapes are right-aligned, and for
/// each aligned dimension the result is the max of the sizes present,
/// provided every non-1 size among them agrees.
pub fn broadcast_shape(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1usize; ndim];
    for shape in shapes {
        let offset = ndim - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let slot = &mut out[offset + i];
            if dim == *slot || dim == 1 {
                // no-op or broadcast into existing
            } else if *slot == 1 {
                *slot = dim;
            } else {
                return Err(Error::shape(format!(
                    "cannot broadcast shapes {:?}: incompatible size {} against {}",
                    shapes, dim, *slot
                )));
            }
        }
    }
    Ok(out)
}

/// True if `value_shape` is smaller (needs broadcasting) than `ref_shape`
/// for the purposes of a given `slice_shape` request: either it has fewer
/// dimensions, or some requested slice dimension is larger than the
/// right-aligned corresponding `value_shape` dimension (missing leading
/// dims count as size 1).
pub fn is_smaller(value_shape: &[usize], ref_shape: &[usize], slice_shape: &[usize]) -> bool {
    if value_shape.len() < ref_shape.len() {
        return true;
    }
    let offset = value_shape.len() - slice_shape.len();
    for (i, &want) in slice_shape.iter().enumerate() {
        let have = value_shape[offset + i];
        if want > have {
            return true;
        }
    }
    false
}

/// Projects a full-reference-shape slice down onto a smaller (broadcast)
/// operand: drops the leading dims `small_shape` doesn't have, and for the
/// remaining aligned dims keeps the reference slice where `small_shape[i]
/// != 1`, else substitutes a full (`:`) slice (the broadcast dimension is
/// read once and repeated, not indexed by the reference's larger extent).
pub fn project_slice(
    ref_shape: &[usize],
    small_shape: &[usize],
    ref_slice: &[AxisSlice],
) -> Vec<AxisSlice> {
    let drop = ref_shape.len().saturating_sub(small_shape.len());
    let tail = &ref_slice[drop.min(ref_slice.len())..];
    small_shape
        .iter()
        .zip(tail.iter())
        .map(|(&dim, &slice)| if dim == 1 { AxisSlice::full() } else { slice })
        .collect()
}

/// Whether two (possibly differently-ranked) slice tuples intersect,
/// dimension by dimension after right-aligning and padding the shorter
/// tuple with full (open) slices. Two axis ranges intersect unless one
/// starts at or after the other's (resolved) stop.
pub fn slices_intersect(a: &[AxisSlice], b: &[AxisSlice], shape: &[usize]) -> bool {
    let ndim = shape.len();
    let pad = |s: &[AxisSlice]| -> Vec<AxisSlice> {
        let mut v = vec![AxisSlice::full(); ndim - s.len()];
        v.extend_from_slice(s);
        v
    };
    let a = pad(a);
    let b = pad(b);
    for i in 0..ndim {
        let (a_start, a_stop) = a[i].resolve(shape[i]);
        let (b_start, b_stop) = b[i].resolve(shape[i]);
        if a_start >= b_stop || a_stop <= b_start {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_pads_leading_ones() {
        let shape = broadcast_shape(&[&[3, 1, 5], &[5]]).unwrap();
        assert_eq!(shape, vec![3, 1, 5]);
    }

    #[test]
    fn broadcast_rejects_mismatched_nonunit_dims() {
        assert!(broadcast_shape(&[&[3], &[4]]).is_err());
    }

    #[test]
    fn broadcast_max_over_right_aligned() {
        let shape = broadcast_shape(&[&[1, 4], &[3, 1]]).unwrap();
        assert_eq!(shape, vec![3, 4]);
    }

    #[test]
    fn is_smaller_true_for_fewer_dims() {
        assert!(is_smaller(&[4], &[2, 4], &[2, 4]));
    }

    #[test]
    fn is_smaller_false_when_equal_rank_and_size() {
        assert!(!is_smaller(&[2, 4], &[2, 4], &[2, 4]));
    }

    #[test]
    fn project_slice_substitutes_full_on_broadcast_dim() {
        let ref_shape = [2, 4];
        let small = [1, 4];
        let ref_slice = [AxisSlice::range(0, 2), AxisSlice::range(1, 3)];
        let got = project_slice(&ref_shape, &small, &ref_slice);
        assert_eq!(got, vec![AxisSlice::full(), AxisSlice::range(1, 3)]);
    }

    #[test]
    fn slices_intersect_detects_disjoint_ranges() {
        let shape = [10];
        let a = [AxisSlice::range(0, 5)];
        let b = [AxisSlice::range(5, 10)];
        assert!(!slices_intersect(&a, &b, &shape));
    }

    #[test]
    fn slices_intersect_detects_overlap() {
        let shape = [10];
        let a = [AxisSlice::range(0, 6)];
        let b = [AxisSlice::range(5, 10)];
        assert!(slices_intersect(&a, &b, &shape));
    }

    #[test]
    fn whole_slice_always_intersects() {
        let shape = [10, 10];
        let a = [AxisSlice::full(), AxisSlice::full()];
        let b = [AxisSlice::range(2, 4), AxisSlice::range(2, 4)];
        assert!(slices_intersect(&a, &b, &shape));
    }
}

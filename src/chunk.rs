// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `ChunkPlanner` (§4.4): enumerates a chunked container's chunks in raster
//! order, deriving each chunk's global slice and local (possibly
//! boundary-truncated) shape. `EvalDriver` walks this list once per
//! evaluation; `OperandFetcher` uses each entry's slice to materialize
//! every other operand's contribution to that chunk.

use crate::container::Container;
use crate::shape::AxisSlice;

/// One planned chunk: its linear index, its global slice (per axis), its
/// local shape (`slice[i].stop - slice[i].start`), and whether it's full
/// (unpadded: `local_shape == chunks`).
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedChunk {
    pub nchunk: usize,
    pub slice: Vec<AxisSlice>,
    pub local_shape: Vec<usize>,
    pub full: bool,
}

/// Enumerates every chunk of `container` in raster (row-major, low-to-high
/// `nchunk`) order.
pub fn plan_chunks(container: &dyn Container) -> Vec<PlannedChunk> {
    let shape = container.shape();
    let chunks = container.chunks();
    let ext_shape = container.ext_shape();
    let dims: Vec<usize> = ext_shape
        .iter()
        .zip(chunks.iter())
        .map(|(&e, &c)| if c == 0 { 0 } else { e / c })
        .collect();
    let n: usize = dims.iter().product();
    (0..n)
        .map(|nchunk| {
            let coords = unravel(nchunk, &dims);
            let mut slice = Vec::with_capacity(shape.len());
            let mut local_shape = Vec::with_capacity(shape.len());
            let mut full = true;
            for i in 0..shape.len() {
                let start = coords[i] * chunks[i];
                let stop = (start + chunks[i]).min(shape[i]);
                slice.push(AxisSlice::range(start, stop));
                let len = stop - start;
                if len != chunks[i] {
                    full = false;
                }
                local_shape.push(len);
            }
            PlannedChunk {
                nchunk,
                slice,
                local_shape,
                full,
            }
        })
        .collect()
}

/// Row-major unravel of a linear chunk index into per-axis chunk
/// coordinates, the last axis varying fastest.
fn unravel(mut n: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0usize; dims.len()];
    for i in (0..dims.len()).rev() {
        if dims[i] == 0 {
            continue;
        }
        coords[i] = n % dims[i];
        n /= dims[i];
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemContainer;
    use crate::scalarty::ScalarTy;

    #[test]
    fn plans_aligned_chunks_as_full() {
        let c = MemContainer::create_empty(vec![8], vec![4], vec![4], ScalarTy::F64);
        let planned = plan_chunks(&c);
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|p| p.full));
        assert_eq!(planned[1].slice[0], AxisSlice::range(4, 8));
    }

    #[test]
    fn plans_boundary_chunk_as_partial() {
        let c = MemContainer::create_empty(vec![6], vec![4], vec![4], ScalarTy::F64);
        let planned = plan_chunks(&c);
        assert_eq!(planned.len(), 2);
        assert!(planned[0].full);
        assert!(!planned[1].full);
        assert_eq!(planned[1].local_shape, vec![2]);
    }

    #[test]
    fn visits_chunks_in_raster_order() {
        let c = MemContainer::create_empty(vec![4, 4], vec![2, 2], vec![2, 2], ScalarTy::F64);
        let planned = plan_chunks(&c);
        let ncs: Vec<usize> = planned.iter().map(|p| p.nchunk).collect();
        assert_eq!(ncs, vec![0, 1, 2, 3]);
        assert_eq!(planned[1].slice[1], AxisSlice::range(2, 4));
    }
}

// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `OperandFetcher` (§4.4): turns a planned chunk (or an arbitrary slice)
//! into one `KernelOperand` per entry in an operand table. The fast path
//! reuses a whole decompressed chunk verbatim; the generic path reads a
//! sub-slice, projecting it down for operands smaller than the reference
//! (broadcasting).

use crate::chunk::{plan_chunks, PlannedChunk};
use crate::container::Container;
use crate::error::Result;
use crate::kernel::{KernelBuffer, KernelOperand};
use crate::operand::{DenseArray, Operand};
use crate::shape::{is_smaller, project_slice, row_major_strides, AxisSlice};
use tracing::trace;

/// Owns the reusable per-operand decompression buffers so repeated chunk
/// visits don't reallocate; one fetcher is created per `EvalDriver` call
/// and lives for the whole traversal.
pub struct OperandFetcher {
    scratch: Vec<Vec<u8>>,
}

impl OperandFetcher {
    pub fn new(operand_count: usize) -> OperandFetcher {
        OperandFetcher {
            scratch: vec![Vec::new(); operand_count],
        }
    }

    /// Fast path: every chunked operand must share the reference's
    /// `chunks`/`blocks`, so `chunk.nchunk` addresses the same chunk in
    /// every operand's container directly.
    pub fn fetch_fast(
        &mut self,
        operands: &[Operand],
        chunk: &PlannedChunk,
    ) -> Result<Vec<KernelOperand>> {
        trace!(nchunk = chunk.nchunk, operands = operands.len(), "fetch_fast");
        operands
            .iter()
            .enumerate()
            .map(|(i, operand)| match operand {
                Operand::Scalar(_, v) => Ok(KernelOperand::Scalar(*v)),
                Operand::Dense(_, array) => fetch_dense_slice(array, &chunk.slice),
                Operand::Chunked(_, container) => {
                    let dst = &mut self.scratch[i];
                    container.decompress_chunk(chunk.nchunk, dst)?;
                    Ok(KernelOperand::Buffer(KernelBuffer::from_bytes(
                        container.dtype(),
                        dst,
                    )?))
                }
            })
            .collect()
    }

    /// Generic path: reads `ref_slice` (expressed against `ref_shape`) from
    /// each operand, projecting down via `ShapeAlgebra` for any operand
    /// smaller than the reference.
    pub fn fetch_generic(
        &mut self,
        operands: &[Operand],
        ref_shape: &[usize],
        ref_slice: &[AxisSlice],
    ) -> Result<Vec<KernelOperand>> {
        trace!(operands = operands.len(), "fetch_generic");
        let local_shape: Vec<usize> = ref_shape
            .iter()
            .zip(ref_slice.iter())
            .map(|(&len, s)| {
                let (start, stop) = s.resolve(len);
                stop - start
            })
            .collect();
        operands
            .iter()
            .map(|operand| match operand {
                Operand::Scalar(_, v) => Ok(KernelOperand::Scalar(*v)),
                Operand::Dense(_, array) => {
                    let slice = if is_smaller(&array.shape, ref_shape, &local_shape) {
                        project_slice(ref_shape, &array.shape, ref_slice)
                    } else {
                        ref_slice.to_vec()
                    };
                    fetch_dense_slice(array, &slice)
                }
                Operand::Chunked(_, container) => {
                    let shape = container.shape().to_vec();
                    let slice = if is_smaller(&shape, ref_shape, &local_shape) {
                        project_slice(ref_shape, &shape, ref_slice)
                    } else {
                        ref_slice.to_vec()
                    };
                    fetch_container_slice(container.as_ref(), &slice)
                }
            })
            .collect()
    }
}

/// Copies the sub-region `slice` of a row-major byte buffer shaped `shape`
/// (elements of `itemsize` bytes) into a freshly allocated, densely packed
/// buffer of the sliced shape.
fn gather_bytes(bytes: &[u8], shape: &[usize], itemsize: usize, slice: &[AxisSlice]) -> Vec<u8> {
    if shape.is_empty() {
        return bytes.to_vec();
    }
    let strides = row_major_strides(shape);
    let ranges: Vec<(usize, usize)> = shape
        .iter()
        .zip(slice.iter())
        .map(|(&len, s)| s.resolve(len))
        .collect();
    let out_shape: Vec<usize> = ranges.iter().map(|&(a, b)| b - a).collect();
    let total: usize = out_shape.iter().product();
    let mut out = vec![0u8; total * itemsize];
    let mut idx = vec![0usize; shape.len()];
    for pos in 0..total {
        let mut rem = pos;
        for d in (0..shape.len()).rev() {
            let dim = out_shape[d].max(1);
            idx[d] = rem % dim;
            rem /= dim;
        }
        let mut src_elem = 0usize;
        for d in 0..shape.len() {
            src_elem += (ranges[d].0 + idx[d]) * strides[d];
        }
        let src_off = src_elem * itemsize;
        let dst_off = pos * itemsize;
        out[dst_off..dst_off + itemsize].copy_from_slice(&bytes[src_off..src_off + itemsize]);
    }
    out
}

fn fetch_dense_slice(array: &DenseArray, slice: &[AxisSlice]) -> Result<KernelOperand> {
    let itemsize = array.ty.size_of();
    let bytes = gather_bytes(&array.bytes, &array.shape, itemsize, slice);
    Ok(KernelOperand::Buffer(KernelBuffer::from_bytes(
        array.ty, &bytes,
    )?))
}

/// Reads an arbitrary sub-slice of a chunked container. `Container` only
/// exposes whole-chunk decompression, so the generic (non-fast) path
/// materializes every overlapping chunk into a dense staging buffer first,
/// then slices that in memory; the fast path above is what avoids this cost
/// when chunk/block geometries already line up.
fn fetch_container_slice(container: &dyn Container, slice: &[AxisSlice]) -> Result<KernelOperand> {
    let dense = materialize_dense(container)?;
    fetch_dense_slice(&dense, slice)
}

/// Decompresses every chunk of `container` into one fully dense buffer
/// shaped `container.shape()`, discarding any padding beyond the true shape
/// in boundary chunks.
pub fn materialize_dense(container: &dyn Container) -> Result<DenseArray> {
    trace!(shape = ?container.shape(), "materialize_dense");
    let shape = container.shape().to_vec();
    let ty = container.dtype();
    let itemsize = ty.size_of();
    let total: usize = shape.iter().product();
    let mut out = vec![0u8; total * itemsize];
    let out_strides = row_major_strides(&shape);
    let chunk_shape = container.chunks().to_vec();
    let chunk_strides = row_major_strides(&chunk_shape);
    let mut scratch = Vec::new();
    for planned in plan_chunks(container) {
        container.decompress_chunk(planned.nchunk, &mut scratch)?;
        copy_chunk_into(
            &mut out,
            &out_strides,
            itemsize,
            &planned,
            &chunk_strides,
            &scratch,
        );
    }
    Ok(DenseArray::new(shape, ty, out))
}

#[allow(clippy::too_many_arguments)]
fn copy_chunk_into(
    out: &mut [u8],
    out_strides: &[usize],
    itemsize: usize,
    planned: &PlannedChunk,
    chunk_strides: &[usize],
    chunk_bytes: &[u8],
) {
    let ndim = planned.local_shape.len();
    if ndim == 0 {
        out[..itemsize].copy_from_slice(&chunk_bytes[..itemsize]);
        return;
    }
    let total: usize = planned.local_shape.iter().product();
    let mut idx = vec![0usize; ndim];
    for pos in 0..total {
        let mut rem = pos;
        for d in (0..ndim).rev() {
            let dim = planned.local_shape[d].max(1);
            idx[d] = rem % dim;
            rem /= dim;
        }
        let mut dst_elem = 0usize;
        let mut src_elem = 0usize;
        for d in 0..ndim {
            let start = planned.slice[d].start.unwrap_or(0);
            dst_elem += (start + idx[d]) * out_strides[d];
            src_elem += idx[d] * chunk_strides[d];
        }
        let dst_off = dst_elem * itemsize;
        let src_off = src_elem * itemsize;
        out[dst_off..dst_off + itemsize].copy_from_slice(&chunk_bytes[src_off..src_off + itemsize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalarty::ScalarTy;

    #[test]
    fn materializes_padded_container_without_the_padding() {
        let c = crate::container::MemContainer::create_empty(vec![6], vec![4], vec![4], ScalarTy::F64);
        let data: [f64; 4] = [1.0, 2.0, 3.0, 4.0];
        c.update_data(0, bytemuck::cast_slice(&data)).unwrap();
        let tail: [f64; 4] = [5.0, 6.0, 0.0, 0.0];
        c.update_data(1, bytemuck::cast_slice(&tail)).unwrap();

        let dense = materialize_dense(&c).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dense.bytes);
        assert_eq!(got, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn gather_bytes_extracts_row_major_subregion() {
        let shape = [2usize, 3usize];
        let data: [f64; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes = bytemuck::cast_slice(&data);
        let slice = [AxisSlice::range(1, 2), AxisSlice::range(1, 3)];
        let out = gather_bytes(bytes, &shape, 8, &slice);
        let got: &[f64] = bytemuck::cast_slice(&out);
        assert_eq!(got, &[5.0, 6.0]);
    }
}

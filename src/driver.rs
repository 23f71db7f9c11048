// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! `EvalDriver` (§4.5): the sole entry point that turns a textual expression
//! plus an operand table into a result, dispatching on what was asked for
//! (a materialized container, an arbitrary slice, or a reduction) and, for
//! whole-array evaluation, on whether `InputValidator` found a fast path.
//! Every dispatch funnels through `OperandFetcher` for per-chunk buffers and
//! `Kernel::evaluate` for the per-chunk scalar-expression pass; this module
//! owns only the chunk traversal and result assembly around that call.

use std::rc::Rc;

use crate::chunk::plan_chunks;
use crate::container::{Container, MemContainer};
use crate::error::Result;
use crate::fetch::OperandFetcher;
use crate::kernel::{Kernel, KernelBuffer};
use crate::operand::{DenseArray, Operand, OperandTable, ScalarValue};
use crate::options::EvalOptions;
use crate::reduce::{self, ReduceOp};
use crate::shape::{row_major_strides, slices_intersect, AxisSlice};
use crate::validate::validate;
use tracing::{debug, trace, trace_span};

/// Drives `Kernel::evaluate` across every chunk of an expression's operand
/// set. Stateless beyond the `Kernel` reference; one instance can serve
/// every call a `LazyNode` makes.
pub struct EvalDriver<'a> {
    kernel: &'a dyn Kernel,
}

impl<'a> EvalDriver<'a> {
    pub fn new(kernel: &'a dyn Kernel) -> EvalDriver<'a> {
        EvalDriver { kernel }
    }

    fn operands(table: &OperandTable) -> Vec<Operand> {
        (0..table.len())
            .map(|i| table.get(i).expect("index within table bounds").clone())
            .collect()
    }

    /// `chunks_eval`: evaluates the whole expression, chunk by chunk, into a
    /// freshly created output container sized and chunked per
    /// `choose_output_geometry`.
    pub fn chunks_eval(&self, expr: &str, table: &OperandTable) -> Result<MemContainer> {
        let _span = trace_span!("chunks_eval", expr, operands = table.len()).entered();
        let operands = Self::operands(table);
        let validation = validate(&operands, None)?;
        let (chunks, blocks) = choose_output_geometry(&operands, &validation.shape);
        debug!(fast_path = validation.fast_path, shape = ?validation.shape, "chunks_eval geometry chosen");
        let out = MemContainer::create_empty(
            validation.shape.clone(),
            chunks,
            blocks,
            validation.dtype,
        )
        .with_fresh_locator();

        let planned = plan_chunks(&out);
        let mut fetcher = OperandFetcher::new(operands.len());
        for planned_chunk in &planned {
            trace!(nchunk = planned_chunk.nchunk, "evaluating chunk");
            let kernel_operands = if validation.fast_path {
                fetcher.fetch_fast(&operands, planned_chunk)?
            } else {
                fetcher.fetch_generic(&operands, &validation.shape, &planned_chunk.slice)?
            };
            let result = self.kernel.evaluate(expr, &kernel_operands)?;
            out.update_data(planned_chunk.nchunk, &result.into_bytes())?;
        }
        Ok(out)
    }

    /// `chunks_eval`, honoring the output-allocation knobs of `EvalOptions`
    /// (`chunks`, `blocks`, `output_locator`) instead of always deriving
    /// them from the reference operand. `options.dtype` is intentionally
    /// not applied here: the kernel's own promotion table already decides
    /// the expression's result type, and silently reinterpreting its output
    /// bytes as a different-width dtype would corrupt the buffer rather
    /// than cast it; honoring a caller-requested dtype override would need
    /// an explicit cast step this driver doesn't have (`DESIGN.md`).
    pub fn chunks_eval_with_options(
        &self,
        expr: &str,
        table: &OperandTable,
        options: &EvalOptions,
    ) -> Result<MemContainer> {
        let _span = trace_span!("chunks_eval_with_options", expr, operands = table.len()).entered();
        let operands = Self::operands(table);
        let validation = validate(&operands, None)?;
        let (default_chunks, default_blocks) = choose_output_geometry(&operands, &validation.shape);
        let chunks = options.chunks.clone().unwrap_or(default_chunks);
        let blocks = options.blocks.clone().unwrap_or(default_blocks);
        let out = MemContainer::create_empty(
            validation.shape.clone(),
            chunks,
            blocks,
            validation.dtype,
        );
        let out = match &options.output_locator {
            Some(locator) => out.with_locator(locator.clone()),
            None => out.with_fresh_locator(),
        };

        let planned = plan_chunks(&out);
        let mut fetcher = OperandFetcher::new(operands.len());
        for planned_chunk in &planned {
            let kernel_operands = if validation.fast_path {
                fetcher.fetch_fast(&operands, planned_chunk)?
            } else {
                fetcher.fetch_generic(&operands, &validation.shape, &planned_chunk.slice)?
            };
            let result = self.kernel.evaluate(expr, &kernel_operands)?;
            out.update_data(planned_chunk.nchunk, &result.into_bytes())?;
        }
        Ok(out)
    }

    /// `chunks_getitem` / `slices_eval`: evaluates the expression only over
    /// chunks overlapping `want`, assembling a dense result covering exactly
    /// that slice. Reuses each overlapping chunk's decompressed buffer
    /// verbatim via `fetch_fast` when `validation.fast_path` holds, the same
    /// dispatch `chunks_eval`/`reduce` make; otherwise every chunk is read
    /// through the broadcast-aware `fetch_generic`. Falls back to one
    /// generic-path evaluation over the whole requested region when no
    /// operand is chunked.
    pub fn slices_eval(
        &self,
        expr: &str,
        table: &OperandTable,
        want: &[AxisSlice],
    ) -> Result<DenseArray> {
        let _span = trace_span!("slices_eval", expr, operands = table.len()).entered();
        let operands = Self::operands(table);
        let validation = validate(&operands, None)?;
        let itemsize = validation.dtype.size_of();
        let out_shape: Vec<usize> = validation
            .shape
            .iter()
            .zip(want.iter())
            .map(|(&len, s)| {
                let (start, stop) = s.resolve(len);
                stop - start
            })
            .collect();
        let out_strides = row_major_strides(&out_shape);
        let total: usize = out_shape.iter().product();
        let mut out_bytes = vec![0u8; total * itemsize];

        let reference = reference_container(&operands);
        debug!(has_reference = reference.is_some(), "slices_eval reference chosen");
        let mut fetcher = OperandFetcher::new(operands.len());

        match reference {
            Some(container) => {
                for planned_chunk in plan_chunks(container.as_ref()) {
                    if !slices_intersect(&planned_chunk.slice, want, &validation.shape) {
                        continue;
                    }
                    trace!(nchunk = planned_chunk.nchunk, "slice overlaps requested range");
                    // `fetch_fast` hands back a whole chunk verbatim, sized to the
                    // container's padded chunk geometry; `copy_overlap_into` below
                    // indexes the result against `local_shape`, so the fast path only
                    // applies to a full (unpadded) chunk, where the two agree.
                    let kernel_operands = if validation.fast_path && planned_chunk.full {
                        fetcher.fetch_fast(&operands, &planned_chunk)?
                    } else {
                        fetcher.fetch_generic(
                            &operands,
                            &validation.shape,
                            &planned_chunk.slice,
                        )?
                    };
                    let chunk_result = self.kernel.evaluate(expr, &kernel_operands)?;
                    copy_overlap_into(
                        &mut out_bytes,
                        &out_strides,
                        itemsize,
                        &validation.shape,
                        want,
                        &planned_chunk.slice,
                        &planned_chunk.local_shape,
                        &chunk_result.into_bytes(),
                    );
                }
            }
            None => {
                let kernel_operands = fetcher.fetch_generic(&operands, &validation.shape, want)?;
                out_bytes = self.kernel.evaluate(expr, &kernel_operands)?.into_bytes();
            }
        }
        Ok(DenseArray::new(out_shape, validation.dtype, out_bytes))
    }

    /// Evaluates a decomposable reduction (§4.6) over the expression's
    /// result: identity-seeded per chunk, merged into a whole-array
    /// accumulator as each chunk's partial arrives. `axes: None` reduces
    /// every axis down to a scalar `Operand::Scalar`; otherwise the named
    /// axes collapse and the rest survive as an `Operand::Dense`.
    pub fn reduce(
        &self,
        expr: &str,
        table: &OperandTable,
        op: ReduceOp,
        axes: Option<&[usize]>,
    ) -> Result<Operand> {
        let _span = trace_span!("reduce", expr, op = ?op, axes = ?axes).entered();
        let operands = Self::operands(table);
        let validation = validate(&operands, None)?;
        let rank = validation.shape.len();
        let axes: Vec<usize> = axes.map(<[usize]>::to_vec).unwrap_or_else(|| (0..rank).collect());

        let out_shape: Vec<usize> = validation
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();
        let out_total = out_shape.iter().product::<usize>().max(1);
        let mut accumulator = vec![op.identity(validation.dtype); out_total];

        let reference = reference_container(&operands);
        let mut fetcher = OperandFetcher::new(operands.len());

        match reference {
            Some(container) => {
                for planned_chunk in plan_chunks(container.as_ref()) {
                    trace!(nchunk = planned_chunk.nchunk, "reducing chunk");
                    let kernel_operands = if validation.fast_path && planned_chunk.full {
                        fetcher.fetch_fast(&operands, &planned_chunk)?
                    } else {
                        fetcher.fetch_generic(
                            &operands,
                            &validation.shape,
                            &planned_chunk.slice,
                        )?
                    };
                    let chunk_result = self.kernel.evaluate(expr, &kernel_operands)?;
                    let (local_values, local_shape) =
                        reduce::reduce_local(op, &chunk_result, &planned_chunk.local_shape, &axes);
                    let offset = reduce::retained_offset(&planned_chunk.slice, &axes);
                    reduce::accumulate(
                        op,
                        &mut accumulator,
                        &out_shape,
                        &local_values,
                        &local_shape,
                        &offset,
                    );
                }
            }
            None => {
                let whole: Vec<AxisSlice> = validation
                    .shape
                    .iter()
                    .map(|&d| AxisSlice::range(0, d))
                    .collect();
                let kernel_operands = fetcher.fetch_generic(&operands, &validation.shape, &whole)?;
                let result = self.kernel.evaluate(expr, &kernel_operands)?;
                let (local_values, _) = reduce::reduce_local(op, &result, &validation.shape, &axes);
                accumulator = local_values;
            }
        }

        let buffer = reduce::finalize(op, validation.dtype, &accumulator);
        if axes.len() == rank {
            Ok(Operand::scalar(single_scalar(buffer)))
        } else {
            let result_ty = op.result_ty(validation.dtype);
            Ok(Operand::dense(DenseArray::new(
                out_shape,
                result_ty,
                buffer.into_bytes(),
            )))
        }
    }
}

/// Picks the chunked operand with the most elements (ties keep the
/// earliest, insertion-order one) as the traversal reference; `None` when
/// the expression has no chunked operand at all.
fn reference_container(operands: &[Operand]) -> Option<Rc<dyn Container>> {
    let mut best: Option<Rc<dyn Container>> = None;
    let mut best_count = 0usize;
    for op in operands {
        if let Operand::Chunked(_, container) = op {
            let count: usize = container.shape().iter().product();
            if count > best_count {
                best_count = count;
                best = Some(container.clone());
            }
        }
    }
    best
}

/// Chooses the output container's chunk/block geometry: the reference
/// operand's, right-aligned against a possibly-higher-rank broadcast
/// result (extra leading axes get one whole-axis chunk each); failing that
/// (no chunked operand at all), one chunk covering the whole array.
fn choose_output_geometry(operands: &[Operand], shape: &[usize]) -> (Vec<usize>, Vec<usize>) {
    match reference_container(operands) {
        Some(container) => {
            let ref_rank = container.chunks().len();
            let pad = shape.len().saturating_sub(ref_rank);
            let mut chunks = shape[..pad].to_vec();
            chunks.extend_from_slice(container.chunks());
            let mut blocks = shape[..pad].to_vec();
            blocks.extend_from_slice(container.blocks());
            (chunks, blocks)
        }
        None => (shape.to_vec(), shape.to_vec()),
    }
}

pub(crate) fn single_scalar(buffer: KernelBuffer) -> ScalarValue {
    use KernelBuffer::*;
    match buffer {
        Bool(v) => ScalarValue::Bool(v[0]),
        U8(v) => ScalarValue::U8(v[0]),
        U16(v) => ScalarValue::U16(v[0]),
        U32(v) => ScalarValue::U32(v[0]),
        U64(v) => ScalarValue::U64(v[0]),
        I8(v) => ScalarValue::I8(v[0]),
        I16(v) => ScalarValue::I16(v[0]),
        I32(v) => ScalarValue::I32(v[0]),
        I64(v) => ScalarValue::I64(v[0]),
        F32(v) => ScalarValue::F32(v[0]),
        F64(v) => ScalarValue::F64(v[0]),
    }
}

/// The inverse of `single_scalar`: a one-element byte buffer holding
/// `value`, for rebuilding a `DenseArray` out of a fully-reduced scalar
/// (`lazy::reshape_keepdims`'s whole-array case).
pub(crate) fn single_scalar_bytes(value: ScalarValue) -> Vec<u8> {
    use ScalarValue::*;
    match value {
        Bool(v) => vec![v as u8],
        U8(v) => vec![v],
        U16(v) => v.to_le_bytes().to_vec(),
        U32(v) => v.to_le_bytes().to_vec(),
        U64(v) => v.to_le_bytes().to_vec(),
        I8(v) => v.to_le_bytes().to_vec(),
        I16(v) => v.to_le_bytes().to_vec(),
        I32(v) => v.to_le_bytes().to_vec(),
        I64(v) => v.to_le_bytes().to_vec(),
        F32(v) => v.to_le_bytes().to_vec(),
        F64(v) => v.to_le_bytes().to_vec(),
    }
}

/// Copies the overlap of `chunk_slice` and `want` (both expressed against
/// `shape`) from a chunk-local result buffer into the assembled output
/// buffer. `want`/`chunk_slice` having already been confirmed to intersect
/// by the caller is an optimization, not a correctness requirement: an
/// empty overlap on any axis is simply a no-op copy.
#[allow(clippy::too_many_arguments)]
fn copy_overlap_into(
    out: &mut [u8],
    out_strides: &[usize],
    itemsize: usize,
    shape: &[usize],
    want: &[AxisSlice],
    chunk_slice: &[AxisSlice],
    chunk_local_shape: &[usize],
    chunk_bytes: &[u8],
) {
    let ndim = shape.len();
    if ndim == 0 {
        out[..itemsize].copy_from_slice(&chunk_bytes[..itemsize]);
        return;
    }
    let mut overlap_start = vec![0usize; ndim];
    let mut overlap_len = vec![0usize; ndim];
    for i in 0..ndim {
        let (cs, ce) = chunk_slice[i].resolve(shape[i]);
        let (ws, we) = want[i].resolve(shape[i]);
        let start = cs.max(ws);
        let stop = ce.min(we);
        if stop <= start {
            return;
        }
        overlap_start[i] = start;
        overlap_len[i] = stop - start;
    }
    let chunk_strides = row_major_strides(chunk_local_shape);
    let total: usize = overlap_len.iter().product();
    let mut idx = vec![0usize; ndim];
    for pos in 0..total {
        let mut rem = pos;
        for d in (0..ndim).rev() {
            let dim = overlap_len[d].max(1);
            idx[d] = rem % dim;
            rem /= dim;
        }
        let mut chunk_elem = 0usize;
        let mut out_elem = 0usize;
        for d in 0..ndim {
            let global = overlap_start[d] + idx[d];
            let chunk_start = chunk_slice[d].start.unwrap_or(0);
            let want_start = want[d].start.unwrap_or(0);
            chunk_elem += (global - chunk_start) * chunk_strides[d];
            out_elem += (global - want_start) * out_strides[d];
        }
        let src = chunk_elem * itemsize;
        let dst = out_elem * itemsize;
        out[dst..dst + itemsize].copy_from_slice(&chunk_bytes[src..src + itemsize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Operand;
    use crate::scalarty::ScalarTy;

    fn chunked_f64(shape: Vec<usize>, chunks: Vec<usize>, data: &[f64]) -> Operand {
        let itemsize = 8;
        let c = MemContainer::create_empty(shape.clone(), chunks.clone(), chunks, ScalarTy::F64);
        let mut offset = 0usize;
        for planned_chunk in plan_chunks(&c) {
            let elems: usize = planned_chunk.local_shape.iter().product();
            let full_elems: usize = c.chunks().iter().product();
            let mut buf = vec![0u8; full_elems * itemsize];
            let slice = &data[offset..offset + elems];
            let bytes: &[u8] = bytemuck::cast_slice(slice);
            buf[..bytes.len()].copy_from_slice(bytes);
            c.update_data(planned_chunk.nchunk, &buf).unwrap();
            offset += elems;
        }
        Operand::chunked(Rc::new(c))
    }

    #[test]
    fn chunks_eval_sums_two_aligned_operands() {
        let mut table = OperandTable::new();
        table.push(chunked_f64(vec![8], vec![4], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        table.push(chunked_f64(vec![8], vec![4], &[8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0]));

        let kernel = crate::kernel::DefaultKernel::new();
        let driver = EvalDriver::new(&kernel);
        let out = driver.chunks_eval("(o0 + o1)", &table).unwrap();

        let mut dst = Vec::new();
        out.decompress_chunk(0, &mut dst).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dst);
        assert_eq!(got, &[9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn slices_eval_reads_a_sub_range_across_chunk_boundary() {
        let mut table = OperandTable::new();
        table.push(chunked_f64(vec![8], vec![4], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));

        let kernel = crate::kernel::DefaultKernel::new();
        let driver = EvalDriver::new(&kernel);
        let want = [AxisSlice::range(3, 6)];
        let dense = driver.slices_eval("o0", &table, &want).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dense.bytes);
        assert_eq!(got, &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn slices_eval_handles_a_boundary_chunk_under_fast_path() {
        // shape 7 with chunk size 4: chunk 1 is padded (local_shape == [3]).
        let mut table = OperandTable::new();
        table.push(chunked_f64(vec![7], vec![4], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]));

        let kernel = crate::kernel::DefaultKernel::new();
        let driver = EvalDriver::new(&kernel);
        let want = [AxisSlice::range(0, 7)];
        let dense = driver.slices_eval("o0", &table, &want).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dense.bytes);
        assert_eq!(got, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn reduce_sum_with_no_axes_collapses_to_scalar() {
        let mut table = OperandTable::new();
        table.push(chunked_f64(vec![8], vec![4], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));

        let kernel = crate::kernel::DefaultKernel::new();
        let driver = EvalDriver::new(&kernel);
        let result = driver.reduce("o0", &table, ReduceOp::Sum, None).unwrap();
        match result {
            Operand::Scalar(_, ScalarValue::F64(v)) => assert_eq!(v, 36.0),
            other => panic!("expected scalar, got {:?}", other.shape()),
        }
    }

    #[test]
    fn reduce_sum_over_one_axis_keeps_the_other() {
        // shape (2, 4), chunked whole; sum over axis 0.
        let mut table = OperandTable::new();
        table.push(chunked_f64(
            vec![2, 4],
            vec![2, 4],
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        ));

        let kernel = crate::kernel::DefaultKernel::new();
        let driver = EvalDriver::new(&kernel);
        let result = driver.reduce("o0", &table, ReduceOp::Sum, Some(&[0])).unwrap();
        match result {
            Operand::Dense(_, array) => {
                assert_eq!(array.shape, vec![4]);
                let got: &[f64] = bytemuck::cast_slice(&array.bytes);
                assert_eq!(got, &[6.0, 8.0, 10.0, 12.0]);
            }
            other => panic!("expected dense, got {:?}", other.shape()),
        }
    }
}

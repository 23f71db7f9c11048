// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::scalarty::ScalarTy;

/// Opaque, deflate-compressed single chunk. `MemContainer` keeps these in a
/// `Vec`, one per `nchunk`; any real backing store (disk, object storage,
/// network) would satisfy the same `Container` trait with its own layout.
#[derive(Clone, Debug)]
pub struct LazyChunkHeader {
    pub nchunk: usize,
    pub compressed_len: usize,
    pub uncompressed_len: usize,
    pub all_zero: bool,
}

/// The external chunked-array contract: shape, chunking geometry, dtype, and
/// per-chunk read/write. `EvalDriver` and `OperandFetcher` only ever talk to
/// `dyn Container`, never to `MemContainer` directly, so any real storage
/// engine with compression/persistence can stand in.
pub trait Container: std::fmt::Debug {
    fn shape(&self) -> &[usize];
    fn chunks(&self) -> &[usize];
    fn blocks(&self) -> &[usize];
    /// The chunk-aligned, possibly-padded shape (`shape` rounded up to a
    /// whole number of `chunks` per dimension).
    fn ext_shape(&self) -> Vec<usize> {
        self.shape()
            .iter()
            .zip(self.chunks())
            .map(|(&s, &c)| s.div_ceil(c) * c)
            .collect()
    }
    fn dtype(&self) -> ScalarTy;
    fn nchunks(&self) -> usize {
        let ext = self.ext_shape();
        ext.iter()
            .zip(self.chunks())
            .map(|(&e, &c)| e / c)
            .product()
    }
    /// A stable identifier distinguishing this container instance from any
    /// other, persistence-round-trip included.
    fn locator(&self) -> Option<&str>;

    /// Decompresses chunk `nchunk` into `dst` (resized as needed) and
    /// returns the number of bytes written.
    fn decompress_chunk(&self, nchunk: usize, dst: &mut Vec<u8>) -> Result<usize>;

    /// Overwrites chunk `nchunk` with `data` (raw element bytes for one full
    /// chunk's worth of elements), compressing on the way in.
    fn update_data(&self, nchunk: usize, data: &[u8]) -> Result<()>;

    /// Cheap metadata peek, used to skip all-zero chunks without a full
    /// decompress. Optional: a container that doesn't track this returns
    /// `None` and callers fall back to decompressing.
    fn get_lazychunk(&self, nchunk: usize) -> Option<LazyChunkHeader>;
}

struct MemChunk {
    compressed: Vec<u8>,
    uncompressed_len: usize,
    all_zero: bool,
}

/// Reference `Container` implementation: an in-process, `flate2`-compressed
/// chunked array store. Exists so the engine can be built and tested without
/// an external storage engine, per the crate's external-collaborator split.
#[derive(Debug)]
pub struct MemContainer {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    blocks: Vec<usize>,
    dtype: ScalarTy,
    locator: Option<String>,
    slots: Mutex<Vec<MemChunk>>,
}

static NEXT_LOCATOR: AtomicU64 = AtomicU64::new(1);

impl MemContainer {
    /// Creates an empty container (every chunk unwritten, decompresses as
    /// all-zero) with the given geometry.
    pub fn create_empty(
        shape: Vec<usize>,
        chunks: Vec<usize>,
        blocks: Vec<usize>,
        dtype: ScalarTy,
    ) -> MemContainer {
        let c = MemContainer {
            shape,
            chunks,
            blocks,
            dtype,
            locator: None,
            slots: Mutex::new(Vec::new()),
        };
        let n = c.nchunks();
        let mut slots = c.slots.lock().unwrap();
        slots.resize_with(n, || MemChunk {
            compressed: Vec::new(),
            uncompressed_len: 0,
            all_zero: true,
        });
        drop(slots);
        c
    }

    /// Like `create_empty`, but every chunk is pre-filled with `value`.
    pub fn create_full(
        shape: Vec<usize>,
        chunks: Vec<usize>,
        blocks: Vec<usize>,
        dtype: ScalarTy,
        value_bytes: &[u8],
    ) -> Result<MemContainer> {
        let c = MemContainer::create_empty(shape, chunks, blocks, dtype);
        let elems = c.chunks.iter().product::<usize>();
        let itemsize = dtype.size_of();
        let mut buf = Vec::with_capacity(elems * itemsize);
        for _ in 0..elems {
            buf.extend_from_slice(value_bytes);
        }
        let all_zero = value_bytes.iter().all(|&b| b == 0);
        let n = c.nchunks();
        for nchunk in 0..n {
            c.update_data(nchunk, &buf)?;
            if !all_zero {
                let mut slots = c.slots.lock().unwrap();
                slots[nchunk].all_zero = false;
            }
        }
        Ok(c)
    }

    /// Assigns this container a fresh, unique persistence locator (used by
    /// the `Persistence` hook when it writes output).
    pub fn with_fresh_locator(mut self) -> MemContainer {
        let id = NEXT_LOCATOR.fetch_add(1, Ordering::Relaxed);
        self.locator = Some(format!("mem://{}", id));
        self
    }

    /// Assigns an explicit, caller-chosen persistence locator (`EvalOptions
    /// ::output_locator`), bypassing the `mem://<n>` auto-naming scheme.
    pub fn with_locator(mut self, locator: impl Into<String>) -> MemContainer {
        self.locator = Some(locator.into());
        self
    }

    fn chunk_elems(&self) -> usize {
        self.chunks.iter().product()
    }
}

impl Container for MemContainer {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &[usize] {
        &self.chunks
    }

    fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    fn dtype(&self) -> ScalarTy {
        self.dtype
    }

    fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    fn decompress_chunk(&self, nchunk: usize, dst: &mut Vec<u8>) -> Result<usize> {
        let slots = self.slots.lock().unwrap();
        let slot = slots
            .get(nchunk)
            .ok_or_else(|| Error::shape(format!("chunk index {} out of range", nchunk)))?;
        let want = self.chunk_elems() * self.dtype.size_of();
        if slot.uncompressed_len == 0 {
            dst.clear();
            dst.resize(want, 0u8);
            return Ok(want);
        }
        let mut decoder = ZlibDecoder::new(&slot.compressed[..]);
        dst.clear();
        decoder
            .read_to_end(dst)
            .map_err(|e| Error::shape(format!("chunk decompress failed: {}", e)))?;
        Ok(dst.len())
    }

    fn update_data(&self, nchunk: usize, data: &[u8]) -> Result<()> {
        let want = self.chunk_elems() * self.dtype.size_of();
        if data.len() != want {
            return Err(Error::shape(format!(
                "chunk write size {} does not match expected {}",
                data.len(),
                want
            )));
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(data)
            .map_err(|e| Error::shape(format!("chunk compress failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| Error::shape(format!("chunk compress failed: {}", e)))?;
        let all_zero = data.iter().all(|&b| b == 0);
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .get_mut(nchunk)
            .ok_or_else(|| Error::shape(format!("chunk index {} out of range", nchunk)))?;
        slot.compressed = compressed;
        slot.uncompressed_len = data.len();
        slot.all_zero = all_zero;
        Ok(())
    }

    fn get_lazychunk(&self, nchunk: usize) -> Option<LazyChunkHeader> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(nchunk)?;
        Some(LazyChunkHeader {
            nchunk,
            compressed_len: slot.compressed.len(),
            uncompressed_len: slot.uncompressed_len,
            all_zero: slot.all_zero,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_chunk_bytes() {
        let c = MemContainer::create_empty(vec![4], vec![4], vec![4], ScalarTy::F64);
        let data: [f64; 4] = [1.0, 2.0, 3.0, 4.0];
        let bytes = bytemuck::cast_slice(&data);
        c.update_data(0, bytes).unwrap();
        let mut dst = Vec::new();
        c.decompress_chunk(0, &mut dst).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dst);
        assert_eq!(got, &data);
    }

    #[test]
    fn unwritten_chunk_decompresses_as_zero() {
        let c = MemContainer::create_empty(vec![4], vec![4], vec![4], ScalarTy::F64);
        let mut dst = Vec::new();
        c.decompress_chunk(0, &mut dst).unwrap();
        let got: &[f64] = bytemuck::cast_slice(&dst);
        assert_eq!(got, &[0.0, 0.0, 0.0, 0.0]);
        assert!(c.get_lazychunk(0).unwrap().all_zero);
    }
}

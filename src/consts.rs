// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

// L1 caches are (somewhat universally) 32k, at least so long as caches are
// 8-way associative VIPT and pages are 4096 bytes. There's a much more complex
// overview of the relationship here but it seems like an acceptable thing to
// bake into the design:
// https://stackoverflow.com/questions/46480015/vipt-cache-connection-between-tlb-cache
//
// `ChunkPlanner` uses this as the default byte budget for a chunk's block
// when a `LazyNode` output is materialized without an explicit `chunks`/
// `blocks` shape, the same role `CHUNKBYTES` plays in the teacher's Rayon
// chunking.
pub const DEFAULT_BLOCK_BYTES: usize = 0x10000;

// Hacky workaround for "no control flow ops in const at present": calculates
// the maximum of two usizes, as a const fn.
pub const fn cmax(a: usize, b: usize) -> usize {
    [a, b][(a < b) as usize]
}

/// Number of elements of size `sz` bytes that fit in [`DEFAULT_BLOCK_BYTES`],
/// rounded down but never to zero.
pub const fn default_block_elems(sz: usize) -> usize {
    cmax(DEFAULT_BLOCK_BYTES / cmax(sz, 1), 1)
}

// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! The two configuration surfaces (§6): `EvalOptions`, the user-facing,
//! `serde`-(de)serializable knobs a caller may pass to `LazyNode::eval`, and
//! `DriverArgs`, purely internal bookkeeping `EvalDriver`'s own entry points
//! build for themselves — never serialized, never exposed to a caller, and
//! not part of persisted metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::reduce::ReduceOp;
use crate::scalarty::ScalarTy;
use crate::shape::AxisSlice;

/// User-facing evaluation options. Every field is optional: an absent value
/// means "let the driver decide" (reference-operand chunking, seed dtype
/// from the first evaluated chunk, an anonymous in-memory locator).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalOptions {
    pub chunks: Option<Vec<usize>>,
    pub blocks: Option<Vec<usize>>,
    pub dtype: Option<ScalarTy>,
    pub output_locator: Option<String>,
    /// Opaque pass-through knobs for a real storage engine's compressor;
    /// `MemContainer` ignores these (its `Compression::fast()` is fixed),
    /// but the option surface is shaped to support one that doesn't.
    #[serde(default)]
    pub compression_params: BTreeMap<String, String>,
    #[serde(default)]
    pub decompression_params: BTreeMap<String, String>,
}

impl EvalOptions {
    pub fn new() -> EvalOptions {
        EvalOptions::default()
    }

    pub fn with_chunks(mut self, chunks: Vec<usize>) -> EvalOptions {
        self.chunks = Some(chunks);
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<usize>) -> EvalOptions {
        self.blocks = Some(blocks);
        self
    }

    pub fn with_dtype(mut self, dtype: ScalarTy) -> EvalOptions {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_output_locator(mut self, locator: impl Into<String>) -> EvalOptions {
        self.output_locator = Some(locator.into());
        self
    }
}

/// A reduction's own arguments: which op, and which axes (`None` reduces the
/// whole array to a scalar). `ReductionError` fires if `dtype` is ever
/// requested on `min`/`max`/`any`/`all`, which this type can't even express
/// (there's no `dtype` field at all) — enforced instead at the `LazyNode`
/// call site that would otherwise plumb one through.
#[derive(Clone, Debug, PartialEq)]
pub struct ReduceArgs {
    pub op: ReduceOp,
    pub axes: Option<Vec<usize>>,
}

/// Internal bookkeeping `EvalDriver`'s own call sites build for themselves;
/// never serialized and never part of the public options surface.
#[derive(Clone, Debug, Default)]
pub struct DriverArgs {
    pub output_locator: Option<String>,
    pub reduce_args: Option<ReduceArgs>,
    pub getitem: bool,
    pub slice: Option<Vec<AxisSlice>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_options_round_trips_through_json() {
        let opts = EvalOptions::new()
            .with_chunks(vec![4, 4])
            .with_dtype(ScalarTy::F32)
            .with_output_locator("mem://1");
        let json = serde_json::to_string(&opts).unwrap();
        let back: EvalOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }

    #[test]
    fn default_options_leave_every_choice_to_the_driver() {
        let opts = EvalOptions::new();
        assert!(opts.chunks.is_none());
        assert!(opts.dtype.is_none());
    }
}

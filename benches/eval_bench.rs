// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use stratum::{Container, LazyNode, MemContainer, Operand, ScalarTy};

const LEN: usize = 1 << 16;
const CHUNK: usize = 1 << 12;

fn chunked_f64(len: usize, chunk: usize, seed: f64) -> Operand {
    let c = MemContainer::create_empty(vec![len], vec![chunk], vec![chunk], ScalarTy::F64);
    let data: Vec<f64> = (0..len).map(|i| seed + i as f64).collect();
    let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut offset = 0usize;
    let mut nchunk = 0usize;
    while offset < bytes.len() {
        let end = (offset + chunk * 8).min(bytes.len());
        let mut buf = bytes[offset..end].to_vec();
        buf.resize(chunk * 8, 0u8);
        c.update_data(nchunk, &buf).unwrap();
        offset = end;
        nchunk += 1;
    }
    Operand::chunked(Rc::new(c))
}

fn bench_aligned_sum(c: &mut Criterion) {
    let a = LazyNode::from_operand(chunked_f64(LEN, CHUNK, 1.0));
    let b = LazyNode::from_operand(chunked_f64(LEN, CHUNK, 2.0));
    let node = a.add(&b);
    c.bench_with_input(
        BenchmarkId::new("eval", "fast_path_aligned"),
        &node,
        |bencher, node| {
            bencher.iter(|| node.eval().unwrap());
        },
    );
}

fn bench_generic_broadcast(c: &mut Criterion) {
    let node = LazyNode::from_operand(chunked_f64(LEN, CHUNK, 1.0)).mul_scalar(2.0f64);
    c.bench_with_input(
        BenchmarkId::new("eval", "generic_scalar_broadcast"),
        &node,
        |bencher, node| {
            bencher.iter(|| node.eval().unwrap());
        },
    );
}

fn bench_reduce_sum(c: &mut Criterion) {
    let node = LazyNode::from_operand(chunked_f64(LEN, CHUNK, 1.0));
    c.bench_with_input(BenchmarkId::new("reduce", "sum"), &node, |bencher, node| {
        bencher.iter(|| node.sum(None).unwrap());
    });
}

criterion_group!(
    benches,
    bench_aligned_sum,
    bench_generic_broadcast,
    bench_reduce_sum
);
criterion_main!(benches);

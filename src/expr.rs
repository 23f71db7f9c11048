// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Textual expression construction and fusion (§4.1). `LazyNode` never
//! builds or walks an AST of its own expression — the text is the
//! representation, right up until `DefaultKernel::evaluate` parses it
//! (`grammar.rs`) for per-chunk dispatch. Fusion combines two expressions
//! by rebasing the right-hand side's placeholders against a merged operand
//! table, deduplicating operands that are the same instance (`OperandId`)
//! rather than the same value.

use std::collections::HashMap;

use crate::operand::OperandTable;

/// How two sub-expressions are textually combined into one.
#[derive(Clone, Copy, Debug)]
pub enum Combine {
    /// `(lhs OP rhs)`, for `+ - * / % ** < <= == != > >= & | ^`.
    Infix(&'static str),
    /// `(lhs and rhs)` / `(lhs or rhs)`.
    Keyword(&'static str),
    /// `NAME(lhs, rhs)`, for the two-argument allow-listed functions.
    Call(&'static str),
}

/// How a single sub-expression is textually wrapped.
#[derive(Clone, Copy, Debug)]
pub enum UnaryCombine {
    /// `(OPexpr)`, for unary `-` and `~`.
    Prefix(&'static str),
    /// `(not expr)`.
    Not,
    /// `NAME(expr)`, for the one-argument allow-listed functions.
    Call(&'static str),
}

/// The placeholder text for operand `index`.
pub fn leaf(index: usize) -> String {
    OperandTable::name(index)
}

pub fn build_binary(combine: Combine, left_expr: &str, right_expr: &str) -> String {
    match combine {
        Combine::Infix(op) => format!("({} {} {})", left_expr, op, right_expr),
        Combine::Keyword(op) => format!("({} {} {})", left_expr, op, right_expr),
        Combine::Call(name) => format!("{}({}, {})", name, left_expr, right_expr),
    }
}

pub fn apply_unary(combine: UnaryCombine, expr: &str) -> String {
    match combine {
        UnaryCombine::Prefix(op) => format!("({}{})", op, expr),
        UnaryCombine::Not => format!("(not {})", expr),
        UnaryCombine::Call(name) => format!("{}({})", name, expr),
    }
}

/// Merges `right` into `left` (appending `right`'s operands that aren't
/// already present by identity), returning the map from every right-hand
/// placeholder index to its final index in `left`. Every right index is
/// present in the returned map, whether it resolved to a pre-existing `left`
/// entry (same `OperandId`) or a freshly appended one — so rebasing the
/// right-hand expression text is a single lookup per placeholder, with no
/// separate bookkeeping for "duplicate vs. fresh" the way the textual
/// scanner this is grounded on needed.
pub fn fuse_operands(left: &mut OperandTable, right: &OperandTable) -> HashMap<usize, usize> {
    let mut index_map = HashMap::with_capacity(right.len());
    for (ridx, operand) in right.iter() {
        let lidx = match left.find_by_id(operand.id()) {
            Some(existing) => existing,
            None => left.push(operand.clone()),
        };
        index_map.insert(ridx, lidx);
    }
    index_map
}

/// Rewrites every `o<k>` placeholder in `expr` to `o<index_map[k]>`. A
/// placeholder is recognized as a leading `o` at the start of the string, or
/// preceded by `(` or a space, followed by one or more ASCII digits
/// terminated by whitespace, `)`, `[`, or end-of-string; everything else
/// passes through verbatim. No regex: the grammar this rebases is exactly
/// this one token shape, so a hand-rolled scan is both simpler and faster.
pub fn rebase_expression(expr: &str, index_map: &HashMap<usize, usize>) -> String {
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;
    while i < bytes.len() {
        let is_boundary = i == 0 || matches!(bytes[i - 1], b'(' | b' ');
        if bytes[i] == b'o' && is_boundary && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            let old_idx: usize = expr[start..end].parse().expect("scanned ASCII digits");
            let new_idx = index_map.get(&old_idx).copied().unwrap_or(old_idx);
            out.push_str(&OperandTable::name(new_idx));
            i = end;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

/// Fuses `left` (with its operand table) and `right` (with its own,
/// separate operand table) into one expression, mutating `left_operands`
/// in place to hold the merged table. Returns the combined expression text;
/// the caller (`LazyNode`) is responsible for pairing it with the now-merged
/// `left_operands`.
pub fn fuse(
    left_expr: &str,
    left_operands: &mut OperandTable,
    combine: Combine,
    right_expr: &str,
    right_operands: &OperandTable,
) -> String {
    let index_map = fuse_operands(left_operands, right_operands);
    let rebased = rebase_expression(right_expr, &index_map);
    build_binary(combine, left_expr, &rebased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Operand;

    #[test]
    fn rebase_shifts_disjoint_placeholders() {
        let map = HashMap::from([(0, 2), (1, 3)]);
        assert_eq!(rebase_expression("(o0 + o1)", &map), "(o2 + o3)");
    }

    #[test]
    fn rebase_ignores_non_placeholder_identifiers_containing_o() {
        // `cos` starts with a letter other than a boundary-preceded `o`, so
        // it must never be mistaken for a placeholder.
        let map = HashMap::from([(0, 1)]);
        assert_eq!(rebase_expression("cos(o0)", &map), "cos(o1)");
    }

    #[test]
    fn fuse_operands_deduplicates_shared_identity() {
        let shared = Operand::scalar(1i32);
        let mut left = OperandTable::new();
        left.push(shared.clone());
        left.push(Operand::scalar(2i32));

        let mut right = OperandTable::new();
        right.push(shared.clone());
        right.push(Operand::scalar(3i32));

        let map = fuse_operands(&mut left, &right);
        assert_eq!(map[&0], 0); // shared operand dedups to its existing left slot
        assert_eq!(map[&1], 2); // fresh operand appended at the next free slot
        assert_eq!(left.len(), 3);
    }

    #[test]
    fn fuse_builds_combined_infix_expression() {
        let mut left = OperandTable::new();
        left.push(Operand::scalar(1i32));
        let right_op = Operand::scalar(2i32);
        let mut right = OperandTable::new();
        right.push(right_op);

        let combined = fuse("o0", &mut left, Combine::Infix("+"), "o0", &right);
        assert_eq!(combined, "(o0 + o1)");
        assert_eq!(left.len(), 2);
    }
}

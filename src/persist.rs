// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! The persistence hook (§4.8, §6): serializes a `LazyNode`'s expression and
//! operand locators into a fixed metadata key (`LazyArray`) alongside the
//! output container, and reconstructs a `PersistedExpr` from that metadata
//! on open. A real storage engine would write this key into the container's
//! own variable-length metadata block; the reference engine here has no
//! on-disk container at all, so it keeps an in-process registry keyed by
//! locator instead — same contract, no filesystem.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::operand::{Operand, OperandTable};

/// The fixed metadata key every persisted expression is stored under.
pub const METADATA_KEY: &str = "LazyArray";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LazyArrayMeta {
    expression: String,
    operands: BTreeMap<String, String>,
    #[serde(rename = "UDF")]
    udf: Option<String>,
}

fn registry() -> &'static Mutex<HashMap<String, String>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Persists `expr`/`table` under `out_locator`. Every chunked operand must
/// itself already carry a persistence locator (§7 `PersistenceError`: "
/// non-persistent operand on save"); scalars need no entry (they're already
/// inlined as literals in `expr`'s text), and a dense in-memory operand has
/// no locator to record at all, so it refuses to save outright.
pub fn save(expr: &str, table: &OperandTable, out_locator: &str) -> Result<()> {
    let mut operands = BTreeMap::new();
    for (index, operand) in table.iter() {
        match operand {
            Operand::Chunked(_, container) => {
                let locator = container.locator().ok_or_else(|| {
                    Error::persistence(format!(
                        "operand {} has no persistence locator",
                        OperandTable::name(index)
                    ))
                })?;
                operands.insert(OperandTable::name(index), locator.to_string());
            }
            Operand::Scalar(..) => {}
            Operand::Dense(..) => {
                return Err(Error::persistence(format!(
                    "operand {} is a dense in-memory array and cannot be persisted",
                    OperandTable::name(index)
                )))
            }
        }
    }
    let meta = LazyArrayMeta {
        expression: expr.to_string(),
        operands,
        udf: None,
    };
    let json = serde_json::to_string(&meta)
        .map_err(|e| Error::persistence(format!("failed to serialize metadata: {}", e)))?;
    registry()
        .lock()
        .expect("persistence registry mutex poisoned")
        .insert(out_locator.to_string(), json);
    Ok(())
}

/// A persisted expression as read back from `METADATA_KEY`, ready for the
/// caller to resolve each operand locator back into a live `Container` and
/// rebuild a `LazyNode`.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedExpr {
    pub expression: String,
    pub operand_locators: BTreeMap<String, String>,
}

/// Reads back the expression persisted at `locator`. Fails if nothing was
/// ever saved there, or if the saved metadata names a UDF block function
/// (§6: "opening when UDF ≠ null is a hard failure" — a Rust function
/// pointer has no stable textual form to round-trip through metadata at
/// all, so this case can never arise from `save` and only from metadata
/// produced elsewhere).
pub fn open(locator: &str) -> Result<PersistedExpr> {
    let registry = registry().lock().expect("persistence registry mutex poisoned");
    let json = registry.get(locator).ok_or_else(|| {
        Error::persistence(format!("no persisted expression at locator {}", locator))
    })?;
    let meta: LazyArrayMeta = serde_json::from_str(json)
        .map_err(|e| Error::persistence(format!("failed to deserialize metadata: {}", e)))?;
    if meta.udf.is_some() {
        return Err(Error::persistence(
            "cannot open a persisted expression with a UDF block function",
        ));
    }
    Ok(PersistedExpr {
        expression: meta.expression,
        operand_locators: meta.operands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemContainer;
    use crate::scalarty::ScalarTy;
    use std::rc::Rc;

    #[test]
    fn save_then_open_round_trips_expression_and_locators() {
        let container = MemContainer::create_empty(vec![4], vec![4], vec![4], ScalarTy::F64)
            .with_fresh_locator();
        let locator = container.locator().unwrap().to_string();
        let mut table = OperandTable::new();
        table.push(Operand::chunked(Rc::new(container)));

        save("(o0 + 1)", &table, "mem://out-1").unwrap();
        let persisted = open("mem://out-1").unwrap();
        assert_eq!(persisted.expression, "(o0 + 1)");
        assert_eq!(persisted.operand_locators.get("o0"), Some(&locator));
    }

    #[test]
    fn save_rejects_a_dense_operand() {
        let mut table = OperandTable::new();
        table.push(Operand::dense(crate::operand::DenseArray::new(
            vec![4],
            ScalarTy::F64,
            vec![0u8; 32],
        )));
        assert!(save("o0", &table, "mem://out-2").is_err());
    }

    #[test]
    fn open_rejects_an_unknown_locator() {
        assert!(open("mem://never-saved").is_err());
    }
}

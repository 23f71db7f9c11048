// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/// Crate-wide result alias: every fallible public entry point returns this.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error taxonomy. Each variant carries the structured context a
/// caller needs to decide what went wrong without parsing a message string.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {detail}")]
    Shape { detail: String },

    #[error("expression error: {detail}")]
    Expression { detail: String },

    #[error("persistence error: {detail}")]
    Persistence { detail: String },

    #[error("kernel error evaluating `{expr}`: {detail}")]
    Kernel { expr: String, detail: String },

    #[error("reduction error: {detail}")]
    Reduction { detail: String },
}

impl Error {
    pub fn shape(detail: impl Into<String>) -> Error {
        Error::Shape {
            detail: detail.into(),
        }
    }

    pub fn expression(detail: impl Into<String>) -> Error {
        Error::Expression {
            detail: detail.into(),
        }
    }

    pub fn persistence(detail: impl Into<String>) -> Error {
        Error::Persistence {
            detail: detail.into(),
        }
    }

    pub fn kernel(expr: impl Into<String>, detail: impl Into<String>) -> Error {
        Error::Kernel {
            expr: expr.into(),
            detail: detail.into(),
        }
    }

    pub fn reduction(detail: impl Into<String>) -> Error {
        Error::Reduction {
            detail: detail.into(),
        }
    }
}

//! Error taxonomy for the OData engine
//!
//! Every failure raised by parsing, binding, schema construction or a storage
//! driver is one of these variants. The HTTP mapping lives in
//! `problem_mapping`.

use std::fmt;

use crate::entity_set::Capability;

/// Unified error type for all engine operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed query-option syntax, type-incompatible operands, invalid
    /// navigation references, non-expandable expansions, invalid skip tokens.
    #[error("{message}")]
    BadRequest {
        code: &'static str,
        message: String,
        /// Cursor offset into the offending text, for syntax errors.
        offset: Option<usize>,
    },

    /// Key lookup miss.
    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    /// Schema construction violation, detected while the model is built.
    #[error("configuration error: {message}")]
    Configuration { code: &'static str, message: String },

    /// The driver behind an entity set does not offer the capability.
    #[error("entity set does not support {0}")]
    NotImplemented(Capability),

    /// Opaque storage failure surfaced by a driver.
    #[error("storage error: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Error::BadRequest {
            code,
            message: message.into(),
            offset: None,
        }
    }

    /// Syntax error anchored at a cursor offset.
    pub fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Error::BadRequest {
            code: "syntax_error",
            message: message.into(),
            offset: Some(offset),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Error::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn configuration(code: &'static str, message: impl Into<String>) -> Self {
        Error::Configuration {
            code,
            message: message.into(),
        }
    }

    pub fn driver(err: impl fmt::Display) -> Self {
        Error::Driver(err.to_string())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest { .. })
    }

    /// Machine-readable code of this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadRequest { code, .. }
            | Error::NotFound { code, .. }
            | Error::Configuration { code, .. } => code,
            Error::NotImplemented(_) => "capability_not_supported",
            Error::Driver(_) => "storage_error",
        }
    }
}

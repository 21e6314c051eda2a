//! Input validation and safety limits for query options
//!
//! Caps applied before any expression reaches a driver:
//! - Maximum `$filter` length and node count
//! - Maximum number of `$orderby` and `$select` items
//! - Maximum `$expand` nesting depth

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryLimits {
    /// Maximum length of `$filter` in characters (default: 2000)
    pub max_filter_length: usize,
    /// Maximum AST nodes in a `$filter` expression (default: 256)
    pub max_filter_nodes: usize,
    /// Maximum number of `$orderby` items (default: 5)
    pub max_orderby_fields: usize,
    /// Maximum number of `$select` items (default: 64)
    pub max_select_fields: usize,
    /// Maximum `$expand` nesting depth (default: 3)
    pub max_expand_depth: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_filter_length: 2000,
            max_filter_nodes: 256,
            max_orderby_fields: 5,
            max_select_fields: 64,
            max_expand_depth: 3,
        }
    }
}

impl QueryLimits {
    #[must_use]
    pub fn with_max_filter_length(mut self, max: usize) -> Self {
        self.max_filter_length = max;
        self
    }

    #[must_use]
    pub fn with_max_filter_nodes(mut self, max: usize) -> Self {
        self.max_filter_nodes = max;
        self
    }

    #[must_use]
    pub fn with_max_orderby_fields(mut self, max: usize) -> Self {
        self.max_orderby_fields = max;
        self
    }

    #[must_use]
    pub fn with_max_expand_depth(mut self, max: usize) -> Self {
        self.max_expand_depth = max;
        self
    }

    /// # Errors
    /// Returns `Error::BadRequest` when the raw filter is too long.
    pub fn validate_filter_length(&self, filter: &str) -> Result<()> {
        if filter.chars().count() > self.max_filter_length {
            return Err(Error::bad_request(
                "filter_too_long",
                format!(
                    "$filter exceeds maximum length of {} characters",
                    self.max_filter_length
                ),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Error::BadRequest` when the filter has too many nodes.
    pub fn validate_filter_nodes(&self, nodes: usize) -> Result<()> {
        if nodes > self.max_filter_nodes {
            return Err(Error::bad_request(
                "filter_too_complex",
                format!(
                    "$filter has {nodes} nodes (max: {})",
                    self.max_filter_nodes
                ),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Error::BadRequest` when too many order items are given.
    pub fn validate_orderby_count(&self, count: usize) -> Result<()> {
        if count > self.max_orderby_fields {
            return Err(Error::bad_request(
                "too_many_orderby_fields",
                format!("too many $orderby fields (max: {})", self.max_orderby_fields),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Error::BadRequest` when too many select items are given.
    pub fn validate_select_count(&self, count: usize) -> Result<()> {
        if count > self.max_select_fields {
            return Err(Error::bad_request(
                "too_many_select_fields",
                format!("too many $select fields (max: {})", self.max_select_fields),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Error::BadRequest` when expansion nests too deeply.
    pub fn validate_expand_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_expand_depth {
            return Err(Error::bad_request(
                "expand_too_deep",
                format!("$expand nesting exceeds depth {}", self.max_expand_depth),
            ));
        }
        Ok(())
    }
}

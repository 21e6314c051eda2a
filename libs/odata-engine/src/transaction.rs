//! Per-request state.

use http::Method;

use crate::error::{Error, Result};
use crate::limits::QueryLimits;
use crate::options::{ExpandItem, QueryOptions};

/// One request: method, resource path, decoded query parameters, parsed
/// system query options and an optional JSON body. Expansions run on a
/// clone scoped to the expand item's own options.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub method: Method,
    /// Resource path, without query string.
    pub path: String,
    params: Vec<(String, String)>,
    pub options: QueryOptions,
    pub body: Option<serde_json::Value>,
    /// Expansion depth; zero for the request itself.
    pub depth: usize,
}

impl Transaction {
    /// # Errors
    /// Returns `Error::BadRequest` for malformed or oversize options.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        params: Vec<(String, String)>,
        body: Option<serde_json::Value>,
        limits: &QueryLimits,
    ) -> Result<Self> {
        let options = QueryOptions::from_pairs(
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            limits,
        )?;
        Ok(Self {
            method,
            path: path.into(),
            params,
            options,
            body,
            depth: 0,
        })
    }

    /// Split `uri` into path and query string and decode the latter.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for undecodable query strings and invalid
    /// options.
    pub fn from_uri(
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
        limits: &QueryLimits,
    ) -> Result<Self> {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query).map_err(|e| {
            Error::bad_request("invalid_query_string", format!("cannot decode query string: {e}"))
        })?;
        Self::new(method, path, params, body, limits)
    }

    /// # Errors
    /// See [`Transaction::from_uri`].
    pub fn get(uri: &str, limits: &QueryLimits) -> Result<Self> {
        Self::from_uri(Method::GET, uri, None, limits)
    }

    /// Value of a query parameter, system or custom.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Child transaction for one `$expand` item.
    #[must_use]
    pub fn for_expansion(&self, item: &ExpandItem) -> Transaction {
        Transaction {
            options: item.options.clone(),
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    /// The encoded query string minus `$skiptoken`, for next links.
    ///
    /// # Errors
    /// Serialization failures.
    pub fn query_without_skiptoken(&self) -> Result<String> {
        let kept: Vec<&(String, String)> = self
            .params
            .iter()
            .filter(|(k, _)| k != "$skiptoken")
            .collect();
        serde_urlencoded::to_string(kept).map_err(Error::driver)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_encoded_options() {
        let tx = Transaction::get(
            "/Pets?$filter=type%20eq%20%27dog%27&$top=3&id=Pets(1)",
            &QueryLimits::default(),
        )
        .unwrap();
        assert_eq!(tx.path, "/Pets");
        assert_eq!(tx.options.top, Some(3));
        assert_eq!(tx.options.filter.as_ref().unwrap().to_string(), "type eq 'dog'");
        assert_eq!(tx.param("id"), Some("Pets(1)"));
    }

    #[test]
    fn next_link_query_drops_skiptoken() {
        let tx = Transaction::get("/Pets?$top=3&$skiptoken=abc&$skip=1", &QueryLimits::default())
            .unwrap();
        let query = tx.query_without_skiptoken().unwrap();
        assert!(!query.contains("skiptoken"));
        let back: Vec<(String, String)> = serde_urlencoded::from_str(&query).unwrap();
        assert_eq!(
            back,
            vec![
                ("$top".to_owned(), "3".to_owned()),
                ("$skip".to_owned(), "1".to_owned())
            ]
        );
    }

    #[test]
    fn expansion_clones_params_and_scopes_options() {
        let tx = Transaction::get("/Owners?$expand=MyPets($top=1)&id=Pets(2)", &QueryLimits::default())
            .unwrap();
        let item = tx.options.expand[0].clone();
        let child = tx.for_expansion(&item);
        assert_eq!(child.depth, 1);
        assert_eq!(child.options.top, Some(1));
        assert!(child.options.expand.is_empty());
        assert_eq!(child.param("id"), Some("Pets(2)"));
    }

    #[test]
    fn invalid_options_fail_before_execution() {
        let err = Transaction::get("/Pets?$filter=name eq", &QueryLimits::default()).unwrap_err();
        assert_eq!(err.code(), "syntax_error");
    }
}

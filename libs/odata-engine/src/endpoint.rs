//! Where a service is mounted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Mount point of one OData service.
///
/// The service URI is the namespace with dots turned into path separators,
/// suffixed with `@<version>` when a version is set:
/// `Acme.Pets` at version `2` is served under `<prefix>/Acme/Pets@2`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Endpoint {
    pub prefix: String,
    pub namespace: String,
    pub version: Option<String>,
    /// Scheme and authority used for absolute links.
    pub base_url: String,
    /// Pre-rendered `$metadata` document served verbatim when set.
    pub cached_metadata_path: Option<PathBuf>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            prefix: "odata".to_owned(),
            namespace: "Default".to_owned(),
            version: None,
            base_url: "http://localhost".to_owned(),
            cached_metadata_path: None,
        }
    }
}

impl Endpoint {
    #[must_use]
    pub fn new(prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_cached_metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cached_metadata_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn service_uri(&self) -> String {
        let path = self.namespace.replace('.', "/");
        match &self.version {
            Some(version) => format!("{path}@{version}"),
            None => path,
        }
    }

    #[must_use]
    pub fn route(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            self.service_uri()
        } else {
            format!("{prefix}/{}", self.service_uri())
        }
    }

    /// Absolute service root.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.route())
    }

    #[must_use]
    pub fn cached_metadata_path(&self) -> Option<&Path> {
        self.cached_metadata_path.as_deref()
    }

    /// Resource path relative to the service root. Accepts absolute URLs,
    /// routed paths and bare resource paths.
    #[must_use]
    pub fn resource_path<'p>(&self, path: &'p str) -> &'p str {
        let url = self.endpoint_url();
        let mut rest = path.strip_prefix(url.as_str()).unwrap_or(path);
        rest = rest.trim_start_matches('/');
        let route = self.route();
        if let Some(stripped) = rest.strip_prefix(route.as_str())
            && (stripped.is_empty() || stripped.starts_with('/'))
        {
            rest = stripped;
        }
        rest.trim_start_matches('/')
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn derives_uris_from_namespace_and_version() {
        let endpoint = Endpoint::new("api", "Acme.Pets")
            .with_version("2")
            .with_base_url("https://example.com/");
        assert_eq!(endpoint.service_uri(), "Acme/Pets@2");
        assert_eq!(endpoint.route(), "api/Acme/Pets@2");
        assert_eq!(endpoint.endpoint_url(), "https://example.com/api/Acme/Pets@2");
    }

    #[test]
    fn strips_route_from_resource_paths() {
        let endpoint = Endpoint::new("odata", "Zoo");
        assert_eq!(endpoint.resource_path("/odata/Zoo/Pets(1)"), "Pets(1)");
        assert_eq!(endpoint.resource_path("http://localhost/odata/Zoo/$metadata"), "$metadata");
        assert_eq!(endpoint.resource_path("Pets"), "Pets");
        assert_eq!(endpoint.resource_path("/odata/Zoo"), "");
        assert_eq!(endpoint.resource_path("/odata/Zookeepers"), "odata/Zookeepers");
    }

    #[test]
    fn deserializes_with_defaults() {
        let endpoint: Endpoint = serde_json::from_str(r#"{"namespace":"A.B"}"#).unwrap();
        assert_eq!(endpoint.route(), "odata/A/B");
        assert!(endpoint.cached_metadata_path().is_none());
    }
}

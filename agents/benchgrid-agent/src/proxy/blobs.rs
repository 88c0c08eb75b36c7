//! Blob Transfer Descriptors
//!
//! Describes one blob upload or download against the proxy endpoint and the
//! deterministic route it maps to. Because the route is a pure function of
//! the descriptor, retried uploads overwrite the same logical blob instead of
//! creating duplicates.

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Route prefix for the proxy blob endpoints.
pub const BLOBS_API_ROUTE: &str = "/api/blobs";

/// Which durable store the blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobStoreType {
    /// Results, logs, and other run artifacts.
    Content,
    /// Workload packages and dependencies.
    Packages,
}

impl std::fmt::Display for BlobStoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobStoreType::Content => write!(f, "Content"),
            BlobStoreType::Packages => write!(f, "Packages"),
        }
    }
}

/// Immutable description of one transfer unit. Constructed per request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub store_type: BlobStoreType,
    pub blob_name: String,
    pub container_name: String,
    pub content_type: String,
    pub content_encoding: String,
    pub blob_path: Option<String>,
    pub source: Option<String>,
}

impl BlobDescriptor {
    pub fn new(
        store_type: BlobStoreType,
        blob_name: impl Into<String>,
        container_name: impl Into<String>,
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
    ) -> Self {
        Self {
            store_type,
            blob_name: blob_name.into(),
            container_name: container_name.into(),
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            blob_path: None,
            source: None,
        }
    }

    /// Virtual directory path for the blob within its container.
    pub fn with_blob_path(mut self, blob_path: impl Into<String>) -> Self {
        self.blob_path = Some(blob_path.into());
        self
    }

    /// The component that produced the blob.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Build the request URL for this descriptor against a proxy base URL.
    ///
    /// Query parameters already present on the base (e.g. an api-key) are
    /// preserved ahead of the descriptor fields. Encoding is handled by the
    /// URL serializer, so the route is deterministic for a given descriptor.
    pub fn api_route(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.set_path(&format!("{}/{}", BLOBS_API_ROUTE, self.blob_name));

        {
            let mut query = url.query_pairs_mut();
            if let Some(source) = &self.source {
                query.append_pair("source", source);
            }
            query.append_pair("storeType", &self.store_type.to_string());
            query.append_pair("containerName", &self.container_name);
            query.append_pair("contentType", &self.content_type);
            query.append_pair("contentEncoding", &self.content_encoding);
            if let Some(blob_path) = &self.blob_path {
                query.append_pair("blobPath", blob_path);
            }
        }

        url
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_route_contains_all_required_fields() {
        let base = Url::parse("http://proxy.local:5000").unwrap();
        let descriptor = BlobDescriptor::new(
            BlobStoreType::Packages,
            "anypackage.1.0.0.zip",
            "packages-container",
            "application/octet-stream",
            "utf-8",
        );

        let url = descriptor.api_route(&base);
        assert_eq!(url.path(), "/api/blobs/anypackage.1.0.0.zip");

        let query = query_map(&url);
        assert_eq!(query["storeType"], "Packages");
        assert_eq!(query["containerName"], "packages-container");
        assert_eq!(query["contentType"], "application/octet-stream");
        assert_eq!(query["contentEncoding"], "utf-8");
        assert!(!query.contains_key("blobPath"));
        assert!(!query.contains_key("source"));
    }

    #[test]
    fn test_route_includes_optional_fields() {
        let base = Url::parse("http://proxy.local:5000").unwrap();
        let descriptor = BlobDescriptor::new(
            BlobStoreType::Content,
            "results.log",
            "run-container",
            "text/plain",
            "utf-8",
        )
        .with_blob_path("/any/path/to/blob")
        .with_source("BenchGrid");

        let query = query_map(&descriptor.api_route(&base));
        assert_eq!(query["source"], "BenchGrid");
        assert_eq!(query["blobPath"], "/any/path/to/blob");
    }

    #[test]
    fn test_route_preserves_base_query() {
        let base = Url::parse("http://proxy.local:5000?api-key=1234").unwrap();
        let descriptor = BlobDescriptor::new(
            BlobStoreType::Content,
            "results.log",
            "run-container",
            "text/plain",
            "utf-8",
        );

        let url = descriptor.api_route(&base);
        let query = query_map(&url);
        assert_eq!(query["api-key"], "1234");
        // Base query comes ahead of descriptor fields.
        assert!(url.query().unwrap().starts_with("api-key=1234"));
    }

    #[test]
    fn test_route_is_deterministic() {
        let base = Url::parse("http://proxy.local:5000").unwrap();
        let make = || {
            BlobDescriptor::new(
                BlobStoreType::Content,
                "results.log",
                "run-container",
                "text/plain",
                "utf-8",
            )
            .api_route(&base)
        };

        assert_eq!(make(), make());
    }
}

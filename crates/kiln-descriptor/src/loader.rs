//! Descriptor and weight resource loading.
//!
//! The loader composes resource locations of the form
//! `{location}/graph_{backend}.json` and `{location}/weight_{backend}.bin`
//! and fetches them through a pluggable [`Fetcher`]. Transport is a
//! collaborator: this crate ships a filesystem fetcher and a blocking
//! HTTP fetcher, and callers may bring their own.

use crate::error::{DescriptorError, Result};
use crate::model::GraphDescriptor;
use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Transport seam for resource retrieval.
///
/// The resource string may carry a `?t=<token>` query suffix when
/// cache-defeating mode is enabled; fetchers for transports without a
/// cache (e.g. the filesystem) should ignore it.
pub trait Fetcher {
    fn fetch(&self, resource: &str) -> std::result::Result<Vec<u8>, String>;
}

/// Reads resources from the local filesystem. The query component, if
/// any, is stripped before the path is opened.
#[derive(Debug, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(&self, resource: &str) -> std::result::Result<Vec<u8>, String> {
        let path = resource.split_once('?').map_or(resource, |(path, _)| path);
        std::fs::read(path).map_err(|e| e.to_string())
    }
}

/// Fetches resources over HTTP with a blocking client.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, resource: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(resource)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let body = response.bytes().map_err(|e| e.to_string())?;
        Ok(body.to_vec())
    }
}

/// Fetches and parses descriptor/weight resources from a named
/// location.
pub struct DescriptorLoader<F: Fetcher> {
    location: String,
    backend: String,
    ignore_cache: bool,
    fetcher: F,
    /// Last issued cache-busting token; tokens are strictly increasing
    /// so two successive loads never produce the same resource string.
    last_token: Cell<u64>,
}

impl<F: Fetcher> DescriptorLoader<F> {
    pub fn new(location: impl Into<String>, backend: impl Into<String>, fetcher: F) -> Self {
        Self {
            location: location.into(),
            backend: backend.into(),
            ignore_cache: false,
            fetcher,
            last_token: Cell::new(0),
        }
    }

    /// Enable cache-defeating mode: every composed resource string gets
    /// a distinguishing `?t=<token>` suffix.
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// Compose the descriptor resource string for one fetch.
    pub fn graph_resource(&self) -> String {
        self.resource(&format!("graph_{}.json", self.backend))
    }

    /// Compose the weight resource string for one fetch.
    pub fn weight_resource(&self) -> String {
        self.resource(&format!("weight_{}.bin", self.backend))
    }

    /// Fetch and parse the graph descriptor.
    pub fn fetch_descriptor(&self) -> Result<GraphDescriptor> {
        let resource = self.graph_resource();
        debug!(%resource, "fetching graph descriptor");
        let bytes = self.fetch(&resource)?;
        GraphDescriptor::from_json(&bytes)
    }

    /// Fetch the raw weight payload.
    pub fn fetch_weights(&self) -> Result<Vec<u8>> {
        let resource = self.weight_resource();
        debug!(%resource, "fetching weight payload");
        self.fetch(&resource)
    }

    fn fetch(&self, resource: &str) -> Result<Vec<u8>> {
        self.fetcher
            .fetch(resource)
            .map_err(|reason| DescriptorError::Fetch {
                resource: resource.to_string(),
                reason,
            })
    }

    fn resource(&self, file: &str) -> String {
        let base = format!("{}/{}", self.location, file);
        if self.ignore_cache {
            format!("{}?t={}", base, self.next_token())
        } else {
            base
        }
    }

    fn next_token(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        let token = now.max(self.last_token.get() + 1);
        self.last_token.set(token);
        token
    }
}

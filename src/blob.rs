//! Session-local blob URLs for source images.
//!
//! Each taken-in file is parked in a [`BlobRegistry`] and addressed through a
//! `blob:<uuid>` URL for the rest of the session. The [`BlobHandle`] returned
//! on registration owns the entry: dropping it releases the bytes, so every
//! handle is released exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A `blob:` URL resolvable through the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct BlobUrl(Uuid);

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

impl From<BlobUrl> for String {
    fn from(url: BlobUrl) -> Self {
        url.to_string()
    }
}

/// Bytes of a registered file plus its MIME type.
#[derive(Debug, Clone)]
pub struct Blob {
    /// Raw file contents.
    pub bytes: Arc<[u8]>,
    /// MIME type detected at intake.
    pub mime_type: String,
}

type Entries = HashMap<Uuid, Blob>;

/// Registry of live blobs, shared between intake and the batch processor.
#[derive(Debug, Clone, Default)]
pub struct BlobRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl BlobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register bytes and return the owning handle.
    #[must_use]
    pub fn register(&self, bytes: Vec<u8>, mime_type: &str) -> BlobHandle {
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            Blob {
                bytes: bytes.into(),
                mime_type: mime_type.to_string(),
            },
        );
        BlobHandle {
            url: BlobUrl(id),
            registry: self.clone(),
        }
    }

    /// Look up the blob behind a URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlobReleased`] if the owning handle has been dropped.
    pub fn resolve(&self, url: BlobUrl) -> Result<Blob> {
        self.lock()
            .get(&url.0)
            .cloned()
            .ok_or(Error::BlobReleased(url))
    }

    /// Number of blobs still held.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }
}

/// Ownership of one registered blob. Releases it on drop.
#[derive(Debug)]
pub struct BlobHandle {
    url: BlobUrl,
    registry: BlobRegistry,
}

impl BlobHandle {
    /// URL this handle keeps alive.
    #[must_use]
    pub fn url(&self) -> BlobUrl {
        self.url
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.url.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_keeps_blob_resolvable_until_dropped() {
        let registry = BlobRegistry::new();
        let handle = registry.register(vec![1, 2, 3], "image/png");
        let url = handle.url();

        let blob = registry.resolve(url).unwrap();
        assert_eq!(&*blob.bytes, &[1, 2, 3]);
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(registry.live_count(), 1);

        drop(handle);
        assert_eq!(registry.live_count(), 0);
        assert!(matches!(registry.resolve(url), Err(Error::BlobReleased(u)) if u == url));
    }

    #[test]
    fn urls_are_distinct_and_prefixed() {
        let registry = BlobRegistry::new();
        let a = registry.register(Vec::new(), "image/png");
        let b = registry.register(Vec::new(), "image/png");
        assert_ne!(a.url(), b.url());
        assert!(a.url().to_string().starts_with("blob:"));
    }

    #[test]
    fn resolved_bytes_outlive_the_handle() {
        let registry = BlobRegistry::new();
        let handle = registry.register(vec![9; 4], "image/jpeg");
        let blob = registry.resolve(handle.url()).unwrap();
        drop(handle);
        assert_eq!(blob.bytes.len(), 4);
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::error::AppResult;

use super::render::RenderedDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Retrievable reference written to `invoice.document_ref`.
    pub reference: String,
    pub sha256: String,
    pub size: usize,
}

/// key: fulfillment-content-store -> rendered blobs keyed by invoice id
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Writing the same invoice twice replaces the earlier artifact.
    async fn put(&self, invoice_id: i64, document: &RenderedDocument)
        -> AppResult<StoredDocument>;
    async fn get(&self, reference: &str) -> AppResult<Option<Bytes>>;
}

fn document_name(invoice_id: i64, extension: &str) -> String {
    format!("invoices/invoice_{invoice_id}.{extension}")
}

fn digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Writes documents beneath a root directory on local disk.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(
        &self,
        invoice_id: i64,
        document: &RenderedDocument,
    ) -> AppResult<StoredDocument> {
        let reference = document_name(invoice_id, document.extension);
        let path = self.root.join(&reference);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a torn file.
        let staging = path.with_extension(format!("{}.partial", document.extension));
        let mut file = fs::File::create(&staging).await?;
        file.write_all(&document.body).await?;
        file.sync_all().await?;
        fs::rename(&staging, &path).await?;

        debug!(%invoice_id, path = %path.display(), "invoice document written");
        Ok(StoredDocument {
            reference,
            sha256: digest(&document.body),
            size: document.body.len(),
        })
    }

    async fn get(&self, reference: &str) -> AppResult<Option<Bytes>> {
        match fs::read(self.root.join(reference)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process store; also counts writes so callers can check for duplicate renders.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    documents: DashMap<String, Bytes>,
    writes: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(
        &self,
        invoice_id: i64,
        document: &RenderedDocument,
    ) -> AppResult<StoredDocument> {
        let reference = document_name(invoice_id, document.extension);
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.documents
            .insert(reference.clone(), document.body.clone());
        Ok(StoredDocument {
            reference,
            sha256: digest(&document.body),
            size: document.body.len(),
        })
    }

    async fn get(&self, reference: &str) -> AppResult<Option<Bytes>> {
        Ok(self
            .documents
            .get(reference)
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(body: &'static str) -> RenderedDocument {
        RenderedDocument {
            content_type: "text/plain; charset=utf-8",
            extension: "txt",
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn fs_store_writes_under_invoice_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        let stored = store.put(42, &document("INVOICE #42")).await.unwrap();

        assert_eq!(stored.reference, "invoices/invoice_42.txt");
        assert_eq!(stored.size, 11);
        assert_eq!(stored.sha256.len(), 64);
        let on_disk = std::fs::read(dir.path().join("invoices/invoice_42.txt")).unwrap();
        assert_eq!(on_disk, b"INVOICE #42");
        assert!(!dir.path().join("invoices/invoice_42.txt.partial").exists());
    }

    #[tokio::test]
    async fn fs_store_rewrite_replaces_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        store.put(7, &document("first")).await.unwrap();
        let second = store.put(7, &document("second")).await.unwrap();

        let fetched = store.get(&second.reference).await.unwrap().unwrap();
        assert_eq!(&fetched[..], b"second");
        let entries = std::fs::read_dir(dir.path().join("invoices")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn fs_store_missing_reference_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        assert!(store.get("invoices/invoice_1.txt").await.unwrap().is_none());
    }
}

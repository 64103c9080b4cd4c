//! The user-facing surface: everything a front end can ask for.

use std::path::{Path, PathBuf};

use crate::batch::{BatchEvent, BatchProcessor, BatchSummary};
use crate::blob::BlobRegistry;
use crate::client::WatermarkRemover;
use crate::download::{self, SaveMode, SaveOutcome};
use crate::error::{Error, Result};
use crate::intake;
use crate::record::{ImageRecord, RecordId, StatusKind};
use crate::store::SharedStore;

/// One working session: the record list, its blobs, and a batch processor.
///
/// Blobs live as long as their records; dropping the session releases
/// everything that is left.
pub struct Session<C> {
    store: SharedStore,
    blobs: BlobRegistry,
    processor: BatchProcessor<C>,
}

impl<C: WatermarkRemover> Session<C> {
    /// Start an empty session that sends images to `client`.
    pub fn new(client: C) -> Self {
        let store = SharedStore::new();
        let blobs = BlobRegistry::new();
        let processor = BatchProcessor::new(store.clone(), blobs.clone(), client);
        Self {
            store,
            blobs,
            processor,
        }
    }

    /// Add files and directories as pending records. Returns the new ids.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an input cannot be read; nothing is added then.
    pub fn add_files(&self, paths: &[PathBuf]) -> Result<Vec<RecordId>> {
        let items = intake::intake_paths(paths, &self.blobs)?;
        Ok(self.store.append(items))
    }

    /// Remove one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordBusy`] while it is being processed, or
    /// [`Error::RecordNotFound`].
    pub fn remove(&self, id: RecordId) -> Result<()> {
        self.store.remove(id).map(drop)
    }

    /// Remove every record not currently being processed.
    pub fn clear(&self) -> usize {
        self.store.clear()
    }

    /// Whether the start action should be enabled.
    pub fn can_start_batch(&self) -> bool {
        !self.processor.is_running() && self.pending_count() > 0
    }

    /// Whether a batch is running.
    pub fn is_processing(&self) -> bool {
        self.processor.is_running()
    }

    /// Run one batch over the records pending right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchInFlight`] if a batch is already running.
    pub async fn start_batch(&self) -> Result<BatchSummary> {
        self.processor.run().await
    }

    /// Like [`start_batch`](Self::start_batch), reporting progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchInFlight`] if a batch is already running.
    pub async fn start_batch_with_progress(
        &self,
        on_event: impl FnMut(BatchEvent),
    ) -> Result<BatchSummary> {
        self.processor.run_with_progress(on_event).await
    }

    /// Save one completed record into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`], [`Error::NotCompleted`], or an I/O
    /// or encoding error.
    pub fn download(&self, id: RecordId, dir: &Path, mode: SaveMode) -> Result<PathBuf> {
        let record = self.store.get(id).ok_or(Error::RecordNotFound(id))?;
        download::save_processed(&record, dir, mode)
    }

    /// Save every completed record into `dir`. Empty when none are completed.
    pub fn download_all(&self, dir: &Path, mode: SaveMode) -> Vec<SaveOutcome> {
        download::save_all_completed(&self.store.snapshot(), dir, mode)
    }

    /// A copy of every record in display order.
    pub fn records(&self) -> Vec<ImageRecord> {
        self.store.snapshot()
    }

    /// A copy of one record.
    pub fn record(&self, id: RecordId) -> Option<ImageRecord> {
        self.store.get(id)
    }

    /// Records waiting for a batch.
    pub fn pending_count(&self) -> usize {
        self.store.count(StatusKind::Pending)
    }

    /// Records with a result.
    pub fn completed_count(&self) -> usize {
        self.store.count(StatusKind::Completed)
    }

    /// Number of source blobs still held.
    pub fn live_blobs(&self) -> usize {
        self.blobs.live_count()
    }

    /// The injected client.
    pub fn client(&self) -> &C {
        self.processor.client()
    }
}

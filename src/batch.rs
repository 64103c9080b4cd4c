//! Sequential batch processing of pending records.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::blob::BlobRegistry;
use crate::client::WatermarkRemover;
use crate::data_url::DataUrl;
use crate::error::{Error, Result};
use crate::record::{ImageRecord, RecordId, RecordStatus};
use crate::store::{RecordUpdate, SharedStore};

/// Message recorded when a failure carries no text of its own.
pub const FALLBACK_ERROR: &str = "watermark removal failed";

/// Message recorded on the record that was out for processing when a batch
/// future was dropped.
pub const CANCELLED_ERROR: &str = "batch cancelled";

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// The record moved to `processing` and was sent to the service.
    Started {
        /// Record id.
        id: RecordId,
        /// Original file name.
        name: String,
    },
    /// The service returned an image.
    Completed {
        /// Record id.
        id: RecordId,
        /// Original file name.
        name: String,
    },
    /// Processing failed; the message was stored on the record.
    Failed {
        /// Record id.
        id: RecordId,
        /// Original file name.
        name: String,
        /// The stored failure message.
        message: String,
    },
    /// The record was pending at batch start but gone or changed by its turn.
    Skipped {
        /// Record id.
        id: RecordId,
    },
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records that ended `completed`.
    pub completed: usize,
    /// Records that ended `error`.
    pub failed: usize,
    /// Records skipped because they were removed during the batch.
    pub skipped: usize,
}

impl BatchSummary {
    /// Records the batch looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

/// Releases the in-flight flag however the batch future ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fails the record out for processing if the batch future is dropped
/// before its result lands.
struct ProcessingGuard<'a> {
    store: &'a SharedStore,
    id: Option<RecordId>,
}

impl ProcessingGuard<'_> {
    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        warn!("Batch dropped while {id} was processing");
        if let Err(e) = self
            .store
            .apply(id, RecordUpdate::Fail(CANCELLED_ERROR.to_string()))
        {
            debug!("Could not fail {id} after cancellation: {e}");
        }
    }
}

/// Drives pending records through the service one at a time.
///
/// Only records pending when [`run`](Self::run) is called are part of the
/// batch; anything added later waits for the next one. Records are sent in
/// display order and each call resolves before the next starts.
pub struct BatchProcessor<C> {
    store: SharedStore,
    blobs: BlobRegistry,
    client: C,
    in_flight: AtomicBool,
}

impl<C: WatermarkRemover> BatchProcessor<C> {
    /// Create a processor over a store, the blobs its records point at, and a client.
    pub fn new(store: SharedStore, blobs: BlobRegistry, client: C) -> Self {
        Self {
            store,
            blobs,
            client,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a batch is currently running.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The injected client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Process every currently pending record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchInFlight`] if another batch is running. Per-image
    /// failures are stored on their records and never abort the batch.
    pub async fn run(&self) -> Result<BatchSummary> {
        self.run_with_progress(|_| {}).await
    }

    /// Like [`run`](Self::run), reporting each step to `on_event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchInFlight`] if another batch is running.
    pub async fn run_with_progress(
        &self,
        mut on_event: impl FnMut(BatchEvent),
    ) -> Result<BatchSummary> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Batch requested while another is running");
            return Err(Error::BatchInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let pending = self.store.pending_ids();
        let mut summary = BatchSummary::default();
        if pending.is_empty() {
            debug!("No pending images, nothing to do");
            return Ok(summary);
        }
        info!("Processing batch of {} image(s)", pending.len());

        for id in pending {
            let record = match self.store.apply(id, RecordUpdate::StartProcessing) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping {id}: {e}");
                    summary.skipped += 1;
                    on_event(BatchEvent::Skipped { id });
                    continue;
                }
            };
            let name = record.original_name.clone();
            on_event(BatchEvent::Started {
                id,
                name: name.clone(),
            });

            let in_progress = ProcessingGuard {
                store: &self.store,
                id: Some(id),
            };
            let update = match self.process(&record).await {
                Ok(processed) => RecordUpdate::Complete(processed),
                Err(e) => RecordUpdate::Fail(failure_message(&e)),
            };
            in_progress.disarm();

            match self.store.apply(id, update) {
                Ok(updated) => match updated.status {
                    RecordStatus::Completed { .. } => {
                        summary.completed += 1;
                        on_event(BatchEvent::Completed { id, name });
                    }
                    RecordStatus::Error { message } => {
                        warn!("{name}: {message}");
                        summary.failed += 1;
                        on_event(BatchEvent::Failed { id, name, message });
                    }
                    RecordStatus::Pending | RecordStatus::Processing => {}
                },
                Err(e) => warn!("Result for {name} dropped: {e}"),
            }
        }

        if summary.failed > 0 {
            warn!(
                "Batch finished with {} failure(s) out of {}",
                summary.failed,
                summary.total()
            );
        } else {
            info!("Batch finished: {} image(s) processed", summary.completed);
        }
        Ok(summary)
    }

    async fn process(&self, record: &ImageRecord) -> Result<DataUrl> {
        let blob = self.blobs.resolve(record.original_url)?;
        let encoded = DataUrl::from_bytes(&blob.bytes, &blob.mime_type);
        self.client
            .remove_watermark(&encoded.to_string(), &blob.mime_type)
            .await
    }
}

fn failure_message(err: &Error) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        message
    }
}

//! Ordered, id-keyed collection of image records.
//!
//! All status changes go through [`RecordStore::apply`], which looks the record
//! up by id in the current state and replaces its whole status in one step.
//! The batch processor therefore never writes back a stale copy of a record,
//! even when the user removed or added records while a request was in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::blob::BlobHandle;
use crate::data_url::DataUrl;
use crate::error::{Error, Result};
use crate::record::{ImageRecord, RecordId, RecordStatus, StatusKind};

/// A record fresh from intake, together with the blob it owns.
#[derive(Debug)]
pub struct NewRecord {
    /// The pending record.
    pub record: ImageRecord,
    /// Handle keeping the record's source bytes alive.
    pub handle: BlobHandle,
}

/// A full replacement of a record's status.
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    /// `Pending → Processing`.
    StartProcessing,
    /// `Processing → Completed`.
    Complete(DataUrl),
    /// `Processing → Error`.
    Fail(String),
}

impl RecordUpdate {
    fn target(&self) -> StatusKind {
        match self {
            Self::StartProcessing => StatusKind::Processing,
            Self::Complete(_) => StatusKind::Completed,
            Self::Fail(_) => StatusKind::Error,
        }
    }

    fn into_status(self) -> RecordStatus {
        match self {
            Self::StartProcessing => RecordStatus::Processing,
            Self::Complete(processed) => RecordStatus::Completed { processed },
            Self::Fail(message) => RecordStatus::Error { message },
        }
    }
}

/// Records in insertion order, plus the blob handle each one owns.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<ImageRecord>,
    handles: HashMap<RecordId, BlobHandle>,
}

impl RecordStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records, keeping their order. Returns the new ids.
    pub fn append(&mut self, items: impl IntoIterator<Item = NewRecord>) -> Vec<RecordId> {
        let mut ids = Vec::new();
        for NewRecord { record, handle } in items {
            ids.push(record.id);
            self.handles.insert(record.id, handle);
            self.records.push(record);
        }
        debug!("Appended {} record(s), {} total", ids.len(), self.records.len());
        ids
    }

    /// Apply a status update to the record with this id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] for unknown ids and
    /// [`Error::InvalidTransition`] when the update does not follow
    /// `Pending → Processing → Completed | Error`.
    pub fn apply(&mut self, id: RecordId, update: RecordUpdate) -> Result<&ImageRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::RecordNotFound(id))?;

        let from = record.kind();
        let to = update.target();
        let allowed = matches!(
            (from, to),
            (StatusKind::Pending, StatusKind::Processing)
                | (
                    StatusKind::Processing,
                    StatusKind::Completed | StatusKind::Error
                )
        );
        if !allowed {
            return Err(Error::InvalidTransition { id, from, to });
        }

        record.status = update.into_status();
        Ok(record)
    }

    /// Remove a record and release its blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordBusy`] if the record is being processed and
    /// [`Error::RecordNotFound`] if it does not exist.
    pub fn remove(&mut self, id: RecordId) -> Result<ImageRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(Error::RecordNotFound(id))?;
        if self.records[index].kind() == StatusKind::Processing {
            return Err(Error::RecordBusy(id));
        }
        self.handles.remove(&id);
        Ok(self.records.remove(index))
    }

    /// Remove every record that is not being processed. Returns how many went.
    pub fn clear(&mut self) -> usize {
        let before = self.records.len();
        let handles = &mut self.handles;
        self.records.retain(|r| {
            let keep = r.kind() == StatusKind::Processing;
            if !keep {
                handles.remove(&r.id);
            }
            keep
        });
        before - self.records.len()
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&ImageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in the given state.
    #[must_use]
    pub fn count(&self, kind: StatusKind) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }

    /// Ids of pending records, in display order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<RecordId> {
        self.records
            .iter()
            .filter(|r| r.kind() == StatusKind::Pending)
            .map(|r| r.id)
            .collect()
    }

    /// Completed records, in display order.
    pub fn completed(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records
            .iter()
            .filter(|r| r.kind() == StatusKind::Completed)
    }
}

/// A [`RecordStore`] shared between the session and the batch processor.
///
/// Each method locks for the duration of one synchronous operation; the lock
/// is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<RecordStore>>,
}

impl SharedStore {
    /// An empty shared store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the store. `f` must not call back
    /// into this `SharedStore`.
    fn with<T>(&self, f: impl FnOnce(&mut RecordStore) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    /// See [`RecordStore::append`].
    pub fn append(&self, items: impl IntoIterator<Item = NewRecord>) -> Vec<RecordId> {
        self.with(|s| s.append(items))
    }

    /// See [`RecordStore::apply`]. Returns a copy of the updated record.
    ///
    /// # Errors
    ///
    /// Same as [`RecordStore::apply`].
    pub fn apply(&self, id: RecordId, update: RecordUpdate) -> Result<ImageRecord> {
        self.with(|s| s.apply(id, update).cloned())
    }

    /// See [`RecordStore::remove`].
    ///
    /// # Errors
    ///
    /// Same as [`RecordStore::remove`].
    pub fn remove(&self, id: RecordId) -> Result<ImageRecord> {
        self.with(|s| s.remove(id))
    }

    /// See [`RecordStore::clear`].
    pub fn clear(&self) -> usize {
        self.with(RecordStore::clear)
    }

    /// A copy of one record.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<ImageRecord> {
        self.with(|s| s.get(id).cloned())
    }

    /// A copy of every record, in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ImageRecord> {
        self.with(|s| s.iter().cloned().collect())
    }

    /// See [`RecordStore::pending_ids`].
    #[must_use]
    pub fn pending_ids(&self) -> Vec<RecordId> {
        self.with(|s| s.pending_ids())
    }

    /// See [`RecordStore::count`].
    #[must_use]
    pub fn count(&self, kind: StatusKind) -> usize {
        self.with(|s| s.count(kind))
    }
}

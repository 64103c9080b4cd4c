//! The image record and its lifecycle.

use std::fmt;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::blob::BlobUrl;
use crate::data_url::DataUrl;

/// Opaque, unique record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Plain status tag, without the data carried by [`RecordStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Waiting for the next batch.
    Pending,
    /// Sent to the service, response outstanding.
    Processing,
    /// Watermark removed.
    Completed,
    /// Processing failed.
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        })
    }
}

/// Lifecycle state of a record.
///
/// The processed image exists only in `Completed` and the message only in
/// `Error`, so neither can outlive or precede its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    /// Waiting for the next batch.
    Pending,
    /// Sent to the service, response outstanding.
    Processing,
    /// Watermark removed.
    Completed {
        /// The image returned by the service.
        processed: DataUrl,
    },
    /// Processing failed.
    Error {
        /// Human-readable failure message.
        message: String,
    },
}

impl RecordStatus {
    /// The status tag.
    #[must_use]
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Pending => StatusKind::Pending,
            Self::Processing => StatusKind::Processing,
            Self::Completed { .. } => StatusKind::Completed,
            Self::Error { .. } => StatusKind::Error,
        }
    }

    /// `Completed` and `Error` admit no further automatic transition.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// One user-submitted image and where it is in processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Stable identifier.
    pub id: RecordId,
    /// File name shown to the user.
    pub original_name: String,
    /// Session-local reference to the source bytes.
    pub original_url: BlobUrl,
    /// MIME type detected at intake.
    pub mime_type: String,
    /// Size of the source file in bytes.
    pub size_bytes: u64,
    /// Current lifecycle state.
    #[serde(flatten)]
    pub status: RecordStatus,
}

impl ImageRecord {
    /// A new record in the `Pending` state.
    #[must_use]
    pub fn pending(
        original_name: impl Into<String>,
        original_url: BlobUrl,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: RecordId::new(),
            original_name: original_name.into(),
            original_url,
            mime_type: mime_type.into(),
            size_bytes,
            status: RecordStatus::Pending,
        }
    }

    /// The status tag.
    #[must_use]
    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    /// The processed image, present only once completed.
    #[must_use]
    pub fn processed_url(&self) -> Option<&DataUrl> {
        match &self.status {
            RecordStatus::Completed { processed } => Some(processed),
            _ => None,
        }
    }

    /// The failure message, present only after an error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RecordStatus::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl Serialize for RecordStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Flat<'a> {
            status: StatusKind,
            #[serde(skip_serializing_if = "Option::is_none")]
            processed_url: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
        }

        let flat = Flat {
            status: self.kind(),
            processed_url: match self {
                Self::Completed { processed } => Some(processed.to_string()),
                _ => None,
            },
            error: match self {
                Self::Error { message } => Some(message),
                _ => None,
            },
        };
        flat.serialize(serializer)
    }
}

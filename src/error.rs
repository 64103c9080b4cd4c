//! Error types for the ai-watermark-eraser crate.

use crate::blob::BlobUrl;
use crate::record::{RecordId, StatusKind};

/// Errors that can occur while taking in, processing, or saving images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No API key was configured for the generation service.
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    /// The service answered, but no response part carried image data.
    #[error("model returned no image data")]
    NoImageReturned,

    /// The service rejected the request. Displays the service's own message.
    #[error("{message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Message reported by the service, or the raw response body.
        message: String,
    },

    /// The request could not be delivered or the response could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service returned a body that is not a valid response document.
    #[error("malformed service response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// A string could not be interpreted as a `data:` URL.
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),

    /// The base64 payload of an image could not be decoded.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// No record with this id exists in the store.
    #[error("no record with id {0}")]
    RecordNotFound(RecordId),

    /// The record is being processed and cannot be removed.
    #[error("record {0} is being processed")]
    RecordBusy(RecordId),

    /// The requested status change is not allowed by the record lifecycle.
    #[error("record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Record the update was addressed to.
        id: RecordId,
        /// Status the record was in.
        from: StatusKind,
        /// Status the update asked for.
        to: StatusKind,
    },

    /// A batch is already running.
    #[error("a batch is already in progress")]
    BatchInFlight,

    /// The blob behind a local URL has been released.
    #[error("{0} has been released")]
    BlobReleased(BlobUrl),

    /// The record has no processed result to save.
    #[error("record {0} has not completed processing")]
    NotCompleted(RecordId),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred while decoding or encoding an image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

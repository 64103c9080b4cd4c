//! Remove watermarks from a batch of images with a generative image model.
//!
//! Images are taken in as pending records, sent one at a time to the Gemini
//! `generateContent` API together with an inpainting instruction, and the
//! returned PNGs are saved under the original name with a `no-watermark-`
//! prefix.
//! Each record moves `pending → processing → completed | error`; a failed
//! image never stops the rest of the batch.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! use ai_watermark_eraser::{ClientConfig, GeminiClient, SaveMode, Session};
//!
//! # async fn run() -> ai_watermark_eraser::Result<()> {
//! let client = GeminiClient::new(ClientConfig::from_env())?;
//! let session = Session::new(client);
//! session.add_files(&[PathBuf::from("photo.jpg")])?;
//! let summary = session.start_batch().await?;
//! println!("{} completed, {} failed", summary.completed, summary.failed);
//! for saved in session.download_all(Path::new("out"), SaveMode::AsReturned) {
//!     println!("{}: {:?}", saved.name, saved.result);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing against a fake service
//!
//! The batch processor only needs a [`WatermarkRemover`], so any type
//! implementing it can stand in for [`GeminiClient`].

#![deny(missing_docs)]

pub mod batch;
pub mod blob;
pub mod client;
pub mod data_url;
pub mod download;
pub mod error;
pub mod intake;
pub mod record;
mod session;
pub mod store;

pub use batch::{BatchEvent, BatchProcessor, BatchSummary};
pub use client::{ClientConfig, GeminiClient, WatermarkRemover};
pub use data_url::DataUrl;
pub use download::{download_name, SaveMode, SaveOutcome};
pub use error::{Error, Result};
pub use record::{ImageRecord, RecordId, RecordStatus, StatusKind};
pub use session::Session;

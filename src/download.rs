//! Saving processed images to disk.
//!
//! The service always answers with a PNG, and by default those bytes are
//! written untouched under the original file name with a `no-watermark-`
//! prefix. [`SaveMode::MatchOriginal`] re-encodes into whatever format the
//! original extension names instead.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::{ImageRecord, RecordId};

/// Prefix put in front of every saved file name.
pub const DOWNLOAD_PREFIX: &str = "no-watermark-";

/// How processed bytes are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Write the returned PNG bytes as-is.
    #[default]
    AsReturned,
    /// Re-encode to the format implied by the original file extension.
    MatchOriginal,
}

/// Outcome of saving one record.
#[derive(Debug)]
pub struct SaveOutcome {
    /// Record that was saved.
    pub id: RecordId,
    /// Its original file name.
    pub name: String,
    /// Where it was written, or why it was not.
    pub result: Result<PathBuf>,
}

/// File name a processed image is saved under.
///
/// Example: `"photo.jpg"` becomes `"no-watermark-photo.jpg"`.
#[must_use]
pub fn download_name(original_name: &str) -> String {
    format!("{DOWNLOAD_PREFIX}{original_name}")
}

/// Pick a path in `dir` for `name` that neither exists nor is in `taken`.
///
/// Collisions get a ` (n)` suffix before the extension.
fn unique_path(dir: &Path, name: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() && taken.insert(candidate.clone()) {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path.file_stem().unwrap_or_default().to_string_lossy();
    let ext = as_path.extension().map(|e| e.to_string_lossy());
    (1..)
        .map(|n| {
            let file = match &ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            dir.join(file)
        })
        .find(|p| !p.exists() && taken.insert(p.clone()))
        .unwrap_or(candidate)
}

/// Re-encode image bytes into the format `path` names.
///
/// # Errors
///
/// Returns an error if the bytes cannot be decoded, the format is
/// unsupported, or writing fails.
pub fn reencode(bytes: &[u8], path: &Path) -> Result<Vec<u8>> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    let decoded = image::load_from_memory(bytes)?;

    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 100);
            decoded.to_rgb8().write_with_encoder(encoder)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            let rgba = DynamicImage::ImageRgba8(decoded.to_rgba8());
            rgba.write_to(&mut out, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }
    Ok(out.into_inner())
}

fn save_into(
    record: &ImageRecord,
    dir: &Path,
    mode: SaveMode,
    taken: &mut HashSet<PathBuf>,
) -> Result<PathBuf> {
    let processed = record.processed_url().ok_or(Error::NotCompleted(record.id))?;
    let bytes = processed.decode()?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let path = unique_path(dir, &download_name(&record.original_name), taken);

    let bytes = match mode {
        SaveMode::AsReturned => bytes,
        SaveMode::MatchOriginal => match reencode(&bytes, &path) {
            Ok(converted) => converted,
            Err(Error::UnsupportedFormat(f)) => {
                warn!("Keeping PNG bytes for {}: unsupported format {f}", record.original_name);
                bytes
            }
            Err(e) => return Err(e),
        },
    };

    std::fs::write(&path, bytes)?;
    debug!("Saved {} to {}", record.original_name, path.display());
    Ok(path)
}

/// Save one completed record into `dir`.
///
/// # Errors
///
/// Returns [`Error::NotCompleted`] if the record has no result, or an I/O,
/// decoding or encoding error.
pub fn save_processed(record: &ImageRecord, dir: &Path, mode: SaveMode) -> Result<PathBuf> {
    save_into(record, dir, mode, &mut HashSet::new())
}

/// Save every completed record among `records` into `dir`.
///
/// Records in any other state are ignored; with none completed this does
/// nothing. Failures are reported per record and do not stop the rest.
pub fn save_all_completed<'a>(
    records: impl IntoIterator<Item = &'a ImageRecord>,
    dir: &Path,
    mode: SaveMode,
) -> Vec<SaveOutcome> {
    let mut taken = HashSet::new();
    records
        .into_iter()
        .filter(|r| r.processed_url().is_some())
        .map(|record| SaveOutcome {
            id: record.id,
            name: record.original_name.clone(),
            result: save_into(record, dir, mode, &mut taken),
        })
        .collect()
}

//! Turning user-selected files into pending records.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::{debug, warn};

use crate::blob::BlobRegistry;
use crate::error::Result;
use crate::record::ImageRecord;
use crate::store::NewRecord;

/// Number of images the user is told they may submit at once. Not enforced.
pub const ADVERTISED_LIMIT: usize = 20;

/// MIME type used when neither content nor extension identifies the file.
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif"
        ),
        None => false,
    }
}

/// Expand inputs into a flat list of files.
///
/// Files are kept as given. Directories contribute the supported images
/// directly inside them, sorted by file name.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be read.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_ok_and(|ft| ft.is_file()))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect();
            entries.sort();
            debug!("{}: {} image(s)", input.display(), entries.len());
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

/// Work out a MIME type from the file's leading bytes, then its extension.
#[must_use]
pub fn detect_mime(path: &Path, bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(path).ok())
        .map_or_else(|| FALLBACK_MIME.to_string(), |f| f.to_mime_type().to_string())
}

/// Read one file and register its bytes, producing a pending record.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn intake_file(path: &Path, blobs: &BlobRegistry) -> Result<NewRecord> {
    let bytes = std::fs::read(path)?;
    let mime_type = detect_mime(path, &bytes);
    let name = path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );
    let size = bytes.len() as u64;
    let handle = blobs.register(bytes, &mime_type);
    debug!("Took in {name} ({mime_type}, {size} bytes) as {}", handle.url());
    Ok(NewRecord {
        record: ImageRecord::pending(name, handle.url(), mime_type, size),
        handle,
    })
}

/// Take in every input, preserving order.
///
/// Uses parallel reads when the `cli` feature is enabled (via rayon). If any
/// file fails to read, nothing is taken in and the first error is returned.
///
/// # Errors
///
/// Returns an I/O error if a directory or file cannot be read.
pub fn intake_paths(inputs: &[PathBuf], blobs: &BlobRegistry) -> Result<Vec<NewRecord>> {
    let files = expand_inputs(inputs)?;
    if files.len() > ADVERTISED_LIMIT {
        warn!(
            "{} images selected, more than the advertised {ADVERTISED_LIMIT}; taking all of them",
            files.len()
        );
    }

    #[cfg(feature = "cli")]
    {
        use rayon::prelude::*;
        files
            .par_iter()
            .map(|path| intake_file(path, blobs))
            .collect()
    }

    #[cfg(not(feature = "cli"))]
    {
        files.iter().map(|path| intake_file(path, blobs)).collect()
    }
}

//! Run a batch end to end without calling the service.
//!
//! The stand-in remover hands each image back re-encoded as PNG, so the
//! intake, batch and download steps can be tried offline.
//!
//! Usage:
//! ```sh
//! cargo run --example offline_batch -- photo.jpg photos/ out/
//! ```

use std::env;
use std::io::Cursor;
use std::path::PathBuf;
use std::process;

use ai_watermark_eraser::data_url::{strip_transport_prefix, OUTPUT_MIME};
use ai_watermark_eraser::{
    BatchEvent, DataUrl, ImageRecord, RecordStatus, Result, SaveMode, Session, WatermarkRemover,
};
use image::ImageFormat;

/// Returns the submitted image unchanged apart from its container.
struct PassthroughRemover;

impl WatermarkRemover for PassthroughRemover {
    async fn remove_watermark(&self, image_data: &str, mime_type: &str) -> Result<DataUrl> {
        let payload = strip_transport_prefix(image_data);
        let bytes = DataUrl::from_base64(payload, mime_type).decode()?;
        let decoded = image::load_from_memory(&bytes)?;
        let mut png = Cursor::new(Vec::new());
        decoded.write_to(&mut png, ImageFormat::Png)?;
        Ok(DataUrl::from_bytes(png.get_ref(), OUTPUT_MIME))
    }
}

fn describe(record: &ImageRecord) -> String {
    match &record.status {
        RecordStatus::Error { message } => format!("{}: {message}", record.original_name),
        status => format!("{}: {}", record.original_name, status.kind()),
    }
}

#[tokio::main]
async fn main() {
    let mut args: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    if args.len() < 2 {
        eprintln!("Usage: offline_batch <input>... <output dir>");
        process::exit(1);
    }
    let out = args.pop().unwrap_or_default();

    let session = Session::new(PassthroughRemover);
    if let Err(e) = session.add_files(&args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let summary = session
        .start_batch_with_progress(|event| {
            if let BatchEvent::Started { name, .. } = event {
                println!("Processing {name}");
            }
        })
        .await;
    if let Err(e) = summary {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    for record in session.records() {
        println!("{}", describe(&record));
    }
    for saved in session.download_all(&out, SaveMode::AsReturned) {
        match saved.result {
            Ok(path) => println!("Saved {}", path.display()),
            Err(e) => eprintln!("{}: {e}", saved.name),
        }
    }
}

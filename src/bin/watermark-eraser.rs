use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ai_watermark_eraser::client::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use ai_watermark_eraser::intake::ADVERTISED_LIMIT;
use ai_watermark_eraser::{
    BatchEvent, ClientConfig, GeminiClient, RecordId, SaveMode, Session, StatusKind,
};

#[derive(Parser)]
#[command(
    name = "watermark-eraser",
    about = "Remove watermarks from images using Gemini image generation",
    version,
    after_help = "Simple usage: watermark-eraser <images or dirs> -o <output_dir>\n\n\
                  Images are sent one at a time. Results are saved as no-watermark-<name>.\n\
                  The API key is read from --api-key, GEMINI_API_KEY, API_KEY or a .env file."
)]
struct Cli {
    /// Input image files or directories
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory to save processed images into
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// API root URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Replace the built-in removal instruction
    #[arg(long)]
    instruction: Option<String>,

    /// Give up on a request after this many seconds (default: wait indefinitely)
    #[arg(long)]
    timeout: Option<u64>,

    /// Re-encode results to the original file's format instead of keeping the returned PNG
    #[arg(long)]
    match_format: bool,

    /// Print a JSON report of every image to stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportEntry {
    id: RecordId,
    original_name: String,
    status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn client_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone());
    }
    config.model.clone_from(&cli.model);
    config.base_url.clone_from(&cli.base_url);
    if let Some(instruction) = &cli.instruction {
        config.instruction.clone_from(instruction);
    }
    config.timeout = cli.timeout.map(Duration::from_secs);
    config
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli);

    for input in &cli.inputs {
        if !input.exists() {
            eprintln!("Error: Input path does not exist: {}", input.display());
            process::exit(1);
        }
    }

    let client = match GeminiClient::new(client_config(&cli)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Fatal: Failed to initialize client: {e}");
            process::exit(1);
        }
    };
    if client.config().api_key.is_none() && !cli.quiet {
        eprintln!("WARNING: No API key set - every image will fail until one is provided");
    }

    let session = Session::new(client);
    if let Err(e) = session.add_files(&cli.inputs) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let total = session.pending_count();
    if total == 0 {
        eprintln!("Error: No images found in the given inputs");
        process::exit(1);
    }
    if !cli.quiet {
        if total > ADVERTISED_LIMIT {
            eprintln!("NOTE: {total} images selected (more than {ADVERTISED_LIMIT}); processing all");
        }
        eprintln!("Removing watermarks from {total} image(s) with {}", cli.model);
        eprintln!();
    }

    let summary = match session
        .start_batch_with_progress(|event| print_event(&event, &cli))
        .await
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    let mode = if cli.match_format {
        SaveMode::MatchOriginal
    } else {
        SaveMode::AsReturned
    };
    let mut saved = HashMap::new();
    let mut save_failures = 0u32;
    for outcome in session.download_all(&cli.output, mode) {
        match outcome.result {
            Ok(path) => {
                if cli.verbose {
                    eprintln!("  -> {}", path.display());
                }
                saved.insert(outcome.id, path);
            }
            Err(e) => {
                eprintln!("[FAIL] {}: could not save: {e}", outcome.name);
                save_failures += 1;
            }
        }
    }

    if cli.json {
        let report: Vec<ReportEntry> = session
            .records()
            .into_iter()
            .map(|r| ReportEntry {
                id: r.id,
                status: r.kind(),
                error: r.error().map(str::to_string),
                saved_to: saved.remove(&r.id),
                original_name: r.original_name,
            })
            .collect();
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: Failed to write report: {e}"),
        }
    }

    if total > 1 && !cli.quiet {
        eprintln!();
        eprint!("[Summary] Processed: {}", summary.completed);
        if summary.failed > 0 {
            eprint!(", Failed: {}", summary.failed);
        }
        if save_failures > 0 {
            eprint!(", Not saved: {save_failures}");
        }
        eprintln!(" (Total: {total})");
    }

    if summary.failed > 0 || save_failures > 0 {
        process::exit(1);
    }
}

fn print_event(event: &BatchEvent, cli: &Cli) {
    match event {
        BatchEvent::Started { name, .. } => {
            if cli.verbose {
                eprintln!("[..] {name}");
            }
        }
        BatchEvent::Completed { name, .. } => {
            if !cli.quiet {
                eprintln!("[OK] {name}");
            }
        }
        BatchEvent::Failed { name, message, .. } => {
            eprintln!("[FAIL] {name}: {message}");
        }
        BatchEvent::Skipped { id } => {
            if cli.verbose {
                eprintln!("[SKIP] {id}: removed before its turn");
            }
        }
    }
}

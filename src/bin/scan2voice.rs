//! CLI binary for scan2voice.
//!
//! A thin shim over the library crate: maps CLI flags to `IngestConfig`, runs
//! one batch against the CLOVA services, and writes the assets to a local
//! directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan2voice::config::DEFAULT_COLLECTIONS;
use scan2voice::pipeline::extract::{ClovaOcr, TextExtractor, OCR_SERVICE};
use scan2voice::pipeline::narrate::ClovaVoice;
use scan2voice::storage::{FsObjectStore, MemoryDatabase, ObjectStore};
use scan2voice::{
    parse_page_quads, BatchStage, ClovaOcrConfig, ClovaVoiceConfig, IngestConfig, IngestError,
    IngestProgressCallback, IngestReceipt, Ingestor, PageInput, ProgressCallback, UploadBatch,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────

/// Renders a page progress bar and per-page log lines. Pages may complete
/// out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Validating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, _batch_id: &str, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
    }

    fn on_stage(&self, _batch_id: &str, stage: BatchStage) {
        self.bar.set_prefix(stage.to_string());
    }

    fn on_page_complete(&self, page_num: usize, total: usize, fragments: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{fragments:>4} fragments")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize) {
        self.bar.set_message(format!("narration chunk {chunk_num}/{total}"));
    }

    fn on_batch_complete(&self, _primary_file_id: &str) {
        self.bar.finish_and_clear();
    }

    fn on_rolled_back(&self, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} rolled back: {}", red("✘"), error);
    }
}

/// Stand-in extractor for text-only runs, where no page is ever read.
struct NoOcr;

#[async_trait]
impl TextExtractor for NoOcr {
    async fn extract(&self, _: &[u8], _: &str, _: &str) -> Result<Vec<String>, IngestError> {
        Err(IngestError::external(OCR_SERVICE, None, "OCR is not configured"))
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Two photographed pages, used as-is
  scan2voice -c 소설 -t "Chapter 1" page1.jpg page2.jpg

  # Crop each page to the marked corners
  scan2voice -c 소설 -t "Chapter 1" --quads corners.json page1.jpg page2.jpg

  # Narrate a plain text file instead of photos
  scan2voice -c 서류 -t "Notes" --text notes.txt

CORNER FILE:
  A JSON list with one entry per page, either null or four points in
  top-left, top-right, bottom-right, bottom-left order:
    [[{"x":12,"y":30},{"x":980,"y":18},{"x":1002,"y":1400},{"x":8,"y":1390}], null]

ENVIRONMENT VARIABLES:
  NAVER_CLOVA_OCR_API_URL   OCR endpoint
  NAVER_CLOVA_OCR_SECRET    OCR secret
  NCP_CLIENT_ID             Speech API client id
  NCP_CLIENT_SECRET         Speech API client secret
  NCP_TTS_API_URL           Speech endpoint override
  SCAN2VOICE_COLLECTIONS    Allowed collections, comma-separated
"#;

/// Turn photographed pages into narrated audio plus a PDF.
#[derive(Parser, Debug)]
#[command(
    name = "scan2voice",
    version,
    about = "Turn photographed pages into narrated audio plus a PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page images, in reading order.
    #[arg(required_unless_present = "text", conflicts_with = "text")]
    images: Vec<PathBuf>,

    /// Narrate this UTF-8 text file instead of reading images.
    #[arg(long)]
    text: Option<PathBuf>,

    /// Destination collection.
    #[arg(short, long, env = "SCAN2VOICE_COLLECTION")]
    collection: String,

    /// Title stored with both assets.
    #[arg(short, long)]
    title: String,

    /// Collections batches may be filed into (comma-separated). Defaults to
    /// the built-in set.
    #[arg(long = "allow-collection", env = "SCAN2VOICE_COLLECTIONS", value_delimiter = ',')]
    allow_collections: Vec<String>,

    /// Owner the collection belongs to.
    #[arg(long, env = "SCAN2VOICE_OWNER", default_value = "local")]
    owner: String,

    /// JSON file with per-page corner points.
    #[arg(long)]
    quads: Option<PathBuf>,

    /// Directory the audio and PDF are written to.
    #[arg(short, long, env = "SCAN2VOICE_OUTPUT_DIR", default_value = "scan2voice-out")]
    output_dir: PathBuf,

    #[arg(long, env = "NAVER_CLOVA_OCR_API_URL", hide_env_values = true)]
    ocr_url: Option<String>,

    #[arg(long, env = "NAVER_CLOVA_OCR_SECRET", hide_env_values = true)]
    ocr_secret: Option<String>,

    #[arg(long, env = "NCP_CLIENT_ID", hide_env_values = true)]
    tts_client_id: String,

    #[arg(long, env = "NCP_CLIENT_SECRET", hide_env_values = true)]
    tts_client_secret: String,

    #[arg(long, env = "NCP_TTS_API_URL")]
    tts_url: Option<String>,

    /// TTS voice.
    #[arg(long, default_value = "nara")]
    speaker: String,

    /// Max characters per synthesis call.
    #[arg(long, env = "SCAN2VOICE_MAX_CHUNK", default_value_t = scan2voice::config::DEFAULT_MAX_CHUNK_CHARS)]
    max_chunk: usize,

    /// Concurrent OCR and TTS calls.
    #[arg(long, env = "SCAN2VOICE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-call timeout for OCR and TTS, in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,

    /// Print the receipt as JSON.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

fn allowed_collections(cli: &Cli) -> Vec<String> {
    if cli.allow_collections.is_empty() {
        DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        cli.allow_collections.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = !cli.json && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut builder = IngestConfig::builder()
        .allowed_collections(allowed_collections(&cli))
        .max_chunk_chars(cli.max_chunk)
        .page_concurrency(cli.concurrency)
        .synthesis_concurrency(cli.concurrency);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let mut voice = ClovaVoiceConfig::new(&cli.tts_client_id, &cli.tts_client_secret);
    if let Some(ref url) = cli.tts_url {
        voice.endpoint = url.clone();
    }
    voice.speaker = cli.speaker.clone();
    voice.timeout_secs = cli.api_timeout;
    let synthesizer = Arc::new(ClovaVoice::new(voice)?);

    let extractor: Arc<dyn TextExtractor> = match (&cli.ocr_url, &cli.ocr_secret) {
        (Some(endpoint), Some(secret)) => Arc::new(ClovaOcr::new(ClovaOcrConfig {
            endpoint: endpoint.clone(),
            secret: secret.clone(),
            timeout_secs: cli.api_timeout,
        })?),
        _ if cli.text.is_some() => Arc::new(NoOcr),
        _ => bail!("--ocr-url and --ocr-secret (or NAVER_CLOVA_OCR_*) are required for images"),
    };

    // Local runs file into a throwaway database holding just this collection.
    let db = Arc::new(MemoryDatabase::new());
    db.create_collection(&cli.owner, &cli.collection);
    let store = Arc::new(FsObjectStore::new(&cli.output_dir));

    let ingestor = Ingestor::new(config, extractor, synthesizer, store.clone(), db.clone());

    let receipt = match cli.text {
        Some(ref path) => {
            let body = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ingestor
                .ingest_text(&cli.owner, &cli.collection, &cli.title, body)
                .await
        }
        None => {
            let batch = load_batch(&cli).await?;
            ingestor.ingest(batch).await
        }
    }
    .context("Ingestion failed")?;

    print_receipt(&receipt, store.as_ref(), cli.json).await
}

async fn load_batch(cli: &Cli) -> Result<UploadBatch> {
    let quads = match cli.quads {
        Some(ref path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_page_quads(&json)?
        }
        None => Vec::new(),
    };

    let mut pages = Vec::with_capacity(cli.images.len());
    for (idx, path) in cli.images.iter().enumerate() {
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page{}", idx + 1));
        let mut page = PageInput::new(filename, image);
        if let Some(Some(corners)) = quads.get(idx) {
            page = page.with_corners(corners.clone());
        }
        pages.push(page);
    }

    Ok(UploadBatch {
        owner: cli.owner.clone(),
        collection: cli.collection.clone(),
        title: cli.title.clone(),
        pages,
    })
}

async fn print_receipt(receipt: &IngestReceipt, store: &dyn ObjectStore, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(receipt).context("Failed to serialise receipt")?
        );
        return Ok(());
    }

    let audio_url = store.get_url(&receipt.audio_key).await?;
    let document_url = store.get_url(&receipt.document_key).await?;
    eprintln!(
        "{} {} page(s), {} chars in {} chunk(s)",
        green("✔"),
        receipt.pages,
        receipt.narration_chars,
        receipt.chunks
    );
    println!("{}  {}", bold("audio"), audio_url);
    println!("{}  {}", bold("pdf  "), document_url);
    println!("{}", dim(&format!("record {}", receipt.primary_file_id)));
    Ok(())
}

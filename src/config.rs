//! Configuration types for page ingestion.
//!
//! Pipeline behaviour is controlled through [`IngestConfig`], built via its
//! [`IngestConfigBuilder`]. The external collaborators carry their own
//! configs ([`ClovaOcrConfig`], [`ClovaVoiceConfig`]) because they are
//! optional: tests and embedders can plug in any
//! [`crate::pipeline::extract::TextExtractor`] or
//! [`crate::pipeline::narrate::SpeechSynthesizer`] instead.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Destination collections an upload may target unless configured otherwise.
pub const DEFAULT_COLLECTIONS: [&str; 6] = ["영감", "소설", "굿즈", "필름 사진", "서류", "티켓"];

/// Per-call character limit of the speech synthesis service.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1900;

/// Largest page image forwarded to the text extractor (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for the ingestion pipeline.
///
/// # Example
/// ```rust
/// use scan2voice::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .allowed_collections(["books", "receipts"])
///     .max_chunk_chars(1000)
///     .page_concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_chars, 1000);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Collection names an upload may target. Anything else fails validation
    /// before the ledger is touched.
    pub allowed_collections: Vec<String>,

    /// Maximum characters per speech synthesis call. Default: 1900.
    ///
    /// Counted in `char`s, not bytes: the synthesis service limits characters
    /// and most narrated text is Hangul, three bytes per character in UTF-8.
    pub max_chunk_chars: usize,

    /// Smallest accepted page image in bytes. Default: 1.
    pub min_image_bytes: usize,

    /// Largest accepted page image in bytes. Default: 10 MiB.
    pub max_image_bytes: usize,

    /// Pages rectified and sent to the text extractor at once. Default: 4.
    pub page_concurrency: usize,

    /// Chunks sent to the speech service at once. Default: 4.
    pub synthesis_concurrency: usize,

    /// Directory under which each batch creates its private scratch
    /// directory. Default: the OS temp dir.
    pub scratch_root: PathBuf,

    /// Optional progress callback for stage/page/chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            allowed_collections: DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect(),
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            min_image_bytes: 1,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            page_concurrency: 4,
            synthesis_concurrency: 4,
            scratch_root: std::env::temp_dir(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("allowed_collections", &self.allowed_collections)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("min_image_bytes", &self.min_image_bytes)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("page_concurrency", &self.page_concurrency)
            .field("synthesis_concurrency", &self.synthesis_concurrency)
            .field("scratch_root", &self.scratch_root)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn is_allowed_collection(&self, name: &str) -> bool {
        self.allowed_collections.iter().any(|c| c == name)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn allowed_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_collections = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n;
        self
    }

    pub fn image_size_bounds(mut self, min: usize, max: usize) -> Self {
        self.config.min_image_bytes = min;
        self.config.max_image_bytes = max;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn synthesis_concurrency(mut self, n: usize) -> Self {
        self.config.synthesis_concurrency = n.max(1);
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.allowed_collections.is_empty() {
            return Err(IngestError::Validation(
                "at least one destination collection must be allowed".into(),
            ));
        }
        if c.max_chunk_chars < 2 {
            return Err(IngestError::Validation(format!(
                "max_chunk_chars must be ≥ 2, got {}",
                c.max_chunk_chars
            )));
        }
        if c.min_image_bytes > c.max_image_bytes {
            return Err(IngestError::Validation(format!(
                "image size bounds are inverted: min {} > max {}",
                c.min_image_bytes, c.max_image_bytes
            )));
        }
        Ok(self.config)
    }
}

// ── Collaborator configs ─────────────────────────────────────────────────

/// Default endpoint of the premium speech synthesis API.
pub const DEFAULT_TTS_API_URL: &str = "https://naveropenapi.apigw.ntruss.com/tts-premium/v1/tts";

/// Connection settings for the CLOVA OCR text extractor.
#[derive(Clone)]
pub struct ClovaOcrConfig {
    pub endpoint: String,
    pub secret: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for ClovaOcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClovaOcrConfig")
            .field("endpoint", &self.endpoint)
            .field("secret", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClovaOcrConfig {
    /// Read `NAVER_CLOVA_OCR_API_URL` and `NAVER_CLOVA_OCR_SECRET`.
    pub fn from_env() -> Result<Self, IngestError> {
        Ok(Self {
            endpoint: required_env("NAVER_CLOVA_OCR_API_URL")?,
            secret: required_env("NAVER_CLOVA_OCR_SECRET")?,
            timeout_secs: 60,
        })
    }
}

/// Connection and voice settings for the CLOVA Voice synthesizer.
#[derive(Clone)]
pub struct ClovaVoiceConfig {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    /// Voice name. Default: "nara".
    pub speaker: String,
    /// Output container; chunks are spliced at frame level, so this must be
    /// a splice-safe format. Default: "mp3".
    pub format: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for ClovaVoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClovaVoiceConfig")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("speaker", &self.speaker)
            .field("format", &self.format)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClovaVoiceConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_TTS_API_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            speaker: "nara".to_string(),
            format: "mp3".to_string(),
            timeout_secs: 60,
        }
    }

    /// Read `NCP_CLIENT_ID`, `NCP_CLIENT_SECRET` and, optionally,
    /// `NCP_TTS_API_URL`.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut config = Self::new(
            required_env("NCP_CLIENT_ID")?,
            required_env("NCP_CLIENT_SECRET")?,
        );
        if let Ok(url) = std::env::var("NCP_TTS_API_URL") {
            if !url.is_empty() {
                config.endpoint = url;
            }
        }
        Ok(config)
    }
}

fn required_env(name: &str) -> Result<String, IngestError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(IngestError::Validation(format!(
            "environment variable {name} is not set"
        ))),
    }
}

//! Narration: split text into API-sized chunks, synthesize each, splice the
//! audio back together.
//!
//! ## Chunking
//!
//! The speech service caps every call at `max_chars` characters. While the
//! remaining text is longer than that, the splitter looks backwards from the
//! limit towards half the limit for a sentence terminator (`.`, `!`, `?`) and
//! cuts right after it; without one it hard-cuts at the limit. The splitter
//! only picks cut points, so the chunks always concatenate back to the input.
//!
//! ## Reassembly
//!
//! Chunks are synthesized concurrently and may finish in any order. Each
//! result carries its chunk index and segments are joined by index, never by
//! arrival. The service emits a splice-safe bitstream (MP3 frames), so
//! segments are concatenated byte-for-byte without re-encoding.

use crate::config::ClovaVoiceConfig;
use crate::error::IngestError;
use crate::pipeline::extract::transport_error;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Service name used in [`IngestError::ExternalService`].
pub const SPEECH_SERVICE: &str = "speech";

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Empty input yields no chunks. `max_chars` is clamped to at least 2.
pub fn split_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(2);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // boundaries[n] is the byte offset where char n starts. One extra
        // entry past max_chars tells "exactly max" apart from "longer".
        let boundaries: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(rest.len()))
            .take(max_chars + 2)
            .collect();

        if boundaries.len() <= max_chars + 1 {
            chunks.push(rest);
            break;
        }

        // A terminator at char n cuts at boundaries[n + 1].
        // Window: chars max/2 ..= max-1, so no chunk exceeds max_chars.
        let cut_chars = (max_chars / 2..max_chars)
            .rev()
            .find(|&n| {
                rest[boundaries[n]..]
                    .chars()
                    .next()
                    .is_some_and(|c| TERMINATORS.contains(&c))
            })
            .map(|n| n + 1)
            .unwrap_or(max_chars);

        let (chunk, tail) = rest.split_at(boundaries[cut_chars]);
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

/// Turns one chunk of text into encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `chunk`, which is never longer than the configured limit.
    ///
    /// Failures must surface as [`IngestError::ExternalService`].
    async fn synthesize(&self, chunk: &str) -> Result<Vec<u8>, IngestError>;
}

/// Output of [`Narrator::narrate`].
#[derive(Debug, Clone)]
pub struct Narration {
    pub audio: Vec<u8>,
    pub chunks: usize,
}

/// Drives a [`SpeechSynthesizer`] over arbitrarily long text.
#[derive(Clone)]
pub struct Narrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    max_chars: usize,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl Narrator {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, max_chars: usize, concurrency: usize) -> Self {
        Self {
            synthesizer,
            max_chars,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Synthesize `text` into one continuous audio payload.
    ///
    /// The first failing chunk aborts the whole narration; segments already
    /// synthesized are dropped with the stream.
    pub async fn narrate(&self, text: &str) -> Result<Narration, IngestError> {
        let chunks = split_text(text, self.max_chars);
        if chunks.is_empty() {
            return Err(IngestError::Validation("no text to narrate".into()));
        }
        let total = chunks.len();
        debug!("Narrating {} chars in {} chunk(s)", text.chars().count(), total);

        let mut segments: Vec<(usize, Vec<u8>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(idx, chunk)| {
                let synthesizer = Arc::clone(&self.synthesizer);
                let progress = self.progress.clone();
                async move {
                    let audio = synthesizer.synthesize(chunk).await?;
                    debug!("Chunk {}/{}: {} bytes of audio", idx + 1, total, audio.len());
                    if let Some(ref cb) = progress {
                        cb.on_chunk_complete(idx + 1, total);
                    }
                    Ok::<_, IngestError>((idx, audio))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        segments.sort_by_key(|(idx, _)| *idx);
        let audio = segments
            .into_iter()
            .flat_map(|(_, bytes)| bytes)
            .collect();

        Ok(Narration {
            audio,
            chunks: total,
        })
    }
}

// ── CLOVA Voice ──────────────────────────────────────────────────────────

/// HTTP client for the CLOVA Voice (premium TTS) endpoint.
#[derive(Debug, Clone)]
pub struct ClovaVoice {
    client: reqwest::Client,
    config: ClovaVoiceConfig,
}

impl ClovaVoice {
    pub fn new(config: ClovaVoiceConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to build TTS client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SpeechSynthesizer for ClovaVoice {
    async fn synthesize(&self, chunk: &str) -> Result<Vec<u8>, IngestError> {
        let form = [
            ("speaker", self.config.speaker.as_str()),
            ("volume", "0"),
            ("speed", "0"),
            ("pitch", "0"),
            ("text", chunk),
            ("format", self.config.format.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-NCP-APIGW-API-KEY-ID", &self.config.client_id)
            .header("X-NCP-APIGW-API-KEY", &self.config.client_secret)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(SPEECH_SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IngestError::external(
                SPEECH_SERVICE,
                Some(status.as_u16()),
                message,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(SPEECH_SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

//! Batch orchestration: the ingestion state machine.
//!
//! ```text
//! Validating ─▶ Reserving ─▶ Processing ─▶ Committing ─▶ Done
//!                   │             │             │
//!                   └─────────────┴─────────────┴──▶ RolledBack
//! ```
//!
//! Validation failures end the batch in `Validating` with no side effects.
//! Once the ledger reservation succeeds, the batch always ends in `Done` or
//! `RolledBack`; every failure after that point goes through
//! [`Ingestor::roll_back`], which gives the reservation back and removes any
//! uploaded object no committed record points at.
//!
//! Assets are uploaded only in `Committing`, after the narration and PDF are
//! complete, so no half-built artifact ever reaches the object store.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{
    AudioAsset, BatchStage, DocumentAsset, FileLink, IngestReceipt, NewFileRecord, PageInput,
    Quad, RectifiedPage, UploadBatch,
};
use crate::pipeline::compile::{compile_images_in_background, compile_text_in_background};
use crate::pipeline::extract::{check_image_size, extract_page, TextExtractor};
use crate::pipeline::narrate::{Narration, Narrator, SpeechSynthesizer};
use crate::pipeline::rectify::rectify_in_background;
use crate::pipeline::scratch::BatchScratch;
use crate::storage::{DocumentDatabase, Ledger, ObjectStore, Reservation};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
const DOCUMENT_CONTENT_TYPE: &str = "application/pdf";

static RE_UNSAFE_KEY_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.\-]+").unwrap());

/// Drives batches through the pipeline and the ledger.
///
/// One `Ingestor` serves any number of concurrent batches; batches share
/// nothing except the collection counters in the database.
pub struct Ingestor {
    config: IngestConfig,
    extractor: Arc<dyn TextExtractor>,
    narrator: Narrator,
    store: Arc<dyn ObjectStore>,
    ledger: Ledger,
}

/// What a batch reads its narration from.
enum Source {
    Pages(Vec<(PageInput, Option<Quad>)>),
    Text(String),
}

impl Source {
    fn page_count(&self) -> usize {
        match self {
            Source::Pages(pages) => pages.len(),
            Source::Text(_) => 0,
        }
    }
}

/// Per-batch bookkeeping, alive for one call.
struct BatchContext {
    batch_id: String,
    owner: String,
    collection: String,
    title: String,
    /// Object keys written so far.
    uploaded: Vec<String>,
    /// Uploaded keys referenced by a committed record; never deleted.
    retained: Vec<String>,
}

impl BatchContext {
    fn new(owner: String, collection: String, title: String) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            owner,
            collection,
            title,
            uploaded: Vec::new(),
            retained: Vec::new(),
        }
    }

    fn audio_key(&self) -> String {
        format!("tts/{}/{}.mp3", self.batch_id, key_safe_title(&self.title))
    }

    fn document_key(&self) -> String {
        format!("pdfs/{}/{}.pdf", key_safe_title(&self.owner), self.batch_id)
    }
}

impl Ingestor {
    pub fn new(
        config: IngestConfig,
        extractor: Arc<dyn TextExtractor>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn ObjectStore>,
        db: Arc<dyn DocumentDatabase>,
    ) -> Self {
        let narrator = Narrator::new(
            synthesizer,
            config.max_chunk_chars,
            config.synthesis_concurrency,
        )
        .with_progress(config.progress_callback.clone());
        Self {
            config,
            extractor,
            narrator,
            store,
            ledger: Ledger::new(db),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest photographed pages: rectify, read, narrate, compile, store.
    ///
    /// Returns the receipt of the committed audio/PDF pair. On error the
    /// collection counter is back at its pre-call value.
    pub async fn ingest(&self, batch: UploadBatch) -> Result<IngestReceipt, IngestError> {
        let UploadBatch {
            owner,
            collection,
            title,
            pages,
        } = batch;
        let ctx = BatchContext::new(owner, collection, title);
        self.enter(&ctx, BatchStage::Validating);

        let pages = self.validate_pages(&ctx, pages).inspect_err(|e| {
            debug!(batch_id = %ctx.batch_id, error = %e, "Batch rejected during validation");
        })?;
        self.run(ctx, Source::Pages(pages)).await
    }

    /// Ingest plain text: narrate `body` and compile it into a text PDF.
    pub async fn ingest_text(
        &self,
        owner: impl Into<String>,
        collection: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<IngestReceipt, IngestError> {
        let ctx = BatchContext::new(owner.into(), collection.into(), title.into());
        self.enter(&ctx, BatchStage::Validating);

        let body = body.into();
        self.check_collection(&ctx.collection)?;
        if body.trim().is_empty() {
            return Err(IngestError::Validation("no text to ingest".into()));
        }
        self.run(ctx, Source::Text(body)).await
    }

    // ── Validating ───────────────────────────────────────────────────────

    fn check_collection(&self, collection: &str) -> Result<(), IngestError> {
        if !self.config.is_allowed_collection(collection) {
            return Err(IngestError::Validation(format!(
                "unknown collection '{collection}'"
            )));
        }
        Ok(())
    }

    fn validate_pages(
        &self,
        ctx: &BatchContext,
        pages: Vec<PageInput>,
    ) -> Result<Vec<(PageInput, Option<Quad>)>, IngestError> {
        self.check_collection(&ctx.collection)?;
        if pages.is_empty() {
            return Err(IngestError::Validation("batch has no pages".into()));
        }

        pages
            .into_iter()
            .enumerate()
            .map(|(idx, page)| {
                check_image_size(
                    page.image.len(),
                    self.config.min_image_bytes,
                    self.config.max_image_bytes,
                )
                .map_err(|e| on_page(idx, e))?;
                let quad = page
                    .corners
                    .as_deref()
                    .map(Quad::from_points)
                    .transpose()
                    .map_err(|e| on_page(idx, e))?;
                Ok((page, quad))
            })
            .collect()
    }

    // ── Reserving → Done | RolledBack ────────────────────────────────────

    async fn run(&self, mut ctx: BatchContext, source: Source) -> Result<IngestReceipt, IngestError> {
        info!(
            batch_id = %ctx.batch_id,
            owner = %ctx.owner,
            collection = %ctx.collection,
            "Starting ingestion of {} page(s)",
            source.page_count()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(&ctx.batch_id, source.page_count());
        }

        self.enter(&ctx, BatchStage::Reserving);
        let reservation = match self.ledger.reserve(&ctx.owner, &ctx.collection).await {
            Ok(r) => r,
            Err(e) => {
                // Nothing was reserved, so there is nothing to compensate.
                warn!(batch_id = %ctx.batch_id, error = %e, "Reservation failed");
                self.finish_rolled_back(&ctx, &e);
                return Err(e);
            }
        };

        match self.process_and_commit(&mut ctx, &reservation, source).await {
            Ok(receipt) => {
                self.enter(&ctx, BatchStage::Done);
                info!(
                    batch_id = %ctx.batch_id,
                    primary_file_id = %receipt.primary_file_id,
                    "Ingestion complete: {} chars in {} chunk(s)",
                    receipt.narration_chars,
                    receipt.chunks
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_batch_complete(&receipt.primary_file_id.0);
                }
                Ok(receipt)
            }
            Err(e) => {
                self.roll_back(&ctx, reservation, &e).await;
                Err(e)
            }
        }
    }

    async fn process_and_commit(
        &self,
        ctx: &mut BatchContext,
        reservation: &Reservation,
        source: Source,
    ) -> Result<IngestReceipt, IngestError> {
        // ── Processing ───────────────────────────────────────────────────
        self.enter(ctx, BatchStage::Processing);
        let pages = source.page_count();
        let (text, narration, pdf) = match source {
            Source::Pages(pages) => {
                // Dropped at the end of this arm on every path.
                let scratch = BatchScratch::create(&self.config.scratch_root, &ctx.batch_id)?;
                let (rectified, text) = self.read_pages(&ctx.batch_id, pages).await?;
                if text.trim().is_empty() {
                    return Err(IngestError::Validation(
                        "no text was recognised in the uploaded pages".into(),
                    ));
                }
                let narration = self.narrator.narrate(&text).await?;
                let paths = scratch.write_pages(&rectified).await?;
                let pdf = compile_images_in_background(paths, ctx.title.clone()).await?;
                (text, narration, pdf)
            }
            Source::Text(body) => {
                let narration = self.narrator.narrate(&body).await?;
                let pdf = compile_text_in_background(ctx.title.clone(), body.clone()).await?;
                (body, narration, pdf)
            }
        };
        let Narration { audio, chunks } = narration;
        debug!(
            batch_id = %ctx.batch_id,
            "Processed: {} bytes of audio, {} bytes of PDF",
            audio.len(),
            pdf.len()
        );

        // ── Committing ───────────────────────────────────────────────────
        self.enter(ctx, BatchStage::Committing);
        let audio = AudioAsset {
            key: ctx.audio_key(),
            bytes: audio,
            text,
        };
        let document = DocumentAsset {
            key: ctx.document_key(),
            bytes: pdf,
        };
        self.upload(ctx, &audio.key, &audio.bytes, AUDIO_CONTENT_TYPE)
            .await?;
        self.upload(ctx, &document.key, &document.bytes, DOCUMENT_CONTENT_TYPE)
            .await?;

        let created_at = Utc::now();
        let record = |key: &str, size: usize, mime: &str, ext: &str| NewFileRecord {
            collection_id: reservation.collection_id.clone(),
            owner: ctx.owner.clone(),
            title: ctx.title.clone(),
            filename: format!("{}.{ext}", key_safe_title(&ctx.title)),
            storage_key: key.to_string(),
            contents: audio.text.clone(),
            size_bytes: size as u64,
            mime_type: mime.to_string(),
            link: FileLink::Primary,
            created_at,
        };
        let primary = record(&audio.key, audio.len(), AUDIO_CONTENT_TYPE, "mp3");
        let derived = record(&document.key, document.len(), DOCUMENT_CONTENT_TYPE, "pdf");

        let pair = match self.ledger.commit_pair(primary, derived).await {
            Ok(pair) => pair,
            Err(e) => {
                if matches!(e, IngestError::StorageInconsistency { .. }) {
                    ctx.retained.push(audio.key.clone());
                }
                return Err(e);
            }
        };
        ctx.retained.extend(ctx.uploaded.iter().cloned());

        Ok(IngestReceipt {
            primary_file_id: pair.primary,
            document_file_id: pair.derived,
            batch_id: ctx.batch_id.clone(),
            audio_key: audio.key,
            document_key: document.key,
            pages,
            narration_chars: audio.text.chars().count(),
            chunks,
        })
    }

    /// Rectify and read every page concurrently; returns the pages and the
    /// narration text, both in input order.
    async fn read_pages(
        &self,
        batch_id: &str,
        pages: Vec<(PageInput, Option<Quad>)>,
    ) -> Result<(Vec<RectifiedPage>, String), IngestError> {
        let total = pages.len();
        let mut results: Vec<(usize, RectifiedPage, Vec<String>)> =
            stream::iter(pages.into_iter().enumerate())
                .map(|(idx, (page, quad))| {
                    let extractor = Arc::clone(&self.extractor);
                    let progress = self.config.progress_callback.clone();
                    async move {
                        let PageInput {
                            filename, image, ..
                        } = page;
                        let rectified = rectify_in_background(image, quad)
                            .await
                            .map_err(|e| on_page(idx, e))?;
                        let fragments =
                            extract_page(extractor.as_ref(), &rectified, &filename, &self.config)
                                .await
                                .map_err(|e| on_page(idx, e))?;
                        debug!(
                            batch_id,
                            "Page {}/{}: {}x{}, {} fragment(s)",
                            idx + 1,
                            total,
                            rectified.width,
                            rectified.height,
                            fragments.len()
                        );
                        if let Some(ref cb) = progress {
                            cb.on_page_complete(idx + 1, total, fragments.len());
                        }
                        Ok::<_, IngestError>((idx, rectified, fragments))
                    }
                })
                .buffer_unordered(self.config.page_concurrency)
                .try_collect()
                .await?;

        results.sort_by_key(|(idx, _, _)| *idx);

        let mut rectified = Vec::with_capacity(results.len());
        let mut fragments = Vec::new();
        for (_, page, page_fragments) in results {
            rectified.push(page);
            fragments.extend(page_fragments);
        }
        Ok((rectified, fragments.join(" ")))
    }

    async fn upload(
        &self,
        ctx: &mut BatchContext,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), IngestError> {
        self.store
            .put(key, bytes, content_type)
            .await
            .map_err(|e| IngestError::Storage(format!("upload of '{key}' failed: {e}")))?;
        ctx.uploaded.push(key.to_string());
        debug!(batch_id = %ctx.batch_id, key, "Uploaded {} bytes", bytes.len());
        Ok(())
    }

    // ── RolledBack ───────────────────────────────────────────────────────

    /// The single compensation path for failures after a reservation.
    async fn roll_back(&self, ctx: &BatchContext, reservation: Reservation, cause: &IngestError) {
        warn!(batch_id = %ctx.batch_id, error = %cause, "Batch failed; compensating");

        if let Err(e) = self.ledger.compensate(reservation).await {
            error!(
                batch_id = %ctx.batch_id,
                collection = %ctx.collection,
                error = %e,
                "Compensating decrement failed; collection counter is one too high"
            );
        }

        for key in ctx.uploaded.iter().filter(|k| !ctx.retained.contains(k)) {
            if let Err(e) = self.store.delete(key).await {
                error!(batch_id = %ctx.batch_id, key = %key, error = %e, "Orphaned object could not be removed");
            }
        }

        self.finish_rolled_back(ctx, cause);
    }

    fn finish_rolled_back(&self, ctx: &BatchContext, cause: &IngestError) {
        self.enter(ctx, BatchStage::RolledBack);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_rolled_back(&cause.to_string());
        }
    }

    fn enter(&self, ctx: &BatchContext, stage: BatchStage) {
        debug!(batch_id = %ctx.batch_id, "Batch stage: {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(&ctx.batch_id, stage);
        }
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Prefix input errors with the 1-indexed page they came from.
fn on_page(idx: usize, e: IngestError) -> IngestError {
    match e {
        IngestError::Validation(msg) => IngestError::Validation(format!("page {}: {msg}", idx + 1)),
        IngestError::Geometry(msg) => IngestError::Geometry(format!("page {}: {msg}", idx + 1)),
        other => other,
    }
}

/// Make a title usable as one object-key path segment.
fn key_safe_title(title: &str) -> String {
    let replaced = RE_UNSAFE_KEY_CHARS.replace_all(title.trim(), "_");
    let trimmed = replaced.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

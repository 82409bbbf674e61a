//! Integration tests for the ingestion state machine.
//!
//! The OCR and speech services are replaced by in-process fakes; storage runs
//! on the in-memory backends, optionally wrapped to inject failures. Every
//! failure scenario checks the same three things: the collection counter is
//! back where it started, no orphaned object is left in the store, and the
//! scratch root is empty.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use scan2voice::model::{CollectionId, FileId, NewFileRecord};
use scan2voice::pipeline::extract::{TextExtractor, OCR_SERVICE};
use scan2voice::pipeline::narrate::{SpeechSynthesizer, SPEECH_SERVICE};
use scan2voice::storage::{DocumentDatabase, MemoryDatabase, MemoryObjectStore, ObjectStore};
use scan2voice::{
    BatchStage, FileLink, IngestConfig, IngestError, IngestProgressCallback, Ingestor, PageInput,
    Point, StoreError, UploadBatch,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

const OWNER: &str = "alice";
const COLLECTION: &str = "소설";

// ── Fakes ────────────────────────────────────────────────────────────────────

/// OCR keyed by filename, with an optional per-page delay. Filenames marked
/// with [`ScriptedOcr::failing`] get an HTTP 503 from the "service".
#[derive(Default)]
struct ScriptedOcr {
    pages: HashMap<String, (Vec<String>, u64)>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    fn page(mut self, filename: &str, fragments: &[&str], delay_ms: u64) -> Self {
        self.pages.insert(
            filename.to_string(),
            (fragments.iter().map(|s| s.to_string()).collect(), delay_ms),
        );
        self
    }

    fn failing(mut self, filename: &str) -> Self {
        self.failing.push(filename.to_string());
        self
    }
}

#[async_trait]
impl TextExtractor for ScriptedOcr {
    async fn extract(
        &self,
        image: &[u8],
        _content_type: &str,
        filename: &str,
    ) -> Result<Vec<String>, IngestError> {
        assert!(!image.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (fragments, delay) = self.pages.get(filename).cloned().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if self.failing.iter().any(|f| f == filename) {
            return Err(IngestError::external(
                OCR_SERVICE,
                Some(503),
                "Service Unavailable",
            ));
        }
        Ok(fragments)
    }
}

/// "Synthesizes" a chunk by echoing its bytes; fails on chunks containing
/// `fail_on`.
#[derive(Default)]
struct EchoSynth {
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl EchoSynth {
    fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynth {
    async fn synthesize(&self, chunk: &str) -> Result<Vec<u8>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref marker) = self.fail_on {
            if chunk.contains(marker.as_str()) {
                return Err(IngestError::external(
                    SPEECH_SERVICE,
                    Some(500),
                    "Internal Server Error",
                ));
            }
        }
        Ok(chunk.as_bytes().to_vec())
    }
}

/// Fails the `fail_at`-th record insert (1-based).
struct FlakyDatabase {
    inner: Arc<MemoryDatabase>,
    fail_at: usize,
    inserts: AtomicUsize,
}

#[async_trait]
impl DocumentDatabase for FlakyDatabase {
    async fn increment_counter(
        &self,
        owner: &str,
        collection: &str,
        delta: i64,
    ) -> Result<CollectionId, StoreError> {
        self.inner.increment_counter(owner, collection, delta).await
    }

    async fn insert_file(&self, record: NewFileRecord) -> Result<FileId, StoreError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(StoreError::Backend("write concern timeout".into()));
        }
        self.inner.insert_file(record).await
    }
}

/// Rejects uploads whose key starts with `reject_prefix`.
struct PickyStore {
    inner: Arc<MemoryObjectStore>,
    reject_prefix: &'static str,
}

#[async_trait]
impl ObjectStore for PickyStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        if key.starts_with(self.reject_prefix) {
            return Err(StoreError::Backend("bucket unavailable".into()));
        }
        self.inner.put(key, bytes, content_type).await
    }

    async fn get_url(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get_url(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<BatchStage>>,
    rolled_back: AtomicUsize,
}

impl IngestProgressCallback for StageRecorder {
    fn on_stage(&self, _batch_id: &str, stage: BatchStage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_rolled_back(&self, _error: &str) {
        self.rolled_back.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// Route the crate's tracing output through the test harness. `RUST_LOG`
/// picks the level; first caller wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    ingestor: Ingestor,
    db: Arc<MemoryDatabase>,
    store: Arc<MemoryObjectStore>,
    scratch: tempfile::TempDir,
}

impl Harness {
    fn count(&self) -> Option<i64> {
        self.db.file_count(OWNER, COLLECTION)
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
    }
}

struct Setup {
    ocr: Arc<ScriptedOcr>,
    synth: Arc<EchoSynth>,
    config: Option<scan2voice::IngestConfigBuilder>,
    wrap_db: Option<Box<dyn FnOnce(Arc<MemoryDatabase>) -> Arc<dyn DocumentDatabase>>>,
    wrap_store: Option<Box<dyn FnOnce(Arc<MemoryObjectStore>) -> Arc<dyn ObjectStore>>>,
}

impl Setup {
    fn new(ocr: ScriptedOcr, synth: EchoSynth) -> Self {
        Self {
            ocr: Arc::new(ocr),
            synth: Arc::new(synth),
            config: None,
            wrap_db: None,
            wrap_store: None,
        }
    }

    fn build(self) -> Harness {
        init_tracing();
        let scratch = tempfile::tempdir().unwrap();
        let db = Arc::new(MemoryDatabase::new());
        db.create_collection(OWNER, COLLECTION);
        let store = Arc::new(MemoryObjectStore::new());

        let config = self
            .config
            .unwrap_or_else(IngestConfig::builder)
            .scratch_root(scratch.path())
            .build()
            .unwrap();
        let db_dyn: Arc<dyn DocumentDatabase> = match self.wrap_db {
            Some(wrap) => wrap(db.clone()),
            None => db.clone(),
        };
        let store_dyn: Arc<dyn ObjectStore> = match self.wrap_store {
            Some(wrap) => wrap(store.clone()),
            None => store.clone(),
        };

        let ingestor = Ingestor::new(config, self.ocr, self.synth, store_dyn, db_dyn);
        Harness {
            ingestor,
            db,
            store,
            scratch,
        }
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([240, 240, 230]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn batch(pages: Vec<PageInput>) -> UploadBatch {
    UploadBatch {
        owner: OWNER.into(),
        collection: COLLECTION.into(),
        title: "Chapter 1".into(),
        pages,
    }
}

fn corners(points: &[(f64, f64)]) -> Vec<Point> {
    points.iter().map(|&(x, y)| Point::new(x, y)).collect()
}

fn pdf_page_count(bytes: &[u8]) -> usize {
    lopdf::Document::load_mem(bytes).unwrap().get_pages().len()
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_pages_produce_one_linked_pair() {
    let ocr = ScriptedOcr::default()
        .page("p1.png", &["Hello"], 0)
        .page("p2.png", &["world"], 0);
    let h = Setup::new(ocr, EchoSynth::default()).build();

    let pages = vec![
        PageInput::new("p1.png", png(40, 30)),
        PageInput::new("p2.png", png(50, 40))
            .with_corners(corners(&[(5.0, 5.0), (45.0, 6.0), (44.0, 35.0), (6.0, 34.0)])),
    ];
    let receipt = assert_ok!(h.ingestor.ingest(batch(pages)).await);

    assert_eq!(receipt.pages, 2);
    assert_eq!(receipt.chunks, 1);
    assert_eq!(receipt.narration_chars, "Hello world".len());
    assert_eq!(h.count(), Some(1));

    let files = h.db.files();
    assert_eq!(files.len(), 2);
    let primary = files.iter().find(|f| f.id == receipt.primary_file_id).unwrap();
    let derived = files.iter().find(|f| f.id == receipt.document_file_id).unwrap();
    assert_eq!(primary.record.link, FileLink::Primary);
    assert_eq!(
        derived.record.link,
        FileLink::Derived {
            primary_id: receipt.primary_file_id.clone()
        }
    );
    assert_eq!(primary.record.contents, "Hello world");
    assert_eq!(primary.record.mime_type, "audio/mpeg");
    assert_eq!(derived.record.mime_type, "application/pdf");
    assert_eq!(primary.record.storage_key, receipt.audio_key);

    let (audio, _) = h.store.object(&receipt.audio_key).unwrap();
    assert_eq!(audio, b"Hello world");
    let (pdf, content_type) = h.store.object(&receipt.document_key).unwrap();
    assert_eq!(content_type, "application/pdf");
    assert_eq!(pdf_page_count(&pdf), 2);
    assert_eq!(primary.record.size_bytes, audio.len() as u64);

    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn page_text_follows_input_order_not_completion_order() {
    // The first page finishes last.
    let ocr = ScriptedOcr::default()
        .page("1.png", &["one"], 80)
        .page("2.png", &["two", "2b"], 30)
        .page("3.png", &["three"], 0);
    let h = Setup::new(ocr, EchoSynth::default()).build();

    let pages = ["1.png", "2.png", "3.png"]
        .iter()
        .map(|name| PageInput::new(*name, png(20, 20)))
        .collect();
    let receipt = assert_ok!(h.ingestor.ingest(batch(pages)).await);

    let (audio, _) = h.store.object(&receipt.audio_key).unwrap();
    assert_eq!(String::from_utf8(audio).unwrap(), "one two 2b three");
}

#[tokio::test]
async fn long_text_is_chunked_and_spliced_in_order() {
    let text = "First sentence here. Second one follows! Does a third exist? Yes.";
    let ocr = ScriptedOcr::default().page("p.png", &[text], 0);
    let mut setup = Setup::new(ocr, EchoSynth::default());
    setup.config = Some(IngestConfig::builder().max_chunk_chars(24));
    let synth = setup.synth.clone();
    let h = setup.build();

    let receipt = assert_ok!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("p.png", png(10, 10))]))
            .await
    );

    assert!(receipt.chunks > 1);
    assert_eq!(synth.calls.load(Ordering::SeqCst), receipt.chunks);
    let (audio, _) = h.store.object(&receipt.audio_key).unwrap();
    assert_eq!(audio, text.as_bytes());
}

#[tokio::test]
async fn text_ingestion_commits_pair_without_ocr() {
    let ocr = ScriptedOcr::default();
    let setup = Setup::new(ocr, EchoSynth::default());
    let ocr = setup.ocr.clone();
    let h = setup.build();

    let receipt = assert_ok!(
        h.ingestor
            .ingest_text(OWNER, COLLECTION, "Notes", "A short note to read aloud.")
            .await
    );

    assert_eq!(receipt.pages, 0);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.count(), Some(1));
    let (pdf, _) = h.store.object(&receipt.document_key).unwrap();
    assert_eq!(pdf_page_count(&pdf), 1);
}

#[tokio::test]
async fn stages_are_reported_in_order() {
    let recorder = Arc::new(StageRecorder::default());
    let ocr = ScriptedOcr::default().page("p.png", &["hi"], 0);
    let mut setup = Setup::new(ocr, EchoSynth::default());
    setup.config = Some(
        IngestConfig::builder().progress_callback(recorder.clone() as Arc<dyn IngestProgressCallback>),
    );
    let h = setup.build();

    assert_ok!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("p.png", png(10, 10))]))
            .await
    );

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            BatchStage::Validating,
            BatchStage::Reserving,
            BatchStage::Processing,
            BatchStage::Committing,
            BatchStage::Done,
        ]
    );
    assert_eq!(recorder.rolled_back.load(Ordering::SeqCst), 0);
}

// ── Validation failures: no side effects at all ──────────────────────────────

#[tokio::test]
async fn three_point_quad_is_rejected_before_reserving() {
    let recorder = Arc::new(StageRecorder::default());
    let ocr = ScriptedOcr::default()
        .page("p1.png", &["Hello"], 0)
        .page("p2.png", &["world"], 0);
    let mut setup = Setup::new(ocr, EchoSynth::default());
    setup.config = Some(
        IngestConfig::builder().progress_callback(recorder.clone() as Arc<dyn IngestProgressCallback>),
    );
    let ocr = setup.ocr.clone();
    let synth = setup.synth.clone();
    let h = setup.build();

    let pages = vec![
        PageInput::new("p1.png", png(40, 30)),
        PageInput::new("p2.png", png(40, 30))
            .with_corners(corners(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)])),
    ];
    let err = assert_err!(h.ingestor.ingest(batch(pages)).await);

    assert!(matches!(err, IngestError::Validation(_)), "got {err:?}");
    assert!(err.to_string().contains("page 2"));
    assert_eq!(h.count(), Some(0));
    assert!(h.store.keys().is_empty());
    assert!(h.db.files().is_empty());
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    assert_eq!(*recorder.stages.lock().unwrap(), vec![BatchStage::Validating]);
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn unknown_collection_and_empty_batch_are_validation_errors() {
    let h = Setup::new(ScriptedOcr::default(), EchoSynth::default()).build();

    let mut wrong = batch(vec![PageInput::new("p.png", png(10, 10))]);
    wrong.collection = "recipes".into();
    let err = assert_err!(h.ingestor.ingest(wrong).await);
    assert!(matches!(err, IngestError::Validation(_)));

    let err = assert_err!(h.ingestor.ingest(batch(Vec::new())).await);
    assert!(matches!(err, IngestError::Validation(_)));

    let err = assert_err!(h.ingestor.ingest_text(OWNER, COLLECTION, "t", "  ").await);
    assert!(matches!(err, IngestError::Validation(_)));

    assert_eq!(h.count(), Some(0));
}

#[tokio::test]
async fn oversized_page_is_rejected_before_reserving() {
    let mut setup = Setup::new(ScriptedOcr::default(), EchoSynth::default());
    setup.config = Some(IngestConfig::builder().image_size_bounds(1, 16));
    let h = setup.build();

    let err = assert_err!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("big.png", png(200, 200))]))
            .await
    );
    assert!(matches!(err, IngestError::Validation(_)));
    assert_eq!(h.count(), Some(0));
}

#[tokio::test]
async fn collection_missing_for_owner_is_not_found() {
    let h = Setup::new(ScriptedOcr::default(), EchoSynth::default()).build();

    let mut other = batch(vec![PageInput::new("p.png", png(10, 10))]);
    other.owner = "mallory".into();
    let err = assert_err!(h.ingestor.ingest(other).await);

    assert!(matches!(err, IngestError::NotFound { .. }), "got {err:?}");
    assert_eq!(err.status_hint(), 404);
    assert_eq!(h.count(), Some(0));
    assert!(h.store.keys().is_empty());
}

// ── Failures after reserving: compensated ────────────────────────────────────

#[tokio::test]
async fn synthesis_failure_restores_counter_and_writes_nothing() {
    let recorder = Arc::new(StageRecorder::default());
    let ocr = ScriptedOcr::default()
        .page("p1.png", &["Hello"], 0)
        .page("p2.png", &["world"], 0);
    let mut setup = Setup::new(ocr, EchoSynth::failing_on(""));
    setup.config = Some(
        IngestConfig::builder().progress_callback(recorder.clone() as Arc<dyn IngestProgressCallback>),
    );
    let h = setup.build();

    let pages = vec![
        PageInput::new("p1.png", png(40, 30)),
        PageInput::new("p2.png", png(40, 30)),
    ];
    let err = assert_err!(h.ingestor.ingest(batch(pages)).await);

    match err {
        IngestError::ExternalService { status, .. } => assert_eq!(status, Some(500)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.count(), Some(0));
    assert!(h.db.files().is_empty());
    assert!(h.store.keys().is_empty());
    assert!(h.scratch_is_empty());
    assert_eq!(
        recorder.stages.lock().unwrap().last(),
        Some(&BatchStage::RolledBack)
    );
    assert_eq!(recorder.rolled_back.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ocr_failure_restores_counter_and_writes_nothing() {
    let ocr = ScriptedOcr::default()
        .page("p1.png", &["Hello"], 0)
        .page("p2.png", &["world"], 20)
        .failing("p2.png");
    let setup = Setup::new(ocr, EchoSynth::default());
    let synth = setup.synth.clone();
    let h = setup.build();

    let pages = vec![
        PageInput::new("p1.png", png(40, 30)),
        PageInput::new("p2.png", png(40, 30)),
    ];
    let err = assert_err!(h.ingestor.ingest(batch(pages)).await);

    match err {
        IngestError::ExternalService {
            ref service,
            status,
            ..
        } => {
            assert_eq!(service, OCR_SERVICE);
            assert_eq!(status, Some(503));
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_hint(), 502);
    assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.count(), Some(0));
    assert!(h.db.files().is_empty());
    assert!(h.store.keys().is_empty());
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn oversized_rectified_page_is_compensated() {
    // A tiny source passes the upload bound, but the quad stretches it onto a
    // 1500×1500 page whose JPEG is far bigger than 4 KiB.
    let mut setup = Setup::new(
        ScriptedOcr::default().page("p.png", &["text"], 0),
        EchoSynth::default(),
    );
    setup.config = Some(IngestConfig::builder().image_size_bounds(1, 4096));
    let ocr = setup.ocr.clone();
    let h = setup.build();

    let raw = png(10, 10);
    assert!(raw.len() < 4096);
    let stretched = corners(&[(0.0, 0.0), (1500.0, 0.0), (1500.0, 1500.0), (0.0, 1500.0)]);
    let pages = vec![PageInput::new("p.png", raw).with_corners(stretched)];
    let err = assert_err!(h.ingestor.ingest(batch(pages)).await);

    assert!(
        matches!(err, IngestError::Validation(ref m) if m.starts_with("page 1:")),
        "got {err:?}"
    );
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.count(), Some(0));
    assert!(h.store.keys().is_empty());
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn degenerate_quad_fails_geometry_and_is_compensated() {
    let ocr = ScriptedOcr::default().page("p.png", &["text"], 0);
    let h = Setup::new(ocr, EchoSynth::default()).build();

    let collapsed = corners(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0), (5.0, 5.0)]);
    let pages = vec![PageInput::new("p.png", png(20, 20)).with_corners(collapsed)];
    let err = assert_err!(h.ingestor.ingest(batch(pages)).await);

    assert!(matches!(err, IngestError::Geometry(_)), "got {err:?}");
    assert!(err.is_validation());
    assert_eq!(h.count(), Some(0));
    assert!(h.store.keys().is_empty());
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn pages_without_text_are_compensated() {
    let ocr = ScriptedOcr::default().page("blank.png", &[], 0);
    let h = Setup::new(ocr, EchoSynth::default()).build();

    let err = assert_err!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("blank.png", png(10, 10))]))
            .await
    );
    assert!(matches!(err, IngestError::Validation(_)));
    assert_eq!(h.count(), Some(0));
}

#[tokio::test]
async fn failed_pdf_upload_removes_uploaded_audio() {
    let ocr = ScriptedOcr::default().page("p.png", &["Hello"], 0);
    let mut setup = Setup::new(ocr, EchoSynth::default());
    setup.wrap_store = Some(Box::new(|inner| {
        Arc::new(PickyStore {
            inner,
            reject_prefix: "pdfs/",
        })
    }));
    let h = setup.build();

    let err = assert_err!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("p.png", png(10, 10))]))
            .await
    );
    assert!(matches!(err, IngestError::Storage(_)), "got {err:?}");
    assert_eq!(h.count(), Some(0));
    assert!(h.db.files().is_empty());
    assert!(h.store.keys().is_empty(), "left behind: {:?}", h.store.keys());
}

#[tokio::test]
async fn derived_record_failure_keeps_primary_and_its_audio() {
    let ocr = ScriptedOcr::default().page("p.png", &["Hello"], 0);
    let mut setup = Setup::new(ocr, EchoSynth::default());
    setup.wrap_db = Some(Box::new(|inner| {
        Arc::new(FlakyDatabase {
            inner,
            fail_at: 2,
            inserts: AtomicUsize::new(0),
        })
    }));
    let h = setup.build();

    let err = assert_err!(
        h.ingestor
            .ingest(batch(vec![PageInput::new("p.png", png(10, 10))]))
            .await
    );

    let files = h.db.files();
    assert_eq!(files.len(), 1);
    let primary = &files[0];
    match err {
        IngestError::StorageInconsistency { primary_id, .. } => {
            assert_eq!(primary_id, primary.id.0)
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(primary.record.link.is_primary());
    assert_eq!(h.count(), Some(0));

    let keys = h.store.keys();
    assert_eq!(keys, vec![primary.record.storage_key.clone()]);
    assert!(keys[0].starts_with("tts/"));
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_batches_keep_counter_exact() {
    let ocr = ScriptedOcr::default()
        .page("ok.png", &["fine"], 5)
        .page("bad.png", &["FAIL"], 5);
    let h = Setup::new(ocr, EchoSynth::failing_on("FAIL")).build();

    let batches: Vec<_> = (0..8)
        .map(|i| {
            let name = if i % 3 == 0 { "bad.png" } else { "ok.png" };
            let mut b = batch(vec![PageInput::new(name, png(10, 10))]);
            b.title = format!("batch {i}");
            h.ingestor.ingest(b)
        })
        .collect();
    let results = futures::future::join_all(batches).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 5);
    assert_eq!(h.count(), Some(succeeded as i64));
    assert_eq!(h.db.files().len(), succeeded * 2);
    assert_eq!(h.store.keys().len(), succeeded * 2);
    assert!(h.scratch_is_empty());
}

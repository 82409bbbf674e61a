//! # scan2voice
//!
//! Turn photographed pages into a narrated audio file plus a companion PDF,
//! and file both into a user's collection.
//!
//! ## Why this crate?
//!
//! Phone photos of book pages are skewed, cropped badly and full of
//! background. Users mark the four page corners; this crate flattens each
//! page with a perspective transform, reads it with an OCR service, narrates
//! the text with a speech service, and stores the audio together with a PDF of
//! the flattened pages. A batch either lands completely or not at all: the
//! collection counter and the object store are restored on every failure.
//!
//! ## Pipeline Overview
//!
//! ```text
//! pages + corners
//!  │
//!  ├─ 1. Validate   collection, page count, corner cardinality, sizes
//!  ├─ 2. Reserve    +1 on the collection counter (atomic)
//!  ├─ 3. Rectify    homography warp per page (CPU-bound, spawn_blocking)
//!  ├─ 4. Extract    OCR per page, concurrent, reassembled by page index
//!  ├─ 5. Narrate    ≤1900-char chunks, concurrent TTS, spliced in order
//!  ├─ 6. Compile    PDF with one page per rectified image
//!  └─ 7. Commit     upload assets, audio record + PDF record linked to it
//! ```
//!
//! Any failure after step 2 decrements the counter again and removes uploaded
//! objects that no record points at.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan2voice::pipeline::extract::ClovaOcr;
//! use scan2voice::pipeline::narrate::ClovaVoice;
//! use scan2voice::storage::{FsObjectStore, MemoryDatabase};
//! use scan2voice::{ClovaOcrConfig, ClovaVoiceConfig, IngestConfig, Ingestor, PageInput, UploadBatch};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Arc::new(MemoryDatabase::new());
//!     db.create_collection("alice", "소설");
//!
//!     let ingestor = Ingestor::new(
//!         IngestConfig::default(),
//!         Arc::new(ClovaOcr::new(ClovaOcrConfig::from_env()?)?),
//!         Arc::new(ClovaVoice::new(ClovaVoiceConfig::from_env()?)?),
//!         Arc::new(FsObjectStore::new("./assets")),
//!         db,
//!     );
//!
//!     let page = PageInput::new("page1.jpg", std::fs::read("page1.jpg")?);
//!     let receipt = ingestor
//!         .ingest(UploadBatch {
//!             owner: "alice".into(),
//!             collection: "소설".into(),
//!             title: "Chapter 1".into(),
//!             pages: vec![page],
//!         })
//!         .await?;
//!     println!("audio record {}", receipt.primary_file_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2voice` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scan2voice = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ClovaOcrConfig, ClovaVoiceConfig, IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, StoreError};
pub use ingest::Ingestor;
pub use model::{
    parse_page_quads, BatchStage, FileId, FileLink, FileRecord, IngestReceipt, PageInput, Point,
    Quad, UploadBatch,
};
pub use pipeline::compile::{compile_images, compile_text};
pub use pipeline::narrate::split_text;
pub use pipeline::rectify::rectify;
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};

//! Progress-callback trait for per-batch ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as a batch moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use scan2voice::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _page_num: usize, _total: usize, _fragments: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { pages: AtomicUsize::new(0) });
//! let config = IngestConfig::builder()
//!     .progress_callback(counter as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::model::BatchStage;
use std::sync::Arc;

/// Called by the orchestrator as it processes a batch.
///
/// Pages and chunks are processed concurrently, so `on_page_complete` and
/// `on_chunk_complete` may fire from several tasks at once and in any order.
/// All methods default to no-ops.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once after validation succeeds.
    fn on_batch_start(&self, batch_id: &str, total_pages: usize) {
        let _ = (batch_id, total_pages);
    }

    /// Called on every state-machine transition.
    fn on_stage(&self, batch_id: &str, stage: BatchStage) {
        let _ = (batch_id, stage);
    }

    /// Called when a page has been rectified and its text extracted.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    /// * `total`: pages in the batch
    /// * `fragments`: number of text fragments recognised on the page
    fn on_page_complete(&self, page_num: usize, total: usize, fragments: usize) {
        let _ = (page_num, total, fragments);
    }

    /// Called when one narration chunk has been synthesized (1-indexed).
    fn on_chunk_complete(&self, chunk_num: usize, total: usize) {
        let _ = (chunk_num, total);
    }

    /// Called once when the batch reaches `Done`.
    fn on_batch_complete(&self, primary_file_id: &str) {
        let _ = primary_file_id;
    }

    /// Called once when the batch reaches `RolledBack`, after compensation.
    fn on_rolled_back(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

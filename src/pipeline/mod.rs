//! Pipeline stages for page ingestion.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable. The orchestrator in [`crate::ingest`] wires them
//! together and owns all ledger/storage side effects; nothing in here touches
//! the ledger.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ rectify ──▶ extract ─┐ (per page, concurrent)
//! pages ─────┤                        ├──▶ narrate ──▶ audio
//!            └────────────────────────┘
//!                  │
//!                  └──▶ scratch ──▶ compile ──▶ PDF
//! ```
//!
//! 1. [`rectify`]: homography warp of the marked quad; CPU-bound, runs in
//!    `spawn_blocking`
//! 2. [`extract`]: size-check and OCR one page; network I/O
//! 3. [`narrate`]: chunk the joined text, synthesize concurrently, splice
//!    segments back in chunk order
//! 4. [`scratch`]: per-batch temp directory holding rectified pages
//! 5. [`compile`]: build the companion PDF from images or plain text

pub mod compile;
pub mod extract;
pub mod narrate;
pub mod rectify;
pub mod scratch;

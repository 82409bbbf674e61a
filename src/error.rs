//! Error types for the scan2voice library.
//!
//! Two error types reflect two layers:
//!
//! * [`IngestError`]: **fatal for the batch**. The closed set of ways an
//!   ingestion can fail. Every public operation returns
//!   `Result<_, IngestError>`, and the orchestrator guarantees that any
//!   failure after the ledger reservation has been compensated before the
//!   error reaches the caller.
//!
//! * [`StoreError`]: what the storage backends ([`crate::storage::ObjectStore`],
//!   [`crate::storage::DocumentDatabase`]) report. Backends don't need to
//!   know the ingestion taxonomy; the ledger maps it into [`IngestError`]
//!   with the right meaning for the step that failed.

use thiserror::Error;

/// All errors an ingestion batch can end with.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Malformed input: wrong quad cardinality, empty batch, unknown
    /// destination collection, empty or oversized image, undecodable bytes.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A quad collapsed to a zero-area or non-invertible region.
    #[error("Degenerate page geometry: {0}")]
    Geometry(String),

    /// A record the batch depends on does not exist (e.g. the destination
    /// collection for this owner).
    #[error("{what} not found")]
    NotFound { what: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// Text extraction or speech synthesis failed (transport error, timeout,
    /// or non-2xx status). Never retried by this crate.
    #[error("{service} service error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ExternalService {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// The companion PDF could not be encoded.
    #[error("PDF generation failed: {0}")]
    DocumentGeneration(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// The derived record write failed after the primary record was written.
    ///
    /// The primary record is left in place; callers may clean it up.
    #[error("Derived record write failed after primary '{primary_id}' was stored: {detail}")]
    StorageInconsistency { primary_id: String, detail: String },

    /// Object store or database failure outside the orphaned-primary case.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker task panicked, scratch dir creation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Shorthand for a collaborator failure.
    pub fn external(
        service: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        IngestError::ExternalService {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_) | IngestError::Geometry(_))
    }

    /// HTTP-style status a route layer can map this error onto.
    pub fn status_hint(&self) -> u16 {
        match self {
            IngestError::Validation(_) | IngestError::Geometry(_) => 400,
            IngestError::NotFound { .. } => 404,
            IngestError::ExternalService { .. } => 502,
            _ => 500,
        }
    }
}

/// Error reported by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed collection, record or object does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

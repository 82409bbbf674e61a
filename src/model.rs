//! Data model shared by every pipeline stage.
//!
//! Request-side types ([`UploadBatch`], [`PageInput`], [`Point`]) mirror the
//! upload form; intermediate types ([`RectifiedPage`], [`AudioAsset`],
//! [`DocumentAsset`]) live only for one batch; [`FileRecord`] is what ends up
//! in the document database.

use crate::error::IngestError;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Geometry ─────────────────────────────────────────────────────────────

/// A 2-D point in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Exactly four corners, ordered top-left, top-right, bottom-right,
/// bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad([Point; 4]);

impl Quad {
    pub fn new(top_left: Point, top_right: Point, bottom_right: Point, bottom_left: Point) -> Self {
        Self([top_left, top_right, bottom_right, bottom_left])
    }

    /// Validate a corner list coming from the wire.
    pub fn from_points(points: &[Point]) -> Result<Self, IngestError> {
        let corners: [Point; 4] = points.try_into().map_err(|_| {
            IngestError::Validation(format!(
                "a quad needs exactly 4 points, got {}",
                points.len()
            ))
        })?;
        if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(IngestError::Validation(
                "quad coordinates must be finite numbers".into(),
            ));
        }
        Ok(Self(corners))
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.0
    }

    /// Unrounded size of the rectified output:
    /// width = max(|p0p1|, |p3p2|), height = max(|p0p3|, |p1p2|).
    pub fn output_size(&self) -> (f64, f64) {
        let [p0, p1, p2, p3] = &self.0;
        let width = p0.distance(p1).max(p3.distance(p2));
        let height = p0.distance(p3).max(p1.distance(p2));
        (width, height)
    }
}

// ── Request side ─────────────────────────────────────────────────────────

/// One submitted page image plus an optional crop region.
#[derive(Debug, Clone)]
pub struct PageInput {
    /// Original filename as uploaded; forwarded to the text extractor.
    pub filename: String,
    /// Raw encoded image bytes.
    pub image: Vec<u8>,
    /// Corner list as received. `None` means "use the image unmodified".
    /// Cardinality is checked during validation, not here.
    pub corners: Option<Vec<Point>>,
}

impl PageInput {
    pub fn new(filename: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            image,
            corners: None,
        }
    }

    pub fn with_corners(mut self, corners: Vec<Point>) -> Self {
        self.corners = Some(corners);
        self
    }
}

/// One user-initiated ingestion request. Exists only while it is processed.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub owner: String,
    pub collection: String,
    pub title: String,
    pub pages: Vec<PageInput>,
}

/// Parse the per-page vertex payload sent alongside an upload.
///
/// Wire shape: a JSON list whose entries are either `null` or a list of four
/// `{"x": .., "y": ..}` objects. Entry *i* belongs to page *i*; pages past the
/// end of the list get no quad.
pub fn parse_page_quads(json: &str) -> Result<Vec<Option<Vec<Point>>>, IngestError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| IngestError::Validation(format!("invalid JSON for vertices data: {e}")))?;

    let entries = value
        .as_array()
        .ok_or_else(|| IngestError::Validation("vertices data must be a list".into()))?;

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            if entry.is_null() {
                return Ok(None);
            }
            let points: Vec<Point> = serde_json::from_value(entry.clone()).map_err(|_| {
                IngestError::Validation(format!(
                    "vertices set {idx}: each point must have 'x' and 'y' coordinates"
                ))
            })?;
            if points.len() != 4 {
                return Err(IngestError::Validation(format!(
                    "vertices set {idx}: expected exactly 4 points, got {}",
                    points.len()
                )));
            }
            Ok(Some(points))
        })
        .collect()
}

// ── Intermediate assets ──────────────────────────────────────────────────

/// Corrected image for one page.
#[derive(Debug, Clone)]
pub struct RectifiedPage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl RectifiedPage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }
}

/// The synthesized narration for one batch.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    pub bytes: Vec<u8>,
    pub text: String,
    pub key: String,
}

impl AudioAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The compiled companion PDF for one batch.
#[derive(Debug, Clone)]
pub struct DocumentAsset {
    pub bytes: Vec<u8>,
    pub key: String,
}

impl DocumentAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ── Persisted records ────────────────────────────────────────────────────

/// Database identifier of a stored file record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Database identifier of a destination collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub String);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a record is the primary artifact of its batch or derived from one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileLink {
    Primary,
    Derived { primary_id: FileId },
}

impl FileLink {
    pub fn is_primary(&self) -> bool {
        matches!(self, FileLink::Primary)
    }
}

/// A file record before the database has assigned it an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFileRecord {
    pub collection_id: CollectionId,
    pub owner: String,
    pub title: String,
    pub filename: String,
    pub storage_key: String,
    /// Narration text the asset was produced from.
    pub contents: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub link: FileLink,
    pub created_at: DateTime<Utc>,
}

/// Persisted metadata for one stored asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    #[serde(flatten)]
    pub record: NewFileRecord,
}

/// What a successful ingestion hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Id of the audio record; the one callers show in listings.
    pub primary_file_id: FileId,
    pub document_file_id: FileId,
    pub batch_id: String,
    pub audio_key: String,
    pub document_key: String,
    pub pages: usize,
    pub narration_chars: usize,
    pub chunks: usize,
}

// ── Batch state machine ──────────────────────────────────────────────────

/// Stage of one batch. `RolledBack` is terminal and reachable from
/// `Reserving`, `Processing` and `Committing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStage {
    Validating,
    Reserving,
    Processing,
    Committing,
    Done,
    RolledBack,
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStage::Validating => "validating",
            BatchStage::Reserving => "reserving",
            BatchStage::Processing => "processing",
            BatchStage::Committing => "committing",
            BatchStage::Done => "done",
            BatchStage::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

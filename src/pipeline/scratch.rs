//! Per-batch scratch directory.
//!
//! Rectified pages are written here so the PDF compiler can read them back by
//! path. The directory lives exactly as long as the [`BatchScratch`] value;
//! dropping it (on success or any failure path) removes everything.

use crate::error::IngestError;
use crate::model::RectifiedPage;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct BatchScratch {
    dir: TempDir,
}

impl BatchScratch {
    /// Create `batch-{batch_id}-XXXX` under `root`, creating `root` if needed.
    pub fn create(root: &Path, batch_id: &str) -> Result<Self, IngestError> {
        std::fs::create_dir_all(root).map_err(|e| {
            IngestError::Internal(format!("scratch root '{}': {e}", root.display()))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("batch-{batch_id}-"))
            .tempdir_in(root)
            .map_err(|e| IngestError::Internal(format!("scratch dir: {e}")))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write pages as `page_0000.jpg`, `page_0001.png`, ... and return the
    /// paths in input order.
    pub async fn write_pages(&self, pages: &[RectifiedPage]) -> Result<Vec<PathBuf>, IngestError> {
        let mut paths = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            let path = self
                .dir
                .path()
                .join(format!("page_{idx:04}.{}", page.extension()));
            tokio::fs::write(&path, &page.bytes)
                .await
                .map_err(|e| IngestError::Internal(format!("scratch write: {e}")))?;
            paths.push(path);
        }
        Ok(paths)
    }
}

impl std::fmt::Debug for BatchScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScratch")
            .field("path", &self.dir.path())
            .finish()
    }
}

//! Object store on the local filesystem.
//!
//! Keys map to paths under a root directory. Writes go to a sibling temp file
//! that is renamed into place, so readers never see a half-written object.

use crate::error::StoreError;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve URLs as `{base}/{key}` instead of `file://` paths.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::Backend(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        let full_path = self.full_path(key)?;
        debug!(key, content_type, size = bytes.len(), "object store: put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "object store: create_dir_all failed");
                backend(e)
            })?;
        }

        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).await.map_err(backend)?;
        file.write_all(bytes).await.map_err(backend)?;
        file.sync_all().await.map_err(backend)?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "object store: rename failed");
            backend(e)
        })?;
        Ok(())
    }

    async fn get_url(&self, key: &str) -> Result<String, StoreError> {
        let full_path = self.full_path(key)?;
        if !fs::try_exists(&full_path).await.map_err(backend)? {
            return Err(StoreError::NotFound {
                what: format!("object '{key}'"),
            });
        }
        Ok(match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("file://{}", full_path.display()),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let full_path = self.full_path(key)?;
        if fs::try_exists(&full_path).await.map_err(backend)? {
            fs::remove_file(&full_path).await.map_err(backend)?;
            debug!(key, "object store: deleted");
        }
        Ok(())
    }
}

fn backend(e: std::io::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

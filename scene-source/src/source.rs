use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::filesystem::Filesystem;
use crate::SceneSourceError;

/// Where a scene is read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Source {
    Zip { path: PathBuf },
    Dir { path: PathBuf },
}

impl Source {
    /// Picks the source kind from what is on disk at `path`.
    pub fn from_path(path: &Path) -> Result<Source> {
        if path.is_dir() {
            Ok(Source::Dir { path: path.to_path_buf() })
        } else if path.is_file() {
            Ok(Source::Zip { path: path.to_path_buf() })
        } else {
            Err(SceneSourceError::File(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Scene source not found: {}", path.display()),
            )))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Source::Zip { path } | Source::Dir { path } => path,
        }
    }

    pub async fn into_fs(self) -> Result<Filesystem> {
        match self {
            Source::Zip { path } => {
                let file = tokio::fs::File::open(&path).await?;
                Filesystem::from_reader(file).await
            }
            Source::Dir { path } => {
                log::debug!("Indexing scene directory {}", path.display());
                let walk = tokio::task::spawn_blocking(move || Filesystem::from_dir(path));
                walk.await.map_err(|e| SceneSourceError::File(e.into()))?
            }
        }
    }
}

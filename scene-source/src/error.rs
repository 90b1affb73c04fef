use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SceneSourceError>;

#[derive(Debug, Error)]
pub enum SceneSourceError {
    #[error("File IO error: {0}")]
    File(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Duplicate path found: {0}. Paths must be unique (case non-sensitive)")]
    DuplicatePath(PathBuf),

    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("Unknown source")]
    UnknownSource,
}

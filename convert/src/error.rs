use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("File IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read capture: {0}")]
    Format(#[from] dataset::FormatError),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg failed on {video} ({status})")]
    Ffmpeg { video: PathBuf, status: ExitStatus },

    #[error("Invalid capture: {0}")]
    InvalidInput(String),
}

use std::path::PathBuf;
use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error while loading dataset: {0}")]
    Io(String),

    #[error("File IO error: {0}")]
    File(#[from] tokio::io::Error),

    #[error("Error decoding camera parameters: {0}")]
    InvalidCamera(String),

    #[error("Colmap camera model not handled: only undistorted datasets are supported, got {0}")]
    UnsupportedCameraModel(String),

    #[error("Image error: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid point cloud: {0}")]
    InvalidPointCloud(String),

    #[error("Invalid array: {0}")]
    InvalidArray(String),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to load format: {0}")]
    FormatError(#[from] FormatError),

    #[error("Format not recognized: expected a colmap, transforms or nerfies scene.")]
    FormatNotSupported,

    #[error("Scene source error: {0}")]
    SceneSource(#[from] scene_source::SceneSourceError),
}

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use dataset::DatasetError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load scene: {0}")]
    DatasetError(#[from] DatasetError),

    #[error("Scene source error: {0}")]
    SceneSource(#[from] scene_source::SceneSourceError),

    #[error("File IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model directory not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("No saved iterations in {0}")]
    NoIterations(PathBuf),

    #[error("Iteration {iteration} was not saved in {model}")]
    MissingIteration { model: PathBuf, iteration: u32 },

    #[error("No source path given and none recorded in the model's cfg_args")]
    MissingSourcePath,

    #[error("Could not parse cfg_args: {0}")]
    InvalidArgs(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ProgramFailed { program: String, status: ExitStatus },

    #[error("No masks were written for: {}", .0.join(", "))]
    MissingMasks(Vec<String>),
}

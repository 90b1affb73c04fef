//! Converters from raw multi-view video captures to the transforms layout the
//! dataset readers load.

use std::path::{Path, PathBuf};

mod config;
mod error;
mod ffmpeg;
pub mod immersive;
pub mod neu3d;
pub mod technicolor;
pub mod transforms;

pub use config::ConvertConfig;
pub use error::{ConvertError, Result};
pub use ffmpeg::FrameExtractor;
pub use immersive::convert_immersive;
pub use neu3d::convert_neu3d;
pub use technicolor::convert_technicolor;

/// Files directly inside `dir` with the given extension, sorted by name.
pub(crate) async fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

use std::path::{Path, PathBuf};
use log::info;
use tokio::process::Command;
use crate::error::{ConvertError, Result};

/// Decodes the first frames of a video into numbered PNG files.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    program: String,
}

impl FrameExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Arguments for writing `frames` frames of `video`, downsampled by `scale`, to
    /// `out_dir/0000.png` onwards.
    pub fn args(&self, video: &Path, out_dir: &Path, scale: u32, frames: u32) -> Vec<String> {
        let mut args = vec![
            "-y".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-i".to_owned(),
            video.display().to_string(),
        ];
        if scale > 1 {
            args.push("-vf".to_owned());
            args.push(format!("scale=iw/{scale}:ih/{scale}"));
        }
        args.extend([
            "-frames:v".to_owned(),
            frames.to_string(),
            "-start_number".to_owned(),
            "0".to_owned(),
            out_dir.join("%04d.png").display().to_string(),
        ]);
        args
    }

    pub async fn extract(&self, video: &Path, out_dir: &Path, scale: u32, frames: u32) -> Result<PathBuf> {
        tokio::fs::create_dir_all(out_dir).await?;
        info!("Extracting {frames} frames of {}", video.display());

        let status = Command::new(&self.program)
            .args(self.args(video, out_dir, scale, frames))
            .status()
            .await
            .map_err(|source| ConvertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ConvertError::Ffmpeg {
                video: video.to_path_buf(),
                status,
            });
        }
        Ok(out_dir.to_path_buf())
    }
}

use std::path::{Path, PathBuf};
use log::info;
use crate::config::ExtractMasksConfig;
use crate::error::{PipelineError, Result};
use crate::process::run_program;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskReport {
    pub output: PathBuf,
    pub images: usize,
    pub extracted: usize,
}

impl ExtractMasksConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("iou_th", self.iou_th), ("stability_score_th", self.stability_score_th)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "--{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if self.downsample_mask == 0 {
            return Err(PipelineError::InvalidConfig("--downsample_mask must be at least 1".to_owned()));
        }
        Ok(())
    }

    /// `--output`, or `masks` beside the image directory where the scene readers look.
    pub fn output_dir(&self) -> PathBuf {
        match &self.output {
            Some(output) => PathBuf::from(output),
            None => Path::new(&self.img_path)
                .parent()
                .unwrap_or(Path::new(""))
                .join("masks"),
        }
    }
}

pub fn mask_path(output: &Path, image: &Path) -> PathBuf {
    let stem = image.file_stem().unwrap_or_default().to_string_lossy();
    output.join(format!("{stem}.pt"))
}

async fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut images = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if is_image && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

async fn without_masks(images: &[PathBuf], output: &Path) -> Result<Vec<PathBuf>> {
    let mut missing = vec![];
    for image in images {
        if !tokio::fs::try_exists(mask_path(output, image)).await? {
            missing.push(image.clone());
        }
    }
    Ok(missing)
}

fn extractor_args(config: &ExtractMasksConfig, output: &Path) -> Vec<String> {
    vec![
        "--img_path".to_owned(),
        config.img_path.clone(),
        "--output".to_owned(),
        output.display().to_string(),
        "--iou_th".to_owned(),
        config.iou_th.to_string(),
        "--stability_score_th".to_owned(),
        config.stability_score_th.to_string(),
        "--downsample_mask".to_owned(),
        config.downsample_mask.to_string(),
    ]
}

/// Runs the segmentation program over `img_path` unless every image already has
/// masks, then checks that each image got its `<stem>.pt`.
pub async fn extract_masks(config: &ExtractMasksConfig) -> Result<MaskReport> {
    config.validate()?;
    let output = config.output_dir();
    let images = list_images(Path::new(&config.img_path)).await?;

    let pending = if config.force {
        images.clone()
    } else {
        without_masks(&images, &output).await?
    };
    if pending.is_empty() {
        info!("All {} images already have masks in {}", images.len(), output.display());
        return Ok(MaskReport {
            output,
            images: images.len(),
            extracted: 0,
        });
    }

    info!("Extracting masks for {} of {} images", pending.len(), images.len());
    tokio::fs::create_dir_all(&output).await?;
    run_program(&config.extractor, extractor_args(config, &output)).await?;

    let missing = without_masks(&pending, &output).await?;
    if !missing.is_empty() {
        return Err(PipelineError::MissingMasks(
            missing.iter().map(|p| p.display().to_string()).collect(),
        ));
    }
    Ok(MaskReport {
        output,
        images: images.len(),
        extracted: pending.len(),
    })
}

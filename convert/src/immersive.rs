//! Google Immersive light field videos, calibrated by `models.json`.

use std::path::PathBuf;
use futures::{StreamExt, TryStreamExt};
use glam::{Mat3, Mat4, Vec3};
use log::{info, warn};
use serde::Deserialize;
use crate::config::ConvertConfig;
use crate::error::{ConvertError, Result};
use crate::ffmpeg::FrameExtractor;
use crate::transforms::{split_transforms, write_transforms, CameraFrames, Intrinsics, TransformsFile};

pub const DEFAULT_FRAMES: u32 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct ImmersiveCamera {
    #[serde(default)]
    pub name: Option<String>,
    /// Axis-angle world-to-camera rotation.
    pub orientation: [f32; 3],
    /// Camera center in world space.
    pub position: [f32; 3],
    pub focal_length: f32,
    pub principal_point: [f32; 2],
    #[serde(default = "one")]
    pub pixel_aspect_ratio: f32,
    pub width: u32,
    pub height: u32,
}

fn one() -> f32 {
    1.0
}

impl ImmersiveCamera {
    fn name(&self, idx: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("camera_{:04}", idx + 1))
    }

    pub fn world_to_camera(&self) -> Mat4 {
        let rotation = axis_angle_to_matrix(Vec3::from_array(self.orientation));
        let translation = -(rotation * Vec3::from_array(self.position));
        Mat4::from_cols(
            rotation.x_axis.extend(0.0),
            rotation.y_axis.extend(0.0),
            rotation.z_axis.extend(0.0),
            translation.extend(1.0),
        )
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics {
            fl_x: self.focal_length,
            fl_y: self.focal_length * self.pixel_aspect_ratio,
            cx: self.principal_point[0],
            cy: self.principal_point[1],
            w: self.width,
            h: self.height,
        }
    }
}

/// Rotation matrix of a rotation vector (axis scaled by angle in radians).
pub fn axis_angle_to_matrix(v: Vec3) -> Mat3 {
    let angle = v.length();
    if angle < 1e-8 {
        return Mat3::IDENTITY;
    }
    Mat3::from_axis_angle(v / angle, angle)
}

/// Transforms with per-frame intrinsics, since immersive rigs mix lenses.
pub fn immersive_transforms(cameras: &[ImmersiveCamera], scale: u32, frames: u32) -> (TransformsFile, TransformsFile) {
    let cameras: Vec<_> = cameras
        .iter()
        .enumerate()
        .map(|(idx, cam)| CameraFrames {
            name: cam.name(idx),
            transform: cam.world_to_camera(),
            intrinsics: Some(cam.intrinsics().downsampled(scale)),
            frames,
        })
        .collect();
    split_transforms(&cameras, None)
}

pub async fn convert_immersive(config: &ConvertConfig) -> Result<()> {
    let dir = PathBuf::from(&config.path);
    let models: Vec<ImmersiveCamera> = serde_json::from_slice(&tokio::fs::read(dir.join("models.json")).await?)?;
    if models.is_empty() {
        return Err(ConvertError::InvalidInput("models.json lists no cameras".to_owned()));
    }

    let frames = config.end.unwrap_or(DEFAULT_FRAMES);
    let (train, test) = immersive_transforms(&models, config.scale, frames);
    info!("Converting {} immersive cameras", models.len());
    warn!("Immersive videos are fisheye, frames are extracted without undistortion");

    let ffmpeg = FrameExtractor::new(&config.ffmpeg);
    futures::stream::iter(models.iter().enumerate())
        .map(|(idx, cam)| {
            let name = cam.name(idx);
            let video = dir.join(format!("{name}.mp4"));
            let out_dir = dir.join(&name).join("images");
            let ffmpeg = &ffmpeg;
            async move { ffmpeg.extract(&video, &out_dir, config.scale, frames).await }
        })
        .buffer_unordered(config.parallelism())
        .try_collect::<Vec<_>>()
        .await?;

    write_transforms(&dir, &train, &test).await
}

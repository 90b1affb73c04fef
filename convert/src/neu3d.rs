//! Neu3D (DyNeRF) captures: one `camXX.mp4` per camera and LLFF poses in `poses_bounds.npy`.

use std::path::{Path, PathBuf};
use futures::{StreamExt, TryStreamExt};
use glam::{Mat4, Vec3};
use log::info;
use dataset::{parse_npy, NpyArray};
use crate::config::ConvertConfig;
use crate::error::{ConvertError, Result};
use crate::ffmpeg::FrameExtractor;
use crate::transforms::{split_transforms, write_transforms, CameraFrames, Intrinsics, TransformsFile};
use crate::list_files;

pub const DEFAULT_FRAMES: u32 = 300;

/// Converts one `poses_bounds.npy` row into an OpenGL camera-to-world matrix and the
/// full resolution intrinsics.
///
/// LLFF stores a 3x5 matrix `[R | t | hwf]` with camera axes `[down, right, back]`.
pub fn llff_to_opengl(row: &[f64]) -> Result<(Mat4, Intrinsics)> {
    if row.len() < 15 {
        return Err(ConvertError::InvalidInput(format!(
            "LLFF pose needs 15 values, got {}",
            row.len()
        )));
    }
    let col = |c: usize| Vec3::new(row[c] as f32, row[5 + c] as f32, row[10 + c] as f32);
    let [down, right, back, t, hwf] = [col(0), col(1), col(2), col(3), col(4)];

    let cam_to_world = Mat4::from_cols(
        right.extend(0.0),
        (-down).extend(0.0),
        back.extend(0.0),
        t.extend(1.0),
    );
    let (h, w, f) = (hwf.x, hwf.y, hwf.z);
    let intrinsics = Intrinsics {
        fl_x: f,
        fl_y: f,
        cx: w / 2.0,
        cy: h / 2.0,
        w: w as u32,
        h: h as u32,
    };
    Ok((cam_to_world, intrinsics))
}

/// Train and test transforms for cameras named like their videos, in pose order.
pub fn neu3d_transforms(
    poses: &NpyArray,
    names: &[String],
    scale: u32,
    frames: u32,
) -> Result<(TransformsFile, TransformsFile)> {
    let rows: Vec<_> = poses.rows(17)?.collect();
    if rows.len() != names.len() {
        return Err(ConvertError::InvalidInput(format!(
            "{} poses for {} videos",
            rows.len(),
            names.len()
        )));
    }

    let mut shared = None;
    let mut cameras = Vec::with_capacity(rows.len());
    for (row, name) in rows.into_iter().zip(names) {
        let (transform, intrinsics) = llff_to_opengl(row)?;
        shared.get_or_insert(intrinsics.downsampled(scale));
        cameras.push(CameraFrames {
            name: name.clone(),
            transform,
            intrinsics: None,
            frames,
        });
    }
    Ok(split_transforms(&cameras, shared))
}

pub async fn convert_neu3d(config: &ConvertConfig) -> Result<()> {
    let dir = PathBuf::from(&config.path);
    let poses = parse_npy(&tokio::fs::read(dir.join("poses_bounds.npy")).await?)?;

    let videos: Vec<PathBuf> = list_files(&dir, "mp4")
        .await?
        .into_iter()
        .filter(|v| stem(v).starts_with("cam"))
        .collect();
    let names: Vec<String> = videos.iter().map(|v| stem(v)).collect();
    let frames = config.end.unwrap_or(DEFAULT_FRAMES);
    let (train, test) = neu3d_transforms(&poses, &names, config.scale, frames)?;
    info!("Converting {} Neu3D cameras", names.len());

    let ffmpeg = FrameExtractor::new(&config.ffmpeg);
    futures::stream::iter(videos.iter().zip(&names))
        .map(|(video, name)| {
            let out_dir = dir.join(name).join("images");
            let ffmpeg = &ffmpeg;
            async move { ffmpeg.extract(video, &out_dir, config.scale, frames).await }
        })
        .buffer_unordered(config.parallelism())
        .try_collect::<Vec<_>>()
        .await?;

    write_transforms(&dir, &train, &test).await
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

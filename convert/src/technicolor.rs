//! Technicolor light field captures: undistorted PNG frames per camera and
//! `cameras_parameters.txt` with one calibrated camera per line.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use futures::{StreamExt, TryStreamExt};
use glam::{Mat4, Quat, Vec3};
use image::imageops::FilterType;
use log::info;
use crate::config::ConvertConfig;
use crate::error::{ConvertError, Result};
use crate::list_files;
use crate::transforms::{split_transforms, write_transforms, CameraFrames, Intrinsics};

pub const DEFAULT_FRAMES: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TechnicolorCamera {
    pub focal: f32,
    pub u0: f32,
    pub v0: f32,
    pub aspect_ratio: f32,
    pub skew: f32,
    /// World-to-camera rotation.
    pub rotation: Quat,
    /// World-to-camera translation.
    pub translation: Vec3,
}

impl TechnicolorCamera {
    pub fn world_to_camera(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation.normalize(), self.translation)
    }

    pub fn intrinsics(&self, width: u32, height: u32) -> Intrinsics {
        Intrinsics {
            fl_x: self.focal,
            fl_y: self.focal * self.aspect_ratio,
            cx: self.u0,
            cy: self.v0,
            w: width,
            h: height,
        }
    }
}

/// Parses lines of `f u0 v0 ar sk qw qx qy qz tx ty tz`. Lines that are not twelve
/// numbers, like the column header, are skipped.
pub fn parse_camera_parameters(text: &str) -> Vec<TechnicolorCamera> {
    text.lines()
        .filter_map(|line| {
            let values: Vec<f32> = line
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            let [focal, u0, v0, aspect_ratio, skew, qw, qx, qy, qz, tx, ty, tz] = values[..] else {
                return None;
            };
            Some(TechnicolorCamera {
                focal,
                u0,
                v0,
                aspect_ratio,
                skew,
                rotation: Quat::from_xyzw(qx, qy, qz, qw),
                translation: Vec3::new(tx, ty, tz),
            })
        })
        .collect()
}

/// Frame and camera number of `<scene>_undist_<FFFFF>_<CC>.png`.
pub fn parse_frame_name(file_name: &str) -> Option<(u32, u32)> {
    let stem = file_name.strip_suffix(".png")?;
    let mut parts = stem.rsplit('_');
    let cam = parts.next()?.parse().ok()?;
    let frame = parts.next()?.parse().ok()?;
    (parts.next()? == "undist").then_some((frame, cam))
}

async fn resize_frame(src: PathBuf, dst: PathBuf, scale: u32) -> Result<(u32, u32)> {
    tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
        let img = image::open(&src)?;
        let (w, h) = (img.width(), img.height());
        let img = if scale > 1 {
            img.resize_exact(w / scale, h / scale, FilterType::Lanczos3)
        } else {
            img
        };
        img.save(&dst)?;
        Ok((w, h))
    })
    .await
    .map_err(|e| ConvertError::Io(e.into()))?
}

pub async fn convert_technicolor(config: &ConvertConfig) -> Result<()> {
    let dir = PathBuf::from(&config.path);
    let params = parse_camera_parameters(&tokio::fs::read_to_string(dir.join("cameras_parameters.txt")).await?);

    let mut by_camera: BTreeMap<u32, BTreeMap<u32, PathBuf>> = BTreeMap::new();
    for path in list_files(&dir, "png").await? {
        let Some((frame, cam)) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_frame_name)
        else {
            continue;
        };
        by_camera.entry(cam).or_default().insert(frame, path);
    }
    if by_camera.is_empty() {
        return Err(ConvertError::InvalidInput(format!(
            "No undistorted frames in {}",
            dir.display()
        )));
    }

    let selected: Vec<u32> = by_camera
        .values()
        .flat_map(|frames| frames.keys().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(config.end.unwrap_or(DEFAULT_FRAMES) as usize)
        .collect();
    info!(
        "Converting {} technicolor cameras with {} frames",
        by_camera.len(),
        selected.len()
    );

    let mut cameras = Vec::with_capacity(by_camera.len());
    for (cam, frames) in &by_camera {
        let calib = params.get(*cam as usize).ok_or_else(|| {
            ConvertError::InvalidInput(format!("No calibration for camera {cam}"))
        })?;
        let name = format!("cam{cam:02}");
        let out_dir = dir.join(&name).join("images");
        tokio::fs::create_dir_all(&out_dir).await?;

        let mut jobs = Vec::with_capacity(selected.len());
        for (rank, frame) in selected.iter().enumerate() {
            let src = frames.get(frame).ok_or_else(|| {
                ConvertError::InvalidInput(format!("Camera {cam} is missing frame {frame}"))
            })?;
            jobs.push((src.clone(), out_dir.join(format!("{rank:04}.png"))));
        }

        let sizes: Vec<(u32, u32)> = futures::stream::iter(jobs)
            .map(|(src, dst)| resize_frame(src, dst, config.scale))
            .buffered(config.parallelism())
            .try_collect()
            .await?;
        let (w, h) = sizes.first().copied().unwrap_or_default();

        cameras.push(CameraFrames {
            name,
            transform: calib.world_to_camera(),
            intrinsics: Some(calib.intrinsics(w, h).downsampled(config.scale)),
            frames: selected.len() as u32,
        });
    }

    let (train, test) = split_transforms(&cameras, None);
    write_transforms(&dir, &train, &test).await
}

#[cfg(test)]
mod tests {
    use std::fs;
    use image::RgbImage;
    use super::*;

    #[test]
    fn parameter_lines_skip_header() {
        let text = "f u0 v0 ar sk qw qx qy qz tx ty tz\n\
                    1000 640 400 1.0 0 1 0 0 0 0.1 0.2 0.3\n\
                    \n\
                    900 640 400 1.02 0 0.7071068 0 0.7071068 0 -0.1 0 0\n";
        let cams = parse_camera_parameters(text);
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[0].translation, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(cams[0].rotation, Quat::IDENTITY);
        assert!((cams[1].intrinsics(10, 10).fl_y - 918.0).abs() < 1e-3);
    }

    #[test]
    fn frame_names() {
        assert_eq!(parse_frame_name("Birthday_undist_00151_03.png"), Some((151, 3)));
        assert_eq!(parse_frame_name("Birthday_00151_03.png"), None);
        assert_eq!(parse_frame_name("Birthday_undist_00151_03.jpg"), None);
    }

    #[tokio::test]
    async fn frames_are_resized_and_renumbered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("technicolor").join("Train");
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join("cameras_parameters.txt"),
            "1000 32 16 1 0 1 0 0 0 0 0 0\n1000 32 16 1 0 1 0 0 0 1 0 0\n",
        )
        .unwrap();
        for cam in 0..2 {
            for frame in [151, 152, 153] {
                RgbImage::new(64, 32)
                    .save(root.join(format!("Train_undist_{frame:05}_{cam:02}.png")))
                    .unwrap();
            }
        }

        let config = ConvertConfig::new(root.display().to_string())
            .with_scale(2)
            .with_end(Some(2));
        convert_technicolor(&config).await.unwrap();

        let out = image::open(root.join("cam01/images/0001.png")).unwrap();
        assert_eq!((out.width(), out.height()), (32, 16));
        assert!(!root.join("cam01/images/0002.png").exists());

        let fs = scene_source::Filesystem::from_dir(&root).unwrap();
        let load = dataset::LoadConfig::new().with_eval(true);
        let scene = dataset::read_multiview_scene(&fs, &root, &load).await.unwrap();
        assert_eq!((scene.train.len(), scene.test.len()), (2, 2));
        assert_eq!(scene.train[0].width, 32);
        assert!((scene.train[1].fid - (1.0 / 30.0) / (10.0 / 6.0)).abs() < 1e-6);
        assert_eq!(scene.train[0].translation, Vec3::new(1.0, 0.0, 0.0));
    }
}

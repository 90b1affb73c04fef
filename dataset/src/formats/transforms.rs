use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::{StreamExt, TryStreamExt};
use glam::Mat4;
use log::{info, warn};
use path_clean::PathClean;
use scene_source::Filesystem;
use serde::Deserialize;
use crate::camera::{focal_to_fov, fov_to_focal, CameraInfo};
use crate::config::LoadConfig;
use crate::error::FormatError;
use crate::formats::{load_point_cloud, read_json, read_masks, store_point_cloud};
use crate::image_file::{composite_background, image_dimensions, load_image};
use crate::normalization::nerfpp_norm;
use crate::point_cloud::PointCloud;
use crate::{Dataset, SceneKind};

const RANDOM_POINTS: usize = 100_000;
const RANDOM_POINTS_EXTENT: f32 = 1.3;

/// Capture setup a transforms file was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformsKind {
    Blender,
    Neu3d,
    Technicolor,
    Immersive,
}

impl TransformsKind {
    /// Length in seconds that frame times are normalized by. Blender scenes keep raw times.
    pub fn duration(&self) -> Option<f32> {
        match self {
            Self::Blender => None,
            Self::Neu3d | Self::Immersive => Some(10.0),
            // Technicolor frames are subsampled during conversion.
            Self::Technicolor => Some(10.0 / 6.0),
        }
    }

    /// Whether `transform_matrix` holds world-to-camera instead of OpenGL camera-to-world.
    fn stores_world_to_camera(&self) -> bool {
        matches!(self, Self::Technicolor | Self::Immersive)
    }
}

#[derive(Debug, Deserialize)]
struct TransformsFile {
    camera_angle_x: Option<f64>,
    fl_x: Option<f64>,
    fl_y: Option<f64>,
    cx: Option<f64>,
    cy: Option<f64>,
    w: Option<f64>,
    h: Option<f64>,
    frames: Vec<Frame>,
}

#[derive(Debug, Clone, Deserialize)]
struct Frame {
    file_path: String,
    #[serde(default)]
    time: f32,
    transform_matrix: [[f32; 4]; 4],
    fl_x: Option<f64>,
    fl_y: Option<f64>,
    w: Option<f64>,
    h: Option<f64>,
}

impl Frame {
    fn file_name(&self) -> &str {
        self.file_path.rsplit('/').next().unwrap_or(&self.file_path)
    }

    /// Frame number from the last four characters of the file name.
    fn frame_number(&self) -> Result<u32, FormatError> {
        let name = self.file_name();
        let start = name.char_indices().rev().nth(3).map(|(i, _)| i).unwrap_or(0);
        name[start..].parse().map_err(|_| {
            FormatError::InvalidCamera(format!("No frame number in '{}'", self.file_path))
        })
    }

    fn matrix(&self) -> Mat4 {
        // Stored row-major.
        Mat4::from_cols_array_2d(&self.transform_matrix).transpose()
    }
}

fn detect_kind(contents: &TransformsFile, scene_path: &Path) -> TransformsKind {
    if contents.camera_angle_x.is_some() {
        TransformsKind::Blender
    } else if contents.fl_x.is_some()
        && contents.fl_y.is_some()
        && contents.cx.is_some()
        && contents.cy.is_some()
    {
        TransformsKind::Neu3d
    } else if scene_path.to_string_lossy().contains("technicolor") {
        TransformsKind::Technicolor
    } else {
        TransformsKind::Immersive
    }
}

/// Reads every frame of a transforms file into a camera, in file order.
pub async fn read_cameras_from_transforms(
    fs: &Filesystem,
    scene_path: &Path,
    transforms_file: &str,
    config: &LoadConfig,
) -> Result<Vec<CameraInfo>, FormatError> {
    let contents: TransformsFile = read_json(fs, Path::new(transforms_file)).await?;
    let kind = detect_kind(&contents, scene_path);
    info!("Reading {transforms_file} as a {kind:?} dataset");

    let reader = FrameReader {
        fs,
        contents: &contents,
        kind,
        config,
    };
    let cameras: Vec<Option<CameraInfo>> = futures::stream::iter(contents.frames.iter().enumerate())
        .map(|(idx, frame)| reader.read(idx, frame))
        .buffered(config.parallelism())
        .try_collect()
        .await?;

    let cameras: Vec<_> = cameras.into_iter().flatten().collect();
    info!("{} images loaded.", cameras.len());
    Ok(cameras)
}

struct FrameReader<'a> {
    fs: &'a Filesystem,
    contents: &'a TransformsFile,
    kind: TransformsKind,
    config: &'a LoadConfig,
}

impl FrameReader<'_> {
    /// `None` when the frame lies past the configured end frame.
    async fn read(&self, idx: usize, frame: &Frame) -> Result<Option<CameraInfo>, FormatError> {
        let mut time = frame.time;
        if let Some(duration) = self.kind.duration() {
            match self.config.end_frame {
                Some(end_frame) => {
                    time /= (end_frame as f32 / 300.0) * 10.0;
                    if frame.frame_number()? > end_frame {
                        return Ok(None);
                    }
                }
                None => time /= duration,
            }
        }

        let image_path = PathBuf::from(format!("{}{}", frame.file_path, self.config.extension)).clean();
        let image_name = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (image, width, height) = if self.config.load_image_on_the_fly {
            let (w, h) = self.lazy_size(frame, &image_path).await?;
            (None, w, h)
        } else {
            let img = load_image(self.fs, &image_path).await?;
            let img = composite_background(img, self.config.white_background);
            let (w, h) = (img.width(), img.height());
            (Some(Arc::new(img)), w, h)
        };

        let (fov_x, fov_y) = match self.kind {
            TransformsKind::Blender => {
                let fov_x = self.contents.camera_angle_x.unwrap_or_default();
                (fov_x, focal_to_fov(fov_to_focal(fov_x, width), height))
            }
            TransformsKind::Neu3d => {
                let (fx, fy) = both(self.contents.fl_x, self.contents.fl_y, "fl_x/fl_y")?;
                (focal_to_fov(fx, width), focal_to_fov(fy, height))
            }
            TransformsKind::Technicolor | TransformsKind::Immersive => {
                let (fx, fy) = both(frame.fl_x, frame.fl_y, "per frame fl_x/fl_y")?;
                (focal_to_fov(fx, width), focal_to_fov(fy, height))
            }
        };

        let mask_file = format!("{}.pt", frame.file_name());
        let mask_path = match self.kind {
            TransformsKind::Blender => {
                let split_dir = frame.file_path.rsplit('/').nth(1).unwrap_or("");
                Path::new(split_dir).join("masks").join(mask_file)
            }
            _ => Path::new("masks").join(mask_file),
        };
        let (masks, mask_path) = read_masks(self.fs, &mask_path, self.config).await?;

        let mut camera = CameraInfo {
            uid: idx,
            rotation: glam::Mat3::IDENTITY,
            translation: glam::Vec3::ZERO,
            fov_x,
            fov_y,
            image,
            image_path,
            image_name,
            width,
            height,
            masks,
            mask_path,
            fid: time,
        };

        if self.kind.stores_world_to_camera() {
            camera.set_world_to_camera(frame.matrix());
        } else {
            // OpenGL axes (Y up, Z back) to colmap axes (Y down, Z forward).
            let mut cam_to_world = frame.matrix();
            cam_to_world.y_axis = -cam_to_world.y_axis;
            cam_to_world.z_axis = -cam_to_world.z_axis;
            camera.set_camera_to_world(cam_to_world);
        }

        Ok(Some(camera))
    }

    async fn lazy_size(&self, frame: &Frame, image_path: &Path) -> Result<(u32, u32), FormatError> {
        match (frame.w.or(self.contents.w), frame.h.or(self.contents.h)) {
            (Some(w), Some(h)) => Ok((w as u32, h as u32)),
            _ => {
                let dim = image_dimensions(self.fs, image_path).await?;
                Ok((dim.x, dim.y))
            }
        }
    }
}

fn both(x: Option<f64>, y: Option<f64>, what: &str) -> Result<(f64, f64), FormatError> {
    x.zip(y)
        .ok_or_else(|| FormatError::InvalidCamera(format!("Missing {what}")))
}

/// Multi-view capture described by `transforms_train.json` and `transforms_test.json`.
pub async fn read_multiview_scene(fs: &Filesystem, scene_path: &Path, config: &LoadConfig) -> Result<Dataset, FormatError> {
    info!("Reading Training Transforms");
    let mut train = read_cameras_from_transforms(fs, scene_path, "transforms_train.json", config).await?;
    let mut test = if fs.exists(Path::new("transforms_test.json")) {
        info!("Reading Test Transforms");
        read_cameras_from_transforms(fs, scene_path, "transforms_test.json", config).await?
    } else {
        warn!("No transforms_test.json, scene has no test cameras");
        vec![]
    };

    if !config.eval {
        train.append(&mut test);
    }

    let normalization = nerfpp_norm(&mut train, false);

    let ply_path = PathBuf::from("points3d.ply");
    let point_cloud = if fs.exists(&ply_path) {
        load_point_cloud(fs, &ply_path).await
    } else {
        // Without sfm points, start from random points inside the synthetic scene bounds.
        info!("Generating random point cloud ({RANDOM_POINTS})...");
        let cloud = PointCloud::random(RANDOM_POINTS, RANDOM_POINTS_EXTENT, &mut rand::rng());
        store_point_cloud(fs, &ply_path, &cloud).await?;
        Some(cloud)
    };

    Ok(Dataset {
        kind: SceneKind::MultiView,
        train,
        test,
        normalization,
        point_cloud,
        ply_path,
    })
}

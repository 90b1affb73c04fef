mod point;
mod image;
mod camera;
mod input;
mod parse;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::{StreamExt, TryStreamExt};
use log::{debug, info, warn};
use scene_source::Filesystem;
use crate::camera::{focal_to_fov, CameraInfo};
use crate::config::LoadConfig;
use crate::error::FormatError;
use crate::formats::colmap::input::{InputFile, InputType};
use crate::formats::{load_point_cloud, read_masks, store_point_cloud};
use crate::image_file::{image_dimensions, load_image};
use crate::normalization::nerfpp_norm;
use crate::point_cloud::PointCloud;
use crate::{Dataset, SceneKind};

pub use camera::{Camera, CameraModel};
pub use self::image::Image;
pub use point::Point3D;

/// Intrinsics and registered images of one sparse reconstruction.
pub struct ColmapModel {
    pub cameras: HashMap<i32, Camera>,
    pub images: HashMap<i32, Image>,
}

/// Reads `cameras` and `images` from a sparse model directory, preferring the binary files.
pub async fn read_model(fs: &Filesystem, sparse_dir: &Path) -> Result<ColmapModel, FormatError> {
    match read_model_files(fs, sparse_dir, true).await {
        Ok(model) => Ok(model),
        Err(bin_err) => {
            debug!("Binary colmap model unusable ({bin_err}), trying text files");
            read_model_files(fs, sparse_dir, false).await
        }
    }
}

async fn read_model_files(fs: &Filesystem, sparse_dir: &Path, is_bin: bool) -> Result<ColmapModel, FormatError> {
    let ext = if is_bin { "bin" } else { "txt" };
    let cam_path = sparse_dir.join(format!("cameras.{ext}"));
    let img_path = sparse_dir.join(format!("images.{ext}"));

    let cam_file = fs.reader_at_path(&cam_path).await?;
    let cameras = InputFile::new(cam_file, InputType::Cameras, is_bin)
        .parse()
        .await?
        .as_cameras()
        .ok_or_else(|| FormatError::Io(format!("No cameras in {}", cam_path.display())))?;
    let img_file = fs.reader_at_path(&img_path).await?;
    let images = InputFile::new(img_file, InputType::Images, is_bin)
        .parse()
        .await?
        .as_images()
        .ok_or_else(|| FormatError::Io(format!("No images in {}", img_path.display())))?;

    info!("Located colmap model at: {}", sparse_dir.display());
    Ok(ColmapModel { cameras, images })
}

/// Reads the sparse points of a model directory, preferring `points3D.bin`.
pub async fn read_points(fs: &Filesystem, sparse_dir: &Path) -> Result<PointCloud, FormatError> {
    let bin_path = sparse_dir.join("points3D.bin");
    let txt_path = sparse_dir.join("points3D.txt");
    let (path, is_bin) = if fs.exists(&bin_path) {
        (bin_path, true)
    } else {
        (txt_path, false)
    };

    let file = fs.reader_at_path(&path).await?;
    let points = InputFile::new(file, InputType::Points3D, is_bin)
        .parse()
        .await?
        .as_points()
        .ok_or_else(|| FormatError::Io(format!("No points in {}", path.display())))?;

    // Keep colmap's id order so repeated conversions give the same file.
    let mut points: Vec<_> = points.into_iter().collect();
    points.sort_by_key(|(id, _)| *id);

    let (xyz, rgb) = points
        .into_iter()
        .map(|(_, p)| {
            let color = glam::vec3(p.rgb[0] as f32, p.rgb[1] as f32, p.rgb[2] as f32) / 255.0;
            (p.xyz, color)
        })
        .unzip();
    Ok(PointCloud::new(xyz, rgb))
}

/// Turns registered colmap images into cameras, ordered by image id.
///
/// `mask_root` is the directory holding the `masks` folder.
pub async fn read_colmap_cameras(
    fs: &Filesystem,
    model: &ColmapModel,
    images_folder: &Path,
    mask_root: &Path,
    config: &LoadConfig,
) -> Result<Vec<CameraInfo>, FormatError> {
    let mut images: Vec<_> = model.images.iter().collect();
    images.sort_by_key(|(id, _)| **id);
    let num_frames = images.len();

    let mut static_warned = false;
    let mut pending = Vec::with_capacity(num_frames);
    for (idx, (_, extr)) in images.into_iter().enumerate() {
        let intr = model.cameras.get(&extr.camera_id).ok_or_else(|| {
            FormatError::InvalidCamera(format!(
                "Image {} references missing camera {}",
                extr.name, extr.camera_id
            ))
        })?;
        if !intr.model.is_supported() {
            return Err(FormatError::UnsupportedCameraModel(intr.model.name().to_owned()));
        }

        let file_name = Path::new(&extr.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| extr.name.clone());
        let image_name = file_name.split('.').next().unwrap_or_default().to_owned();

        let fid = match image_name.parse::<i64>() {
            Ok(frame) if num_frames > 1 => frame as f32 / (num_frames - 1) as f32,
            Ok(_) => 0.0,
            Err(_) => {
                if !static_warned {
                    warn!("Image names are not frame numbers, assuming a static scene");
                    static_warned = true;
                }
                0.0
            }
        };

        pending.push(ColmapView {
            idx,
            intr: intr.clone(),
            rotation: glam::Mat3::from_quat(extr.quat).transpose(),
            translation: extr.tvec,
            image_path: images_folder.join(&file_name),
            mask_path: mask_root.join("masks").join(format!("{image_name}.pt")),
            image_name,
            fid,
        });
    }

    futures::stream::iter(pending)
        .map(|view| view.into_camera(fs, num_frames, config))
        .buffered(config.parallelism())
        .try_collect()
        .await
}

struct ColmapView {
    idx: usize,
    intr: Camera,
    rotation: glam::Mat3,
    translation: glam::Vec3,
    image_path: PathBuf,
    mask_path: PathBuf,
    image_name: String,
    fid: f32,
}

impl ColmapView {
    async fn into_camera(self, fs: &Filesystem, total: usize, config: &LoadConfig) -> Result<CameraInfo, FormatError> {
        info!("Reading camera {}/{}", self.idx + 1, total);

        let mut width = self.intr.width as u32;
        let mut height = self.intr.height as u32;
        let mut image = None;

        // The image on disk wins over the intrinsics, it may have been resized.
        if fs.exists(&self.image_path) {
            if config.load_image_on_the_fly {
                let dim = image_dimensions(fs, &self.image_path).await?;
                (width, height) = (dim.x, dim.y);
            } else {
                let img = load_image(fs, &self.image_path).await?;
                (width, height) = (img.width(), img.height());
                image = Some(Arc::new(img));
            }
        } else {
            warn!("Image not found: {}", self.image_path.display());
        }

        let (fx, fy) = self.intr.focal();
        let (masks, mask_path) = read_masks(fs, &self.mask_path, config).await?;

        Ok(CameraInfo {
            uid: self.intr.id as usize,
            rotation: self.rotation,
            translation: self.translation,
            fov_x: focal_to_fov(fx, width),
            fov_y: focal_to_fov(fy, height),
            image,
            image_path: self.image_path,
            image_name: self.image_name,
            width,
            height,
            masks,
            mask_path,
            fid: self.fid,
        })
    }
}

/// Static colmap scene with a `sparse/0` model and an image folder.
pub async fn read_colmap_scene(fs: &Filesystem, config: &LoadConfig) -> Result<Dataset, FormatError> {
    let sparse_dir = Path::new("sparse/0");
    let model = read_model(fs, sparse_dir).await?;

    let images_folder = PathBuf::from(&config.images);
    debug!("Reading images from {}", images_folder.display());
    let mut cameras = read_colmap_cameras(fs, &model, &images_folder, Path::new(""), config).await?;
    cameras.sort_by(|a, b| a.image_name.cmp(&b.image_name));

    let (mut train, test): (Vec<_>, Vec<_>) = if config.eval {
        let hold = config.llffhold.max(1);
        let (test, train): (Vec<_>, Vec<_>) = cameras
            .into_iter()
            .enumerate()
            .partition(|(idx, _)| idx % hold == 0);
        (
            train.into_iter().map(|(_, c)| c).collect(),
            test.into_iter().map(|(_, c)| c).collect(),
        )
    } else {
        (cameras, vec![])
    };

    let normalization = nerfpp_norm(&mut train, false);

    let ply_path = sparse_dir.join("points3D.ply");
    let point_cloud = if fs.exists(&ply_path) {
        load_point_cloud(fs, &ply_path).await
    } else {
        info!("Converting points3D to .ply, will happen only the first time you open the scene.");
        let cloud = read_points(fs, sparse_dir).await?;
        store_point_cloud(fs, &ply_path, &cloud).await?;
        Some(cloud)
    };

    Ok(Dataset {
        kind: SceneKind::Colmap,
        train,
        test,
        normalization,
        point_cloud,
        ply_path,
    })
}

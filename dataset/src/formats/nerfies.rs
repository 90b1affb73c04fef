//! Nerfies, HyperNeRF and NeRF-DS captures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::{StreamExt, TryStreamExt};
use glam::{Mat3, UVec2, Vec2, Vec3};
use log::info;
use path_clean::PathClean;
use rand::Rng;
use scene_source::Filesystem;
use serde::Deserialize;
use crate::camera::{focal_to_fov, CameraInfo};
use crate::config::LoadConfig;
use crate::error::FormatError;
use crate::formats::colmap::{read_colmap_cameras, read_model, read_points};
use crate::formats::npy::{parse_npy, read_npz_entry, write_npz, NpyArray};
use crate::formats::{load_point_cloud, read_json, read_masks, store_point_cloud, write_cache};
use crate::image_file::{image_dimensions, load_image};
use crate::normalization::{apply_normalization, nerfpp_norm, translate_cameras};
use crate::point_cloud::PointCloud;
use crate::sh::sh_to_rgb;
use crate::{Dataset, SceneKind};

#[derive(Debug, Deserialize)]
struct SceneFile {
    scale: f32,
    center: [f32; 3],
}

#[derive(Debug, Deserialize)]
struct FrameMeta {
    time_id: f64,
}

#[derive(Debug, Deserialize)]
struct DatasetFile {
    ids: Vec<String>,
    #[serde(default)]
    train_ids: Vec<String>,
    #[serde(default)]
    val_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CameraFile {
    orientation: [[f32; 3]; 3],
    position: [f32; 3],
    focal_length: f32,
    principal_point: [f32; 2],
    #[serde(default)]
    skew: f32,
    #[serde(default = "one")]
    pixel_aspect_ratio: f32,
    #[serde(default)]
    radial_distortion: Vec<f32>,
    #[serde(default, alias = "tangential")]
    tangential_distortion: Vec<f32>,
    image_size: [f32; 2],
}

fn one() -> f32 {
    1.0
}

/// A nerfies camera, with intrinsics scaled to the resolution that is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct NerfiesCamera {
    /// World-to-camera rotation.
    pub orientation: Mat3,
    /// Camera center in world space.
    pub position: Vec3,
    pub focal_length: f32,
    pub principal_point: Vec2,
    pub skew: f32,
    pub pixel_aspect_ratio: f32,
    pub radial_distortion: Vec<f32>,
    pub tangential_distortion: Vec<f32>,
    pub image_size: UVec2,
}

pub async fn camera_nerfies_from_json(fs: &Filesystem, path: &Path, scale: f32) -> Result<NerfiesCamera, FormatError> {
    let camera: CameraFile = read_json(fs, path).await?;
    Ok(NerfiesCamera {
        // Rows on disk.
        orientation: Mat3::from_cols_array_2d(&camera.orientation).transpose(),
        position: Vec3::from_array(camera.position),
        focal_length: camera.focal_length * scale,
        principal_point: Vec2::from_array(camera.principal_point) * scale,
        skew: camera.skew,
        pixel_aspect_ratio: camera.pixel_aspect_ratio,
        radial_distortion: camera.radial_distortion,
        tangential_distortion: camera.tangential_distortion,
        image_size: UVec2::new(
            (camera.image_size[0] * scale).round_ties_even() as u32,
            (camera.image_size[1] * scale).round_ties_even() as u32,
        ),
    })
}

/// Capture family, told apart by the name of the directory holding the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Vrig,
    NerfDs,
    Interp,
    Misc,
}

impl CaptureKind {
    pub fn from_dir_name(name: &str) -> Self {
        if name.starts_with("vrig") {
            Self::Vrig
        } else if name.starts_with("NeRF") {
            Self::NerfDs
        } else if name.starts_with("interp") {
            Self::Interp
        } else {
            Self::Misc
        }
    }
}

/// Image ids in load order, how many of them are training views, and the image scale.
struct Split {
    ids: Vec<String>,
    train_num: usize,
    ratio: f32,
}

impl Split {
    fn new(kind: CaptureKind, dataset: &DatasetFile, colmap: bool) -> Self {
        let every_fourth = |start: usize| -> Vec<String> {
            dataset.ids.iter().skip(start).step_by(4).cloned().collect()
        };

        let (train, val, ratio) = match kind {
            CaptureKind::Vrig => (dataset.train_ids.clone(), dataset.val_ids.clone(), 0.25),
            CaptureKind::NerfDs => (
                dataset.train_ids.clone(),
                dataset.val_ids.clone(),
                if colmap { 1.0 } else { 0.5 },
            ),
            CaptureKind::Interp => (every_fourth(0), every_fourth(2), 0.5),
            // Colmap reconstructions of misc captures only cover the training views.
            CaptureKind::Misc if colmap => (every_fourth(0), vec![], 0.5),
            CaptureKind::Misc => (every_fourth(0), every_fourth(2), 0.5),
        };

        let train_num = train.len();
        let mut ids = train;
        ids.extend(val);
        Self { ids, train_num, ratio }
    }

    fn image_dir(&self) -> PathBuf {
        Path::new("rgb").join(format!("{}x", (1.0 / self.ratio) as u32))
    }
}

async fn read_times(fs: &Filesystem, ids: &[String]) -> Result<Vec<f32>, FormatError> {
    let meta: HashMap<String, FrameMeta> = read_json(fs, Path::new("metadata.json")).await?;
    let time_ids = ids
        .iter()
        .map(|id| {
            meta.get(id)
                .map(|m| m.time_id)
                .ok_or_else(|| FormatError::InvalidCamera(format!("No metadata for image {id}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let max_time = time_ids.iter().copied().fold(0.0, f64::max);
    let max_time = if max_time > 0.0 { max_time } else { 1.0 };
    Ok(time_ids.into_iter().map(|t| (t / max_time) as f32).collect())
}

/// Scene name used to pick the split, i.e. the name of the directory above the scene.
fn capture_kind(scene_path: &Path) -> CaptureKind {
    let name = scene_path
        .to_path_buf()
        .clean()
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = CaptureKind::from_dir_name(&name);
    info!("Reading {kind:?} nerfies capture");
    kind
}

async fn read_nerfies_cameras(
    fs: &Filesystem,
    kind: CaptureKind,
    config: &LoadConfig,
) -> Result<(Vec<CameraInfo>, usize, SceneFile), FormatError> {
    let scene: SceneFile = read_json(fs, Path::new("scene.json")).await?;
    let dataset: DatasetFile = read_json(fs, Path::new("dataset.json")).await?;
    let split = Split::new(kind, &dataset, false);
    let times = read_times(fs, &split.ids).await?;

    let view = NerfiesView {
        fs,
        config,
        image_dir: split.image_dir(),
        ratio: split.ratio,
        center: Vec3::from_array(scene.center),
        scale: scene.scale,
    };
    let cameras: Vec<CameraInfo> = futures::stream::iter(split.ids.iter().zip(times).enumerate())
        .map(|(idx, (id, fid))| view.read(idx, id, fid))
        .buffered(config.parallelism())
        .try_collect()
        .await?;

    Ok((cameras, split.train_num, scene))
}

struct NerfiesView<'a> {
    fs: &'a Filesystem,
    config: &'a LoadConfig,
    image_dir: PathBuf,
    ratio: f32,
    center: Vec3,
    scale: f32,
}

impl NerfiesView<'_> {
    async fn read(&self, idx: usize, id: &str, fid: f32) -> Result<CameraInfo, FormatError> {
        let camera_path = Path::new("camera").join(format!("{id}.json"));
        let mut params = camera_nerfies_from_json(self.fs, &camera_path, self.ratio).await?;
        params.position = (params.position - self.center) * self.scale;

        let image_path = self.image_dir.join(format!("{id}.png"));
        let (image, width, height) = if self.config.load_image_on_the_fly {
            let dim = image_dimensions(self.fs, &image_path).await?;
            (None, dim.x, dim.y)
        } else {
            let img = load_image(self.fs, &image_path).await?;
            let (w, h) = (img.width(), img.height());
            (Some(Arc::new(img)), w, h)
        };

        let mask_path = Path::new("masks").join(format!("{id}.pt"));
        let (masks, mask_path) = read_masks(self.fs, &mask_path, self.config).await?;

        Ok(CameraInfo {
            uid: idx,
            rotation: params.orientation.transpose(),
            translation: -(params.orientation * params.position),
            fov_x: focal_to_fov(params.focal_length as f64, width),
            fov_y: focal_to_fov(params.focal_length as f64, height),
            image,
            image_path,
            image_name: id.to_owned(),
            width,
            height,
            masks,
            mask_path,
            fid,
        })
    }
}

fn colmap_sparse_dir(fs: &Filesystem) -> PathBuf {
    let sparse = if fs.dir_exists(Path::new("colmap/sparse")) {
        "sparse"
    } else {
        "colmap_sparse"
    };
    Path::new("colmap").join(sparse).join("0")
}

async fn read_nerfies_colmap_cameras(
    fs: &Filesystem,
    kind: CaptureKind,
    sparse_dir: &Path,
    config: &LoadConfig,
) -> Result<(Vec<CameraInfo>, usize), FormatError> {
    let dataset: DatasetFile = read_json(fs, Path::new("dataset.json")).await?;
    let split = Split::new(kind, &dataset, true);
    let times = read_times(fs, &split.ids).await?;

    let model = read_model(fs, sparse_dir).await?;
    let unsorted = read_colmap_cameras(fs, &model, &split.image_dir(), Path::new(""), config).await?;
    let mut by_name: HashMap<String, CameraInfo> = unsorted
        .into_iter()
        .map(|cam| (cam.image_name.clone(), cam))
        .collect();

    let cameras = split
        .ids
        .iter()
        .zip(times)
        .map(|(id, fid)| {
            let mut cam = by_name.remove(id).ok_or_else(|| {
                FormatError::InvalidCamera(format!("Image {id} is not part of the colmap model"))
            })?;
            cam.fid = fid;
            Ok(cam)
        })
        .collect::<Result<Vec<_>, FormatError>>()?;
    Ok((cameras, split.train_num))
}

/// Nerfies style capture. Scenes with a `colmap` reconstruction are normalized and
/// recentered on their sparse points, the recentering is stored next to the points.
pub async fn read_nerfies_scene(fs: &Filesystem, scene_path: &Path, config: &LoadConfig) -> Result<Dataset, FormatError> {
    let kind = capture_kind(scene_path);
    let use_colmap = fs.dir_exists(Path::new("colmap"));
    let sparse_dir = colmap_sparse_dir(fs);

    let (cameras, train_num, scene) = if use_colmap {
        info!("Using COLMAP for Nerfies!");
        let (cameras, train_num) = read_nerfies_colmap_cameras(fs, kind, &sparse_dir, config).await?;
        (cameras, train_num, None)
    } else {
        let (cameras, train_num, scene) = read_nerfies_cameras(fs, kind, config).await?;
        (cameras, train_num, Some(scene))
    };

    let (mut train, mut test) = if config.eval {
        let mut train = cameras;
        let test = train.split_off(train_num.min(train.len()));
        (train, test)
    } else {
        (cameras, vec![])
    };

    let normalization = nerfpp_norm(&mut train, use_colmap);
    if let Some((translate, radius)) = normalization.applied {
        apply_normalization(&mut test, translate, radius);
    }

    let (ply_path, point_cloud) = match scene {
        None => {
            let ply_path = sparse_dir.join("points3d_recentered.ply");
            let adjustment_path = sparse_dir.join("camera_adjustment.npz");

            if fs.exists(&ply_path) {
                let bytes = fs.read_to_end(&adjustment_path).await?;
                let translate = read_npz_entry(&bytes, "translate")?;
                let translate = match translate.data.as_slice() {
                    [x, y, z] => Vec3::new(*x as f32, *y as f32, *z as f32),
                    _ => return Err(FormatError::InvalidArray("Camera adjustment is not a 3-vector".to_owned())),
                };
                translate_cameras(&mut train, translate);
                translate_cameras(&mut test, translate);
                let cloud = load_point_cloud(fs, &ply_path).await;
                (ply_path, cloud)
            } else {
                info!("Converting points3D to .ply, will happen only the first time you open the scene.");
                let mut cloud = read_points(fs, &sparse_dir).await?;
                if let Some((translate, radius)) = normalization.applied {
                    cloud.translate(translate);
                    cloud.scale(1.0 / radius);
                }
                let center = cloud.mean().unwrap_or(Vec3::ZERO);
                translate_cameras(&mut train, -center);
                translate_cameras(&mut test, -center);
                cloud.translate(-center);

                let adjustment = NpyArray::new(
                    vec![3],
                    (-center).to_array().iter().map(|v| *v as f64).collect(),
                );
                write_cache(fs, &adjustment_path, write_npz(&[("translate", adjustment)])?).await?;
                store_point_cloud(fs, &ply_path, &cloud).await?;
                (ply_path, Some(cloud))
            }
        }
        Some(scene) => {
            let ply_path = PathBuf::from("points3d.ply");
            if fs.exists(&ply_path) {
                let cloud = load_point_cloud(fs, &ply_path).await;
                (ply_path, cloud)
            } else {
                info!("Generating point cloud from nerfies...");
                let points = parse_npy(&fs.read_to_end(Path::new("points.npy")).await?)?;
                let center = Vec3::from_array(scene.center);
                let cloud = {
                    let mut rng = rand::rng();
                    let (xyz, rgb) = points
                        .rows(3)?
                        .map(|p| {
                            let p = Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32);
                            let sh = Vec3::new(rng.random(), rng.random(), rng.random()) / 255.0;
                            ((p - center) * scene.scale, sh_to_rgb(sh))
                        })
                        .unzip();
                    PointCloud::new(xyz, rgb)
                };
                store_point_cloud(fs, &ply_path, &cloud).await?;
                (ply_path, Some(cloud))
            }
        }
    };

    Ok(Dataset {
        kind: SceneKind::Nerfies,
        train,
        test,
        normalization,
        point_cloud,
        ply_path,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use image::RgbImage;
    use serde_json::json;
    use crate::formats::npy::write_npy;
    use super::*;

    fn camera_json(position: [f32; 3]) -> serde_json::Value {
        json!({
            "orientation": [[0, 1, 0], [-1, 0, 0], [0, 0, 1]],
            "position": position,
            "focal_length": 400.0,
            "principal_point": [200.0, 150.0],
            "skew": 0.0,
            "pixel_aspect_ratio": 1.0,
            "radial_distortion": [0.1, 0.0, 0.0],
            "tangential": [0.0, 0.0],
            "image_size": [400, 300],
        })
    }

    /// Writes a vrig capture with four views, two of them for validation.
    fn write_capture(root: &Path) {
        for dir in ["camera", "rgb/4x"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        let ids = ["left_000", "left_001", "right_000", "right_001"];
        fs::write(
            root.join("scene.json"),
            json!({ "scale": 0.5, "center": [1.0, 0.0, 0.0], "near": 0.1, "far": 2.0 }).to_string(),
        )
        .unwrap();
        fs::write(
            root.join("dataset.json"),
            json!({
                "count": 4,
                "ids": ids,
                "train_ids": ["left_000", "left_001"],
                "val_ids": ["right_000", "right_001"],
            })
            .to_string(),
        )
        .unwrap();
        fs::write(
            root.join("metadata.json"),
            json!({
                "left_000": { "time_id": 0, "warp_id": 0, "appearance_id": 0, "camera_id": 0 },
                "left_001": { "time_id": 4, "warp_id": 1, "appearance_id": 1, "camera_id": 0 },
                "right_000": { "time_id": 0, "warp_id": 0, "appearance_id": 0, "camera_id": 1 },
                "right_001": { "time_id": 2, "warp_id": 1, "appearance_id": 1, "camera_id": 1 },
            })
            .to_string(),
        )
        .unwrap();
        for (i, id) in ids.iter().enumerate() {
            fs::write(
                root.join("camera").join(format!("{id}.json")),
                camera_json([1.0 + i as f32, 2.0, 0.0]).to_string(),
            )
            .unwrap();
            RgbImage::new(100, 75).save(root.join("rgb/4x").join(format!("{id}.png"))).unwrap();
        }
        let points = NpyArray::new(vec![2, 3], vec![1.0, 0.0, 0.0, 3.0, 2.0, 0.0]);
        fs::write(root.join("points.npy"), write_npy(&points)).unwrap();
    }

    #[tokio::test]
    async fn camera_json_is_scaled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cam.json"), camera_json([1.0, 2.0, 3.0]).to_string()).unwrap();
        let fs = Filesystem::from_dir(dir.path()).unwrap();

        let cam = camera_nerfies_from_json(&fs, Path::new("cam.json"), 0.25).await.unwrap();
        assert_eq!(cam.focal_length, 100.0);
        assert_eq!(cam.principal_point, Vec2::new(50.0, 37.5));
        assert_eq!(cam.image_size, UVec2::new(100, 75));
        assert_eq!(cam.tangential_distortion, vec![0.0, 0.0]);
        // First row of the stored orientation.
        assert_eq!(cam.orientation.row(0), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn capture_kind_from_parent_dir() {
        assert_eq!(capture_kind(Path::new("data/vrig/broom")), CaptureKind::Vrig);
        assert_eq!(capture_kind(Path::new("data/NeRF-DS/as/")), CaptureKind::NerfDs);
        assert_eq!(capture_kind(Path::new("data/interp/chicken")), CaptureKind::Interp);
        assert_eq!(capture_kind(Path::new("data/misc/split-cookie")), CaptureKind::Misc);
    }

    #[tokio::test]
    async fn vrig_capture_splits_and_recenters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vrig").join("peel-banana");
        fs::create_dir_all(&root).unwrap();
        write_capture(&root);
        let fs = Filesystem::from_dir(&root).unwrap();

        let config = LoadConfig::new().with_eval(true).with_load_image_on_the_fly(true);
        let scene = read_nerfies_scene(&fs, &root, &config).await.unwrap();

        let train: Vec<_> = scene.train.iter().map(|c| c.image_name.as_str()).collect();
        let test: Vec<_> = scene.test.iter().map(|c| c.image_name.as_str()).collect();
        assert_eq!(train, vec!["left_000", "left_001"]);
        assert_eq!(test, vec!["right_000", "right_001"]);
        assert_eq!(scene.train[1].fid, 1.0);
        assert_eq!(scene.test[1].fid, 0.5);
        assert!(scene.normalization.applied.is_none());

        // (p - center) * scale, with the stored orientation as world-to-camera rotation.
        let cam = &scene.train[1];
        assert!((cam.center() - Vec3::new(0.5, 1.0, 0.0)).length() < 1e-5);
        assert!((cam.fov_x - focal_to_fov(100.0, 100)).abs() < 1e-6);
        assert_eq!(cam.image_path, PathBuf::from("rgb/4x/left_001.png"));

        let cloud = scene.point_cloud.unwrap();
        assert_eq!(cloud.points[1], Vec3::new(1.0, 1.0, 0.0));
        assert!(root.join("points3d.ply").is_file());
    }

    #[tokio::test]
    async fn colmap_capture_stores_adjustment() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vrig").join("3dprinter");
        fs::create_dir_all(&root).unwrap();
        write_capture(&root);

        let sparse = root.join("colmap/sparse/0");
        fs::create_dir_all(&sparse).unwrap();
        fs::write(sparse.join("cameras.txt"), "1 SIMPLE_PINHOLE 100 75 100 50 37.5\n").unwrap();
        let images: String = ["left_000", "left_001", "right_000", "right_001"]
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{} 1 0 0 0 {} 0 0 1 {id}.png\n\n", i + 1, -(i as f32)))
            .collect();
        fs::write(sparse.join("images.txt"), images).unwrap();
        fs::write(sparse.join("points3D.txt"), "1 4 0 0 255 255 255 0\n2 6 0 0 0 0 0 0\n").unwrap();

        let fs = Filesystem::from_dir(&root).unwrap();
        let config = LoadConfig::new().with_eval(true).with_load_image_on_the_fly(true);
        let scene = read_nerfies_scene(&fs, &root, &config).await.unwrap();

        assert_eq!(scene.train.len(), 2);
        assert_eq!(scene.train[1].fid, 1.0);
        let (translate, radius) = scene.normalization.applied.unwrap();
        assert!((translate - Vec3::new(-0.5, 0.0, 0.0)).length() < 1e-5);
        assert!((radius - 0.5).abs() < 1e-5);

        // Train centers 0 and 1 normalize to -1 and 1, points to 7 and 11, recentered on 9.
        let cloud = scene.point_cloud.unwrap();
        assert!(cloud.mean().unwrap().length() < 1e-5);
        assert!((scene.train[0].center() - Vec3::new(-10.0, 0.0, 0.0)).length() < 1e-4);
        assert!(sparse.join("camera_adjustment.npz").is_file());

        // A second open reuses the stored recentering.
        let fs = Filesystem::from_dir(&root).unwrap();
        let again = read_nerfies_scene(&fs, &root, &config).await.unwrap();
        assert!((again.train[0].center() - scene.train[0].center()).length() < 1e-4);
        assert!((again.test[1].center() - scene.test[1].center()).length() < 1e-4);
    }
}

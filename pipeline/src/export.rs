use std::path::{Path, PathBuf};
use std::sync::Arc;
use dataset::{composite_background, load_image, target_resolution, CameraEntry, CameraInfo};
use image::DynamicImage;
use image::imageops::FilterType;
use log::{info, warn};
use scene_source::Filesystem;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use crate::error::{PipelineError, Result};
use crate::selection::SegmentSelection;

pub fn view_file_name(idx: usize) -> String {
    format!("{idx:05}.png")
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewEntry {
    pub index: usize,
    pub image_name: String,
    pub fid: f32,
    pub camera: CameraEntry,
    /// Ground truth relative to the split directory, absent for views without an image.
    pub gt: Option<PathBuf>,
    /// Where the renderer writes this view, relative to the split directory.
    pub render: PathBuf,
    pub mask_path: Option<PathBuf>,
}

/// Everything a renderer needs to render one split of a trained model.
#[derive(Debug, Clone, Serialize)]
pub struct RenderManifest {
    pub model_path: PathBuf,
    pub source_path: PathBuf,
    pub split: String,
    pub iteration: u32,
    pub point_cloud: PathBuf,
    pub selection: SegmentSelection,
    pub load2gpu_on_the_fly: bool,
    pub white_background: bool,
    pub views: Vec<ViewEntry>,
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
    Ok(())
}

/// How ground truth images of a split are written.
#[derive(Debug, Clone, Copy)]
pub struct GroundTruthOptions {
    pub resolution: i32,
    pub resolution_scale: f32,
    /// Background alpha is composited over when reading images on the fly, as the
    /// transforms reader does for eagerly loaded views. `None` keeps images as stored.
    pub background: Option<bool>,
    pub multithread_save: bool,
    pub parallelism: usize,
}

/// The view's decoded image, read from the scene when images load on the fly.
async fn ground_truth(
    fs: &Filesystem,
    camera: &CameraInfo,
    background: Option<bool>,
) -> Result<Option<Arc<DynamicImage>>> {
    if let Some(image) = &camera.image {
        return Ok(Some(image.clone()));
    }
    if !fs.exists(&camera.image_path) {
        warn!("No ground truth for {}", camera.image_name);
        return Ok(None);
    }
    let image = load_image(fs, &camera.image_path).await?;
    let image = match background {
        Some(white) => composite_background(image, white),
        None => image,
    };
    Ok(Some(Arc::new(image)))
}

fn save_resized(image: &DynamicImage, options: GroundTruthOptions, path: &Path) -> Result<()> {
    let (w, h) = target_resolution(
        image.width(),
        image.height(),
        options.resolution,
        options.resolution_scale,
    );
    let rgb = if (w, h) == (image.width(), image.height()) {
        image.to_rgb8()
    } else {
        image.resize_exact(w, h, FilterType::CatmullRom).to_rgb8()
    };
    rgb.save(path)?;
    Ok(())
}

/// Saves `gt/<00000>.png` for every view that has an image and returns the saved paths
/// relative to `split_dir`, in view order.
pub async fn save_ground_truth(
    fs: &Filesystem,
    cameras: &[CameraInfo],
    split_dir: &Path,
    options: GroundTruthOptions,
) -> Result<Vec<Option<PathBuf>>> {
    let gt_dir = split_dir.join("gt");
    tokio::fs::create_dir_all(&gt_dir).await?;
    info!("Saving {} ground truth views to {}", cameras.len(), gt_dir.display());

    let mut saved = Vec::with_capacity(cameras.len());
    let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, camera) in cameras.iter().enumerate() {
        let Some(image) = ground_truth(fs, camera, options.background).await? else {
            saved.push(None);
            continue;
        };
        let rel = PathBuf::from("gt").join(view_file_name(idx));
        let path = split_dir.join(&rel);
        saved.push(Some(rel));

        if options.multithread_save {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(std::io::Error::other)?;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                save_resized(&image, options, &path)
            });
        } else {
            tokio::task::spawn_blocking(move || save_resized(&image, options, &path))
                .await
                .map_err(|e| PipelineError::Io(e.into()))??;
        }
    }

    while let Some(result) = tasks.join_next().await {
        result.map_err(|e| PipelineError::Io(e.into()))??;
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use glam::{Mat3, Vec3};
    use image::{Rgba, RgbaImage, RgbImage};
    use super::*;

    fn camera(name: &str, image: Option<DynamicImage>) -> CameraInfo {
        CameraInfo {
            uid: 0,
            rotation: Mat3::IDENTITY,
            translation: Vec3::ZERO,
            fov_x: 1.0,
            fov_y: 1.0,
            image: image.map(Arc::new),
            image_path: PathBuf::from(format!("images/{name}.png")),
            image_name: name.to_owned(),
            width: 4,
            height: 2,
            masks: None,
            mask_path: None,
            fid: 0.0,
        }
    }

    fn options(multithread_save: bool) -> GroundTruthOptions {
        GroundTruthOptions {
            resolution: 2,
            resolution_scale: 1.0,
            background: Some(true),
            multithread_save,
            parallelism: 2,
        }
    }

    #[tokio::test]
    async fn views_without_images_are_skipped() {
        let scene = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(scene.path().join("images")).unwrap();
        let mut lazy = RgbaImage::from_pixel(4, 2, Rgba([10, 10, 10, 255]));
        lazy.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        lazy.save(scene.path().join("images/lazy.png")).unwrap();
        let fs = Filesystem::from_dir(scene.path()).unwrap();

        let cameras = [
            camera("eager", Some(DynamicImage::ImageRgb8(RgbImage::new(4, 2)))),
            camera("missing", None),
            camera("lazy", None),
        ];
        let saved = save_ground_truth(&fs, &cameras, out.path(), options(false)).await.unwrap();

        assert_eq!(
            saved,
            vec![Some(PathBuf::from("gt/00000.png")), None, Some(PathBuf::from("gt/00002.png"))]
        );
        assert!(!out.path().join("gt/00001.png").exists());
        let gt = image::open(out.path().join("gt/00002.png")).unwrap();
        assert_eq!((gt.width(), gt.height()), (2, 1));
        assert!(!gt.color().has_alpha());
    }

    #[tokio::test]
    async fn multithreaded_saving_writes_every_view() {
        let scene = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fs = Filesystem::from_dir(scene.path()).unwrap();
        let cameras: Vec<_> = (0..5)
            .map(|i| camera(&format!("v{i}"), Some(DynamicImage::ImageRgb8(RgbImage::new(8, 4)))))
            .collect();

        let saved = save_ground_truth(&fs, &cameras, out.path(), options(true)).await.unwrap();
        assert!(saved.iter().all(Option::is_some));
        for i in 0..5 {
            let gt = image::open(out.path().join("gt").join(view_file_name(i))).unwrap();
            assert_eq!((gt.width(), gt.height()), (4, 2));
        }
    }

    #[tokio::test]
    async fn stored_alpha_is_kept_without_background() {
        let scene = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(scene.path().join("images")).unwrap();
        let mut img = RgbaImage::from_pixel(4, 2, Rgba([200, 100, 50, 255]));
        img.put_pixel(0, 0, Rgba([200, 100, 50, 0]));
        img.save(scene.path().join("images/lazy.png")).unwrap();
        let fs = Filesystem::from_dir(scene.path()).unwrap();

        let cameras = [camera("lazy", None)];
        let opts = GroundTruthOptions {
            resolution: 1,
            background: None,
            ..options(false)
        };
        save_ground_truth(&fs, &cameras, out.path(), opts).await.unwrap();
        let kept = image::open(out.path().join("gt/00000.png")).unwrap().to_rgb8();
        assert_eq!(kept.get_pixel(0, 0).0, [200, 100, 50]);

        let opts = GroundTruthOptions { background: Some(true), ..opts };
        save_ground_truth(&fs, &cameras, out.path(), opts).await.unwrap();
        let white = image::open(out.path().join("gt/00000.png")).unwrap().to_rgb8();
        assert_eq!(white.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[tokio::test]
    async fn resolution_scale_shrinks_ground_truth() {
        let scene = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fs = Filesystem::from_dir(scene.path()).unwrap();
        let cameras = [camera("v", Some(DynamicImage::ImageRgb8(RgbImage::new(16, 8))))];

        let opts = GroundTruthOptions {
            resolution: 2,
            resolution_scale: 2.0,
            ..options(false)
        };
        save_ground_truth(&fs, &cameras, out.path(), opts).await.unwrap();
        let gt = image::open(out.path().join("gt/00000.png")).unwrap();
        assert_eq!((gt.width(), gt.height()), (4, 2));
    }
}

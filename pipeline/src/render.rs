use std::path::{Path, PathBuf};
use dataset::{camera_to_json, load_dataset_from_fs, CameraInfo, LoadConfig, SceneKind, Split};
use log::info;
use scene_source::{Filesystem, Source};
use crate::config::RenderConfig;
use crate::error::{PipelineError, Result};
use crate::export::{save_ground_truth, view_file_name, write_json, GroundTruthOptions, RenderManifest, ViewEntry};
use crate::model::{iteration_dir, read_model_args, resolve_iteration, ModelArgs};
use crate::process::run_program;
use crate::selection::SegmentSelection;

/// A prepared split of a render job.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub split: Split,
    pub dir: PathBuf,
    pub manifest: PathBuf,
    pub views: usize,
    pub ground_truth: usize,
}

#[derive(Debug, Clone)]
pub struct RenderReport {
    pub iteration: u32,
    pub splits: Vec<SplitOutput>,
}

fn frame_limit(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}

/// Combines the command line with what training recorded. Command line values win,
/// switches count when either side turns them on.
pub fn load_config(config: &RenderConfig, args: &ModelArgs) -> LoadConfig {
    let end_frame = match config.end_frame {
        Some(end) => frame_limit(end as i64),
        None => args.end_frame.and_then(frame_limit),
    };

    let mut load = LoadConfig::new()
        .with_eval(config.eval || args.eval.unwrap_or(false))
        .with_white_background(config.white_background || args.white_background.unwrap_or(false))
        .with_load_image_on_the_fly(config.load_image_on_the_fly)
        .with_load_mask_on_the_fly(config.load_mask_on_the_fly)
        .with_end_frame(end_frame);
    if let Some(images) = &args.images {
        load = load.with_images(images.clone());
    }
    if let Some(resolution) = args.resolution {
        load = load.with_resolution(resolution as i32);
    }
    load
}

fn view_entries(cameras: &[CameraInfo], gt: Vec<Option<PathBuf>>) -> Vec<ViewEntry> {
    cameras
        .iter()
        .zip(gt)
        .enumerate()
        .map(|(index, (camera, gt))| ViewEntry {
            index,
            image_name: camera.image_name.clone(),
            fid: camera.fid,
            camera: camera_to_json(index, camera),
            gt,
            render: PathBuf::from("renders").join(view_file_name(index)),
            mask_path: camera.mask_path.clone(),
        })
        .collect()
}

struct RenderJob<'a> {
    config: &'a RenderConfig,
    load: LoadConfig,
    fs: Filesystem,
    kind: SceneKind,
    model_path: PathBuf,
    source_path: PathBuf,
    iteration: u32,
    selection: SegmentSelection,
}

impl RenderJob<'_> {
    async fn prepare_split(&self, split: Split, cameras: &[CameraInfo]) -> Result<SplitOutput> {
        let dir = self
            .model_path
            .join(split.name())
            .join(format!("ours_{}", self.iteration));
        info!("Rendering {} set of {} views into {}", split.name(), cameras.len(), dir.display());
        tokio::fs::create_dir_all(dir.join("renders")).await?;

        let options = GroundTruthOptions {
            resolution: self.load.resolution,
            resolution_scale: self.load.resolution_scale,
            background: (self.kind == SceneKind::MultiView).then_some(self.load.white_background),
            multithread_save: self.config.multithread_save,
            parallelism: std::thread::available_parallelism().map_or(4, |n| n.get()),
        };
        let gt = save_ground_truth(&self.fs, cameras, &dir, options).await?;
        let ground_truth = gt.iter().flatten().count();

        let entries: Vec<_> = cameras
            .iter()
            .enumerate()
            .map(|(id, camera)| camera_to_json(id, camera))
            .collect();
        write_json(&dir.join("cameras.json"), &entries).await?;

        let manifest = RenderManifest {
            model_path: self.model_path.clone(),
            source_path: self.source_path.clone(),
            split: split.name().to_owned(),
            iteration: self.iteration,
            point_cloud: iteration_dir(&self.model_path, self.iteration),
            selection: self.selection.clone(),
            load2gpu_on_the_fly: self.config.load2gpu_on_the_fly,
            white_background: self.load.white_background,
            views: view_entries(cameras, gt),
        };
        let manifest_path = dir.join("render_manifest.json");
        write_json(&manifest_path, &manifest).await?;

        if let Some(renderer) = &self.config.renderer {
            run_program(renderer, [Path::new("--manifest"), manifest_path.as_path()]).await?;
        }

        Ok(SplitOutput {
            split,
            dir,
            manifest: manifest_path,
            views: cameras.len(),
            ground_truth,
        })
    }
}

/// Loads the scene a model was trained on and prepares every requested split for
/// rendering, running the renderer on each when one is configured.
pub async fn render(config: &RenderConfig) -> Result<RenderReport> {
    let model_path = PathBuf::from(&config.model_path);
    if !tokio::fs::try_exists(&model_path).await? {
        return Err(PipelineError::ModelNotFound(model_path));
    }

    let selection = SegmentSelection::from_args(
        config.text_prompt.as_deref(),
        config.segment_ids.as_deref(),
    )?;
    let args = read_model_args(&model_path).await?;
    let iteration = resolve_iteration(&model_path, config.iteration).await?;
    info!("Loading trained model at iteration {iteration}");

    let source_path = config
        .source_path
        .clone()
        .or_else(|| args.source_path.clone())
        .map(PathBuf::from)
        .ok_or(PipelineError::MissingSourcePath)?;
    let load = load_config(config, &args);

    let fs = Source::from_path(&source_path)?.into_fs().await?;
    let dataset = load_dataset_from_fs(&fs, &source_path, &load).await?;

    let job = RenderJob {
        config,
        load,
        fs,
        kind: dataset.kind,
        model_path,
        source_path,
        iteration,
        selection,
    };

    let mut splits = vec![];
    for (split, skip) in [(Split::Train, config.skip_train), (Split::Test, config.skip_test)] {
        if skip {
            continue;
        }
        splits.push(job.prepare_split(split, dataset.split(split)).await?);
    }
    Ok(RenderReport { iteration, splits })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use image::{Rgba, RgbaImage};
    use serde_json::json;
    use super::*;

    fn write_scene(root: &Path) {
        let identity = json!([[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0], [0, 0, 0, 1]]);
        for (split, names) in [("train", ["r_0", "r_1"]), ("test", ["r_2", "r_3"])] {
            fs::create_dir_all(root.join(split)).unwrap();
            let frames: Vec<_> = names
                .iter()
                .map(|n| json!({ "file_path": format!("./{split}/{n}"), "transform_matrix": identity }))
                .collect();
            for n in names {
                RgbaImage::from_pixel(8, 4, Rgba([50, 60, 70, 255]))
                    .save(root.join(split).join(format!("{n}.png")))
                    .unwrap();
            }
            let contents = json!({ "camera_angle_x": 0.7, "frames": frames });
            fs::write(root.join(format!("transforms_{split}.json")), contents.to_string()).unwrap();
        }
        let cloud = dataset::PointCloud::random(10, 1.0, &mut rand::rng());
        fs::write(root.join("points3d.ply"), dataset::encode_ply(&cloud)).unwrap();
    }

    fn write_model(model: &Path, scene: &Path) {
        fs::create_dir_all(model.join("point_cloud/iteration_7000")).unwrap();
        fs::create_dir_all(model.join("point_cloud/iteration_30000")).unwrap();
        fs::write(
            model.join("cfg_args"),
            format!(
                "Namespace(source_path='{}', images='images', resolution=2, eval=True, \
                 white_background=False, end_frame=-1)",
                scene.display()
            ),
        )
        .unwrap();
    }

    #[test]
    fn command_line_overrides_training_options() {
        let args = ModelArgs {
            eval: Some(false),
            end_frame: Some(-1),
            resolution: Some(4),
            ..Default::default()
        };
        let config = RenderConfig::new("model".to_owned()).with_eval(true);
        let load = load_config(&config, &args);
        assert!(load.eval);
        assert_eq!(load.end_frame, None);
        assert_eq!(load.resolution, 4);

        let load = load_config(&config.clone().with_end_frame(Some(120)), &args);
        assert_eq!(load.end_frame, Some(120));
    }

    #[tokio::test]
    async fn splits_are_prepared_from_the_recorded_scene() {
        let scene = tempfile::tempdir().unwrap();
        let model = tempfile::tempdir().unwrap();
        write_scene(scene.path());
        write_model(model.path(), scene.path());

        let config = RenderConfig::new(model.path().display().to_string())
            .with_segment_ids(Some(vec![4, 1, 4]))
            .with_load2gpu_on_the_fly(true);
        let report = render(&config).await.unwrap();
        assert_eq!(report.iteration, 30000);
        assert_eq!(report.splits.len(), 2);

        let test_dir = model.path().join("test/ours_30000");
        assert_eq!(report.splits[1].dir, test_dir);
        assert_eq!(report.splits[1].ground_truth, 2);
        let gt = image::open(test_dir.join("gt/00001.png")).unwrap();
        assert_eq!((gt.width(), gt.height()), (4, 2));

        let cameras: serde_json::Value =
            serde_json::from_slice(&fs::read(test_dir.join("cameras.json")).unwrap()).unwrap();
        assert_eq!(cameras[1]["img_name"], "r_3");

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(test_dir.join("render_manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["iteration"], 30000);
        assert_eq!(manifest["split"], "test");
        assert_eq!(manifest["load2gpu_on_the_fly"], true);
        assert_eq!(manifest["selection"], json!({ "kind": "ids", "ids": [1, 4] }));
        assert_eq!(manifest["views"][0]["render"], "renders/00000.png");
        assert_eq!(manifest["views"][0]["gt"], "gt/00000.png");
    }

    #[tokio::test]
    async fn skipped_splits_are_not_written() {
        let scene = tempfile::tempdir().unwrap();
        let model = tempfile::tempdir().unwrap();
        write_scene(scene.path());
        write_model(model.path(), scene.path());

        let config = RenderConfig::new(model.path().display().to_string())
            .with_skip_train(true)
            .with_iteration(7000)
            .with_load_image_on_the_fly(true);
        let report = render(&config).await.unwrap();
        assert_eq!(report.splits.len(), 1);
        assert_eq!(report.splits[0].split, Split::Test);
        assert_eq!(report.splits[0].ground_truth, 2);
        assert!(!model.path().join("train").exists());
        assert!(model.path().join("test/ours_7000/gt/00000.png").is_file());
    }

    #[tokio::test]
    async fn missing_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = RenderConfig::new(dir.path().join("nope").display().to_string());
        assert!(matches!(render(&config).await, Err(PipelineError::ModelNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_renderer_is_reported() {
        let scene = tempfile::tempdir().unwrap();
        let model = tempfile::tempdir().unwrap();
        write_scene(scene.path());
        write_model(model.path(), scene.path());

        let config = RenderConfig::new(model.path().display().to_string())
            .with_skip_train(true)
            .with_renderer(Some("false".to_owned()));
        assert!(matches!(render(&config).await, Err(PipelineError::ProgramFailed { .. })));
    }
}

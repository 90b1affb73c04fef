use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct RenderConfig {
    /// Trained model directory, holding `cfg_args` and `point_cloud/iteration_<n>`.
    pub model_path: String,

    /// Scene to render. Falls back to the source path recorded in `cfg_args`.
    pub source_path: Option<String>,

    /// Iteration to render, -1 picks the latest saved one.
    #[config(default = "-1")]
    pub iteration: i32,

    #[config(default = false)]
    pub skip_train: bool,

    #[config(default = false)]
    pub skip_test: bool,

    /// Hold out test views when loading the scene.
    #[config(default = false)]
    pub eval: bool,

    #[config(default = false)]
    pub white_background: bool,

    #[config(default = false)]
    pub load_image_on_the_fly: bool,

    #[config(default = false)]
    pub load_mask_on_the_fly: bool,

    /// Keep per-view data on the host and move it to the device per view.
    #[config(default = false)]
    pub load2gpu_on_the_fly: bool,

    /// Save images concurrently.
    #[config(default = false)]
    pub multithread_save: bool,

    /// Last frame of dynamic scenes, -1 for all frames.
    pub end_frame: Option<i32>,

    /// Render only segments matching this text prompt.
    pub text_prompt: Option<String>,

    /// Render only these segment ids.
    pub segment_ids: Option<Vec<u32>>,

    /// Program that renders a prepared split. Called with `--manifest <path>`.
    pub renderer: Option<String>,
}

#[derive(Config, Debug)]
pub struct ExtractMasksConfig {
    /// Directory with the input images.
    pub img_path: String,

    /// Directory receiving one `<image stem>.pt` per image. Defaults to `masks` next to
    /// the image directory.
    pub output: Option<String>,

    /// Predicted IoU threshold for keeping a mask.
    #[config(default = 0.88)]
    pub iou_th: f32,

    /// Stability score threshold for keeping a mask.
    #[config(default = 0.95)]
    pub stability_score_th: f32,

    /// Downsample factor of the stored masks.
    #[config(default = 1)]
    pub downsample_mask: u32,

    /// Segmentation program invoked on the image directory.
    #[config(default = "String::from(\"sadg-extract-masks\")")]
    pub extractor: String,

    /// Recompute masks that already exist.
    #[config(default = false)]
    pub force: bool,
}

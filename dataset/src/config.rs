use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct LoadConfig {
    /// Image folder of colmap scenes, relative to the scene root.
    #[config(default = "String::from(\"images\")")]
    pub images: String,
    /// Hold out test views instead of training on everything.
    #[config(default = false)]
    pub eval: bool,
    /// Every nth colmap view goes to the test split when `eval` is set.
    #[config(default = 8)]
    pub llffhold: usize,
    #[config(default = false)]
    pub white_background: bool,
    /// Extension appended to `file_path` entries of transforms files.
    #[config(default = "String::from(\".png\")")]
    pub extension: String,
    /// Only record image paths and sizes, decode nothing.
    #[config(default = false)]
    pub load_image_on_the_fly: bool,
    /// Only record mask paths, read no mask files.
    #[config(default = false)]
    pub load_mask_on_the_fly: bool,
    /// Last frame of dynamic multi-view scenes to load, all frames if unset.
    pub end_frame: Option<u32>,
    /// 1, 2, 4 or 8 to downsample, -1 to cap width at 1.6K, or a target width.
    #[config(default = "-1")]
    pub resolution: i32,
    #[config(default = 1.0)]
    pub resolution_scale: f32,
    /// Max nr. of frames read concurrently.
    pub parallelism: Option<usize>,
}

impl LoadConfig {
    pub(crate) fn parallelism(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|x| x.get())
                    .unwrap_or(8)
            })
            .max(1)
    }
}

use burn::prelude::Config;

#[derive(Config, Debug)]
pub struct ConvertConfig {
    /// Scene directory holding the raw capture. Output is written next to it.
    pub path: String,
    /// Downsample factor applied to frames and intrinsics.
    #[config(default = 1)]
    pub scale: u32,
    /// Number of frames to extract per camera. Each converter has its own default.
    pub end: Option<u32>,
    /// ffmpeg executable used to decode videos.
    #[config(default = "String::from(\"ffmpeg\")")]
    pub ffmpeg: String,
    /// Max nr. of cameras converted at once.
    pub parallelism: Option<usize>,
}

impl ConvertConfig {
    pub(crate) fn parallelism(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|x| x.get())
                    .unwrap_or(4)
            })
            .max(1)
    }
}

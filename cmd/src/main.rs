use std::path::PathBuf;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use convert::ConvertConfig;
use pipeline::{ExtractMasksConfig, RenderConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Scene preparation, rendering and mask extraction for segment-aware dynamic Gaussians.
#[derive(Parser, Debug)]
#[command(name = "sadg", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export ground truth, cameras and render manifests of a trained model
    Render(RenderArgs),
    /// Compute segmentation masks for a folder of images
    #[command(name = "extract-masks")]
    ExtractMasks(ExtractMasksArgs),
    /// Convert a Neu3D capture to transforms files
    #[command(name = "neu3d2blender")]
    Neu3d(ConvertArgs),
    /// Convert a Google Immersive capture to transforms files
    #[command(name = "immersive2blender")]
    Immersive(ConvertArgs),
    /// Convert a Technicolor light field capture to transforms files
    #[command(name = "technocolor2blender", alias = "technicolor2blender")]
    Technicolor(ConvertArgs),
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Trained model directory
    #[arg(short = 'm', long = "model_path")]
    model_path: PathBuf,

    /// Scene directory, defaults to the one the model was trained on
    #[arg(short = 's', long = "source_path")]
    source_path: Option<PathBuf>,

    /// Iteration to render, -1 for the latest
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    iteration: i32,

    #[arg(long = "skip_train")]
    skip_train: bool,

    #[arg(long = "skip_test")]
    skip_test: bool,

    #[arg(long)]
    eval: bool,

    #[arg(long = "white_background", short = 'w')]
    white_background: bool,

    #[arg(long = "load_image_on_the_fly")]
    load_image_on_the_fly: bool,

    #[arg(long = "load_mask_on_the_fly")]
    load_mask_on_the_fly: bool,

    #[arg(long = "load2gpu_on_the_fly")]
    load2gpu_on_the_fly: bool,

    #[arg(long = "multithread_save")]
    multithread_save: bool,

    /// Last frame to load, -1 for all
    #[arg(long = "end_frame", allow_negative_numbers = true)]
    end_frame: Option<i32>,

    /// Keep only segments matching this prompt
    #[arg(long = "text_prompt", conflicts_with = "segment_ids")]
    text_prompt: Option<String>,

    /// Keep only these segments
    #[arg(long = "segment_ids", num_args = 1..)]
    segment_ids: Option<Vec<u32>>,

    /// Program run on each prepared split with `--manifest <path>`
    #[arg(long)]
    renderer: Option<String>,
}

impl RenderArgs {
    fn into_config(self) -> RenderConfig {
        RenderConfig::new(self.model_path.display().to_string())
            .with_source_path(self.source_path.map(|p| p.display().to_string()))
            .with_iteration(self.iteration)
            .with_skip_train(self.skip_train)
            .with_skip_test(self.skip_test)
            .with_eval(self.eval)
            .with_white_background(self.white_background)
            .with_load_image_on_the_fly(self.load_image_on_the_fly)
            .with_load_mask_on_the_fly(self.load_mask_on_the_fly)
            .with_load2gpu_on_the_fly(self.load2gpu_on_the_fly)
            .with_multithread_save(self.multithread_save)
            .with_end_frame(self.end_frame)
            .with_text_prompt(self.text_prompt)
            .with_segment_ids(self.segment_ids)
            .with_renderer(self.renderer)
    }
}

#[derive(Args, Debug)]
struct ExtractMasksArgs {
    /// Folder of images to segment
    #[arg(long = "img_path")]
    img_path: PathBuf,

    /// Folder for the `.pt` masks, defaults to `masks` beside the images
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long = "iou_th", default_value_t = 0.88)]
    iou_th: f32,

    #[arg(long = "stability_score_th", default_value_t = 0.95)]
    stability_score_th: f32,

    #[arg(long = "downsample_mask", default_value_t = 1)]
    downsample_mask: u32,

    /// Segmentation program
    #[arg(long, default_value = "sadg-extract-masks")]
    extractor: String,

    /// Recompute existing masks
    #[arg(long)]
    force: bool,
}

impl ExtractMasksArgs {
    fn into_config(self) -> ExtractMasksConfig {
        ExtractMasksConfig::new(self.img_path.display().to_string())
            .with_output(self.output.map(|p| p.display().to_string()))
            .with_iou_th(self.iou_th)
            .with_stability_score_th(self.stability_score_th)
            .with_downsample_mask(self.downsample_mask)
            .with_extractor(self.extractor)
            .with_force(self.force)
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Capture directory
    #[arg(long)]
    path: PathBuf,

    /// Downsample factor
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    scale: u32,

    /// Number of frames to convert
    #[arg(long)]
    end: Option<u32>,

    /// ffmpeg executable used to decode videos
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,
}

impl ConvertArgs {
    fn into_config(self) -> ConvertConfig {
        ConvertConfig::new(self.path.display().to_string())
            .with_scale(self.scale)
            .with_end(self.end)
            .with_ffmpeg(self.ffmpeg)
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Render(args) => {
            let report = pipeline::render(&args.into_config())
                .await
                .context("Failed to render")?;
            for split in &report.splits {
                info!(
                    "{} views of iteration {} ({} with ground truth) in {}",
                    split.views,
                    report.iteration,
                    split.ground_truth,
                    split.dir.display()
                );
            }
        }
        Command::ExtractMasks(args) => {
            let report = pipeline::extract_masks(&args.into_config())
                .await
                .context("Failed to extract masks")?;
            info!(
                "Masks for {} images in {} ({} new)",
                report.images,
                report.output.display(),
                report.extracted
            );
        }
        Command::Neu3d(args) => convert::convert_neu3d(&args.into_config())
            .await
            .context("Failed to convert Neu3D capture")?,
        Command::Immersive(args) => convert::convert_immersive(&args.into_config())
            .await
            .context("Failed to convert Immersive capture")?,
        Command::Technicolor(args) => convert::convert_technicolor(&args.into_config())
            .await
            .context("Failed to convert Technicolor capture")?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    run(cli.command).await
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("sadg").chain(args.iter().copied())).map(|c| c.command)
    }

    #[test]
    fn render_flags_parse() {
        let Command::Render(args) = parse(&[
            "render",
            "-m",
            "output/coffee",
            "--load_mask_on_the_fly",
            "--load_image_on_the_fly",
            "--eval",
            "--load2gpu_on_the_fly",
            "--skip_train",
            "--multithread_save",
            "--iteration",
            "14000",
            "--segment_ids",
            "3",
            "1",
            "--end_frame",
            "-1",
        ])
        .unwrap() else {
            panic!("expected render");
        };

        let config = args.into_config();
        assert_eq!(config.model_path, "output/coffee");
        assert_eq!(config.iteration, 14000);
        assert!(config.skip_train && !config.skip_test);
        assert!(config.load2gpu_on_the_fly && config.multithread_save);
        assert_eq!(config.segment_ids, Some(vec![3, 1]));
        assert_eq!(config.end_frame, Some(-1));
    }

    #[test]
    fn render_defaults_to_latest_iteration() {
        let Command::Render(args) = parse(&["render", "-m", "out", "--text_prompt", "cup"]).unwrap() else {
            panic!("expected render");
        };
        assert_eq!(args.iteration, -1);
        assert_eq!(args.text_prompt.as_deref(), Some("cup"));
        assert!(parse(&["render", "-m", "out", "--iteration", "-1"]).is_ok());
    }

    #[test]
    fn prompt_and_ids_conflict() {
        let err = parse(&["render", "-m", "out", "--text_prompt", "cup", "--segment_ids", "2"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
        let err = parse(&["render", "-m", "out", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn extract_masks_defaults() {
        let Command::ExtractMasks(args) = parse(&["extract-masks", "--img_path", "data/images"]).unwrap() else {
            panic!("expected extract-masks");
        };
        let config = args.into_config();
        assert_eq!(config.iou_th, 0.88);
        assert_eq!(config.stability_score_th, 0.95);
        assert_eq!(config.downsample_mask, 1);
        assert_eq!(config.output, None);
    }

    #[test]
    fn converters_share_flags() {
        let Command::Neu3d(args) = parse(&["neu3d2blender", "--path", "data/coffee", "--scale", "2"]).unwrap() else {
            panic!("expected neu3d2blender");
        };
        assert_eq!(args.into_config().scale, 2);

        let Command::Immersive(args) = parse(&["immersive2blender", "--path", "a", "--end", "50"]).unwrap() else {
            panic!("expected immersive2blender");
        };
        assert_eq!(args.into_config().end, Some(50));

        assert!(matches!(parse(&["technicolor2blender", "--path", "t"]), Ok(Command::Technicolor(_))));
        assert!(matches!(parse(&["technocolor2blender", "--path", "t"]), Ok(Command::Technicolor(_))));
        assert!(parse(&["neu3d2blender", "--path", "a", "--scale", "0"]).is_err());
    }
}

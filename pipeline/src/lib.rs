//! Glue around the external renderer and segmentation programs: reloading the scene a
//! model was trained on, exporting ground truth and render manifests, and running
//! mask extraction over image folders.

mod config;
mod error;
mod export;
mod masks;
mod model;
mod process;
mod render;
mod selection;

pub use config::{ExtractMasksConfig, RenderConfig};
pub use error::{PipelineError, Result};
pub use export::{view_file_name, RenderManifest, ViewEntry};
pub use masks::{extract_masks, mask_path, MaskReport};
pub use model::{parse_cfg_args, read_model_args, resolve_iteration, ArgValue, ModelArgs};
pub use render::{render, RenderReport, SplitOutput};
pub use selection::SegmentSelection;

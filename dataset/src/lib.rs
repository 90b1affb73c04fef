use std::path::PathBuf;

mod camera;
mod config;
mod error;
mod formats;
mod image_file;
mod normalization;
mod point_cloud;
mod sh;

pub use camera::{
    camera_to_json, focal_to_fov, fov_to_focal, target_resolution, world_to_view, CameraEntry,
    CameraInfo, SegmentMasks,
};
pub use config::LoadConfig;
pub use error::{DatasetError, FormatError};
pub use formats::colmap::{read_colmap_cameras, read_colmap_scene, read_model, read_points, ColmapModel};
pub use formats::nerfies::{camera_nerfies_from_json, read_nerfies_scene, CaptureKind, NerfiesCamera};
pub use formats::npy::{parse_npy, read_npz_entry, write_npy, write_npz, NpyArray};
pub use formats::ply::{encode_ply, parse_ply};
pub use formats::transforms::{read_cameras_from_transforms, read_multiview_scene, TransformsKind};
pub use formats::{detect_kind, load_dataset, load_dataset_from_fs};
pub use image_file::{composite_background, image_dimensions, load_image};
pub use normalization::{apply_normalization, nerfpp_norm, translate_cameras, NerfNormalization};
pub use point_cloud::PointCloud;
pub use sh::sh_to_rgb;

/// Layout a scene directory was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneKind {
    Colmap,
    MultiView,
    Nerfies,
}

/// Cameras and initial points of a scene.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub kind: SceneKind,
    pub train: Vec<CameraInfo>,
    pub test: Vec<CameraInfo>,
    pub normalization: NerfNormalization,
    pub point_cloud: Option<PointCloud>,
    /// Point cloud location relative to the scene root.
    pub ply_path: PathBuf,
}

impl Dataset {
    pub fn split(&self, split: Split) -> &[CameraInfo] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use glam::{Mat3, Mat4, Vec3};
use image::DynamicImage;
use serde::Serialize;

/// A view of the scene as the renderer consumes it.
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub uid: usize,
    /// Camera-to-world rotation, i.e. the transposed world-to-camera rotation.
    pub rotation: Mat3,
    /// World-to-camera translation.
    pub translation: Vec3,
    pub fov_x: f64,
    pub fov_y: f64,
    /// Decoded image, present unless images are loaded on the fly.
    pub image: Option<Arc<DynamicImage>>,
    /// Image location relative to the scene root.
    pub image_path: PathBuf,
    pub image_name: String,
    pub width: u32,
    pub height: u32,
    pub masks: Option<SegmentMasks>,
    pub mask_path: Option<PathBuf>,
    /// Normalized timestamp of the frame, 0 for static scenes.
    pub fid: f32,
}

/// Serialized segmentation masks for one view, kept opaque and handed to the renderer as-is.
#[derive(Clone, Debug)]
pub struct SegmentMasks {
    pub path: PathBuf,
    pub data: Arc<Vec<u8>>,
}

impl CameraInfo {
    pub fn world_to_camera(&self) -> Mat4 {
        world_to_view(self.rotation, self.translation, Vec3::ZERO, 1.0)
    }

    pub fn camera_to_world(&self) -> Mat4 {
        self.world_to_camera().inverse()
    }

    pub fn center(&self) -> Vec3 {
        self.camera_to_world().w_axis.truncate()
    }

    /// Replaces the pose with the given camera-to-world transform.
    pub fn set_camera_to_world(&mut self, cam_to_world: Mat4) {
        let world_to_cam = cam_to_world.inverse();
        self.set_world_to_camera(world_to_cam);
    }

    pub fn set_world_to_camera(&mut self, world_to_cam: Mat4) {
        self.rotation = Mat3::from_mat4(world_to_cam).transpose();
        self.translation = world_to_cam.w_axis.truncate();
    }
}

// Converts field of view to focal length
pub fn fov_to_focal(fov_rad: f64, pixels: u32) -> f64 {
    0.5 * (pixels as f64) / (fov_rad * 0.5).tan()
}

// Converts focal length to field of view
pub fn focal_to_fov(focal: f64, pixels: u32) -> f64 {
    2.0 * f64::atan((pixels as f64) / (2.0 * focal))
}

/// World-to-view matrix from a camera-to-world rotation and a world-to-camera translation,
/// with the camera center optionally shifted by `translate` and scaled by `scale`.
pub fn world_to_view(rotation: Mat3, translation: Vec3, translate: Vec3, scale: f32) -> Mat4 {
    let mut rt = Mat4::from_mat3(rotation.transpose());
    rt.w_axis = translation.extend(1.0);

    let mut cam_to_world = rt.inverse();
    let center = (cam_to_world.w_axis.truncate() + translate) * scale;
    cam_to_world.w_axis = center.extend(1.0);
    cam_to_world.inverse()
}

static WARNED_LARGE_IMAGE: AtomicBool = AtomicBool::new(false);

/// Resolution a view is loaded at.
///
/// `resolution` of 1, 2, 4 or 8 is a downsample factor, -1 caps the width at 1.6K
/// and any other value is a target width.
pub fn target_resolution(width: u32, height: u32, resolution: i32, resolution_scale: f32) -> (u32, u32) {
    if matches!(resolution, 1 | 2 | 4 | 8) {
        let factor = resolution_scale as f64 * resolution as f64;
        return (
            (width as f64 / factor).round_ties_even() as u32,
            (height as f64 / factor).round_ties_even() as u32,
        );
    }

    let global_down = if resolution == -1 {
        if width > 1600 {
            if !WARNED_LARGE_IMAGE.swap(true, Ordering::Relaxed) {
                log::info!(
                    "Encountered quite large input images (>1.6K pixels width), rescaling to 1.6K. \
                     If this is not desired, please explicitly specify a resolution of 1"
                );
            }
            width as f64 / 1600.0
        } else {
            1.0
        }
    } else {
        width as f64 / resolution as f64
    };

    let scale = global_down * resolution_scale as f64;
    ((width as f64 / scale) as u32, (height as f64 / scale) as u32)
}

/// Camera description in the `cameras.json` layout viewers expect.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CameraEntry {
    pub id: usize,
    pub img_name: String,
    pub width: u32,
    pub height: u32,
    pub position: [f32; 3],
    pub rotation: [[f32; 3]; 3],
    pub fy: f64,
    pub fx: f64,
}

pub fn camera_to_json(id: usize, camera: &CameraInfo) -> CameraEntry {
    let cam_to_world = camera.camera_to_world();
    let rot = Mat3::from_mat4(cam_to_world);
    // Row-major, matching what viewers of this format read.
    let rotation = [
        rot.row(0).to_array(),
        rot.row(1).to_array(),
        rot.row(2).to_array(),
    ];

    CameraEntry {
        id,
        img_name: camera.image_name.clone(),
        width: camera.width,
        height: camera.height,
        position: cam_to_world.w_axis.truncate().to_array(),
        rotation,
        fy: fov_to_focal(camera.fov_y, camera.height),
        fx: fov_to_focal(camera.fov_x, camera.width),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Quat;
    use super::*;

    pub(crate) fn camera_at(center: Vec3, rotation: Quat) -> CameraInfo {
        let mut cam = CameraInfo {
            uid: 0,
            rotation: Mat3::IDENTITY,
            translation: Vec3::ZERO,
            fov_x: 1.0,
            fov_y: 0.8,
            image: None,
            image_path: PathBuf::from("images/0000.png"),
            image_name: "0000".to_owned(),
            width: 640,
            height: 480,
            masks: None,
            mask_path: None,
            fid: 0.0,
        };
        cam.set_camera_to_world(Mat4::from_rotation_translation(rotation, center));
        cam
    }

    #[test]
    fn focal_and_fov_agree() {
        let fov = focal_to_fov(500.0, 640);
        assert!((fov_to_focal(fov, 640) - 500.0).abs() < 1e-9);
        assert!((focal_to_fov(320.0, 640) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn pose_setters_keep_center() {
        let center = glam::vec3(1.0, -2.0, 3.0);
        let cam = camera_at(center, Quat::from_rotation_y(0.3));
        assert!((cam.center() - center).length() < 1e-5);

        let w2c = cam.world_to_camera();
        assert!(w2c.transform_point3(center).length() < 1e-5);
    }

    #[test]
    fn world_to_view_applies_translate_and_scale() {
        let cam = camera_at(glam::vec3(1.0, 0.0, 0.0), Quat::IDENTITY);
        let view = world_to_view(cam.rotation, cam.translation, glam::vec3(1.0, 0.0, 0.0), 0.5);
        let center = view.inverse().w_axis.truncate();
        assert!((center - glam::vec3(1.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn target_resolution_rules() {
        assert_eq!(target_resolution(1000, 500, 2, 1.0), (500, 250));
        assert_eq!(target_resolution(1000, 500, 4, 2.0), (125, 62));
        assert_eq!(target_resolution(1000, 500, -1, 1.0), (1000, 500));
        assert_eq!(target_resolution(3200, 1600, -1, 1.0), (1600, 800));
        assert_eq!(target_resolution(1000, 500, 800, 1.0), (800, 400));
    }

    #[test]
    fn camera_json_uses_camera_to_world() {
        let center = glam::vec3(0.0, 1.0, 2.0);
        let cam = camera_at(center, Quat::IDENTITY);
        let entry = camera_to_json(3, &cam);

        assert_eq!(entry.id, 3);
        assert_eq!(entry.img_name, "0000");
        for (a, b) in entry.position.iter().zip(center.to_array()) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in entry.rotation[0].iter().zip([1.0, 0.0, 0.0]) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!((entry.fx - fov_to_focal(1.0, 640)).abs() < 1e-9);
    }
}

use glam::Vec3;
use serde::Serialize;
use crate::camera::CameraInfo;

/// Scene extent derived from camera centers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NerfNormalization {
    pub translate: Vec3,
    pub radius: f32,
    /// Translation and radius already baked into the cameras, if any.
    pub applied: Option<(Vec3, f32)>,
}

impl Default for NerfNormalization {
    fn default() -> Self {
        Self {
            translate: Vec3::ZERO,
            radius: 1.0,
            applied: None,
        }
    }
}

/// Centers the cameras around the mean of their centers. With `apply` the cameras are
/// moved and scaled into a unit sphere and the identity normalization is returned.
pub fn nerfpp_norm(cameras: &mut [CameraInfo], apply: bool) -> NerfNormalization {
    if cameras.is_empty() {
        return NerfNormalization::default();
    }

    let centers: Vec<Vec3> = cameras.iter().map(CameraInfo::center).collect();
    let center = centers.iter().copied().sum::<Vec3>() / centers.len() as f32;
    let radius = centers
        .iter()
        .map(|c| c.distance(center))
        .fold(0.0f32, f32::max);
    let translate = -center;

    if !apply {
        return NerfNormalization {
            translate,
            radius,
            applied: None,
        };
    }

    // A single camera has no extent, only move it.
    let divisor = if radius > 0.0 { radius } else { 1.0 };
    apply_normalization(cameras, translate, divisor);

    NerfNormalization {
        translate: Vec3::ZERO,
        radius: 1.0,
        applied: Some((translate, divisor)),
    }
}

/// Moves camera centers by `translate`, then divides them by `radius`.
pub fn apply_normalization(cameras: &mut [CameraInfo], translate: Vec3, radius: f32) {
    for cam in cameras.iter_mut() {
        let mut cam_to_world = cam.camera_to_world();
        let moved = (cam_to_world.w_axis.truncate() + translate) / radius;
        cam_to_world.w_axis = moved.extend(1.0);
        cam.set_camera_to_world(cam_to_world);
    }
}

/// Shifts every camera center by `translate`.
pub fn translate_cameras(cameras: &mut [CameraInfo], translate: Vec3) {
    for cam in cameras.iter_mut() {
        let mut cam_to_world = cam.camera_to_world();
        cam_to_world.w_axis += translate.extend(0.0);
        cam.set_camera_to_world(cam_to_world);
    }
}

#[cfg(test)]
mod tests {
    use glam::Quat;
    use crate::camera::tests::camera_at;
    use super::*;

    fn cameras() -> Vec<CameraInfo> {
        vec![
            camera_at(Vec3::new(2.0, 1.0, 0.0), Quat::IDENTITY),
            camera_at(Vec3::new(4.0, 1.0, 0.0), Quat::from_rotation_z(0.5)),
            camera_at(Vec3::new(3.0, 3.0, 0.0), Quat::from_rotation_x(-1.0)),
        ]
    }

    #[test]
    fn reports_center_and_radius() {
        let mut cams = cameras();
        let before: Vec<_> = cams.iter().map(CameraInfo::center).collect();
        let norm = nerfpp_norm(&mut cams, false);

        let center = Vec3::new(3.0, 5.0 / 3.0, 0.0);
        assert!((norm.translate + center).length() < 1e-5);
        let expected = (Vec3::new(3.0, 3.0, 0.0) - center).length();
        assert!((norm.radius - expected).abs() < 1e-5);
        assert!(norm.applied.is_none());

        let after: Vec<_> = cams.iter().map(CameraInfo::center).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn applied_normalization_centers_cameras_in_unit_sphere() {
        let mut cams = cameras();
        let norm = nerfpp_norm(&mut cams, true);
        assert_eq!(norm.translate, Vec3::ZERO);
        assert_eq!(norm.radius, 1.0);
        assert!(norm.applied.is_some());

        let again = nerfpp_norm(&mut cams, false);
        assert!(again.translate.length() < 1e-5);
        assert!((again.radius - 1.0).abs() < 1e-5);
    }

    #[test]
    fn translation_moves_centers() {
        let mut cams = cameras();
        translate_cameras(&mut cams, Vec3::new(-2.0, -1.0, 0.5));
        assert!((cams[0].center() - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-5);
    }
}

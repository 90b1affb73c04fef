use std::path::Path;
use glam::Mat4;
use log::info;
use serde::Serialize;
use crate::error::Result;

/// Frame rate the converted captures are timed at.
pub const FPS: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Intrinsics {
    pub fl_x: f32,
    pub fl_y: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: u32,
    pub h: u32,
}

impl Intrinsics {
    /// Intrinsics of the same camera with images downsampled by `scale`.
    pub fn downsampled(&self, scale: u32) -> Self {
        let s = scale.max(1) as f32;
        Self {
            fl_x: self.fl_x / s,
            fl_y: self.fl_y / s,
            cx: self.cx / s,
            cy: self.cy / s,
            w: self.w / scale.max(1),
            h: self.h / scale.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEntry {
    pub file_path: String,
    pub time: f32,
    /// Row-major.
    pub transform_matrix: [[f32; 4]; 4],
    #[serde(flatten)]
    pub intrinsics: Option<Intrinsics>,
}

/// Contents of a `transforms_*.json` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformsFile {
    #[serde(flatten)]
    pub intrinsics: Option<Intrinsics>,
    pub frames: Vec<FrameEntry>,
}

/// One camera of a capture, with its frames stored in `<name>/images/NNNN.png`.
#[derive(Debug, Clone)]
pub struct CameraFrames {
    pub name: String,
    pub transform: Mat4,
    /// Set for captures whose cameras differ in intrinsics.
    pub intrinsics: Option<Intrinsics>,
    pub frames: u32,
}

impl CameraFrames {
    pub fn entries(&self) -> impl Iterator<Item = FrameEntry> + '_ {
        let rows = self.transform.transpose().to_cols_array_2d();
        (0..self.frames).map(move |frame| FrameEntry {
            file_path: format!("./{}/images/{frame:04}", self.name),
            time: frame as f32 / FPS,
            transform_matrix: rows,
            intrinsics: self.intrinsics,
        })
    }
}

/// Splits cameras into train and test transforms. The first camera is held out for testing.
pub fn split_transforms(cameras: &[CameraFrames], shared: Option<Intrinsics>) -> (TransformsFile, TransformsFile) {
    let mut train = TransformsFile {
        intrinsics: shared,
        frames: vec![],
    };
    let mut test = train.clone();

    for (idx, cam) in cameras.iter().enumerate() {
        let target = if idx == 0 { &mut test } else { &mut train };
        target.frames.extend(cam.entries());
    }
    (train, test)
}

pub async fn write_transforms(dir: &Path, train: &TransformsFile, test: &TransformsFile) -> Result<()> {
    for (name, file) in [("transforms_train.json", train), ("transforms_test.json", test)] {
        let path = dir.join(name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(file)?).await?;
        info!("Wrote {} frames to {}", file.frames.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_camera_is_the_test_camera() {
        let cams: Vec<_> = (0..3)
            .map(|i| CameraFrames {
                name: format!("cam{i:02}"),
                transform: Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)),
                intrinsics: None,
                frames: 2,
            })
            .collect();
        let (train, test) = split_transforms(&cams, None);

        assert_eq!(test.frames.len(), 2);
        assert_eq!(train.frames.len(), 4);
        assert_eq!(test.frames[1].file_path, "./cam00/images/0001");
        assert_eq!(train.frames[3].transform_matrix[0], [1.0, 0.0, 0.0, 2.0]);
        assert_eq!(train.frames[1].time, 1.0 / FPS);
    }

    #[test]
    fn intrinsics_are_flattened() {
        let intrinsics = Intrinsics {
            fl_x: 100.0,
            fl_y: 90.0,
            cx: 50.0,
            cy: 40.0,
            w: 100,
            h: 80,
        };
        let file = TransformsFile {
            intrinsics: Some(intrinsics),
            frames: vec![],
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["fl_x"], 100.0);
        assert_eq!(value["w"], 100);

        let half = intrinsics.downsampled(2);
        assert_eq!((half.fl_y, half.cx, half.h), (45.0, 25.0, 40));
    }
}

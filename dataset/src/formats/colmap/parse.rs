use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use crate::formats::colmap::camera::{Camera, CameraModel};
use crate::formats::colmap::image::Image;
use crate::formats::colmap::input::{InputData, InputReader};
use crate::formats::colmap::point::Point3D;

pub struct PointsParser;
pub struct ImagesParser;
pub struct CamerasParser;

type Reader = BufReader<InputReader>;
type ParseResult = Pin<Box<dyn Future<Output = io::Result<InputData>> + Send>>;

pub trait Parseable: Send + Sync {
    fn parse_bin(&self, reader: Reader) -> ParseResult;
    fn parse_txt(&self, reader: Reader) -> ParseResult;
}

/// Upper bound on preallocation from counts read out of a file.
const MAX_PREALLOC: u64 = 1 << 16;

fn capacity(count: u64) -> usize {
    count.min(MAX_PREALLOC) as usize
}

fn parse<T: std::str::FromStr>(s: &str) -> io::Result<T> {
    s.parse()
        .map_err(|_e| invalid_data(format!("Parse error on '{s}'")))
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Reads the next line that is neither blank nor a comment. Returns false at EOF.
async fn next_data_line(reader: &mut Reader, line: &mut String) -> io::Result<bool> {
    loop {
        line.clear();
        if reader.read_line(line).await? == 0 {
            return Ok(false);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            return Ok(true);
        }
    }
}

impl Parseable for ImagesParser {
    fn parse_bin(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut images = HashMap::new();
            let num_images = reader.read_u64_le().await?;

            for _ in 0..num_images {
                let image_id = reader.read_i32_le().await?;

                let [w, x, y, z] = [
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                ];
                let quat = glam::quat(x, y, z, w);

                let tvec = glam::vec3(
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                );

                let camera_id = reader.read_i32_le().await?;
                let mut name_bytes = Vec::new();
                reader.read_until(b'\0', &mut name_bytes).await?;
                if name_bytes.pop() != Some(b'\0') {
                    return Err(invalid_data("Unterminated image name"));
                }

                let name = String::from_utf8(name_bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                let num_points2d = reader.read_u64_le().await?;
                let mut xys = Vec::with_capacity(capacity(num_points2d));
                let mut point3d_ids = Vec::with_capacity(capacity(num_points2d));

                for _ in 0..num_points2d {
                    xys.push(glam::Vec2::new(
                        reader.read_f64_le().await? as f32,
                        reader.read_f64_le().await? as f32,
                    ));
                    point3d_ids.push(reader.read_i64_le().await?);
                }

                images.insert(
                    image_id,
                    Image {
                        quat,
                        tvec,
                        camera_id,
                        name,
                        xys,
                        point3d_ids,
                    },
                );
            }

            Ok(InputData::Images(images))
        })
    }

    fn parse_txt(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut images = HashMap::new();
            let mut line = String::new();

            while next_data_line(&mut reader, &mut line).await? {
                let elems: Vec<&str> = line.split_whitespace().collect();
                if elems.len() < 10 {
                    return Err(invalid_data("Invalid image data"));
                }
                let id: i32 = parse(elems[0])?;

                let [w, x, y, z] = [
                    parse(elems[1])?,
                    parse(elems[2])?,
                    parse(elems[3])?,
                    parse(elems[4])?,
                ];
                let quat = glam::quat(x, y, z, w);
                let tvec = glam::vec3(parse(elems[5])?, parse(elems[6])?, parse(elems[7])?);
                let camera_id: i32 = parse(elems[8])?;
                let name = elems[9].to_owned();

                // Every image line is followed by its 2D observations, which may be empty.
                line.clear();
                reader.read_line(&mut line).await?;
                let elems: Vec<&str> = line.split_whitespace().collect();
                let mut xys = Vec::with_capacity(elems.len() / 3);
                let mut point3d_ids = Vec::with_capacity(elems.len() / 3);

                for chunk in elems.chunks(3) {
                    if chunk.len() < 3 {
                        return Err(invalid_data("Invalid image point data"));
                    }
                    xys.push(glam::vec2(parse(chunk[0])?, parse(chunk[1])?));
                    point3d_ids.push(parse(chunk[2])?);
                }

                images.insert(
                    id,
                    Image {
                        quat,
                        tvec,
                        camera_id,
                        name,
                        xys,
                        point3d_ids,
                    },
                );
            }

            Ok(InputData::Images(images))
        })
    }
}

impl Parseable for PointsParser {
    fn parse_bin(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut points3d = HashMap::new();
            let num_points = reader.read_u64_le().await?;

            for _ in 0..num_points {
                let point3d_id = reader.read_i64_le().await?;
                let xyz = glam::Vec3::new(
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                    reader.read_f64_le().await? as f32,
                );
                let rgb = [
                    reader.read_u8().await?,
                    reader.read_u8().await?,
                    reader.read_u8().await?,
                ];
                let error = reader.read_f64_le().await?;

                let track_length = reader.read_u64_le().await?;
                let mut image_ids = Vec::with_capacity(capacity(track_length));
                let mut point2d_idxs = Vec::with_capacity(capacity(track_length));

                for _ in 0..track_length {
                    image_ids.push(reader.read_i32_le().await?);
                    point2d_idxs.push(reader.read_i32_le().await?);
                }

                points3d.insert(
                    point3d_id,
                    Point3D {
                        xyz,
                        rgb,
                        error,
                        image_ids,
                        point2d_idxs,
                    },
                );
            }

            Ok(InputData::Points3D(points3d))
        })
    }

    fn parse_txt(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut points3d = HashMap::new();
            let mut line = String::new();

            while next_data_line(&mut reader, &mut line).await? {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 8 {
                    return Err(invalid_data("Invalid point3D data"));
                }

                let id: i64 = parse(parts[0])?;
                let xyz = glam::Vec3::new(parse(parts[1])?, parse(parts[2])?, parse(parts[3])?);
                let rgb = [
                    parse::<u8>(parts[4])?,
                    parse::<u8>(parts[5])?,
                    parse::<u8>(parts[6])?,
                ];
                let error: f64 = parse(parts[7])?;

                let mut image_ids = Vec::new();
                let mut point2d_idxs = Vec::new();

                for chunk in parts[8..].chunks(2) {
                    if chunk.len() < 2 {
                        return Err(invalid_data("Invalid point3D track data"));
                    }
                    image_ids.push(parse(chunk[0])?);
                    point2d_idxs.push(parse(chunk[1])?);
                }

                points3d.insert(
                    id,
                    Point3D {
                        xyz,
                        rgb,
                        error,
                        image_ids,
                        point2d_idxs,
                    },
                );
            }

            Ok(InputData::Points3D(points3d))
        })
    }
}

impl Parseable for CamerasParser {
    fn parse_bin(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut cameras = HashMap::new();
            let num_cameras = reader.read_u64_le().await?;

            for _ in 0..num_cameras {
                let camera_id = reader.read_i32_le().await?;
                let model_id = reader.read_i32_le().await?;
                let width = reader.read_u64_le().await?;
                let height = reader.read_u64_le().await?;

                let model = CameraModel::from_id(model_id)
                    .ok_or_else(|| invalid_data(format!("Invalid camera model id {model_id}")))?;

                let num_params = model.num_params();
                let mut params = Vec::with_capacity(num_params);
                for _ in 0..num_params {
                    params.push(reader.read_f64_le().await?);
                }

                cameras.insert(
                    camera_id,
                    Camera {
                        id: camera_id,
                        model,
                        width,
                        height,
                        params,
                    },
                );
            }

            Ok(InputData::Cameras(cameras))
        })
    }

    fn parse_txt(&self, mut reader: Reader) -> ParseResult {
        Box::pin(async move {
            let mut cameras = HashMap::new();
            let mut line = String::new();

            while next_data_line(&mut reader, &mut line).await? {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(invalid_data("Invalid camera data"));
                }

                let id = parse(parts[0])?;
                let model = CameraModel::from_name(parts[1])
                    .ok_or_else(|| invalid_data(format!("Invalid camera model {}", parts[1])))?;

                let width = parse(parts[2])?;
                let height = parse(parts[3])?;
                let params: Vec<f64> = parts[4..]
                    .iter()
                    .map(|&s| parse(s))
                    .collect::<Result<_, _>>()?;

                if params.len() != model.num_params() {
                    return Err(invalid_data("Invalid number of camera parameters"));
                }

                cameras.insert(
                    id,
                    Camera {
                        id,
                        model,
                        width,
                        height,
                        params,
                    },
                );
            }

            Ok(InputData::Cameras(cameras))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use crate::formats::colmap::input::{InputFile, InputType};
    use super::*;

    fn reader(bytes: Vec<u8>) -> InputReader {
        Box::new(Cursor::new(bytes))
    }

    #[tokio::test]
    async fn parses_text_cameras() {
        let text = "# Camera list with one line of data per camera:\n\
                    #   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]\n\
                    1 PINHOLE 640 480 500 510 320 240\n\
                    \n\
                    2 SIMPLE_PINHOLE 320 240 300 160 120\n";
        let cams = InputFile::new(reader(text.into()), InputType::Cameras, false)
            .parse()
            .await
            .unwrap()
            .as_cameras()
            .unwrap();

        assert_eq!(cams.len(), 2);
        assert_eq!(cams[&1].model, CameraModel::Pinhole);
        assert_eq!(cams[&1].focal(), (500.0, 510.0));
        assert_eq!(cams[&2].focal(), (300.0, 300.0));
        assert_eq!(cams[&2].width, 320);
    }

    #[tokio::test]
    async fn rejects_wrong_param_count() {
        let text = "1 PINHOLE 640 480 500 510 320\n";
        let result = InputFile::new(reader(text.into()), InputType::Cameras, false)
            .parse()
            .await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn parses_text_images_with_empty_observations() {
        let text = "# Image list with two lines of data per image:\n\
                    1 1 0 0 0 0.5 0 1 1 0001.png\n\
                    10.0 20.0 -1 30.0 40.0 7\n\
                    2 0.7071068 0 0.7071068 0 0 0 0 1 0002.png\n\
                    \n";
        let images = InputFile::new(reader(text.into()), InputType::Images, false)
            .parse()
            .await
            .unwrap()
            .as_images()
            .unwrap();

        assert_eq!(images.len(), 2);
        let first = &images[&1];
        assert_eq!(first.name, "0001.png");
        assert_eq!(first.point3d_ids, vec![-1, 7]);
        assert_eq!(first.tvec, glam::vec3(0.5, 0.0, 1.0));
        assert!(images[&2].xys.is_empty());
    }

    #[tokio::test]
    async fn huge_observation_counts_fail_cleanly() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        for v in [1.0f64, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(b"0001.png\0");
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());

        let result = InputFile::new(reader(bytes), InputType::Images, true).parse().await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7i64.to_le_bytes());
        for v in [0.0f64, 0.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let result = InputFile::new(reader(bytes), InputType::Points3D, true).parse().await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn parses_binary_cameras_and_images() {
        let mut cams = vec![];
        cams.extend(1u64.to_le_bytes());
        cams.extend(3i32.to_le_bytes());
        cams.extend(0i32.to_le_bytes());
        cams.extend(100u64.to_le_bytes());
        cams.extend(50u64.to_le_bytes());
        for p in [80.0f64, 50.0, 25.0] {
            cams.extend(p.to_le_bytes());
        }

        let cams = InputFile::new(reader(cams), InputType::Cameras, true)
            .parse()
            .await
            .unwrap()
            .as_cameras()
            .unwrap();
        assert_eq!(cams[&3].model, CameraModel::SimplePinhole);
        assert_eq!(cams[&3].height, 50);

        let mut imgs = vec![];
        imgs.extend(1u64.to_le_bytes());
        imgs.extend(5i32.to_le_bytes());
        for q in [1.0f64, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0] {
            imgs.extend(q.to_le_bytes());
        }
        imgs.extend(3i32.to_le_bytes());
        imgs.extend(b"frame_0.png\0");
        imgs.extend(1u64.to_le_bytes());
        imgs.extend(4.0f64.to_le_bytes());
        imgs.extend(5.0f64.to_le_bytes());
        imgs.extend(42i64.to_le_bytes());

        let imgs = InputFile::new(reader(imgs), InputType::Images, true)
            .parse()
            .await
            .unwrap()
            .as_images()
            .unwrap();
        let img = &imgs[&5];
        assert_eq!(img.name, "frame_0.png");
        assert_eq!(img.camera_id, 3);
        assert_eq!(img.tvec, glam::vec3(1.0, 2.0, 3.0));
        assert_eq!(img.point3d_ids, vec![42]);
    }

    #[tokio::test]
    async fn parses_text_points() {
        let text = "# 3D point list\n\
                    7 1.0 2.0 3.0 255 128 0 0.5 1 0 2 3\n";
        let points = InputFile::new(reader(text.into()), InputType::Points3D, false)
            .parse()
            .await
            .unwrap()
            .as_points()
            .unwrap();
        let point = &points[&7];
        assert_eq!(point.rgb, [255, 128, 0]);
        assert_eq!(point.image_ids, vec![1, 2]);
        assert_eq!(point.point2d_idxs, vec![0, 3]);
    }
}

use std::io;
use glam::Vec3;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use crate::error::FormatError;
use crate::point_cloud::PointCloud;

/// Upper bound on preallocation from the header's vertex count.
const MAX_PREALLOC: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::I8),
            "uchar" | "uint8" => Some(Self::U8),
            "short" | "int16" => Some(Self::I16),
            "ushort" | "uint16" => Some(Self::U16),
            "int" | "int32" => Some(Self::I32),
            "uint" | "uint32" => Some(Self::U32),
            "float" | "float32" => Some(Self::F32),
            "double" | "float64" => Some(Self::F64),
            _ => None,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    async fn read_le<R: AsyncRead + Unpin>(&self, reader: &mut R) -> io::Result<f64> {
        Ok(match self {
            Self::I8 => reader.read_i8().await? as f64,
            Self::U8 => reader.read_u8().await? as f64,
            Self::I16 => reader.read_i16_le().await? as f64,
            Self::U16 => reader.read_u16_le().await? as f64,
            Self::I32 => reader.read_i32_le().await? as f64,
            Self::U32 => reader.read_u32_le().await? as f64,
            Self::F32 => reader.read_f32_le().await? as f64,
            Self::F64 => reader.read_f64_le().await?,
        })
    }
}

struct VertexLayout {
    count: usize,
    properties: Vec<(String, ScalarType)>,
}

impl VertexLayout {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|(n, _)| n == name)
    }
}

fn invalid(msg: impl Into<String>) -> FormatError {
    FormatError::InvalidPointCloud(msg.into())
}

/// Encodes points the way the trainer expects its initial cloud: binary little endian
/// positions, normals and 8-bit colors.
pub fn encode_ply(cloud: &PointCloud) -> Vec<u8> {
    let header = format!(
        "ply\n\
         format binary_little_endian 1.0\n\
         element vertex {}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property float nx\n\
         property float ny\n\
         property float nz\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         end_header\n",
        cloud.len()
    );

    let mut out = Vec::with_capacity(header.len() + cloud.len() * 27);
    out.extend_from_slice(header.as_bytes());
    for i in 0..cloud.len() {
        let normal = cloud.normals.get(i).copied().unwrap_or(Vec3::ZERO);
        let color = cloud.colors.get(i).copied().unwrap_or(Vec3::ZERO);
        for v in cloud.points[i].to_array().into_iter().chain(normal.to_array()) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for c in color.to_array() {
            out.push((c * 255.0).round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

pub async fn parse_ply<R: AsyncRead + Unpin>(reader: R) -> Result<PointCloud, FormatError> {
    let mut reader = BufReader::new(reader);
    let (format, layout) = parse_header(&mut reader).await?;

    let required = |name: &str| {
        layout
            .index_of(name)
            .ok_or_else(|| invalid(format!("Missing vertex property '{name}'")))
    };
    let xyz = [required("x")?, required("y")?, required("z")?];
    let rgb = [required("red")?, required("green")?, required("blue")?];
    let normals = match (layout.index_of("nx"), layout.index_of("ny"), layout.index_of("nz")) {
        (Some(x), Some(y), Some(z)) => Some([x, y, z]),
        _ => None,
    };

    let reserve = layout.count.min(MAX_PREALLOC);
    let mut cloud = PointCloud {
        points: Vec::with_capacity(reserve),
        colors: Vec::with_capacity(reserve),
        normals: Vec::with_capacity(reserve),
    };

    let mut values = vec![0.0; layout.properties.len()];
    let mut line = String::new();
    for _ in 0..layout.count {
        match format {
            PlyFormat::BinaryLittleEndian => {
                for (value, (_, ty)) in values.iter_mut().zip(&layout.properties) {
                    *value = ty.read_le(&mut reader).await?;
                }
            }
            PlyFormat::Ascii => {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Err(invalid("Unexpected end of vertex data"));
                }
                let mut parts = line.split_whitespace();
                for value in values.iter_mut() {
                    *value = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| invalid(format!("Malformed vertex line '{}'", line.trim())))?;
                }
            }
        }

        let pick = |idx: [usize; 3]| {
            Vec3::new(values[idx[0]] as f32, values[idx[1]] as f32, values[idx[2]] as f32)
        };
        cloud.points.push(pick(xyz));
        let color = pick(rgb);
        cloud.colors.push(if layout.properties[rgb[0]].1.is_float() {
            color
        } else {
            color / 255.0
        });
        cloud.normals.push(normals.map(pick).unwrap_or(Vec3::ZERO));
    }

    Ok(cloud)
}

async fn parse_header<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<(PlyFormat, VertexLayout), FormatError> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim() != "ply" {
        return Err(invalid("Missing ply magic"));
    }

    let mut format = None;
    let mut vertex: Option<VertexLayout> = None;
    let mut in_vertex = false;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(invalid("Header is not terminated"));
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => format = Some(PlyFormat::Ascii),
            ["format", "binary_little_endian", _] => format = Some(PlyFormat::BinaryLittleEndian),
            ["format", other, _] => return Err(invalid(format!("Unsupported ply format {other}"))),
            ["element", "vertex", count] => {
                if vertex.is_some() {
                    return Err(invalid("Duplicate vertex element"));
                }
                let count = count
                    .parse()
                    .map_err(|_| invalid(format!("Invalid vertex count {count}")))?;
                vertex = Some(VertexLayout {
                    count,
                    properties: vec![],
                });
                in_vertex = true;
            }
            ["element", ..] => {
                if vertex.is_none() {
                    return Err(invalid("Vertex element must come first"));
                }
                in_vertex = false;
            }
            ["property", "list", ..] if in_vertex => {
                return Err(invalid("List properties on vertices are not supported"));
            }
            ["property", ty, name] if in_vertex => {
                let ty = ScalarType::from_name(ty)
                    .ok_or_else(|| invalid(format!("Unknown property type {ty}")))?;
                if let Some(vertex) = vertex.as_mut() {
                    vertex.properties.push((name.to_string(), ty));
                }
            }
            _ => {}
        }
    }

    let format = format.ok_or_else(|| invalid("Missing format line"))?;
    let vertex = vertex.ok_or_else(|| invalid("Missing vertex element"))?;
    Ok((format, vertex))
}

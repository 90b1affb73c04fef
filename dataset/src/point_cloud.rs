use glam::Vec3;
use rand::Rng;
use crate::sh::sh_to_rgb;

/// Initial points for a scene, with colors in [0, 1].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vec3>,
    pub colors: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

impl PointCloud {
    pub fn new(points: Vec<Vec3>, colors: Vec<Vec3>) -> Self {
        let normals = vec![Vec3::ZERO; points.len()];
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Uniform points in a cube of half-size `half_extent`, with colors from
    /// near-zero random spherical harmonics.
    pub fn random(num_points: usize, half_extent: f32, rng: &mut impl Rng) -> Self {
        let mut points = Vec::with_capacity(num_points);
        let mut colors = Vec::with_capacity(num_points);
        for _ in 0..num_points {
            points.push(Vec3::new(
                rng.random_range(-half_extent..half_extent),
                rng.random_range(-half_extent..half_extent),
                rng.random_range(-half_extent..half_extent),
            ));
            let sh = Vec3::new(rng.random(), rng.random(), rng.random()) / 255.0;
            colors.push(sh_to_rgb(sh));
        }
        Self::new(points, colors)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn mean(&self) -> Option<Vec3> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vec3 = self.points.iter().copied().sum();
        Some(sum / self.points.len() as f32)
    }

    pub fn translate(&mut self, offset: Vec3) {
        for p in &mut self.points {
            *p += offset;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for p in &mut self.points {
            *p *= factor;
        }
    }
}

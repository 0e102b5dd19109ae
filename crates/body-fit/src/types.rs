//! Core mesh data types.

use crate::error::{FitError, FitResult};
use nalgebra::{Point3, Vector3};

/// RGB color with 8-bit components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl VertexColor {
    /// Create a new color from RGB components.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from floating point values in [0, 1] range.
    #[inline]
    pub fn from_float(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: (r.clamp(0.0, 1.0) * 255.0) as u8,
            g: (g.clamp(0.0, 1.0) * 255.0) as u8,
            b: (b.clamp(0.0, 1.0) * 255.0) as u8,
        }
    }
}

/// A mesh vertex. Colors are carried only for diagnostic exports.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Vertex color (RGB).
    pub color: Option<VertexColor>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            color: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with position and color.
    #[inline]
    pub fn with_color(position: Point3<f64>, color: VertexColor) -> Self {
        Self {
            position,
            color: Some(color),
        }
    }
}

/// Which input axis points "up" in the body's frame.
///
/// Reconstructions arrive either Y-up (graphics convention) or Z-up
/// (the canonical frame used everywhere after normalization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum UpAxis {
    /// Y is vertical, Z points toward the viewer.
    Y,
    /// Z is vertical (canonical).
    #[default]
    Z,
}

impl std::fmt::Display for UpAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpAxis::Y => write!(f, "Y-up"),
            UpAxis::Z => write!(f, "Z-up"),
        }
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// Faces may be empty: a bare point cloud is a valid input and the
/// measurement and projection stages fall back to its convex hull.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,

    /// Orientation tag. Set by the loader as "unknown = Z" and updated by
    /// the orientation normalizer.
    pub up_axis: UpAxis,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            up_axis: UpAxis::Z,
        }
    }

    /// Build a mesh from bare positions and faces.
    pub fn from_positions(positions: &[Point3<f64>], faces: &[[u32; 3]]) -> Self {
        Self {
            vertices: positions.iter().copied().map(Vertex::new).collect(),
            faces: faces.to_vec(),
            up_axis: UpAxis::Z,
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// True if the mesh has no vertices. A face-less mesh is not empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// True if the mesh carries triangles.
    #[inline]
    pub fn has_faces(&self) -> bool {
        !self.faces.is_empty()
    }

    /// Copy of all vertex positions.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.vertices.iter().map(|v| &v.position))
    }

    /// Vertical extent along Z.
    pub fn height(&self) -> f64 {
        self.bounds().map(|(min, max)| max.z - min.z).unwrap_or(0.0)
    }

    /// Mean of all vertex positions.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        mean_point(self.vertices.iter().map(|v| &v.position))
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Scale mesh uniformly around the origin.
    pub fn scale(&mut self, factor: f64) {
        for vertex in &mut self.vertices {
            vertex.position.coords *= factor;
        }
    }

    /// Iterate over triangles as concrete vertex triples.
    ///
    /// Faces must already be validated against the vertex count.
    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| {
            [
                self.vertices[i0 as usize].position,
                self.vertices[i1 as usize].position,
                self.vertices[i2 as usize].position,
            ]
        })
    }

    /// Compute the signed volume of the mesh from origin tetrahedra.
    ///
    /// Positive for closed meshes with outward winding; meaningless for open ones.
    pub fn signed_volume(&self) -> f64 {
        signed_volume(&self.positions(), &self.faces)
    }

    /// True if every edge is shared by exactly two faces.
    pub fn is_closed(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let mut edges: hashbrown::HashMap<(u32, u32), u32> = hashbrown::HashMap::new();
        for &[a, b, c] in &self.faces {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *edges.entry((u.min(v), u.max(v))).or_insert(0) += 1;
            }
        }
        edges.values().all(|&n| n == 2)
    }

    /// Check that the mesh is structurally usable for fitting.
    ///
    /// Rejects meshes with no vertices, non-finite coordinates, face indices
    /// out of range, or zero vertical and horizontal extent.
    pub fn validate(&self) -> FitResult<()> {
        if self.vertices.is_empty() {
            return Err(FitError::empty_mesh("mesh has no vertices"));
        }
        for (i, v) in self.vertices.iter().enumerate() {
            for (axis, value) in [("x", v.position.x), ("y", v.position.y), ("z", v.position.z)] {
                if !value.is_finite() {
                    return Err(FitError::invalid_coordinate(i, axis, value));
                }
            }
        }
        let count = self.vertices.len();
        for (face_index, face) in self.faces.iter().enumerate() {
            if let Some(&bad) = face.iter().find(|&&idx| idx as usize >= count) {
                return Err(FitError::invalid_vertex_index(face_index, bad, count));
            }
        }
        if let Some((min, max)) = self.bounds() {
            let extent = max - min;
            if extent.max() <= f64::EPSILON {
                return Err(FitError::empty_mesh("all vertices coincide"));
            }
        }
        Ok(())
    }
}

/// Signed volume of a triangle soup, summed over origin tetrahedra.
pub fn signed_volume(positions: &[Point3<f64>], faces: &[[u32; 3]]) -> f64 {
    let mut volume = 0.0;
    for &[i0, i1, i2] in faces {
        let (Some(v0), Some(v1), Some(v2)) = (
            positions.get(i0 as usize),
            positions.get(i1 as usize),
            positions.get(i2 as usize),
        ) else {
            continue;
        };
        volume += v0.coords.dot(&v1.coords.cross(&v2.coords));
    }
    volume / 6.0
}

/// Axis-aligned bounds of a point sequence.
pub fn bounds_of<'a>(
    points: impl IntoIterator<Item = &'a Point3<f64>>,
) -> Option<(Point3<f64>, Point3<f64>)> {
    let mut iter = points.into_iter();
    let first = *iter.next()?;
    let (mut min, mut max) = (first, first);
    for p in iter {
        min = min.inf(p);
        max = max.sup(p);
    }
    Some((min, max))
}

/// Mean of a point sequence, None if it is empty.
pub fn mean_point<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Option<Point3<f64>> {
    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    for p in points {
        sum += p.coords;
        count += 1;
    }
    (count > 0).then(|| Point3::from(sum / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tetrahedron() -> Mesh {
        let positions = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        Mesh::from_positions(&positions, &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]])
    }

    #[test]
    fn test_bounds_and_height() {
        let mesh = unit_tetrahedron();
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(mesh.height(), 1.0);
    }

    #[test]
    fn test_signed_volume_of_closed_tetrahedron() {
        let mesh = unit_tetrahedron();
        assert!(mesh.is_closed());
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_cloud_is_not_empty_but_open() {
        let mut mesh = unit_tetrahedron();
        mesh.faces.clear();
        assert!(!mesh.is_empty());
        assert!(!mesh.has_faces());
        assert!(!mesh.is_closed());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(Mesh::new().validate().is_err());

        let mut mesh = unit_tetrahedron();
        assert!(mesh.validate().is_ok());

        mesh.vertices[2].position.y = f64::NAN;
        let err = mesh.validate().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidCoordinate);

        let mut mesh = unit_tetrahedron();
        mesh.faces.push([0, 1, 9]);
        let err = mesh.validate().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidVertexIndex);

        let collapsed = Mesh::from_positions(&[Point3::origin(); 3], &[]);
        assert!(collapsed.validate().is_err());
    }

    #[test]
    fn test_translate_and_scale() {
        let mut mesh = unit_tetrahedron();
        mesh.scale(2.0);
        mesh.translate(Vector3::new(0.0, 0.0, -1.0));
        let (min, max) = mesh.bounds().unwrap();
        assert_relative_eq!(min.z, -1.0);
        assert_relative_eq!(max.z, 1.0);
    }
}

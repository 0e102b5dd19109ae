//! Closest-point projection onto a target body surface.
//!
//! The projector wraps a `parry3d` triangle mesh and answers "nearest point
//! on the surface" queries for every template vertex. A target without faces
//! (a point cloud) is replaced by its convex hull, which over-estimates
//! concave regions but keeps the projection well defined.

use crate::error::{FitError, FitResult};
use crate::Mesh;
use nalgebra::Point3;
use parry3d::query::PointQuery;
use parry3d::shape::TriMesh;

/// Which surface the projector was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionSurface {
    /// The target mesh's own triangles.
    Mesh,
    /// Convex hull of a face-less target.
    ConvexHull,
}

/// Projected points plus per-point distances.
#[derive(Debug, Clone)]
pub struct Projection {
    pub points: Vec<Point3<f64>>,
    pub distances: Vec<f64>,
}

impl Projection {
    /// Mean projection distance, zero for an empty projection.
    pub fn mean_distance(&self) -> f64 {
        if self.distances.is_empty() {
            0.0
        } else {
            self.distances.iter().sum::<f64>() / self.distances.len() as f64
        }
    }
}

/// Nearest-point queries against a fixed surface.
pub struct SurfaceProjector {
    trimesh: TriMesh,
    surface: ProjectionSurface,
}

impl SurfaceProjector {
    /// Build a projector for `mesh`, falling back to its convex hull when it
    /// has no faces.
    pub fn new(mesh: &Mesh) -> FitResult<Self> {
        let positions = mesh.positions();
        let (vertices, indices, surface) = if mesh.has_faces() {
            (positions, mesh.faces.clone(), ProjectionSurface::Mesh)
        } else {
            let (hull_vertices, hull_faces) = convex_hull(&positions)?;
            (hull_vertices, hull_faces, ProjectionSurface::ConvexHull)
        };
        if indices.is_empty() {
            return Err(FitError::empty_mesh("target surface has no triangles"));
        }

        let vertices: Vec<parry3d::math::Point<f32>> = vertices.iter().map(to_parry).collect();
        tracing::debug!(
            vertices = vertices.len(),
            faces = indices.len(),
            surface = ?surface,
            "Built projection surface"
        );
        Ok(Self {
            trimesh: TriMesh::new(vertices, indices),
            surface,
        })
    }

    /// Which surface is being queried.
    pub fn surface(&self) -> ProjectionSurface {
        self.surface
    }

    /// Nearest surface point to `point`.
    pub fn project(&self, point: &Point3<f64>) -> Point3<f64> {
        let (projection, _feature) = self
            .trimesh
            .project_local_point_and_get_feature(&to_parry(point));
        Point3::new(
            projection.point.x as f64,
            projection.point.y as f64,
            projection.point.z as f64,
        )
    }

    /// Project every point and record its distance to the surface.
    pub fn project_all(&self, points: &[Point3<f64>]) -> Projection {
        let projected: Vec<Point3<f64>> = points.iter().map(|p| self.project(p)).collect();
        let distances = points
            .iter()
            .zip(&projected)
            .map(|(p, q)| (p - q).norm())
            .collect();
        Projection {
            points: projected,
            distances,
        }
    }
}

fn to_parry(p: &Point3<f64>) -> parry3d::math::Point<f32> {
    parry3d::math::Point::new(p.x as f32, p.y as f32, p.z as f32)
}

/// Convex hull of a point set as positions plus triangles.
///
/// Needs at least four non-coplanar points.
pub fn convex_hull(points: &[Point3<f64>]) -> FitResult<(Vec<Point3<f64>>, Vec<[u32; 3]>)> {
    if points.len() < 4 {
        return Err(FitError::empty_mesh(format!(
            "convex hull needs at least 4 points, got {}",
            points.len()
        )));
    }
    let input: Vec<parry3d::math::Point<f32>> = points.iter().map(to_parry).collect();
    let (hull_points, hull_faces) = parry3d::transformation::convex_hull(&input);
    if hull_faces.is_empty() {
        return Err(FitError::empty_mesh("point set is degenerate (coplanar)"));
    }
    let hull_points = hull_points
        .iter()
        .map(|p| Point3::new(p.x as f64, p.y as f64, p.z as f64))
        .collect();
    Ok((hull_points, hull_faces))
}

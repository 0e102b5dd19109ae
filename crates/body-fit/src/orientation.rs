//! Orientation normalization.
//!
//! Brings a raw reconstruction into the canonical body frame: Z up, Y
//! forward, left at −X, origin at the pelvis. The pelvis anchor comes from a
//! cross-section at roughly 52% of the body height, where the largest loop is
//! the trunk rather than a leg or an arm.
//!
//! Anchor fallbacks, in order:
//! 1. Center of the largest section loop at the pelvis level.
//! 2. Mean of the vertices in a band around that level.
//! 3. Mesh centroid.
//!
//! Every fallback is logged and reported through [`PelvisSource`], and the
//! fitter lowers its confidence when one was used.

use crate::error::FitResult;
use crate::slice;
use crate::tracing_ext::log_fallback;
use crate::types::{mean_point, Mesh, UpAxis};
use nalgebra::Point3;
use tracing::{debug, info};

/// Tunables for orientation normalization.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct OrientationParams {
    /// Pelvis level as a fraction of body height. Default 0.52.
    pub pelvis_fraction: f64,
    /// Half-width of the vertex band used by the first fallback, as a
    /// fraction of body height. Default 0.05.
    pub fallback_band: f64,
}

impl Default for OrientationParams {
    fn default() -> Self {
        Self {
            pelvis_fraction: 0.52,
            fallback_band: 0.05,
        }
    }
}

impl OrientationParams {
    #[must_use]
    pub const fn with_pelvis_fraction(mut self, fraction: f64) -> Self {
        self.pelvis_fraction = fraction;
        self
    }

    #[must_use]
    pub const fn with_fallback_band(mut self, band: f64) -> Self {
        self.fallback_band = band;
        self
    }
}

/// How the pelvis anchor was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum PelvisSource {
    /// Largest loop of the pelvis cross-section.
    SectionLoop,
    /// Mean of vertices near the pelvis level.
    VertexBand,
    /// Whole-mesh centroid.
    Centroid,
}

impl PelvisSource {
    /// True if the anchor came from a fallback.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, PelvisSource::SectionLoop)
    }
}

/// A mesh in the canonical frame.
#[derive(Debug, Clone)]
pub struct NormalizedMesh {
    /// Z-up, pelvis-centered mesh.
    pub mesh: Mesh,
    /// Up axis detected on the input.
    pub source_up: UpAxis,
    /// Pelvis anchor in the reoriented, roughly centered frame.
    pub pelvis_anchor: Point3<f64>,
    /// How the anchor was found.
    pub pelvis_source: PelvisSource,
    /// Body height (vertical extent).
    pub height: f64,
}

/// Detect the up axis: Z when the Z span exceeds the Y span, else Y.
pub fn detect_up_axis(mesh: &Mesh) -> UpAxis {
    match mesh.bounds() {
        Some((min, max)) if max.z - min.z > max.y - min.y => UpAxis::Z,
        Some(_) => UpAxis::Y,
        None => UpAxis::Z,
    }
}

/// Map a Y-up point into the Z-up frame: (x, y, z) -> (x, −z, y).
#[inline]
pub fn y_up_to_z_up(p: &Point3<f64>) -> Point3<f64> {
    Point3::new(p.x, -p.z, p.y)
}

/// Normalize a raw mesh into the canonical pelvis-centered frame.
///
/// # Errors
///
/// Fails when the mesh has no vertices, non-finite coordinates, or invalid
/// face indices.
pub fn normalize(mesh: &Mesh, params: &OrientationParams) -> FitResult<NormalizedMesh> {
    mesh.validate()?;

    let source_up = detect_up_axis(mesh);
    let mut canonical = mesh.clone();
    if source_up == UpAxis::Y {
        for v in &mut canonical.vertices {
            v.position = y_up_to_z_up(&v.position);
        }
    }
    canonical.up_axis = UpAxis::Z;

    // Rough centering first so lateral loop positions are meaningful.
    if let Some(center) = canonical.centroid() {
        canonical.translate(-center.coords);
    }

    let height = canonical.height();
    let (pelvis_anchor, pelvis_source) = locate_pelvis(&canonical, height, params);
    canonical.translate(-pelvis_anchor.coords);

    info!(
        up_axis = %source_up,
        height = format!("{:.3}", height),
        pelvis_source = ?pelvis_source,
        "Normalized mesh orientation"
    );

    Ok(NormalizedMesh {
        mesh: canonical,
        source_up,
        pelvis_anchor,
        pelvis_source,
        height,
    })
}

fn locate_pelvis(
    mesh: &Mesh,
    height: f64,
    params: &OrientationParams,
) -> (Point3<f64>, PelvisSource) {
    let min_z = mesh.bounds().map_or(0.0, |(min, _)| min.z);
    let pelvis_z = min_z + height * params.pelvis_fraction;

    let cut = slice::section(mesh, pelvis_z);
    if let Some(torso) = cut.largest() {
        let c = torso.center();
        debug!(
            x = c.x,
            y = c.y,
            z = pelvis_z,
            loops = cut.loops.len(),
            "Pelvis from section loop"
        );
        return (Point3::new(c.x, c.y, pelvis_z), PelvisSource::SectionLoop);
    }

    let band = height * params.fallback_band;
    let near = mesh
        .vertices
        .iter()
        .map(|v| &v.position)
        .filter(|p| (p.z - pelvis_z).abs() < band);
    if let Some(mean) = mean_point(near) {
        log_fallback("pelvis", "no loop at pelvis level, using vertex band");
        return (mean, PelvisSource::VertexBand);
    }

    log_fallback("pelvis", "no vertices near pelvis level, using centroid");
    let centroid = mesh.centroid().unwrap_or_else(Point3::origin);
    (centroid, PelvisSource::Centroid)
}

/// Scale factor mapping a mesh of `height` to `target_height`.
///
/// Returns 1.0 when either height is not positive.
pub fn height_scale(height: f64, target_height: f64) -> f64 {
    if height > 0.0 && target_height > 0.0 {
        target_height / height
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FitError, Vertex};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// An uncapped tube whose axis is vertical in either convention.
    fn column(height: f64, radius: f64, y_up: bool) -> Mesh {
        let segments = 24u32;
        let mut mesh = Mesh::new();
        for ring in 0..=10 {
            let h = height * ring as f64 / 10.0 + 3.0;
            for i in 0..segments {
                let a = 2.0 * PI * i as f64 / segments as f64;
                let (u, v) = (radius * a.cos() + 0.5, radius * a.sin() - 0.2);
                let p = if y_up {
                    Vertex::from_coords(u, h, v)
                } else {
                    Vertex::from_coords(u, v, h)
                };
                mesh.vertices.push(p);
            }
        }
        for ring in 0..10u32 {
            for i in 0..segments {
                let j = (i + 1) % segments;
                let (a, b) = (ring * segments + i, ring * segments + j);
                mesh.faces.push([a, b, b + segments]);
                mesh.faces.push([a, b + segments, a + segments]);
            }
        }
        mesh
    }

    #[test]
    fn test_z_up_is_kept() {
        let mesh = column(1.7, 0.15, false);
        assert_eq!(detect_up_axis(&mesh), UpAxis::Z);
        let out = normalize(&mesh, &OrientationParams::default()).unwrap();
        assert_eq!(out.source_up, UpAxis::Z);
        assert_eq!(out.pelvis_source, PelvisSource::SectionLoop);
        assert_relative_eq!(out.height, 1.7, epsilon = 1e-9);
    }

    #[test]
    fn test_y_up_is_rotated_to_z_up() {
        let mesh = column(1.7, 0.15, true);
        assert_eq!(detect_up_axis(&mesh), UpAxis::Y);
        let out = normalize(&mesh, &OrientationParams::default()).unwrap();
        assert_eq!(out.mesh.up_axis, UpAxis::Z);
        assert_relative_eq!(out.height, 1.7, epsilon = 1e-9);
    }

    #[test]
    fn test_pelvis_is_origin_after_normalization() {
        let mesh = column(1.7, 0.15, false);
        let out = normalize(&mesh, &OrientationParams::default()).unwrap();
        let (min, max) = out.mesh.bounds().unwrap();
        // Column axis is centered laterally and 52% of the height is below z=0.
        assert_relative_eq!((min.x + max.x) / 2.0, 0.0, epsilon = 1e-3);
        assert_relative_eq!(-min.z / (max.z - min.z), 0.52, epsilon = 1e-9);
    }

    #[test]
    fn test_sparse_point_cloud_uses_vertex_band() {
        let mut mesh = column(1.7, 0.15, false);
        mesh.faces.clear();
        let out = normalize(&mesh, &OrientationParams::default()).unwrap();
        // Ring spacing is 0.17, so the 1% band around 52% holds no ring.
        assert_eq!(out.pelvis_source, PelvisSource::VertexBand);
    }

    #[test]
    fn test_open_arc_at_pelvis_level_uses_vertex_band() {
        // Half of the tube wall: every cut is an open arc, never a loop.
        let mut mesh = column(1.7, 0.15, false);
        mesh.faces.retain(|f| f[0] % 24 < 12);
        let out = normalize(&mesh, &OrientationParams::default()).unwrap();
        assert_eq!(out.pelvis_source, PelvisSource::VertexBand);
        assert!(out.pelvis_source.is_fallback());
    }

    #[test]
    fn test_empty_mesh_is_fatal() {
        let err = normalize(&Mesh::new(), &OrientationParams::default()).unwrap_err();
        assert!(matches!(err, FitError::EmptyMesh { .. }));
    }

    #[test]
    fn test_height_scale() {
        assert_relative_eq!(height_scale(0.85, 1.7), 2.0);
        assert_relative_eq!(height_scale(0.0, 1.7), 1.0);
    }
}

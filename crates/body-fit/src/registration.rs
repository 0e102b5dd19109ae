//! Rigid alignment of the posed template to the target surface.
//!
//! - [`icp_align`]: damped rotation-only Iterative Closest Point between two
//!   point sets. Translation is handled by centering both sets first.
//! - [`AlignmentCorrection`]: the small fixed rotation and offset applied
//!   after ICP to compensate for a template-specific bias.
//! - [`compute_similarity_transform`]: Kabsch with optional uniform scale, for
//!   paired points.
//!
//! # Example
//!
//! ```
//! use body_fit::registration::{icp_align, IcpParams};
//! use nalgebra::{Point3, Rotation3, Vector3};
//!
//! let source: Vec<Point3<f64>> = (0..64)
//!     .map(|i| {
//!         let t = i as f64 * 0.3;
//!         Point3::new(t.cos(), t.sin() * 0.5, (t * 0.7).sin() * 0.2)
//!     })
//!     .collect();
//! let turn = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.1);
//! let target: Vec<Point3<f64>> = source.iter().map(|p| turn * p).collect();
//!
//! let result = icp_align(&source, &target, &IcpParams::default()).unwrap();
//! assert_eq!(result.aligned.len(), source.len());
//! ```

use crate::error::{FitError, FitResult};
use crate::types::mean_point;
use kiddo::float::kdtree::KdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};
use tracing::debug;

/// Nearest-neighbor index over 3D points.
///
/// Scans carry many vertices with identical coordinates along one axis
/// (rings of a cylinder, a flat sole), so buckets are larger than kiddo's
/// default.
pub(crate) type PointTree = KdTree<f64, u64, 3, 256, u32>;

pub(crate) fn build_tree(points: &[Point3<f64>]) -> PointTree {
    let mut tree = PointTree::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }
    tree
}

/// Parameters for [`icp_align`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct IcpParams {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Fraction of each solved rotation that is applied, in (0, 1].
    pub rotation_damping: f64,
    /// Stop once the mean nearest-neighbor distance falls below this.
    pub convergence_threshold: f64,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            rotation_damping: 0.3,
            convergence_threshold: 1e-3,
        }
    }
}

impl IcpParams {
    #[must_use]
    pub const fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    #[must_use]
    pub const fn with_rotation_damping(mut self, damping: f64) -> Self {
        self.rotation_damping = damping;
        self
    }

    #[must_use]
    pub const fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }
}

/// Outcome of [`icp_align`].
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Source points after alignment, in the target's frame.
    pub aligned: Vec<Point3<f64>>,
    /// Accumulated rotation about the source centroid.
    pub rotation: Rotation3<f64>,
    pub iterations: usize,
    /// Mean nearest-neighbor distance at the last correspondence step.
    pub mean_distance: f64,
    pub converged: bool,
}

impl IcpResult {
    /// Total rotation angle in degrees.
    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.angle().to_degrees()
    }
}

/// Rotate `source` about its centroid onto `target`.
///
/// Both sets are centered on their means; the aligned points are returned
/// around the target's mean. Each iteration pairs every source point with
/// its nearest target point, solves the optimal rotation by SVD, and applies
/// only `rotation_damping` of it.
///
/// # Errors
///
/// Fails when either point set is empty.
pub fn icp_align(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    params: &IcpParams,
) -> FitResult<IcpResult> {
    let (Some(source_mean), Some(target_mean)) = (mean_point(source), mean_point(target)) else {
        return Err(FitError::empty_mesh("ICP needs non-empty source and target"));
    };

    let target_centered: Vec<Point3<f64>> =
        target.iter().map(|p| p - target_mean.coords).collect();
    let mut current: Vec<Point3<f64>> = source.iter().map(|p| p - source_mean.coords).collect();
    let tree = build_tree(&target_centered);

    let mut rotation = Rotation3::identity();
    let mut iterations = 0;
    let mut mean_distance = f64::INFINITY;
    let mut converged = false;

    for iter in 0..params.max_iterations {
        iterations = iter + 1;

        let mut h = Matrix3::zeros();
        let mut total = 0.0;
        for p in &current {
            let nearest = tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z]);
            let matched = &target_centered[nearest.item as usize];
            h += p.coords * matched.coords.transpose();
            total += nearest.distance.sqrt();
        }
        mean_distance = total / current.len() as f64;

        let step = damped(best_rotation(&h), params.rotation_damping);
        for p in &mut current {
            *p = step * *p;
        }
        rotation = step * rotation;

        if mean_distance < params.convergence_threshold {
            converged = true;
            break;
        }
    }

    debug!(
        iterations,
        mean_distance,
        converged,
        degrees = rotation.angle().to_degrees(),
        "ICP finished"
    );

    Ok(IcpResult {
        aligned: current.into_iter().map(|p| p + target_mean.coords).collect(),
        rotation,
        iterations,
        mean_distance,
        converged,
    })
}

/// Rotation maximizing `Σ R·s · t` for a cross-covariance `H = Σ s·tᵀ`.
///
/// A reflection is replaced by the nearest proper rotation. A degenerate
/// covariance yields the identity.
fn best_rotation(h: &Matrix3<f64>) -> Rotation3<f64> {
    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Rotation3::identity();
    };

    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        let mut v_t_fixed = v_t;
        v_t_fixed.set_row(2, &(-v_t.row(2)));
        r = v_t_fixed.transpose() * u.transpose();
    }
    Rotation3::from_matrix_unchecked(r)
}

/// The same axis, with the angle scaled by `factor`.
fn damped(rotation: Rotation3<f64>, factor: f64) -> Rotation3<f64> {
    Rotation3::new(rotation.scaled_axis() * factor)
}

/// Fixed correction applied to the ICP output.
///
/// Rotates about X, then about Z, both around the origin, then adds the
/// offset. Angles are in degrees, the offset is in model units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct AlignmentCorrection {
    pub rotate_x_degrees: f64,
    pub rotate_z_degrees: f64,
    pub offset: [f64; 3],
}

impl Default for AlignmentCorrection {
    fn default() -> Self {
        Self {
            rotate_x_degrees: -3.0,
            rotate_z_degrees: -5.0,
            offset: [0.01, -0.03, 0.03],
        }
    }
}

impl AlignmentCorrection {
    /// A correction that leaves points unchanged.
    pub const fn none() -> Self {
        Self {
            rotate_x_degrees: 0.0,
            rotate_z_degrees: 0.0,
            offset: [0.0; 3],
        }
    }

    #[must_use]
    pub const fn with_rotation_degrees(mut self, about_x: f64, about_z: f64) -> Self {
        self.rotate_x_degrees = about_x;
        self.rotate_z_degrees = about_z;
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: [f64; 3]) -> Self {
        self.offset = offset;
        self
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }

    /// Combined rotation, X first.
    pub fn rotation(&self) -> Rotation3<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotate_x_degrees.to_radians());
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotate_z_degrees.to_radians());
        rz * rx
    }

    pub fn apply(&self, points: &mut [Point3<f64>]) {
        let rotation = self.rotation();
        let offset = Vector3::from(self.offset);
        for p in points {
            *p = rotation * *p + offset;
        }
    }
}

/// Rotation, uniform scale and translation: `p ↦ s·R·p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    /// 1.0 when scale was not solved for.
    pub scale: f64,
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    #[inline]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (point.coords * self.scale) + self.translation)
    }

    /// The inverse mapping.
    pub fn inverse(&self) -> SimilarityTransform {
        let rotation = self.rotation.inverse();
        let scale = 1.0 / self.scale;
        SimilarityTransform {
            rotation,
            translation: rotation * (-self.translation * scale),
            scale,
        }
    }
}

/// Least-squares similarity transform taking `source[i]` onto `target[i]`.
///
/// # Errors
///
/// Fails when the sets are empty or differ in length.
pub fn compute_similarity_transform(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    allow_scaling: bool,
) -> FitResult<SimilarityTransform> {
    if source.len() != target.len() {
        return Err(FitError::fitter_failed(format!(
            "paired point sets differ in length: {} vs {}",
            source.len(),
            target.len()
        )));
    }
    let (Some(source_mean), Some(target_mean)) = (mean_point(source), mean_point(target)) else {
        return Err(FitError::empty_mesh("similarity transform needs paired points"));
    };

    let mut h = Matrix3::zeros();
    let mut source_variance = 0.0;
    let mut target_variance = 0.0;
    for (s, t) in source.iter().zip(target) {
        let s = s - source_mean;
        let t = t - target_mean;
        h += s * t.transpose();
        source_variance += s.norm_squared();
        target_variance += t.norm_squared();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&best_rotation(&h));
    let scale = if allow_scaling && source_variance > 1e-12 {
        (target_variance / source_variance).sqrt()
    } else {
        1.0
    };
    let translation = target_mean.coords - rotation * (source_mean.coords * scale);

    Ok(SimilarityTransform {
        rotation,
        translation,
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// An asymmetric cloud so the rotation is unambiguous.
    fn cloud() -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for i in 0..12 {
            for j in 0..6 {
                let u = i as f64 / 11.0;
                let v = j as f64 / 5.0;
                points.push(Point3::new(
                    u * 1.2 - 0.6,
                    (v - 0.5) * 0.4 + 0.1 * u * u,
                    (u * 3.0).sin() * 0.3 + v * 0.15,
                ));
            }
        }
        points
    }

    #[test]
    fn test_icp_recovers_small_rotation() {
        let source = cloud();
        let turn = Rotation3::from_axis_angle(&Vector3::z_axis(), 8f64.to_radians());
        let target: Vec<Point3<f64>> = source
            .iter()
            .map(|p| turn * p + Vector3::new(0.5, -0.2, 1.0))
            .collect();

        let result = icp_align(&source, &target, &IcpParams::default()).unwrap();

        let tree = build_tree(&target);
        let residual: f64 = result
            .aligned
            .iter()
            .map(|p| {
                tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z])
                    .distance
                    .sqrt()
            })
            .sum::<f64>()
            / source.len() as f64;
        assert!(residual < 1e-3, "residual {residual}");
        assert_relative_eq!(result.rotation_degrees(), 8.0, epsilon = 0.5);
    }

    #[test]
    fn test_icp_identical_sets_converge_immediately() {
        let source = cloud();
        let result = icp_align(&source, &source, &IcpParams::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert_relative_eq!(result.rotation_degrees(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_icp_respects_iteration_cap() {
        let source = cloud();
        let turn = Rotation3::from_axis_angle(&Vector3::x_axis(), 0.2);
        let target: Vec<Point3<f64>> = source.iter().map(|p| turn * p).collect();
        let params = IcpParams::default().with_max_iterations(2);
        let result = icp_align(&source, &target, &params).unwrap();
        assert_eq!(result.iterations, 2);
        assert!(!result.converged);
    }

    #[test]
    fn test_icp_rejects_empty() {
        assert!(icp_align(&[], &cloud(), &IcpParams::default()).is_err());
        assert!(icp_align(&cloud(), &[], &IcpParams::default()).is_err());
    }

    #[test]
    fn test_reflection_is_corrected() {
        // Mirror image across x: the best proper rotation is not a reflection.
        let source = cloud();
        let target: Vec<Point3<f64>> = source.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        let t = compute_similarity_transform(&source, &target, false).unwrap();
        assert_relative_eq!(t.rotation.to_rotation_matrix().matrix().determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_similarity_recovers_scale_and_offset() {
        let source = cloud();
        let truth = SimilarityTransform {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            translation: Vector3::new(1.0, 2.0, -0.5),
            scale: 1.3,
        };
        let target: Vec<Point3<f64>> = source.iter().map(|p| truth.transform_point(p)).collect();

        let solved = compute_similarity_transform(&source, &target, true).unwrap();
        assert_relative_eq!(solved.scale, 1.3, epsilon = 1e-9);
        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(solved.transform_point(s), *t, epsilon = 1e-9);
        }

        let back = solved.inverse();
        assert_relative_eq!(back.transform_point(&target[3]), source[3], epsilon = 1e-9);
    }

    #[test]
    fn test_correction_order() {
        let correction = AlignmentCorrection::none()
            .with_rotation_degrees(90.0, 90.0)
            .with_offset([0.0, 0.0, 1.0]);
        // (0, 1, 0) -X90-> (0, 0, 1) -Z90-> (0, 0, 1), then offset.
        let mut points = [Point3::new(0.0, 1.0, 0.0)];
        correction.apply(&mut points);
        assert_relative_eq!(points[0], Point3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
        assert!(AlignmentCorrection::none().is_identity());
        assert!(!AlignmentCorrection::default().is_identity());
    }
}

//! Property-based tests for the fitting building blocks.
//!
//! Run with: cargo test -p body-fit -- proptest

use body_fit::classify::{dress_size, size_range, MAX_SIZE};
use body_fit::measure::{confidence_from_error, Degradation};
use body_fit::pose::{minimal_rotation, root_heading};
use body_fit::registration::{compute_similarity_transform, icp_align};
use body_fit::slice::section;
use body_fit::{ConfidencePenalties, IcpParams, Joint, JointSet, Mesh, Phenotype, PhenotypeVector};
use nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};
use proptest::prelude::*;
use std::f64::consts::PI;

// =============================================================================
// Strategies
// =============================================================================

fn arb_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-1.0..1.0f64).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// Point clouds spread enough to pin down a rotation.
fn arb_cloud() -> impl Strategy<Value = Vec<Point3<f64>>> {
    prop::collection::vec(arb_point(), 8..40).prop_filter("spread out", |pts| {
        let mean = pts.iter().fold(Vector3::zeros(), |a, p| a + p.coords) / pts.len() as f64;
        let spread: f64 = pts.iter().map(|p| (p.coords - mean).norm_squared()).sum();
        spread / pts.len() as f64 > 0.1
    })
}

fn arb_rotation() -> impl Strategy<Value = UnitQuaternion<f64>> {
    (prop::array::uniform3(-1.0..1.0f64), 0.0..PI).prop_filter_map(
        "non-zero axis",
        |([x, y, z], angle)| {
            let axis = Vector3::new(x, y, z);
            (axis.norm() > 0.1)
                .then(|| UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_normalize(axis), angle))
        },
    )
}

/// Closed vertical cylinder of `radius` spanning z in [0, 1].
fn cylinder(radius: f64, segments: u32) -> Mesh {
    let mut positions = Vec::new();
    for level in [0.0, 1.0] {
        for i in 0..segments {
            let a = 2.0 * PI * f64::from(i) / f64::from(segments);
            positions.push(Point3::new(radius * a.cos(), radius * a.sin(), level));
        }
    }
    positions.push(Point3::new(0.0, 0.0, 0.0));
    positions.push(Point3::new(0.0, 0.0, 1.0));
    let (bottom_center, top_center) = (2 * segments, 2 * segments + 1);

    let mut faces = Vec::new();
    for i in 0..segments {
        let j = (i + 1) % segments;
        faces.push([i, j, segments + j]);
        faces.push([i, segments + j, segments + i]);
        faces.push([bottom_center, j, i]);
        faces.push([top_center, segments + i, segments + j]);
    }
    Mesh::from_positions(&positions, &faces)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn proptest_phenotypes_stay_in_unit_range(value in -10.0..10.0f64, index in 0usize..7) {
        let field = Phenotype::ALL[index % Phenotype::ALL.len()];
        let v = PhenotypeVector::default().with(field, value);
        prop_assert!((0.0..=1.0).contains(&v.get(field)));
        if (0.0..=1.0).contains(&value) {
            prop_assert_eq!(v.get(field), value);
        }
    }

    #[test]
    fn proptest_dress_size_is_monotone(
        bust in 20.0..60.0f64,
        waist in 15.0..50.0f64,
        hips in 25.0..65.0f64,
        grow in 0.0..5.0f64,
    ) {
        let size = dress_size(bust, waist, hips);
        prop_assert!(size <= MAX_SIZE);
        prop_assert!(dress_size(bust + grow, waist + grow, hips + grow) >= size);

        let (low, high) = size_range(size);
        prop_assert!(low <= size && size <= high && high <= MAX_SIZE);
    }

    #[test]
    fn proptest_confidence_is_bounded_and_decreasing(a in 0.0..0.2f64, b in 0.0..0.2f64) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let (c_near, c_far) = (confidence_from_error(near), confidence_from_error(far));
        prop_assert!((0.0..=1.0).contains(&c_near));
        prop_assert!(c_far <= c_near);
    }

    #[test]
    fn proptest_penalties_never_drop_below_floor(
        missing_height: bool,
        pelvis_fallback: bool,
        skipped_chains in 0usize..6,
    ) {
        let penalties = ConfidencePenalties::default();
        let degradation = Degradation { missing_height, pelvis_fallback, skipped_chains };
        let factor = penalties.factor(&degradation);
        prop_assert!(factor >= penalties.floor && factor <= 1.0);
    }

    #[test]
    fn proptest_similarity_recovers_known_transform(
        cloud in arb_cloud(),
        rotation in arb_rotation(),
        scale in 0.2..5.0f64,
        offset in prop::array::uniform3(-10.0..10.0f64),
    ) {
        let t = Vector3::from(offset);
        let target: Vec<Point3<f64>> = cloud
            .iter()
            .map(|p| Point3::from(rotation * (p.coords * scale) + t))
            .collect();
        let solved = compute_similarity_transform(&cloud, &target, true).unwrap();
        prop_assert!((solved.scale - scale).abs() < 1e-6 * scale);
        for (p, q) in cloud.iter().zip(&target) {
            prop_assert!((solved.transform_point(p) - q).norm() < 1e-6 * (1.0 + scale));
        }
    }

    #[test]
    fn proptest_icp_on_identical_clouds_stays_put(cloud in arb_cloud()) {
        let result = icp_align(&cloud, &cloud, &IcpParams::default()).unwrap();
        prop_assert!(result.mean_distance < 1e-9);
        prop_assert!(result.rotation_degrees() < 1e-3);
        prop_assert!(result.converged);
    }

    #[test]
    fn proptest_root_heading_recovers_yaw(yaw in -3.0..3.0f64, width in 0.05..0.3f64) {
        let source: JointSet = [
            (Joint::HipL, Point3::new(-width, 0.0, 0.0)),
            (Joint::HipR, Point3::new(width, 0.0, 0.0)),
        ]
        .into_iter()
        .collect();
        let turn = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw);
        let target = source.map(|p| turn * p);
        let solved = root_heading(&source, &target).unwrap();
        prop_assert!((solved - yaw).abs() < 1e-9);
    }

    #[test]
    fn proptest_minimal_rotation_maps_from_onto_to(a in arb_point(), b in arb_point()) {
        prop_assume!(a.coords.norm() > 0.1 && b.coords.norm() > 0.1);
        let from = a.coords.normalize();
        let to = b.coords.normalize();
        let r = minimal_rotation(&from, &to);
        prop_assert!((r * from - to).norm() < 1e-6);
    }

    #[test]
    fn proptest_cylinder_section_perimeter(radius in 0.05..2.0f64, level in 0.1..0.9f64) {
        let segments = 64;
        let mesh = cylinder(radius, segments);
        let cut = section(&mesh, level);
        let ring = cut.largest().unwrap();
        // Inscribed polygon perimeter.
        let expected = 2.0 * f64::from(segments) * radius * (PI / f64::from(segments)).sin();
        prop_assert!((ring.perimeter() - expected).abs() < 1e-6 * (1.0 + radius));
    }
}

//! Coarse body summary used to seed the shape estimate.

use crate::slice;
use crate::surface::convex_hull;
use crate::types::{signed_volume, Mesh};
use nalgebra::Point3;

/// Hull volume overstates a concave body by roughly this factor.
const HULL_VOLUME_FACTOR: f64 = 0.85;

/// Largest-loop circumferences at fixed trunk levels, in mesh units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrunkCircumferences {
    /// At 72% of height.
    pub bust: Option<f64>,
    /// At 62% of height.
    pub waist: Option<f64>,
    /// At 53% of height.
    pub hips: Option<f64>,
}

/// Height, shoulder level, trunk circumferences and volume of a body mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletalLandmarks {
    pub height: f64,
    pub min_z: f64,
    pub max_z: f64,
    /// Level where the arms separate from the torso.
    pub shoulder_z: f64,
    pub pelvis_center: Option<Point3<f64>>,
    pub circumferences: TrunkCircumferences,
    /// Enclosed volume when the mesh is closed, else a hull-based estimate.
    pub volume: Option<f64>,
}

/// Measure the summary on a normalized (Z-up) mesh.
pub fn measure(mesh: &Mesh) -> SkeletalLandmarks {
    let (min_z, max_z) = mesh
        .bounds()
        .map_or((0.0, 0.0), |(min, max)| (min.z, max.z));
    let height = max_z - min_z;
    let level = |fraction: f64| min_z + height * fraction;

    let pelvis_z = level(0.53);
    let pelvis_center = slice::section(mesh, pelvis_z)
        .largest()
        .map(|l| {
            let c = l.center();
            Point3::new(c.x, c.y, pelvis_z)
        });

    // Arms split from the torso somewhere between 80% and 66%.
    let shoulder_z = (66..=80)
        .rev()
        .step_by(2)
        .map(|pct| level(pct as f64 / 100.0))
        .find(|&z| slice::section(mesh, z).closed_count() >= 3)
        .unwrap_or_else(|| level(0.73));

    let largest_at = |fraction: f64| {
        slice::section(mesh, level(fraction))
            .largest()
            .map(|l| l.perimeter())
    };
    let circumferences = TrunkCircumferences {
        bust: largest_at(0.72),
        waist: largest_at(0.62),
        hips: largest_at(0.53),
    };

    SkeletalLandmarks {
        height,
        min_z,
        max_z,
        shoulder_z,
        pelvis_center,
        circumferences,
        volume: estimate_volume(mesh),
    }
}

fn estimate_volume(mesh: &Mesh) -> Option<f64> {
    if mesh.is_closed() {
        return Some(mesh.signed_volume().abs());
    }
    let (points, faces) = convex_hull(&mesh.positions()).ok()?;
    Some(signed_volume(&points, &faces).abs() * HULL_VOLUME_FACTOR)
}

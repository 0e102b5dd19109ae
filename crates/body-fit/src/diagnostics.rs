//! Visual diagnostics for a fit.
//!
//! Writes PLY files next to a caller-chosen prefix:
//!
//! | suffix | content |
//! |---|---|
//! | `_target_joints.ply` | one colored octahedron per target joint |
//! | `_target_joints_points.ply` | one vertex per joint in [`Joint::ALL`] order, NaN when missing |
//! | `_template_joints.ply`, `_template_joints_points.ply` | same for the template |
//! | `_keypoints.ply` | every canonicalized keypoint, when keypoints were used |
//! | `_aligned_template.ply` | the posed template after ICP |
//! | `_target_projection.ply` | closest points on the target, on template faces |

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use tracing::info;

use crate::error::FitResult;
use crate::fitting::FitDiagnostics;
use crate::io::{save_ply, PlyEncoding};
use crate::joints::{Joint, JointSet};
use crate::{Mesh, Vertex, VertexColor};

/// Marker size for joints, in model units.
pub const JOINT_MARKER_RADIUS: f64 = 0.02;
/// Marker size for keypoints.
pub const KEYPOINT_MARKER_RADIUS: f64 = 0.01;

/// Fixed marker color per joint.
pub const fn joint_color(joint: Joint) -> VertexColor {
    let [r, g, b] = match joint {
        Joint::Pelvis => [255, 0, 0],
        Joint::HipL => [255, 128, 0],
        Joint::HipR => [255, 64, 0],
        Joint::KneeL => [255, 255, 0],
        Joint::KneeR => [200, 200, 0],
        Joint::AnkleL => [0, 255, 0],
        Joint::AnkleR => [0, 200, 0],
        Joint::ShoulderL => [0, 255, 255],
        Joint::ShoulderR => [0, 200, 200],
        Joint::ElbowL => [0, 128, 255],
        Joint::ElbowR => [0, 64, 255],
        Joint::WristL => [128, 0, 255],
        Joint::WristR => [64, 0, 255],
        Joint::Neck => [255, 0, 255],
        Joint::Head => [255, 255, 255],
    };
    VertexColor::new(r, g, b)
}

/// Append a closed octahedron centered at `center`.
fn push_octahedron(mesh: &mut Mesh, center: &Point3<f64>, radius: f64, color: VertexColor) {
    let base = mesh.vertices.len() as u32;
    let axes = [
        Vector3::x(),
        -Vector3::x(),
        Vector3::y(),
        -Vector3::y(),
        Vector3::z(),
        -Vector3::z(),
    ];
    for axis in axes {
        mesh.vertices
            .push(Vertex::with_color(center + axis * radius, color));
    }
    // +x, -x, +y, -y, +z, -z
    const FACES: [[u32; 3]; 8] = [
        [0, 2, 4],
        [2, 1, 4],
        [1, 3, 4],
        [3, 0, 4],
        [2, 0, 5],
        [1, 2, 5],
        [3, 1, 5],
        [0, 3, 5],
    ];
    mesh.faces
        .extend(FACES.iter().map(|f| [base + f[0], base + f[1], base + f[2]]));
}

/// Colored octahedra for every present joint.
pub fn joint_markers(joints: &JointSet, radius: f64) -> Mesh {
    let mut mesh = Mesh::with_capacity(joints.len() * 6, joints.len() * 8);
    for (joint, position) in joints.iter() {
        push_octahedron(&mut mesh, &position, radius, joint_color(joint));
    }
    mesh
}

/// One vertex per joint in [`Joint::ALL`] order; missing joints are NaN.
pub fn joint_points(joints: &JointSet) -> Mesh {
    let nan = Point3::new(f64::NAN, f64::NAN, f64::NAN);
    let positions: Vec<Point3<f64>> = Joint::ALL
        .iter()
        .map(|&j| joints.get(j).unwrap_or(nan))
        .collect();
    Mesh::from_positions(&positions, &[])
}

/// Octahedra for keypoints, colored along a hue ramp by index.
pub fn keypoint_markers(points: &[Point3<f64>], radius: f64) -> Mesh {
    let mut mesh = Mesh::with_capacity(points.len() * 6, points.len() * 8);
    let n = points.len().max(1) as f32;
    for (i, p) in points.iter().enumerate() {
        push_octahedron(&mut mesh, p, radius, hue(i as f32 / n));
    }
    mesh
}

/// Fully saturated color at `h` turns around the hue wheel.
fn hue(h: f32) -> VertexColor {
    let h = h.rem_euclid(1.0) * 6.0;
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    VertexColor::from_float(r, g, b)
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write a joint set as markers plus an ordered points file.
///
/// # Errors
///
/// Fails when a file cannot be written.
pub fn export_joints(prefix: &Path, label: &str, joints: &JointSet) -> FitResult<Vec<PathBuf>> {
    let markers = with_suffix(prefix, &format!("_{label}.ply"));
    let points = with_suffix(prefix, &format!("_{label}_points.ply"));
    save_ply(&joint_markers(joints, JOINT_MARKER_RADIUS), &markers, PlyEncoding::Ascii)?;
    save_ply(&joint_points(joints), &points, PlyEncoding::Ascii)?;
    Ok(vec![markers, points])
}

/// Write every diagnostic artifact of a fit.
///
/// # Errors
///
/// Fails when a file cannot be written.
pub fn export(prefix: &Path, diagnostics: &FitDiagnostics) -> FitResult<Vec<PathBuf>> {
    let mut written = export_joints(prefix, "target_joints", &diagnostics.target_joints)?;
    written.extend(export_joints(prefix, "template_joints", &diagnostics.template_joints)?);

    if let Some(keypoints) = &diagnostics.keypoints {
        let path = with_suffix(prefix, "_keypoints.ply");
        save_ply(
            &keypoint_markers(keypoints, KEYPOINT_MARKER_RADIUS),
            &path,
            PlyEncoding::Ascii,
        )?;
        written.push(path);
    }

    for (suffix, points) in [
        ("_aligned_template.ply", &diagnostics.aligned_template),
        ("_target_projection.ply", &diagnostics.projected_target),
    ] {
        let path = with_suffix(prefix, suffix);
        let mesh = Mesh::from_positions(points, &diagnostics.template_faces);
        save_ply(&mesh, &path, PlyEncoding::BinaryLittleEndian)?;
        written.push(path);
    }

    info!(files = written.len(), prefix = %prefix.display(), "Exported fit diagnostics");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::IcpSummary;

    fn joints() -> JointSet {
        let mut set = JointSet::new();
        set.set(Joint::Pelvis, Point3::origin());
        set.set(Joint::Head, Point3::new(0.0, 0.0, 0.8));
        set
    }

    #[test]
    fn test_markers_are_closed_and_colored() {
        let mesh = joint_markers(&joints(), 0.02);
        assert_eq!(mesh.vertex_count(), 12);
        assert_eq!(mesh.face_count(), 16);
        assert!(mesh.is_closed());
        assert!(mesh.signed_volume() > 0.0);
        assert_eq!(mesh.vertices[0].color, Some(VertexColor::new(255, 0, 0)));
    }

    #[test]
    fn test_points_keep_joint_order() {
        let mesh = joint_points(&joints());
        assert_eq!(mesh.vertex_count(), Joint::COUNT);
        assert_eq!(mesh.vertices[Joint::Head.index()].position.z, 0.8);
        assert!(mesh.vertices[Joint::KneeL.index()].position.x.is_nan());
    }

    #[test]
    fn test_hue_ramp() {
        assert_eq!(hue(0.0), VertexColor::new(255, 0, 0));
        assert_eq!(hue(1.0 / 3.0), VertexColor::new(0, 255, 0));
    }

    #[test]
    fn test_export_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("fit");
        let diagnostics = FitDiagnostics {
            target_joints: joints(),
            template_joints: joints(),
            keypoints: Some(vec![Point3::origin(); 3]),
            aligned_template: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            template_faces: vec![[0, 1, 2]],
            projected_target: vec![
                Point3::new(0.0, 0.0, 0.1),
                Point3::new(1.0, 0.0, 0.1),
                Point3::new(0.0, 1.0, 0.1),
            ],
            projection_distances: vec![0.1; 3],
            icp: IcpSummary {
                iterations: 1,
                mean_distance: 0.0,
                converged: true,
                rotation_degrees: 0.0,
            },
        };
        let written = export(&prefix, &diagnostics).unwrap();
        assert_eq!(written.len(), 7);
        for path in &written {
            assert!(path.exists(), "{}", path.display());
        }
        assert!(dir.path().join("fit_target_joints_points.ply").exists());
    }
}

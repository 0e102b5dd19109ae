//! Joint extraction from mesh geometry alone.
//!
//! The extractor scans horizontal cross-sections and reads joints off the
//! loop structure:
//!
//! - **Shoulders**: first level, scanning down from 82%, where three or more
//!   loops appear (torso plus two arms). The non-central loops are the arms.
//! - **Elbows, wrists**: arm loops tracked downward from the shoulders by
//!   proximity to the previous arm position.
//! - **Pelvis**: one merged loop, or the mean of the limb loops, from 52% down.
//! - **Hips**: the two loops nearest the pelvis laterally in the 48–41% band.
//! - **Knees, ankles**: fixed levels (28%, 5%), split by the sign of X.
//! - **Neck, head**: the most central loop near 85% and 95%.
//!
//! Every tracked arm position is remembered, and loops close to one are
//! ignored when looking for pelvis, hip and knee loops, so a hanging hand is
//! never mistaken for a thigh.
//!
//! Lateral thresholds are in meters for a 1.70 m body and scale with the
//! actual mesh height.

use super::TrackedArms;
use crate::joints::{Joint, JointSet, Side};
use crate::slice::{self, Section};
use crate::tracing_ext::log_fallback;
use crate::types::{mean_point, Mesh};
use nalgebra::{Point2, Point3};
use tracing::{debug, trace};

/// Tunables for geometric joint extraction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct GeometricParams {
    /// Body height the lateral thresholds were tuned for (m).
    pub reference_height: f64,
    /// Minimum |x| of an arm loop below the shoulders.
    pub arm_lateral_min: f64,
    /// Loops with |x| below this and |y| below `torso_depth_max` are torso.
    pub torso_lateral_max: f64,
    pub torso_depth_max: f64,
    /// Maximum step between successive wrist-tracking positions.
    pub wrist_track_radius: f64,
    /// Loops within this distance of a tracked arm position are arm loops.
    pub arm_exclusion_radius: f64,
    /// Height fractions of the fixed-level joints.
    pub knee_fraction: f64,
    pub ankle_fraction: f64,
    pub neck_fraction: f64,
    pub head_fraction: f64,
}

impl Default for GeometricParams {
    fn default() -> Self {
        Self {
            reference_height: 1.70,
            arm_lateral_min: 0.05,
            torso_lateral_max: 0.03,
            torso_depth_max: 0.10,
            wrist_track_radius: 0.15,
            arm_exclusion_radius: 0.08,
            knee_fraction: 0.28,
            ankle_fraction: 0.05,
            neck_fraction: 0.85,
            head_fraction: 0.95,
        }
    }
}

impl GeometricParams {
    #[must_use]
    pub const fn with_reference_height(mut self, meters: f64) -> Self {
        self.reference_height = meters;
        self
    }

    #[must_use]
    pub const fn with_arm_exclusion_radius(mut self, radius: f64) -> Self {
        self.arm_exclusion_radius = radius;
        self
    }
}

/// Percent levels scanned for each joint group.
const SHOULDER_LEVELS: std::ops::RangeInclusive<u32> = 69..=82;
const PELVIS_LEVELS: std::ops::RangeInclusive<u32> = 45..=52;
const HIP_LEVELS: std::ops::RangeInclusive<u32> = 41..=48;
/// Offsets below the shoulder (elbows) or elbow (wrists), in percent.
const ELBOW_OFFSETS: std::ops::Range<u32> = 5..25;
const WRIST_OFFSETS: std::ops::Range<u32> = 5..35;
const ELBOW_FLOOR: f64 = 0.45;
const WRIST_FLOOR: f64 = 0.20;
const PELVIS_FALLBACK_LEVEL: f64 = 0.50;
const PELVIS_FALLBACK_BAND: f64 = 0.05;
const HEAD_FALLBACK_LEVEL: f64 = 0.90;

/// Geometric joint extractor bound to one mesh.
pub struct GeometricExtractor<'a> {
    mesh: &'a Mesh,
    min_z: f64,
    height: f64,
    /// Threshold scale: mesh height over the reference height.
    scale: f64,
    params: &'a GeometricParams,
    arms: TrackedArms,
    fallbacks: Vec<&'static str>,
}

/// Joints plus the names of any joints that came from a fallback.
#[derive(Debug, Clone)]
pub struct GeometricJoints {
    pub joints: JointSet,
    pub fallbacks: Vec<&'static str>,
}

impl<'a> GeometricExtractor<'a> {
    pub fn new(mesh: &'a Mesh, params: &'a GeometricParams) -> Self {
        let (min_z, height) = match mesh.bounds() {
            Some((min, max)) => (min.z, max.z - min.z),
            None => (0.0, 0.0),
        };
        let scale = if params.reference_height > 0.0 && height > 0.0 {
            height / params.reference_height
        } else {
            1.0
        };
        Self {
            mesh,
            min_z,
            height,
            scale,
            params,
            arms: TrackedArms::default(),
            fallbacks: Vec::new(),
        }
    }

    /// Run every stage in dependency order.
    pub fn extract(mut self) -> GeometricJoints {
        let mut joints = JointSet::new();
        if self.height <= 0.0 {
            return GeometricJoints {
                joints,
                fallbacks: self.fallbacks,
            };
        }

        self.find_shoulders(&mut joints);
        self.find_elbows(&mut joints);
        self.find_wrists(&mut joints);
        self.find_pelvis(&mut joints);
        self.find_hips(&mut joints);
        self.find_knees(&mut joints);
        self.find_ankles(&mut joints);
        self.find_neck(&mut joints);
        self.find_head(&mut joints);

        debug!(
            joints = joints.len(),
            fallbacks = self.fallbacks.len(),
            "Extracted joints from mesh geometry"
        );
        GeometricJoints {
            joints,
            fallbacks: self.fallbacks,
        }
    }

    fn level(&self, fraction: f64) -> f64 {
        self.min_z + self.height * fraction
    }

    fn centers_at(&self, z: f64) -> Vec<Point3<f64>> {
        let cut: Section = slice::section(self.mesh, z);
        trace!(z, loops = cut.closed_count(), "Scanned level");
        cut.centers()
    }

    fn find_shoulders(&mut self, joints: &mut JointSet) {
        for pct in SHOULDER_LEVELS.rev() {
            let z = self.level(pct as f64 / 100.0);
            let centers = self.centers_at(z);
            if centers.len() < 3 {
                continue;
            }
            let Some(torso) = most_central(&centers) else {
                continue;
            };
            let arms: Vec<Point3<f64>> = centers.iter().copied().filter(|c| *c != torso).collect();
            let (left, right) = split_sides(&arms);
            if let Some(l) = left {
                let shoulder = Point3::new(l.x, l.y, z);
                joints.set(Joint::ShoulderL, shoulder);
                self.arms.push(Side::Left, &shoulder);
            }
            if let Some(r) = right {
                let shoulder = Point3::new(r.x, r.y, z);
                joints.set(Joint::ShoulderR, shoulder);
                self.arms.push(Side::Right, &shoulder);
            }
            debug!(z, level = pct, "Found shoulder level");
            return;
        }
    }

    fn find_elbows(&mut self, joints: &mut JointSet) {
        let Some(shoulder) = joints
            .get(Joint::ShoulderL)
            .or_else(|| joints.get(Joint::ShoulderR))
        else {
            return;
        };
        let arm_min = self.params.arm_lateral_min * self.scale;
        let floor = self.level(ELBOW_FLOOR);

        for offset in ELBOW_OFFSETS.step_by(2) {
            let z = shoulder.z - self.height * offset as f64 / 100.0;
            if z < floor {
                break;
            }
            let arm_loops: Vec<Point3<f64>> = self
                .centers_at(z)
                .into_iter()
                .filter(|c| c.x.abs() > arm_min)
                .collect();
            if arm_loops.len() < 2 {
                continue;
            }
            let (left, right) = split_sides(&arm_loops);
            if let Some(l) = left {
                if joints.set_if_missing(Joint::ElbowL, l) {
                    self.arms.push(Side::Left, &l);
                }
            }
            if let Some(r) = right {
                if joints.set_if_missing(Joint::ElbowR, r) {
                    self.arms.push(Side::Right, &r);
                }
            }
            if joints.contains(Joint::ElbowL) && joints.contains(Joint::ElbowR) {
                break;
            }
        }
    }

    fn find_wrists(&mut self, joints: &mut JointSet) {
        let radius = self.params.wrist_track_radius * self.scale;
        let torso_x = self.params.torso_lateral_max * self.scale;
        let torso_y = self.params.torso_depth_max * self.scale;
        let floor = self.level(WRIST_FLOOR);

        for (side, elbow_joint, wrist_joint) in [
            (Side::Left, Joint::ElbowL, Joint::WristL),
            (Side::Right, Joint::ElbowR, Joint::WristR),
        ] {
            let Some(elbow) = joints.get(elbow_joint) else {
                continue;
            };
            let mut last = elbow;

            for offset in WRIST_OFFSETS.step_by(2) {
                let z = elbow.z - self.height * offset as f64 / 100.0;
                if z < floor {
                    break;
                }
                let best = self
                    .centers_at(z)
                    .into_iter()
                    .filter(|c| !(c.x.abs() < torso_x && c.y.abs() < torso_y))
                    .map(|c| (planar_distance(&c, &last), c))
                    .filter(|(d, _)| *d < radius)
                    .min_by(|a, b| a.0.total_cmp(&b.0));
                if let Some((_, c)) = best {
                    last = c;
                    joints.set(wrist_joint, c);
                    self.arms.push(side, &c);
                }
            }
        }
    }

    fn body_loops_at(&self, z: f64) -> Vec<Point3<f64>> {
        let radius = self.params.arm_exclusion_radius * self.scale;
        self.centers_at(z)
            .into_iter()
            .filter(|c| !self.arms.is_near(c, radius))
            .collect()
    }

    fn find_pelvis(&mut self, joints: &mut JointSet) {
        for pct in PELVIS_LEVELS.rev() {
            let z = self.level(pct as f64 / 100.0);
            let body = self.body_loops_at(z);
            match body.len() {
                0 => continue,
                1 => joints.set(Joint::Pelvis, body[0]),
                _ => {
                    let mean = mean_point(&body).unwrap_or_else(Point3::origin);
                    joints.set(Joint::Pelvis, Point3::new(mean.x, mean.y, z));
                }
            }
            return;
        }

        let z = self.level(PELVIS_FALLBACK_LEVEL);
        let band = self.height * PELVIS_FALLBACK_BAND;
        let near = self
            .mesh
            .vertices
            .iter()
            .map(|v| &v.position)
            .filter(|p| (p.z - z).abs() < band);
        let pelvis = mean_point(near).unwrap_or_else(|| Point3::new(0.0, 0.0, z));
        log_fallback("pelvis_joint", "no body loop in pelvis band");
        self.fallbacks.push("pelvis");
        joints.set(Joint::Pelvis, pelvis);
    }

    fn find_hips(&mut self, joints: &mut JointSet) {
        for pct in HIP_LEVELS.rev() {
            let z = self.level(pct as f64 / 100.0);
            let mut legs = self.body_loops_at(z);
            if legs.len() < 2 {
                continue;
            }
            if let Some(pelvis) = joints.get(Joint::Pelvis) {
                legs.sort_by(|a, b| (a.x - pelvis.x).abs().total_cmp(&(b.x - pelvis.x).abs()));
                legs.truncate(2);
            }
            set_pair(joints, &legs, Joint::HipL, Joint::HipR);
            return;
        }
    }

    fn find_knees(&mut self, joints: &mut JointSet) {
        let z = self.level(self.params.knee_fraction);
        let legs = self.body_loops_at(z);
        if legs.len() >= 2 {
            set_pair(joints, &legs, Joint::KneeL, Joint::KneeR);
        }
    }

    fn find_ankles(&mut self, joints: &mut JointSet) {
        let z = self.level(self.params.ankle_fraction);
        let legs = self.centers_at(z);
        if legs.len() >= 2 {
            set_pair(joints, &legs, Joint::AnkleL, Joint::AnkleR);
        }
    }

    fn find_neck(&mut self, joints: &mut JointSet) {
        let z = self.level(self.params.neck_fraction);
        let neck = most_central(&self.centers_at(z)).unwrap_or_else(|| {
            self.fallbacks.push("neck");
            Point3::new(0.0, 0.0, z)
        });
        joints.set(Joint::Neck, neck);
    }

    fn find_head(&mut self, joints: &mut JointSet) {
        let z = self.level(self.params.head_fraction);
        if let Some(head) = most_central(&self.centers_at(z)) {
            joints.set(Joint::Head, head);
            return;
        }
        self.fallbacks.push("head");
        let top = self.level(HEAD_FALLBACK_LEVEL);
        let head = mean_point(
            self.mesh
                .vertices
                .iter()
                .map(|v| &v.position)
                .filter(|p| p.z > top),
        )
        .unwrap_or_else(|| Point3::new(0.0, 0.0, z));
        joints.set(Joint::Head, head);
    }
}

/// Loop center nearest the body axis by |x| + |y|.
fn most_central(centers: &[Point3<f64>]) -> Option<Point3<f64>> {
    centers
        .iter()
        .copied()
        .min_by(|a, b| (a.x.abs() + a.y.abs()).total_cmp(&(b.x.abs() + b.y.abs())))
}

/// Mean center of the loops on each side.
fn split_sides(centers: &[Point3<f64>]) -> (Option<Point3<f64>>, Option<Point3<f64>>) {
    let left = mean_point(centers.iter().filter(|c| Side::of_x(c.x) == Side::Left));
    let right = mean_point(centers.iter().filter(|c| Side::of_x(c.x) == Side::Right));
    (left, right)
}

fn set_pair(joints: &mut JointSet, centers: &[Point3<f64>], left_joint: Joint, right_joint: Joint) {
    let (left, right) = split_sides(centers);
    if let Some(l) = left {
        joints.set(left_joint, l);
    }
    if let Some(r) = right {
        joints.set(right_joint, r);
    }
}

#[inline]
fn planar_distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    (Point2::new(a.x, a.y) - Point2::new(b.x, b.y)).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_split_sides_averages_each_side() {
        let centers = [
            Point3::new(-0.2, 0.0, 1.0),
            Point3::new(-0.4, 0.0, 1.0),
            Point3::new(0.3, 0.1, 1.0),
        ];
        let (l, r) = split_sides(&centers);
        assert_relative_eq!(l.unwrap().x, -0.3);
        assert_relative_eq!(r.unwrap().y, 0.1);
    }

    #[test]
    fn test_most_central_uses_manhattan_offset() {
        let centers = [Point3::new(0.05, 0.05, 0.0), Point3::new(0.0, 0.09, 0.0)];
        assert_relative_eq!(most_central(&centers).unwrap().y, 0.09);
    }

    /// Closed tube around (cx, cy) from `z0` to `z1`.
    fn tube(cx: f64, cy: f64, radius: f64, z0: f64, z1: f64) -> Mesh {
        let segments = 24u32;
        let mut positions = Vec::new();
        for z in [z0, z1] {
            for k in 0..segments {
                let t = std::f64::consts::TAU * f64::from(k) / f64::from(segments);
                positions.push(Point3::new(cx + radius * t.cos(), cy + radius * t.sin(), z));
            }
        }
        positions.push(Point3::new(cx, cy, z0));
        positions.push(Point3::new(cx, cy, z1));
        let (bottom, top) = (2 * segments, 2 * segments + 1);
        let mut faces = Vec::new();
        for k in 0..segments {
            let next = (k + 1) % segments;
            faces.push([k, next, segments + next]);
            faces.push([k, segments + next, segments + k]);
            faces.push([bottom, next, k]);
            faces.push([top, segments + k, segments + next]);
        }
        Mesh::from_positions(&positions, &faces)
    }

    /// A 1.70 m stick figure whose arms hang down past the knees, so every
    /// leg-level scan also cuts both arms.
    fn stick_figure() -> Mesh {
        let parts = [
            tube(-0.09, 0.0, 0.06, 0.0, 0.80),
            tube(0.09, 0.0, 0.06, 0.0, 0.80),
            tube(0.0, 0.0, 0.15, 0.82, 1.40),
            tube(-0.25, 0.0, 0.04, 0.40, 1.38),
            tube(0.25, 0.0, 0.04, 0.40, 1.38),
            tube(0.0, 0.0, 0.05, 1.41, 1.54),
            tube(0.0, 0.0, 0.09, 1.55, 1.70),
        ];
        let mut body = Mesh::new();
        for part in &parts {
            let offset = body.vertices.len() as u32;
            body.vertices.extend(part.vertices.iter().cloned());
            body.faces
                .extend(part.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
        }
        body
    }

    #[test]
    fn test_stick_figure_joints() {
        let mesh = stick_figure();
        let params = GeometricParams::default();
        let out = GeometricExtractor::new(&mesh, &params).extract();
        let j = &out.joints;
        assert!(out.fallbacks.is_empty(), "{:?}", out.fallbacks);
        assert!(j.missing().is_empty(), "{:?}", j.missing());

        // Arms split from the torso just below their tops at 1.38.
        let (sl, sr) = (j.get(Joint::ShoulderL).unwrap(), j.get(Joint::ShoulderR).unwrap());
        assert_relative_eq!(sl.x, -0.25, epsilon = 1e-6);
        assert_relative_eq!(sr.x, 0.25, epsilon = 1e-6);
        assert!(sl.z > 1.30 && sl.z < 1.38);

        // Tracking follows the arm columns all the way down.
        for (joint, x) in [
            (Joint::ElbowL, -0.25),
            (Joint::ElbowR, 0.25),
            (Joint::WristL, -0.25),
            (Joint::WristR, 0.25),
        ] {
            assert_relative_eq!(j.get(joint).unwrap().x, x, epsilon = 1e-6);
        }
        let (elbow, wrist) = (j.get(Joint::ElbowL).unwrap(), j.get(Joint::WristL).unwrap());
        assert!(wrist.z < elbow.z && elbow.z < sl.z);

        // Pelvis and hips come from the trunk and the legs, never an arm.
        let pelvis = j.get(Joint::Pelvis).unwrap();
        assert_relative_eq!(pelvis.x, 0.0, epsilon = 1e-6);
        for (joint, x) in [
            (Joint::HipL, -0.09),
            (Joint::HipR, 0.09),
            (Joint::KneeL, -0.09),
            (Joint::KneeR, 0.09),
            (Joint::AnkleL, -0.09),
            (Joint::AnkleR, 0.09),
        ] {
            let p = j.get(joint).unwrap();
            assert_relative_eq!(p.x, x, epsilon = 1e-6);
            assert!(p.x.abs() < 0.15, "{joint:?} outside the trunk");
        }
        let (hip, knee, ankle) = (
            j.get(Joint::HipL).unwrap(),
            j.get(Joint::KneeL).unwrap(),
            j.get(Joint::AnkleL).unwrap(),
        );
        assert!(ankle.z < knee.z && knee.z < hip.z && hip.z < pelvis.z);

        assert_relative_eq!(j.get(Joint::Neck).unwrap().z, 0.85 * 1.7, epsilon = 1e-9);
        assert_relative_eq!(j.get(Joint::Head).unwrap().z, 0.95 * 1.7, epsilon = 1e-9);
    }

    #[test]
    fn test_arm_loops_pull_knees_without_exclusion() {
        let mesh = stick_figure();
        let params = GeometricParams::default().with_arm_exclusion_radius(0.0);
        let out = GeometricExtractor::new(&mesh, &params).extract();
        // Knee level cuts leg and arm on each side; both get averaged in.
        let knee = out.joints.get(Joint::KneeL).unwrap();
        assert_relative_eq!(knee.x, -0.17, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_mesh_yields_no_joints() {
        let mesh = Mesh::new();
        let params = GeometricParams::default();
        let out = GeometricExtractor::new(&mesh, &params).extract();
        assert!(out.joints.is_empty());
    }
}

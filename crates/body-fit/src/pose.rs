//! Hierarchical pose solve.
//!
//! Moves the template's rest-pose joints onto target joints one bone at a
//! time. Each chain in [`CHAINS`] is walked root to leaf: the rest direction
//! of a bone is first carried along by its parent's accumulated rotation,
//! then the minimal rotation onto the target direction is solved in closed
//! form. There is no iterative refinement.
//!
//! The root bone additionally receives a yaw that matches the hip-to-hip
//! heading of the two joint sets.

use crate::joints::{Joint, JointSet};
use crate::rig::{Bone, PoseDelta, Rig, CHAINS};
use nalgebra::{Rotation3, Unit, Vector3};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Directions shorter than this after the cross product count as parallel.
const PARALLEL_EPSILON: f64 = 1e-6;

/// Pose solver tuning.
///
/// Leg damping scales the Y (twist) and Z (abduction) components of the
/// local axis-angle of every upper and lower leg bone. The X (flexion)
/// component is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct PoseParams {
    pub leg_twist_damping: f64,
    pub leg_abduction_damping: f64,
    /// Solve the root yaw from the hips.
    pub solve_root_heading: bool,
}

impl Default for PoseParams {
    fn default() -> Self {
        Self {
            leg_twist_damping: 0.5,
            leg_abduction_damping: 0.5,
            solve_root_heading: true,
        }
    }
}

impl PoseParams {
    /// No damping on any axis.
    #[must_use]
    pub const fn undamped(mut self) -> Self {
        self.leg_twist_damping = 1.0;
        self.leg_abduction_damping = 1.0;
        self
    }

    #[must_use]
    pub const fn with_leg_damping(mut self, twist: f64, abduction: f64) -> Self {
        self.leg_twist_damping = twist;
        self.leg_abduction_damping = abduction;
        self
    }

    #[must_use]
    pub const fn with_root_heading(mut self, enabled: bool) -> Self {
        self.solve_root_heading = enabled;
        self
    }
}

/// Result of [`PoseSolver::solve`].
#[derive(Debug, Clone, Default)]
pub struct PoseSolution {
    pub delta: PoseDelta,
    /// Links whose rotation was solved.
    pub solved_links: usize,
    /// Chains with at least one link skipped for missing joints.
    pub skipped_chains: Vec<&'static str>,
    /// Root yaw in radians, when the hips were available.
    pub root_heading: Option<f64>,
}

impl PoseSolution {
    pub fn skipped_chain_count(&self) -> usize {
        self.skipped_chains.len()
    }
}

/// Closed-form hierarchical solver over a model's rig.
pub struct PoseSolver<'a> {
    rig: &'a Rig,
    /// Rest orientation of every model bone, by model index.
    rest_frames: &'a [Rotation3<f64>],
    params: PoseParams,
}

impl<'a> PoseSolver<'a> {
    pub fn new(rig: &'a Rig, rest_frames: &'a [Rotation3<f64>], params: PoseParams) -> Self {
        Self {
            rig,
            rest_frames,
            params,
        }
    }

    /// Solve the pose moving `source` (template rest joints) onto `target`.
    ///
    /// A link whose joints are missing on either side is skipped and leaves
    /// the bone at identity. A bone the model lacks produces no output, but
    /// its rotation still carries down to its children.
    pub fn solve(&self, source: &JointSet, target: &JointSet) -> PoseSolution {
        let source = source.centered_on_pelvis();
        let target = target.centered_on_pelvis();
        let mut solution = PoseSolution::default();

        if self.params.solve_root_heading {
            if let Some(yaw) = root_heading(&source, &target) {
                solution.delta.set(Bone::Root, Vector3::z() * yaw);
                solution.root_heading = Some(yaw);
            }
        }

        // Accumulated rotation of every solved bone, read by its children.
        let mut world: [Option<Rotation3<f64>>; Bone::COUNT] = [None; Bone::COUNT];

        for chain in &CHAINS {
            let mut skipped = false;
            for link in chain.links {
                let (Some(rest), Some(goal)) = (
                    source.segment(link.from, link.to),
                    target.segment(link.from, link.to),
                ) else {
                    skipped = true;
                    continue;
                };

                let parent = link
                    .bone
                    .parent()
                    .and_then(|p| world[p.index()])
                    .unwrap_or_else(Rotation3::identity);
                let current = parent * unit(&rest);
                let local = minimal_rotation(&current, &unit(&goal));
                world[link.bone.index()] = Some(local * parent);
                solution.solved_links += 1;

                if self.rig.contains(link.bone) {
                    let frame = self.rest_frame(link.bone);
                    let in_rest_frame = frame.inverse() * local * frame;
                    solution
                        .delta
                        .set(link.bone, self.damp(link.bone, in_rest_frame.scaled_axis()));
                }
            }
            if skipped {
                warn!(chain = chain.name, "Skipped pose chain with missing joints");
                solution.skipped_chains.push(chain.name);
            }
        }

        debug!(
            solved_links = solution.solved_links,
            skipped_chains = solution.skipped_chains.len(),
            root_heading = solution.root_heading.map(f64::to_degrees),
            "Pose solved"
        );
        solution
    }

    fn rest_frame(&self, bone: Bone) -> Rotation3<f64> {
        self.rig
            .lookup(self.rest_frames, bone)
            .copied()
            .unwrap_or_else(Rotation3::identity)
    }

    fn damp(&self, bone: Bone, rotvec: Vector3<f64>) -> Vector3<f64> {
        if bone.is_leg() {
            Vector3::new(
                rotvec.x,
                rotvec.y * self.params.leg_twist_damping,
                rotvec.z * self.params.leg_abduction_damping,
            )
        } else {
            rotvec
        }
    }
}

/// Yaw that turns the source hip line onto the target hip line, in the
/// horizontal plane. Wrapped to [-π, π).
pub fn root_heading(source: &JointSet, target: &JointSet) -> Option<f64> {
    let s = source.segment(Joint::HipR, Joint::HipL)?;
    let t = target.segment(Joint::HipR, Joint::HipL)?;
    let diff = t.y.atan2(t.x) - s.y.atan2(s.x);
    Some((diff + PI).rem_euclid(2.0 * PI) - PI)
}

/// Smallest rotation taking unit vector `from` onto unit vector `to`.
///
/// Parallel inputs give the identity. Antiparallel inputs give a half turn
/// about an axis orthogonal to `from`.
pub fn minimal_rotation(from: &Vector3<f64>, to: &Vector3<f64>) -> Rotation3<f64> {
    let axis = from.cross(to);
    let axis_norm = axis.norm();
    if axis_norm < PARALLEL_EPSILON {
        if from.dot(to) > 0.0 {
            return Rotation3::identity();
        }
        let mut ortho = from.cross(&Vector3::x());
        if ortho.norm() < PARALLEL_EPSILON {
            ortho = from.cross(&Vector3::y());
        }
        return Rotation3::from_axis_angle(&Unit::new_normalize(ortho), PI);
    }
    let angle = from.dot(to).clamp(-1.0, 1.0).acos();
    Rotation3::from_axis_angle(&Unit::new_unchecked(axis / axis_norm), angle)
}

#[inline]
fn unit(v: &Vector3<f64>) -> Vector3<f64> {
    v / (v.norm() + 1e-8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn full_rig() -> Rig {
        let labels: Vec<&str> = Bone::ALL.iter().map(|b| b.label()).collect();
        Rig::from_labels(&labels).unwrap()
    }

    fn identity_frames() -> Vec<Rotation3<f64>> {
        vec![Rotation3::identity(); Bone::COUNT]
    }

    /// A-pose-like rest skeleton.
    fn rest_joints() -> JointSet {
        [
            (Joint::Pelvis, [0.0, 0.0, 0.0]),
            (Joint::HipL, [-0.1, 0.0, 0.0]),
            (Joint::HipR, [0.1, 0.0, 0.0]),
            (Joint::KneeL, [-0.1, 0.0, -0.45]),
            (Joint::KneeR, [0.1, 0.0, -0.45]),
            (Joint::AnkleL, [-0.1, 0.0, -0.9]),
            (Joint::AnkleR, [0.1, 0.0, -0.9]),
            (Joint::ShoulderL, [-0.2, 0.0, 0.45]),
            (Joint::ShoulderR, [0.2, 0.0, 0.45]),
            (Joint::ElbowL, [-0.45, 0.0, 0.3]),
            (Joint::ElbowR, [0.45, 0.0, 0.3]),
            (Joint::WristL, [-0.7, 0.0, 0.15]),
            (Joint::WristR, [0.7, 0.0, 0.15]),
            (Joint::Neck, [0.0, 0.0, 0.55]),
            (Joint::Head, [0.0, 0.0, 0.7]),
        ]
        .into_iter()
        .map(|(j, [x, y, z])| (j, Point3::new(x, y, z)))
        .collect()
    }

    #[test]
    fn test_minimal_rotation_quarter_turn() {
        let from = Vector3::new(0.0, 0.0, 1.0);
        let to = Vector3::new(1.0, 0.0, 0.0);
        let r = minimal_rotation(&from, &to);

        assert_relative_eq!(r * from, to, epsilon = 1e-6);
        let (axis, angle) = r.axis_angle().unwrap();
        assert_relative_eq!(axis.dot(&from), 0.0, epsilon = 1e-6);
        assert_relative_eq!(axis.dot(&to), 0.0, epsilon = 1e-6);
        assert_relative_eq!(angle, PI / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_minimal_rotation_degenerate_cases() {
        let v = Vector3::new(1.0, 0.0, 0.0);
        assert_eq!(minimal_rotation(&v, &v), Rotation3::identity());

        // Antiparallel along x falls through to the y helper axis.
        let flipped = minimal_rotation(&v, &-v);
        assert_relative_eq!(flipped * v, -v, epsilon = 1e-9);

        let z = Vector3::z();
        assert_relative_eq!(minimal_rotation(&z, &-z) * z, -z, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_joints_give_identity_pose() {
        let rig = full_rig();
        let frames = identity_frames();
        let solver = PoseSolver::new(&rig, &frames, PoseParams::default());
        let solution = solver.solve(&rest_joints(), &rest_joints());

        assert_eq!(solution.solved_links, 9);
        assert!(solution.skipped_chains.is_empty());
        for (_, rotvec) in solution.delta.iter() {
            assert_relative_eq!(rotvec.norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_child_inherits_parent_rotation() {
        let rig = full_rig();
        let frames = identity_frames();
        let solver = PoseSolver::new(&rig, &frames, PoseParams::default());

        // Left arm hangs down with the forearm bent forward.
        let mut target = rest_joints();
        target.set(Joint::ElbowL, Point3::new(-0.2, 0.0, 0.15));
        target.set(Joint::WristL, Point3::new(-0.2, -0.25, 0.15));
        let solution = solver.solve(&rest_joints(), &target);

        let source = rest_joints();
        let upper = solution.delta.rotation(Bone::UpperArmL);
        let lower = solution.delta.rotation(Bone::LowerArmL);

        let rest_upper = unit(&source.segment(Joint::ShoulderL, Joint::ElbowL).unwrap());
        let rest_lower = unit(&source.segment(Joint::ElbowL, Joint::WristL).unwrap());
        let goal_upper = unit(&target.segment(Joint::ShoulderL, Joint::ElbowL).unwrap());
        let goal_lower = unit(&target.segment(Joint::ElbowL, Joint::WristL).unwrap());

        assert_relative_eq!(upper * rest_upper, goal_upper, epsilon = 1e-6);
        assert_relative_eq!(lower * upper * rest_lower, goal_lower, epsilon = 1e-6);
    }

    #[test]
    fn test_rest_frame_conjugates_local_delta() {
        let rig = full_rig();
        let mut frames = identity_frames();
        let frame = Rotation3::from_axis_angle(&Vector3::z_axis(), PI / 2.0);
        frames[Bone::Neck.index()] = frame;
        let solver = PoseSolver::new(&rig, &frames, PoseParams::default());

        let mut target = rest_joints();
        target.set(Joint::Head, Point3::new(0.0, -0.15, 0.55));
        let solution = solver.solve(&rest_joints(), &target);

        // World delta is a quarter turn about +X; in the frame it is about -Y.
        let rotvec = solution.delta.get(Bone::Neck);
        assert_relative_eq!(rotvec, Vector3::new(0.0, -PI / 2.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_missing_joints_skip_chain() {
        let rig = full_rig();
        let frames = identity_frames();
        let solver = PoseSolver::new(&rig, &frames, PoseParams::default());

        let mut target = JointSet::new();
        for (joint, p) in rest_joints().iter() {
            if joint != Joint::WristL && joint != Joint::KneeR {
                target.set(joint, p);
            }
        }
        let solution = solver.solve(&rest_joints(), &target);
        assert_eq!(solution.skipped_chains, vec!["arm_l", "leg_r"]);
        assert!(solution.delta.is_set(Bone::UpperArmL));
        assert!(!solution.delta.is_set(Bone::LowerArmL));
        assert!(!solution.delta.is_set(Bone::UpperLegR));
        assert_eq!(solution.solved_links, 6);
    }

    #[test]
    fn test_leg_damping_scales_twist_and_abduction() {
        let rig = full_rig();
        let frames = identity_frames();
        let mut target = rest_joints();
        // Knee swung outward and forward.
        target.set(Joint::KneeL, Point3::new(-0.3, -0.2, -0.35));

        let free = PoseSolver::new(&rig, &frames, PoseParams::default().undamped())
            .solve(&rest_joints(), &target);
        let damped = PoseSolver::new(&rig, &frames, PoseParams::default())
            .solve(&rest_joints(), &target);

        let a = free.delta.get(Bone::UpperLegL);
        let b = damped.delta.get(Bone::UpperLegL);
        assert_relative_eq!(b.x, a.x, epsilon = 1e-12);
        assert_relative_eq!(b.y, a.y * 0.5, epsilon = 1e-12);
        assert_relative_eq!(b.z, a.z * 0.5, epsilon = 1e-12);
        assert!(a.y.abs() > 1e-3);
    }

    #[test]
    fn test_root_heading_from_hips() {
        let rig = full_rig();
        let frames = identity_frames();
        let turn = Rotation3::from_axis_angle(&Vector3::z_axis(), 30f64.to_radians());
        let target = rest_joints().map(|p| turn * p);

        let solution = PoseSolver::new(&rig, &frames, PoseParams::default())
            .solve(&rest_joints(), &target);
        assert_relative_eq!(solution.root_heading.unwrap(), 30f64.to_radians(), epsilon = 1e-9);
        assert_relative_eq!(solution.delta.get(Bone::Root).z, 30f64.to_radians(), epsilon = 1e-9);

        let off = PoseSolver::new(&rig, &frames, PoseParams::default().with_root_heading(false))
            .solve(&rest_joints(), &target);
        assert!(!off.delta.is_set(Bone::Root));
    }

    #[test]
    fn test_bone_absent_from_model_still_propagates() {
        let labels: Vec<&str> = Bone::ALL
            .iter()
            .filter(|b| **b != Bone::UpperArmL)
            .map(|b| b.label())
            .collect();
        let rig = Rig::from_labels(&labels).unwrap();
        let frames = vec![Rotation3::identity(); labels.len()];

        let mut target = rest_joints();
        target.set(Joint::ElbowL, Point3::new(-0.2, 0.0, 0.15));
        target.set(Joint::WristL, Point3::new(-0.2, 0.0, 0.0));
        let solution = PoseSolver::new(&rig, &frames, PoseParams::default())
            .solve(&rest_joints(), &target);

        assert!(!solution.delta.is_set(Bone::UpperArmL));
        // Upper and lower arm both end up straight down, so after the parent's
        // turn the forearm needs only a small correction, not the full swing.
        let full = minimal_rotation(
            &unit(&Vector3::new(-0.25, 0.0, -0.15)),
            &Vector3::new(0.0, 0.0, -1.0),
        );
        let lower = solution.delta.get(Bone::LowerArmL).norm();
        assert!(lower < full.angle());
    }
}

//! Joint extraction from an MHR70 keypoint list.
//!
//! MHR70 is a 70-point body layout: face, body, feet, both hands, and a few
//! elbow and shoulder landmarks. Only the body subset is read here; the hand
//! and foot indices are kept in the canonicalized list for diagnostics.

use crate::error::{FitError, FitResult};
use crate::joints::{Joint, JointSet};
use nalgebra::{Point3, Vector3};
use tracing::debug;

/// Length of a complete MHR70 keypoint list.
pub const MHR70_LEN: usize = 70;

/// MHR70 indices read by the extractor.
pub mod mhr70 {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 5;
    pub const RIGHT_SHOULDER: usize = 6;
    pub const LEFT_ELBOW: usize = 7;
    pub const RIGHT_ELBOW: usize = 8;
    pub const LEFT_HIP: usize = 9;
    pub const RIGHT_HIP: usize = 10;
    pub const LEFT_KNEE: usize = 11;
    pub const RIGHT_KNEE: usize = 12;
    pub const LEFT_ANKLE: usize = 13;
    pub const RIGHT_ANKLE: usize = 14;
    pub const RIGHT_WRIST: usize = 41;
    pub const LEFT_WRIST: usize = 62;
    pub const LEFT_OLECRANON: usize = 63;
    pub const RIGHT_OLECRANON: usize = 64;
    pub const LEFT_ACROMION: usize = 67;
    pub const RIGHT_ACROMION: usize = 68;
    pub const NECK: usize = 69;
}

const JOINT_INDICES: [(Joint, usize); 14] = [
    (Joint::Head, mhr70::NOSE),
    (Joint::ShoulderL, mhr70::LEFT_SHOULDER),
    (Joint::ShoulderR, mhr70::RIGHT_SHOULDER),
    (Joint::ElbowL, mhr70::LEFT_ELBOW),
    (Joint::ElbowR, mhr70::RIGHT_ELBOW),
    (Joint::HipL, mhr70::LEFT_HIP),
    (Joint::HipR, mhr70::RIGHT_HIP),
    (Joint::KneeL, mhr70::LEFT_KNEE),
    (Joint::KneeR, mhr70::RIGHT_KNEE),
    (Joint::AnkleL, mhr70::LEFT_ANKLE),
    (Joint::AnkleR, mhr70::RIGHT_ANKLE),
    (Joint::WristL, mhr70::LEFT_WRIST),
    (Joint::WristR, mhr70::RIGHT_WRIST),
    (Joint::Neck, mhr70::NECK),
];

/// The nose keypoint sits on the face surface; the template head joint is
/// inside the skull. Shift along +Y (backward) by this much.
pub const HEAD_DEPTH_OFFSET: f64 = 0.10;

/// Height added to the shoulder midpoint when the neck keypoint is absent.
pub const NECK_RAISE: f64 = 0.05;

/// Elbow and shoulder surface landmarks carried next to the joints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryLandmarks {
    pub olecranon_l: Option<Point3<f64>>,
    pub olecranon_r: Option<Point3<f64>>,
    pub acromion_l: Option<Point3<f64>>,
    pub acromion_r: Option<Point3<f64>>,
}

/// Output of keypoint-based extraction.
#[derive(Debug, Clone)]
pub struct KeypointJoints {
    /// Named joints, pelvis-centered.
    pub joints: JointSet,
    pub auxiliary: AuxiliaryLandmarks,
    /// Every keypoint in the canonical frame, centered like the joints.
    pub canonical: Vec<Point3<f64>>,
}

/// Map raw keypoints into the canonical frame: flip Y, then swap Y and Z.
#[inline]
pub fn to_canonical(p: &Point3<f64>) -> Point3<f64> {
    Point3::new(p.x, p.z, -p.y)
}

/// Canonicalize and center a keypoint list.
///
/// Centers on the hip midpoint when both hips are present, otherwise on the
/// mean of all keypoints.
pub fn canonicalize(raw: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let canonical: Vec<Point3<f64>> = raw.iter().map(to_canonical).collect();
    let center = if canonical.len() > mhr70::RIGHT_HIP {
        nalgebra::center(&canonical[mhr70::LEFT_HIP], &canonical[mhr70::RIGHT_HIP])
    } else {
        crate::types::mean_point(&canonical).unwrap_or_else(Point3::origin)
    };
    canonical.iter().map(|p| p - center.coords).collect()
}

/// Read joints from a raw MHR70 keypoint list.
///
/// Short lists are accepted; joints whose index is past the end are absent.
///
/// # Errors
///
/// Fails when the list is empty or holds non-finite values.
pub fn extract(raw: &[Point3<f64>]) -> FitResult<KeypointJoints> {
    if raw.is_empty() {
        return Err(FitError::invalid_keypoints("keypoint list is empty"));
    }
    if let Some(index) = raw
        .iter()
        .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
    {
        return Err(FitError::invalid_keypoints(format!(
            "keypoint {} has a non-finite coordinate",
            index
        )));
    }

    let canonical = canonicalize(raw);
    let at = |i: usize| canonical.get(i).copied();

    let mut joints: JointSet = JOINT_INDICES
        .iter()
        .filter_map(|&(joint, index)| at(index).map(|p| (joint, p)))
        .collect();

    if let (Some(l), Some(r)) = (joints.get(Joint::HipL), joints.get(Joint::HipR)) {
        joints.set(Joint::Pelvis, nalgebra::center(&l, &r));
    }
    if let Some(head) = joints.get(Joint::Head) {
        joints.set(Joint::Head, head + Vector3::y() * HEAD_DEPTH_OFFSET);
    }
    if !joints.contains(Joint::Neck) {
        if let (Some(l), Some(r)) = (joints.get(Joint::ShoulderL), joints.get(Joint::ShoulderR)) {
            joints.set(Joint::Neck, nalgebra::center(&l, &r) + Vector3::z() * NECK_RAISE);
        }
    }

    let auxiliary = AuxiliaryLandmarks {
        olecranon_l: at(mhr70::LEFT_OLECRANON),
        olecranon_r: at(mhr70::RIGHT_OLECRANON),
        acromion_l: at(mhr70::LEFT_ACROMION),
        acromion_r: at(mhr70::RIGHT_ACROMION),
    };

    debug!(
        keypoints = raw.len(),
        joints = joints.len(),
        "Extracted joints from keypoints"
    );
    Ok(KeypointJoints {
        joints,
        auxiliary,
        canonical,
    })
}

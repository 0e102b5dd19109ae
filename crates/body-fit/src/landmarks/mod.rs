//! Landmark and joint extraction.
//!
//! Two interchangeable strategies produce a [`JointSet`]:
//!
//! - [`geometric`]: scans the mesh's horizontal cross-sections.
//! - [`keypoints`]: reads an externally supplied MHR70 keypoint list.
//!
//! [`extract_joints`] picks keypoints when they are supplied and geometry
//! otherwise. Missing joints are simply absent from the set; the pose solver
//! skips the chains that need them.
//!
//! [`skeletal`] measures the coarse body summary that seeds the phenotype
//! estimate.

pub mod geometric;
pub mod keypoints;
pub mod skeletal;

pub use geometric::{GeometricExtractor, GeometricParams};
pub use keypoints::{AuxiliaryLandmarks, KeypointJoints};
pub use skeletal::{SkeletalLandmarks, TrunkCircumferences};

use crate::error::FitResult;
use crate::joints::{JointSet, Side};
use crate::Mesh;
use nalgebra::{Point2, Point3};

/// Which strategy produced a joint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum JointStrategy {
    Geometric,
    Keypoints,
}

/// Joints extracted from one input.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Pelvis-frame joints.
    pub joints: JointSet,
    pub strategy: JointStrategy,
    /// Present for keypoint extraction.
    pub auxiliary: Option<AuxiliaryLandmarks>,
    /// All canonicalized keypoints, for diagnostics.
    pub keypoints: Option<Vec<Point3<f64>>>,
    /// Joints placed by a fallback rather than a section loop.
    pub fallbacks: Vec<&'static str>,
}

/// Extract joints from a normalized mesh, or from keypoints when given.
///
/// # Errors
///
/// Only malformed keypoints are an error; geometric extraction never fails.
pub fn extract_joints(
    mesh: &Mesh,
    keypoints: Option<&[Point3<f64>]>,
    params: &GeometricParams,
) -> FitResult<Extraction> {
    match keypoints {
        Some(raw) => {
            let out = keypoints::extract(raw)?;
            Ok(Extraction {
                joints: out.joints,
                strategy: JointStrategy::Keypoints,
                auxiliary: Some(out.auxiliary),
                keypoints: Some(out.canonical),
                fallbacks: Vec::new(),
            })
        }
        None => {
            let out = GeometricExtractor::new(mesh, params).extract();
            Ok(Extraction {
                joints: out.joints,
                strategy: JointStrategy::Geometric,
                auxiliary: None,
                keypoints: None,
                fallbacks: out.fallbacks,
            })
        }
    }
}

/// Planar positions visited while tracking each arm down the body.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrackedArms {
    left: Vec<Point2<f64>>,
    right: Vec<Point2<f64>>,
}

impl TrackedArms {
    pub(crate) fn push(&mut self, side: Side, p: &Point3<f64>) {
        let flat = Point2::new(p.x, p.y);
        match side {
            Side::Left => self.left.push(flat),
            Side::Right => self.right.push(flat),
        }
    }

    /// True if `p` is within `radius` of any tracked arm position.
    pub(crate) fn is_near(&self, p: &Point3<f64>, radius: f64) -> bool {
        let flat = Point2::new(p.x, p.y);
        self.left
            .iter()
            .chain(&self.right)
            .any(|a| (a - flat).norm() < radius)
    }
}

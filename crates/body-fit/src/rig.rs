//! Template skeleton vocabulary.
//!
//! A body model exposes its skeleton as a list of bone labels. [`Rig`] checks
//! that list once and maps the fixed [`Bone`] enum onto model indices, so the
//! rest of the pipeline never looks bones up by string.

use crate::error::{FitError, FitResult};
use crate::joints::{Joint, JointSet};
use nalgebra::{Point3, Rotation3, Vector3};

/// Bones the pipeline reads or drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bone {
    Root,
    PelvisL,
    PelvisR,
    UpperLegL,
    UpperLegR,
    LowerLegL,
    LowerLegR,
    FootL,
    FootR,
    BreastL,
    BreastR,
    Neck,
    Head,
    ShoulderL,
    ShoulderR,
    UpperArmL,
    UpperArmR,
    LowerArmL,
    LowerArmR,
    WristL,
    WristR,
}

impl Bone {
    pub const COUNT: usize = 21;

    /// Parents always precede children.
    pub const ALL: [Bone; Bone::COUNT] = [
        Bone::Root,
        Bone::PelvisL,
        Bone::PelvisR,
        Bone::UpperLegL,
        Bone::UpperLegR,
        Bone::LowerLegL,
        Bone::LowerLegR,
        Bone::FootL,
        Bone::FootR,
        Bone::BreastL,
        Bone::BreastR,
        Bone::Neck,
        Bone::Head,
        Bone::ShoulderL,
        Bone::ShoulderR,
        Bone::UpperArmL,
        Bone::UpperArmR,
        Bone::LowerArmL,
        Bone::LowerArmR,
        Bone::WristL,
        Bone::WristR,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Label used by the body model.
    pub const fn label(self) -> &'static str {
        match self {
            Bone::Root => "root",
            Bone::PelvisL => "pelvis.L",
            Bone::PelvisR => "pelvis.R",
            Bone::UpperLegL => "upperleg01.L",
            Bone::UpperLegR => "upperleg01.R",
            Bone::LowerLegL => "lowerleg01.L",
            Bone::LowerLegR => "lowerleg01.R",
            Bone::FootL => "foot.L",
            Bone::FootR => "foot.R",
            Bone::BreastL => "breast.L",
            Bone::BreastR => "breast.R",
            Bone::Neck => "neck01",
            Bone::Head => "head",
            Bone::ShoulderL => "shoulder01.L",
            Bone::ShoulderR => "shoulder01.R",
            Bone::UpperArmL => "upperarm01.L",
            Bone::UpperArmR => "upperarm01.R",
            Bone::LowerArmL => "lowerarm01.L",
            Bone::LowerArmR => "lowerarm01.R",
            Bone::WristL => "wrist.L",
            Bone::WristR => "wrist.R",
        }
    }

    pub fn from_label(label: &str) -> Option<Bone> {
        Bone::ALL.into_iter().find(|b| b.label() == label)
    }

    /// Kinematic parent. `None` only for the root.
    pub const fn parent(self) -> Option<Bone> {
        Some(match self {
            Bone::Root => return None,
            Bone::PelvisL | Bone::PelvisR => Bone::Root,
            Bone::UpperLegL => Bone::PelvisL,
            Bone::UpperLegR => Bone::PelvisR,
            Bone::LowerLegL => Bone::UpperLegL,
            Bone::LowerLegR => Bone::UpperLegR,
            Bone::FootL => Bone::LowerLegL,
            Bone::FootR => Bone::LowerLegR,
            Bone::BreastL | Bone::BreastR => Bone::Root,
            Bone::Neck => Bone::Root,
            Bone::Head => Bone::Neck,
            Bone::ShoulderL | Bone::ShoulderR => Bone::Root,
            Bone::UpperArmL => Bone::ShoulderL,
            Bone::UpperArmR => Bone::ShoulderR,
            Bone::LowerArmL => Bone::UpperArmL,
            Bone::LowerArmR => Bone::UpperArmR,
            Bone::WristL => Bone::LowerArmL,
            Bone::WristR => Bone::LowerArmR,
        })
    }

    /// Upper or lower leg, the bones whose twist and abduction are damped.
    pub const fn is_leg(self) -> bool {
        matches!(
            self,
            Bone::UpperLegL | Bone::UpperLegR | Bone::LowerLegL | Bone::LowerLegR
        )
    }
}

impl std::fmt::Display for Bone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Bone whose rest head marks each template joint.
pub const JOINT_BONES: [(Joint, Bone); Joint::COUNT] = [
    (Joint::Pelvis, Bone::Root),
    (Joint::HipL, Bone::PelvisL),
    (Joint::HipR, Bone::PelvisR),
    (Joint::KneeL, Bone::LowerLegL),
    (Joint::KneeR, Bone::LowerLegR),
    (Joint::AnkleL, Bone::FootL),
    (Joint::AnkleR, Bone::FootR),
    (Joint::ShoulderL, Bone::ShoulderL),
    (Joint::ShoulderR, Bone::ShoulderR),
    (Joint::ElbowL, Bone::LowerArmL),
    (Joint::ElbowR, Bone::LowerArmR),
    (Joint::WristL, Bone::WristL),
    (Joint::WristR, Bone::WristR),
    (Joint::Neck, Bone::Neck),
    (Joint::Head, Bone::Head),
];

/// One bone of a chain, aimed from joint `from` to joint `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub bone: Bone,
    pub from: Joint,
    pub to: Joint,
}

/// Root-to-leaf sequence of bones solved together. Each link's parent is the
/// link before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneChain {
    pub name: &'static str,
    pub links: &'static [ChainLink],
}

const fn link(bone: Bone, from: Joint, to: Joint) -> ChainLink {
    ChainLink { bone, from, to }
}

/// The chains the pose solver drives, in solve order.
pub const CHAINS: [BoneChain; 5] = [
    BoneChain {
        name: "spine",
        links: &[link(Bone::Neck, Joint::Neck, Joint::Head)],
    },
    BoneChain {
        name: "arm_l",
        links: &[
            link(Bone::UpperArmL, Joint::ShoulderL, Joint::ElbowL),
            link(Bone::LowerArmL, Joint::ElbowL, Joint::WristL),
        ],
    },
    BoneChain {
        name: "arm_r",
        links: &[
            link(Bone::UpperArmR, Joint::ShoulderR, Joint::ElbowR),
            link(Bone::LowerArmR, Joint::ElbowR, Joint::WristR),
        ],
    },
    BoneChain {
        name: "leg_l",
        links: &[
            link(Bone::UpperLegL, Joint::HipL, Joint::KneeL),
            link(Bone::LowerLegL, Joint::KneeL, Joint::AnkleL),
        ],
    },
    BoneChain {
        name: "leg_r",
        links: &[
            link(Bone::UpperLegR, Joint::HipR, Joint::KneeR),
            link(Bone::LowerLegR, Joint::KneeR, Joint::AnkleR),
        ],
    },
];

/// Number of chain links across [`CHAINS`].
pub fn link_count() -> usize {
    CHAINS.iter().map(|c| c.links.len()).sum()
}

/// A model's bone list, resolved against [`Bone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rig {
    indices: [Option<usize>; Bone::COUNT],
    bone_count: usize,
}

impl Rig {
    /// Resolve a model's bone labels.
    ///
    /// Unknown labels are ignored and known bones may be absent, except the
    /// root, which anchors posing.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not among the labels.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> FitResult<Rig> {
        let mut indices = [None; Bone::COUNT];
        for (i, label) in labels.iter().enumerate() {
            if let Some(bone) = Bone::from_label(label.as_ref()) {
                indices[bone.index()].get_or_insert(i);
            }
        }
        if indices[Bone::Root.index()].is_none() {
            return Err(FitError::model_query(
                "bone_labels",
                "the model has no `root` bone",
            ));
        }
        Ok(Rig {
            indices,
            bone_count: labels.len(),
        })
    }

    /// Model index of `bone`, if the model has it.
    #[inline]
    pub fn index(&self, bone: Bone) -> Option<usize> {
        self.indices[bone.index()]
    }

    pub fn contains(&self, bone: Bone) -> bool {
        self.index(bone).is_some()
    }

    /// Length of the model's full bone list.
    pub fn bone_count(&self) -> usize {
        self.bone_count
    }

    /// Bones of the vocabulary the model lacks.
    pub fn missing(&self) -> Vec<Bone> {
        Bone::ALL.into_iter().filter(|b| !self.contains(*b)).collect()
    }

    /// Per-bone value read through the model index.
    pub fn lookup<'a, T>(&self, values: &'a [T], bone: Bone) -> Option<&'a T> {
        values.get(self.index(bone)?)
    }

    /// Template joints from rest bone heads.
    pub fn template_joints(&self, bone_heads: &[Point3<f64>]) -> JointSet {
        JOINT_BONES
            .iter()
            .filter_map(|&(joint, bone)| self.lookup(bone_heads, bone).map(|p| (joint, *p)))
            .collect()
    }

    /// Mean height of two bone heads, or of whichever exists.
    pub fn mean_height(&self, bone_heads: &[Point3<f64>], a: Bone, b: Bone) -> Option<f64> {
        match (self.lookup(bone_heads, a), self.lookup(bone_heads, b)) {
            (Some(p), Some(q)) => Some((p.z + q.z) / 2.0),
            (Some(p), None) | (None, Some(p)) => Some(p.z),
            (None, None) => None,
        }
    }
}

/// Local rotation per bone, as axis-angle. Unset bones are the identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseDelta {
    rotations: [Option<Vector3<f64>>; Bone::COUNT],
}

impl PoseDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, bone: Bone, rotvec: Vector3<f64>) {
        self.rotations[bone.index()] = Some(rotvec);
    }

    /// Axis-angle rotation of `bone`; zero when unset.
    pub fn get(&self, bone: Bone) -> Vector3<f64> {
        self.rotations[bone.index()].unwrap_or_else(Vector3::zeros)
    }

    pub fn rotation(&self, bone: Bone) -> Rotation3<f64> {
        Rotation3::new(self.get(bone))
    }

    pub fn is_set(&self, bone: Bone) -> bool {
        self.rotations[bone.index()].is_some()
    }

    /// Set bones in [`Bone::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Bone, Vector3<f64>)> + '_ {
        Bone::ALL
            .into_iter()
            .filter_map(|b| self.rotations[b.index()].map(|r| (b, r)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One axis-angle vector per model bone, zero where unset.
    pub fn to_model_rotations(&self, rig: &Rig) -> Vec<Vector3<f64>> {
        let mut out = vec![Vector3::zeros(); rig.bone_count()];
        for (bone, rotvec) in self.iter() {
            if let Some(i) = rig.index(bone) {
                out[i] = rotvec;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_and_parent_order() {
        for bone in Bone::ALL {
            assert_eq!(Bone::from_label(bone.label()), Some(bone));
            if let Some(parent) = bone.parent() {
                assert!(parent.index() < bone.index(), "{bone} before {parent}");
            }
        }
        assert_eq!(Bone::ALL.len(), Bone::COUNT);
    }

    #[test]
    fn test_chain_links_follow_parents() {
        for chain in CHAINS {
            for pair in chain.links.windows(2) {
                assert_eq!(pair[1].bone.parent(), Some(pair[0].bone));
                assert_eq!(pair[0].to, pair[1].from);
            }
        }
        assert_eq!(link_count(), 9);
    }

    #[test]
    fn test_rig_requires_root() {
        let err = Rig::from_labels(&["pelvis.L", "pelvis.R"]).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ModelQuery);
    }

    #[test]
    fn test_rig_maps_model_order() {
        let labels = ["spine03", "head", "root", "neck01", "breast.L"];
        let rig = Rig::from_labels(&labels).unwrap();
        assert_eq!(rig.index(Bone::Root), Some(2));
        assert_eq!(rig.index(Bone::Head), Some(1));
        assert_eq!(rig.index(Bone::FootL), None);
        assert_eq!(rig.bone_count(), 5);
        assert_eq!(rig.missing().len(), Bone::COUNT - 4);

        let heads: Vec<Point3<f64>> = (0..5).map(|i| Point3::new(0.0, 0.0, i as f64)).collect();
        let joints = rig.template_joints(&heads);
        assert_eq!(joints.get(Joint::Pelvis), Some(heads[2]));
        assert_eq!(joints.get(Joint::Neck), Some(heads[3]));
        assert!(joints.get(Joint::KneeL).is_none());

        assert_eq!(rig.mean_height(&heads, Bone::BreastL, Bone::BreastR), Some(4.0));
        assert_eq!(rig.mean_height(&heads, Bone::PelvisL, Bone::PelvisR), None);
    }

    #[test]
    fn test_pose_delta_to_model_order() {
        let rig = Rig::from_labels(&["head", "root"]).unwrap();
        let mut pose = PoseDelta::new();
        pose.set(Bone::Root, Vector3::new(0.0, 0.0, 0.5));
        pose.set(Bone::UpperLegL, Vector3::new(0.1, 0.0, 0.0));
        assert_eq!(pose.len(), 2);
        assert_eq!(pose.get(Bone::Head), Vector3::zeros());

        let rotations = pose.to_model_rotations(&rig);
        assert_eq!(rotations.len(), 2);
        assert_eq!(rotations[1], Vector3::new(0.0, 0.0, 0.5));
        assert_eq!(rotations[0], Vector3::zeros());
    }
}

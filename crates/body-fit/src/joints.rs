//! Named skeletal joints.
//!
//! The joint vocabulary is a fixed enum, so a missing joint is a typed `None`
//! rather than a failed string lookup. A [`JointSet`] stores one optional
//! position per joint.

use nalgebra::{Point3, Vector3};

/// The fixed joint vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Joint {
    Pelvis,
    HipL,
    HipR,
    KneeL,
    KneeR,
    AnkleL,
    AnkleR,
    ShoulderL,
    ShoulderR,
    ElbowL,
    ElbowR,
    WristL,
    WristR,
    Neck,
    Head,
}

impl Joint {
    /// Number of joints in the vocabulary.
    pub const COUNT: usize = 15;

    /// All joints in canonical order (also the diagnostic export order).
    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Pelvis,
        Joint::HipL,
        Joint::HipR,
        Joint::KneeL,
        Joint::KneeR,
        Joint::AnkleL,
        Joint::AnkleR,
        Joint::ShoulderL,
        Joint::ShoulderR,
        Joint::ElbowL,
        Joint::ElbowR,
        Joint::WristL,
        Joint::WristR,
        Joint::Neck,
        Joint::Head,
    ];

    /// Position in [`Joint::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name, e.g. `shoulder_l`.
    pub const fn name(self) -> &'static str {
        match self {
            Joint::Pelvis => "pelvis",
            Joint::HipL => "hip_l",
            Joint::HipR => "hip_r",
            Joint::KneeL => "knee_l",
            Joint::KneeR => "knee_r",
            Joint::AnkleL => "ankle_l",
            Joint::AnkleR => "ankle_r",
            Joint::ShoulderL => "shoulder_l",
            Joint::ShoulderR => "shoulder_r",
            Joint::ElbowL => "elbow_l",
            Joint::ElbowR => "elbow_r",
            Joint::WristL => "wrist_l",
            Joint::WristR => "wrist_r",
            Joint::Neck => "neck",
            Joint::Head => "head",
        }
    }

    /// Parse a snake-case joint name.
    pub fn from_name(name: &str) -> Option<Joint> {
        Joint::ALL.into_iter().find(|j| j.name() == name)
    }
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Body side in the canonical frame. Left is −X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Side of a lateral coordinate. Zero counts as right.
    #[inline]
    pub fn of_x(x: f64) -> Side {
        if x < 0.0 { Side::Left } else { Side::Right }
    }
}

/// One optional position per joint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointSet {
    positions: [Option<Point3<f64>>; Joint::COUNT],
}

impl JointSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, joint: Joint) -> Option<Point3<f64>> {
        self.positions[joint.index()]
    }

    #[inline]
    pub fn set(&mut self, joint: Joint, position: Point3<f64>) {
        self.positions[joint.index()] = Some(position);
    }

    /// Set only if the joint is still missing. Returns true if it was set.
    pub fn set_if_missing(&mut self, joint: Joint, position: Point3<f64>) -> bool {
        let slot = &mut self.positions[joint.index()];
        if slot.is_none() {
            *slot = Some(position);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn contains(&self, joint: Joint) -> bool {
        self.positions[joint.index()].is_some()
    }

    /// Number of joints present.
    pub fn len(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present joints in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Joint, Point3<f64>)> + '_ {
        Joint::ALL
            .into_iter()
            .filter_map(|j| self.get(j).map(|p| (j, p)))
    }

    /// Joints absent from the set.
    pub fn missing(&self) -> Vec<Joint> {
        Joint::ALL.into_iter().filter(|j| !self.contains(*j)).collect()
    }

    /// Direction from `from` to `to`, if both are present.
    pub fn segment(&self, from: Joint, to: Joint) -> Option<Vector3<f64>> {
        Some(self.get(to)? - self.get(from)?)
    }

    /// The set re-expressed relative to its own pelvis.
    ///
    /// A set without a pelvis is returned unchanged.
    pub fn centered_on_pelvis(&self) -> JointSet {
        match self.get(Joint::Pelvis) {
            Some(pelvis) => self.translated(-pelvis.coords),
            None => self.clone(),
        }
    }

    /// Every joint moved by `offset`.
    pub fn translated(&self, offset: Vector3<f64>) -> JointSet {
        self.map(|p| p + offset)
    }

    /// Every joint scaled about the origin.
    pub fn scaled(&self, factor: f64) -> JointSet {
        self.map(|p| Point3::from(p.coords * factor))
    }

    /// Apply `f` to every present joint.
    pub fn map(&self, f: impl Fn(Point3<f64>) -> Point3<f64>) -> JointSet {
        JointSet {
            positions: self.positions.map(|p| p.map(&f)),
        }
    }
}

impl FromIterator<(Joint, Point3<f64>)> for JointSet {
    fn from_iter<I: IntoIterator<Item = (Joint, Point3<f64>)>>(iter: I) -> Self {
        let mut set = JointSet::new();
        for (joint, position) in iter {
            set.set(joint, position);
        }
        set
    }
}

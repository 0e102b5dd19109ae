//! A deterministic parametric body built from elliptical tubes.
//!
//! The body is a torso, two legs with feet, two arms with hands, a neck and a
//! head. Each part is a closed tube of elliptical rings swept along the
//! skeleton, so the mesh has a fixed topology and cross-sections that behave
//! like a scan: arms separate from the torso below the shoulders, legs split
//! below the crotch.
//!
//! Phenotypes act on proportions:
//!
//! | field | effect |
//! |---|---|
//! | height | stature, 1.5 m at 0 to 2.0 m at 1 |
//! | weight | girth of every part |
//! | muscle | limb girth, slightly narrower waist |
//! | gender | wider hips and deeper bust toward 1, broader shoulders toward 0 |
//! | age | waist girth |
//! | proportions | leg length against trunk length |
//!
//! The rest pose is an A-pose with the arms 40° off vertical. Vertices are
//! rigidly bound to one bone each and every bone's rest frame is the
//! identity. A bone's world rotation is its local rotation applied after its
//! parent's, matching how the pose solver accumulates rotations.

use super::{Anthropometry, BodyModel, FitRequest, FitResponse, PosedBody};
use crate::error::{FitError, FitResult};
use crate::phenotype::{Phenotype, PhenotypeVector};
use crate::registration::compute_similarity_transform;
use crate::rig::Bone;
use crate::slice;
use crate::types::{bounds_of, signed_volume, Mesh};
use nalgebra::{Point3, Rotation3, Vector3};
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Reference stature the base dimensions are given for.
const BASE_HEIGHT: f64 = 1.75;

/// Arm angle from vertical in the rest pose.
const ARM_ANGLE_DEGREES: f64 = 40.0;

/// Waist level as a fraction of stature, used by anthropometry.
pub const WAIST_FRACTION: f64 = 0.62;

/// Average body density, kg/m³.
pub const BODY_DENSITY: f64 = 985.0;

/// Fitter and tessellation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProceduralSettings {
    /// Points per ring.
    pub ring_segments: usize,
    /// First coordinate-descent step, halved every iteration.
    pub initial_step: f64,
    /// Converts regularization weights into squared model units.
    pub regularization_scale: f64,
}

impl Default for ProceduralSettings {
    fn default() -> Self {
        Self {
            ring_segments: 20,
            initial_step: 0.2,
            regularization_scale: 1e-5,
        }
    }
}

/// Tube-built body model. See the module docs.
#[derive(Debug, Clone)]
pub struct ProceduralBody {
    labels: Vec<String>,
    faces: Vec<[u32; 3]>,
    vertex_bones: Vec<Bone>,
    settings: ProceduralSettings,
}

impl Default for ProceduralBody {
    fn default() -> Self {
        Self::new()
    }
}

impl ProceduralBody {
    pub fn new() -> Self {
        Self::with_settings(ProceduralSettings::default())
    }

    pub fn with_settings(settings: ProceduralSettings) -> Self {
        let settings = ProceduralSettings {
            ring_segments: settings.ring_segments.max(3),
            ..settings
        };
        let shape = build(&Dimensions::from(&PhenotypeVector::default()), settings.ring_segments);
        Self {
            labels: Bone::ALL.iter().map(|b| b.label().to_string()).collect(),
            faces: shape.faces,
            vertex_bones: shape.bones,
            settings,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_bones.len()
    }

    /// Rest-pose mesh for a phenotype vector.
    pub fn rest_mesh(&self, phenotypes: &PhenotypeVector) -> Mesh {
        let shape = self.shape(phenotypes);
        Mesh::from_positions(&shape.vertices, &self.faces)
    }

    fn shape(&self, phenotypes: &PhenotypeVector) -> Shape {
        build(&Dimensions::from(phenotypes), self.settings.ring_segments)
    }

    fn pose_shape(&self, shape: &Shape, rotations: &[Vector3<f64>]) -> FitResult<PosedBody> {
        if rotations.len() != self.labels.len() {
            return Err(FitError::model_query(
                "posed",
                format!(
                    "expected {} bone rotations, got {}",
                    self.labels.len(),
                    rotations.len()
                ),
            ));
        }

        // Model order is Bone::ALL order, parents first.
        let mut world = [Rotation3::identity(); Bone::COUNT];
        let mut heads = shape.heads;
        for bone in Bone::ALL {
            let local = Rotation3::new(rotations[bone.index()]);
            match bone.parent() {
                None => world[bone.index()] = local,
                Some(parent) => {
                    let offset = shape.heads[bone.index()] - shape.heads[parent.index()];
                    heads[bone.index()] = heads[parent.index()] + world[parent.index()] * offset;
                    world[bone.index()] = local * world[parent.index()];
                }
            }
        }

        let vertices = shape
            .vertices
            .iter()
            .zip(&self.vertex_bones)
            .map(|(p, bone)| {
                let i = bone.index();
                heads[i] + world[i] * (p - shape.heads[i])
            })
            .collect();

        Ok(PosedBody {
            vertices,
            bone_heads: heads.to_vec(),
        })
    }

    /// Data term plus regularization for one candidate.
    fn objective(
        &self,
        candidate: &PhenotypeVector,
        request: &FitRequest<'_>,
    ) -> FitResult<(f64, Vec<Point3<f64>>)> {
        let posed = self.pose_shape(&self.shape(candidate), request.pose)?;
        let transform = compute_similarity_transform(&posed.vertices, request.target, true)?;
        let aligned: Vec<Point3<f64>> = posed
            .vertices
            .iter()
            .map(|p| transform.transform_point(p))
            .collect();
        let data = aligned
            .iter()
            .zip(request.target)
            .map(|(a, t)| (a - t).norm_squared())
            .sum::<f64>()
            / aligned.len() as f64;
        let regularization: f64 = request
            .frozen
            .free()
            .map(|field| {
                let delta = candidate.get(field) - request.initial.get(field);
                request.regularization.get(field) * delta * delta
            })
            .sum::<f64>()
            * self.settings.regularization_scale;
        Ok((data + regularization, aligned))
    }
}

impl BodyModel for ProceduralBody {
    fn name(&self) -> &str {
        "procedural"
    }

    fn bone_labels(&self) -> &[String] {
        &self.labels
    }

    fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    fn rest_vertices(&self, phenotypes: &PhenotypeVector) -> FitResult<Vec<Point3<f64>>> {
        Ok(self.shape(phenotypes).vertices)
    }

    fn rest_bone_heads(&self, phenotypes: &PhenotypeVector) -> FitResult<Vec<Point3<f64>>> {
        Ok(self.shape(phenotypes).heads.to_vec())
    }

    fn rest_bone_frames(&self, _phenotypes: &PhenotypeVector) -> FitResult<Vec<Rotation3<f64>>> {
        Ok(vec![Rotation3::identity(); self.labels.len()])
    }

    fn posed(&self, phenotypes: &PhenotypeVector, rotations: &[Vector3<f64>]) -> FitResult<PosedBody> {
        self.pose_shape(&self.shape(phenotypes), rotations)
    }

    /// Coordinate descent over the free fields.
    ///
    /// Each iteration tries a step up and down on every free field and keeps
    /// any improvement; the step halves between iterations. Candidates are
    /// compared after a least-squares similarity alignment to the target, so
    /// the fit is insensitive to the target's scale and placement.
    fn fit(&self, request: &FitRequest<'_>) -> FitResult<FitResponse> {
        if request.target.len() != self.vertex_count() {
            return Err(FitError::fitter_failed(format!(
                "target has {} points, model has {} vertices",
                request.target.len(),
                self.vertex_count()
            )));
        }

        let mut best = request.initial;
        let (mut best_value, mut best_vertices) = self.objective(&best, request)?;
        let mut step = self.settings.initial_step;
        let mut iterations = 0;

        for _ in 0..request.max_iterations {
            iterations += 1;
            let mut improved = false;
            for field in request.frozen.free() {
                for direction in [1.0, -1.0] {
                    let candidate = best.with(field, best.get(field) + direction * step);
                    if candidate == best {
                        continue;
                    }
                    let (value, vertices) = self.objective(&candidate, request)?;
                    if value < best_value {
                        best = candidate;
                        best_value = value;
                        best_vertices = vertices;
                        improved = true;
                        break;
                    }
                }
            }
            trace!(iteration = iterations, step, objective = best_value, improved, "Fitter step");
            step *= 0.5;
        }

        if !best_value.is_finite() {
            return Err(FitError::fitter_failed("objective is not finite"));
        }
        debug!(iterations, objective = best_value, phenotypes = %best, "Procedural fit finished");

        Ok(FitResponse {
            phenotypes: best,
            vertices: best_vertices,
            iterations,
            objective: best_value,
        })
    }

    fn anthropometry(&self, rest_vertices: &[Point3<f64>]) -> FitResult<Anthropometry> {
        if rest_vertices.len() != self.vertex_count() {
            return Err(FitError::model_query(
                "anthropometry",
                format!(
                    "expected {} vertices, got {}",
                    self.vertex_count(),
                    rest_vertices.len()
                ),
            ));
        }
        let Some((min, max)) = bounds_of(rest_vertices) else {
            return Err(FitError::model_query("anthropometry", "no vertices"));
        };
        let height = max.z - min.z;

        let mesh = Mesh::from_positions(rest_vertices, &self.faces);
        let waist_circumference = slice::section(&mesh, min.z + height * WAIST_FRACTION)
            .most_central()
            .map_or(0.0, |l| l.perimeter());
        let mass = signed_volume(rest_vertices, &self.faces).abs() * BODY_DENSITY;
        let bmi = if height > 0.0 { mass / (height * height) } else { 0.0 };

        Ok(Anthropometry {
            waist_circumference,
            mass,
            bmi,
        })
    }
}

/// Body dimensions in meters derived from a phenotype vector.
#[derive(Debug, Clone, Copy)]
struct Dimensions {
    stature: f64,
    /// Lengths scale with stature.
    scale: f64,
    /// Stature fraction of the crotch.
    crotch: f64,
    knee: f64,
    hips: (f64, f64),
    waist: (f64, f64),
    bust: (f64, f64),
    chest: (f64, f64),
    shoulder_x: f64,
    hip_x: f64,
    limb: f64,
}

impl From<&PhenotypeVector> for Dimensions {
    fn from(p: &PhenotypeVector) -> Self {
        let gender = p.get(Phenotype::Gender);
        let age = p.get(Phenotype::Age);
        let weight = p.get(Phenotype::Weight);
        let muscle = p.get(Phenotype::Muscle);
        let legs = p.get(Phenotype::Proportions) - 0.5;

        let stature = 1.5 + 0.5 * p.get(Phenotype::Height);
        let scale = stature / BASE_HEIGHT;
        let girth = (0.8 + 0.5 * weight) * scale;
        let limb = girth * (0.9 + 0.2 * muscle);
        let waist_girth = girth * (1.0 + 0.15 * (age - 0.4)) * (1.04 - 0.08 * muscle);

        let hips = ((0.160 + 0.025 * gender) * girth, 0.115 * girth);
        Self {
            stature,
            scale,
            crotch: 0.465 + 0.03 * legs,
            knee: 0.28 + 0.015 * legs,
            hips,
            waist: ((0.140 - 0.020 * gender) * waist_girth, 0.100 * waist_girth),
            bust: ((0.150 - 0.005 * gender) * girth, (0.105 + 0.030 * gender) * girth),
            chest: ((0.175 - 0.015 * gender) * girth, 0.105 * girth),
            shoulder_x: (0.195 - 0.020 * gender) * scale + 0.02 * (girth - scale),
            hip_x: hips.0 * 0.5,
            limb,
        }
    }
}

impl Dimensions {
    #[inline]
    fn z(&self, fraction: f64) -> f64 {
        self.stature * fraction
    }

    /// Rest bone heads, by [`Bone::index`].
    fn heads(&self) -> [Point3<f64>; Bone::COUNT] {
        let s = self.scale;
        let arm = arm_direction(-1.0);
        let upper_arm = 0.17 * self.stature;
        let forearm = 0.145 * self.stature;

        let mut heads = [Point3::origin(); Bone::COUNT];
        for (side, sign) in [(Side::Left, -1.0), (Side::Right, 1.0)] {
            let hip = Point3::new(sign * self.hip_x, 0.0, self.z(0.50));
            let knee = Point3::new(sign * self.hip_x, 0.0, self.z(self.knee));
            let ankle = Point3::new(sign * self.hip_x, 0.0, self.z(0.045));
            let breast = Point3::new(sign * 0.09 * s, -0.7 * self.bust.1, self.z(0.72));
            let shoulder = Point3::new(sign * self.shoulder_x, 0.0, self.z(0.80));
            let direction = Vector3::new(sign * arm.x.abs(), 0.0, arm.z);
            let elbow = shoulder + direction * upper_arm;
            let wrist = elbow + direction * forearm;

            for (bone, at) in side.bones().into_iter().zip([
                hip, hip, knee, ankle, breast, shoulder, shoulder, elbow, wrist,
            ]) {
                heads[bone.index()] = at;
            }
        }
        heads[Bone::Root.index()] = Point3::new(0.0, 0.0, self.z(0.52));
        heads[Bone::Neck.index()] = Point3::new(0.0, 0.0, self.z(0.82));
        heads[Bone::Head.index()] = Point3::new(0.0, 0.0, self.z(0.90));
        heads
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl Side {
    /// Pelvis, upper leg, lower leg, foot, breast, shoulder, upper arm,
    /// lower arm, wrist.
    fn bones(self) -> [Bone; 9] {
        match self {
            Side::Left => [
                Bone::PelvisL,
                Bone::UpperLegL,
                Bone::LowerLegL,
                Bone::FootL,
                Bone::BreastL,
                Bone::ShoulderL,
                Bone::UpperArmL,
                Bone::LowerArmL,
                Bone::WristL,
            ],
            Side::Right => [
                Bone::PelvisR,
                Bone::UpperLegR,
                Bone::LowerLegR,
                Bone::FootR,
                Bone::BreastR,
                Bone::ShoulderR,
                Bone::UpperArmR,
                Bone::LowerArmR,
                Bone::WristR,
            ],
        }
    }
}

/// Unit direction of an arm hanging out to `sign` x.
fn arm_direction(sign: f64) -> Vector3<f64> {
    let angle = ARM_ANGLE_DEGREES.to_radians();
    Vector3::new(sign * angle.sin(), 0.0, -angle.cos())
}

/// One elliptical ring: `a` along the lateral axis, `b` along the other.
#[derive(Debug, Clone, Copy)]
struct Ring {
    center: Point3<f64>,
    a: f64,
    b: f64,
}

struct Shape {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
    bones: Vec<Bone>,
    heads: [Point3<f64>; Bone::COUNT],
}

/// Accumulates closed tubes into one mesh.
struct TubeBuilder {
    segments: usize,
    vertices: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
    bones: Vec<Bone>,
}

impl TubeBuilder {
    fn new(segments: usize) -> Self {
        Self {
            segments,
            vertices: Vec::new(),
            faces: Vec::new(),
            bones: Vec::new(),
        }
    }

    /// Sweep rings from first to last along `axis`, capping both ends.
    ///
    /// `bone_of(i)` binds ring `i`; caps follow their ring.
    fn tube(&mut self, axis: Vector3<f64>, rings: &[Ring], bone_of: impl Fn(usize) -> Bone) {
        let (Some(first), Some(last)) = (rings.first(), rings.last()) else {
            return;
        };
        let d = axis.normalize();
        let reference = if d.y.abs() < 0.9 { Vector3::y() } else { Vector3::z() };
        let v = (reference - d * reference.dot(&d)).normalize();
        let u = v.cross(&d);

        let n = self.segments as u32;
        let base = self.vertices.len() as u32;
        for (i, ring) in rings.iter().enumerate() {
            for k in 0..self.segments {
                let t = 2.0 * PI * k as f64 / self.segments as f64;
                self.vertices
                    .push(ring.center + u * (ring.a * t.cos()) + v * (ring.b * t.sin()));
                self.bones.push(bone_of(i));
            }
        }
        let start = self.vertices.len() as u32;
        self.vertices.push(first.center);
        self.bones.push(bone_of(0));
        self.vertices.push(last.center);
        self.bones.push(bone_of(rings.len() - 1));
        let end = start + 1;

        let ring_index = |r: u32, k: u32| base + r * n + k % n;
        for r in 0..rings.len() as u32 - 1 {
            for k in 0..n {
                let (a, b) = (ring_index(r, k), ring_index(r, k + 1));
                let (c, d) = (ring_index(r + 1, k + 1), ring_index(r + 1, k));
                self.faces.push([a, b, c]);
                self.faces.push([a, c, d]);
            }
        }
        let top = rings.len() as u32 - 1;
        for k in 0..n {
            self.faces.push([start, ring_index(0, k + 1), ring_index(0, k)]);
            self.faces.push([end, ring_index(top, k), ring_index(top, k + 1)]);
        }
    }
}

/// Piecewise-linear profile lookup over `(fraction, a, b)` knots.
fn profile(knots: &[(f64, f64, f64)], fraction: f64) -> (f64, f64) {
    let Some(&(f0, a0, b0)) = knots.first() else {
        return (0.0, 0.0);
    };
    if fraction <= f0 {
        return (a0, b0);
    }
    for pair in knots.windows(2) {
        let ((fa, aa, ba), (fb, ab, bb)) = (pair[0], pair[1]);
        if fraction <= fb {
            let t = (fraction - fa) / (fb - fa);
            return (aa + (ab - aa) * t, ba + (bb - ba) * t);
        }
    }
    knots.last().map_or((0.0, 0.0), |&(_, a, b)| (a, b))
}

/// Rings along a straight segment with linearly varying radii.
fn segment_rings(from: Point3<f64>, to: Point3<f64>, count: usize, start: (f64, f64), end: (f64, f64)) -> Vec<Ring> {
    (0..count)
        .map(|i| {
            let t = i as f64 / (count - 1).max(1) as f64;
            Ring {
                center: from + (to - from) * t,
                a: start.0 + (end.0 - start.0) * t,
                b: start.1 + (end.1 - start.1) * t,
            }
        })
        .collect()
}

fn build(dim: &Dimensions, segments: usize) -> Shape {
    let heads = dim.heads();
    let s = dim.scale;
    let mut builder = TubeBuilder::new(segments);

    // Torso, crotch to shoulders, one ring per percent of stature.
    let knots = [
        (dim.crotch, dim.hips.0 * 0.88, dim.hips.1 * 0.9),
        (0.50, dim.hips.0 * 0.97, dim.hips.1 * 0.97),
        (0.53, dim.hips.0, dim.hips.1),
        (WAIST_FRACTION, dim.waist.0, dim.waist.1),
        (0.72, dim.bust.0, dim.bust.1),
        (0.77, dim.chest.0, dim.chest.1),
        (0.80, dim.chest.0 * 0.9, dim.chest.1 * 0.85),
        (0.83, 0.07 * s, 0.065 * s),
    ];
    const TORSO_RINGS: usize = 37;
    let torso: Vec<Ring> = (0..TORSO_RINGS)
        .map(|i| {
            let f = dim.crotch + (0.83 - dim.crotch) * i as f64 / (TORSO_RINGS - 1) as f64;
            let (a, b) = profile(&knots, f);
            Ring {
                center: Point3::new(0.0, 0.0, dim.z(f)),
                a,
                b,
            }
        })
        .collect();
    builder.tube(Vector3::z(), &torso, |_| Bone::Root);

    // Neck and head.
    let neck = segment_rings(
        Point3::new(0.0, 0.0, dim.z(0.81)),
        Point3::new(0.0, 0.0, dim.z(0.885)),
        5,
        (0.055 * s, 0.06 * s),
        (0.05 * s, 0.055 * s),
    );
    builder.tube(Vector3::z(), &neck, |_| Bone::Neck);

    const HEAD_RINGS: usize = 9;
    let head_center = dim.z(0.935);
    let head_half = dim.z(0.065);
    let mut head: Vec<Ring> = (0..HEAD_RINGS)
        .map(|i| {
            // Open interval of latitudes; the caps close the poles.
            let lat = -PI / 2.0 + PI * (i as f64 + 0.5) / HEAD_RINGS as f64;
            Ring {
                center: Point3::new(0.0, 0.01 * s, head_center + head_half * lat.sin()),
                a: 0.075 * s * lat.cos(),
                b: 0.095 * s * lat.cos(),
            }
        })
        .collect();
    // End caps sit on the poles.
    if let Some(first) = head.first_mut() {
        first.center.z = head_center - head_half;
    }
    if let Some(last) = head.last_mut() {
        last.center.z = head_center + head_half;
    }
    builder.tube(Vector3::z(), &head, |_| Bone::Head);

    for (side, sign) in [(Side::Left, -1.0), (Side::Right, 1.0)] {
        let bones = side.bones();
        let [_, upper_leg, lower_leg, foot, _, _, upper_arm, lower_arm, wrist] = bones;
        let x = sign * dim.hip_x;
        let l = dim.limb;

        // Leg, from just above the crotch to inside the foot.
        let top = Point3::new(x, 0.0, dim.z(dim.crotch + 0.02));
        let knee = heads[lower_leg.index()];
        let shin_end = Point3::new(x, 0.0, dim.z(0.02));
        let mut leg = segment_rings(top, knee, 8, (0.085 * l, 0.085 * l), (0.05 * l, 0.052 * l));
        leg.extend(segment_rings(knee, shin_end, 9, (0.05 * l, 0.052 * l), (0.032 * l, 0.034 * l)).into_iter().skip(1));
        let thigh_rings = 8;
        builder.tube(-Vector3::z(), &leg, |i| if i < thigh_rings { upper_leg } else { lower_leg });

        // Foot, heel to toe along -y, resting on the ground.
        let foot_half_height = 0.025 * s;
        let heel = Point3::new(x, 0.03 * s, foot_half_height);
        let toe = Point3::new(x, -0.18 * s, foot_half_height * 0.8);
        let foot_rings = segment_rings(heel, toe, 5, (0.04 * s, foot_half_height), (0.035 * s, foot_half_height * 0.6));
        builder.tube(-Vector3::y(), &foot_rings, |_| foot);

        // Arm, shoulder to fingertips.
        let direction = arm_direction(sign);
        let shoulder = heads[upper_arm.index()];
        let elbow = heads[lower_arm.index()];
        let wrist_at = heads[wrist.index()];
        let hand_end = wrist_at + direction * 0.10 * dim.stature;
        let mut arm = segment_rings(shoulder, elbow, 5, (0.05 * l, 0.052 * l), (0.038 * l, 0.04 * l));
        arm.extend(segment_rings(elbow, wrist_at, 5, (0.038 * l, 0.04 * l), (0.028 * l, 0.03 * l)).into_iter().skip(1));
        arm.extend(segment_rings(wrist_at, hand_end, 4, (0.028 * l, 0.03 * l), (0.04 * l, 0.015 * l)).into_iter().skip(1));
        builder.tube(direction, &arm, |i| match i {
            0..=4 => upper_arm,
            5..=8 => lower_arm,
            _ => wrist,
        });
    }

    Shape {
        vertices: builder.vertices,
        faces: builder.faces,
        bones: builder.bones,
        heads,
    }
}

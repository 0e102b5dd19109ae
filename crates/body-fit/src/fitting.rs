//! The body-fitting pipeline.
//!
//! [`BodyFitter`] runs one fit per call:
//!
//! 1. Normalize orientation and anchor the pelvis.
//! 2. Extract target joints (geometry or keypoints) and a skeletal summary.
//! 3. Estimate initial phenotypes.
//! 4. Solve the template pose against the target joints.
//! 5. Pose the template, scale it to the target and align it with ICP.
//! 6. Project the aligned template onto the target surface.
//! 7. Refine the phenotypes with the body model's fitter.
//! 8. Measure the refined rest template and score confidence.
//!
//! The fitter holds a [`ModelHandle`] and no mutable state, so one fitter can
//! serve many threads.
//!
//! # Example
//!
//! ```no_run
//! use body_fit::{BodyFitter, FitInput, Mesh, ModelHandle, ProceduralBody, UserHints};
//!
//! let scan = Mesh::load("scan.ply").unwrap();
//! let fitter = BodyFitter::new(ModelHandle::new(ProceduralBody::new()).unwrap());
//! let input = FitInput::new(&scan).with_hints(UserHints::new().with_height_cm(168.0));
//! let result = fitter.fit(&input).unwrap();
//! println!("{}", result.measurement);
//! ```

use crate::error::{ErrorCode, FitResult};
use crate::joints::JointSet;
use crate::landmarks::{self, GeometricParams, JointStrategy};
use crate::measure::{self, ConfidencePenalties, Degradation, Measurement};
use crate::model::{FitRequest, ModelHandle};
use crate::orientation::{self, OrientationParams, PelvisSource};
use crate::phenotype::{self, FreezeSet, PhenotypeParams, PhenotypeVector, UserHints};
use crate::pose::{PoseParams, PoseSolver};
use crate::registration::{icp_align, AlignmentCorrection, IcpParams, IcpResult};
use crate::rig::{Bone, PoseDelta};
use crate::surface::SurfaceProjector;
use crate::tracing_ext::{log_fallback, log_mesh_stats, OperationTimer};
use crate::types::{bounds_of, mean_point, Mesh};
use nalgebra::Point3;
use tracing::{debug, info, warn};

/// Every tunable of one fit.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct FitParams {
    pub orientation: OrientationParams,
    pub geometric: GeometricParams,
    pub pose: PoseParams,
    pub icp: IcpParams,
    pub correction: AlignmentCorrection,
    pub phenotype: PhenotypeParams,
    pub confidence: ConfidencePenalties,
    /// Keep intermediate point sets in [`FittingResult::diagnostics`].
    pub collect_diagnostics: bool,
}

impl FitParams {
    #[must_use]
    pub fn with_pose(mut self, pose: PoseParams) -> Self {
        self.pose = pose;
        self
    }

    #[must_use]
    pub fn with_icp(mut self, icp: IcpParams) -> Self {
        self.icp = icp;
        self
    }

    #[must_use]
    pub fn with_correction(mut self, correction: AlignmentCorrection) -> Self {
        self.correction = correction;
        self
    }

    #[must_use]
    pub fn with_phenotype(mut self, phenotype: PhenotypeParams) -> Self {
        self.phenotype = phenotype;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: ConfidencePenalties) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, collect: bool) -> Self {
        self.collect_diagnostics = collect;
        self
    }
}

/// Inputs to one fit. The mesh is borrowed and never modified.
#[derive(Debug, Clone, Copy)]
pub struct FitInput<'a> {
    pub mesh: &'a Mesh,
    /// Raw MHR70 keypoints in the reconstruction's frame.
    pub keypoints: Option<&'a [Point3<f64>]>,
    pub hints: UserHints,
}

impl<'a> FitInput<'a> {
    pub fn new(mesh: &'a Mesh) -> Self {
        Self {
            mesh,
            keypoints: None,
            hints: UserHints::default(),
        }
    }

    #[must_use]
    pub fn with_keypoints(mut self, keypoints: &'a [Point3<f64>]) -> Self {
        self.keypoints = Some(keypoints);
        self
    }

    #[must_use]
    pub fn with_hints(mut self, hints: UserHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Outcome of the rigid alignment step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct IcpSummary {
    pub iterations: usize,
    pub mean_distance: f64,
    pub converged: bool,
    pub rotation_degrees: f64,
}

impl From<&IcpResult> for IcpSummary {
    fn from(result: &IcpResult) -> Self {
        Self {
            iterations: result.iterations,
            mean_distance: result.mean_distance,
            converged: result.converged,
            rotation_degrees: result.rotation_degrees(),
        }
    }
}

/// Intermediate state kept when [`FitParams::collect_diagnostics`] is set.
#[derive(Debug, Clone)]
pub struct FitDiagnostics {
    /// Target joints, pelvis-centered and height-scaled.
    pub target_joints: JointSet,
    /// Template rest joints, pelvis-centered and height-scaled.
    pub template_joints: JointSet,
    /// Canonicalized keypoints, when keypoints drove extraction.
    pub keypoints: Option<Vec<Point3<f64>>>,
    /// Posed template after ICP and correction, in the centered target frame.
    pub aligned_template: Vec<Point3<f64>>,
    pub template_faces: Vec<[u32; 3]>,
    /// Closest points on the target surface, one per template vertex.
    pub projected_target: Vec<Point3<f64>>,
    pub projection_distances: Vec<f64>,
    pub icp: IcpSummary,
}

/// Everything one fit produces.
#[derive(Debug, Clone)]
pub struct FittingResult {
    pub phenotypes: PhenotypeVector,
    /// Heuristic starting point handed to the fitter.
    pub initial_phenotypes: PhenotypeVector,
    pub measurement: Measurement,
    /// Rest-pose template vertices for the fitted phenotypes, scaled to the
    /// user height when one was given.
    pub fitted_vertices: Vec<Point3<f64>>,
    /// Mean distance between fitter output and the closest-point target.
    pub mean_vertex_error: f64,
    pub pose: PoseDelta,
    pub strategy: JointStrategy,
    pub pelvis_source: PelvisSource,
    pub skipped_chains: Vec<&'static str>,
    /// Landmarks placed by fallbacks.
    pub fallbacks: Vec<&'static str>,
    pub fitter_iterations: usize,
    pub icp: IcpSummary,
    pub diagnostics: Option<FitDiagnostics>,
}

impl FittingResult {
    pub fn confidence(&self) -> f64 {
        self.measurement.confidence
    }
}

/// Fits a body model to reconstructed meshes.
#[derive(Debug, Clone)]
pub struct BodyFitter {
    handle: ModelHandle,
    params: FitParams,
}

impl BodyFitter {
    pub fn new(handle: ModelHandle) -> Self {
        Self::with_params(handle, FitParams::default())
    }

    pub fn with_params(handle: ModelHandle, params: FitParams) -> Self {
        Self { handle, params }
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Run the whole pipeline on one input.
    ///
    /// # Errors
    ///
    /// Fails on an empty or invalid mesh, malformed keypoints, or a body
    /// model query failure. Geometric trouble degrades confidence instead.
    pub fn fit(&self, input: &FitInput<'_>) -> FitResult<FittingResult> {
        let _fit_timer = OperationTimer::with_context(
            "fit",
            input.mesh.vertex_count(),
            input.mesh.face_count(),
        );
        let model = self.handle.model();
        let rig = self.handle.rig();
        let params = &self.params;
        let hints = input.hints;
        let user_height = hints.height_m();

        // Orientation and landmarks.
        let normalized = {
            let _t = OperationTimer::new("normalize");
            orientation::normalize(input.mesh, &params.orientation)?
        };
        log_mesh_stats(&normalized.mesh, "normalized");
        let (skeletal, extraction) = {
            let _t = OperationTimer::new("landmarks");
            let skeletal = landmarks::skeletal::measure(&normalized.mesh);
            let extraction =
                landmarks::extract_joints(&normalized.mesh, input.keypoints, &params.geometric)?;
            (skeletal, extraction)
        };
        debug!(
            strategy = ?extraction.strategy,
            joints = extraction.joints.len(),
            fallbacks = extraction.fallbacks.len(),
            "Extracted target joints"
        );
        if user_height.is_none() {
            warn!("No user height supplied; measurements stay in model units");
        }

        let initial = phenotype::estimate_initial(&skeletal, &hints, &params.phenotype);
        debug!(phenotypes = %initial, "Initial phenotype estimate");

        // Bring the target to the user's height.
        let mut target = normalized.mesh;
        let target_scale = user_height.map_or(1.0, |h| orientation::height_scale(normalized.height, h));
        target.scale(target_scale);
        let target_joints = extraction.joints.centered_on_pelvis().scaled(target_scale);

        // Template joints at the same height.
        let rest_heads = model.rest_bone_heads(&initial)?;
        let template_height = model.rest_height(&initial)?;
        let template_scale = user_height.map_or(1.0, |h| orientation::height_scale(template_height, h));
        let template_joints = rig
            .template_joints(&rest_heads)
            .centered_on_pelvis()
            .scaled(template_scale);

        let solution = {
            let _t = OperationTimer::new("pose_solve");
            let frames = model.rest_bone_frames(&initial)?;
            PoseSolver::new(rig, &frames, params.pose).solve(&template_joints, &target_joints)
        };
        let rotations = solution.delta.to_model_rotations(rig);

        // Pose, scale and align the template.
        let (aligned, icp) = {
            let _t = OperationTimer::new("align");
            let posed = model.posed(&initial, &rotations)?;
            let mut vertices = posed.vertices;
            if let (Some(rest), Some(now)) = (
                rig.lookup(&rest_heads, Bone::Root),
                rig.lookup(&posed.bone_heads, Bone::Root),
            ) {
                let anchor = rest - now;
                for v in &mut vertices {
                    *v += anchor;
                }
            }
            let posed_height = bounds_of(&vertices).map_or(0.0, |(min, max)| max.z - min.z);
            let scale = orientation::height_scale(posed_height, target.height());
            let center = mean_point(&vertices).unwrap_or_else(Point3::origin);
            let source: Vec<Point3<f64>> = vertices
                .iter()
                .map(|p| Point3::from((p - center) * scale))
                .collect();

            let target_center = target.centroid().unwrap_or_else(Point3::origin);
            target.translate(-target_center.coords);
            let target_points = target.positions();

            let icp = icp_align(&source, &target_points, &params.icp)?;
            let mut aligned = icp.aligned.clone();
            params.correction.apply(&mut aligned);
            debug!(
                iterations = icp.iterations,
                mean_distance = format!("{:.4}", icp.mean_distance),
                rotation_degrees = format!("{:.2}", icp.rotation_degrees()),
                "Template aligned"
            );
            (aligned, IcpSummary::from(&icp))
        };

        let projection = {
            let _t = OperationTimer::with_context("project", target.vertex_count(), target.face_count());
            SurfaceProjector::new(&target)?.project_all(&aligned)
        };

        // Refine.
        let frozen = FreezeSet::for_fit(&hints, &params.phenotype);
        let request = FitRequest {
            target: &projection.points,
            initial,
            frozen,
            pose: &rotations,
            regularization: params.phenotype.regularization,
            max_iterations: params.phenotype.fitter_iterations,
        };
        let (phenotypes, fitted, fitter_iterations) = {
            let _t = OperationTimer::new("phenotype_fit");
            match model.fit(&request) {
                Ok(response) => (response.phenotypes, response.vertices, response.iterations),
                Err(e) if e.code() == ErrorCode::FitterFailed => {
                    log_fallback("phenotype_fit", &e.to_string());
                    (initial, aligned.clone(), 0)
                }
                Err(e) => return Err(e),
            }
        };
        let mean_vertex_error = mean_error(&fitted, &projection.points);

        // Measure.
        let template = {
            let _t = OperationTimer::new("measure");
            measure::measure_template(&self.handle, &phenotypes, hints.height_cm)?
        };
        let degradation = Degradation {
            missing_height: user_height.is_none(),
            pelvis_fallback: normalized.pelvis_source.is_fallback(),
            skipped_chains: solution.skipped_chain_count(),
        };
        let base = measure::confidence_from_error(mean_vertex_error);
        let confidence = params.confidence.apply(base, &degradation);
        let measurement = template.with_confidence(confidence);

        info!(
            height_cm = format!("{:.1}", measurement.height_cm),
            bust_cm = format!("{:.1}", measurement.bust_cm),
            waist_cm = format!("{:.1}", measurement.waist_cm),
            hips_cm = format!("{:.1}", measurement.hips_cm),
            mean_error_mm = format!("{:.1}", mean_vertex_error * 1000.0),
            confidence = format!("{:.2}", confidence),
            "Fit complete"
        );

        let diagnostics = params.collect_diagnostics.then(|| FitDiagnostics {
            target_joints: target_joints.clone(),
            template_joints: template_joints.clone(),
            keypoints: extraction.keypoints.clone(),
            aligned_template: aligned,
            template_faces: model.faces().to_vec(),
            projected_target: projection.points.clone(),
            projection_distances: projection.distances.clone(),
            icp,
        });

        Ok(FittingResult {
            phenotypes,
            initial_phenotypes: initial,
            measurement,
            fitted_vertices: template.vertices,
            mean_vertex_error,
            pose: solution.delta,
            strategy: extraction.strategy,
            pelvis_source: normalized.pelvis_source,
            skipped_chains: solution.skipped_chains,
            fallbacks: extraction.fallbacks,
            fitter_iterations,
            icp,
            diagnostics,
        })
    }
}

/// Mean point-to-point distance over paired sets; infinite when the sets
/// do not pair up.
fn mean_error(a: &[Point3<f64>], b: &[Point3<f64>]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter().zip(b).map(|(p, q)| (p - q).norm()).sum::<f64>() / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProceduralBody;
    use crate::phenotype::{Gender, Phenotype};
    use approx::assert_relative_eq;

    fn scan(phenotypes: &PhenotypeVector) -> Mesh {
        ProceduralBody::new().rest_mesh(phenotypes)
    }

    fn fitter() -> BodyFitter {
        BodyFitter::new(ModelHandle::new(ProceduralBody::new()).unwrap())
    }

    #[test]
    fn test_fit_procedural_scan() {
        let truth = PhenotypeVector::default().with(Phenotype::Weight, 0.7);
        let mesh = scan(&truth);
        let input = FitInput::new(&mesh).with_hints(UserHints::new().with_height_cm(175.0));
        let result = fitter().fit(&input).unwrap();

        assert_eq!(result.strategy, JointStrategy::Geometric);
        assert_relative_eq!(result.measurement.height_cm, 175.0, epsilon = 0.5);
        assert!((0.0..=1.0).contains(&result.confidence()));
        assert!(result.diagnostics.is_none());
        assert_eq!(result.fitted_vertices.len(), mesh.vertex_count());
        for (_, value) in result.phenotypes.iter() {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_missing_height_is_penalized() {
        let mesh = scan(&PhenotypeVector::default());
        let with = fitter()
            .fit(&FitInput::new(&mesh).with_hints(UserHints::new().with_height_cm(175.0)))
            .unwrap();
        let without = fitter().fit(&FitInput::new(&mesh)).unwrap();
        assert!(without.confidence() <= 0.8 + 1e-9);
        assert!(with.confidence() <= 1.0);
    }

    #[test]
    fn test_gender_hint_is_frozen() {
        let mesh = scan(&PhenotypeVector::default());
        let hints = UserHints::new()
            .with_height_cm(170.0)
            .with_gender(Gender::Male);
        let result = fitter().fit(&FitInput::new(&mesh).with_hints(hints)).unwrap();
        assert_eq!(result.phenotypes.get(Phenotype::Gender), 0.0);
        assert_eq!(
            result.phenotypes.get(Phenotype::Height),
            result.initial_phenotypes.get(Phenotype::Height)
        );
    }

    #[test]
    fn test_diagnostics_collected() {
        let mesh = scan(&PhenotypeVector::default());
        let fitter = BodyFitter::with_params(
            ModelHandle::new(ProceduralBody::new()).unwrap(),
            FitParams::default().with_diagnostics(true),
        );
        let result = fitter.fit(&FitInput::new(&mesh)).unwrap();
        let diagnostics = result.diagnostics.unwrap();
        let n = ProceduralBody::new().vertex_count();
        assert_eq!(diagnostics.aligned_template.len(), n);
        assert_eq!(diagnostics.projected_target.len(), n);
        assert!(!diagnostics.target_joints.is_empty());
    }

    #[test]
    fn test_empty_mesh_is_fatal() {
        let err = fitter().fit(&FitInput::new(&Mesh::new())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyMesh);
    }

    #[test]
    fn test_mean_error() {
        let a = [Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let b = [Point3::new(0.0, 0.0, 2.0), Point3::new(1.0, 0.0, 0.0)];
        assert_relative_eq!(mean_error(&a, &b), 1.0);
        assert!(mean_error(&a, &b[..1]).is_infinite());
    }
}

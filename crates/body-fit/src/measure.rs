//! Calibrated body measurements from a fitted template.
//!
//! Slice heights come from the template's own bones rather than fixed
//! fractions: bust at the mean height of the breast bones, hips at the mean
//! height of the pelvis bones. Each circumference is the perimeter of the
//! most central loop at that height, which keeps arms out of the bust.
//! Waist, mass and BMI come from the body model's anthropometry.
//!
//! With a user height, every length is scaled by
//! `user_height_cm / (template_height_m × 100)`; without one, results stay
//! in model units (meters × 100) and confidence is penalized.

use crate::error::{FitError, FitResult};
use crate::model::ModelHandle;
use crate::phenotype::PhenotypeVector;
use crate::rig::Bone;
use crate::slice;
use crate::surface::convex_hull;
use crate::tracing_ext::log_fallback;
use crate::types::{bounds_of, Mesh};
use nalgebra::Point3;
use std::fmt;
use tracing::debug;

/// Centimeters per inch.
pub const CM_PER_INCH: f64 = 2.54;

/// Stature fractions used when the model lacks the landmark bones.
const BUST_FRACTION: f64 = 0.72;
const HIP_FRACTION: f64 = 0.53;

/// Body measurements in centimeters and kilograms.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    pub height_cm: f64,
    pub bust_cm: f64,
    pub waist_cm: f64,
    pub hips_cm: f64,
    pub weight_kg: f64,
    pub bmi: f64,
    /// In [0, 1].
    pub confidence: f64,
}

/// Lengths of a [`Measurement`] in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize))]
pub struct Inches {
    pub height: f64,
    pub bust: f64,
    pub waist: f64,
    pub hips: f64,
}

impl Measurement {
    pub fn to_inches(&self) -> Inches {
        Inches {
            height: self.height_cm / CM_PER_INCH,
            bust: self.bust_cm / CM_PER_INCH,
            waist: self.waist_cm / CM_PER_INCH,
            hips: self.hips_cm / CM_PER_INCH,
        }
    }

    pub fn waist_hip_ratio(&self) -> Option<f64> {
        (self.hips_cm > 0.0).then(|| self.waist_cm / self.hips_cm)
    }

    /// Classification of the bust, waist and hips.
    pub fn classify(&self, silhouette_limit: usize) -> crate::classify::Classification {
        let inches = self.to_inches();
        crate::classify::classify(inches.bust, inches.waist, inches.hips, silhouette_limit)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "height {:.1} cm, bust {:.1} cm, waist {:.1} cm, hips {:.1} cm, weight {:.1} kg, bmi {:.1} (confidence {:.2})",
            self.height_cm,
            self.bust_cm,
            self.waist_cm,
            self.hips_cm,
            self.weight_kg,
            self.bmi,
            self.confidence
        )
    }
}

/// Perimeter of the most central loop at height `z`.
pub fn circumference_at(mesh: &Mesh, z: f64) -> Option<f64> {
    slice::section(mesh, z).most_central().map(|l| l.perimeter())
}

/// Base confidence from the mean per-vertex fit error in meters:
/// 1 at zero error, 0 at 50 mm and beyond.
pub fn confidence_from_error(mean_error_m: f64) -> f64 {
    if !mean_error_m.is_finite() {
        return 0.0;
    }
    (1.0 - mean_error_m * 1000.0 / 50.0).clamp(0.0, 1.0)
}

/// Multipliers applied to the base confidence for degraded inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ConfidencePenalties {
    /// No user height; results are in model units.
    pub missing_height: f64,
    /// The pelvis anchor came from a fallback.
    pub pelvis_fallback: f64,
    /// Per pose chain left at identity.
    pub skipped_chain: f64,
    /// Lower bound on the combined multiplier.
    pub floor: f64,
}

impl Default for ConfidencePenalties {
    fn default() -> Self {
        Self {
            missing_height: 0.8,
            pelvis_fallback: 0.9,
            skipped_chain: 0.95,
            floor: 0.5,
        }
    }
}

/// What went wrong during one fit, as far as confidence cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Degradation {
    pub missing_height: bool,
    pub pelvis_fallback: bool,
    pub skipped_chains: usize,
}

impl ConfidencePenalties {
    /// No penalties at all.
    pub const fn none() -> Self {
        Self {
            missing_height: 1.0,
            pelvis_fallback: 1.0,
            skipped_chain: 1.0,
            floor: 0.0,
        }
    }

    /// Combined multiplier for `degradation`, never below `floor`.
    pub fn factor(&self, degradation: &Degradation) -> f64 {
        let mut factor = 1.0;
        if degradation.missing_height {
            factor *= self.missing_height;
        }
        if degradation.pelvis_fallback {
            factor *= self.pelvis_fallback;
        }
        factor *= self
            .skipped_chain
            .powi(i32::try_from(degradation.skipped_chains).unwrap_or(i32::MAX));
        factor.max(self.floor).clamp(0.0, 1.0)
    }

    /// Penalized confidence in [0, 1].
    pub fn apply(&self, base: f64, degradation: &Degradation) -> f64 {
        (base * self.factor(degradation)).clamp(0.0, 1.0)
    }
}

/// Measurements of the rest template before confidence is known.
#[derive(Debug, Clone)]
pub struct TemplateMeasurement {
    pub height_cm: f64,
    pub bust_cm: f64,
    pub waist_cm: f64,
    pub hips_cm: f64,
    pub weight_kg: f64,
    pub bmi: f64,
    /// Applied length scale; 1.0 without a user height.
    pub scale: f64,
    /// Slice heights in model units.
    pub bust_z: f64,
    pub hip_z: f64,
    /// Rest-pose template vertices, scaled.
    pub vertices: Vec<Point3<f64>>,
}

impl TemplateMeasurement {
    pub fn with_confidence(&self, confidence: f64) -> Measurement {
        Measurement {
            height_cm: self.height_cm,
            bust_cm: self.bust_cm,
            waist_cm: self.waist_cm,
            hips_cm: self.hips_cm,
            weight_kg: self.weight_kg,
            bmi: self.bmi,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Measure the rest template for `phenotypes`.
///
/// # Errors
///
/// Fails when the body model cannot produce the rest body or its
/// anthropometry.
pub fn measure_template(
    handle: &ModelHandle,
    phenotypes: &PhenotypeVector,
    user_height_cm: Option<f64>,
) -> FitResult<TemplateMeasurement> {
    let model = handle.model();
    let rig = handle.rig();
    let vertices = model.rest_vertices(phenotypes)?;
    let heads = model.rest_bone_heads(phenotypes)?;
    let (min, max) = bounds_of(&vertices)
        .ok_or_else(|| FitError::model_query("rest_vertices", "model returned no vertices"))?;
    let height = max.z - min.z;

    let mesh = if model.faces().is_empty() {
        let (points, faces) = convex_hull(&vertices)?;
        Mesh::from_positions(&points, &faces)
    } else {
        Mesh::from_positions(&vertices, model.faces())
    };

    let bust_z = rig
        .mean_height(&heads, Bone::BreastL, Bone::BreastR)
        .unwrap_or_else(|| {
            log_fallback("bust_level", "model has no breast bones");
            min.z + height * BUST_FRACTION
        });
    let hip_z = rig
        .mean_height(&heads, Bone::PelvisL, Bone::PelvisR)
        .unwrap_or_else(|| {
            log_fallback("hip_level", "model has no pelvis bones");
            min.z + height * HIP_FRACTION
        });

    let bust = circumference_at(&mesh, bust_z).unwrap_or_else(|| {
        log_fallback("bust", "no loop at bust level");
        0.0
    });
    let hips = circumference_at(&mesh, hip_z).unwrap_or_else(|| {
        log_fallback("hips", "no loop at hip level");
        0.0
    });
    let anthropometry = model.anthropometry(&vertices)?;

    let scale = match user_height_cm {
        Some(cm) if height > 0.0 => cm / (height * 100.0),
        _ => 1.0,
    };
    let height_cm = height * 100.0 * scale;
    let weight_kg = anthropometry.mass * scale.powi(3);
    let bmi = if height_cm > 0.0 {
        weight_kg / (height_cm / 100.0).powi(2)
    } else {
        anthropometry.bmi
    };

    debug!(
        bust_z = format!("{:.3}", bust_z),
        hip_z = format!("{:.3}", hip_z),
        scale = format!("{:.4}", scale),
        "Measured template"
    );

    Ok(TemplateMeasurement {
        height_cm,
        bust_cm: bust * 100.0 * scale,
        waist_cm: anthropometry.waist_circumference * 100.0 * scale,
        hips_cm: hips * 100.0 * scale,
        weight_kg,
        bmi,
        scale,
        bust_z,
        hip_z,
        vertices: vertices
            .iter()
            .map(|p| Point3::from(p.coords * scale))
            .collect(),
    })
}

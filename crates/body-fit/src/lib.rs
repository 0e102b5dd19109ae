//! Fit a parametric body template to a reconstructed human mesh and extract
//! calibrated body measurements.
//!
//! The input is a watertight or near-watertight mesh of a person standing in
//! roughly an A-pose, optionally with 70 MHR keypoints and user hints (height,
//! gender, weight). The output is a phenotype vector for the body model plus
//! height, bust, waist, hips, weight and BMI with a confidence score, and a
//! body-type classification on top of those.
//!
//! # Units and Scale
//!
//! **Model space is meters.** Scans in arbitrary units are normalized to the
//! template height before fitting; when the user supplies a height, final
//! measurements are rescaled to it and reported in centimeters and kilograms.
//! Without a height, measurements stay in model units and confidence is
//! penalized.
//!
//! # Coordinate System
//!
//! Right-handed, Z up after normalization:
//! - X: left/right, with the left side at -X
//! - Y: front/back
//! - Z: height, feet at the lowest point
//!
//! Y-up inputs (the usual output of mesh reconstruction) are rotated to Z-up
//! by [`orientation::normalize`].
//!
//! # Quick Start
//!
//! ```no_run
//! use body_fit::{BodyFitter, FitInput, Gender, Mesh, ModelHandle, ProceduralBody, UserHints};
//!
//! let scan = Mesh::load("scan.ply").unwrap();
//! let keypoints = body_fit::io::load_keypoints("scan_keypoints.json".as_ref()).unwrap();
//!
//! let fitter = BodyFitter::new(ModelHandle::new(ProceduralBody::new()).unwrap());
//! let hints = UserHints::new()
//!     .with_height_cm(170.0)
//!     .with_gender(Gender::Female);
//! let input = FitInput::new(&scan)
//!     .with_keypoints(&keypoints)
//!     .with_hints(hints);
//!
//! let result = fitter.fit(&input).unwrap();
//! println!("{}", result.measurement);
//! println!("{}", result.measurement.classify(3).body_type);
//! ```
//!
//! # Body Models
//!
//! The pipeline talks to the template through the [`BodyModel`] trait. The
//! crate ships [`ProceduralBody`], a closed tube-built template with a
//! 21-bone rig and a coordinate-descent phenotype fitter. Other models plug
//! in behind a [`ModelHandle`]; [`model::LazyModel`] defers an expensive load
//! until first use.
//!
//! # Configuration
//!
//! Every tunable lives in [`FitParams`]. With the `config` feature (default)
//! it loads from and saves to TOML:
//!
//! ```no_run
//! use body_fit::FitParams;
//!
//! let params = FitParams::from_toml_file("fit.toml").unwrap();
//! params.save_toml("fit-copy.toml").unwrap();
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`FitResult`]. Each [`FitError`] carries a
//! stable [`ErrorCode`] and a recovery suggestion, and integrates with
//! `miette` for rich terminal reports.

mod error;
mod types;

pub mod classify;
#[cfg(feature = "config")]
mod config;
pub mod diagnostics;
pub mod fitting;
pub mod io;
pub mod joints;
pub mod landmarks;
pub mod measure;
pub mod model;
pub mod orientation;
pub mod phenotype;
pub mod pose;
pub mod registration;
pub mod rig;
pub mod slice;
pub mod surface;
pub mod tracing_ext;

// Re-export core types at crate root
pub use error::{ErrorCode, FitError, FitResult, InputLocation, RecoverySuggestion};
pub use types::{Mesh, UpAxis, Vertex, VertexColor};

pub use classify::{BodyType, Classification, Recommendation, Silhouette};
pub use fitting::{BodyFitter, FitDiagnostics, FitInput, FitParams, FittingResult, IcpSummary};
pub use io::{MeshFormat, PlyEncoding, load_keypoints, load_mesh, save_mesh, save_ply};
pub use joints::{Joint, JointSet};
pub use landmarks::{Extraction, JointStrategy};
pub use measure::{ConfidencePenalties, Inches, Measurement};
pub use model::{BodyModel, LazyModel, ModelHandle, ProceduralBody, ProceduralSettings};
pub use orientation::{OrientationParams, PelvisSource};
pub use phenotype::{Gender, Phenotype, PhenotypeParams, PhenotypeVector, UserHints};
pub use pose::{PoseParams, PoseSolution};
pub use registration::{AlignmentCorrection, IcpParams};
pub use rig::{Bone, Rig};
pub use tracing_ext::OperationTimer;

impl Mesh {
    /// Load a mesh from a file, auto-detecting format from extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> FitResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh as PLY.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> FitResult<()> {
        io::save_mesh(self, path.as_ref())
    }
}

//! Parametric body-model service.
//!
//! The pipeline drives a differentiable body model through [`BodyModel`]:
//! rest-pose queries, posing, a phenotype fitter and anthropometry. The
//! model is held in a [`ModelHandle`], an explicitly constructed, cheaply
//! cloned and read-only service object that many fits may share.
//!
//! [`procedural::ProceduralBody`] is a self-contained implementation used by
//! the command-line tool and the tests.

pub mod procedural;

pub use procedural::{ProceduralBody, ProceduralSettings};

use crate::error::{FitError, FitResult};
use crate::phenotype::{FreezeSet, PhenotypeVector, RegularizationWeights};
use crate::rig::Rig;
use crate::types::bounds_of;
use nalgebra::{Point3, Rotation3, Vector3};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info};

/// Vertices and bone heads of a posed body.
#[derive(Debug, Clone, PartialEq)]
pub struct PosedBody {
    pub vertices: Vec<Point3<f64>>,
    /// One head per model bone, in `bone_labels` order.
    pub bone_heads: Vec<Point3<f64>>,
}

/// Input to [`BodyModel::fit`].
#[derive(Debug, Clone)]
pub struct FitRequest<'a> {
    /// One target point per model vertex.
    pub target: &'a [Point3<f64>],
    pub initial: PhenotypeVector,
    pub frozen: FreezeSet,
    /// Axis-angle rotation per model bone, applied while fitting.
    pub pose: &'a [Vector3<f64>],
    pub regularization: RegularizationWeights,
    pub max_iterations: usize,
}

/// Output of [`BodyModel::fit`].
#[derive(Debug, Clone)]
pub struct FitResponse {
    pub phenotypes: PhenotypeVector,
    /// Posed model vertices in the target's frame, one per target point.
    pub vertices: Vec<Point3<f64>>,
    pub iterations: usize,
    /// Final objective value.
    pub objective: f64,
}

/// Anthropometry of a rest-pose body, in model units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anthropometry {
    pub waist_circumference: f64,
    /// Kilograms at model scale.
    pub mass: f64,
    pub bmi: f64,
}

/// A parametric body model.
///
/// Implementations are immutable after construction; every method takes
/// `&self`, so one instance can serve concurrent fits.
pub trait BodyModel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Bone labels, in the order every per-bone array uses.
    fn bone_labels(&self) -> &[String];

    /// Triangles over the model's vertices. Topology does not depend on
    /// phenotypes.
    fn faces(&self) -> &[[u32; 3]];

    /// # Errors
    ///
    /// Fails when the model cannot evaluate the phenotypes.
    fn rest_vertices(&self, phenotypes: &PhenotypeVector) -> FitResult<Vec<Point3<f64>>>;

    /// # Errors
    ///
    /// Fails when the model cannot evaluate the phenotypes.
    fn rest_bone_heads(&self, phenotypes: &PhenotypeVector) -> FitResult<Vec<Point3<f64>>>;

    /// Rest orientation of every bone.
    ///
    /// # Errors
    ///
    /// Fails when the model cannot evaluate the phenotypes.
    fn rest_bone_frames(&self, phenotypes: &PhenotypeVector) -> FitResult<Vec<Rotation3<f64>>>;

    /// Pose the body with one local axis-angle rotation per bone.
    ///
    /// # Errors
    ///
    /// Fails when `rotations` does not match the bone list.
    fn posed(&self, phenotypes: &PhenotypeVector, rotations: &[Vector3<f64>]) -> FitResult<PosedBody>;

    /// Refine the free phenotypes toward a per-vertex target.
    ///
    /// # Errors
    ///
    /// Fails when the target does not match the vertex count or the
    /// optimizer cannot proceed.
    fn fit(&self, request: &FitRequest<'_>) -> FitResult<FitResponse>;

    /// # Errors
    ///
    /// Fails when the vertices do not belong to this model.
    fn anthropometry(&self, rest_vertices: &[Point3<f64>]) -> FitResult<Anthropometry>;

    /// Vertical extent of the rest body.
    ///
    /// # Errors
    ///
    /// Propagates [`BodyModel::rest_vertices`] failures.
    fn rest_height(&self, phenotypes: &PhenotypeVector) -> FitResult<f64> {
        let vertices = self.rest_vertices(phenotypes)?;
        bounds_of(&vertices)
            .map(|(min, max)| max.z - min.z)
            .ok_or_else(|| FitError::model_query("rest_vertices", "model returned no vertices"))
    }
}

/// Shared handle to an initialized body model.
///
/// The rig is resolved once, at construction.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<dyn BodyModel>,
    rig: Arc<Rig>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model.name())
            .field("bones", &self.rig.bone_count())
            .finish()
    }
}

impl ModelHandle {
    /// Wrap an already constructed model.
    ///
    /// # Errors
    ///
    /// Fails when the model's bone list lacks the root bone.
    pub fn new<M: BodyModel + 'static>(model: M) -> FitResult<Self> {
        Self::from_arc(Arc::new(model))
    }

    /// # Errors
    ///
    /// Fails when the model's bone list lacks the root bone.
    pub fn from_arc(model: Arc<dyn BodyModel>) -> FitResult<Self> {
        let rig = Rig::from_labels(model.bone_labels())?;
        let missing = rig.missing();
        if !missing.is_empty() {
            debug!(model = model.name(), ?missing, "Model lacks some rig bones");
        }
        info!(
            model = model.name(),
            bones = rig.bone_count(),
            faces = model.faces().len(),
            "Body model initialized"
        );
        Ok(Self {
            model,
            rig: Arc::new(rig),
        })
    }

    /// Run a loader and wrap its model.
    ///
    /// # Errors
    ///
    /// A loader failure becomes [`FitError::ModelUnavailable`].
    pub fn init<M, E, F>(loader: F) -> FitResult<Self>
    where
        M: BodyModel + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<M, E>,
    {
        let model = loader().map_err(|e| FitError::model_unavailable(e.to_string()))?;
        Self::new(model)
    }

    pub fn model(&self) -> &dyn BodyModel {
        self.model.as_ref()
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    /// Release this handle. The model is dropped with its last handle.
    pub fn dispose(self) {
        debug!(
            model = self.model.name(),
            remaining = Arc::strong_count(&self.model) - 1,
            "Body model handle disposed"
        );
    }
}

type Loader = Box<dyn Fn() -> FitResult<ModelHandle> + Send + Sync>;

/// A model initialized on first use, at most once.
pub struct LazyModel {
    cell: OnceLock<ModelHandle>,
    init_lock: Mutex<()>,
    loader: Loader,
}

impl fmt::Debug for LazyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModel")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl LazyModel {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> FitResult<ModelHandle> + Send + Sync + 'static,
    {
        Self {
            cell: OnceLock::new(),
            init_lock: Mutex::new(()),
            loader: Box::new(loader),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The handle, loading it on first call.
    ///
    /// A failed load is not cached; the next call retries.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error.
    pub fn get(&self) -> FitResult<&ModelHandle> {
        if let Some(handle) = self.cell.get() {
            return Ok(handle);
        }
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| FitError::model_unavailable("model initialization panicked earlier"))?;
        if let Some(handle) = self.cell.get() {
            return Ok(handle);
        }
        let handle = (self.loader)()?;
        Ok(self.cell.get_or_init(|| handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_init_maps_loader_failure() {
        let err = ModelHandle::init(|| Err::<ProceduralBody, _>("weights file missing")).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ModelUnavailable);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_handle_is_shared() {
        let handle = ModelHandle::new(ProceduralBody::new()).unwrap();
        let clone = handle.clone();
        assert_eq!(clone.rig(), handle.rig());
        handle.dispose();
        assert!(!clone.model().faces().is_empty());
    }

    #[test]
    fn test_lazy_model_loads_once() {
        static LOADS: AtomicUsize = AtomicUsize::new(0);
        let lazy = Arc::new(LazyModel::new(|| {
            LOADS.fetch_add(1, Ordering::SeqCst);
            ModelHandle::new(ProceduralBody::new())
        }));
        assert!(!lazy.is_initialized());

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                std::thread::spawn(move || lazy.get().map(|h| h.rig().bone_count()))
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap().is_ok());
        }
        assert!(lazy.is_initialized());
        assert_eq!(LOADS.load(Ordering::SeqCst), 1);
    }
}

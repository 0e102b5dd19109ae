//! End-to-end tests for body-fit.
//!
//! These exercise the full pipeline from load -> fit -> measure -> classify,
//! using the procedural template as both the scan source and the model.

use approx::assert_relative_eq;
use body_fit::landmarks::keypoints::{mhr70, MHR70_LEN};
use body_fit::{
    diagnostics, io, BodyFitter, BodyModel, ErrorCode, FitInput, FitParams, Gender, Joint,
    JointStrategy, LazyModel, Mesh, ModelHandle, Phenotype, PhenotypeVector, ProceduralBody,
    UserHints,
};
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn handle() -> ModelHandle {
    ModelHandle::new(ProceduralBody::new()).unwrap()
}

fn scan(phenotypes: &PhenotypeVector) -> Mesh {
    ProceduralBody::new().rest_mesh(phenotypes)
}

/// Rotate a Z-up mesh into the Y-up frame reconstruction tools emit.
fn to_y_up(mesh: &Mesh) -> Mesh {
    let mut out = mesh.clone();
    for v in &mut out.vertices {
        let p = v.position;
        v.position = Point3::new(p.x, p.z, -p.y);
    }
    out
}

/// Raw MHR70 keypoints placed at the template's rest joints.
fn template_keypoints() -> Vec<Point3<f64>> {
    let handle = handle();
    let rotations = vec![Vector3::zeros(); handle.rig().bone_count()];
    let posed = handle
        .model()
        .posed(&PhenotypeVector::default(), &rotations)
        .unwrap();
    let joints = handle.rig().template_joints(&posed.bone_heads);

    let mut raw = vec![Point3::origin(); MHR70_LEN];
    let indices = [
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
    for (joint, index) in indices {
        if let Some(c) = joints.get(joint) {
            // Inverse of the keypoint canonicalization (x, y, z) -> (x, z, -y).
            raw[index] = Point3::new(c.x, -c.z, c.y);
        }
    }
    raw
}

#[test]
fn test_fit_from_ply_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.ply");
    to_y_up(&scan(&PhenotypeVector::default()))
        .save(&path)
        .unwrap();

    let loaded = Mesh::load(&path).unwrap();
    let hints = UserHints::new()
        .with_height_cm(170.0)
        .with_gender(Gender::Female);
    let result = BodyFitter::new(handle())
        .fit(&FitInput::new(&loaded).with_hints(hints))
        .unwrap();

    let m = result.measurement;
    assert_relative_eq!(m.height_cm, 170.0, epsilon = 0.5);
    assert!(m.bust_cm > 50.0 && m.bust_cm < 150.0, "bust {}", m.bust_cm);
    assert!(m.waist_cm > 40.0 && m.waist_cm < 150.0, "waist {}", m.waist_cm);
    assert!(m.hips_cm > 50.0 && m.hips_cm < 160.0, "hips {}", m.hips_cm);
    assert!(m.weight_kg > 0.0);
    assert!((0.0..=1.0).contains(&m.confidence));

    let classification = m.classify(3);
    assert!(classification.size_range.0 <= classification.size);
    assert!(classification.size <= classification.size_range.1);
    assert_eq!(classification.silhouettes.len(), 3);
}

#[test]
fn test_scan_units_do_not_change_measurements() {
    let fitter = BodyFitter::new(handle());
    let base = scan(&PhenotypeVector::default().with(Phenotype::Weight, 0.6));
    let hints = UserHints::new().with_height_cm(165.0);

    let reference = fitter
        .fit(&FitInput::new(&base).with_hints(hints))
        .unwrap()
        .measurement;

    for k in [0.5, 100.0, 1000.0] {
        let mut scaled = base.clone();
        scaled.scale(k);
        let m = fitter
            .fit(&FitInput::new(&scaled).with_hints(hints))
            .unwrap()
            .measurement;
        assert_relative_eq!(m.height_cm, reference.height_cm, epsilon = 0.5);
        assert_relative_eq!(m.waist_cm, reference.waist_cm, epsilon = 1.0);
        assert_relative_eq!(m.hips_cm, reference.hips_cm, epsilon = 1.0);
    }
}

#[test]
fn test_keypoint_strategy() {
    let keypoints = template_keypoints();
    let mesh = scan(&PhenotypeVector::default());
    let result = BodyFitter::new(handle())
        .fit(
            &FitInput::new(&mesh)
                .with_keypoints(&keypoints)
                .with_hints(UserHints::new().with_height_cm(175.0)),
        )
        .unwrap();
    assert_eq!(result.strategy, JointStrategy::Keypoints);
    assert!(result.fallbacks.is_empty());
    assert!(result.measurement.waist_cm.is_finite());
}

#[test]
fn test_keypoints_file_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("keypoints.json");
    std::fs::write(&path, "[[0.0, 1.0], [2.0]]").unwrap();
    let err = io::load_keypoints(&path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidKeypoints);

    let err = io::load_keypoints(&dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::IoRead);
}

#[test]
fn test_diagnostics_export() {
    let mesh = scan(&PhenotypeVector::default());
    let fitter = BodyFitter::with_params(handle(), FitParams::default().with_diagnostics(true));
    let result = fitter.fit(&FitInput::new(&mesh)).unwrap();

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("subject");
    let written = diagnostics::export(&prefix, result.diagnostics.as_ref().unwrap()).unwrap();

    // No keypoints: two joint sets with two files each, plus two surfaces.
    assert_eq!(written.len(), 6);
    let aligned = Mesh::load(dir.path().join("subject_aligned_template.ply")).unwrap();
    assert_eq!(aligned.vertex_count(), ProceduralBody::new().vertex_count());
    assert!(aligned.has_faces());
}

#[test]
fn test_params_from_toml_drive_the_fit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fit.toml");
    std::fs::write(&path, "[icp]\nmax_iterations = 3\n\n[phenotype]\nfitter_iterations = 1\n")
        .unwrap();
    let params = FitParams::from_toml_file(&path).unwrap();

    let mesh = scan(&PhenotypeVector::default());
    let result = BodyFitter::with_params(handle(), params)
        .fit(&FitInput::new(&mesh))
        .unwrap();
    assert!(result.icp.iterations <= 3);
    assert!(result.fitter_iterations <= 1);
}

#[test]
fn test_lazy_model_loads_once_across_threads() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let lazy = Arc::new(LazyModel::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ModelHandle::new(ProceduralBody::new())
    }));

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let lazy = Arc::clone(&lazy);
            std::thread::spawn(move || lazy.get().map(|h| h.rig().bone_count()).unwrap())
        })
        .collect();
    for t in threads {
        assert_eq!(t.join().unwrap(), 21);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(lazy.is_initialized());
}

#[test]
fn test_failed_model_load_is_reported() {
    let err = ModelHandle::init(|| Err::<ProceduralBody, _>("weights missing")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModelUnavailable);
}

#[test]
fn test_one_fitter_many_threads() {
    let fitter = Arc::new(BodyFitter::new(handle()));
    let mesh = Arc::new(scan(&PhenotypeVector::default()));
    let threads: Vec<_> = (0..2)
        .map(|_| {
            let fitter = Arc::clone(&fitter);
            let mesh = Arc::clone(&mesh);
            std::thread::spawn(move || {
                fitter
                    .fit(&FitInput::new(&mesh).with_hints(UserHints::new().with_height_cm(180.0)))
                    .unwrap()
                    .measurement
            })
        })
        .collect();
    let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(results[0], results[1]);
}

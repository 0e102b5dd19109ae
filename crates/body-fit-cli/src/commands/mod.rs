//! One module per subcommand.

pub mod batch;
pub mod classify;
pub mod config;
pub mod fit;
pub mod info;
pub mod joints;
pub mod size_chart;

use std::path::Path;

use anyhow::{Context, Result};
use body_fit::{FitParams, UserHints};

use crate::HintArgs;

/// Load fit parameters from `--config`, or defaults.
pub fn load_params(config: Option<&Path>) -> Result<FitParams> {
    match config {
        Some(path) => FitParams::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(FitParams::default()),
    }
}

impl HintArgs {
    pub fn to_hints(&self) -> UserHints {
        let mut hints = UserHints::new();
        if let Some(cm) = self.height_cm {
            hints = hints.with_height_cm(cm);
        }
        if let Some(gender) = self.gender {
            hints = hints.with_gender(gender.into());
        }
        if let Some(kg) = self.weight_kg {
            hints = hints.with_weight_kg(kg);
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenderArg;
    use body_fit::Gender;

    #[test]
    fn test_hints_from_args() {
        let args = HintArgs {
            height_cm: Some(172.0),
            gender: Some(GenderArg::Male),
            weight_kg: None,
        };
        let hints = args.to_hints();
        assert_eq!(hints.height_cm, Some(172.0));
        assert_eq!(hints.gender, Some(Gender::Male));
        assert_eq!(hints.weight_kg, None);
    }

    #[test]
    fn test_load_params() {
        assert_eq!(load_params(None).unwrap(), FitParams::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.toml");
        std::fs::write(&path, "collect_diagnostics = true\n").unwrap();
        assert!(load_params(Some(&path)).unwrap().collect_diagnostics);

        let missing = dir.path().join("missing.toml");
        let err = load_params(Some(&missing)).unwrap_err();
        assert!(err.downcast_ref::<body_fit::FitError>().is_some());
    }
}

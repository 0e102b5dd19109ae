//! TOML load and save for [`FitParams`].
//!
//! Every section and field is optional; missing values take their defaults.
//!
//! ```
//! use body_fit::FitParams;
//!
//! let params = FitParams::from_toml_str("[icp]\nmax_iterations = 20\n").unwrap();
//! assert_eq!(params.icp.max_iterations, 20);
//! assert_eq!(params.pose, Default::default());
//! ```

use std::path::Path;

use crate::error::{FitError, FitResult};
use crate::fitting::FitParams;

impl FitParams {
    /// Parse parameters from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidConfig`] when the TOML is malformed or a
    /// value does not fit its field.
    pub fn from_toml_str(toml_str: &str) -> FitResult<Self> {
        let params: FitParams =
            toml::from_str(toml_str).map_err(|e| FitError::invalid_config(e.to_string()))?;
        params.check()?;
        Ok(params)
    }

    /// Load parameters from a TOML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not parse.
    pub fn from_toml_file(path: impl AsRef<Path>) -> FitResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| FitError::io_read(path, e))?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to pretty TOML.
    ///
    /// # Errors
    ///
    /// Fails only if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> FitResult<String> {
        toml::to_string_pretty(self).map_err(|e| FitError::invalid_config(e.to_string()))
    }

    /// Save to a TOML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn save_toml(&self, path: impl AsRef<Path>) -> FitResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?).map_err(|e| FitError::io_write(path, e))
    }

    /// Reject values the pipeline cannot run with.
    fn check(&self) -> FitResult<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(FitError::invalid_config(format!("{name} must be in [0, 1], got {value}")))
            }
        };
        unit("pose.leg_twist_damping", self.pose.leg_twist_damping)?;
        unit("pose.leg_abduction_damping", self.pose.leg_abduction_damping)?;
        unit("icp.rotation_damping", self.icp.rotation_damping)?;
        unit("confidence.missing_height", self.confidence.missing_height)?;
        unit("confidence.pelvis_fallback", self.confidence.pelvis_fallback)?;
        unit("confidence.skipped_chain", self.confidence.skipped_chain)?;
        unit("confidence.floor", self.confidence.floor)?;
        unit("phenotype.initial_age", self.phenotype.initial_age)?;
        if self.icp.max_iterations == 0 {
            return Err(FitError::invalid_config("icp.max_iterations must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_defaults_round_trip() {
        let text = FitParams::default().to_toml_string().unwrap();
        assert!(text.contains("[correction]"));
        assert!(text.contains("rotate_x_degrees = -3.0"));
        assert_eq!(FitParams::from_toml_str(&text).unwrap(), FitParams::default());
    }

    #[test]
    fn test_partial_sections() {
        let params = FitParams::from_toml_str(
            "collect_diagnostics = true\n[phenotype]\nfitter_iterations = 9\n[phenotype.regularization]\nweight = 2.0\n",
        )
        .unwrap();
        assert!(params.collect_diagnostics);
        assert_eq!(params.phenotype.fitter_iterations, 9);
        assert_eq!(params.phenotype.regularization.weight, 2.0);
        assert_eq!(params.phenotype.regularization.gender, 100.0);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = FitParams::from_toml_str("[pose]\nleg_twist_damping = 1.5\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
        assert!(FitParams::from_toml_str("[icp]\nmax_iterations = 0\n").is_err());
        assert!(FitParams::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        let params = FitParams::default().with_diagnostics(true);
        params.save_toml(file.path()).unwrap();
        assert_eq!(FitParams::from_toml_file(file.path()).unwrap(), params);
    }
}

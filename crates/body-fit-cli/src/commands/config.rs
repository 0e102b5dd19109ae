//! bodyfit config command - print or write the default fit parameters.

use std::path::Path;

use anyhow::{Context, Result};
use body_fit::FitParams;

use crate::{output, Cli};

pub fn run(output_path: Option<&Path>, cli: &Cli) -> Result<()> {
    let params = FitParams::default();
    match output_path {
        Some(path) => {
            params
                .save_toml(path)
                .with_context(|| format!("Failed to write config to {:?}", path))?;
            output::success(
                &format!("Default parameters written to {}", path.display()),
                cli.format,
                cli.quiet,
            );
        }
        None => {
            if !cli.quiet {
                print!("{}", params.to_toml_string()?);
            }
        }
    }
    Ok(())
}

//! bodyfit batch command - fit many meshes in parallel.
//!
//! All workers share one model handle; each fit owns its buffers.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use body_fit::{BodyFitter, FitInput, Mesh, ModelHandle, ProceduralBody, UserHints};
use colored::Colorize;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::fit::FitReport;
use crate::{output, Cli, OutputFormat};

const SILHOUETTES: usize = 3;

#[derive(Serialize)]
struct BatchResult {
    succeeded: usize,
    failed: usize,
    elapsed_seconds: f64,
    results: Vec<FitReport>,
    errors: Vec<BatchError>,
}

#[derive(Serialize)]
struct BatchError {
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    message: String,
}

fn fit_one(fitter: &BodyFitter, input: &Path, hints: UserHints) -> Result<FitReport> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let result = fitter.fit(&FitInput::new(&mesh).with_hints(hints))?;
    debug!(
        input = %input.display(),
        confidence = result.confidence(),
        "Batch fit finished"
    );
    Ok(FitReport::new(input, &result, SILHOUETTES))
}

pub fn run(
    inputs: &[PathBuf],
    hints: UserHints,
    config: Option<&Path>,
    jobs: Option<usize>,
    cli: &Cli,
) -> Result<()> {
    let params = super::load_params(config)?;
    let fitter = BodyFitter::with_params(ModelHandle::new(ProceduralBody::new())?, params);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
        .context("Failed to start worker pool")?;

    output::info(
        &format!(
            "Fitting {} meshes on {} threads...",
            inputs.len(),
            pool.current_num_threads()
        ),
        cli.format,
        cli.quiet,
    );

    let start = Instant::now();
    let outcomes: Vec<(PathBuf, Result<FitReport>)> = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| (input.clone(), fit_one(&fitter, input, hints)))
            .collect()
    });
    let elapsed = start.elapsed().as_secs_f64();

    let mut results = Vec::new();
    let mut errors = Vec::new();
    for (input, outcome) in outcomes {
        match outcome {
            Ok(report) => results.push(report),
            Err(e) => errors.push(BatchError {
                input: input.display().to_string(),
                code: e
                    .downcast_ref::<body_fit::FitError>()
                    .map(|fit_err| fit_err.code().to_string()),
                message: format!("{e:#}"),
            }),
        }
    }

    let batch = BatchResult {
        succeeded: results.len(),
        failed: errors.len(),
        elapsed_seconds: elapsed,
        results,
        errors,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&batch, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                for report in &batch.results {
                    report.print_text();
                    println!();
                }
                for error in &batch.errors {
                    eprintln!("{}: {}: {}", "Failed".red().bold(), error.input, error.message);
                }
                output::success(
                    &format!(
                        "{} fitted, {} failed in {:.1}s",
                        batch.succeeded, batch.failed, batch.elapsed_seconds
                    ),
                    cli.format,
                    cli.quiet,
                );
            }
        }
    }

    if batch.succeeded == 0 {
        bail!("All {} fits failed", batch.failed);
    }
    Ok(())
}

//! bodyfit fit command - fit the template and report measurements.

use std::path::Path;

use anyhow::{Context, Result};
use body_fit::{
    diagnostics, io, BodyFitter, Classification, FitInput, FittingResult, IcpSummary, Inches,
    JointStrategy, Measurement, Mesh, ModelHandle, PelvisSource, ProceduralBody, UserHints,
};
use colored::Colorize;
use serde::Serialize;

use crate::{output, Cli, OutputFormat};

/// One fit, as printed by `fit` and `batch`.
#[derive(Serialize)]
pub struct FitReport {
    pub input: String,
    pub measurement: Measurement,
    pub inches: Inches,
    pub classification: Classification,
    pub phenotypes: Vec<PhenotypeEntry>,
    pub strategy: JointStrategy,
    pub pelvis_source: PelvisSource,
    pub skipped_chains: Vec<&'static str>,
    pub fallbacks: Vec<&'static str>,
    pub mean_vertex_error_mm: f64,
    pub fitter_iterations: usize,
    pub icp: IcpSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

#[derive(Serialize)]
pub struct PhenotypeEntry {
    pub name: &'static str,
    pub value: f64,
}

impl FitReport {
    pub fn new(input: &Path, result: &FittingResult, silhouettes: usize) -> Self {
        Self {
            input: input.display().to_string(),
            measurement: result.measurement,
            inches: result.measurement.to_inches(),
            classification: result.measurement.classify(silhouettes),
            phenotypes: result
                .phenotypes
                .iter()
                .map(|(p, value)| PhenotypeEntry {
                    name: p.name(),
                    value,
                })
                .collect(),
            strategy: result.strategy,
            pelvis_source: result.pelvis_source,
            skipped_chains: result.skipped_chains.clone(),
            fallbacks: result.fallbacks.clone(),
            mean_vertex_error_mm: result.mean_vertex_error * 1000.0,
            fitter_iterations: result.fitter_iterations,
            icp: result.icp,
            diagnostics: Vec::new(),
        }
    }

    /// Human-readable block for text output.
    pub fn print_text(&self) {
        let m = &self.measurement;
        println!("{}", "Measurements".bold().underline());
        println!("  {}: {}", "File".cyan(), self.input);
        println!(
            "  {}: {:.1} cm ({:.1} in)",
            "Height".cyan(),
            m.height_cm,
            self.inches.height
        );
        println!(
            "  {}: {:.1} cm ({:.1} in)",
            "Bust".cyan(),
            m.bust_cm,
            self.inches.bust
        );
        println!(
            "  {}: {:.1} cm ({:.1} in)",
            "Waist".cyan(),
            m.waist_cm,
            self.inches.waist
        );
        println!(
            "  {}: {:.1} cm ({:.1} in)",
            "Hips".cyan(),
            m.hips_cm,
            self.inches.hips
        );
        println!("  {}: {:.1} kg", "Weight".cyan(), m.weight_kg);
        println!("  {}: {:.1}", "BMI".cyan(), m.bmi);

        let confidence = format!("{:.0}%", m.confidence * 100.0);
        let confidence = if m.confidence >= 0.8 {
            confidence.green()
        } else if m.confidence >= 0.5 {
            confidence.yellow()
        } else {
            confidence.red()
        };
        println!("  {}: {}", "Confidence".cyan(), confidence);

        let c = &self.classification;
        println!(
            "  {}: {} (size {}, range {}-{})",
            "Body type".cyan(),
            c.body_type,
            c.size,
            c.size_range.0,
            c.size_range.1
        );
        for rec in &c.silhouettes {
            println!("    {} {:.2}  {}", rec.silhouette.name().bold(), rec.score, rec.reason);
        }

        let phenotypes: Vec<String> = self
            .phenotypes
            .iter()
            .map(|p| format!("{} {:.2}", p.name, p.value))
            .collect();
        println!("  {}: {}", "Phenotypes".cyan(), phenotypes.join(", "));
        println!(
            "  {}: {:?} joints, pelvis {:?}, {} ICP iterations, {:.1} mm mean error",
            "Fit".cyan(),
            self.strategy,
            self.pelvis_source,
            self.icp.iterations,
            self.mean_vertex_error_mm
        );
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: &Path,
    keypoints_path: Option<&Path>,
    hints: UserHints,
    config: Option<&Path>,
    debug_prefix: Option<&Path>,
    silhouettes: usize,
    cli: &Cli,
) -> Result<()> {
    let mut params = super::load_params(config)?;
    if debug_prefix.is_some() {
        params = params.with_diagnostics(true);
    }

    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let keypoints = keypoints_path
        .map(|path| {
            io::load_keypoints(path)
                .with_context(|| format!("Failed to load keypoints from {:?}", path))
        })
        .transpose()?;

    let handle = ModelHandle::new(ProceduralBody::new())?;
    let fitter = BodyFitter::with_params(handle, params);

    output::info(
        &format!("Fitting {} ({} vertices)...", input.display(), mesh.vertex_count()),
        cli.format,
        cli.quiet,
    );
    let mut fit_input = FitInput::new(&mesh).with_hints(hints);
    if let Some(keypoints) = &keypoints {
        fit_input = fit_input.with_keypoints(keypoints);
    }
    let result = fitter
        .fit(&fit_input)
        .with_context(|| format!("Fit failed for {:?}", input))?;

    let mut report = FitReport::new(input, &result, silhouettes);
    if let (Some(prefix), Some(diag)) = (debug_prefix, &result.diagnostics) {
        let written = diagnostics::export(prefix, diag)
            .with_context(|| format!("Failed to write diagnostics to {:?}", prefix))?;
        report.diagnostics = written.iter().map(|p| p.display().to_string()).collect();
    }

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                report.print_text();
                if hints.height_cm.is_none() {
                    output::warning(
                        "No --height-cm given; lengths are in model units",
                        cli.format,
                        cli.quiet,
                    );
                }
                for path in &report.diagnostics {
                    output::success(&format!("Wrote {path}"), cli.format, cli.quiet);
                }
            }
        }
    }

    Ok(())
}

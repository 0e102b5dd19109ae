//! bodyfit classify command - body type and dress size from measurements.

use anyhow::{ensure, Result};
use body_fit::classify::classify as classify_inches;
use body_fit::measure::CM_PER_INCH;
use body_fit::Classification;
use colored::Colorize;
use serde::Serialize;

use crate::{output, Cli, OutputFormat, Unit};

#[derive(Serialize)]
struct ClassifyResult {
    bust_in: f64,
    waist_in: f64,
    hips_in: f64,
    #[serde(flatten)]
    classification: Classification,
    description: &'static str,
}

pub fn run(
    bust: f64,
    waist: f64,
    hips: f64,
    unit: Unit,
    silhouettes: usize,
    cli: &Cli,
) -> Result<()> {
    ensure!(
        [bust, waist, hips].iter().all(|v| v.is_finite() && *v > 0.0),
        "Measurements must be positive, got bust {bust}, waist {waist}, hips {hips}"
    );

    let to_in = |v: f64| if unit == Unit::Cm { v / CM_PER_INCH } else { v };
    let (bust, waist, hips) = (to_in(bust), to_in(waist), to_in(hips));
    let classification = classify_inches(bust, waist, hips, silhouettes);

    let result = ClassifyResult {
        bust_in: bust,
        waist_in: waist,
        hips_in: hips,
        description: classification.body_type.description(),
        classification,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                let c = &result.classification;
                println!("{}", "Classification".bold().underline());
                println!(
                    "  {}: {:.1} / {:.1} / {:.1} in",
                    "Bust / waist / hips".cyan(),
                    result.bust_in,
                    result.waist_in,
                    result.hips_in
                );
                println!("  {}: {}", "Body type".cyan(), c.body_type.name().bold());
                println!("  {}", result.description);
                println!(
                    "  {}: {} (range {}-{})",
                    "Dress size".cyan(),
                    c.size,
                    c.size_range.0,
                    c.size_range.1
                );
                for rec in &c.silhouettes {
                    println!(
                        "    {} {:.2}  {}",
                        rec.silhouette.name().bold(),
                        rec.score,
                        rec.reason
                    );
                }
            }
        }
    }

    Ok(())
}

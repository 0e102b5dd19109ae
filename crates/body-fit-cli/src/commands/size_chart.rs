//! bodyfit size-chart command - print the dress size chart.

use anyhow::Result;
use body_fit::classify::SIZE_CHART;
use colored::Colorize;

use crate::{output, Cli, OutputFormat};

pub fn run(cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Json => {
            output::print(&SIZE_CHART, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "US bridal size chart (inches)".bold().underline());
                println!(
                    "  {:>4}  {:>6}  {:>6}  {:>6}",
                    "Size".cyan(),
                    "Bust".cyan(),
                    "Waist".cyan(),
                    "Hips".cyan()
                );
                for row in &SIZE_CHART {
                    println!(
                        "  {:>4}  {:>6.1}  {:>6.1}  {:>6.1}",
                        row.size, row.bust, row.waist, row.hips
                    );
                }
            }
        }
    }
    Ok(())
}

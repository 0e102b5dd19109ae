//! bodyfit joints command - normalize a mesh and extract its joints.

use std::path::Path;

use anyhow::{Context, Result};
use body_fit::landmarks::{self, GeometricParams, JointStrategy};
use body_fit::orientation::{self, OrientationParams, PelvisSource};
use body_fit::{diagnostics, io, Joint, Mesh};
use colored::Colorize;
use serde::Serialize;

use crate::{output, Cli, OutputFormat};

#[derive(Serialize)]
struct JointsResult {
    input: String,
    strategy: JointStrategy,
    pelvis_source: PelvisSource,
    height: f64,
    /// Pelvis-centered, Z-up, in file units.
    joints: Vec<JointEntry>,
    missing: Vec<&'static str>,
    fallbacks: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exported: Vec<String>,
}

#[derive(Serialize)]
struct JointEntry {
    name: &'static str,
    position: [f64; 3],
}

pub fn run(
    input: &Path,
    keypoints_path: Option<&Path>,
    export: Option<&Path>,
    cli: &Cli,
) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let keypoints = keypoints_path
        .map(|path| {
            io::load_keypoints(path)
                .with_context(|| format!("Failed to load keypoints from {:?}", path))
        })
        .transpose()?;

    let normalized = orientation::normalize(&mesh, &OrientationParams::default())?;
    let extraction = landmarks::extract_joints(
        &normalized.mesh,
        keypoints.as_deref(),
        &GeometricParams::default(),
    )?;

    let mut exported = Vec::new();
    if let Some(prefix) = export {
        let written = diagnostics::export_joints(prefix, "joints", &extraction.joints)
            .with_context(|| format!("Failed to export joints to {:?}", prefix))?;
        exported.extend(written.iter().map(|p| p.display().to_string()));
    }

    let result = JointsResult {
        input: input.display().to_string(),
        strategy: extraction.strategy,
        pelvis_source: normalized.pelvis_source,
        height: normalized.height,
        joints: extraction
            .joints
            .iter()
            .map(|(joint, p)| JointEntry {
                name: joint.name(),
                position: [p.x, p.y, p.z],
            })
            .collect(),
        missing: Joint::ALL
            .iter()
            .filter(|&&j| extraction.joints.get(j).is_none())
            .map(|j| j.name())
            .collect(),
        fallbacks: extraction.fallbacks.clone(),
        exported,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!(
                    "{} ({:?}, {} of {})",
                    "Joints".bold().underline(),
                    result.strategy,
                    result.joints.len(),
                    Joint::COUNT
                );
                for entry in &result.joints {
                    println!(
                        "  {:>10}: ({:+.3}, {:+.3}, {:+.3})",
                        entry.name.cyan(),
                        entry.position[0],
                        entry.position[1],
                        entry.position[2]
                    );
                }
                if !result.missing.is_empty() {
                    output::warning(
                        &format!("Missing joints: {}", result.missing.join(", ")),
                        cli.format,
                        cli.quiet,
                    );
                }
                if !result.fallbacks.is_empty() {
                    output::warning(
                        &format!("Placed by fallback: {}", result.fallbacks.join(", ")),
                        cli.format,
                        cli.quiet,
                    );
                }
                for path in &result.exported {
                    output::success(&format!("Wrote {path}"), cli.format, cli.quiet);
                }
            }
        }
    }

    Ok(())
}

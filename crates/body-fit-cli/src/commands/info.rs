//! bodyfit info command - display mesh statistics.

use std::path::Path;

use anyhow::{Context, Result};
use body_fit::landmarks::skeletal;
use body_fit::orientation::{self, OrientationParams};
use body_fit::Mesh;
use colored::Colorize;
use serde::Serialize;

use crate::{output, Cli, OutputFormat};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    closed: bool,
    has_colors: bool,
    up_axis: String,
    /// Vertical extent after normalization, in file units.
    height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    pelvis_source: orientation::PelvisSource,
    trunk: TrunkInfo,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

/// Section perimeters at fixed height fractions, in file units.
#[derive(Serialize)]
struct TrunkInfo {
    bust: Option<f64>,
    waist: Option<f64>,
    hips: Option<f64>,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let normalized = orientation::normalize(&mesh, &OrientationParams::default())?;
    let summary = skeletal::measure(&normalized.mesh);

    let bounds = mesh.bounds().map(|(min, max)| {
        let dims = max - min;
        BoundsInfo {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    });

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        closed: mesh.has_faces() && mesh.is_closed(),
        has_colors: mesh.vertices.iter().any(|v| v.color.is_some()),
        up_axis: normalized.source_up.to_string(),
        height: normalized.height,
        bounds,
        volume: summary.volume,
        pelvis_source: normalized.pelvis_source,
        trunk: TrunkInfo {
            bust: summary.circumferences.bust,
            waist: summary.circumferences.waist,
            hips: summary.circumferences.hips,
        },
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Vertices".cyan(), info.vertices);
                println!("  {}: {}", "Faces".cyan(), info.faces);
                println!(
                    "  {}: {}",
                    "Closed".cyan(),
                    if info.closed { "yes" } else { "no" }
                );
                println!("  {}: {}", "Up axis".cyan(), info.up_axis);
                println!("  {}: {:.3}", "Height".cyan(), info.height);

                if let Some(ref b) = info.bounds {
                    println!(
                        "  {}: {:.3} x {:.3} x {:.3}",
                        "Dimensions".cyan(),
                        b.dimensions[0],
                        b.dimensions[1],
                        b.dimensions[2]
                    );
                }
                if let Some(volume) = info.volume {
                    println!("  {}: {:.4}", "Volume".cyan(), volume);
                }
                println!("  {}: {:?}", "Pelvis anchor".cyan(), info.pelvis_source);

                let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
                println!(
                    "  {}: bust {}, waist {}, hips {}",
                    "Trunk sections".cyan(),
                    fmt(info.trunk.bust),
                    fmt(info.trunk.waist),
                    fmt(info.trunk.hips)
                );
                if !mesh.has_faces() {
                    output::warning(
                        "Point cloud input; measurements will use its convex hull",
                        cli.format,
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}

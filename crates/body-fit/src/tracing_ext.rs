//! Tracing extensions for the fitting pipeline.
//!
//! Each pipeline phase runs under an [`OperationTimer`], which opens a span
//! and logs the phase duration when dropped. Helper functions log mesh state,
//! fallbacks, and file I/O with consistent targets so they can be filtered
//! independently:
//!
//! | Target | Content |
//! |---|---|
//! | `body_fit::timing` | phase start and duration |
//! | `body_fit::mesh_state` | vertex/face counts and dimensions |
//! | `body_fit::fallback` | degraded extraction, lowers confidence |
//! | `body_fit::io` | loads and saves |
//!
//! # Usage
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // Set RUST_LOG=body_fit=debug for per-phase detail
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: Fallbacks (pelvis anchor, skipped pose chains, missing height)
//! - **INFO**: Phase summaries, timing
//! - **DEBUG**: Intermediate state (joint counts, ICP iterations)
//! - **TRACE**: Per-level slice scans

use std::time::Instant;
use tracing::{Span, debug, info, warn};

/// A performance timer that logs duration on drop.
///
/// # Example
///
/// ```rust,ignore
/// use body_fit::tracing_ext::OperationTimer;
///
/// fn solve() {
///     let _timer = OperationTimer::new("pose_solve");
///     // ... do work ...
/// } // Timer logs duration when dropped
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("fit_phase", operation = name);
        debug!(target: "body_fit::timing", operation = name, "Starting phase");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that records the size of the mesh being processed.
    pub fn with_context(name: &'static str, vertex_count: usize, face_count: usize) -> Self {
        let span = tracing::info_span!(
            "fit_phase",
            operation = name,
            vertices = vertex_count,
            faces = face_count
        );
        debug!(
            target: "body_fit::timing",
            operation = name,
            vertices = vertex_count,
            faces = face_count,
            "Starting phase"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "body_fit::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Phase completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &crate::Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "body_fit::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        up_axis = %mesh.up_axis,
        dimensions = format!("{:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log a graceful-degradation event.
pub fn log_fallback(stage: &'static str, reason: &str) {
    warn!(
        target: "body_fit::fallback",
        stage = stage,
        reason = reason,
        "Falling back"
    );
}

/// Log a file I/O operation.
pub fn log_io_operation(operation: &str, path: &std::path::Path, success: bool) {
    if success {
        info!(
            target: "body_fit::io",
            operation = operation,
            path = path.display().to_string(),
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "body_fit::io",
            operation = operation,
            path = path.display().to_string(),
            "I/O operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mesh;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_phase");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_helpers_accept_empty_mesh() {
        let mesh = Mesh::new();
        log_mesh_stats(&mesh, "test");
        log_fallback("pelvis", "no loop");
        log_io_operation("load", std::path::Path::new("missing.ply"), false);
    }
}

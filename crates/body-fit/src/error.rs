//! Error types for body fitting with rich diagnostics.
//!
//! Errors carry:
//! - Machine-readable error codes for programmatic handling
//! - Context (which vertex, which face, which bone)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `FIT-XXXX`:
//! - `FIT-1xxx`: I/O errors (file reading, writing, parsing)
//! - `FIT-2xxx`: Input validation errors (empty mesh, bad coordinates, bad keypoints)
//! - `FIT-3xxx`: Body-model service errors (unavailable, query or fitter failure)
//! - `FIT-4xxx`: Format and configuration errors
//!
//! Only structurally invalid input and a missing body model are errors.
//! Geometric extraction problems (no loop at a height, missing joints) never
//! surface here; they degrade the result and lower its confidence instead.
//!
//! # Example
//!
//! ```rust
//! use body_fit::{ErrorCode, FitError};
//!
//! let err = FitError::empty_mesh("mesh has no vertices");
//! assert_eq!(err.code(), ErrorCode::EmptyMesh);
//! assert_eq!(err.code().as_str(), "FIT-2001");
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fitting operations.
pub type FitResult<T> = Result<T, FitError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// FIT-1001: Failed to read file
    IoRead = 1001,
    /// FIT-1002: Failed to write file
    IoWrite = 1002,
    /// FIT-1003: Failed to parse file contents
    ParseError = 1003,

    // Validation errors (2xxx)
    /// FIT-2001: Mesh has no vertices
    EmptyMesh = 2001,
    /// FIT-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// FIT-2003: Face references a vertex that does not exist
    InvalidVertexIndex = 2003,
    /// FIT-2004: Keypoint list is malformed
    InvalidKeypoints = 2004,

    // Body-model errors (3xxx)
    /// FIT-3001: Body model could not be created
    ModelUnavailable = 3001,
    /// FIT-3002: Body model query failed
    ModelQuery = 3002,
    /// FIT-3003: Body model fitter failed
    FitterFailed = 3003,

    // Format errors (4xxx)
    /// FIT-4001: Unsupported file format
    UnsupportedFormat = 4001,
    /// FIT-4002: Invalid configuration
    InvalidConfig = 4002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `FIT-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "FIT-1001",
            ErrorCode::IoWrite => "FIT-1002",
            ErrorCode::ParseError => "FIT-1003",
            ErrorCode::EmptyMesh => "FIT-2001",
            ErrorCode::InvalidCoordinate => "FIT-2002",
            ErrorCode::InvalidVertexIndex => "FIT-2003",
            ErrorCode::InvalidKeypoints => "FIT-2004",
            ErrorCode::ModelUnavailable => "FIT-3001",
            ErrorCode::ModelQuery => "FIT-3002",
            ErrorCode::FitterFailed => "FIT-3003",
            ErrorCode::UnsupportedFormat => "FIT-4001",
            ErrorCode::InvalidConfig => "FIT-4002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for fitting errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-export the mesh from the reconstruction tool.
    ReexportMesh { format: Option<String> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Check the input for specific problems.
    CheckInput { checks: Vec<String> },
    /// Adjust configuration values.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Check that the body model is installed and loadable.
    CheckModel { description: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportMesh { format } => match format {
                Some(fmt) => write!(f, "Try re-exporting the body mesh as {}", fmt),
                None => write!(f, "Try re-exporting the body mesh"),
            },
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::CheckModel { description } => write!(f, "{}", description),
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Where in the input an error was detected.
#[derive(Debug, Clone)]
pub enum InputLocation {
    /// A specific vertex.
    Vertex { index: usize },
    /// A specific face.
    Face { index: usize },
    /// A specific keypoint.
    Keypoint { index: usize },
    /// A file.
    File { path: PathBuf },
}

impl std::fmt::Display for InputLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputLocation::Vertex { index } => write!(f, "vertex {}", index),
            InputLocation::Face { index } => write!(f, "face {}", index),
            InputLocation::Keypoint { index } => write!(f, "keypoint {}", index),
            InputLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur while fitting a body.
#[derive(Debug, Error, Diagnostic)]
pub enum FitError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(body_fit::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(body_fit::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing file contents.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(body_fit::parse::error),
        help("The file may be corrupted or in an unsupported variant. Try re-exporting it.")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported mesh format: {extension:?}")]
    #[diagnostic(code(body_fit::format::unsupported), help("Supported formats: PLY, OBJ, STL"))]
    UnsupportedFormat { extension: Option<String> },

    /// Mesh has no usable geometry.
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(body_fit::validation::empty),
        help("The body mesh must contain vertices. Check the reconstruction output.")
    )]
    EmptyMesh { details: String },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(body_fit::validation::coordinate),
        help("The reconstruction produced non-finite values. Re-run it or drop the vertex.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// Face references a vertex that does not exist.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(body_fit::validation::vertex_index),
        help("Check the mesh export settings; faces must index into the vertex list")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Keypoint list is malformed.
    #[error("invalid keypoints: {details}")]
    #[diagnostic(
        code(body_fit::validation::keypoints),
        help("Keypoints must be a JSON array of [x, y, z] triples in MHR70 order")
    )]
    InvalidKeypoints { details: String },

    /// The body model could not be created.
    #[error("body model unavailable: {details}")]
    #[diagnostic(
        code(body_fit::model::unavailable),
        help("The template model must be constructed before fitting")
    )]
    ModelUnavailable { details: String },

    /// A body-model query returned inconsistent data.
    #[error("body model query '{query}' failed: {details}")]
    #[diagnostic(code(body_fit::model::query))]
    ModelQuery { query: &'static str, details: String },

    /// The body-model fitter failed.
    #[error("body model fitter failed: {details}")]
    #[diagnostic(
        code(body_fit::model::fitter),
        help("Try fewer frozen phenotypes or a larger iteration cap")
    )]
    FitterFailed { details: String },

    /// Invalid configuration.
    #[error("invalid configuration: {details}")]
    #[diagnostic(code(body_fit::config::invalid))]
    InvalidConfig { details: String },
}

impl FitError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FitError::IoRead { .. } => ErrorCode::IoRead,
            FitError::IoWrite { .. } => ErrorCode::IoWrite,
            FitError::ParseError { .. } => ErrorCode::ParseError,
            FitError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            FitError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            FitError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            FitError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            FitError::InvalidKeypoints { .. } => ErrorCode::InvalidKeypoints,
            FitError::ModelUnavailable { .. } => ErrorCode::ModelUnavailable,
            FitError::ModelQuery { .. } => ErrorCode::ModelQuery,
            FitError::FitterFailed { .. } => ErrorCode::FitterFailed,
            FitError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            FitError::IoRead { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            FitError::IoWrite { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            FitError::ParseError { .. } => RecoverySuggestion::ReexportMesh {
                format: Some("binary PLY".into()),
            },
            FitError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["PLY".into(), "OBJ".into(), "STL".into()],
            },
            FitError::EmptyMesh { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["mesh has vertices".into(), "correct export settings".into()],
            },
            FitError::InvalidCoordinate { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["coordinate values".into(), "export precision".into()],
            },
            FitError::InvalidVertexIndex { .. } => RecoverySuggestion::ReexportMesh { format: None },
            FitError::InvalidKeypoints { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["keypoint count".into(), "triples of finite numbers".into()],
            },
            FitError::ModelUnavailable { .. } => RecoverySuggestion::CheckModel {
                description: "Construct the body model before creating the fitter".into(),
            },
            FitError::ModelQuery { .. } => RecoverySuggestion::CheckModel {
                description: "The body model returned inconsistent data; check its version".into(),
            },
            FitError::FitterFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("fitter_iterations".into(), "try a larger value".into())],
            },
            FitError::InvalidConfig { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("config".into(), "compare with `bodyfit config`".into())],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<InputLocation> {
        match self {
            FitError::InvalidCoordinate { vertex_index, .. } => Some(InputLocation::Vertex {
                index: *vertex_index,
            }),
            FitError::InvalidVertexIndex { face_index, .. } => Some(InputLocation::Face {
                index: *face_index,
            }),
            FitError::IoRead { path, .. }
            | FitError::IoWrite { path, .. }
            | FitError::ParseError { path, .. } => Some(InputLocation::File { path: path.clone() }),
            _ => None,
        }
    }

    /// Returns true if this error aborts a fit rather than degrading it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FitError::IoWrite { .. })
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        FitError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        FitError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        FitError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        FitError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an InvalidKeypoints error.
    pub fn invalid_keypoints(details: impl Into<String>) -> Self {
        FitError::InvalidKeypoints {
            details: details.into(),
        }
    }

    /// Create a ModelUnavailable error.
    pub fn model_unavailable(details: impl Into<String>) -> Self {
        FitError::ModelUnavailable {
            details: details.into(),
        }
    }

    /// Create a ModelQuery error.
    pub fn model_query(query: &'static str, details: impl Into<String>) -> Self {
        FitError::ModelQuery {
            query,
            details: details.into(),
        }
    }

    /// Create a FitterFailed error.
    pub fn fitter_failed(details: impl Into<String>) -> Self {
        FitError::FitterFailed {
            details: details.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        FitError::InvalidConfig {
            details: details.into(),
        }
    }
}

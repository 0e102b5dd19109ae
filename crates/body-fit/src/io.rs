//! Mesh and keypoint file I/O.
//!
//! Meshes load from PLY (ASCII or binary), OBJ and STL and save as PLY.
//! A vertex-only PLY loads as a point cloud; the pipeline then projects onto
//! its convex hull. Keypoints load from a JSON array of `[x, y, z]` triples.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::error::{FitError, FitResult};
use crate::tracing_ext::log_io_operation;
use crate::{Mesh, Vertex, VertexColor};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Ply,
    Obj,
    Stl,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "ply" => Some(MeshFormat::Ply),
                "obj" => Some(MeshFormat::Obj),
                "stl" => Some(MeshFormat::Stl),
                _ => None,
            })
    }
}

/// PLY body encoding for [`save_ply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlyEncoding {
    #[default]
    Ascii,
    BinaryLittleEndian,
}

/// Load a mesh, detecting the format from the extension.
///
/// # Errors
///
/// Fails on unreadable files, unknown extensions, parse errors, an empty
/// vertex list, non-finite coordinates and out-of-range face indices.
pub fn load_mesh(path: &Path) -> FitResult<Mesh> {
    let format = MeshFormat::from_path(path).ok_or_else(|| FitError::UnsupportedFormat {
        extension: path.extension().and_then(|e| e.to_str()).map(String::from),
    })?;

    info!("Loading mesh from {:?} (format: {:?})", path, format);

    let result = match format {
        MeshFormat::Ply => load_ply(path),
        MeshFormat::Obj => load_obj(path),
        MeshFormat::Stl => load_stl(path),
    };
    log_io_operation("load", path, result.is_ok());
    let mesh = result?;

    if let Some((min, max)) = mesh.bounds() {
        let dims = max - min;
        info!(
            "Loaded mesh: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );
        debug!("Dimensions: {:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z);

        // Bodies are expected in meters.
        let max_dim = dims.x.max(dims.y).max(dims.z);
        if max_dim > 10.0 {
            warn!("Mesh largest dimension is {:.1}; expected meters", max_dim);
        }
    }
    if !mesh.has_faces() {
        warn!("Mesh has no faces; treating it as a point cloud");
    }

    mesh.validate()?;
    Ok(mesh)
}

/// Load mesh from STL file (binary or ASCII).
fn load_stl(path: &Path) -> FitResult<Mesh> {
    let file = File::open(path).map_err(|e| FitError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let stl = stl_io::read_stl(&mut reader).map_err(|e| FitError::parse_error(path, e.to_string()))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices.push(Vertex::from_coords(
            f64::from(v.0[0]),
            f64::from(v.0[1]),
            f64::from(v.0[2]),
        ));
    }
    for face in &stl.faces {
        let [a, b, c] = face.vertices;
        // Skip degenerate triangles
        if a != b && b != c && a != c {
            mesh.faces.push([a as u32, b as u32, c as u32]);
        }
    }

    debug!(
        "STL loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );
    Ok(mesh)
}

/// Load mesh from OBJ file, merging all models.
fn load_obj(path: &Path) -> FitResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| FitError::parse_error(path, e.to_string()))?;

    if models.is_empty() {
        return Err(FitError::empty_mesh("OBJ file contains no models"));
    }

    let mut mesh = Mesh::new();
    for model in &models {
        let offset = mesh.vertices.len() as u32;
        let obj_mesh = &model.mesh;
        for chunk in obj_mesh.positions.chunks_exact(3) {
            mesh.vertices.push(Vertex::from_coords(
                f64::from(chunk[0]),
                f64::from(chunk[1]),
                f64::from(chunk[2]),
            ));
        }
        for chunk in obj_mesh.indices.chunks_exact(3) {
            mesh.faces
                .push([chunk[0] + offset, chunk[1] + offset, chunk[2] + offset]);
        }
    }

    debug!(
        "OBJ loaded: {} vertices, {} faces from {} models",
        mesh.vertices.len(),
        mesh.faces.len(),
        models.len()
    );
    Ok(mesh)
}

/// Load mesh from PLY file (ASCII or binary).
///
/// Polygons are fan-triangulated. A file without a `face` element loads as
/// a point cloud.
fn load_ply(path: &Path) -> FitResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::Property;

    let file = File::open(path).map_err(|e| FitError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| FitError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        for element in vertices {
            let x = ply_float(element.get("x"), "x", path)?;
            let y = ply_float(element.get("y"), "y", path)?;
            let z = ply_float(element.get("z"), "z", path)?;
            let mut vertex = Vertex::from_coords(x, y, z);

            if let (Some(r), Some(g), Some(b)) = (
                ply_u8(element.get("red")),
                ply_u8(element.get("green")),
                ply_u8(element.get("blue")),
            ) {
                vertex.color = Some(VertexColor::new(r, g, b));
            }
            mesh.vertices.push(vertex);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for element in faces {
            let indices: Vec<u32> = match element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"))
            {
                Some(Property::ListInt(v)) => v.iter().map(|&i| i as u32).collect(),
                Some(Property::ListUInt(v)) => v.clone(),
                Some(Property::ListUChar(v)) => v.iter().map(|&i| u32::from(i)).collect(),
                Some(Property::ListShort(v)) => v.iter().map(|&i| i as u32).collect(),
                Some(Property::ListUShort(v)) => v.iter().map(|&i| u32::from(i)).collect(),
                _ => continue,
            };
            fan_triangulate(&indices, &mut mesh.faces);
        }
    }

    debug!(
        "PLY loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );
    Ok(mesh)
}

fn fan_triangulate(polygon: &[u32], faces: &mut Vec<[u32; 3]>) {
    if let Some((&first, rest)) = polygon.split_first() {
        for pair in rest.windows(2) {
            faces.push([first, pair[0], pair[1]]);
        }
    }
}

fn ply_float(prop: Option<&ply_rs::ply::Property>, name: &str, path: &Path) -> FitResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(f64::from(*v)),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(f64::from(*v)),
        Some(Property::UInt(v)) => Ok(f64::from(*v)),
        Some(Property::Short(v)) => Ok(f64::from(*v)),
        Some(Property::UShort(v)) => Ok(f64::from(*v)),
        Some(Property::Char(v)) => Ok(f64::from(*v)),
        Some(Property::UChar(v)) => Ok(f64::from(*v)),
        _ => Err(FitError::parse_error(
            path,
            format!("missing or invalid PLY property: {}", name),
        )),
    }
}

fn ply_u8(prop: Option<&ply_rs::ply::Property>) -> Option<u8> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::UChar(v)) => Some(*v),
        Some(Property::UShort(v)) => Some((*v).min(255) as u8),
        Some(Property::Int(v)) => Some((*v).clamp(0, 255) as u8),
        Some(Property::Float(v)) => Some((v * 255.0).clamp(0.0, 255.0) as u8),
        Some(Property::Double(v)) => Some((v * 255.0).clamp(0.0, 255.0) as u8),
        _ => None,
    }
}

/// Save a mesh as PLY. Colors are written when any vertex has one.
///
/// # Errors
///
/// Fails when the file cannot be created or written.
pub fn save_ply(mesh: &Mesh, path: &Path, encoding: PlyEncoding) -> FitResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    let write_error = |details: String| {
        FitError::io_write(path, std::io::Error::new(std::io::ErrorKind::Other, details))
    };

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = match encoding {
        PlyEncoding::Ascii => Encoding::Ascii,
        PlyEncoding::BinaryLittleEndian => Encoding::BinaryLittleEndian,
    };

    let has_colors = mesh.vertices.iter().any(|v| v.color.is_some());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    if has_colors {
        for channel in ["red", "green", "blue"] {
            vertex_def.properties.add(PropertyDef::new(
                channel.to_string(),
                PropertyType::Scalar(ScalarType::UChar),
            ));
        }
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    if mesh.has_faces() {
        let mut face_def = ElementDef::new("face".to_string());
        face_def.properties.add(PropertyDef::new(
            "vertex_indices".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::Int),
        ));
        face_def.count = mesh.faces.len();
        ply.header.elements.add(face_def);
    }

    let vertices_payload: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(v.position.x as f32));
            element.insert("y".to_string(), Property::Float(v.position.y as f32));
            element.insert("z".to_string(), Property::Float(v.position.z as f32));
            if has_colors {
                let c = v.color.unwrap_or(VertexColor::new(255, 255, 255));
                element.insert("red".to_string(), Property::UChar(c.r));
                element.insert("green".to_string(), Property::UChar(c.g));
                element.insert("blue".to_string(), Property::UChar(c.b));
            }
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices_payload);

    if mesh.has_faces() {
        let faces_payload: Vec<DefaultElement> = mesh
            .faces
            .iter()
            .map(|face| {
                let mut element = DefaultElement::new();
                element.insert(
                    "vertex_indices".to_string(),
                    Property::ListInt(face.iter().map(|&i| i as i32).collect()),
                );
                element
            })
            .collect();
        ply.payload.insert("face".to_string(), faces_payload);
    }

    ply.make_consistent()
        .map_err(|e| write_error(format!("PLY consistency error: {:?}", e)))?;

    let file = File::create(path).map_err(|e| FitError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| write_error(format!("PLY write error: {:?}", e)))?;
    writer.flush().map_err(|e| FitError::io_write(path, e))?;

    log_io_operation("save", path, true);
    info!(
        "Saved {} vertices and {} faces to {:?} ({:?})",
        mesh.vertices.len(),
        mesh.faces.len(),
        path,
        encoding
    );
    Ok(())
}

/// Save a mesh by extension. Only binary PLY is written.
///
/// # Errors
///
/// Fails on any extension other than `.ply` and on write errors.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> FitResult<()> {
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Ply) => save_ply(mesh, path, PlyEncoding::BinaryLittleEndian),
        _ => Err(FitError::UnsupportedFormat {
            extension: path.extension().and_then(|e| e.to_str()).map(String::from),
        }),
    }
}

/// Parse keypoints from a JSON array of `[x, y, z]` triples.
///
/// # Errors
///
/// Fails on malformed JSON and non-finite coordinates.
pub fn parse_keypoints(json: &str) -> FitResult<Vec<Point3<f64>>> {
    let triples: Vec<[f64; 3]> = serde_json::from_str(json)
        .map_err(|e| FitError::invalid_keypoints(format!("expected an array of [x, y, z]: {e}")))?;
    triples
        .into_iter()
        .enumerate()
        .map(|(i, [x, y, z])| {
            if x.is_finite() && y.is_finite() && z.is_finite() {
                Ok(Point3::new(x, y, z))
            } else {
                Err(FitError::invalid_keypoints(format!(
                    "keypoint {i} has a non-finite coordinate"
                )))
            }
        })
        .collect()
}

/// Load keypoints from a JSON file.
///
/// # Errors
///
/// Fails on unreadable files and everything [`parse_keypoints`] rejects.
pub fn load_keypoints(path: &Path) -> FitResult<Vec<Point3<f64>>> {
    let text = std::fs::read_to_string(path).map_err(|e| FitError::io_read(path, e))?;
    let keypoints = parse_keypoints(&text)?;
    debug!("Loaded {} keypoints from {:?}", keypoints.len(), path);
    Ok(keypoints)
}

/// Write keypoints as a JSON array of `[x, y, z]` triples.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub fn save_keypoints(points: &[Point3<f64>], path: &Path) -> FitResult<()> {
    let triples: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
    let json = serde_json::to_string(&triples).map_err(|e| {
        FitError::io_write(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    std::fs::write(path, json).map_err(|e| FitError::io_write(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tetrahedron() -> Mesh {
        Mesh::from_positions(
            &[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        )
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(MeshFormat::from_path(Path::new("a.PLY")), Some(MeshFormat::Ply));
        assert_eq!(MeshFormat::from_path(Path::new("a.obj")), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path(Path::new("a.stl")), Some(MeshFormat::Stl));
        assert_eq!(MeshFormat::from_path(Path::new("a.3mf")), None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_mesh(Path::new("body.fbx")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
        let err = save_mesh(&tetrahedron(), Path::new("body.stl")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
    }

    #[test]
    fn test_ply_binary_keeps_colors() {
        let mut mesh = tetrahedron();
        mesh.vertices[0].color = Some(VertexColor::new(255, 0, 0));
        let file = NamedTempFile::with_suffix(".ply").unwrap();
        save_ply(&mesh, file.path(), PlyEncoding::BinaryLittleEndian).unwrap();

        let loaded = load_mesh(file.path()).unwrap();
        assert_eq!(loaded.faces, mesh.faces);
        assert_eq!(loaded.vertices[0].color, Some(VertexColor::new(255, 0, 0)));
        assert_eq!(loaded.vertices[1].color, Some(VertexColor::new(255, 255, 255)));
    }

    #[test]
    fn test_ply_quads_are_triangulated() {
        let mut file = NamedTempFile::with_suffix(".ply").unwrap();
        write!(
            file,
            "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\nproperty float y\nproperty float z\n\
             element face 1\nproperty list uchar int vertex_indices\nend_header\n\
             0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n"
        )
        .unwrap();
        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_point_cloud_ply() {
        let mut cloud = tetrahedron();
        cloud.faces.clear();
        let file = NamedTempFile::with_suffix(".ply").unwrap();
        save_ply(&cloud, file.path(), PlyEncoding::Ascii).unwrap();
        let loaded = load_mesh(file.path()).unwrap();
        assert_eq!(loaded.vertex_count(), 4);
        assert!(!loaded.has_faces());
    }

    #[test]
    fn test_out_of_range_face_rejected() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        write!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert!(load_mesh(file.path()).is_ok());

        let mut bad = tetrahedron();
        bad.faces.push([0, 1, 9]);
        let file = NamedTempFile::with_suffix(".ply").unwrap();
        save_ply(&bad, file.path(), PlyEncoding::Ascii).unwrap();
        let err = load_mesh(file.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
    }

    #[test]
    fn test_stl_ascii() {
        let mut file = NamedTempFile::with_suffix(".stl").unwrap();
        write!(
            file,
            "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\n\
             endloop\nendfacet\nendsolid t\n"
        )
        .unwrap();
        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.face_count(), 1);
    }

    #[test]
    fn test_keypoints_json() {
        let points = parse_keypoints("[[0, 1, 2], [3.5, -1, 0]]").unwrap();
        assert_eq!(points[1], Point3::new(3.5, -1.0, 0.0));
        assert!(parse_keypoints("[[0, 1]]").is_err());
        assert_eq!(
            parse_keypoints("{}").unwrap_err().code(),
            ErrorCode::InvalidKeypoints
        );

        let file = NamedTempFile::with_suffix(".json").unwrap();
        save_keypoints(&points, file.path()).unwrap();
        assert_eq!(load_keypoints(file.path()).unwrap(), points);
    }
}

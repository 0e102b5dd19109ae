//! Horizontal cross-sections of a body mesh.
//!
//! A section intersects every triangle with the plane `z = level` and chains
//! the resulting segments into loops. Segments are joined through the mesh
//! edges they cross, so chaining is exact and needs no distance tolerance.
//! Cutting a torso at waist height yields one closed loop; cutting at thigh
//! height yields two, plus one per arm when the arms hang that low.
//!
//! Meshes without faces (bare point clouds) are sectioned through the convex
//! hull of the vertices in a thin band around the level. That yields a single
//! loop enclosing every limb at that height, which is the best a point cloud
//! supports.
//!
//! Open chains (a cut through a hole or a mesh boundary) are kept in
//! [`Section::loops`] but never returned by the selectors, which only
//! consider closed loops.
//!
//! # Example
//!
//! ```
//! use body_fit::slice::section;
//! use body_fit::Mesh;
//! use nalgebra::Point3;
//!
//! // A square tube from z=0 to z=1
//! let positions = [
//!     Point3::new(-1.0, -1.0, 0.0), Point3::new(1.0, -1.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0), Point3::new(-1.0, 1.0, 0.0),
//!     Point3::new(-1.0, -1.0, 1.0), Point3::new(1.0, -1.0, 1.0),
//!     Point3::new(1.0, 1.0, 1.0), Point3::new(-1.0, 1.0, 1.0),
//! ];
//! let mut faces = Vec::new();
//! for i in 0..4u32 {
//!     let j = (i + 1) % 4;
//!     faces.push([i, j, j + 4]);
//!     faces.push([i, j + 4, i + 4]);
//! }
//! let mesh = Mesh::from_positions(&positions, &faces);
//!
//! let cut = section(&mesh, 0.5);
//! assert_eq!(cut.loops.len(), 1);
//! assert!((cut.loops[0].perimeter() - 8.0).abs() < 1e-9);
//! ```

use crate::surface::convex_hull;
use crate::Mesh;
use hashbrown::HashMap;
use nalgebra::Point3;

/// Fraction of the mesh height sampled on each side of the level when
/// sectioning a point cloud.
const POINT_CLOUD_BAND: f64 = 0.01;

/// One connected polyline of a cross-section.
#[derive(Debug, Clone)]
pub struct SectionLoop {
    /// Ordered points, all at the section level. The closing edge is implicit.
    pub points: Vec<Point3<f64>>,
    /// True if the polyline returns to its start.
    pub closed: bool,
}

impl SectionLoop {
    /// Mean of the loop's points.
    pub fn center(&self) -> Point3<f64> {
        crate::types::mean_point(&self.points).unwrap_or_else(Point3::origin)
    }

    /// Sum of edge lengths, including the closing edge for closed loops.
    pub fn perimeter(&self) -> f64 {
        let open: f64 = self
            .points
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum();
        match (self.closed, self.points.first(), self.points.last()) {
            (true, Some(first), Some(last)) => open + (first - last).norm(),
            _ => open,
        }
    }

    /// Enclosed area in the XY plane (shoelace).
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for i in 0..n {
            let a = &self.points[i];
            let b = &self.points[(i + 1) % n];
            twice += a.x * b.y - b.x * a.y;
        }
        (twice * 0.5).abs()
    }

    /// Horizontal distance of the center from the body axis.
    pub fn radial_offset(&self) -> f64 {
        let c = self.center();
        c.x.hypot(c.y)
    }
}

/// All loops of a horizontal cross-section.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section height.
    pub z: f64,
    /// Loops with at least three points.
    pub loops: Vec<SectionLoop>,
}

impl Section {
    /// True if no loop was found.
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Loops that return to their start.
    pub fn closed_loops(&self) -> impl Iterator<Item = &SectionLoop> {
        self.loops.iter().filter(|l| l.closed)
    }

    /// Number of closed loops.
    pub fn closed_count(&self) -> usize {
        self.closed_loops().count()
    }

    /// Centers of the closed loops, in loop order.
    pub fn centers(&self) -> Vec<Point3<f64>> {
        self.closed_loops().map(SectionLoop::center).collect()
    }

    /// The closed loop with the largest perimeter (the torso at trunk heights).
    pub fn largest(&self) -> Option<&SectionLoop> {
        self.closed_loops()
            .max_by(|a, b| a.perimeter().total_cmp(&b.perimeter()))
    }

    /// The closed loop whose center lies closest to the body axis.
    ///
    /// Arm loops are off-center, so this selects the trunk at bust and hip
    /// heights and the neck or head near the top.
    pub fn most_central(&self) -> Option<&SectionLoop> {
        self.closed_loops()
            .min_by(|a, b| a.radial_offset().total_cmp(&b.radial_offset()))
    }
}

/// Section a mesh with the horizontal plane `z = level`.
pub fn section(mesh: &Mesh, level: f64) -> Section {
    let loops = if mesh.has_faces() {
        section_faces(mesh, level)
    } else {
        section_point_cloud(mesh, level)
    };
    tracing::trace!(z = level, loops = loops.len(), "Sectioned mesh");
    Section { z: level, loops }
}

/// Section at a fraction of the mesh height, measured from its lowest point.
pub fn section_at_fraction(mesh: &Mesh, fraction: f64) -> Section {
    match mesh.bounds() {
        Some((min, max)) => section(mesh, min.z + (max.z - min.z) * fraction),
        None => Section {
            z: 0.0,
            loops: Vec::new(),
        },
    }
}

type EdgeKey = (u32, u32);

#[inline]
fn edge_key(a: u32, b: u32) -> EdgeKey {
    (a.min(b), a.max(b))
}

fn section_faces(mesh: &Mesh, level: f64) -> Vec<SectionLoop> {
    let vertex_count = mesh.vertices.len();
    let mut crossings: HashMap<EdgeKey, Point3<f64>> = HashMap::new();
    let mut adjacency: HashMap<EdgeKey, Vec<EdgeKey>> = HashMap::new();

    for face in &mesh.faces {
        if face.iter().any(|&i| i as usize >= vertex_count) {
            continue;
        }
        let mut cut: Vec<EdgeKey> = Vec::with_capacity(2);
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            let pa = mesh.vertices[a as usize].position;
            let pb = mesh.vertices[b as usize].position;
            let (da, db) = (pa.z - level, pb.z - level);

            // Vertices exactly on the plane count as above.
            if (da >= 0.0) == (db >= 0.0) {
                continue;
            }
            let key = edge_key(a, b);
            crossings.entry(key).or_insert_with(|| {
                let t = da / (da - db);
                Point3::new(pa.x + t * (pb.x - pa.x), pa.y + t * (pb.y - pa.y), level)
            });
            cut.push(key);
        }
        if let &[e0, e1] = cut.as_slice() {
            adjacency.entry(e0).or_default().push(e1);
            adjacency.entry(e1).or_default().push(e0);
        }
    }

    chain_crossings(&crossings, &adjacency)
}

/// Walk the crossing-edge graph into polylines.
///
/// Each crossing edge is shared by at most two cut faces on a manifold mesh,
/// so the graph is a union of paths and cycles. Open paths are walked from an
/// endpoint first so they are not split in the middle.
fn chain_crossings(
    crossings: &HashMap<EdgeKey, Point3<f64>>,
    adjacency: &HashMap<EdgeKey, Vec<EdgeKey>>,
) -> Vec<SectionLoop> {
    let mut visited: hashbrown::HashSet<EdgeKey> = hashbrown::HashSet::new();
    let mut starts: Vec<EdgeKey> = adjacency.keys().copied().collect();
    // Endpoints of open chains first, then deterministic order.
    starts.sort_by_key(|k| (adjacency.get(k).map_or(0, Vec::len) != 1, *k));

    let mut loops = Vec::new();
    for start in starts {
        if visited.contains(&start) {
            continue;
        }
        let mut chain = vec![start];
        visited.insert(start);
        let mut current = start;

        let closed = loop {
            let next = adjacency
                .get(&current)
                .and_then(|nbrs| nbrs.iter().copied().find(|n| !visited.contains(n)));
            match next {
                Some(n) => {
                    visited.insert(n);
                    chain.push(n);
                    current = n;
                }
                None => {
                    break chain.len() > 2
                        && adjacency
                            .get(&current)
                            .is_some_and(|nbrs| nbrs.contains(&start));
                }
            }
        };

        let points: Vec<Point3<f64>> = chain
            .iter()
            .filter_map(|k| crossings.get(k))
            .copied()
            .collect();
        if points.len() >= 3 {
            loops.push(SectionLoop { points, closed });
        }
    }
    loops
}

fn section_point_cloud(mesh: &Mesh, level: f64) -> Vec<SectionLoop> {
    let band = mesh.height() * POINT_CLOUD_BAND;
    let thickness = if band > 0.0 { band } else { 1.0 };

    // Flatten the band onto the level and extrude it into a prism, so the
    // hull is never coplanar and its cut at `level` is the planar hull.
    let prism: Vec<Point3<f64>> = mesh
        .vertices
        .iter()
        .filter(|v| (v.position.z - level).abs() <= band)
        .flat_map(|v| {
            let p = v.position;
            [
                Point3::new(p.x, p.y, level - thickness),
                Point3::new(p.x, p.y, level + thickness),
            ]
        })
        .collect();
    if prism.len() < 6 {
        return Vec::new();
    }

    match convex_hull(&prism) {
        Ok((points, faces)) => section_faces(&Mesh::from_positions(&points, &faces), level),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Closed cylinder along Z centered on (cx, cy).
    fn cylinder(cx: f64, cy: f64, radius: f64, height: f64, segments: u32) -> Mesh {
        let mut mesh = Mesh::new();
        for ring in 0..2 {
            let z = ring as f64 * height;
            for i in 0..segments {
                let a = 2.0 * PI * i as f64 / segments as f64;
                mesh.vertices.push(Vertex::from_coords(
                    cx + radius * a.cos(),
                    cy + radius * a.sin(),
                    z,
                ));
            }
        }
        for i in 0..segments {
            let j = (i + 1) % segments;
            mesh.faces.push([i, j, j + segments]);
            mesh.faces.push([i, j + segments, i + segments]);
        }
        mesh
    }

    fn merge(a: &Mesh, b: &Mesh) -> Mesh {
        let mut out = a.clone();
        let offset = a.vertices.len() as u32;
        out.vertices.extend(b.vertices.iter().cloned());
        out.faces
            .extend(b.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
        out
    }

    #[test]
    fn test_cylinder_circumference_matches_two_pi_r() {
        let radius = 0.15;
        let mesh = cylinder(0.0, 0.0, radius, 1.0, 256);
        let cut = section(&mesh, 0.37);
        assert_eq!(cut.loops.len(), 1);
        let lp = &cut.loops[0];
        assert!(lp.closed);
        let expected = 2.0 * PI * radius;
        assert!((lp.perimeter() - expected).abs() / expected < 0.01);
        assert_relative_eq!(lp.area(), PI * radius * radius, max_relative = 0.01);
    }

    #[test]
    fn test_two_legs_give_two_loops() {
        let left = cylinder(-0.1, 0.0, 0.05, 1.0, 32);
        let right = cylinder(0.1, 0.0, 0.05, 1.0, 32);
        let cut = section(&merge(&left, &right), 0.5);
        assert_eq!(cut.loops.len(), 2);
        let mut xs: Vec<f64> = cut.centers().iter().map(|c| c.x).collect();
        xs.sort_by(f64::total_cmp);
        assert_relative_eq!(xs[0], -0.1, epsilon = 1e-9);
        assert_relative_eq!(xs[1], 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_most_central_and_largest() {
        let torso = cylinder(0.0, 0.0, 0.12, 1.0, 48);
        let arm = cylinder(0.3, 0.0, 0.04, 1.0, 24);
        let cut = section(&merge(&torso, &arm), 0.5);
        assert_eq!(cut.loops.len(), 2);
        assert!(cut.most_central().unwrap().center().x.abs() < 1e-9);
        assert_relative_eq!(
            cut.largest().unwrap().perimeter(),
            cut.most_central().unwrap().perimeter()
        );
    }

    #[test]
    fn test_section_outside_mesh_is_empty() {
        let mesh = cylinder(0.0, 0.0, 0.1, 1.0, 16);
        assert!(section(&mesh, 2.0).is_empty());
        assert!(section(&mesh, -0.5).is_empty());
    }

    #[test]
    fn test_open_tube_wall_gives_open_chain() {
        // Half a cylinder wall: the cut is an open arc.
        let mut mesh = cylinder(0.0, 0.0, 1.0, 1.0, 16);
        mesh.faces.truncate(16);
        let cut = section(&mesh, 0.5);
        assert_eq!(cut.loops.len(), 1);
        assert!(!cut.loops[0].closed);
    }

    #[test]
    fn test_point_cloud_falls_back_to_hull() {
        let mut mesh = cylinder(0.0, 0.0, 0.2, 0.0, 64);
        mesh.faces.clear();
        // Spread a second ring so the cloud has height.
        for v in mesh.vertices.iter_mut().skip(64) {
            v.position.z = 1.0;
        }
        let cut = section(&mesh, 0.0);
        assert_eq!(cut.loops.len(), 1);
        assert!(cut.loops[0].closed);
        let expected = 2.0 * PI * 0.2;
        assert!((cut.loops[0].perimeter() - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_point_cloud_level_without_vertices_is_empty() {
        let mut mesh = cylinder(0.0, 0.0, 0.2, 1.0, 32);
        mesh.faces.clear();
        assert!(section(&mesh, 0.5).is_empty());
    }

    #[test]
    fn test_selectors_skip_open_chains() {
        let mut mesh = cylinder(0.0, 0.0, 1.0, 1.0, 16);
        mesh.faces.truncate(16);
        let cut = section(&mesh, 0.5);
        assert_eq!(cut.loops.len(), 1);
        assert!(cut.largest().is_none());
        assert!(cut.most_central().is_none());
        assert_eq!(cut.closed_count(), 0);
        assert!(cut.centers().is_empty());
    }

    #[test]
    fn test_closed_loop_wins_over_longer_open_chain() {
        // A wide half-wall cut gives a long open arc next to a small closed tube.
        let mut wall = cylinder(0.0, 0.0, 1.0, 1.0, 16);
        wall.faces.truncate(16);
        let tube = cylinder(0.0, 0.0, 0.1, 1.0, 16);
        let cut = section(&merge(&wall, &tube), 0.5);
        assert_eq!(cut.loops.len(), 2);
        let largest = cut.largest().unwrap();
        assert!(largest.closed);
        assert!(largest.perimeter() < 1.0);
        assert!(cut.most_central().unwrap().closed);
    }
}

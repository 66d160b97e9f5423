use std::fmt;

use nalgebra::Vector3;

use crate::cfg::RAY_TRIM;
use crate::geometry::segment_triangle;
use crate::plucker::PluckerLine;
use crate::scene::FaceRef;

/// Index of a silhouette within one processor cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SilhouetteId(pub u32);

impl fmt::Display for SilhouetteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A silhouette edge, named by its silhouette and position in `edges`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub silhouette: SilhouetteId,
    pub index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// A mesh edge of a silhouette face.
    Mesh,
    /// Where a silhouette face crosses a source plane.
    Clip,
}

#[derive(Clone, Debug)]
pub struct SilhouetteEdge {
    pub face: FaceRef,
    /// Mesh edge index for `Mesh`, source plane index (0 source, 1 destination) for `Clip`.
    pub edge: usize,
    pub p: Vector3<f64>,
    pub q: Vector3<f64>,
    pub line: PluckerLine,
    /// Length of the edge inside the shaft.
    pub score: f64,
    pub kind: EdgeKind,
}

/// Connected occluder faces acting as one sheet for every line between the
/// query ends, with the edges bounding it.
#[derive(Clone, Debug)]
pub struct Silhouette {
    pub id: SilhouetteId,
    pub faces: Vec<FaceRef>,
    pub edges: Vec<SilhouetteEdge>,
    pub(crate) triangles: Vec<[Vector3<f64>; 3]>,
}

impl Silhouette {
    pub fn edge_key(&self, index: usize) -> EdgeKey {
        EdgeKey {
            silhouette: self.id,
            index: index as u32,
        }
    }

    pub fn contains_face(&self, face: FaceRef) -> bool {
        self.faces.contains(&face)
    }

    /// Whether the segment `a → b` (trimmed at both ends) hits a face of the sheet.
    pub fn blocks(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        let dir = b - a;
        self.triangles
            .iter()
            .any(|t| segment_triangle(a, &dir, t, RAY_TRIM, 1.0 - RAY_TRIM).is_some())
    }
}

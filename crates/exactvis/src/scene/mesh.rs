//! Indexed triangle meshes and the brute-force reference scene.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::{FaceRef, Hit, Ray, Scene, SceneError, SceneId};
use crate::error::VisError;
use crate::geometry::segment_triangle;
use crate::plucker::is_finite;

/// Triangle mesh with edge adjacency derived from shared vertex-index pairs.
#[derive(Clone, Debug)]
pub struct TriangleMesh {
    vertices: Vec<Vector3<f64>>,
    faces: Vec<[u32; 3]>,
    neighbors: Vec<[Option<u32>; 3]>,
    lo: Vector3<f64>,
    hi: Vector3<f64>,
}

impl TriangleMesh {
    /// Edges shared by more than two faces are treated as boundary edges.
    pub fn new(vertices: Vec<Vector3<f64>>, faces: Vec<[u32; 3]>) -> Result<Self, VisError> {
        if let Some(v) = vertices.iter().find(|v| !is_finite(v)) {
            return Err(VisError::overflow(format!(
                "building a mesh with vertex {:?}",
                v.as_slice()
            )));
        }
        for (i, f) in faces.iter().enumerate() {
            if f.iter().any(|&k| k as usize >= vertices.len()) {
                return Err(VisError::degenerate(format!("face {i} indexes a missing vertex")));
            }
            if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
                return Err(VisError::degenerate(format!("face {i} repeats a vertex")));
            }
        }
        let mut shared: HashMap<(u32, u32), Vec<(u32, usize)>> = HashMap::new();
        for (i, f) in faces.iter().enumerate() {
            for e in 0..3 {
                let (a, b) = (f[e], f[(e + 1) % 3]);
                shared
                    .entry((a.min(b), a.max(b)))
                    .or_default()
                    .push((i as u32, e));
            }
        }
        let mut neighbors = vec![[None; 3]; faces.len()];
        for users in shared.values() {
            if let [(f0, e0), (f1, e1)] = users.as_slice() {
                neighbors[*f0 as usize][*e0] = Some(*f1);
                neighbors[*f1 as usize][*e1] = Some(*f0);
            }
        }
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for v in &vertices {
            lo = lo.inf(v);
            hi = hi.sup(v);
        }
        Ok(Self {
            vertices,
            faces,
            neighbors,
            lo,
            hi,
        })
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn triangle(&self, face: usize) -> Option<[Vector3<f64>; 3]> {
        let f = self.faces.get(face)?;
        Some([
            self.vertices[f[0] as usize],
            self.vertices[f[1] as usize],
            self.vertices[f[2] as usize],
        ])
    }

    pub fn neighbor(&self, face: usize, edge: usize) -> Option<u32> {
        *self.neighbors.get(face)?.get(edge)?
    }

    /// Slab test of the ray against the bounding box.
    fn may_hit(&self, ray: &Ray) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let (mut t0, mut t1) = (ray.t_min, ray.t_max);
        for k in 0..3 {
            let d = ray.dir[k];
            let o = ray.origin[k];
            if d.abs() <= f64::MIN_POSITIVE {
                if o < self.lo[k] || o > self.hi[k] {
                    return false;
                }
                continue;
            }
            let (mut a, mut b) = ((self.lo[k] - o) / d, (self.hi[k] - o) / d);
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            t0 = t0.max(a);
            t1 = t1.min(b);
            if t0 > t1 {
                return false;
            }
        }
        true
    }
}

/// Reference scene: a list of meshes, brute-force ray casting.
#[derive(Clone, Debug)]
pub struct MeshScene {
    id: SceneId,
    meshes: Vec<TriangleMesh>,
}

impl Default for MeshScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshScene {
    pub fn new() -> Self {
        Self {
            id: SceneId::fresh(),
            meshes: Vec::new(),
        }
    }

    pub fn with_meshes(meshes: Vec<TriangleMesh>) -> Self {
        Self {
            id: SceneId::fresh(),
            meshes,
        }
    }

    /// Add a mesh; the scene gets a new id since cached silhouettes are stale.
    pub fn push(&mut self, mesh: TriangleMesh) -> u32 {
        self.meshes.push(mesh);
        self.id = SceneId::fresh();
        (self.meshes.len() - 1) as u32
    }

    pub fn meshes(&self) -> &[TriangleMesh] {
        &self.meshes
    }

    pub fn face_count(&self) -> usize {
        self.meshes.iter().map(TriangleMesh::len).sum()
    }

    /// All faces of the scene.
    pub fn faces(&self) -> impl Iterator<Item = FaceRef> + '_ {
        self.meshes.iter().enumerate().flat_map(|(m, mesh)| {
            (0..mesh.len()).map(move |f| FaceRef {
                mesh: m as u32,
                face: f as u32,
            })
        })
    }
}

impl Scene for MeshScene {
    fn id(&self) -> SceneId {
        self.id
    }

    fn intersect(&self, ray: &Ray) -> Result<Option<Hit>, SceneError> {
        if !is_finite(&ray.origin) || !is_finite(&ray.dir) {
            return Err(SceneError::permanent("non-finite ray"));
        }
        let mut best: Option<Hit> = None;
        for (m, mesh) in self.meshes.iter().enumerate() {
            if !mesh.may_hit(ray) {
                continue;
            }
            for (f, idx) in mesh.faces.iter().enumerate() {
                let tri = [
                    mesh.vertices[idx[0] as usize],
                    mesh.vertices[idx[1] as usize],
                    mesh.vertices[idx[2] as usize],
                ];
                let limit = best.map_or(ray.t_max, |h| h.t);
                if let Some(t) = segment_triangle(&ray.origin, &ray.dir, &tri, ray.t_min, limit) {
                    best = Some(Hit {
                        t,
                        point: ray.at(t),
                        face: FaceRef {
                            mesh: m as u32,
                            face: f as u32,
                        },
                    });
                }
            }
        }
        Ok(best)
    }

    fn face(&self, face: FaceRef) -> Option<[Vector3<f64>; 3]> {
        self.meshes.get(face.mesh as usize)?.triangle(face.face as usize)
    }

    fn adjacent_face(&self, face: FaceRef, edge: usize) -> Option<FaceRef> {
        let mesh = self.meshes.get(face.mesh as usize)?;
        mesh.neighbor(face.face as usize, edge).map(|f| FaceRef {
            mesh: face.mesh,
            face: f,
        })
    }
}

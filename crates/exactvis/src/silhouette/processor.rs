//! Silhouette extraction for one query pair.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use nalgebra::Vector3;

use super::types::{EdgeKind, Silhouette, SilhouetteEdge, SilhouetteId};
use crate::cfg::PLANE_EPS;
use crate::debug::{DebugEvent, DebugSink, EdgeRejection};
use crate::error::VisError;
use crate::geometry::{bounding_sphere, clip_polygon, polygon_area, shaft_planes, Plane, SourcePair};
use crate::scene::{FaceRef, Scene, SceneId};

/// Identity of a clipped query pair (coordinates bit for bit plus options).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairKey(u64);

impl PairKey {
    pub fn new(pair: &SourcePair, optimize: bool) -> Self {
        let mut h = DefaultHasher::new();
        for end in [&pair.source, &pair.destination] {
            end.kind().hash(&mut h);
            for v in end.vertices() {
                for x in v.iter() {
                    x.to_bits().hash(&mut h);
                }
            }
        }
        optimize.hash(&mut h);
        Self(h.finish())
    }
}

/// Per-pair memo of face relevance, edge tests and silhouettes.
#[derive(Clone, Debug, Default)]
pub struct ProcessorCache {
    between: HashMap<FaceRef, bool>,
    potential: HashMap<(FaceRef, FaceRef), bool>,
    by_face: HashMap<FaceRef, SilhouetteId>,
    silhouettes: Vec<Arc<Silhouette>>,
}

impl ProcessorCache {
    pub fn silhouette_count(&self) -> usize {
        self.silhouettes.len()
    }

    pub fn silhouette(&self, id: SilhouetteId) -> Option<Arc<Silhouette>> {
        self.silhouettes.get(id.0 as usize).cloned()
    }
}

/// Caller-owned silhouette caches keyed by scene and query pair.
///
/// Entries stay valid as long as the scene geometry behind a `SceneId` does
/// not change; drop them with `clear_scene` otherwise.
#[derive(Clone, Debug, Default)]
pub struct SilhouetteCache {
    entries: HashMap<(SceneId, PairKey), ProcessorCache>,
}

impl SilhouetteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, scene: SceneId, pair: PairKey) -> &mut ProcessorCache {
        self.entries.entry((scene, pair)).or_default()
    }

    pub fn get(&self, scene: SceneId, pair: PairKey) -> Option<&ProcessorCache> {
        self.entries.get(&(scene, pair))
    }

    pub fn clear_scene(&mut self, scene: SceneId) {
        self.entries.retain(|(s, _), _| *s != scene);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds silhouettes of hit faces for one clipped query pair.
pub struct SilhouetteProcessor<'a> {
    scene: &'a dyn Scene,
    pair: &'a SourcePair,
    shaft: Vec<Plane>,
    eps: f64,
    optimize: bool,
    cache: &'a mut ProcessorCache,
}

impl<'a> SilhouetteProcessor<'a> {
    /// Set up the source planes and the shaft hull. With `optimize` off every
    /// face is its own silhouette.
    pub fn new(
        scene: &'a dyn Scene,
        pair: &'a SourcePair,
        cache: &'a mut ProcessorCache,
        optimize: bool,
    ) -> Self {
        let shaft = shaft_planes(pair.source.vertices(), pair.destination.vertices());
        Self {
            scene,
            pair,
            shaft,
            eps: PLANE_EPS * pair.scale(),
            optimize,
            cache,
        }
    }

    pub fn shaft(&self) -> &[Plane] {
        &self.shaft
    }

    pub fn silhouette(&self, id: SilhouetteId) -> Option<Arc<Silhouette>> {
        self.cache.silhouette(id)
    }

    fn source_planes(&self) -> [&Plane; 2] {
        [&self.pair.source_plane, &self.pair.destination_plane]
    }

    /// All vertices in front of both source planes (within tolerance).
    pub fn is_face_inside_wedge(&self, tri: &[Vector3<f64>; 3]) -> bool {
        self.source_planes()
            .iter()
            .all(|pl| tri.iter().all(|v| pl.signed_distance(v) >= -self.eps))
    }

    /// Whether the part of `face` between the source planes has positive area.
    pub fn is_polygon_between_source_planes(&mut self, face: FaceRef) -> bool {
        if let Some(&b) = self.cache.between.get(&face) {
            return b;
        }
        let between = self.scene.face(face).is_some_and(|tri| {
            let mut poly = tri.to_vec();
            for pl in self.source_planes() {
                poly = clip_polygon(&poly, pl, 0.0);
            }
            let scale = self.pair.scale();
            polygon_area(&poly) > PLANE_EPS * scale * scale
        });
        self.cache.between.insert(face, between);
        between
    }

    /// Bounding sphere of the segment not entirely outside a shaft plane.
    pub fn is_edge_potentially_inside_shaft(&self, p: &Vector3<f64>, q: &Vector3<f64>) -> bool {
        let (c, r) = bounding_sphere(p, q);
        self.shaft
            .iter()
            .all(|pl| pl.signed_distance(&c) <= r + self.eps)
    }

    /// Whether the shared edge of `f0` and `f1` can be a silhouette edge for
    /// some line between the query ends.
    ///
    /// For a line crossing the edge, the edge is a fold iff the far vertices of
    /// both faces lie on the same side of the plane spanned by the edge and the
    /// line. The test asks whether that can happen for a line through any
    /// vertex of either end; tangential cases count as silhouettes.
    pub fn is_potential_silhouette_edge(&mut self, f0: FaceRef, f1: FaceRef, edge: usize) -> bool {
        let key = if f0 <= f1 { (f0, f1) } else { (f1, f0) };
        if let Some(&b) = self.cache.potential.get(&key) {
            return b;
        }
        let result = match (self.scene.face(f0), self.scene.face(f1)) {
            (Some(t0), Some(t1)) => self.fold_possible(&t0, &t1, edge),
            _ => true,
        };
        self.cache.potential.insert(key, result);
        result
    }

    fn fold_possible(&self, t0: &[Vector3<f64>; 3], t1: &[Vector3<f64>; 3], edge: usize) -> bool {
        if !self.is_face_inside_wedge(t0) || !self.is_face_inside_wedge(t1) {
            return true;
        }
        let p = t0[edge];
        let q = t0[(edge + 1) % 3];
        let r0 = t0[(edge + 2) % 3];
        let e = q - p;
        let Some(r1) = t1
            .iter()
            .copied()
            .max_by(|a, b| e.cross(&(a - p)).norm().total_cmp(&e.cross(&(b - p)).norm()))
        else {
            return true;
        };
        let orient = |v: &Vector3<f64>, r: &Vector3<f64>| {
            let n = e.cross(&(v - p));
            let d = n.dot(&(r - p));
            let tol = PLANE_EPS * n.norm() * (r - p).norm();
            if d > tol {
                1
            } else if d < -tol {
                -1
            } else {
                0
            }
        };
        for end in [&self.pair.source, &self.pair.destination] {
            let mut signs: Option<(i32, i32)> = None;
            for v in end.vertices() {
                let s = (orient(v, &r0), orient(v, &r1));
                if s.0 == 0 || s.1 == 0 || s.0 == s.1 {
                    return true;
                }
                match signs {
                    None => signs = Some(s),
                    Some(prev) if prev != s => return true,
                    Some(_) => {}
                }
            }
        }
        false
    }

    /// The silhouette containing `face`; the flag tells whether it was cached.
    pub fn silhouette_of(
        &mut self,
        face: FaceRef,
        sink: &mut dyn DebugSink,
    ) -> Result<(SilhouetteId, bool), VisError> {
        if let Some(&id) = self.cache.by_face.get(&face) {
            let edges = self.cache.silhouettes[id.0 as usize].edges.len();
            sink.record(&DebugEvent::SilhouetteComputed {
                silhouette: id,
                edges,
                cached: true,
            });
            return Ok((id, true));
        }
        if self.scene.face(face).is_none() {
            return Err(VisError::SceneQueryFailed {
                reason: format!("scene reported hit on unknown face {face}"),
                transient: false,
            });
        }
        let id = SilhouetteId(self.cache.silhouettes.len() as u32);
        let faces = self.collect_faces(face);
        let member: HashSet<FaceRef> = faces.iter().copied().collect();
        let mut triangles = Vec::with_capacity(faces.len());
        let mut edges = Vec::new();
        for &f in &faces {
            let Some(tri) = self.scene.face(f) else {
                continue;
            };
            triangles.push(tri);
            for k in 0..3 {
                let (p, q) = (tri[k], tri[(k + 1) % 3]);
                let rejected = if self.is_internal(f, &tri, k, &member) {
                    Some(EdgeRejection::NoFold)
                } else if !self.is_edge_potentially_inside_shaft(&p, &q) {
                    Some(EdgeRejection::OutsideShaft)
                } else {
                    None
                };
                if let Some(reason) = rejected {
                    sink.record(&DebugEvent::SilhouetteEdgeRejected {
                        face: f,
                        edge: k,
                        reason,
                    });
                    continue;
                }
                if let Some(edge) = self.edge(f, k, p, q, EdgeKind::Mesh) {
                    sink.record(&DebugEvent::SilhouetteEdgeAccepted {
                        face: f,
                        edge: k,
                        kind: EdgeKind::Mesh,
                    });
                    edges.push(edge);
                }
            }
            for (k, pl) in self.source_planes().into_iter().enumerate() {
                if let Some((p, q)) = plane_cut(&tri, pl, self.eps) {
                    if let Some(edge) = self.edge(f, k, p, q, EdgeKind::Clip) {
                        sink.record(&DebugEvent::SilhouetteEdgeAccepted {
                            face: f,
                            edge: k,
                            kind: EdgeKind::Clip,
                        });
                        edges.push(edge);
                    }
                }
            }
        }
        edges.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(
            silhouette = %id,
            faces = faces.len(),
            edges = edges.len(),
            "silhouette extracted"
        );
        sink.record(&DebugEvent::SilhouetteComputed {
            silhouette: id,
            edges: edges.len(),
            cached: false,
        });
        for &f in &faces {
            self.cache.by_face.insert(f, id);
        }
        self.cache.silhouettes.push(Arc::new(Silhouette {
            id,
            faces,
            edges,
            triangles,
        }));
        Ok((id, false))
    }

    /// Depth-first traversal from `start` across internal edges.
    fn collect_faces(&mut self, start: FaceRef) -> Vec<FaceRef> {
        let mut seen = HashSet::from([start]);
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(f) = stack.pop() {
            out.push(f);
            let Some(tri) = self.scene.face(f) else {
                continue;
            };
            for k in 0..3 {
                let Some(g) = self.scene.adjacent_face(f, k) else {
                    continue;
                };
                if !seen.contains(&g) && self.traversable(f, &tri, k, g) {
                    seen.insert(g);
                    stack.push(g);
                }
            }
        }
        out
    }

    fn traversable(&mut self, f: FaceRef, tri: &[Vector3<f64>; 3], k: usize, g: FaceRef) -> bool {
        if !self.optimize || !self.is_face_inside_wedge(tri) {
            return false;
        }
        if !self.is_polygon_between_source_planes(f) || !self.is_polygon_between_source_planes(g) {
            return false;
        }
        let Some(other) = self.scene.face(g) else {
            return false;
        };
        self.is_face_inside_wedge(&other) && !self.is_potential_silhouette_edge(f, g, k)
    }

    fn is_internal(
        &mut self,
        f: FaceRef,
        tri: &[Vector3<f64>; 3],
        k: usize,
        member: &HashSet<FaceRef>,
    ) -> bool {
        match self.scene.adjacent_face(f, k) {
            Some(g) if member.contains(&g) => self.traversable(f, tri, k, g),
            _ => false,
        }
    }

    fn edge(
        &self,
        face: FaceRef,
        edge: usize,
        p: Vector3<f64>,
        q: Vector3<f64>,
        kind: EdgeKind,
    ) -> Option<SilhouetteEdge> {
        // same frame as the polytopes it splits
        let line = self.pair.frame.line(&p, &q).ok()?;
        Some(SilhouetteEdge {
            face,
            edge,
            p,
            q,
            line,
            score: self.length_in_shaft(&p, &q),
            kind,
        })
    }

    fn length_in_shaft(&self, p: &Vector3<f64>, q: &Vector3<f64>) -> f64 {
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        for pl in &self.shaft {
            let (dp, dq) = (pl.signed_distance(p), pl.signed_distance(q));
            if dp > 0.0 && dq > 0.0 {
                return 0.0;
            }
            if dp > 0.0 {
                t0 = t0.max(dp / (dp - dq));
            } else if dq > 0.0 {
                t1 = t1.min(dp / (dp - dq));
            }
        }
        (t1 - t0).max(0.0) * (q - p).norm()
    }
}

/// Segment where `plane` cuts the triangle, if it strictly separates vertices.
fn plane_cut(
    tri: &[Vector3<f64>; 3],
    plane: &Plane,
    eps: f64,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let d = tri.map(|v| plane.signed_distance(&v));
    if d.iter().all(|&x| x >= -eps) || d.iter().all(|&x| x <= eps) {
        return None;
    }
    let mut pts = Vec::with_capacity(2);
    for k in 0..3 {
        let (a, b) = (k, (k + 1) % 3);
        if (d[a] < 0.0) != (d[b] < 0.0) {
            let t = d[a] / (d[a] - d[b]);
            pts.push(tri[a] + (tri[b] - tri[a]) * t);
        }
    }
    match pts.as_slice() {
        [p, q] => Some((*p, *q)),
        _ => None,
    }
}

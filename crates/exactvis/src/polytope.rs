//! Vertex/edge description of a set of candidate lines.
//!
//! Purpose
//! - A `PluckerPolytope` is a pointed convex cone in R⁶ given by its extreme rays
//!   (vertices), the facets each ray is tight on, and the adjacency between rays.
//!   Its real lines (points on the quadric) are the candidate stabbing lines of
//!   the branch.
//! - Edges meeting the quadric yield extremal stabbing lines; an interior real
//!   line (the representative) is what the query casts into the scene.
//!
//! Why this design
//! - Vertex incidences are tracked combinatorially (`FacetSet`), so edges are
//!   recomputed exactly after every split instead of being guessed from
//!   floating-point proximity.

use std::collections::{BTreeSet, HashSet};

use nalgebra::Vector6;
use smallvec::SmallVec;

use crate::cfg::PLUCKER_DIM;
use crate::combinatorial::{self, FacetId, FacetSet};
use crate::error::VisError;
use crate::plucker::{relative_position, PluckerLine, Position, QuadricPosition};
use crate::polyhedron::{FacetArena, Polyhedron};
use crate::silhouette::SilhouetteId;

/// Extreme ray of the cone with its incident facets.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub line: PluckerLine,
    pub facets: FacetSet,
    pub quadric: QuadricPosition,
}

impl Vertex {
    pub fn new(line: PluckerLine, facets: FacetSet, tol: f64) -> Result<Self, VisError> {
        let quadric = line.classify(tol)?;
        Ok(Self {
            line,
            facets,
            quadric,
        })
    }
}

/// Candidate line set of one branch.
#[derive(Clone, Debug)]
pub struct PluckerPolytope {
    polyhedron: Polyhedron,
    vertices: Vec<Vertex>,
    edges: Vec<(usize, usize)>,
    quadric_edges: Vec<usize>,
    extremal: Vec<PluckerLine>,
    silhouettes: BTreeSet<SilhouetteId>,
}

impl PluckerPolytope {
    /// Assemble from vertices; edges come from the combinatorial adjacency test.
    pub fn new(polyhedron: Polyhedron, vertices: Vec<Vertex>) -> Self {
        let mut p = Self {
            polyhedron,
            vertices,
            edges: Vec::new(),
            quadric_edges: Vec::new(),
            extremal: Vec::new(),
            silhouettes: BTreeSet::new(),
        };
        p.compute_edges();
        p
    }

    pub fn polyhedron(&self) -> &Polyhedron {
        &self.polyhedron
    }

    pub fn polyhedron_mut(&mut self) -> &mut Polyhedron {
        &mut self.polyhedron
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Indices into `edges()` of the edges meeting the quadric.
    pub fn quadric_edges(&self) -> &[usize] {
        &self.quadric_edges
    }

    /// Real lines on vertices and edges; valid witnesses of the branch.
    pub fn extremal_lines(&self) -> &[PluckerLine] {
        &self.extremal
    }

    pub fn silhouettes(&self) -> &BTreeSet<SilhouetteId> {
        &self.silhouettes
    }

    pub fn add_silhouette(&mut self, id: SilhouetteId) -> bool {
        self.silhouettes.insert(id)
    }

    pub fn has_silhouette(&self, id: SilhouetteId) -> bool {
        self.silhouettes.contains(&id)
    }

    pub(crate) fn set_silhouettes(&mut self, s: BTreeSet<SilhouetteId>) {
        self.silhouettes = s;
    }

    pub fn facet_count(&self) -> usize {
        self.polyhedron.len()
    }

    pub fn compute_edges(&mut self) {
        let sets: Vec<FacetSet> = self.vertices.iter().map(|v| v.facets.clone()).collect();
        self.edges = combinatorial::edges(&sets, PLUCKER_DIM - 2);
    }

    /// Find the edges crossing or touching the quadric and the real lines on
    /// them. ON vertices count as extremal lines too. Returns the edge count.
    pub fn compute_quadric_edges(&mut self, tol: f64) -> Result<usize, VisError> {
        self.quadric_edges.clear();
        self.extremal.clear();
        for v in &self.vertices {
            if v.quadric == QuadricPosition::On {
                self.extremal.push(v.line);
            }
        }
        for (k, &(i, j)) in self.edges.iter().enumerate() {
            let u = &self.vertices[i];
            let w = &self.vertices[j];
            let roots = segment_quadric_roots(&u.line, &w.line, tol);
            let touches = !roots.is_empty()
                || u.quadric == QuadricPosition::On
                || w.quadric == QuadricPosition::On;
            if touches {
                self.quadric_edges.push(k);
            }
            for t in roots {
                let x = PluckerLine::combine(&u.line, 1.0 - t, &w.line, t)?;
                self.extremal.push(x.projected_on_quadric()?);
            }
        }
        Ok(self.quadric_edges.len())
    }

    /// Whether the cone holds at least one real line.
    pub fn contains_real_lines(&self, tol: f64) -> bool {
        self.representative_line(tol).is_some()
    }

    /// A real line in the relative interior when one exists, otherwise an
    /// extremal line, otherwise `None`.
    ///
    /// Starts from the barycenter `c` of the normalized vertices and walks toward
    /// a point of the opposite quadric sign; the first root is interior because
    /// `c` is.
    pub fn representative_line(&self, tol: f64) -> Option<PluckerLine> {
        let rays: Vec<Vector6<f64>> = self
            .vertices
            .iter()
            .filter_map(|v| v.line.normalized().ok())
            .map(|l| l.to_vector6())
            .collect();
        if rays.is_empty() {
            return None;
        }
        let c = rays.iter().fold(Vector6::zeros(), |acc, r| acc + r) / rays.len() as f64;
        let fallback = || self.extremal.first().copied();
        let Ok(center) = PluckerLine::from_vector6(&c) else {
            return fallback();
        };
        if center.norm() <= tol {
            return fallback();
        }
        let side = match center.classify(tol) {
            Ok(QuadricPosition::On) => return center.projected_on_quadric().ok().or_else(fallback),
            Ok(s) => s,
            Err(_) => return fallback(),
        };
        let Some(target) = self.opposite_point(&rays, side.opposite(), tol) else {
            return fallback();
        };
        let roots = segment_quadric_roots(&center, &target, tol);
        let t = roots.into_iter().fold(f64::INFINITY, f64::min);
        if !t.is_finite() {
            return fallback();
        }
        PluckerLine::combine(&center, 1.0 - t, &target, t)
            .and_then(|x| x.projected_on_quadric())
            .ok()
            .or_else(fallback)
    }

    /// A point of the cone strictly on the `want` side of the quadric: the
    /// strongest vertex, else the extremum of `q` along a vertex pair.
    fn opposite_point(
        &self,
        rays: &[Vector6<f64>],
        want: QuadricPosition,
        tol: f64,
    ) -> Option<PluckerLine> {
        let lines: Vec<PluckerLine> = rays
            .iter()
            .filter_map(|r| PluckerLine::from_vector6(r).ok())
            .collect();
        let strength = |l: &PluckerLine| match want {
            QuadricPosition::Inside => -l.quadric(),
            _ => l.quadric(),
        };
        let best_vertex = lines
            .iter()
            .filter(|l| l.classify(tol).ok() == Some(want))
            .max_by(|a, b| strength(a).total_cmp(&strength(b)));
        if let Some(v) = best_vertex {
            return Some(*v);
        }
        for i in 0..lines.len() {
            for j in (i + 1)..lines.len() {
                let (u, w) = (&lines[i], &lines[j]);
                let f = PluckerLine::combine(w, 1.0, u, -1.0).ok()?;
                let a = f.quadric();
                if a.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let t = -u.side(&f) / a;
                if t <= 0.0 || t >= 1.0 {
                    continue;
                }
                let Ok(x) = PluckerLine::combine(u, 1.0 - t, w, t) else {
                    continue;
                };
                if x.classify(tol).ok() == Some(want) {
                    return Some(x);
                }
            }
        }
        None
    }

    /// `Positive`/`Negative` when every vertex lies on that closed side of
    /// `side(x, plane) = 0`, `Boundary` when the hyperplane splits the cone.
    /// A cone lying entirely on the hyperplane reports `Positive`.
    pub fn relative_position(&self, plane: &PluckerLine, tol: f64) -> Position {
        let (mut pos, mut neg) = (false, false);
        for v in &self.vertices {
            match v.line.position(plane, tol) {
                Ok(Position::Positive) => pos = true,
                Ok(Position::Negative) => neg = true,
                _ => {}
            }
            if pos && neg {
                return Position::Boundary;
            }
        }
        if neg {
            Position::Negative
        } else {
            Position::Positive
        }
    }

    /// Re-verify the polytope invariants.
    pub fn is_valid(&mut self, arena: &FacetArena, tol: f64, normalized: bool) -> bool {
        if self.vertices.is_empty() {
            return false;
        }
        let own: HashSet<FacetId> = self.polyhedron.facets().collect();
        for k in 0..self.vertices.len() {
            let v = self.vertices[k].clone();
            if !v.line.is_finite() || !v.facets.iter().all(|f| own.contains(&f)) {
                return false;
            }
            match self.polyhedron.feasibility(arena, &v.line, tol) {
                Ok(Position::Negative) | Err(_) => return false,
                Ok(_) => {}
            }
            if v.quadric == QuadricPosition::On && v.line.classify(tol).ok() != Some(QuadricPosition::On)
            {
                return false;
            }
            if normalized && !v.line.is_normalized(1e-6) {
                return false;
            }
        }
        true
    }
}

/// Parameters `t ∈ [0, 1]` where the segment `(1 − t)·u + t·w` meets the quadric.
///
/// Solves `q(u) + 2t·side(u, f) + t²·q(f) = 0` with `f = w − u`. A tangential
/// contact within tolerance counts as one root.
pub(crate) fn segment_quadric_roots(
    u: &PluckerLine,
    w: &PluckerLine,
    tol: f64,
) -> SmallVec<[f64; 2]> {
    let mut out = SmallVec::new();
    let Ok(f) = PluckerLine::combine(w, 1.0, u, -1.0) else {
        return out;
    };
    let a = f.quadric();
    let b = u.side(&f);
    let c = u.quadric();
    let eps = tol * u.norm_squared().max(w.norm_squared());
    let q_at = |t: f64| c + 2.0 * b * t + a * t * t;
    let mut push = |t: f64| {
        if (0.0..=1.0).contains(&t) && !out.iter().any(|&s: &f64| (s - t).abs() < 1e-12) {
            out.push(t);
        }
    };
    if a.abs() <= eps {
        if b.abs() > eps {
            push(-c / (2.0 * b));
        } else if c.abs() <= eps {
            push(0.0);
        }
        return out;
    }
    let disc = b * b - a * c;
    if disc < 0.0 {
        let t = -b / a;
        if (0.0..=1.0).contains(&t) && relative_position(q_at(t), eps) == Position::Boundary {
            push(t);
        }
        return out;
    }
    let sq = disc.sqrt();
    let q = -(b + b.signum() * sq);
    if q.abs() > f64::MIN_POSITIVE {
        push(q / a);
        push(c / q);
    } else {
        push(-b / a);
    }
    out
}

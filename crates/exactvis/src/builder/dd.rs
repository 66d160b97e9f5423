//! One double-description step on a pointed cone in R⁶.
//!
//! A cone is kept as its extreme rays plus, per ray, the ids of the
//! constraints it is tight on. Intersecting with `{x : ⟨a, x⟩ ≥ 0}` keeps the
//! rays on the non-negative side and adds one new ray per adjacent pair that
//! straddles the hyperplane.

use nalgebra::{Matrix6, Vector6};

use crate::cfg::PLUCKER_DIM;
use crate::combinatorial::{self, init_facets, FacetId, FacetSet};
use crate::plucker::{relative_position, Position};

/// Side of every ray with respect to one hyperplane.
#[derive(Clone, Debug, Default)]
pub(crate) struct Partition {
    pub values: Vec<f64>,
    pub positive: Vec<usize>,
    pub boundary: Vec<usize>,
    pub negative: Vec<usize>,
    /// Rays whose inner product is not finite.
    pub dropped: Vec<usize>,
}

impl Partition {
    /// Hyperplane misses the open cone: nothing strictly negative.
    pub fn keeps_all(&self) -> bool {
        self.negative.is_empty()
    }

    pub fn crosses(&self) -> bool {
        !self.negative.is_empty() && !self.positive.is_empty()
    }
}

/// Classify `rays` by the sign of `⟨a, x⟩`, tolerance scaled by `|a|·|x|`.
pub(crate) fn partition(rays: &[Vector6<f64>], a: &Vector6<f64>, tol: f64) -> Partition {
    let an = a.norm();
    let mut out = Partition {
        values: Vec::with_capacity(rays.len()),
        ..Partition::default()
    };
    for (i, r) in rays.iter().enumerate() {
        let s = r.dot(a);
        out.values.push(s);
        if !s.is_finite() {
            out.dropped.push(i);
            continue;
        }
        match relative_position(s, tol * an * r.norm()) {
            Position::Positive => out.positive.push(i),
            Position::Negative => out.negative.push(i),
            Position::Boundary => out.boundary.push(i),
        }
    }
    out
}

/// New rays on the adjacent pairs straddling the hyperplane, with their
/// incidences. The returned vectors satisfy `⟨a, x⟩ = 0` up to rounding.
pub(crate) fn crossing_rays(
    rays: &[Vector6<f64>],
    zeros: &[FacetSet],
    part: &Partition,
    edges: &[(usize, usize)],
    id: FacetId,
) -> Vec<(Vector6<f64>, FacetSet)> {
    let mut side = vec![Position::Boundary; rays.len()];
    for &i in &part.positive {
        side[i] = Position::Positive;
    }
    for &i in &part.negative {
        side[i] = Position::Negative;
    }
    let mut out = Vec::new();
    for &(i, j) in edges {
        let (u, w) = match (side[i], side[j]) {
            (Position::Positive, Position::Negative) => (i, j),
            (Position::Negative, Position::Positive) => (j, i),
            _ => continue,
        };
        let (su, sw) = (part.values[u], part.values[w]);
        let x = rays[u] * (-sw) + rays[w] * su;
        out.push((x, init_facets(&zeros[u], &zeros[w], id)));
    }
    out
}

/// Adjacent pairs `(positive, negative)` of a partition. Only straddling pairs
/// are tested, which keeps a step linear in the number of such pairs rather
/// than quadratic in the ray count.
pub(crate) fn straddling_edges(zeros: &[FacetSet], part: &Partition) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for &i in &part.positive {
        for &j in &part.negative {
            if combinatorial::adjacent(zeros, i, j, PLUCKER_DIM - 2) {
                out.push((i, j));
            }
        }
    }
    out
}

/// Indices of a maximal linearly independent prefix-greedy subset (at most six).
pub(crate) fn independent_subset(vectors: &[Vector6<f64>], tol: f64) -> Vec<usize> {
    let mut basis: Vec<Vector6<f64>> = Vec::with_capacity(PLUCKER_DIM);
    let mut picked = Vec::with_capacity(PLUCKER_DIM);
    for (k, v) in vectors.iter().enumerate() {
        let n = v.norm();
        if !n.is_finite() || n <= 0.0 {
            continue;
        }
        let mut r = *v;
        for b in &basis {
            r -= *b * r.dot(b);
        }
        let rn = r.norm();
        if rn > tol * n {
            basis.push(r / rn);
            picked.push(k);
            if picked.len() == PLUCKER_DIM {
                break;
            }
        }
    }
    picked
}

/// Rank of a set of vectors in R⁶.
pub(crate) fn rank(vectors: &[Vector6<f64>], tol: f64) -> usize {
    independent_subset(vectors, tol).len()
}

/// A pointed cone `{x : ⟨c_k, x⟩ ≥ 0}` kept in double description.
#[derive(Clone, Debug)]
pub(crate) struct Cone {
    pub rays: Vec<Vector6<f64>>,
    pub zeros: Vec<FacetSet>,
}

impl Cone {
    /// The simplicial cone of six independent constraints. `None` when they
    /// are not independent.
    pub fn simplicial(constraints: &[Vector6<f64>], ids: &[FacetId]) -> Option<Self> {
        if constraints.len() != PLUCKER_DIM || ids.len() != PLUCKER_DIM {
            return None;
        }
        let m = Matrix6::from_fn(|r, c| constraints[r][c]);
        let inv = m.try_inverse()?;
        let mut rays = Vec::with_capacity(PLUCKER_DIM);
        let mut zeros = Vec::with_capacity(PLUCKER_DIM);
        for j in 0..PLUCKER_DIM {
            let col: Vector6<f64> = inv.column(j).into_owned();
            let n = col.norm();
            if !n.is_finite() || n <= 0.0 {
                return None;
            }
            rays.push(col / n);
            zeros.push(
                ids.iter()
                    .enumerate()
                    .filter(|&(k, _)| k != j)
                    .map(|(_, &f)| f)
                    .collect(),
            );
        }
        Some(Self { rays, zeros })
    }

    pub fn edges(&self) -> Vec<(usize, usize)> {
        combinatorial::edges(&self.zeros, PLUCKER_DIM - 2)
    }

    /// Add the constraint `⟨a, x⟩ ≥ 0` tagged `id`. Returns the number of rays
    /// dropped for non-finite inner products.
    pub fn intersect(&mut self, a: &Vector6<f64>, id: FacetId, tol: f64) -> usize {
        let part = partition(&self.rays, a, tol);
        for &i in &part.boundary {
            self.zeros[i].insert(id);
        }
        if part.keeps_all() && part.dropped.is_empty() {
            return 0;
        }
        let crossing = if part.crosses() {
            let edges = straddling_edges(&self.zeros, &part);
            crossing_rays(&self.rays, &self.zeros, &part, &edges, id)
        } else {
            Vec::new()
        };
        let keep: Vec<usize> = {
            let mut k: Vec<usize> = part.positive.iter().chain(&part.boundary).copied().collect();
            k.sort_unstable();
            k
        };
        let mut rays = Vec::with_capacity(keep.len() + crossing.len());
        let mut zeros = Vec::with_capacity(keep.len() + crossing.len());
        for i in keep {
            rays.push(self.rays[i]);
            zeros.push(std::mem::take(&mut self.zeros[i]));
        }
        for (x, z) in crossing {
            let n = x.norm();
            if n.is_finite() && n > 0.0 {
                rays.push(x / n);
                zeros.push(z);
            }
        }
        self.rays = rays;
        self.zeros = zeros;
        part.dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(k: usize) -> Vector6<f64> {
        let mut v = Vector6::zeros();
        v[k] = 1.0;
        v
    }

    fn ids(n: u32) -> Vec<FacetId> {
        (0..n).map(FacetId).collect()
    }

    #[test]
    fn orthant_is_simplicial() {
        let c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        let cone = Cone::simplicial(&c, &ids(6)).unwrap();
        assert_eq!(cone.rays.len(), 6);
        for (j, r) in cone.rays.iter().enumerate() {
            assert!((r - e(j)).norm() < 1e-12);
            assert_eq!(cone.zeros[j].len(), 5);
            assert!(!cone.zeros[j].has_facet(FacetId(j as u32)));
        }
        // every pair of rays of a simplicial cone is adjacent
        assert_eq!(cone.edges().len(), 15);
    }

    #[test]
    fn dependent_constraints_have_no_simplicial_cone() {
        let mut c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        c[5] = c[0] + c[1];
        assert!(Cone::simplicial(&c, &ids(6)).is_none());
        assert_eq!(rank(&c, 1e-10), 5);
    }

    #[test]
    fn cutting_the_orthant_adds_crossing_rays() {
        // x0 ≥ x1 removes ray e1; only the edge (e0, e1) crosses
        let c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        let mut cone = Cone::simplicial(&c, &ids(6)).unwrap();
        let a = e(0) - e(1);
        let dropped = cone.intersect(&a, FacetId(6), 1e-12);
        assert_eq!(dropped, 0);
        // kept: e0, e2..e5 (e2..e5 lie on the hyperplane); new: e0 + e1
        assert_eq!(cone.rays.len(), 6);
        for (r, z) in cone.rays.iter().zip(&cone.zeros) {
            assert!(r.dot(&a) > -1e-12);
            for f in z.iter() {
                let cst = if f.0 < 6 { e(f.0 as usize) } else { a };
                assert!(r.dot(&cst).abs() < 1e-12, "ray not tight on {f}");
            }
        }
        assert!(cone
            .rays
            .iter()
            .any(|r| (r - (e(0) + e(1)) / 2f64.sqrt()).norm() < 1e-12));
    }

    #[test]
    fn redundant_constraint_only_tags_boundary_rays() {
        let c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        let mut cone = Cone::simplicial(&c, &ids(6)).unwrap();
        let before = cone.rays.clone();
        cone.intersect(&(e(0) + e(1)), FacetId(9), 1e-12);
        assert_eq!(cone.rays, before);
        for k in 2..6 {
            assert!(cone.zeros[k].has_facet(FacetId(9)));
        }
        assert!(!cone.zeros[0].has_facet(FacetId(9)));
    }

    #[test]
    fn straddling_edges_match_the_full_adjacency() {
        let c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        let mut cone = Cone::simplicial(&c, &ids(6)).unwrap();
        cone.intersect(&(e(0) - e(1) + e(2) * 0.5), FacetId(6), 1e-12);
        cone.intersect(&(e(3) - e(4) - e(0) * 0.25), FacetId(7), 1e-12);
        let a = e(1) + e(4) - e(2) - e(5) * 0.5;
        let part = partition(&cone.rays, &a, 1e-12);
        assert!(part.crosses());
        let mut side = vec![0i8; cone.rays.len()];
        for &i in &part.positive {
            side[i] = 1;
        }
        for &i in &part.negative {
            side[i] = -1;
        }
        let mut expected: Vec<(usize, usize)> = cone
            .edges()
            .into_iter()
            .filter(|&(i, j)| side[i] * side[j] < 0)
            .map(|(i, j)| if side[i] > 0 { (i, j) } else { (j, i) })
            .collect();
        let mut got = straddling_edges(&cone.zeros, &part);
        expected.sort_unstable();
        got.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn equality_pair_keeps_only_the_face() {
        let c: Vec<Vector6<f64>> = (0..6).map(e).collect();
        let mut cone = Cone::simplicial(&c, &ids(6)).unwrap();
        let a = e(0) - e(1);
        cone.intersect(&a, FacetId(6), 1e-12);
        cone.intersect(&-a, FacetId(7), 1e-12);
        assert!(!cone.rays.is_empty());
        for (r, z) in cone.rays.iter().zip(&cone.zeros) {
            assert!(r.dot(&a).abs() < 1e-12);
            assert!(z.has_facet(FacetId(6)) && z.has_facet(FacetId(7)));
        }
        // e0 + e1 and e2..e5 survive
        assert_eq!(cone.rays.len(), 5);
    }

    #[test]
    fn partition_separates_non_finite_values() {
        let mut bad = e(0);
        bad[0] = f64::NAN;
        let p = partition(&[e(0), -e(0), e(1), bad], &e(0), 1e-12);
        assert_eq!(p.positive, vec![0]);
        assert_eq!(p.negative, vec![1]);
        assert_eq!(p.boundary, vec![2]);
        assert_eq!(p.dropped, vec![3]);
        assert!(p.crosses());
    }
}

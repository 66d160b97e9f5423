//! Construction and splitting of `PluckerPolytope`s.
//!
//! - `build`: the cone cut out by the edge (or anchor) half-spaces of both query
//!   ends and two bounding half-spaces. Intersected with the quadric it is
//!   exactly the set of lines stabbing both ends.
//! - `intersect_with_facet`: one incremental DD step on the primal vertices.
//! - `split`: both halves of a polytope with respect to a hyperplane; the two
//!   children share the vertices created on the hyperplane.

mod dd;

use nalgebra::{Vector3, Vector6};

use crate::cfg::{BOUND_SLACK, PLANE_EPS, PLUCKER_DIM, RANK_EPS};
use crate::combinatorial::{FacetId, FacetSet};
use crate::debug::{DebugEvent, DebugSink};
use crate::error::VisError;
use crate::geometry::{Plane, Primitive, SourcePair};
use crate::plucker::{PluckerLine, Position};
use crate::polyhedron::{FacetArena, Polyhedron, Provenance};
use crate::polytope::{PluckerPolytope, Vertex};

/// Result of adding one facet to a polytope.
#[derive(Clone, Debug)]
pub enum Intersection {
    /// No vertex survives.
    Empty,
    /// The facet is redundant; the returned copy only records it.
    Unchanged(PluckerPolytope),
    /// The facet cuts the polytope.
    Valid(PluckerPolytope),
}

/// Result of splitting a polytope by a hyperplane.
#[derive(Clone, Debug)]
pub enum SplitOutcome {
    /// The polytope lies on the non-negative side.
    Positive,
    /// The polytope lies on the non-positive side.
    Negative,
    Split {
        positive: PluckerPolytope,
        negative: PluckerPolytope,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct PolytopeBuilder {
    tolerance: f64,
    normalize: bool,
}

impl PolytopeBuilder {
    pub fn new(tolerance: f64, normalize: bool) -> Self {
        Self {
            tolerance,
            normalize,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    fn prepare(&self, line: PluckerLine) -> Result<PluckerLine, VisError> {
        if self.normalize {
            line.normalized()
        } else {
            Ok(line)
        }
    }

    /// Initial polytope of all lines stabbing both ends of `pair`.
    ///
    /// Lines are built in the coordinates `pair` is expressed in; the query
    /// passes [`SourcePair::to_local`] so moments stay well scaled. The cone is
    /// cut out of R⁶ by the constraints of both ends and the two `Bound`
    /// half-spaces, one double-description step per constraint, so its facet
    /// count is linear in the vertex counts of the ends.
    ///
    /// Fails with `DegenerateInput` when the constraints do not span R⁶ or
    /// leave no line.
    pub fn build(
        &self,
        arena: &mut FacetArena,
        pair: &SourcePair,
        sink: &mut dyn DebugSink,
    ) -> Result<PluckerPolytope, VisError> {
        let mut constraints = end_constraints(&pair.source, &pair.source_plane, End::Source)?;
        constraints.extend(end_constraints(
            &pair.destination,
            &pair.destination_plane,
            End::Destination,
        )?);
        constraints.extend(bound_constraints(pair)?);

        let mut ids = Vec::with_capacity(constraints.len());
        let mut duals = Vec::with_capacity(constraints.len());
        for c in constraints {
            let id = arena.push(c.plane, c.provenance, c.negated, self.normalize)?;
            sink.record(&DebugEvent::FacetAdded {
                facet: id,
                provenance: c.provenance,
            });
            duals.push(arena.get(id).plane.dual());
            ids.push(id);
        }
        let basis = dd::independent_subset(&duals, RANK_EPS);
        if basis.len() < PLUCKER_DIM {
            return Err(VisError::degenerate(format!(
                "constraints of the pair span only {} dimensions",
                basis.len()
            )));
        }
        let first: Vec<Vector6<f64>> = basis.iter().map(|&k| duals[k]).collect();
        let tags: Vec<FacetId> = basis.iter().map(|&k| ids[k]).collect();
        let mut cone = dd::Cone::simplicial(&first, &tags)
            .ok_or_else(|| VisError::degenerate("initial constraints are not independent"))?;
        for (k, a) in duals.iter().enumerate() {
            if basis.contains(&k) {
                continue;
            }
            let dropped = cone.intersect(a, ids[k], self.tolerance);
            if dropped > 0 {
                let context = format!("{dropped} rays dropped while adding facet {}", ids[k]);
                tracing::warn!(%context, "non-finite value during initial build");
                sink.record(&DebugEvent::NumericOverflow { context });
            }
            if cone.rays.is_empty() {
                return Err(VisError::degenerate("no line stabs both query ends"));
            }
        }

        let mut vertices = Vec::with_capacity(cone.rays.len());
        for (ray, facets) in cone.rays.iter().zip(cone.zeros) {
            let line = self.prepare(PluckerLine::from_vector6(ray)?)?;
            let v = Vertex::new(line, facets, self.tolerance)?;
            sink.record(&DebugEvent::VertexClassified { quadric: v.quadric });
            vertices.push(v);
        }

        let mut polytope = PluckerPolytope::new(Polyhedron::from_facets(ids), vertices);
        polytope.compute_quadric_edges(self.tolerance)?;
        if !polytope.is_valid(arena, self.tolerance, self.normalize) {
            return Err(VisError::degenerate("initial polytope failed validation"));
        }
        tracing::debug!(
            source = pair.source.kind(),
            destination = pair.destination.kind(),
            vertices = polytope.vertices().len(),
            edges = polytope.edges().len(),
            facets = polytope.facet_count(),
            "initial polytope built"
        );
        sink.record(&DebugEvent::PolytopeBuilt {
            vertices: polytope.vertices().len(),
            edges: polytope.edges().len(),
            facets: polytope.facet_count(),
        });
        Ok(polytope)
    }

    /// Add the arena facet `facet` to `polytope` (one DD step).
    pub fn intersect_with_facet(
        &self,
        arena: &FacetArena,
        polytope: &PluckerPolytope,
        facet: FacetId,
        sink: &mut dyn DebugSink,
    ) -> Result<Intersection, VisError> {
        let a = arena.get(facet).plane.dual();
        let rays: Vec<Vector6<f64>> = polytope
            .vertices()
            .iter()
            .map(|v| v.line.to_vector6())
            .collect();
        let part = dd::partition(&rays, &a, self.tolerance);
        for &i in &part.dropped {
            let context = format!("vertex {i} against facet {facet}");
            tracing::warn!(%context, "non-finite side value; vertex dropped");
            sink.record(&DebugEvent::NumericOverflow { context });
        }
        if part.positive.is_empty() && (part.boundary.is_empty() || !part.negative.is_empty()) {
            return Ok(Intersection::Empty);
        }
        let crossing = if part.crosses() {
            dd::crossing_rays(&rays, &vertex_sets(polytope), &part, polytope.edges(), facet)
        } else {
            Vec::new()
        };
        let redundant = part.negative.is_empty();
        let child = self.child(polytope, facet, &part, crossing, sink)?;
        Ok(if redundant {
            Intersection::Unchanged(child)
        } else {
            Intersection::Valid(child)
        })
    }

    fn child(
        &self,
        parent: &PluckerPolytope,
        facet: FacetId,
        part: &dd::Partition,
        crossing: Vec<(Vector6<f64>, FacetSet)>,
        sink: &mut dyn DebugSink,
    ) -> Result<PluckerPolytope, VisError> {
        let mut keep: Vec<(usize, bool)> = part
            .positive
            .iter()
            .map(|&i| (i, false))
            .chain(part.boundary.iter().map(|&i| (i, true)))
            .collect();
        keep.sort_unstable();
        let mut vertices = Vec::with_capacity(keep.len() + crossing.len());
        for (i, tight) in keep {
            let mut v = parent.vertices()[i].clone();
            if tight {
                v.facets.insert(facet);
            }
            vertices.push(v);
        }
        for (x, facets) in crossing {
            let line = self.prepare(PluckerLine::from_vector6(&x)?)?;
            let v = Vertex::new(line, facets, self.tolerance)?;
            sink.record(&DebugEvent::VertexClassified { quadric: v.quadric });
            vertices.push(v);
        }
        let mut child = PluckerPolytope::new(parent.polyhedron().with_facet(facet), vertices);
        child.set_silhouettes(parent.silhouettes().clone());
        child.compute_quadric_edges(self.tolerance)?;
        Ok(child)
    }

    /// Split `polytope` by the hyperplane of `plane`.
    ///
    /// Facets are only pushed to the arena when the hyperplane actually cuts
    /// the polytope.
    pub fn split(
        &self,
        arena: &mut FacetArena,
        polytope: &PluckerPolytope,
        plane: PluckerLine,
        provenance: Provenance,
        depth: usize,
        sink: &mut dyn DebugSink,
    ) -> Result<SplitOutcome, VisError> {
        match polytope.relative_position(&plane, self.tolerance) {
            Position::Positive => return Ok(SplitOutcome::Positive),
            Position::Negative => return Ok(SplitOutcome::Negative),
            Position::Boundary => {}
        }
        let pos_id = arena.push(plane, provenance, false, self.normalize)?;
        let neg_id = arena.push(-plane, provenance, true, self.normalize)?;
        for facet in [pos_id, neg_id] {
            sink.record(&DebugEvent::FacetAdded { facet, provenance });
        }
        let positive = self.intersect_with_facet(arena, polytope, pos_id, sink)?;
        let negative = self.intersect_with_facet(arena, polytope, neg_id, sink)?;
        let (mut positive, mut negative) = match (positive, negative) {
            (Intersection::Empty, Intersection::Empty) => {
                return Err(VisError::overflow("split left no vertex on either side"))
            }
            (Intersection::Empty, _) => return Ok(SplitOutcome::Negative),
            (_, Intersection::Empty) => return Ok(SplitOutcome::Positive),
            (
                Intersection::Valid(p) | Intersection::Unchanged(p),
                Intersection::Valid(n) | Intersection::Unchanged(n),
            ) => (p, n),
        };
        let tol = self.tolerance;
        if !positive.is_valid(arena, tol, self.normalize)
            || !negative.is_valid(arena, tol, self.normalize)
        {
            return Err(VisError::overflow("split produced an inconsistent polytope"));
        }
        tracing::trace!(
            depth,
            positive = positive.vertices().len(),
            negative = negative.vertices().len(),
            "split"
        );
        sink.record(&DebugEvent::SplitPerformed {
            depth,
            positive: positive.vertices().len(),
            negative: negative.vertices().len(),
        });
        Ok(SplitOutcome::Split { positive, negative })
    }
}


fn vertex_sets(p: &PluckerPolytope) -> Vec<FacetSet> {
    p.vertices().iter().map(|v| v.facets.clone()).collect()
}

/// One half-space of the initial cone.
struct Constraint {
    plane: PluckerLine,
    provenance: Provenance,
    negated: bool,
}

#[derive(Clone, Copy, Debug)]
enum End {
    Source,
    Destination,
}

impl End {
    fn edge(self, i: usize) -> Provenance {
        match self {
            End::Source => Provenance::SourceEdge(i),
            End::Destination => Provenance::DestinationEdge(i),
        }
    }

    fn anchor(self, k: usize) -> Provenance {
        match self {
            End::Source => Provenance::SourceAnchor(k),
            End::Destination => Provenance::DestinationAnchor(k),
        }
    }

    /// Direction in which stabbing lines cross this end's carrier plane.
    fn crossing(self, plane: &Plane) -> Vector3<f64> {
        match self {
            End::Source => plane.n,
            End::Destination => -plane.n,
        }
    }
}

/// Half-spaces whose real lines are exactly the lines meeting `prim`.
///
/// - Polygon: its edges, oriented so that lines crossing the interior in the
///   stabbing direction are on the non-negative side.
/// - Segment: the edges of a carrier triangle built on it, plus the reversed
///   segment edge; the pair `±e` forces lines to meet the segment's line.
/// - Point: three lines of an orthonormal frame through it, each in both
///   orientations; lines meeting all three pass through the point.
fn end_constraints(prim: &Primitive, plane: &Plane, end: End) -> Result<Vec<Constraint>, VisError> {
    let dir = end.crossing(plane);
    let through = |w: Vector3<f64>| PluckerLine::from_points(&w, &(w + dir));
    match prim {
        Primitive::Polygon(poly) => {
            let reference = through(poly.centroid())?;
            edge_constraints(poly.edges(), &reference, end)
        }
        Primitive::Segment([p, q]) => {
            let r = (p + q) * 0.5 + plane.n.cross(&(q - p));
            let reference = through((p + q + r) / 3.0)?;
            let mut out = edge_constraints([(*p, *q), (*q, r), (r, *p)].into_iter(), &reference, end)?;
            let along = out[0].plane;
            out.push(Constraint {
                plane: -along,
                provenance: end.edge(0),
                negated: true,
            });
            Ok(out)
        }
        Primitive::Point(p) => {
            let (u, w) = orthonormal_pair(&plane.n);
            let mut out = Vec::with_capacity(6);
            for (k, axis) in [plane.n, u, w].into_iter().enumerate() {
                let l = PluckerLine::from_points(p, &(p + axis))?;
                for negated in [false, true] {
                    out.push(Constraint {
                        plane: if negated { -l } else { l },
                        provenance: end.anchor(k),
                        negated,
                    });
                }
            }
            Ok(out)
        }
    }
}

fn edge_constraints(
    edges: impl Iterator<Item = (Vector3<f64>, Vector3<f64>)>,
    reference: &PluckerLine,
    end: End,
) -> Result<Vec<Constraint>, VisError> {
    edges
        .enumerate()
        .map(|(i, (p, q))| {
            let e = PluckerLine::from_points(&p, &q)?;
            Ok(Constraint {
                plane: if reference.side(&e) < 0.0 { -e } else { e },
                provenance: end.edge(i),
                negated: false,
            })
        })
        .collect()
}

/// Two unit vectors completing `n` to an orthonormal frame.
fn orthonormal_pair(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let seed = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = n.cross(&seed).normalize();
    (u, n.cross(&u))
}

/// The half-spaces `K·(d·n_s) ± m·v ≥ 0`.
///
/// The edge constraints of both ends are all tight on the line `ℓ` shared by
/// the carrier planes (the line at infinity of their common direction when
/// they are parallel), so without these the cone would contain `±ℓ`. Here `v`
/// is the unit moment of `ℓ` and `K` is the largest `|m·v| / d·n_s` over the
/// lines joining the vertices of the two ends, widened by [`BOUND_SLACK`].
/// Every stabbing line is a positive combination of those lines and stays
/// inside. A tight `K` keeps the non-real part of the cone small, which spares
/// splits by occluder edges that no stabbing line crosses.
fn bound_constraints(pair: &SourcePair) -> Result<[Constraint; 2], VisError> {
    let (s, d) = (&pair.source_plane, &pair.destination_plane);
    let moment = s.n * d.c - d.n * s.c;
    let len = moment.norm();
    if !len.is_finite() || len <= PLANE_EPS {
        return Err(VisError::degenerate("carrier planes meet at the frame origin"));
    }
    let v = moment / len;
    let mut k: f64 = 0.0;
    for a in pair.source.vertices() {
        for b in pair.destination.vertices() {
            let g = PluckerLine::from_points(a, b)?;
            let along = g.direction().dot(&s.n);
            if along.is_nan() || along <= 0.0 {
                return Err(VisError::degenerate("destination is not in front of the source"));
            }
            k = k.max(g.moment().dot(&v).abs() / along);
        }
    }
    let k = if k > 0.0 { k * (1.0 + BOUND_SLACK) } else { 1.0 };
    let bound = |i: usize, sign: f64| -> Result<Constraint, VisError> {
        Ok(Constraint {
            plane: PluckerLine::new(v * sign, s.n * k)?,
            provenance: Provenance::Bound(i),
            negated: false,
        })
    };
    Ok([bound(0, 1.0)?, bound(1, -1.0)?])
}

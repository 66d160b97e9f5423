//! Half-space description of a branch: the facets constraining its lines.
//!
//! Purpose
//! - Keep every facet of a query in one append-only arena and let each branch
//!   reference an ordered list of arena ids.
//! - Branch copies are cheap: a frozen, shared prefix (`Arc<[FacetId]>`) plus an
//!   owned tail. Splitting never mutates the parent.
//!
//! A facet `h` is the half-space `{x : side(x, h) ≥ 0}`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::combinatorial::FacetId;
use crate::error::VisError;
use crate::plucker::{PluckerLine, Position, QuadricPosition};
use crate::silhouette::EdgeKey;

/// Where a facet came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Edge `i` of the (clipped) source polygon, or of the carrier triangle
    /// of a source segment.
    SourceEdge(usize),
    /// Edge `i` of the (clipped) destination polygon or carrier triangle.
    DestinationEdge(usize),
    /// Line `k` of the frame through a source point; comes in pairs.
    SourceAnchor(usize),
    /// Line `k` of the frame through a destination point.
    DestinationAnchor(usize),
    /// One of the two half-spaces cutting away the line shared by both
    /// carrier planes.
    Bound(usize),
    /// Silhouette edge of an occluder.
    Silhouette(EdgeKey),
}

/// Oriented half-space in line space.
#[derive(Clone, Copy, Debug)]
pub struct Facet {
    pub plane: PluckerLine,
    pub provenance: Provenance,
    /// `true` for the opposite half-space of the edge named by `provenance`.
    pub negated: bool,
    /// Whether the coefficients have been rescaled to unit magnitude.
    pub normalized: bool,
}

/// Per-query, append-only storage of facets.
#[derive(Clone, Debug, Default)]
pub struct FacetArena {
    facets: Vec<Facet>,
}

impl FacetArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a facet. With `normalize`, coefficients are rescaled first.
    pub fn push(
        &mut self,
        plane: PluckerLine,
        provenance: Provenance,
        negated: bool,
        normalize: bool,
    ) -> Result<FacetId, VisError> {
        let plane = if normalize { plane.normalized()? } else { plane };
        let id = FacetId(self.facets.len() as u32);
        self.facets.push(Facet {
            plane,
            provenance,
            negated,
            normalized: normalize,
        });
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: FacetId) -> &Facet {
        &self.facets[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// Rescale one facet to unit magnitude (idempotent).
    fn normalize_facet(&mut self, id: FacetId, tol: f64) -> Result<bool, VisError> {
        let facet = &mut self.facets[id.0 as usize];
        if facet.normalized {
            return Ok(false);
        }
        if facet.plane.norm() <= tol {
            return Err(VisError::degenerate(format!("facet {id} has zero magnitude")));
        }
        facet.plane = facet.plane.normalized()?;
        facet.normalized = true;
        Ok(true)
    }
}

/// Classification of one vertex against a polyhedron.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexClass {
    pub quadric: QuadricPosition,
    /// `Negative` if some facet is violated, `Boundary` if tight on one.
    pub feasibility: Position,
}

type LineKey = [u64; 6];

fn line_key(v: &PluckerLine) -> LineKey {
    let x = v.to_vector6();
    [
        x[0].to_bits(),
        x[1].to_bits(),
        x[2].to_bits(),
        x[3].to_bits(),
        x[4].to_bits(),
        x[5].to_bits(),
    ]
}

// Tails longer than this are folded into a fresh shared prefix on the next copy.
const FREEZE_TAIL: usize = 16;

/// Ordered facet ids of one branch.
#[derive(Clone, Debug)]
pub struct Polyhedron {
    prefix: Arc<[FacetId]>,
    tail: Vec<FacetId>,
    cache: HashMap<LineKey, VertexClass>,
}

impl Default for Polyhedron {
    fn default() -> Self {
        Self::from_facets(Vec::new())
    }
}

impl Polyhedron {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facets(ids: Vec<FacetId>) -> Self {
        Self {
            prefix: ids.into(),
            tail: Vec::new(),
            cache: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.prefix.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Facet ids in application order.
    pub fn facets(&self) -> impl Iterator<Item = FacetId> + '_ {
        self.prefix.iter().chain(self.tail.iter()).copied()
    }

    /// Append a facet and drop cached classifications.
    pub fn add_facet(&mut self, id: FacetId) {
        self.tail.push(id);
        self.cache.clear();
    }

    /// Copy-on-split: a child holding all of this polyhedron's facets plus `id`.
    pub fn with_facet(&self, id: FacetId) -> Self {
        let mut child = if self.tail.len() >= FREEZE_TAIL {
            let frozen: Vec<FacetId> = self.facets().collect();
            Self::from_facets(frozen)
        } else {
            Self {
                prefix: Arc::clone(&self.prefix),
                tail: self.tail.clone(),
                cache: HashMap::new(),
            }
        };
        child.add_facet(id);
        child
    }

    /// Whether two polyhedra share their frozen prefix storage.
    pub fn shares_prefix_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.prefix, &other.prefix)
    }

    /// Quadric tag and feasibility of `v`, cached per coordinate bit pattern.
    pub fn classify(
        &mut self,
        arena: &FacetArena,
        v: &PluckerLine,
        tol: f64,
    ) -> Result<VertexClass, VisError> {
        let key = line_key(v);
        if let Some(c) = self.cache.get(&key) {
            return Ok(*c);
        }
        let quadric = v.classify(tol)?;
        let mut feasibility = Position::Positive;
        for id in self.facets() {
            match v.position(&arena.get(id).plane, tol)? {
                Position::Negative => {
                    feasibility = Position::Negative;
                    break;
                }
                Position::Boundary => feasibility = Position::Boundary,
                Position::Positive => {}
            }
        }
        let class = VertexClass {
            quadric,
            feasibility,
        };
        self.cache.insert(key, class);
        Ok(class)
    }

    /// Quadric-relative position of `v`.
    pub fn classify_vertex(
        &mut self,
        arena: &FacetArena,
        v: &PluckerLine,
        tol: f64,
    ) -> Result<QuadricPosition, VisError> {
        Ok(self.classify(arena, v, tol)?.quadric)
    }

    pub fn feasibility(
        &mut self,
        arena: &FacetArena,
        v: &PluckerLine,
        tol: f64,
    ) -> Result<Position, VisError> {
        Ok(self.classify(arena, v, tol)?.feasibility)
    }

    /// Rescale this polyhedron's facets to unit magnitude; returns how many changed.
    ///
    /// Rescaling by a positive factor leaves each half-space unchanged, so
    /// sibling branches sharing a facet see the same constraint.
    pub fn normalize(&mut self, arena: &mut FacetArena, tol: f64) -> Result<usize, VisError> {
        let mut changed = 0;
        let ids: Vec<FacetId> = self.facets().collect();
        for id in ids {
            if arena.normalize_facet(id, tol)? {
                changed += 1;
            }
        }
        if changed > 0 {
            self.cache.clear();
        }
        Ok(changed)
    }

    /// Number of cached vertex classifications (for tests and stats).
    pub fn cached_classifications(&self) -> usize {
        self.cache.len()
    }
}

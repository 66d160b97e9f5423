//! Exact visibility between two convex polygons, segments or points.
//!
//! Lines are points of Plücker space. The set of lines stabbing two query ends
//! is the real part of a polyhedral cone there, so a visibility query refines
//! that cone by the silhouettes of whatever the scene puts between the ends
//! until a clear line is found or none is left.
//!
//! Layout
//! - `plucker`, `geometry`: lines, planes, polygons and query ends.
//! - `combinatorial`, `polyhedron`, `polytope`, `builder`: the cone and its splits.
//! - `scene`, `silhouette`: occluders and the sheets they form.
//! - `query`: the refinement loop; `sampling`: a Monte-Carlo cross-check.
//!
//! API Policy
//! - `api` is the curated surface for callers; module paths may move.

pub mod api;
pub mod builder;
pub(crate) mod cfg;
pub mod combinatorial;
pub mod debug;
pub mod error;
pub mod geometry;
pub mod plucker;
pub mod polyhedron;
pub mod polytope;
pub mod query;
pub mod sampling;
pub mod scene;
pub mod silhouette;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::VisError;
pub use query::{query_visibility, QueryCfg, Visibility, VisibilityQuery};

/// Common exports for quick imports in callers.
pub mod prelude {
    pub use crate::geometry::{ConvexPolygon, Plane, Primitive};
    pub use crate::plucker::PluckerLine;
    pub use crate::query::{
        query_visibility, InconclusiveReason, QueryCfg, QueryOutcome, Visibility, VisibilityQuery,
        Witness,
    };
    pub use crate::scene::{MeshScene, Scene, TriangleMesh};
    pub use crate::VisError;
    pub use nalgebra::{vector, Vector3 as Vec3};
}

//! Curated API for callers (UNSTABLE).
//!
//! Important
//! - Breaking changes are allowed; prefer these re-exports over deep module paths
//!   so moves inside the crate stay local.

// Lines and polygons
pub use crate::geometry::{shaft_planes, ConvexPolygon, Frame, Plane, Primitive, SourcePair};
pub use crate::plucker::{Position, PluckerLine, QuadricPosition};
// Stabbing-line polytopes
pub use crate::builder::{Intersection, PolytopeBuilder, SplitOutcome};
pub use crate::combinatorial::{FacetId, FacetSet};
pub use crate::polyhedron::{Facet, FacetArena, Polyhedron, Provenance, VertexClass};
pub use crate::polytope::{PluckerPolytope, Vertex};
// Occluders
pub use crate::scene::synth;
pub use crate::scene::{FaceRef, Hit, MeshScene, Ray, Scene, SceneError, SceneId, TriangleMesh};
pub use crate::silhouette::{
    EdgeKey, EdgeKind, PairKey, ProcessorCache, Silhouette, SilhouetteCache, SilhouetteEdge,
    SilhouetteId, SilhouetteProcessor,
};
// Queries
pub use crate::debug::{
    BranchResolution, DebugEvent, DebugSink, EdgeRejection, EventLog, NoopSink, StatsCollector,
    Tee,
};
pub use crate::query::{
    query_visibility, InconclusiveReason, QueryCfg, QueryOutcome, QueryState, QueryStats,
    Visibility, VisibilityQuery, Witness,
};
pub use crate::sampling::{sample_visibility, segment_is_clear, SampleReport, SamplingCfg};
pub use crate::VisError;

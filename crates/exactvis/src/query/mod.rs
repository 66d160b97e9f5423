//! Polygon-to-polygon visibility queries.
//!
//! The query builds the polytope of all lines stabbing both polygons and keeps
//! a work list of its pieces. A piece is refined by casting a ray along one of
//! its real lines: a clear ray proves visibility, a hit yields a silhouette
//! whose edges split the piece until the silhouette blocks all of it or none.
//! The answer is `Occluded` only when every piece ran out of real lines or is
//! blocked.

mod solver;
#[cfg(test)]
mod tests;
mod types;

pub use solver::{query_visibility, VisibilityQuery};
pub use types::{
    InconclusiveReason, QueryCfg, QueryOutcome, QueryState, QueryStats, Visibility, Witness,
};

//! Occluder silhouettes as seen from the lines between the query ends.
//!
//! A ray cast along a candidate line reports one hit face. The processor grows
//! that face into a *silhouette*: the connected faces that no line between
//! the polygons can see folded, clipped to the wedge between the source planes.
//! Whether a line's segment hits the sheet only changes when the line crosses
//! one of the sheet's boundary edges, so splitting a polytope by those edges
//! leaves cells on which the sheet either blocks every line or none.

mod processor;
mod types;

pub use processor::{PairKey, ProcessorCache, SilhouetteCache, SilhouetteProcessor};
pub use types::{EdgeKey, EdgeKind, Silhouette, SilhouetteEdge, SilhouetteId};

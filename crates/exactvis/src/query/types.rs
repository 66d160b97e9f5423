use std::fmt;
use std::time::Duration;

use nalgebra::Vector3;

use crate::cfg::{
    GUARD_BAND, MAX_FACET_COUNT, MAX_RECURSION_DEPTH, QUADRIC_EPS, SCENE_RETRIES,
};
use crate::plucker::PluckerLine;

/// Runtime knobs of a visibility query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryCfg {
    /// Relative tolerance for quadric and facet classification.
    pub quadric_tolerance: f64,
    /// Maximum number of splits along one branch.
    pub max_recursion_depth: usize,
    /// Maximum number of facets in one branch.
    pub max_facet_count: usize,
    /// Rescale facets and vertices to unit norm.
    pub enable_normalization: bool,
    /// Merge faces that act as one sheet into a single silhouette.
    pub silhouette_optimization: bool,
    /// Bound on the refinement phase.
    pub timeout: Option<Duration>,
    /// Retries of a ray query that failed transiently.
    pub scene_retries: usize,
    /// Guard band for mutual clipping of the query ends, relative to the
    /// pair's scale.
    pub guard_band: f64,
    /// Cast one interior line per branch. When off, every branch first casts
    /// its extremal lines (the lines on its boundary) and only falls back to
    /// the interior line when all of them are blocked.
    pub representative_line_sampling: bool,
}

impl Default for QueryCfg {
    fn default() -> Self {
        Self {
            quadric_tolerance: QUADRIC_EPS,
            max_recursion_depth: MAX_RECURSION_DEPTH,
            max_facet_count: MAX_FACET_COUNT,
            enable_normalization: true,
            silhouette_optimization: true,
            timeout: None,
            scene_retries: SCENE_RETRIES,
            guard_band: GUARD_BAND,
            representative_line_sampling: true,
        }
    }
}

/// An unobstructed segment between the query ends, in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Witness {
    /// Endpoint on the source.
    pub source: Vector3<f64>,
    /// Endpoint on the destination.
    pub destination: Vector3<f64>,
    /// Line through both endpoints, directed from the source.
    pub line: PluckerLine,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InconclusiveReason {
    RecursionDepth,
    FacetCount,
    Timeout,
    Cancelled,
    SceneFailure(String),
    Numeric(String),
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecursionDepth => write!(f, "recursion depth exceeded"),
            Self::FacetCount => write!(f, "facet count exceeded"),
            Self::Timeout => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SceneFailure(r) => write!(f, "scene failure: {r}"),
            Self::Numeric(r) => write!(f, "numeric failure: {r}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Visibility {
    Visible(Witness),
    Occluded,
    Inconclusive(InconclusiveReason),
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible(_))
    }

    pub fn is_occluded(&self) -> bool {
        matches!(self, Self::Occluded)
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            Self::Visible(w) => Some(w),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Visible(_) => "visible",
            Self::Occluded => "occluded",
            Self::Inconclusive(_) => "inconclusive",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Initialized,
    Building,
    Refining,
    Visible,
    Occluded,
    Inconclusive,
}

impl QueryState {
    pub(crate) fn of(v: &Visibility) -> Self {
        match v {
            Visibility::Visible(_) => Self::Visible,
            Visibility::Occluded => Self::Occluded,
            Visibility::Inconclusive(_) => Self::Inconclusive,
        }
    }
}

/// Counters of one query run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub branches: usize,
    pub splits: usize,
    pub max_depth: usize,
    pub rays_cast: usize,
    pub scene_retries: usize,
    /// Distinct silhouettes applied to at least one branch.
    pub silhouettes: usize,
    pub silhouette_applications: usize,
    pub facets: usize,
    pub initial_vertices: usize,
    pub empty_branches: usize,
    pub occluded_branches: usize,
    pub aborted_branches: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryOutcome {
    pub visibility: Visibility,
    pub state: QueryState,
    pub stats: QueryStats,
}

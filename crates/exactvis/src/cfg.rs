//! Shared numeric tolerances for the line-space engine.
//!
//! All tolerances are *relative*: callers scale them by the magnitude of the
//! operands (see `plucker::relative_position`). Runtime knobs live in
//! `query::QueryCfg`; these are the defaults and the internal constants that
//! are not worth exposing.

/// Default relative tolerance for quadric (real-line) classification.
pub(crate) const QUADRIC_EPS: f64 = 1e-9;

/// Two 3D points closer than this (relative to their magnitude) are coincident.
pub(crate) const POINT_EPS: f64 = 1e-12;

/// Relative tolerance for 3D plane distances (clipping, wedge and shaft tests).
pub(crate) const PLANE_EPS: f64 = 1e-9;

/// Default guard band used when clipping a query polygon by the other's plane.
pub(crate) const GUARD_BAND: f64 = 1e-9;

/// Rank tolerance used when selecting independent lines for the initial cone.
pub(crate) const RANK_EPS: f64 = 1e-10;

/// Relative widening of the two bound facets of the initial cone.
pub(crate) const BOUND_SLACK: f64 = 1e-3;

/// Trim at both ends of a witness segment before ray casting, as a fraction of
/// its length; keeps the source polygons themselves out of the hit test.
pub(crate) const RAY_TRIM: f64 = 1e-7;

/// Dimension of the ambient space of Plücker coordinates.
pub(crate) const PLUCKER_DIM: usize = 6;

/// Default bound on refinement depth (splits along one branch).
pub(crate) const MAX_RECURSION_DEPTH: usize = 200;

/// Default bound on the number of facets in one branch's polyhedron.
pub(crate) const MAX_FACET_COUNT: usize = 512;

/// Default number of retries for transient scene failures.
pub(crate) const SCENE_RETRIES: usize = 3;

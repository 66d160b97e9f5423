//! Plücker lines and the numeric predicates every branch depends on.
//!
//! Purpose
//! - Represent a 3D line as a point of R⁶ (direction `d`, moment `m`) so that
//!   "line `x` passes on a given side of line `h`" becomes the linear predicate
//!   `side(x, h) ≥ 0`.
//! - Provide the quadric test separating real lines (`d·m = 0`) from the rest of
//!   projective 5-space.
//!
//! Conventions
//! - A line through `p` then `q` has `d = q − p`, `m = p × q`; the orientation is
//!   part of the representation (`-x` is the same line reversed).
//! - `side(a, b) = a.d·b.m + a.m·b.d` (the permuted inner product). It vanishes
//!   iff the two lines are coplanar.
//! - All sign tests use a tolerance relative to the operand magnitudes, so every
//!   classification is invariant under positive rescaling.

use std::ops::Neg;

use nalgebra::{Vector3, Vector6};

use crate::cfg::POINT_EPS;
use crate::error::VisError;
use crate::geometry::Plane;

/// Sign of a value against a tolerance band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    Negative,
    Positive,
    Boundary,
}

/// Position of a Plücker point relative to the quadric of real lines.
///
/// `Inside` is the `d·m < 0` side, `Outside` the `d·m > 0` side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuadricPosition {
    Inside,
    Outside,
    On,
}

impl QuadricPosition {
    /// The opposite strict side; `On` maps to itself.
    pub fn opposite(self) -> Self {
        match self {
            Self::Inside => Self::Outside,
            Self::Outside => Self::Inside,
            Self::On => Self::On,
        }
    }
}

/// Classify `value` against the symmetric band `[-eps, eps]`.
#[inline]
pub fn relative_position(value: f64, eps: f64) -> Position {
    if value < -eps {
        Position::Negative
    } else if value > eps {
        Position::Positive
    } else {
        Position::Boundary
    }
}

/// Sign-bit comparison; `0.0` and `-0.0` differ.
#[inline]
pub fn same_sign(a: f64, b: f64) -> bool {
    a.is_sign_negative() == b.is_sign_negative()
}

#[inline]
pub fn is_finite(v: &Vector3<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// A line in Plücker coordinates. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PluckerLine {
    d: Vector3<f64>,
    m: Vector3<f64>,
}

impl PluckerLine {
    /// Build from raw coordinates. Non-finite input is rejected.
    pub fn new(d: Vector3<f64>, m: Vector3<f64>) -> Result<Self, VisError> {
        if !is_finite(&d) || !is_finite(&m) {
            return Err(VisError::overflow("building a Plücker line"));
        }
        Ok(Self { d, m })
    }

    /// Oriented line through `p` then `q`.
    pub fn from_points(p: &Vector3<f64>, q: &Vector3<f64>) -> Result<Self, VisError> {
        if !is_finite(p) || !is_finite(q) {
            return Err(VisError::overflow("building a line through a non-finite point"));
        }
        let d = q - p;
        let scale = 1f64.max(p.norm()).max(q.norm());
        if d.norm() <= POINT_EPS * scale {
            return Err(VisError::degenerate(format!(
                "line through coincident points {:?}",
                p.as_slice()
            )));
        }
        Self::new(d, p.cross(q))
    }

    pub fn from_vector6(v: &Vector6<f64>) -> Result<Self, VisError> {
        Self::new(
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        )
    }

    pub fn to_vector6(&self) -> Vector6<f64> {
        Vector6::new(
            self.d.x, self.d.y, self.d.z, self.m.x, self.m.y, self.m.z,
        )
    }

    /// Euclidean vector `h` with `⟨x, h⟩ = side(x, self)` for every `x`.
    pub fn dual(&self) -> Vector6<f64> {
        Vector6::new(
            self.m.x, self.m.y, self.m.z, self.d.x, self.d.y, self.d.z,
        )
    }

    /// Inverse of [`PluckerLine::dual`].
    pub fn from_dual(h: &Vector6<f64>) -> Result<Self, VisError> {
        Self::new(
            Vector3::new(h[3], h[4], h[5]),
            Vector3::new(h[0], h[1], h[2]),
        )
    }

    #[inline]
    pub fn direction(&self) -> &Vector3<f64> {
        &self.d
    }

    #[inline]
    pub fn moment(&self) -> &Vector3<f64> {
        &self.m
    }

    /// `wa·a + wb·b`, the interpolation used when a facet cuts an edge.
    pub fn combine(a: &Self, wa: f64, b: &Self, wb: f64) -> Result<Self, VisError> {
        let line = Self {
            d: a.d * wa + b.d * wb,
            m: a.m * wa + b.m * wb,
        };
        if !line.is_finite() {
            return Err(VisError::overflow("interpolating two lines"));
        }
        Ok(line)
    }

    /// Permuted inner product.
    #[inline]
    pub fn side(&self, other: &Self) -> f64 {
        self.d.dot(&other.m) + self.m.dot(&other.d)
    }

    /// `side(self, self) = 2 d·m`; zero exactly for real lines.
    #[inline]
    pub fn quadric(&self) -> f64 {
        2.0 * self.d.dot(&self.m)
    }

    #[inline]
    pub fn norm_squared(&self) -> f64 {
        self.d.norm_squared() + self.m.norm_squared()
    }

    #[inline]
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Projection onto the unit hypersphere of R⁶.
    pub fn normalized(&self) -> Result<Self, VisError> {
        let n = self.norm();
        if !n.is_finite() {
            return Err(VisError::overflow("normalizing a line"));
        }
        if n <= 0.0 {
            return Err(VisError::degenerate("normalizing the zero line"));
        }
        Ok(Self {
            d: self.d / n,
            m: self.m / n,
        })
    }

    pub fn is_normalized(&self, tol: f64) -> bool {
        (self.norm() - 1.0).abs() <= tol
    }

    pub fn is_finite(&self) -> bool {
        is_finite(&self.d) && is_finite(&self.m)
    }

    /// Quadric position with the tolerance scaled by `|self|²`.
    pub fn classify(&self, tol: f64) -> Result<QuadricPosition, VisError> {
        let q = self.quadric();
        let scale = self.norm_squared();
        if !q.is_finite() || !scale.is_finite() {
            return Err(VisError::overflow("classifying a line against the quadric"));
        }
        Ok(match relative_position(q, tol * scale) {
            Position::Negative => QuadricPosition::Inside,
            Position::Positive => QuadricPosition::Outside,
            Position::Boundary => QuadricPosition::On,
        })
    }

    /// Sign of `side(self, hyperplane)` with the tolerance scaled by both norms.
    pub fn position(&self, hyperplane: &Self, tol: f64) -> Result<Position, VisError> {
        let s = self.side(hyperplane);
        let scale = self.norm() * hyperplane.norm();
        if !s.is_finite() || !scale.is_finite() {
            return Err(VisError::overflow("classifying a line against a facet"));
        }
        Ok(relative_position(s, tol * scale))
    }

    /// Point of the line closest to the origin; `None` for lines at infinity.
    pub fn anchor(&self) -> Option<Vector3<f64>> {
        let dd = self.d.norm_squared();
        if dd <= f64::MIN_POSITIVE {
            return None;
        }
        let p = self.d.cross(&self.m) / dd;
        is_finite(&p).then_some(p)
    }

    /// Intersection with a plane; `None` when (nearly) parallel.
    pub fn intersect_plane(&self, plane: &Plane) -> Option<Vector3<f64>> {
        let p0 = self.anchor()?;
        let nd = plane.n.dot(&self.d);
        if nd.abs() <= POINT_EPS * plane.n.norm() * self.d.norm() {
            return None;
        }
        let t = -plane.signed_distance(&p0) / nd;
        let x = p0 + self.d * t;
        is_finite(&x).then_some(x)
    }

    /// Nearest real line (point of the quadric) in the Euclidean sense of R⁶.
    pub fn projected_on_quadric(&self) -> Result<Self, VisError> {
        let p = self.d.dot(&self.m);
        let q = self.norm_squared();
        if q <= 0.0 {
            return Err(VisError::degenerate("projecting the zero line"));
        }
        let disc = (q * q - 4.0 * p * p).max(0.0);
        let mu = 2.0 * p / (q + disc.sqrt());
        Self::new(self.d - self.m * mu, self.m - self.d * mu)
    }
}

impl Neg for PluckerLine {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            d: -self.d,
            m: -self.m,
        }
    }
}

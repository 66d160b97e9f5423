//! 3D primitives around the line-space core: planes, convex polygons and the
//! point/segment/polygon query ends, clipping, local frames, the shaft hull,
//! and segment/triangle tests.
//!
//! Conventions
//! - `Plane { n, c }` is the set `n·x = c`; `signed_distance(p) = n·p − c`.
//! - Polygons are convex and planar; their winding defines `normal()` (Newell).
//! - Tolerances are relative to the polygon scale (`PLANE_EPS · scale`).

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::cfg::{PLANE_EPS, POINT_EPS};
use crate::combinatorial::combinations;
use crate::error::VisError;
use crate::plucker::{is_finite, PluckerLine};

/// Plane `n·x = c`. `n` is not required to be unit length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub n: Vector3<f64>,
    pub c: f64,
}

impl Plane {
    #[inline]
    pub fn new(n: Vector3<f64>, c: f64) -> Self {
        Self { n, c }
    }

    /// Plane through three points with normal `(b − a) × (c − a)`, unit length.
    pub fn from_points(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Option<Self> {
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        let scale = (b - a).norm().max((c - a).norm()).max((c - b).norm());
        if !len.is_finite() || len <= POINT_EPS * scale * scale {
            return None;
        }
        let n = n / len;
        Some(Self { n, c: n.dot(a) })
    }

    #[inline]
    pub fn signed_distance(&self, p: &Vector3<f64>) -> f64 {
        self.n.dot(p) - self.c
    }

    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            n: -self.n,
            c: -self.c,
        }
    }
}

/// Convex planar polygon with at least three vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexPolygon {
    vertices: Vec<Vector3<f64>>,
    normal: Vector3<f64>,
    scale: f64,
}

impl ConvexPolygon {
    /// Validate and wrap a vertex loop.
    ///
    /// Rejects (as `DegenerateInput`): fewer than three vertices, non-finite
    /// coordinates, coincident consecutive vertices, zero area, non-planar or
    /// non-convex loops. `NumericOverflow` is reserved for values that become
    /// non-finite during later computation.
    pub fn new(vertices: Vec<Vector3<f64>>) -> Result<Self, VisError> {
        if vertices.len() < 3 {
            return Err(VisError::degenerate(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if !vertices.iter().all(is_finite) {
            return Err(VisError::degenerate("polygon has non-finite coordinates"));
        }
        let center = centroid_of(&vertices);
        let scale = vertices
            .iter()
            .map(|v| (v - center).norm())
            .fold(0.0, f64::max);
        let n = vertices.len();
        for i in 0..n {
            let e = vertices[(i + 1) % n] - vertices[i];
            if e.norm() <= POINT_EPS * 1f64.max(scale).max(vertices[i].norm()) {
                return Err(VisError::degenerate(format!(
                    "polygon has coincident vertices at index {i}"
                )));
            }
        }
        let newell = newell_normal(&vertices);
        let area2 = newell.norm();
        if area2 <= PLANE_EPS * scale * scale {
            return Err(VisError::degenerate("polygon has zero area"));
        }
        let normal = newell / area2;
        let offset = normal.dot(&center);
        if vertices
            .iter()
            .any(|v| (normal.dot(v) - offset).abs() > PLANE_EPS * 1e3 * scale.max(1.0))
        {
            return Err(VisError::degenerate("polygon is not planar"));
        }
        for i in 0..n {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            let c = vertices[(i + 2) % n];
            let turn = (b - a).cross(&(c - b)).dot(&normal);
            if turn < -PLANE_EPS * scale * scale {
                return Err(VisError::degenerate(format!(
                    "polygon is not convex at vertex {}",
                    (i + 1) % n
                )));
            }
        }
        Ok(Self {
            vertices,
            normal,
            scale,
        })
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Unit normal following the winding.
    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    /// Largest distance from the vertex centroid; the unit for relative tolerances.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn centroid(&self) -> Vector3<f64> {
        centroid_of(&self.vertices)
    }

    pub fn plane(&self) -> Plane {
        Plane::new(self.normal, self.normal.dot(&self.vertices[0]))
    }

    pub fn area(&self) -> f64 {
        0.5 * newell_normal(&self.vertices).norm()
    }

    /// Edges `(v_i, v_{i+1})` in winding order.
    pub fn edges(&self) -> impl Iterator<Item = (Vector3<f64>, Vector3<f64>)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    /// Point-in-polygon with a tolerance relative to the polygon scale.
    pub fn contains_point(&self, p: &Vector3<f64>, tol: f64) -> bool {
        let eps = tol * self.scale.max(1.0);
        if self.plane().signed_distance(p).abs() > eps {
            return false;
        }
        self.edges()
            .all(|(a, b)| (b - a).cross(&(p - a)).dot(&self.normal) >= -eps * self.scale.max(1.0))
    }

    /// Part of the polygon with `signed_distance ≥ guard`; `None` if it degenerates.
    pub fn clip(&self, plane: &Plane, guard: f64) -> Option<ConvexPolygon> {
        let kept = clip_polygon(&self.vertices, plane, guard);
        let kept = dedup_loop(kept, POINT_EPS * self.scale.max(1.0) * 1e3);
        ConvexPolygon::new(kept).ok()
    }

    /// Image under the world-to-local map of `frame`. Similarities keep a
    /// valid polygon valid, so the loop is not re-checked.
    fn mapped(&self, frame: &Frame) -> ConvexPolygon {
        ConvexPolygon {
            vertices: self.vertices.iter().map(|v| frame.to_local(v)).collect(),
            normal: self.normal,
            scale: self.scale / frame.scale,
        }
    }
}

/// One end of a query: a point, a segment or a convex polygon.
#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Point(Vector3<f64>),
    Segment([Vector3<f64>; 2]),
    Polygon(ConvexPolygon),
}

impl Primitive {
    pub fn point(p: Vector3<f64>) -> Result<Self, VisError> {
        if !is_finite(&p) {
            return Err(VisError::degenerate("point has non-finite coordinates"));
        }
        Ok(Self::Point(p))
    }

    pub fn segment(p: Vector3<f64>, q: Vector3<f64>) -> Result<Self, VisError> {
        if !is_finite(&p) || !is_finite(&q) {
            return Err(VisError::degenerate("segment has non-finite coordinates"));
        }
        if (q - p).norm() <= POINT_EPS * 1f64.max(p.norm()).max(q.norm()) {
            return Err(VisError::degenerate("segment has coincident endpoints"));
        }
        Ok(Self::Segment([p, q]))
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        match self {
            Self::Point(p) => std::slice::from_ref(p),
            Self::Segment(s) => &s[..],
            Self::Polygon(poly) => poly.vertices(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Point(_) => "point",
            Self::Segment(_) => "segment",
            Self::Polygon(_) => "polygon",
        }
    }

    pub fn as_polygon(&self) -> Option<&ConvexPolygon> {
        match self {
            Self::Polygon(poly) => Some(poly),
            _ => None,
        }
    }

    pub fn centroid(&self) -> Vector3<f64> {
        centroid_of(self.vertices())
    }

    /// Largest distance from the centroid; zero for a point.
    pub fn scale(&self) -> f64 {
        match self {
            Self::Point(_) => 0.0,
            Self::Segment([p, q]) => 0.5 * (q - p).norm(),
            Self::Polygon(poly) => poly.scale(),
        }
    }

    /// Whether `p` lies on the primitive, tolerance relative to its scale.
    pub fn contains_point(&self, p: &Vector3<f64>, tol: f64) -> bool {
        match self {
            Self::Point(a) => (p - a).norm() <= tol * 1f64.max(a.norm()),
            Self::Segment([a, b]) => {
                let d = b - a;
                let t = (p - a).dot(&d) / d.norm_squared();
                let eps = tol * d.norm().max(1.0);
                (-eps..=1.0 + eps).contains(&t) && (a + d * t - p).norm() <= eps
            }
            Self::Polygon(poly) => poly.contains_point(p, tol),
        }
    }

    /// Part with `signed_distance ≥ guard`; `None` if nothing non-degenerate is left.
    pub fn clip(&self, plane: &Plane, guard: f64) -> Option<Self> {
        match self {
            Self::Point(p) => (plane.signed_distance(p) >= guard).then_some(Self::Point(*p)),
            Self::Segment([p, q]) => {
                let dp = plane.signed_distance(p) - guard;
                let dq = plane.signed_distance(q) - guard;
                let cut = |t: f64| p + (q - p) * t;
                let (a, b) = match (dp >= 0.0, dq >= 0.0) {
                    (true, true) => (*p, *q),
                    (false, false) => return None,
                    (true, false) => (*p, cut(dp / (dp - dq))),
                    (false, true) => (cut(dp / (dp - dq)), *q),
                };
                Self::segment(a, b).ok()
            }
            Self::Polygon(poly) => poly.clip(plane, guard).map(Self::Polygon),
        }
    }

    /// Supporting plane oriented toward `other`.
    ///
    /// A polygon uses its own plane. A point uses the plane through it facing
    /// the centroid of `other`; a segment the plane through it whose normal is
    /// the part of that direction orthogonal to the segment.
    pub fn carrier_plane(&self, other: &Primitive) -> Result<Plane, VisError> {
        let target = other.centroid();
        let scale = self.scale().max(other.scale()).max(1.0);
        match self {
            Self::Polygon(poly) => facing_plane(poly, other),
            Self::Point(p) => {
                let t = target - p;
                if t.norm() <= PLANE_EPS * scale {
                    return Err(VisError::degenerate("query point lies on the other primitive"));
                }
                let n = t.normalize();
                Ok(Plane::new(n, n.dot(p)))
            }
            Self::Segment([p, q]) => {
                let e = (q - p).normalize();
                let t = target - (p + q) * 0.5;
                let n = t - e * e.dot(&t);
                if n.norm() <= PLANE_EPS * scale.max(t.norm()) {
                    return Err(VisError::degenerate(
                        "segment is aligned with the other primitive",
                    ));
                }
                let n = n.normalize();
                Ok(Plane::new(n, n.dot(p)))
            }
        }
    }

    fn mapped(&self, frame: &Frame) -> Self {
        match self {
            Self::Point(p) => Self::Point(frame.to_local(p)),
            Self::Segment([p, q]) => Self::Segment([frame.to_local(p), frame.to_local(q)]),
            Self::Polygon(poly) => Self::Polygon(poly.mapped(frame)),
        }
    }
}

impl From<ConvexPolygon> for Primitive {
    fn from(poly: ConvexPolygon) -> Self {
        Self::Polygon(poly)
    }
}

impl From<&ConvexPolygon> for Primitive {
    fn from(poly: &ConvexPolygon) -> Self {
        Self::Polygon(poly.clone())
    }
}

impl From<&Primitive> for Primitive {
    fn from(p: &Primitive) -> Self {
        p.clone()
    }
}

/// Similarity `x = origin + scale·y` between world and local coordinates.
///
/// Line-space arithmetic runs in the local frame of a query pair so that
/// moments stay of the order of the pair's size whatever its distance from
/// the world origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub origin: Vector3<f64>,
    pub scale: f64,
}

impl Default for Frame {
    fn default() -> Self {
        Self::identity()
    }
}

impl Frame {
    pub fn identity() -> Self {
        Self {
            origin: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Centered between the two centroids, scaled to the farthest vertex.
    pub fn around(source: &Primitive, destination: &Primitive) -> Self {
        let origin = (source.centroid() + destination.centroid()) * 0.5;
        let radius = source
            .vertices()
            .iter()
            .chain(destination.vertices())
            .map(|v| (v - origin).norm())
            .fold(0.0, f64::max);
        let scale = if radius.is_finite() && radius > 0.0 { radius } else { 1.0 };
        Self { origin, scale }
    }

    #[inline]
    pub fn to_local(&self, p: &Vector3<f64>) -> Vector3<f64> {
        (p - self.origin) / self.scale
    }

    #[inline]
    pub fn to_world(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.origin + p * self.scale
    }

    /// Same plane in local coordinates; the normal is unchanged.
    pub fn plane_to_local(&self, plane: &Plane) -> Plane {
        Plane::new(plane.n, (plane.c - plane.n.dot(&self.origin)) / self.scale)
    }

    /// Oriented line through two world points, in local coordinates.
    pub fn line(&self, p: &Vector3<f64>, q: &Vector3<f64>) -> Result<PluckerLine, VisError> {
        PluckerLine::from_points(&self.to_local(p), &self.to_local(q))
    }
}

/// The query pair after mutual clipping, with carrier planes facing each other.
#[derive(Clone, Debug)]
pub struct SourcePair {
    pub source: Primitive,
    pub destination: Primitive,
    /// Carrier plane of the source, oriented so the destination lies in front.
    pub source_plane: Plane,
    /// Carrier plane of the destination, oriented so the source lies in front.
    pub destination_plane: Plane,
    /// Frame the line-space work runs in.
    pub frame: Frame,
}

impl SourcePair {
    /// Clip each primitive against the other's carrier plane, keeping the side
    /// that holds most of it, with a guard band of `guard · scale`.
    pub fn new(
        source: impl Into<Primitive>,
        destination: impl Into<Primitive>,
        guard: f64,
    ) -> Result<Self, VisError> {
        let (source, destination) = (source.into(), destination.into());
        let dest_plane = destination.carrier_plane(&source)?;
        let src_plane = source.carrier_plane(&destination)?;
        let scale = source.scale().max(destination.scale()).max(1.0);
        let clipped_source = source.clip(&dest_plane, guard * scale).ok_or_else(|| {
            VisError::degenerate(format!(
                "source {} has nothing in front of destination",
                source.kind()
            ))
        })?;
        let clipped_destination = destination.clip(&src_plane, guard * scale).ok_or_else(|| {
            VisError::degenerate(format!(
                "destination {} has nothing in front of source",
                destination.kind()
            ))
        })?;
        let frame = Frame::around(&clipped_source, &clipped_destination);
        Ok(Self {
            source_plane: src_plane,
            destination_plane: dest_plane,
            source: clipped_source,
            destination: clipped_destination,
            frame,
        })
    }

    pub fn scale(&self) -> f64 {
        self.source.scale().max(self.destination.scale()).max(1.0)
    }

    /// The pair expressed in its own frame; the result has the identity frame.
    pub fn to_local(&self) -> SourcePair {
        let f = &self.frame;
        SourcePair {
            source: self.source.mapped(f),
            destination: self.destination.mapped(f),
            source_plane: f.plane_to_local(&self.source_plane),
            destination_plane: f.plane_to_local(&self.destination_plane),
            frame: Frame::identity(),
        }
    }
}

/// Plane of `poly` oriented toward the far side of `other`.
fn facing_plane(poly: &ConvexPolygon, other: &Primitive) -> Result<Plane, VisError> {
    let plane = poly.plane();
    let far = other
        .vertices()
        .iter()
        .map(|v| plane.signed_distance(v))
        .fold(0.0, |acc: f64, d| if d.abs() > acc.abs() { d } else { acc });
    let scale = poly.scale().max(other.scale()).max(1.0);
    if far.abs() <= PLANE_EPS * scale {
        return Err(VisError::degenerate(format!(
            "query polygon is coplanar with the other {}",
            other.kind()
        )));
    }
    Ok(if far < 0.0 { plane.flipped() } else { plane })
}

/// Sutherland–Hodgman against one plane, keeping `signed_distance ≥ guard`.
pub fn clip_polygon(points: &[Vector3<f64>], plane: &Plane, guard: f64) -> Vec<Vector3<f64>> {
    let n = points.len();
    let mut out = Vec::with_capacity(n + 1);
    for i in 0..n {
        let cur = points[i];
        let next = points[(i + 1) % n];
        let dc = plane.signed_distance(&cur) - guard;
        let dn = plane.signed_distance(&next) - guard;
        if dc >= 0.0 {
            out.push(cur);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            let t = dc / (dc - dn);
            out.push(cur + (next - cur) * t);
        }
    }
    out
}

/// Area of a planar loop (half the Newell normal length).
pub fn polygon_area(points: &[Vector3<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    0.5 * newell_normal(points).norm()
}

fn newell_normal(points: &[Vector3<f64>]) -> Vector3<f64> {
    let n = points.len();
    let mut acc = Vector3::zeros();
    for i in 0..n {
        acc += points[i].cross(&points[(i + 1) % n]);
    }
    acc
}

pub(crate) fn centroid_of(points: &[Vector3<f64>]) -> Vector3<f64> {
    let sum = points.iter().fold(Vector3::zeros(), |acc, p| acc + p);
    sum / points.len().max(1) as f64
}

fn dedup_loop(mut points: Vec<Vector3<f64>>, tol: f64) -> Vec<Vector3<f64>> {
    points.dedup_by(|a, b| (*a - *b).norm() <= tol);
    while points.len() > 1 {
        let (first, last) = (points[0], points[points.len() - 1]);
        if (first - last).norm() <= tol {
            points.pop();
        } else {
            break;
        }
    }
    points
}

/// Outward planes of the convex hull of two point sets (the shaft between the
/// query ends). Brute force over point triples; duplicates removed.
pub fn shaft_planes(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> Vec<Plane> {
    let points: Vec<Vector3<f64>> = a.iter().chain(b.iter()).copied().collect();
    let scale = {
        let c = centroid_of(&points);
        points.iter().map(|p| (p - c).norm()).fold(1.0, f64::max)
    };
    let eps = PLANE_EPS * scale;
    let idxs: Vec<usize> = (0..points.len()).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for comb in combinations(&idxs, 3) {
        let Some(plane) = Plane::from_points(&points[comb[0]], &points[comb[1]], &points[comb[2]])
        else {
            continue;
        };
        let (mut above, mut below) = (false, false);
        for p in &points {
            let d = plane.signed_distance(p);
            above |= d > eps;
            below |= d < -eps;
        }
        let plane = match (above, below) {
            (false, true) => plane,
            (true, false) => plane.flipped(),
            _ => continue,
        };
        if seen.insert(quantize_plane(&plane, 1e-9)) {
            out.push(plane);
        }
    }
    out
}

fn quantize_plane(p: &Plane, tol: f64) -> (i64, i64, i64, i64) {
    let s = 1.0 / tol;
    (
        (p.n.x * s).round() as i64,
        (p.n.y * s).round() as i64,
        (p.n.z * s).round() as i64,
        (p.c * s).round() as i64,
    )
}

/// Möller–Trumbore, two-sided. Returns the ray parameter in `[t_min, t_max]`.
pub fn segment_triangle(
    origin: &Vector3<f64>,
    dir: &Vector3<f64>,
    tri: &[Vector3<f64>; 3],
    t_min: f64,
    t_max: f64,
) -> Option<f64> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    let scale = e1.norm() * e2.norm() * dir.norm();
    if det.abs() <= 1e-14 * scale {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(&p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv;
    (t >= t_min && t <= t_max).then_some(t)
}

/// Bounding sphere `(center, radius)` of a segment.
#[inline]
pub fn bounding_sphere(p: &Vector3<f64>, q: &Vector3<f64>) -> (Vector3<f64>, f64) {
    ((p + q) * 0.5, (q - p).norm() * 0.5)
}

//! Synthetic query polygons and occluders.
//!
//! Everything here is axis-aligned in the xy-plane at a given height unless
//! stated otherwise; sizes are half-extents.

use std::f64::consts::TAU;

use nalgebra::{vector, Vector3};
use rand::Rng;

use super::TriangleMesh;
use crate::error::VisError;
use crate::geometry::ConvexPolygon;

/// Regular `n`-gon of circumradius `radius` around `center`, counter-clockwise
/// seen from +z.
pub fn regular_polygon(center: Vector3<f64>, radius: f64, n: usize) -> Result<ConvexPolygon, VisError> {
    let vertices = (0..n)
        .map(|k| {
            let a = TAU * k as f64 / n as f64;
            center + vector![radius * a.cos(), radius * a.sin(), 0.0]
        })
        .collect();
    ConvexPolygon::new(vertices)
}

/// Square with half-extent `half` around `center`.
pub fn square(center: Vector3<f64>, half: f64) -> Result<ConvexPolygon, VisError> {
    ConvexPolygon::new(square_corners(center, half, half).to_vec())
}

fn square_corners(c: Vector3<f64>, hx: f64, hy: f64) -> [Vector3<f64>; 4] {
    [
        c + vector![-hx, -hy, 0.0],
        c + vector![hx, -hy, 0.0],
        c + vector![hx, hy, 0.0],
        c + vector![-hx, hy, 0.0],
    ]
}

/// Axis-aligned rectangle as two triangles sharing the diagonal.
pub fn quad(center: Vector3<f64>, half_x: f64, half_y: f64) -> Result<TriangleMesh, VisError> {
    TriangleMesh::new(
        square_corners(center, half_x, half_y).to_vec(),
        vec![[0, 1, 2], [0, 2, 3]],
    )
}

/// Square subdivided into `n × n` cells of two triangles each.
pub fn grid(center: Vector3<f64>, half: f64, n: usize) -> Result<TriangleMesh, VisError> {
    if n == 0 {
        return Err(VisError::degenerate("grid with zero cells"));
    }
    let step = 2.0 * half / n as f64;
    let mut vertices = Vec::with_capacity((n + 1) * (n + 1));
    for j in 0..=n {
        for i in 0..=n {
            vertices.push(center + vector![-half + i as f64 * step, -half + j as f64 * step, 0.0]);
        }
    }
    let idx = |i: usize, j: usize| (j * (n + 1) + i) as u32;
    let mut faces = Vec::with_capacity(2 * n * n);
    for j in 0..n {
        for i in 0..n {
            let (a, b, c, d) = (idx(i, j), idx(i + 1, j), idx(i + 1, j + 1), idx(i, j + 1));
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    TriangleMesh::new(vertices, faces)
}

/// Closed axis-aligned cube, outward-facing triangles.
pub fn cube(center: Vector3<f64>, half: f64) -> Result<TriangleMesh, VisError> {
    let h = half;
    let vertices = vec![
        center + vector![-h, -h, -h],
        center + vector![h, -h, -h],
        center + vector![h, h, -h],
        center + vector![-h, h, -h],
        center + vector![-h, -h, h],
        center + vector![h, -h, h],
        center + vector![h, h, h],
        center + vector![-h, h, h],
    ];
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [1, 2, 6],
        [1, 6, 5],
        [2, 3, 7],
        [2, 7, 6],
        [3, 0, 4],
        [3, 4, 7],
    ];
    TriangleMesh::new(vertices, faces)
}

/// Square frame of half-extent `outer` with a centered square hole of
/// half-extent `inner`.
pub fn slot(center: Vector3<f64>, outer: f64, inner: f64) -> Result<TriangleMesh, VisError> {
    if !(inner > 0.0 && inner < outer) {
        return Err(VisError::degenerate("slot hole must be inside the frame"));
    }
    let mut vertices = square_corners(center, outer, outer).to_vec();
    vertices.extend(square_corners(center, inner, inner));
    let mut faces = Vec::with_capacity(8);
    for k in 0..4u32 {
        let (o0, o1) = (k, (k + 1) % 4);
        let (i0, i1) = (k + 4, (k + 1) % 4 + 4);
        faces.push([o0, o1, i1]);
        faces.push([o0, i1, i0]);
    }
    TriangleMesh::new(vertices, faces)
}

/// `count` random triangles with vertices in the box `[lo, hi]`, each at most
/// `size` away from its first vertex per axis.
pub fn random_soup<R: Rng>(
    rng: &mut R,
    count: usize,
    lo: Vector3<f64>,
    hi: Vector3<f64>,
    size: f64,
) -> Result<TriangleMesh, VisError> {
    let mut vertices = Vec::with_capacity(3 * count);
    let mut faces = Vec::with_capacity(count);
    while faces.len() < count {
        let a = Vector3::from_fn(|k, _| rng.gen_range(lo[k]..hi[k]));
        let mut jitter = || Vector3::from_fn(|_, _| rng.gen_range(-size..size));
        let (b, c) = (a + jitter(), a + jitter());
        if (b - a).cross(&(c - a)).norm() <= 1e-6 * size * size {
            continue;
        }
        let base = vertices.len() as u32;
        vertices.extend([a, b, c]);
        faces.push([base, base + 1, base + 2]);
    }
    TriangleMesh::new(vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MeshScene, Ray, Scene};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn polygons_have_expected_areas() {
        let sq = square(vector![0.0, 0.0, 2.0], 1.0).unwrap();
        assert!((sq.area() - 4.0).abs() < 1e-12);
        let hex = regular_polygon(Vector3::zeros(), 1.0, 6).unwrap();
        let expected = 1.5 * 3f64.sqrt();
        assert!((hex.area() - expected).abs() < 1e-12);
    }

    #[test]
    fn grid_and_cube_are_connected() {
        let g = grid(Vector3::zeros(), 1.0, 3).unwrap();
        assert_eq!(g.len(), 18);
        // an interior cell's diagonal and both sides are shared
        assert!(g.neighbor(8, 0).is_some());
        let c = cube(Vector3::zeros(), 1.0).unwrap();
        assert_eq!(c.len(), 12);
        for f in 0..12 {
            for e in 0..3 {
                assert!(c.neighbor(f, e).is_some(), "cube face {f} edge {e} is open");
            }
        }
    }

    #[test]
    fn slot_lets_rays_through_the_hole() {
        let scene = MeshScene::with_meshes(vec![slot(vector![0.0, 0.0, 5.0], 3.0, 0.5).unwrap()]);
        let through = Ray::segment(&vector![0.1, 0.2, 0.0], &vector![0.1, 0.2, 10.0], 1e-7);
        assert!(scene.intersect(&through).unwrap().is_none());
        let blocked = Ray::segment(&vector![1.0, 0.0, 0.0], &vector![1.0, 0.0, 10.0], 1e-7);
        assert!(scene.intersect(&blocked).unwrap().is_some());
    }

    #[test]
    fn random_soup_is_reproducible() {
        let lo = vector![-1.0, -1.0, 1.0];
        let hi = vector![1.0, 1.0, 9.0];
        let a = random_soup(&mut StdRng::seed_from_u64(3), 20, lo, hi, 0.5).unwrap();
        let b = random_soup(&mut StdRng::seed_from_u64(3), 20, lo, hi, 0.5).unwrap();
        assert_eq!(a.len(), 20);
        assert_eq!(a.vertices(), b.vertices());
    }
}

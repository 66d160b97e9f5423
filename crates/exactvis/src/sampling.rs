//! Monte-Carlo visibility estimate between two query primitives.
//!
//! Purpose
//! - Cross-check the exact query: a clear sampled segment proves visibility,
//!   so the exact answer must never be `Occluded` when sampling finds one.
//! - Estimate the fraction of unobstructed segments for reports.
//!
//! Model
//! - Polygon endpoints are drawn uniformly by area from a triangle fan,
//!   segment endpoints uniformly by length; a point end is always itself.
//! - Each segment is trimmed at both ends like the exact query's rays.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cfg::RAY_TRIM;
use crate::geometry::{ConvexPolygon, Primitive};
use crate::scene::{Ray, Scene, SceneError};

#[derive(Clone, Copy, Debug)]
pub struct SamplingCfg {
    pub samples: usize,
    pub seed: u64,
    /// Stop at the first clear segment.
    pub stop_at_first: bool,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            samples: 1024,
            seed: 0,
            stop_at_first: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleReport {
    pub samples: usize,
    pub clear: usize,
    pub first_clear: Option<(Vector3<f64>, Vector3<f64>)>,
}

impl SampleReport {
    pub fn clear_fraction(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.clear as f64 / self.samples as f64
    }
}

/// Uniform point of `poly`.
pub fn random_point_in<R: Rng>(rng: &mut R, poly: &ConvexPolygon) -> Vector3<f64> {
    let v = poly.vertices();
    let fan: Vec<f64> = (1..v.len() - 1)
        .map(|i| (v[i] - v[0]).cross(&(v[i + 1] - v[0])).norm())
        .collect();
    let total: f64 = fan.iter().sum();
    let mut pick = rng.gen::<f64>() * total;
    let mut i = fan.len() - 1;
    for (k, w) in fan.iter().enumerate() {
        if pick < *w {
            i = k;
            break;
        }
        pick -= w;
    }
    let (mut s, mut t) = (rng.gen::<f64>(), rng.gen::<f64>());
    if s + t > 1.0 {
        s = 1.0 - s;
        t = 1.0 - t;
    }
    v[0] + (v[i + 1] - v[0]) * s + (v[i + 2] - v[0]) * t
}

/// Uniform point of `end`.
pub fn random_point_on<R: Rng>(rng: &mut R, end: &Primitive) -> Vector3<f64> {
    match end {
        Primitive::Point(p) => *p,
        Primitive::Segment([p, q]) => p + (q - p) * rng.gen::<f64>(),
        Primitive::Polygon(poly) => random_point_in(rng, poly),
    }
}

/// Whether the trimmed segment `a → b` misses every occluder.
pub fn segment_is_clear(
    scene: &dyn Scene,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
) -> Result<bool, SceneError> {
    Ok(scene.intersect(&Ray::segment(a, b, RAY_TRIM))?.is_none())
}

/// Cast `cfg.samples` random segments from `source` to `destination`.
pub fn sample_visibility(
    source: impl Into<Primitive>,
    destination: impl Into<Primitive>,
    scene: &dyn Scene,
    cfg: SamplingCfg,
) -> Result<SampleReport, SceneError> {
    let (source, destination) = (source.into(), destination.into());
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut report = SampleReport::default();
    for _ in 0..cfg.samples {
        let a = random_point_on(&mut rng, &source);
        let b = random_point_on(&mut rng, &destination);
        report.samples += 1;
        if segment_is_clear(scene, &a, &b)? {
            report.clear += 1;
            report.first_clear.get_or_insert((a, b));
            if cfg.stop_at_first {
                break;
            }
        }
    }
    tracing::debug!(
        samples = report.samples,
        clear = report.clear,
        "sampled visibility"
    );
    Ok(report)
}

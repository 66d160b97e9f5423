use std::cell::Cell;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use nalgebra::{vector, Vector3};
use rand::{rngs::StdRng, SeedableRng};

use super::*;
use crate::debug::{BranchResolution, DebugEvent, EdgeRejection, EventLog, StatsCollector};
use crate::error::VisError;
use crate::geometry::{ConvexPolygon, Primitive};
use crate::sampling::{sample_visibility, segment_is_clear, SamplingCfg};
use crate::scene::synth::{quad, random_soup, regular_polygon, slot, square};
use crate::scene::{FaceRef, Hit, MeshScene, Ray, Scene, SceneError, SceneId, TriangleMesh};
use crate::silhouette::SilhouetteCache;

fn unit_squares() -> (ConvexPolygon, ConvexPolygon) {
    (
        square(vector![0.0, 0.0, 0.0], 1.0).unwrap(),
        square(vector![0.0, 0.0, 10.0], 1.0).unwrap(),
    )
}

fn scene_of(meshes: Vec<TriangleMesh>) -> MeshScene {
    MeshScene::with_meshes(meshes)
}

fn run(scene: &dyn Scene) -> QueryOutcome {
    let (a, b) = unit_squares();
    VisibilityQuery::new(&a, &b, scene, QueryCfg::default())
        .run()
        .unwrap()
}

fn assert_witness_is_sound(
    w: &Witness,
    a: impl Into<Primitive>,
    b: impl Into<Primitive>,
    scene: &dyn Scene,
) {
    let (a, b) = (a.into(), b.into());
    assert!(a.contains_point(&w.source, 1e-6), "source endpoint {:?}", w.source);
    assert!(b.contains_point(&w.destination, 1e-6), "destination endpoint {:?}", w.destination);
    assert!(segment_is_clear(scene, &w.source, &w.destination).unwrap());
    assert!(w.line.direction().dot(&(w.destination - w.source)) > 0.0);
}

#[test]
fn empty_scene_is_visible_along_the_axis() {
    let scene = MeshScene::new();
    let (a, b) = unit_squares();
    let out = run(&scene);
    assert_eq!(out.state, QueryState::Visible);
    let w = out.visibility.witness().unwrap();
    assert_witness_is_sound(w, &a, &b, &scene);
    assert!(w.source.xy().norm() < 1e-6);
    assert!(w.destination.xy().norm() < 1e-6);
    assert_eq!(out.stats.splits, 0);
    assert_eq!(out.stats.rays_cast, 1);
}

#[test]
fn wide_wall_occludes() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 10.0, 10.0).unwrap()]);
    let out = run(&scene);
    assert_eq!(out.visibility, Visibility::Occluded);
    assert_eq!(out.state, QueryState::Occluded);
    // the wall's edges never enter the shaft
    assert_eq!(out.stats.splits, 0);
    assert_eq!(out.stats.silhouettes, 1);
}

#[test]
fn small_occluder_leaves_a_gap() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let (a, b) = unit_squares();
    let out = run(&scene);
    assert!(out.stats.splits >= 1);
    let w = out.visibility.witness().unwrap();
    assert_witness_is_sound(w, &a, &b, &scene);
    // the witness passes beside the occluder
    let mid = (w.source + w.destination) / 2.0;
    assert!(mid.x.abs() >= 0.5 - 1e-9 || mid.y.abs() >= 0.5 - 1e-9);
}

#[test]
fn slot_is_visible_through_the_hole() {
    let scene = scene_of(vec![slot(vector![0.0, 0.0, 5.0], 3.0, 0.3).unwrap()]);
    let (a, b) = unit_squares();
    let out = run(&scene);
    let w = out.visibility.witness().unwrap();
    assert_witness_is_sound(w, &a, &b, &scene);
    let mid = (w.source + w.destination) / 2.0;
    assert!(mid.x.abs() <= 0.3 + 1e-9 && mid.y.abs() <= 0.3 + 1e-9);
}

#[test]
fn staggered_walls_occlude_together() {
    // a line clearing the lower wall at x > 0.5 must reach x < -0.5 to clear
    // the upper one, which puts its source end beyond x = 2.5
    let scene = scene_of(vec![
        quad(vector![-4.75, 0.0, 4.0], 5.25, 10.0).unwrap(),
        quad(vector![4.75, 0.0, 6.0], 5.25, 10.0).unwrap(),
    ]);
    let mut log = EventLog::new();
    let (a, b) = unit_squares();
    let out = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_sink(&mut log)
        .run()
        .unwrap();
    assert_eq!(out.visibility, Visibility::Occluded);
    assert!(out.stats.splits >= 1);
    assert!(out.stats.silhouettes >= 2);
    let resolutions = log.resolutions();
    assert!(!resolutions.is_empty());
    assert!(resolutions
        .iter()
        .all(|r| matches!(r, BranchResolution::Empty | BranchResolution::Occluded)));
    assert_eq!(
        resolutions.len(),
        out.stats.empty_branches + out.stats.occluded_branches
    );
}

#[test]
fn each_wall_alone_leaves_a_gap() {
    for center in [vector![-4.75, 0.0, 4.0], vector![4.75, 0.0, 6.0]] {
        let scene = scene_of(vec![quad(center, 5.25, 10.0).unwrap()]);
        assert!(run(&scene).visibility.is_visible());
    }
}

#[test]
fn repeated_queries_agree() {
    let scene = scene_of(vec![quad(vector![0.3, -0.2, 5.0], 0.6, 0.4).unwrap()]);
    let first = run(&scene);
    let second = run(&scene);
    assert_eq!(first.visibility, second.visibility);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn shared_cache_reuses_silhouettes() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let (a, b) = unit_squares();
    let mut cache = SilhouetteCache::new();
    let mut first = StatsCollector::default();
    let v1 = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_cache(&mut cache)
        .with_sink(&mut first)
        .run()
        .unwrap();
    assert_eq!(cache.len(), 1);
    let mut second = StatsCollector::default();
    let v2 = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_cache(&mut cache)
        .with_sink(&mut second)
        .run()
        .unwrap();
    assert_eq!(v1.visibility, v2.visibility);
    assert!(first.silhouettes_computed > first.silhouettes_cached);
    assert_eq!(second.silhouettes_computed, second.silhouettes_cached);
}

#[test]
fn adding_occluders_never_reveals_lines() {
    let (a, b) = unit_squares();
    let cfg = QueryCfg::default();
    for seed in 0..6u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let lo = vector![-1.5, -1.5, 2.0];
        let hi = vector![1.5, 1.5, 8.0];
        let base = random_soup(&mut rng, 6, lo, hi, 1.0).unwrap();
        let extra = random_soup(&mut rng, 6, lo, hi, 1.0).unwrap();
        let small = scene_of(vec![base.clone()]);
        let large = scene_of(vec![base, extra]);
        let v_small = query_visibility(&a, &b, &small, &cfg).unwrap();
        let v_large = query_visibility(&a, &b, &large, &cfg).unwrap();
        if v_small.is_occluded() {
            assert!(!v_large.is_visible(), "seed {seed}: extra occluders opened a gap");
        }
        for (v, scene) in [(&v_small, &small), (&v_large, &large)] {
            if let Some(w) = v.witness() {
                assert_witness_is_sound(w, &a, &b, scene);
            }
        }
    }
}

#[test]
fn sampled_clear_segments_rule_out_occlusion() {
    let (a, b) = unit_squares();
    let cfg = QueryCfg::default();
    for seed in 10..16u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let soup = random_soup(&mut rng, 10, vector![-1.5, -1.5, 2.0], vector![1.5, 1.5, 8.0], 1.2)
            .unwrap();
        let scene = scene_of(vec![soup]);
        let sampled = sample_visibility(
            &a,
            &b,
            &scene,
            SamplingCfg {
                samples: 256,
                seed,
                stop_at_first: true,
            },
        )
        .unwrap();
        let exact = query_visibility(&a, &b, &scene, &cfg).unwrap();
        if sampled.first_clear.is_some() {
            assert!(!exact.is_occluded(), "seed {seed}: sampling found a clear segment");
        }
    }
}

/// Fails the first `failures` ray queries, then delegates.
struct FlakyScene {
    inner: MeshScene,
    failures: Cell<usize>,
    transient: bool,
}

impl Scene for FlakyScene {
    fn id(&self) -> SceneId {
        self.inner.id()
    }

    fn intersect(&self, ray: &Ray) -> Result<Option<Hit>, SceneError> {
        let left = self.failures.get();
        if left > 0 {
            self.failures.set(left - 1);
            return Err(if self.transient {
                SceneError::transient("busy")
            } else {
                SceneError::permanent("device lost")
            });
        }
        self.inner.intersect(ray)
    }

    fn face(&self, face: FaceRef) -> Option<[Vector3<f64>; 3]> {
        self.inner.face(face)
    }

    fn adjacent_face(&self, face: FaceRef, edge: usize) -> Option<FaceRef> {
        self.inner.adjacent_face(face, edge)
    }
}

#[test]
fn transient_scene_failures_are_retried() {
    let scene = FlakyScene {
        inner: MeshScene::new(),
        failures: Cell::new(2),
        transient: true,
    };
    let mut stats = StatsCollector::default();
    let (a, b) = unit_squares();
    let out = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_sink(&mut stats)
        .run()
        .unwrap();
    assert!(out.visibility.is_visible());
    assert_eq!(out.stats.scene_retries, 2);
    assert_eq!(stats.scene_retries, 2);
}

#[test]
fn exhausted_retries_are_inconclusive() {
    let scene = FlakyScene {
        inner: MeshScene::new(),
        failures: Cell::new(10),
        transient: true,
    };
    let cfg = QueryCfg {
        scene_retries: 1,
        ..QueryCfg::default()
    };
    let (a, b) = unit_squares();
    let v = query_visibility(&a, &b, &scene, &cfg).unwrap();
    assert_eq!(
        v,
        Visibility::Inconclusive(InconclusiveReason::SceneFailure("busy".into()))
    );
}

#[test]
fn permanent_scene_failure_is_inconclusive() {
    let scene = FlakyScene {
        inner: MeshScene::new(),
        failures: Cell::new(1),
        transient: false,
    };
    let (a, b) = unit_squares();
    let out = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .run()
        .unwrap();
    assert_eq!(out.state, QueryState::Inconclusive);
    assert_eq!(
        out.visibility,
        Visibility::Inconclusive(InconclusiveReason::SceneFailure("device lost".into()))
    );
    assert_eq!(out.stats.aborted_branches, 1);
}

#[test]
fn recursion_bound_makes_the_query_inconclusive() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let cfg = QueryCfg {
        max_recursion_depth: 0,
        ..QueryCfg::default()
    };
    let (a, b) = unit_squares();
    let v = query_visibility(&a, &b, &scene, &cfg).unwrap();
    assert_eq!(v, Visibility::Inconclusive(InconclusiveReason::RecursionDepth));
}

#[test]
fn facet_bound_makes_the_query_inconclusive() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let cfg = QueryCfg {
        max_facet_count: 0,
        ..QueryCfg::default()
    };
    let (a, b) = unit_squares();
    let v = query_visibility(&a, &b, &scene, &cfg).unwrap();
    assert_eq!(v, Visibility::Inconclusive(InconclusiveReason::FacetCount));
}

#[test]
fn cancelled_query_stops() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let flag = Arc::new(AtomicBool::new(true));
    let (a, b) = unit_squares();
    let out = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_cancel_flag(flag)
        .run()
        .unwrap();
    assert_eq!(
        out.visibility,
        Visibility::Inconclusive(InconclusiveReason::Cancelled)
    );
    assert_eq!(out.stats.rays_cast, 0);
}

#[test]
fn zero_timeout_expires_immediately() {
    let scene = MeshScene::new();
    let cfg = QueryCfg {
        timeout: Some(Duration::ZERO),
        ..QueryCfg::default()
    };
    let (a, b) = unit_squares();
    let v = query_visibility(&a, &b, &scene, &cfg).unwrap();
    assert_eq!(v, Visibility::Inconclusive(InconclusiveReason::Timeout));
}

#[test]
fn coplanar_polygons_are_rejected() {
    let a = square(vector![0.0, 0.0, 0.0], 1.0).unwrap();
    let b = square(vector![5.0, 0.0, 0.0], 1.0).unwrap();
    let err = query_visibility(&a, &b, &MeshScene::new(), &QueryCfg::default()).unwrap_err();
    assert!(matches!(err, VisError::DegenerateInput { .. }));
}

#[test]
fn query_starts_initialized_and_emits_events() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let (a, b) = unit_squares();
    let mut log = EventLog::new();
    let q = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default());
    assert_eq!(q.state(), QueryState::Initialized);
    let out = q.with_sink(&mut log).run().unwrap();
    assert!(out.visibility.is_visible());
    assert_eq!(
        log.count(|e| matches!(e, DebugEvent::PolytopeBuilt { .. })),
        1
    );
    assert_eq!(log.splits(), out.stats.splits);
    assert_eq!(
        log.count(|e| matches!(e, DebugEvent::RayCast { .. })),
        out.stats.rays_cast
    );
    assert_eq!(
        log.resolutions().last(),
        Some(&BranchResolution::Visible)
    );
}

fn shifted_squares(offset: Vector3<f64>) -> (ConvexPolygon, ConvexPolygon) {
    (
        square(offset, 1.0).unwrap(),
        square(offset + vector![0.0, 0.0, 10.0], 1.0).unwrap(),
    )
}

/// Unit square centered at `center`, turned by `angle` about the x axis.
fn tilted_square(center: Vector3<f64>, angle: f64) -> ConvexPolygon {
    let (s, c) = angle.sin_cos();
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    ConvexPolygon::new(
        corners
            .iter()
            .map(|&(x, y)| center + vector![x, y * c, y * s])
            .collect(),
    )
    .unwrap()
}

#[test]
fn regular_polygon_pairs_see_each_other() {
    let empty = MeshScene::new();
    let blocker = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.3, 0.3).unwrap()]);
    for n in [3usize, 8, 12] {
        let a = regular_polygon(vector![0.0, 0.0, 0.0], 1.0, n).unwrap();
        let b = regular_polygon(vector![0.3, 0.0, 10.0], 1.2, n).unwrap();
        for scene in [&empty as &dyn Scene, &blocker] {
            let out = VisibilityQuery::new(&a, &b, scene, QueryCfg::default())
                .run()
                .unwrap();
            let w = out.visibility.witness().unwrap_or_else(|| panic!("n = {n}"));
            assert_witness_is_sound(w, &a, &b, scene);
        }
        let wall = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 10.0, 10.0).unwrap()]);
        let v = query_visibility(&a, &b, &wall, &QueryCfg::default()).unwrap();
        assert_eq!(v, Visibility::Occluded, "n = {n}");
    }
}

#[test]
fn far_from_the_origin_matches_the_origin() {
    let offset = vector![1e5, 1e5, 1e5];
    let (a, b) = shifted_squares(offset);
    let mid = offset + vector![0.0, 0.0, 5.0];

    let empty = MeshScene::new();
    let w = query_visibility(&a, &b, &empty, &QueryCfg::default())
        .unwrap()
        .witness()
        .cloned()
        .unwrap();
    assert_witness_is_sound(&w, &a, &b, &empty);
    assert!((w.source - offset).xy().norm() < 1e-6);

    let wall = scene_of(vec![quad(mid, 10.0, 10.0).unwrap()]);
    let v = query_visibility(&a, &b, &wall, &QueryCfg::default()).unwrap();
    assert_eq!(v, Visibility::Occluded);

    let blocker = scene_of(vec![quad(mid, 0.5, 0.5).unwrap()]);
    let out = VisibilityQuery::new(&a, &b, &blocker, QueryCfg::default())
        .run()
        .unwrap();
    assert!(out.stats.splits >= 1);
    assert_witness_is_sound(out.visibility.witness().unwrap(), &a, &b, &blocker);
}

#[test]
fn tilted_destination_is_handled() {
    let a = square(vector![0.0, 0.0, 0.0], 1.0).unwrap();
    let b = tilted_square(vector![0.5, 0.0, 10.0], 0.5);
    for scene in [
        MeshScene::new(),
        scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]),
    ] {
        let v = query_visibility(&a, &b, &scene, &QueryCfg::default()).unwrap();
        assert_witness_is_sound(v.witness().unwrap(), &a, &b, &scene);
    }
    let wall = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 10.0, 10.0).unwrap()]);
    assert_eq!(
        query_visibility(&a, &b, &wall, &QueryCfg::default()).unwrap(),
        Visibility::Occluded
    );
}

#[test]
fn point_sees_a_square_around_a_small_occluder() {
    let eye = Primitive::point(vector![0.0, 0.0, 0.0]).unwrap();
    let b = square(vector![0.0, 0.0, 10.0], 1.0).unwrap();
    // from the eye the square spans [-0.5, 0.5]^2 at z = 5
    let small = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.4, 0.4).unwrap()]);
    let v = query_visibility(&eye, &b, &small, &QueryCfg::default()).unwrap();
    let w = v.witness().unwrap();
    assert_witness_is_sound(w, &eye, &b, &small);
    assert!(w.source.norm() < 1e-9);

    let large = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.6, 0.6).unwrap()]);
    let v = query_visibility(&eye, &b, &large, &QueryCfg::default()).unwrap();
    assert_eq!(v, Visibility::Occluded);
}

#[test]
fn segment_sees_a_square_past_a_strip() {
    let seg = Primitive::segment(vector![-1.0, 0.0, 0.0], vector![1.0, 0.0, 0.0]).unwrap();
    let b = square(vector![0.0, 0.0, 10.0], 1.0).unwrap();
    let strip = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 10.0, 0.3).unwrap()]);
    let v = query_visibility(&seg, &b, &strip, &QueryCfg::default()).unwrap();
    let w = v.witness().unwrap();
    assert_witness_is_sound(w, &seg, &b, &strip);
    let mid = (w.source + w.destination) / 2.0;
    assert!(mid.y.abs() >= 0.3 - 1e-9);

    let wall = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 10.0, 10.0).unwrap()]);
    let v = query_visibility(&seg, &b, &wall, &QueryCfg::default()).unwrap();
    assert_eq!(v, Visibility::Occluded);
}

#[test]
fn point_to_point_is_a_single_segment_test() {
    let p = Primitive::point(vector![0.0, 0.0, 0.0]).unwrap();
    let q = Primitive::point(vector![0.0, 0.0, 10.0]).unwrap();
    let empty = MeshScene::new();
    let out = VisibilityQuery::new(&p, &q, &empty, QueryCfg::default())
        .run()
        .unwrap();
    assert_witness_is_sound(out.visibility.witness().unwrap(), &p, &q, &empty);
    assert_eq!(out.stats.rays_cast, 1);

    let blocker = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.1, 0.1).unwrap()]);
    let v = query_visibility(&p, &q, &blocker, &QueryCfg::default()).unwrap();
    assert_eq!(v, Visibility::Occluded);
    let beside = scene_of(vec![quad(vector![0.5, 0.0, 5.0], 0.1, 0.1).unwrap()]);
    assert!(query_visibility(&p, &q, &beside, &QueryCfg::default())
        .unwrap()
        .is_visible());
}

#[test]
fn extremal_line_sampling_reaches_the_same_verdicts() {
    let cfg = QueryCfg {
        representative_line_sampling: false,
        ..QueryCfg::default()
    };
    let (a, b) = unit_squares();
    let empty = MeshScene::new();
    let w = query_visibility(&a, &b, &empty, &cfg).unwrap();
    assert_witness_is_sound(w.witness().unwrap(), &a, &b, &empty);

    let small = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let w = query_visibility(&a, &b, &small, &cfg).unwrap();
    assert_witness_is_sound(w.witness().unwrap(), &a, &b, &small);

    let staggered = scene_of(vec![
        quad(vector![-4.75, 0.0, 4.0], 5.25, 10.0).unwrap(),
        quad(vector![4.75, 0.0, 6.0], 5.25, 10.0).unwrap(),
    ]);
    assert_eq!(
        query_visibility(&a, &b, &staggered, &cfg).unwrap(),
        Visibility::Occluded
    );
}

#[test]
fn edges_that_cannot_split_are_reported() {
    let scene = scene_of(vec![quad(vector![0.0, 0.0, 5.0], 0.5, 0.5).unwrap()]);
    let (a, b) = unit_squares();
    let mut log = EventLog::new();
    let out = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
        .with_sink(&mut log)
        .run()
        .unwrap();
    assert!(out.visibility.is_visible());
    // the quad's four rim edges cross the shaft; its diagonal is flat and
    // seen once from each triangle
    assert_eq!(
        log.count(|e| matches!(e, DebugEvent::SilhouetteEdgeAccepted { .. })),
        4
    );
    assert_eq!(log.rejections(EdgeRejection::NoFold), 2);
    // a child revisits the edge that split its parent
    assert!(log.rejections(EdgeRejection::NoSplit) >= 1);
    // branches share one silhouette
    assert_eq!(out.stats.silhouettes, 1);
    assert!(out.stats.silhouette_applications >= out.stats.silhouettes);
}

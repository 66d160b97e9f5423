//! Criterion benchmarks for end-to-end visibility queries.
//! Focus sizes: random triangle soups with k in {0, 8, 32} triangles.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use exactvis::api::{query_visibility, synth, MeshScene, QueryCfg};
use nalgebra::vector;
use rand::{rngs::StdRng, SeedableRng};

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    group.sample_size(20);
    let a = synth::square(vector![0.0, 0.0, 0.0], 1.0).unwrap();
    let b = synth::square(vector![0.0, 0.0, 10.0], 1.0).unwrap();
    let cfg = QueryCfg::default();
    for &k in &[0usize, 8, 32] {
        let mut rng = StdRng::seed_from_u64(5);
        let mut scene = MeshScene::new();
        if k > 0 {
            let soup = synth::random_soup(
                &mut rng,
                k,
                vector![-1.5, -1.5, 2.0],
                vector![1.5, 1.5, 8.0],
                0.8,
            )
            .unwrap();
            scene.push(soup);
        }
        group.bench_with_input(BenchmarkId::new("soup", k), &k, |bch, _| {
            bch.iter(|| query_visibility(&a, &b, &scene, &cfg).unwrap())
        });
    }
    let wall = MeshScene::with_meshes(vec![synth::quad(vector![0.0, 0.0, 5.0], 10.0, 10.0).unwrap()]);
    group.bench_function("wall", |bch| {
        bch.iter(|| query_visibility(&a, &b, &wall, &cfg).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);

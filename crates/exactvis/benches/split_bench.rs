//! Criterion benchmarks for stabbing-line polytopes.
//! Focus sizes: n-gon pairs with n in {3, 4, 6, 8, 16}.
//! Results: by default under target/criterion.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use exactvis::api::{
    synth, EdgeKey, FacetArena, NoopSink, PluckerLine, PolytopeBuilder, Provenance, SilhouetteId,
    SourcePair,
};
use nalgebra::vector;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("polytope");
    let builder = PolytopeBuilder::new(1e-9, true);
    let edge = Provenance::Silhouette(EdgeKey {
        silhouette: SilhouetteId(0),
        index: 0,
    });
    for &n in &[3usize, 4, 6, 8, 16] {
        let a = synth::regular_polygon(vector![0.0, 0.0, 0.0], 1.0, n).unwrap();
        let b = synth::regular_polygon(vector![0.3, 0.0, 10.0], 1.2, n).unwrap();
        let pair = SourcePair::new(&a, &b, 1e-9).unwrap().to_local();

        group.bench_with_input(BenchmarkId::new("build", n), &n, |bch, _| {
            bch.iter(|| {
                let mut arena = FacetArena::new();
                builder.build(&mut arena, &pair, &mut NoopSink).unwrap()
            })
        });

        let mut arena = FacetArena::new();
        let root = builder.build(&mut arena, &pair, &mut NoopSink).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        group.bench_with_input(BenchmarkId::new("split", n), &n, |bch, _| {
            bch.iter_batched(
                || {
                    // an occluder edge crossing the shaft at mid-height
                    let x = rng.gen_range(-0.5..0.5);
                    let p = vector![x, -2.0, 5.0];
                    let q = vector![x + rng.gen_range(-0.2..0.2), 2.0, 5.0];
                    (arena.clone(), pair.frame.line(&p, &q).unwrap())
                },
                |(mut arena, plane)| {
                    builder
                        .split(&mut arena, &root, plane, edge, 0, &mut NoopSink)
                        .unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split);
criterion_main!(benches);

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use exactvis::api::{
    sample_visibility, synth, MeshScene, Primitive, QueryCfg, QueryOutcome, QueryStats,
    SamplingCfg, Visibility, VisibilityQuery,
};
use nalgebra::vector;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::fmt::SubscriberBuilder;

mod provenance;

use provenance::{Revision, Sidecar};

#[derive(Parser)]
#[command(name = "cli")]
#[command(about = "Exact visibility runner for points, segments and convex polygons")]
struct Cmd {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Unit squares at z = 0 and z = 10 with an optional square occluder at z = 5
    Demo {
        /// Side length of the occluder; omit for an empty scene
        #[arg(long)]
        occluder_side: Option<f64>,
        /// Replace the source square by its center point
        #[arg(long)]
        point_source: bool,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Unit squares with a seeded random triangle soup between them
    Random {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 16)]
        triangles: usize,
        /// Maximum extent of one triangle per axis
        #[arg(long, default_value_t = 0.8)]
        size: f64,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print a small provenance JSON block
    Report,
}

#[derive(Args, Clone, Debug)]
struct QueryArgs {
    #[arg(long, default_value_t = QueryCfg::default().max_recursion_depth)]
    max_depth: usize,
    #[arg(long, default_value_t = QueryCfg::default().max_facet_count)]
    max_facets: usize,
    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Treat every occluder face as its own silhouette
    #[arg(long)]
    no_merge: bool,
    /// Try each branch's extremal lines before its representative line
    #[arg(long)]
    extremal_lines: bool,
    /// Cross-check with this many random segments
    #[arg(long, default_value_t = 0)]
    samples: usize,
    /// Write the JSON here (plus a provenance sidecar) instead of stdout only
    #[arg(long)]
    out: Option<PathBuf>,
}

impl QueryArgs {
    fn cfg(&self) -> QueryCfg {
        QueryCfg {
            max_recursion_depth: self.max_depth,
            max_facet_count: self.max_facets,
            silhouette_optimization: !self.no_merge,
            representative_line_sampling: !self.extremal_lines,
            timeout: self.timeout_ms.map(Duration::from_millis),
            ..QueryCfg::default()
        }
    }

    fn params(&self) -> serde_json::Value {
        json!({
            "max_depth": self.max_depth,
            "max_facets": self.max_facets,
            "timeout_ms": self.timeout_ms,
            "merge_silhouettes": !self.no_merge,
            "extremal_lines": self.extremal_lines,
            "samples": self.samples,
        })
    }
}

#[derive(Debug, Serialize)]
struct WitnessJson {
    source: [f64; 3],
    destination: [f64; 3],
}

#[derive(Debug, Serialize)]
struct StatsJson {
    branches: usize,
    splits: usize,
    max_depth: usize,
    rays_cast: usize,
    scene_retries: usize,
    silhouettes: usize,
    facets: usize,
    initial_vertices: usize,
    empty_branches: usize,
    occluded_branches: usize,
    aborted_branches: usize,
}

impl From<QueryStats> for StatsJson {
    fn from(s: QueryStats) -> Self {
        Self {
            branches: s.branches,
            splits: s.splits,
            max_depth: s.max_depth,
            rays_cast: s.rays_cast,
            scene_retries: s.scene_retries,
            silhouettes: s.silhouettes,
            facets: s.facets,
            initial_vertices: s.initial_vertices,
            empty_branches: s.empty_branches,
            occluded_branches: s.occluded_branches,
            aborted_branches: s.aborted_branches,
        }
    }
}

#[derive(Debug, Serialize)]
struct SampleJson {
    samples: usize,
    clear: usize,
    clear_fraction: f64,
}

#[derive(Debug, Serialize)]
struct QueryReport {
    scenario: String,
    verdict: &'static str,
    reason: Option<String>,
    witness: Option<WitnessJson>,
    stats: StatsJson,
    elapsed_ms: f64,
    sampled: Option<SampleJson>,
}

fn main() -> Result<()> {
    SubscriberBuilder::default().with_target(false).init();
    let cmd = Cmd::parse();
    match cmd.action {
        Action::Demo {
            occluder_side,
            point_source,
            query,
        } => {
            let report = demo(occluder_side, point_source, &query)?;
            let params = json!({
                "occluder_side": occluder_side,
                "point_source": point_source,
                "query": query.params(),
            });
            emit("demo", &report.scenario, &report, params, query.out.as_deref())
        }
        Action::Random {
            seed,
            triangles,
            size,
            query,
        } => {
            let report = random(seed, triangles, size, &query)?;
            let params = json!({
                "seed": seed,
                "triangles": triangles,
                "size": size,
                "query": query.params(),
            });
            emit("random", &report.scenario, &report, params, query.out.as_deref())
        }
        Action::Report => report(),
    }
}

fn unit_squares() -> Result<(Primitive, Primitive)> {
    Ok((
        synth::square(vector![0.0, 0.0, 0.0], 1.0)?.into(),
        synth::square(vector![0.0, 0.0, 10.0], 1.0)?.into(),
    ))
}

fn demo(occluder_side: Option<f64>, point_source: bool, args: &QueryArgs) -> Result<QueryReport> {
    let (mut a, b) = unit_squares()?;
    if point_source {
        a = Primitive::point(vector![0.0, 0.0, 0.0])?;
    }
    let mut scene = MeshScene::new();
    if let Some(side) = occluder_side {
        let half = side / 2.0;
        scene.push(synth::quad(vector![0.0, 0.0, 5.0], half, half).context("building occluder")?);
    }
    let mut scenario = match occluder_side {
        Some(side) => format!("demo-side-{side}"),
        None => "demo-empty".to_string(),
    };
    if point_source {
        scenario.push_str("-point");
    }
    run_query(scenario, &a, &b, &scene, args)
}

fn random(seed: u64, triangles: usize, size: f64, args: &QueryArgs) -> Result<QueryReport> {
    let (a, b) = unit_squares()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut scene = MeshScene::new();
    if triangles > 0 {
        let soup = synth::random_soup(
            &mut rng,
            triangles,
            vector![-1.5, -1.5, 2.0],
            vector![1.5, 1.5, 8.0],
            size,
        )
        .context("building triangle soup")?;
        scene.push(soup);
    }
    run_query(format!("random-{seed}-{triangles}"), &a, &b, &scene, args)
}

fn run_query(
    scenario: String,
    a: &Primitive,
    b: &Primitive,
    scene: &MeshScene,
    args: &QueryArgs,
) -> Result<QueryReport> {
    tracing::info!(scenario = %scenario, faces = scene.face_count(), "query");
    let start = Instant::now();
    let outcome = VisibilityQuery::new(a, b, scene, args.cfg())
        .run()
        .with_context(|| format!("running {scenario}"))?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
    let sampled = if args.samples > 0 {
        let cfg = SamplingCfg {
            samples: args.samples,
            ..SamplingCfg::default()
        };
        let r = sample_visibility(a, b, scene, cfg).context("sampling cross-check")?;
        if r.clear > 0 && outcome.visibility.is_occluded() {
            tracing::warn!(
                scenario = %scenario,
                clear = r.clear,
                "sampling found clear segments in an occluded scene"
            );
        }
        Some(SampleJson {
            samples: r.samples,
            clear: r.clear,
            clear_fraction: r.clear_fraction(),
        })
    } else {
        None
    };
    Ok(to_report(scenario, outcome, elapsed_ms, sampled))
}

fn to_report(
    scenario: String,
    outcome: QueryOutcome,
    elapsed_ms: f64,
    sampled: Option<SampleJson>,
) -> QueryReport {
    let (reason, witness) = match &outcome.visibility {
        Visibility::Visible(w) => (
            None,
            Some(WitnessJson {
                source: [w.source.x, w.source.y, w.source.z],
                destination: [w.destination.x, w.destination.y, w.destination.z],
            }),
        ),
        Visibility::Occluded => (None, None),
        Visibility::Inconclusive(r) => (Some(r.to_string()), None),
    };
    QueryReport {
        scenario,
        verdict: outcome.visibility.label(),
        reason,
        witness,
        stats: outcome.stats.into(),
        elapsed_ms,
        sampled,
    }
}

fn emit(
    command: &str,
    scenario: &str,
    report: &QueryReport,
    params: serde_json::Value,
    out: Option<&Path>,
) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    println!("{text}");
    if let Some(out) = out {
        if let Some(parent) = out.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        std::fs::write(out, &text).with_context(|| format!("writing {}", out.display()))?;
        let sidecar = Sidecar::new(out, command, scenario, params).write()?;
        tracing::info!(out = %out.display(), sidecar = %sidecar.display(), "wrote report");
    }
    Ok(())
}

fn report() -> Result<()> {
    let obj = json!({
        "revision": Revision::current(),
        "engine_version": exactvis::VERSION,
        "defaults": {
            "max_recursion_depth": QueryCfg::default().max_recursion_depth,
            "max_facet_count": QueryCfg::default().max_facet_count,
            "scene_retries": QueryCfg::default().scene_retries,
        },
    });
    println!("{}", serde_json::to_string_pretty(&obj)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args() -> QueryArgs {
        QueryArgs {
            max_depth: QueryCfg::default().max_recursion_depth,
            max_facets: QueryCfg::default().max_facet_count,
            timeout_ms: None,
            no_merge: false,
            extremal_lines: false,
            samples: 0,
            out: None,
        }
    }

    #[test]
    fn demo_verdicts_follow_occluder_size() {
        assert_eq!(demo(None, false, &args()).unwrap().verdict, "visible");
        assert_eq!(demo(Some(20.0), false, &args()).unwrap().verdict, "occluded");
        let small = demo(Some(1.0), false, &args()).unwrap();
        assert_eq!(small.verdict, "visible");
        assert!(small.witness.is_some());
    }

    #[test]
    fn point_source_sees_around_a_smaller_occluder() {
        // from the center point the far square spans side 1 at z = 5
        let open = demo(Some(0.8), true, &args()).unwrap();
        assert_eq!(open.verdict, "visible");
        assert_eq!(open.scenario, "demo-side-0.8-point");
        let w = open.witness.unwrap();
        assert!(w.source.iter().all(|c| c.abs() < 1e-9));
        assert_eq!(demo(Some(1.4), true, &args()).unwrap().verdict, "occluded");
    }

    #[test]
    fn extremal_lines_give_the_same_verdicts() {
        let mut a = args();
        a.extremal_lines = true;
        assert!(!a.cfg().representative_line_sampling);
        assert_eq!(demo(Some(1.0), false, &a).unwrap().verdict, "visible");
        assert_eq!(demo(Some(20.0), false, &a).unwrap().verdict, "occluded");
    }

    #[test]
    fn demo_cross_check_agrees() {
        let mut a = args();
        a.samples = 32;
        let wall = demo(Some(20.0), false, &a).unwrap();
        assert_eq!(wall.sampled.as_ref().unwrap().clear, 0);
        let open = demo(None, false, &a).unwrap();
        assert_eq!(open.sampled.as_ref().unwrap().clear, 32);
    }

    #[test]
    fn depth_zero_reports_a_reason() {
        let mut a = args();
        a.max_depth = 0;
        let r = demo(Some(1.0), false, &a).unwrap();
        assert_eq!(r.verdict, "inconclusive");
        assert_eq!(r.reason.as_deref(), Some("recursion depth exceeded"));
    }

    #[test]
    fn emit_writes_report_and_sidecar() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("reports/demo.json");
        let r = demo(None, false, &args()).unwrap();
        emit("demo", &r.scenario, &r, json!({}), Some(&out)).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(parsed["verdict"], "visible");
        assert_eq!(parsed["scenario"], "demo-empty");
        assert!(dir.path().join("reports/demo.provenance.json").exists());
    }

    #[test]
    fn random_scenarios_are_reproducible() {
        let first = random(3, 8, 0.8, &args()).unwrap();
        let second = random(3, 8, 0.8, &args()).unwrap();
        assert_eq!(first.verdict, second.verdict);
        assert_eq!(first.stats.splits, second.stats.splits);
    }
}

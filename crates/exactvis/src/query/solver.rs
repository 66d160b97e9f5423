//! Work-list refinement of the stabbing-line polytope.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::builder::{PolytopeBuilder, SplitOutcome};
use crate::cfg::RAY_TRIM;
use crate::debug::{BranchResolution, DebugEvent, DebugSink, EdgeRejection, NoopSink};
use crate::error::VisError;
use crate::geometry::{Primitive, SourcePair};
use crate::plucker::PluckerLine;
use crate::polyhedron::{FacetArena, Provenance};
use crate::polytope::PluckerPolytope;
use crate::scene::{Hit, Ray, Scene};
use crate::silhouette::{PairKey, SilhouetteCache, SilhouetteId, SilhouetteProcessor};

use super::types::{
    InconclusiveReason, QueryCfg, QueryOutcome, QueryState, QueryStats, Visibility, Witness,
};

/// One visibility query between two query ends (points, segments or convex
/// polygons).
///
/// ```ignore
/// let outcome = VisibilityQuery::new(&a, &b, &scene, QueryCfg::default())
///     .with_sink(&mut log)
///     .run()?;
/// ```
pub struct VisibilityQuery<'a> {
    source: Primitive,
    destination: Primitive,
    scene: &'a dyn Scene,
    cfg: QueryCfg,
    sink: Option<&'a mut dyn DebugSink>,
    cache: Option<&'a mut SilhouetteCache>,
    cancel: Option<Arc<AtomicBool>>,
    state: QueryState,
}

impl<'a> VisibilityQuery<'a> {
    pub fn new(
        source: impl Into<Primitive>,
        destination: impl Into<Primitive>,
        scene: &'a dyn Scene,
        cfg: QueryCfg,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            scene,
            cfg,
            sink: None,
            cache: None,
            cancel: None,
            state: QueryState::Initialized,
        }
    }

    pub fn with_sink(mut self, sink: &'a mut dyn DebugSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reuse silhouettes across queries against the same scene and pair.
    pub fn with_cache(mut self, cache: &'a mut SilhouetteCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The query gives up with `Cancelled` once `flag` reads true.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn cfg(&self) -> &QueryCfg {
        &self.cfg
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Build the initial polytope and refine it until a verdict is reached.
    ///
    /// Degenerate input is an error; every other failure ends the query as
    /// `Inconclusive`.
    pub fn run(mut self) -> Result<QueryOutcome, VisError> {
        let mut noop = NoopSink;
        let mut local_cache = SilhouetteCache::new();
        let sink: &mut dyn DebugSink = match self.sink.take() {
            Some(s) => s,
            None => &mut noop,
        };
        let cache: &mut SilhouetteCache = match self.cache.take() {
            Some(c) => c,
            None => &mut local_cache,
        };

        self.transition(QueryState::Building);
        let pair = SourcePair::new(&self.source, &self.destination, self.cfg.guard_band)?;
        let local = pair.to_local();
        let builder = PolytopeBuilder::new(self.cfg.quadric_tolerance, self.cfg.enable_normalization);
        let mut arena = FacetArena::new();
        let root = builder.build(&mut arena, &local, sink)?;

        self.transition(QueryState::Refining);
        let key = PairKey::new(&pair, self.cfg.silhouette_optimization);
        let processor = SilhouetteProcessor::new(
            self.scene,
            &pair,
            cache.entry(self.scene.id(), key),
            self.cfg.silhouette_optimization,
        );
        let deadline = self.cfg.timeout.map(|t| Instant::now() + t);
        let mut runner = Runner {
            cfg: &self.cfg,
            scene: self.scene,
            pair: &pair,
            local: &local,
            builder,
            arena,
            processor,
            sink,
            cancel: self.cancel.as_deref(),
            deadline,
            work: Vec::new(),
            seen: HashSet::new(),
            stats: QueryStats {
                initial_vertices: root.vertices().len(),
                ..QueryStats::default()
            },
        };
        let visibility = runner.solve(root);
        let mut stats = runner.stats;
        stats.facets = runner.arena.len();
        stats.silhouettes = runner.seen.len();

        self.transition(QueryState::of(&visibility));
        tracing::debug!(
            verdict = visibility.label(),
            branches = stats.branches,
            splits = stats.splits,
            rays = stats.rays_cast,
            "query finished"
        );
        Ok(QueryOutcome {
            visibility,
            state: self.state,
            stats,
        })
    }

    fn transition(&mut self, next: QueryState) {
        tracing::trace!(from = ?self.state, to = ?next, "query state");
        self.state = next;
    }
}

/// Run a query without sink, cache or cancellation.
pub fn query_visibility(
    source: impl Into<Primitive>,
    destination: impl Into<Primitive>,
    scene: &dyn Scene,
    cfg: &QueryCfg,
) -> Result<Visibility, VisError> {
    VisibilityQuery::new(source, destination, scene, cfg.clone())
        .run()
        .map(|o| o.visibility)
}

/// A polytope on the work list with the silhouettes still to apply to it.
struct Branch {
    polytope: PluckerPolytope,
    depth: usize,
    pending: Vec<SilhouetteId>,
}

enum Step {
    Empty,
    Occluded,
    Visible(Witness),
    Split,
}

enum Abort {
    /// Ends the whole query.
    Query(InconclusiveReason),
    /// Ends one branch; the others keep going.
    Branch(InconclusiveReason),
}

fn abort_branch(e: VisError) -> Abort {
    Abort::Branch(match e {
        VisError::SceneQueryFailed { reason, .. } => InconclusiveReason::SceneFailure(reason),
        other => InconclusiveReason::Numeric(other.to_string()),
    })
}

/// Runner carrying shared context and accumulators.
struct Runner<'r> {
    cfg: &'r QueryCfg,
    scene: &'r dyn Scene,
    pair: &'r SourcePair,
    /// `pair` in its own frame; polytopes and witnesses are computed here.
    local: &'r SourcePair,
    builder: PolytopeBuilder,
    arena: FacetArena,
    processor: SilhouetteProcessor<'r>,
    sink: &'r mut dyn DebugSink,
    cancel: Option<&'r AtomicBool>,
    deadline: Option<Instant>,
    work: Vec<Branch>,
    /// Distinct silhouettes applied anywhere, for the stats. Whether a branch
    /// already carries a silhouette is `PluckerPolytope::has_silhouette`.
    seen: HashSet<SilhouetteId>,
    stats: QueryStats,
}

impl<'r> Runner<'r> {
    fn solve(&mut self, root: PluckerPolytope) -> Visibility {
        self.work.push(Branch {
            polytope: root,
            depth: 0,
            pending: Vec::new(),
        });
        let mut aborted: Option<InconclusiveReason> = None;
        while let Some(branch) = self.work.pop() {
            if let Some(reason) = self.interrupted() {
                tracing::debug!(%reason, "query interrupted");
                return Visibility::Inconclusive(reason);
            }
            self.stats.branches += 1;
            self.stats.max_depth = self.stats.max_depth.max(branch.depth);
            let depth = branch.depth;
            let resolution = match self.resolve(branch) {
                Ok(Step::Split) => continue,
                Ok(Step::Visible(w)) => {
                    self.resolved(depth, BranchResolution::Visible);
                    return Visibility::Visible(w);
                }
                Ok(Step::Empty) => {
                    self.stats.empty_branches += 1;
                    BranchResolution::Empty
                }
                Ok(Step::Occluded) => {
                    self.stats.occluded_branches += 1;
                    BranchResolution::Occluded
                }
                Err(Abort::Query(reason)) => return Visibility::Inconclusive(reason),
                Err(Abort::Branch(reason)) => {
                    tracing::debug!(depth, %reason, "branch abandoned");
                    self.stats.aborted_branches += 1;
                    aborted.get_or_insert(reason);
                    BranchResolution::Aborted
                }
            };
            self.resolved(depth, resolution);
        }
        match aborted {
            Some(reason) => Visibility::Inconclusive(reason),
            None => Visibility::Occluded,
        }
    }

    /// Refine one branch until it resolves or splits.
    fn resolve(&mut self, mut branch: Branch) -> Result<Step, Abort> {
        let depth = branch.depth;
        if depth > self.cfg.max_recursion_depth {
            let e = VisError::exhausted(format!(
                "depth {depth} exceeds {}",
                self.cfg.max_recursion_depth
            ));
            tracing::warn!(%e, "branch abandoned");
            return Err(Abort::Branch(InconclusiveReason::RecursionDepth));
        }
        let facets = branch.polytope.facet_count();
        if facets > self.cfg.max_facet_count {
            let e = VisError::exhausted(format!(
                "{facets} facets exceed {}",
                self.cfg.max_facet_count
            ));
            tracing::warn!(%e, "branch abandoned");
            return Err(Abort::Branch(InconclusiveReason::FacetCount));
        }
        let Some(line) = branch.polytope.representative_line(self.cfg.quadric_tolerance) else {
            return Ok(Step::Empty);
        };
        if !self.cfg.representative_line_sampling {
            if let Some(w) = self.clear_extremal_line(&branch.polytope)? {
                return Ok(Step::Visible(w));
            }
        }
        let witness = self.witness(line)?;
        loop {
            if let Some(reason) = self.interrupted() {
                return Err(Abort::Query(reason));
            }
            while let Some(&sid) = branch.pending.first() {
                if self.split_by(&branch, sid)? {
                    return Ok(Step::Split);
                }
                branch.pending.remove(0);
                branch.polytope.add_silhouette(sid);
                self.seen.insert(sid);
                self.stats.silhouette_applications += 1;
                self.sink.record(&DebugEvent::SilhouetteApplied {
                    silhouette: sid,
                    depth,
                });
            }
            for &sid in branch.polytope.silhouettes() {
                let blocked = self
                    .processor
                    .silhouette(sid)
                    .is_some_and(|s| s.blocks(&witness.source, &witness.destination));
                if blocked {
                    return Ok(Step::Occluded);
                }
            }
            let Some(hit) = self.cast(&witness)? else {
                return Ok(Step::Visible(witness));
            };
            let (sid, _) = self
                .processor
                .silhouette_of(hit.face, self.sink)
                .map_err(abort_branch)?;
            if branch.polytope.has_silhouette(sid) {
                tracing::warn!(
                    silhouette = %sid,
                    face = %hit.face,
                    "ray hit an applied silhouette that did not block the witness"
                );
                return Ok(Step::Occluded);
            }
            branch.pending.push(sid);
        }
    }

    /// Split `branch` by the first edge of `sid` that cuts it, pushing both
    /// children. Returns whether a split happened.
    fn split_by(&mut self, branch: &Branch, sid: SilhouetteId) -> Result<bool, Abort> {
        let Some(silhouette) = self.processor.silhouette(sid) else {
            return Err(Abort::Branch(InconclusiveReason::Numeric(format!(
                "unknown silhouette {sid}"
            ))));
        };
        for (k, edge) in silhouette.edges.iter().enumerate() {
            let outcome = self
                .builder
                .split(
                    &mut self.arena,
                    &branch.polytope,
                    edge.line,
                    Provenance::Silhouette(silhouette.edge_key(k)),
                    branch.depth,
                    self.sink,
                )
                .map_err(abort_branch)?;
            let SplitOutcome::Split { positive, negative } = outcome else {
                self.sink.record(&DebugEvent::SilhouetteEdgeRejected {
                    face: edge.face,
                    edge: edge.edge,
                    reason: EdgeRejection::NoSplit,
                });
                continue;
            };
            self.stats.splits += 1;
            for polytope in [negative, positive] {
                self.work.push(Branch {
                    polytope,
                    depth: branch.depth + 1,
                    pending: branch.pending.clone(),
                });
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// The segment of the local `line` between the two carrier planes, in
    /// world coordinates and directed from the source to the destination.
    fn witness(&self, line: PluckerLine) -> Result<Witness, Abort> {
        let source = line.intersect_plane(&self.local.source_plane);
        let destination = line.intersect_plane(&self.local.destination_plane);
        let (Some(source), Some(destination)) = (source, destination) else {
            return Err(Abort::Branch(InconclusiveReason::Numeric(
                "representative line misses a carrier plane".into(),
            )));
        };
        let frame = &self.pair.frame;
        let (source, destination) = (frame.to_world(&source), frame.to_world(&destination));
        let line = PluckerLine::from_points(&source, &destination).map_err(abort_branch)?;
        Ok(Witness {
            source,
            destination,
            line,
        })
    }

    /// First extremal line of `polytope` whose segment reaches the destination
    /// unobstructed.
    fn clear_extremal_line(&mut self, polytope: &PluckerPolytope) -> Result<Option<Witness>, Abort> {
        for &line in polytope.extremal_lines() {
            if let Some(reason) = self.interrupted() {
                return Err(Abort::Query(reason));
            }
            let Ok(witness) = self.witness(line) else {
                continue;
            };
            if self.cast(&witness)?.is_none() {
                return Ok(Some(witness));
            }
        }
        Ok(None)
    }

    fn cast(&mut self, witness: &Witness) -> Result<Option<Hit>, Abort> {
        let ray = Ray::segment(&witness.source, &witness.destination, RAY_TRIM);
        let mut attempt = 0usize;
        loop {
            match self.scene.intersect(&ray) {
                Ok(hit) => {
                    self.stats.rays_cast += 1;
                    self.sink.record(&DebugEvent::RayCast {
                        hit: hit.map(|h| h.face),
                    });
                    return Ok(hit);
                }
                Err(e) if e.transient && attempt < self.cfg.scene_retries => {
                    attempt += 1;
                    self.stats.scene_retries += 1;
                    tracing::warn!(attempt, reason = %e, "retrying ray query");
                    self.sink.record(&DebugEvent::SceneRetry {
                        attempt: attempt as u32,
                        reason: e.reason,
                    });
                }
                Err(e) => {
                    tracing::warn!(reason = %e, "ray query failed");
                    return Err(abort_branch(e.into()));
                }
            }
        }
    }

    fn resolved(&mut self, depth: usize, resolution: BranchResolution) {
        self.sink.record(&DebugEvent::BranchResolved { depth, resolution });
    }

    fn interrupted(&self) -> Option<InconclusiveReason> {
        if self.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Some(InconclusiveReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(InconclusiveReason::Timeout);
        }
        None
    }
}

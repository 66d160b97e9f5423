//! Structured events emitted while a query runs.
//!
//! The library logs through `tracing`; a `DebugSink` additionally receives every
//! event as a value so callers and tests can inspect the run without parsing logs.

use crate::combinatorial::FacetId;
use crate::plucker::QuadricPosition;
use crate::polyhedron::Provenance;
use crate::scene::FaceRef;
use crate::silhouette::{EdgeKind, SilhouetteId};

/// How a branch of the work list ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchResolution {
    /// No real line left.
    Empty,
    /// Every line of the branch hits an applied silhouette.
    Occluded,
    /// The representative line reached the destination unobstructed.
    Visible,
    /// Scene failure, resource bound or numeric trouble.
    Aborted,
}

/// Why a face edge did not end up splitting a branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeRejection {
    /// Shared with a face of the same sheet that no query line sees folded.
    NoFold,
    /// Its bounding sphere lies outside the shaft between the query ends.
    OutsideShaft,
    /// The branch lies on one side of the edge's hyperplane.
    NoSplit,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DebugEvent {
    PolytopeBuilt {
        vertices: usize,
        edges: usize,
        facets: usize,
    },
    FacetAdded {
        facet: FacetId,
        provenance: Provenance,
    },
    VertexClassified {
        quadric: QuadricPosition,
    },
    NumericOverflow {
        context: String,
    },
    SplitPerformed {
        depth: usize,
        positive: usize,
        negative: usize,
    },
    SilhouetteComputed {
        silhouette: SilhouetteId,
        edges: usize,
        cached: bool,
    },
    SilhouetteApplied {
        silhouette: SilhouetteId,
        depth: usize,
    },
    /// Edge `edge` of `face` kept as a silhouette edge. For `Clip` edges the
    /// index names the carrier plane (0 source, 1 destination).
    SilhouetteEdgeAccepted {
        face: FaceRef,
        edge: usize,
        kind: EdgeKind,
    },
    SilhouetteEdgeRejected {
        face: FaceRef,
        edge: usize,
        reason: EdgeRejection,
    },
    RayCast {
        hit: Option<FaceRef>,
    },
    SceneRetry {
        attempt: u32,
        reason: String,
    },
    BranchResolved {
        depth: usize,
        resolution: BranchResolution,
    },
}

/// Receiver of debug events.
pub trait DebugSink {
    fn record(&mut self, event: &DebugEvent);
}

impl<S: DebugSink + ?Sized> DebugSink for &mut S {
    fn record(&mut self, event: &DebugEvent) {
        (**self).record(event)
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn record(&mut self, _event: &DebugEvent) {}
}

/// Keeps every event in order.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    pub events: Vec<DebugEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&DebugEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn splits(&self) -> usize {
        self.count(|e| matches!(e, DebugEvent::SplitPerformed { .. }))
    }

    /// Rejected edges with the given reason.
    pub fn rejections(&self, reason: EdgeRejection) -> usize {
        self.count(|e| {
            matches!(e, DebugEvent::SilhouetteEdgeRejected { reason: r, .. } if *r == reason)
        })
    }

    pub fn resolutions(&self) -> Vec<BranchResolution> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DebugEvent::BranchResolved { resolution, .. } => Some(*resolution),
                _ => None,
            })
            .collect()
    }
}

impl DebugSink for EventLog {
    fn record(&mut self, event: &DebugEvent) {
        self.events.push(event.clone());
    }
}

/// Counts events per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsCollector {
    pub polytopes_built: usize,
    pub facets_added: usize,
    pub vertices_classified: usize,
    pub numeric_drops: usize,
    pub splits: usize,
    pub silhouettes_computed: usize,
    pub silhouettes_cached: usize,
    pub silhouettes_applied: usize,
    pub edges_accepted: usize,
    pub edges_rejected: usize,
    pub rays_cast: usize,
    pub rays_hit: usize,
    pub scene_retries: usize,
    pub branches_resolved: usize,
}

impl DebugSink for StatsCollector {
    fn record(&mut self, event: &DebugEvent) {
        match event {
            DebugEvent::PolytopeBuilt { .. } => self.polytopes_built += 1,
            DebugEvent::FacetAdded { .. } => self.facets_added += 1,
            DebugEvent::VertexClassified { .. } => self.vertices_classified += 1,
            DebugEvent::NumericOverflow { .. } => self.numeric_drops += 1,
            DebugEvent::SplitPerformed { .. } => self.splits += 1,
            DebugEvent::SilhouetteComputed { cached, .. } => {
                self.silhouettes_computed += 1;
                if *cached {
                    self.silhouettes_cached += 1;
                }
            }
            DebugEvent::SilhouetteApplied { .. } => self.silhouettes_applied += 1,
            DebugEvent::SilhouetteEdgeAccepted { .. } => self.edges_accepted += 1,
            DebugEvent::SilhouetteEdgeRejected { .. } => self.edges_rejected += 1,
            DebugEvent::RayCast { hit } => {
                self.rays_cast += 1;
                if hit.is_some() {
                    self.rays_hit += 1;
                }
            }
            DebugEvent::SceneRetry { .. } => self.scene_retries += 1,
            DebugEvent::BranchResolved { .. } => self.branches_resolved += 1,
        }
    }
}

/// Forwards every event to two sinks.
pub struct Tee<'a> {
    pub first: &'a mut dyn DebugSink,
    pub second: &'a mut dyn DebugSink,
}

impl DebugSink for Tee<'_> {
    fn record(&mut self, event: &DebugEvent) {
        self.first.record(event);
        self.second.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_counts_by_kind() {
        let mut log = EventLog::new();
        {
            let sink: &mut dyn DebugSink = &mut log;
            sink.record(&DebugEvent::SplitPerformed {
                depth: 0,
                positive: 6,
                negative: 7,
            });
            sink.record(&DebugEvent::BranchResolved {
                depth: 1,
                resolution: BranchResolution::Empty,
            });
        }
        NoopSink.record(&DebugEvent::RayCast { hit: None });
        assert_eq!(log.splits(), 1);
        assert_eq!(log.resolutions(), vec![BranchResolution::Empty]);
        assert_eq!(log.events.len(), 2);
    }

    #[test]
    fn stats_collector_counts_hits_separately() {
        let mut stats = StatsCollector::default();
        let mut log = EventLog::new();
        {
            let mut tee = Tee {
                first: &mut stats,
                second: &mut log,
            };
            tee.record(&DebugEvent::RayCast { hit: None });
            tee.record(&DebugEvent::RayCast {
                hit: Some(FaceRef { mesh: 0, face: 3 }),
            });
            tee.record(&DebugEvent::SilhouetteComputed {
                silhouette: SilhouetteId(0),
                edges: 4,
                cached: true,
            });
        }
        assert_eq!(stats.rays_cast, 2);
        assert_eq!(stats.rays_hit, 1);
        assert_eq!(stats.silhouettes_cached, 1);
        assert_eq!(log.events.len(), 3);
    }

    #[test]
    fn edge_decisions_are_counted_by_outcome() {
        let face = FaceRef { mesh: 0, face: 1 };
        let mut stats = StatsCollector::default();
        let mut log = EventLog::new();
        {
            let mut tee = Tee {
                first: &mut stats,
                second: &mut log,
            };
            tee.record(&DebugEvent::SilhouetteEdgeAccepted {
                face,
                edge: 0,
                kind: EdgeKind::Mesh,
            });
            for (edge, reason) in [
                (1, EdgeRejection::NoFold),
                (2, EdgeRejection::OutsideShaft),
                (0, EdgeRejection::NoSplit),
            ] {
                tee.record(&DebugEvent::SilhouetteEdgeRejected { face, edge, reason });
            }
        }
        assert_eq!(stats.edges_accepted, 1);
        assert_eq!(stats.edges_rejected, 3);
        assert_eq!(log.rejections(EdgeRejection::NoSplit), 1);
        assert_eq!(log.rejections(EdgeRejection::NoFold), 1);
    }
}

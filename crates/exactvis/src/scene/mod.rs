//! Occluder scenes: ray casting and face adjacency over triangle geometry.
//!
//! The engine only talks to the `Scene` trait; `MeshScene` is the reference
//! backend and `synth` builds the synthetic scenes used by tests and the CLI.

mod mesh;
pub mod synth;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Vector3;

use crate::error::VisError;

pub use mesh::{MeshScene, TriangleMesh};

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a scene's geometry; silhouette caches are keyed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneId(u64);

impl SceneId {
    /// A process-unique id.
    pub fn fresh() -> Self {
        Self(NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A triangle of a scene: mesh index and face index within the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaceRef {
    pub mesh: u32,
    pub face: u32,
}

impl fmt::Display for FaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}:t{}", self.mesh, self.face)
    }
}

/// Half-open parametric segment `origin + t·dir`, `t ∈ [t_min, t_max]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f64>,
    pub dir: Vector3<f64>,
    pub t_min: f64,
    pub t_max: f64,
}

impl Ray {
    /// The segment `p → q` with `trim` removed at both ends (as a fraction of
    /// its length), so hits on the endpoint polygons themselves are ignored.
    pub fn segment(p: &Vector3<f64>, q: &Vector3<f64>, trim: f64) -> Self {
        Self {
            origin: *p,
            dir: q - p,
            t_min: trim,
            t_max: 1.0 - trim,
        }
    }

    pub fn at(&self, t: f64) -> Vector3<f64> {
        self.origin + self.dir * t
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub t: f64,
    pub point: Vector3<f64>,
    pub face: FaceRef,
}

/// Failure reported by a scene backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneError {
    pub reason: String,
    /// Retrying the same query may succeed.
    pub transient: bool,
}

impl SceneError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: false,
        }
    }
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.transient { "transient" } else { "permanent" };
        write!(f, "{kind} scene failure: {}", self.reason)
    }
}

impl std::error::Error for SceneError {}

impl From<SceneError> for VisError {
    fn from(e: SceneError) -> Self {
        VisError::SceneQueryFailed {
            reason: e.reason,
            transient: e.transient,
        }
    }
}

/// Read-only occluder geometry.
///
/// Edge `k` of a face joins its vertices `k` and `(k + 1) % 3`.
pub trait Scene {
    fn id(&self) -> SceneId;

    /// Nearest hit with `t ∈ [ray.t_min, ray.t_max]`.
    fn intersect(&self, ray: &Ray) -> Result<Option<Hit>, SceneError>;

    fn face(&self, face: FaceRef) -> Option<[Vector3<f64>; 3]>;

    /// The face across edge `edge` of `face`, if the edge is shared.
    fn adjacent_face(&self, face: FaceRef, edge: usize) -> Option<FaceRef>;
}

impl<S: Scene + ?Sized> Scene for &S {
    fn id(&self) -> SceneId {
        (**self).id()
    }

    fn intersect(&self, ray: &Ray) -> Result<Option<Hit>, SceneError> {
        (**self).intersect(ray)
    }

    fn face(&self, face: FaceRef) -> Option<[Vector3<f64>; 3]> {
        (**self).face(face)
    }

    fn adjacent_face(&self, face: FaceRef, edge: usize) -> Option<FaceRef> {
        (**self).adjacent_face(face, edge)
    }
}

//! wiretrace-core: Core types for wire-plane trajectory
//! reconstruction.
//!
//! This crate provides the data model shared by the reconstruction
//! passes: hits and the per-wire hit index, trajectories, 2D/3D
//! vertices, particle-flow objects, showers, the cut configuration
//! and the global identity allocator.
//!

pub mod config;
pub mod error;
pub mod geometry;
pub mod hit;
pub mod ids;
pub mod index;
pub mod pfp;
pub mod session;
pub mod shower;
pub mod slice;
pub mod traj;
pub mod vertex;

pub use config::{
    ChargeCuts, KinkCuts, Match3dCuts, RecoConfig, ShowerCuts, StopCuts, Vtx2dCuts, Vtx3dCuts,
};
pub use error::{ConfigError, SliceError};
pub use geometry::{
    DedxEstimator, Geometry, LinearDedx, PlaneCode, TpcId, UniformGeometry, VolumeBounds,
};
pub use hit::{Hit, SliceHit, HIT_UNUSED};
pub use ids::IdAllocator;
pub use index::{HitIndex, PlaneRanges, WireStatus};
pub use pfp::{MatchCandidate, Pfp, Pfp3Point, TjPoint2};
pub use session::{EventId, RecoSession};
pub use shower::{Shower3D, ShowerCluster2D, ShowerPoint};
pub use slice::RecoSlice;
pub use traj::{
    AlgFlags, AngleCode, EndFlags, Point2, Point3, ShapeCode, TpEnvironment, TrajPoint,
    Trajectory, Vector2, Vector3,
};
pub use vertex::{Vertex2D, Vertex3D, VtxStatus, VtxTopology};

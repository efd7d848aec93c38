//! wiretrace-algorithms: Reconstruction passes for wire-plane
//! trajectory building.
//!
//! The chain runs per slice: incremental trajectory stepping and 2D
//! vertex finding over the configured passes, then 3D vertexing, 3D
//! trajectory matching into particle-flow objects and 2D/3D shower
//! reconstruction. [`reco::reconstruct_event`] drives the whole
//! chain; the individual algorithms are exposed for finer control.

pub mod fit;
pub mod match3d;
pub mod reco;
pub mod shower2d;
pub mod shower3d;
pub mod stepper;
pub mod vertex2d;
pub mod vertex3d;

pub use fit::{delta_angle, fit_line, line_intersection, sep2, LineFit};
pub use match3d::Matcher3D;
pub use reco::{reconstruct_event, reconstruct_slice, EventResult, RecoStatistics, SliceInput};
pub use shower2d::ShowerFinder2D;
pub use shower3d::{update_shower3d, ShowerMatcher3D};
pub use stepper::TrajStepper;
pub use vertex2d::{attach_end_to_middle, VertexFinder};
pub use vertex3d::Vertex3dMatcher;

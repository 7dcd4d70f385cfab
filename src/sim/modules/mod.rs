//! Reference modules.
//!
//! Small, deterministic building blocks that exercise the framework end to
//! end. They are not meant as production solvers.

pub mod boundary;
pub mod color;
pub mod dynamics;
pub mod norm;
pub mod snapshot;

pub use boundary::BoundaryClamp;
pub use color::{ColorMapping, Rgb, jet};
pub use dynamics::{ExplicitEuler, GravityForce};
pub use norm::CalculateNorm;
pub use snapshot::{PointFrame, PointSnapshot};

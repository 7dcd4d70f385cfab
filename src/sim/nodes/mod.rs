//! Node kinds built from the reference modules.

pub mod group;
pub mod particles;

pub use group::Group;
pub use particles::ParticleCloud;

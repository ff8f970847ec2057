//! 2D particle-based fluid and soft-body simulation.
//!
//! A single [`ParticleSystem`] owns a structure-of-arrays arena of point
//! particles and advances them under gravity, inter-particle forces
//! (pressure, viscosity, surface tension, elasticity, springs, powder
//! repulsion) and two-way collision coupling with a host rigid-body world.
//! Particle behavior is selected per particle with flag bits; groups of
//! particles can additionally act as solids or rigid bodies.
//!
//! The host world is anything implementing [`RigidWorld`]; a standalone
//! simulation can use [`NullWorld`].
//!
//! # Example
//!
//! ```
//! use silt2d::{NullWorld, ParticleDef, ParticleSystem, ParticleSystemDef, TimeStep};
//! use glam::Vec2;
//!
//! let mut world = NullWorld::default();
//! let mut system = ParticleSystem::new(&ParticleSystemDef {
//!     radius: 0.1,
//!     ..Default::default()
//! });
//!
//! // Drop a small blob of fluid particles.
//! for i in 0..10 {
//!     for j in 0..10 {
//!         let def = ParticleDef {
//!             position: Vec2::new(i as f32 * 0.15, j as f32 * 0.15),
//!             ..Default::default()
//!         };
//!         system.create_particle(&world, &def);
//!     }
//! }
//!
//! // Run the simulation.
//! let step = TimeStep::new(1.0 / 60.0, 3);
//! for _ in 0..10 {
//!     system.solve(&mut world, &step);
//! }
//! ```

pub mod buffer;
pub mod constants;
pub mod coupling;
pub mod group;
pub mod math;
pub mod particle;
pub mod shapes;
pub mod system;
mod voronoi;

pub use coupling::{
    BodyId, DestructionListener, FixtureId, NullWorld, RayCastHit, RayCastInput, RigidWorld,
};
pub use glam::Vec2;
pub use group::{
    GroupHandle, ParticleGroup, ParticleGroupDef, PARTICLE_GROUP_CAN_BE_EMPTY,
    RIGID_PARTICLE_GROUP, SOLID_PARTICLE_GROUP,
};
pub use math::{Aabb, Rot, Transform};
pub use particle::{ParticleColor, ParticleDef, UserData};
pub use shapes::{BoxShape, ChainShape, CircleShape, EdgeShape, Shape};
pub use system::{
    ParticleBodyContact, ParticleContact, ParticlePair, ParticleSystem, ParticleSystemDef,
    ParticleTriad, TimeStep,
};

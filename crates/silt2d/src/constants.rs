//! Solver tuning constants.
//!
//! These are definition-time parameters of the solver, not user tunables:
//! changing them changes the meaning of the kernels (weights, pressure
//! clamps, triad eligibility), so they live here as module constants rather
//! than on [`crate::ParticleSystemDef`].

/// Initial capacity of the internal particle buffers. Buffers grow by
/// doubling from here.
pub const MIN_PARTICLE_BUFFER_CAPACITY: usize = 256;

/// Contact weight below which a particle contributes no pressure. Two
/// particles half a diameter apart (weight 0.5) must already repel.
pub const MIN_PARTICLE_WEIGHT: f32 = 0.25;

/// Upper clamp on particle pressure, as a fraction of the critical pressure.
pub const MAX_PARTICLE_PRESSURE: f32 = 0.25;

/// Spacing of stamped particles relative to the particle diameter. Also
/// enters the powder kernel threshold and the particle mass.
pub const PARTICLE_STRIDE: f32 = 0.75;

/// Squared upper bound on triad edge length, in diameters. Delaunay triples
/// with any longer edge are rejected at group creation.
pub const MAX_TRIAD_DISTANCE_SQUARED: f32 = 4.0;

/// How far ahead (in timesteps) the barrier kernel predicts crossings.
pub const BARRIER_COLLISION_TIME: f32 = 2.5;

/// Collision slop: particles stopped on a fixture surface are offset
/// outward by this much (meters).
pub const LINEAR_SLOP: f32 = 0.005;

/// Sentinel returned by particle creation when capacity is exhausted, and
/// written into index-bearing structures during compaction.
pub const INVALID_PARTICLE_INDEX: i32 = -1;

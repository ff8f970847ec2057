//! Two-way coupling surface to the host rigid-body world.
//!
//! The particle core never owns bodies or fixtures. It sees the host world
//! through [`RigidWorld`], addressing bodies and fixtures by copyable ids
//! that are only meaningful for the duration of the sub-step that reported
//! them. Hosts with their own physics engine implement this trait over
//! their body/collider sets; [`NullWorld`] serves standalone simulations.

use crate::group::GroupHandle;
use crate::math::{Aabb, Transform};
use glam::Vec2;

/// Host-world body handle. Opaque to the particle core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyId(pub u32);

/// Host-world fixture handle. Opaque to the particle core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixtureId(pub u32);

/// Input to a fixture ray cast.
#[derive(Clone, Copy, Debug)]
pub struct RayCastInput {
    pub p1: Vec2,
    pub p2: Vec2,
    pub max_fraction: f32,
}

/// A ray-cast hit on a fixture.
#[derive(Clone, Copy, Debug)]
pub struct RayCastHit {
    /// Outward surface normal at the hit point.
    pub normal: Vec2,
    /// Fraction along `p1..p2` of the hit.
    pub fraction: f32,
}

/// Notification hooks invoked when particles or groups are destroyed.
pub trait DestructionListener {
    /// A particle flagged for the listener is about to be compacted away.
    /// `index` is valid until the compaction pass returns.
    fn say_goodbye_particle(&mut self, index: i32);

    /// A group is about to be destroyed. The handle becomes dangling once
    /// destruction completes.
    fn say_goodbye_group(&mut self, group: GroupHandle);
}

/// The surface the particle core consumes from a host rigid-body world.
///
/// Fixture and body accessors are only called with ids previously reported
/// by `query_aabb` during the same sub-step.
pub trait RigidWorld {
    /// World gravity, scaled by the system's gravity scale before use.
    fn gravity(&self) -> Vec2;

    /// True while the host is mid-step and mutation of the particle system
    /// is forbidden. Guarded calls no-op when this returns true.
    fn is_locked(&self) -> bool {
        false
    }

    /// Invoke `report` for every fixture whose AABB overlaps `aabb`;
    /// returning `false` stops the query.
    fn query_aabb(&self, aabb: &Aabb, report: &mut dyn FnMut(FixtureId) -> bool);

    // Fixture accessors.

    /// Sensor fixtures generate no particle contacts.
    fn is_sensor(&self, fixture: FixtureId) -> bool;
    /// Number of child primitives of the fixture's shape.
    fn child_count(&self, fixture: FixtureId) -> usize;
    /// World AABB of one child of the fixture.
    fn child_aabb(&self, fixture: FixtureId, child: usize) -> Aabb;
    /// Fixture material density.
    fn density(&self, fixture: FixtureId) -> f32;
    /// The body the fixture is attached to.
    fn body_of(&self, fixture: FixtureId) -> BodyId;
    /// World-space point containment.
    fn test_point(&self, fixture: FixtureId, p: Vec2) -> bool;
    /// Signed distance from `p` to the fixture child, with the outward
    /// normal at the closest feature.
    fn compute_distance(&self, fixture: FixtureId, p: Vec2, child: usize) -> (f32, Vec2);
    /// Ray cast against one fixture child.
    fn ray_cast(&self, fixture: FixtureId, input: &RayCastInput, child: usize)
        -> Option<RayCastHit>;

    // Body accessors.

    fn world_center(&self, body: BodyId) -> Vec2;
    fn local_center(&self, body: BodyId) -> Vec2;
    fn mass(&self, body: BodyId) -> f32;
    /// Rotational inertia about the body origin (not the center of mass).
    fn inertia(&self, body: BodyId) -> f32;
    fn linear_velocity(&self, body: BodyId) -> Vec2;
    fn angular_velocity(&self, body: BodyId) -> f32;
    fn linear_velocity_from_world_point(&self, body: BodyId, p: Vec2) -> Vec2;
    fn apply_linear_impulse(&mut self, body: BodyId, impulse: Vec2, point: Vec2);
    fn set_linear_velocity(&mut self, body: BodyId, v: Vec2);
    fn set_angular_velocity(&mut self, body: BodyId, w: f32);
    /// Current body transform.
    fn transform(&self, body: BodyId) -> Transform;
    /// Body transform at the start of the host step, used to back-project
    /// particles on the first solver iteration.
    fn step_start_transform(&self, body: BodyId) -> Transform;
}

/// A host world with gravity and nothing else: no fixtures, never locked.
#[derive(Clone, Copy, Debug)]
pub struct NullWorld {
    pub gravity: Vec2,
}

impl NullWorld {
    pub fn new(gravity: Vec2) -> Self {
        Self { gravity }
    }
}

impl Default for NullWorld {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -9.81),
        }
    }
}

impl RigidWorld for NullWorld {
    fn gravity(&self) -> Vec2 {
        self.gravity
    }

    fn query_aabb(&self, _aabb: &Aabb, _report: &mut dyn FnMut(FixtureId) -> bool) {}

    fn is_sensor(&self, _fixture: FixtureId) -> bool {
        unreachable!("NullWorld reports no fixtures")
    }

    fn child_count(&self, _fixture: FixtureId) -> usize {
        unreachable!("NullWorld reports no fixtures")
    }

    fn child_aabb(&self, _fixture: FixtureId, _child: usize) -> Aabb {
        unreachable!("NullWorld reports no fixtures")
    }

    fn density(&self, _fixture: FixtureId) -> f32 {
        unreachable!("NullWorld reports no fixtures")
    }

    fn body_of(&self, _fixture: FixtureId) -> BodyId {
        unreachable!("NullWorld reports no fixtures")
    }

    fn test_point(&self, _fixture: FixtureId, _p: Vec2) -> bool {
        unreachable!("NullWorld reports no fixtures")
    }

    fn compute_distance(&self, _fixture: FixtureId, _p: Vec2, _child: usize) -> (f32, Vec2) {
        unreachable!("NullWorld reports no fixtures")
    }

    fn ray_cast(
        &self,
        _fixture: FixtureId,
        _input: &RayCastInput,
        _child: usize,
    ) -> Option<RayCastHit> {
        unreachable!("NullWorld reports no fixtures")
    }

    fn world_center(&self, _body: BodyId) -> Vec2 {
        unreachable!("NullWorld has no bodies")
    }

    fn local_center(&self, _body: BodyId) -> Vec2 {
        unreachable!("NullWorld has no bodies")
    }

    fn mass(&self, _body: BodyId) -> f32 {
        unreachable!("NullWorld has no bodies")
    }

    fn inertia(&self, _body: BodyId) -> f32 {
        unreachable!("NullWorld has no bodies")
    }

    fn linear_velocity(&self, _body: BodyId) -> Vec2 {
        unreachable!("NullWorld has no bodies")
    }

    fn angular_velocity(&self, _body: BodyId) -> f32 {
        unreachable!("NullWorld has no bodies")
    }

    fn linear_velocity_from_world_point(&self, _body: BodyId, _p: Vec2) -> Vec2 {
        unreachable!("NullWorld has no bodies")
    }

    fn apply_linear_impulse(&mut self, _body: BodyId, _impulse: Vec2, _point: Vec2) {
        unreachable!("NullWorld has no bodies")
    }

    fn set_linear_velocity(&mut self, _body: BodyId, _v: Vec2) {
        unreachable!("NullWorld has no bodies")
    }

    fn set_angular_velocity(&mut self, _body: BodyId, _w: f32) {
        unreachable!("NullWorld has no bodies")
    }

    fn transform(&self, _body: BodyId) -> Transform {
        unreachable!("NullWorld has no bodies")
    }

    fn step_start_transform(&self, _body: BodyId) -> Transform {
        unreachable!("NullWorld has no bodies")
    }
}

//! Shared test fixtures: a minimal host world of axis-aligned box fixtures.
#![allow(dead_code)]

use glam::Vec2;
use silt2d::{Aabb, BodyId, FixtureId, RayCastHit, RayCastInput, RigidWorld, Transform};

pub struct TestBody {
    pub mass: f32,
    /// Rotational inertia about the center of mass.
    pub inertia: f32,
    pub center: Vec2,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub transform: Transform,
    pub transform0: Transform,
    /// Every (impulse, point) applied by the solver, for assertions.
    pub applied_impulses: Vec<(Vec2, Vec2)>,
}

pub struct TestFixture {
    pub body: usize,
    pub center: Vec2,
    pub half_extents: Vec2,
    pub density: f32,
    pub sensor: bool,
}

/// A host world holding axis-aligned box fixtures.
pub struct TestWorld {
    pub gravity: Vec2,
    pub bodies: Vec<TestBody>,
    pub fixtures: Vec<TestFixture>,
    pub locked: bool,
}

impl TestWorld {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            bodies: Vec::new(),
            fixtures: Vec::new(),
            locked: false,
        }
    }

    fn add_body(&mut self, center: Vec2, mass: f32, inertia: f32) -> usize {
        self.bodies.push(TestBody {
            mass,
            inertia,
            center,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            transform: Transform::new(center, 0.0),
            transform0: Transform::new(center, 0.0),
            applied_impulses: Vec::new(),
        });
        self.bodies.len() - 1
    }

    /// An immovable box fixture on its own static body.
    pub fn add_static_box(&mut self, center: Vec2, half_extents: Vec2) -> FixtureId {
        let body = self.add_body(center, 0.0, 0.0);
        self.fixtures.push(TestFixture {
            body,
            center,
            half_extents,
            density: 1.0,
            sensor: false,
        });
        FixtureId(self.fixtures.len() as u32 - 1)
    }

    /// A box fixture on a body with finite mass.
    pub fn add_dynamic_box(
        &mut self,
        center: Vec2,
        half_extents: Vec2,
        mass: f32,
        inertia: f32,
    ) -> FixtureId {
        let body = self.add_body(center, mass, inertia);
        self.fixtures.push(TestFixture {
            body,
            center,
            half_extents,
            density: 1.0,
            sensor: false,
        });
        FixtureId(self.fixtures.len() as u32 - 1)
    }

    pub fn body_of_fixture(&self, fixture: FixtureId) -> &TestBody {
        &self.bodies[self.fixtures[fixture.0 as usize].body]
    }

    fn fixture(&self, id: FixtureId) -> &TestFixture {
        &self.fixtures[id.0 as usize]
    }

    fn fixture_aabb(&self, id: FixtureId) -> Aabb {
        let f = self.fixture(id);
        Aabb::new(f.center - f.half_extents, f.center + f.half_extents)
    }
}

impl RigidWorld for TestWorld {
    fn gravity(&self) -> Vec2 {
        self.gravity
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn query_aabb(&self, aabb: &Aabb, report: &mut dyn FnMut(FixtureId) -> bool) {
        for i in 0..self.fixtures.len() {
            let id = FixtureId(i as u32);
            if self.fixture_aabb(id).overlaps(aabb) && !report(id) {
                return;
            }
        }
    }

    fn is_sensor(&self, fixture: FixtureId) -> bool {
        self.fixture(fixture).sensor
    }

    fn child_count(&self, _fixture: FixtureId) -> usize {
        1
    }

    fn child_aabb(&self, fixture: FixtureId, _child: usize) -> Aabb {
        self.fixture_aabb(fixture)
    }

    fn density(&self, fixture: FixtureId) -> f32 {
        self.fixture(fixture).density
    }

    fn body_of(&self, fixture: FixtureId) -> BodyId {
        BodyId(self.fixture(fixture).body as u32)
    }

    fn test_point(&self, fixture: FixtureId, p: Vec2) -> bool {
        let f = self.fixture(fixture);
        let d = p - f.center;
        d.x.abs() <= f.half_extents.x && d.y.abs() <= f.half_extents.y
    }

    fn compute_distance(&self, fixture: FixtureId, p: Vec2, _child: usize) -> (f32, Vec2) {
        let f = self.fixture(fixture);
        let d = p - f.center;
        let ex = d.x.abs() - f.half_extents.x;
        let ey = d.y.abs() - f.half_extents.y;
        if ex > 0.0 || ey > 0.0 {
            // Outside: distance to the nearest corner or face.
            let qx = ex.max(0.0);
            let qy = ey.max(0.0);
            let dist = (qx * qx + qy * qy).sqrt();
            let normal = Vec2::new(qx * d.x.signum(), qy * d.y.signum()) / dist;
            (dist, normal)
        } else if ex > ey {
            // Inside: negative distance out the nearest vertical face.
            (ex, Vec2::new(d.x.signum(), 0.0))
        } else {
            (ey, Vec2::new(0.0, d.y.signum()))
        }
    }

    fn ray_cast(
        &self,
        fixture: FixtureId,
        input: &RayCastInput,
        _child: usize,
    ) -> Option<RayCastHit> {
        let aabb = self.fixture_aabb(fixture);
        let d = input.p2 - input.p1;
        let mut tmin = f32::MIN;
        let mut tmax = f32::MAX;
        let mut normal = Vec2::ZERO;
        for axis in 0..2 {
            let (p, dir, lower, upper) = if axis == 0 {
                (input.p1.x, d.x, aabb.lower.x, aabb.upper.x)
            } else {
                (input.p1.y, d.y, aabb.lower.y, aabb.upper.y)
            };
            if dir.abs() < 1e-12 {
                if p < lower || p > upper {
                    return None;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t1 = (lower - p) * inv;
                let mut t2 = (upper - p) * inv;
                let mut n = if axis == 0 {
                    Vec2::new(-1.0, 0.0)
                } else {
                    Vec2::new(0.0, -1.0)
                };
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                    n = -n;
                }
                if t1 > tmin {
                    tmin = t1;
                    normal = n;
                }
                tmax = tmax.min(t2);
            }
        }
        if tmin >= 0.0 && tmin <= tmax && tmin <= input.max_fraction {
            Some(RayCastHit {
                normal,
                fraction: tmin,
            })
        } else {
            None
        }
    }

    fn world_center(&self, body: BodyId) -> Vec2 {
        self.bodies[body.0 as usize].center
    }

    fn local_center(&self, _body: BodyId) -> Vec2 {
        Vec2::ZERO
    }

    fn mass(&self, body: BodyId) -> f32 {
        self.bodies[body.0 as usize].mass
    }

    fn inertia(&self, body: BodyId) -> f32 {
        self.bodies[body.0 as usize].inertia
    }

    fn linear_velocity(&self, body: BodyId) -> Vec2 {
        self.bodies[body.0 as usize].linear_velocity
    }

    fn angular_velocity(&self, body: BodyId) -> f32 {
        self.bodies[body.0 as usize].angular_velocity
    }

    fn linear_velocity_from_world_point(&self, body: BodyId, p: Vec2) -> Vec2 {
        let b = &self.bodies[body.0 as usize];
        let r = p - b.center;
        b.linear_velocity + Vec2::new(-b.angular_velocity * r.y, b.angular_velocity * r.x)
    }

    fn apply_linear_impulse(&mut self, body: BodyId, impulse: Vec2, point: Vec2) {
        let b = &mut self.bodies[body.0 as usize];
        b.applied_impulses.push((impulse, point));
        if b.mass > 0.0 {
            b.linear_velocity += impulse / b.mass;
            if b.inertia > 0.0 {
                let r = point - b.center;
                b.angular_velocity += r.perp_dot(impulse) / b.inertia;
            }
        }
    }

    fn set_linear_velocity(&mut self, body: BodyId, v: Vec2) {
        self.bodies[body.0 as usize].linear_velocity = v;
    }

    fn set_angular_velocity(&mut self, body: BodyId, w: f32) {
        self.bodies[body.0 as usize].angular_velocity = w;
    }

    fn transform(&self, body: BodyId) -> Transform {
        self.bodies[body.0 as usize].transform
    }

    fn step_start_transform(&self, body: BodyId) -> Transform {
        self.bodies[body.0 as usize].transform0
    }
}

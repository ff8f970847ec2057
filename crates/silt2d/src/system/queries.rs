//! Read-only queries over the particle set.
//!
//! All queries walk the sorted proxy array, so they are only exact after a
//! broad-phase pass; between steps they reflect the last solved state.

use super::ParticleSystem;
use crate::math::{Aabb, Transform};
use crate::shapes::Shape;
use glam::Vec2;

impl ParticleSystem {
    /// Invoke `callback` for every particle strictly inside `aabb`;
    /// returning `false` stops the query.
    pub fn query_aabb(&self, aabb: &Aabb, callback: &mut dyn FnMut(i32) -> bool) {
        if self.proxy_buffer.is_empty() {
            return;
        }
        let (first, last) = self.proxy_range_for_aabb(aabb);
        for k in first..last {
            let i = self.proxy_buffer[k].index;
            let p = self.position_buffer[i as usize];
            if aabb.contains_strict(p) && !callback(i) {
                break;
            }
        }
    }

    /// Query the AABB of `shape` under `xf`.
    pub fn query_shape_aabb(
        &self,
        shape: &dyn Shape,
        xf: &Transform,
        callback: &mut dyn FnMut(i32) -> bool,
    ) {
        let aabb = shape.compute_aabb(xf, 0);
        self.query_aabb(&aabb, callback);
    }

    /// Cast a segment against the particles, treating each as a disc of one
    /// diameter. `callback(index, point, normal, fraction)` returns the new
    /// clipping fraction: return the passed fraction to continue clipped,
    /// 1 to continue unclipped, or 0 to stop.
    pub fn ray_cast(
        &self,
        point1: Vec2,
        point2: Vec2,
        callback: &mut dyn FnMut(i32, Vec2, Vec2, f32) -> f32,
    ) {
        if self.proxy_buffer.is_empty() {
            return;
        }
        let lower = point1.min(point2);
        let upper = point1.max(point2);
        let aabb = Aabb::new(
            lower - Vec2::splat(self.particle_diameter),
            upper + Vec2::splat(self.particle_diameter),
        );
        let (first, last) = self.proxy_range_for_aabb(&aabb);
        let mut fraction = 1.0f32;
        // Solve ((1-t)*point1 + t*point2 - position)^2 = diameter^2 for the
        // entry fraction t of each candidate disc.
        let v = point2 - point1;
        let v2 = v.dot(v);
        for k in first..last {
            let i = self.proxy_buffer[k].index;
            let p = point1 - self.position_buffer[i as usize];
            let pv = p.dot(v);
            let p2 = p.dot(p);
            let determinant = pv * pv - v2 * (p2 - self.squared_diameter);
            if determinant < 0.0 {
                continue;
            }
            let sqrt_determinant = determinant.sqrt();
            // Find a solution between 0 and the current fraction.
            let mut t = (-pv - sqrt_determinant) / v2;
            if t > fraction {
                continue;
            }
            if t < 0.0 {
                t = (-pv + sqrt_determinant) / v2;
                if t < 0.0 || t > fraction {
                    continue;
                }
            }
            let n = (p + t * v).normalize();
            let f = callback(i, point1 + t * v, n, t);
            fraction = fraction.min(f);
            if fraction <= 0.0 {
                break;
            }
        }
    }

    /// Kinetic energy of approaching contacts; a measure of how strongly
    /// the particles are colliding with each other.
    pub fn compute_particle_collision_energy(&self) -> f32 {
        let mut sum_v2 = 0.0;
        for contact in &self.contact_buffer {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let n = contact.normal;
            let v = self.velocity_buffer[b] - self.velocity_buffer[a];
            let vn = v.dot(n);
            if vn < 0.0 {
                sum_v2 += vn * vn;
            }
        }
        0.5 * self.particle_mass() * sum_v2
    }
}

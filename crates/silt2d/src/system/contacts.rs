//! Spatial hash and broad phase.
//!
//! The plane is partitioned into a virtual grid of cells one particle
//! diameter on a side. Each particle's cell is encoded into a 32-bit tag
//! with y in the high bits and x in the low bits, so that sorting proxies
//! by tag orders them row-major; neighbors are then enumerated with two
//! forward cursors (same row and the row below) without ever materializing
//! the grid.

use super::{ParticleBodyContact, ParticleContact, ParticleSystem};
use crate::coupling::RigidWorld;
use crate::math::{inv_sqrt, Aabb};
use crate::particle::{WALL_PARTICLE, ZOMBIE_PARTICLE};

const X_TRUNC_BITS: u32 = 12;
const Y_TRUNC_BITS: u32 = 12;
const TAG_BITS: u32 = 32;
const Y_OFFSET: u32 = 1 << (Y_TRUNC_BITS - 1);
const Y_SHIFT: u32 = TAG_BITS - Y_TRUNC_BITS;
const X_SHIFT: u32 = TAG_BITS - Y_TRUNC_BITS - X_TRUNC_BITS;
const X_SCALE: u32 = 1 << X_SHIFT;
const X_OFFSET: u32 = X_SCALE * (1 << (X_TRUNC_BITS - 1));

/// Grid-cell tag of a position given in inverse-diameter units.
#[inline]
pub(crate) fn compute_tag(x: f32, y: f32) -> u32 {
    (((y + Y_OFFSET as f32) as u32) << Y_SHIFT)
        .wrapping_add((X_SCALE as f32 * x + X_OFFSET as f32) as u32)
}

/// Tag of the cell `(x, y)` grid steps away from `tag`.
#[inline]
pub(crate) fn compute_relative_tag(tag: u32, x: i32, y: i32) -> u32 {
    tag.wrapping_add(((y as u32) << Y_SHIFT).wrapping_add((x as u32) << X_SHIFT))
}

/// Contacts processed per particle by the strict filter, nearest first.
/// Must be at least 2 for correctness with concave fixture arrangements.
const MAX_CONTACTS_PER_POINT: i32 = 3;

impl ParticleSystem {
    /// First proxy whose tag is not less than `tag`.
    pub(crate) fn lower_bound_proxy(&self, tag: u32) -> usize {
        self.proxy_buffer.partition_point(|proxy| proxy.tag < tag)
    }

    /// First proxy whose tag is greater than `tag`.
    pub(crate) fn upper_bound_proxy(&self, tag: u32) -> usize {
        self.proxy_buffer.partition_point(|proxy| proxy.tag <= tag)
    }

    /// Proxy range whose tags span `aabb` (given in world units).
    pub(crate) fn proxy_range_for_aabb(&self, aabb: &Aabb) -> (usize, usize) {
        let first = self.lower_bound_proxy(compute_tag(
            self.inverse_diameter * aabb.lower.x,
            self.inverse_diameter * aabb.lower.y,
        ));
        let last = self.upper_bound_proxy(compute_tag(
            self.inverse_diameter * aabb.upper.x,
            self.inverse_diameter * aabb.upper.y,
        ));
        (first, last)
    }

    fn add_contact(&mut self, a: i32, b: i32) {
        // Keep index_a < index_b; the kernels are symmetric under swapping
        // endpoints and negating the normal.
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let d = self.position_buffer[b as usize] - self.position_buffer[a as usize];
        let dist_squared = d.dot(d);
        if dist_squared < self.squared_diameter {
            let inv_d = inv_sqrt(dist_squared);
            self.contact_buffer.push(ParticleContact {
                index_a: a,
                index_b: b,
                flags: self.flags_buffer[a as usize] | self.flags_buffer[b as usize],
                weight: 1.0 - dist_squared * inv_d * self.inverse_diameter,
                normal: inv_d * d,
            });
        }
    }

    /// Rebuild the particle-particle contact list from current positions.
    pub(crate) fn update_contacts(&mut self, except_zombie: bool) {
        for k in 0..self.proxy_buffer.len() {
            let i = self.proxy_buffer[k].index as usize;
            let p = self.position_buffer[i];
            self.proxy_buffer[k].tag =
                compute_tag(self.inverse_diameter * p.x, self.inverse_diameter * p.y);
        }
        self.proxy_buffer
            .sort_unstable_by_key(|proxy| (proxy.tag, proxy.index));

        self.contact_buffer.clear();
        let n = self.proxy_buffer.len();
        let mut c = 0usize;
        for a in 0..n {
            let proxy_a = self.proxy_buffer[a];
            // Same cell and the cell to the right.
            let right_tag = compute_relative_tag(proxy_a.tag, 1, 0);
            for b in a + 1..n {
                let proxy_b = self.proxy_buffer[b];
                if right_tag < proxy_b.tag {
                    break;
                }
                self.add_contact(proxy_a.index, proxy_b.index);
            }
            // The row below, from one cell left to one cell right.
            let bottom_left_tag = compute_relative_tag(proxy_a.tag, -1, 1);
            while c < n && self.proxy_buffer[c].tag < bottom_left_tag {
                c += 1;
            }
            let bottom_right_tag = compute_relative_tag(proxy_a.tag, 1, 1);
            for b in c..n {
                let proxy_b = self.proxy_buffer[b];
                if bottom_right_tag < proxy_b.tag {
                    break;
                }
                self.add_contact(proxy_a.index, proxy_b.index);
            }
        }
        if except_zombie {
            self.contact_buffer
                .retain(|contact| contact.flags & ZOMBIE_PARTICLE == 0);
        }
    }

    /// Rebuild the particle-fixture contact list by querying the host
    /// world with the particles' expanded bounding box.
    pub(crate) fn update_body_contacts<W: RigidWorld>(&mut self, world: &W) {
        let mut aabb = Aabb::EMPTY;
        for i in 0..self.count {
            aabb.extend(self.position_buffer[i]);
        }
        aabb.expand(self.particle_diameter);
        self.body_contact_buffer.clear();

        let mut fixtures = Vec::new();
        world.query_aabb(&aabb, &mut |fixture| {
            fixtures.push(fixture);
            true
        });
        for fixture in fixtures {
            if world.is_sensor(fixture) {
                continue;
            }
            let body = world.body_of(fixture);
            let bp = world.world_center(body);
            let bm = world.mass(body);
            let b_inertia =
                world.inertia(body) - bm * world.local_center(body).length_squared();
            let inv_bm = if bm > 0.0 { 1.0 / bm } else { 0.0 };
            let inv_bi = if b_inertia > 0.0 { 1.0 / b_inertia } else { 0.0 };
            for child in 0..world.child_count(fixture) {
                let mut child_aabb = world.child_aabb(fixture, child);
                child_aabb.expand(self.particle_diameter);
                let (first, last) = self.proxy_range_for_aabb(&child_aabb);
                for k in first..last {
                    let a = self.proxy_buffer[k].index;
                    let ap = self.position_buffer[a as usize];
                    if !child_aabb.contains(ap) {
                        continue;
                    }
                    let (d, n) = world.compute_distance(fixture, ap, child);
                    if d < self.particle_diameter {
                        let inv_am = if self.flags_buffer[a as usize] & WALL_PARTICLE != 0 {
                            0.0
                        } else {
                            self.particle_inv_mass()
                        };
                        let rp = ap - bp;
                        let rpn = rp.perp_dot(n);
                        let inv_m = inv_am + inv_bm + inv_bi * rpn * rpn;
                        self.body_contact_buffer.push(ParticleBodyContact {
                            index: a,
                            body,
                            fixture,
                            weight: 1.0 - d * self.inverse_diameter,
                            normal: -n,
                            mass: if inv_m > 0.0 { 1.0 / inv_m } else { 0.0 },
                        });
                    }
                }
            }
        }

        if self.strict_contact_check {
            self.remove_spurious_body_contacts(world);
        }
    }

    /// Discard body contacts whose normals cannot have come from the
    /// fixture that generated them.
    ///
    /// The AABB query reports every collidable fixture overlapping the
    /// particle bounds; around vertices where two fixtures meet (a ground
    /// made of several boxes, say) this produces normals that would apply
    /// spurious impulses. For each particle, walk its contacts nearest to
    /// farthest, project a point back along the contact normal to the
    /// contact distance, and keep the contact only if that point lies on
    /// the generating fixture.
    fn remove_spurious_body_contacts<W: RigidWorld>(&mut self, world: &W) {
        self.body_contact_buffer.sort_unstable_by(|lhs, rhs| {
            lhs.index
                .cmp(&rhs.index)
                .then(rhs.weight.total_cmp(&lhs.weight))
        });

        let positions = self.position_buffer.as_slice();
        let diameter = self.particle_diameter;
        let mut last_index = -1;
        let mut current_contacts = 0;
        let mut discarded = 0;
        self.body_contact_buffer.retain(|contact| {
            if contact.index != last_index {
                current_contacts = 0;
                last_index = contact.index;
            }
            let over_limit = current_contacts > MAX_CONTACTS_PER_POINT;
            current_contacts += 1;
            if over_limit {
                discarded += 1;
                return false;
            }
            let n = contact.normal * (diameter * (1.0 - contact.weight));
            let pos = positions[contact.index as usize] + n;
            if !world.test_point(contact.fixture, pos) {
                discarded += 1;
                return false;
            }
            true
        });
        if discarded > 0 {
            log::debug!("discarded {discarded} spurious body contacts");
        }
    }
}

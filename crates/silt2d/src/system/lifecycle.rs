//! Particle and group lifecycle: creation, destruction, joining, and the
//! zombie compaction that keeps every derived index consistent.

use super::{ParticlePair, ParticleSystem, ParticleTriad, Proxy};
use crate::constants::{
    INVALID_PARTICLE_INDEX, MAX_TRIAD_DISTANCE_SQUARED, MIN_PARTICLE_BUFFER_CAPACITY,
};
use crate::coupling::RigidWorld;
use crate::group::{
    GroupHandle, ParticleGroup, ParticleGroupDef, PARTICLE_GROUP_CAN_BE_EMPTY,
    PARTICLE_GROUP_INTERNAL_MASK, PARTICLE_GROUP_NEEDS_UPDATE_DEPTH,
    PARTICLE_GROUP_WILL_BE_DESTROYED, SOLID_PARTICLE_GROUP,
};
use crate::math::{cross_sv, Transform};
use crate::particle::{
    ParticleDef, DESTRUCTION_LISTENER_PARTICLE, PAIR_FLAGS, TRIAD_FLAGS, ZOMBIE_PARTICLE,
};
use crate::shapes::Shape;
use crate::voronoi::VoronoiDiagram;
use glam::Vec2;

impl ParticleSystem {
    /// Create a particle. Returns its index, or the invalid sentinel when
    /// the arena cannot grow.
    pub fn create_particle<W: RigidWorld>(&mut self, world: &W, def: &ParticleDef) -> i32 {
        debug_assert!(!world.is_locked());
        if world.is_locked() {
            return 0;
        }

        if self.count >= self.internal_allocated_capacity {
            // Double the particle capacity.
            let capacity = if self.count > 0 {
                2 * self.count
            } else {
                MIN_PARTICLE_BUFFER_CAPACITY
            };
            self.reallocate_internal_buffers(capacity);
        }
        if self.count >= self.internal_allocated_capacity {
            log::warn!(
                "particle arena exhausted at {} particles; creation refused",
                self.count
            );
            return INVALID_PARTICLE_INDEX;
        }
        let index = self.count;
        self.count += 1;
        self.flags_buffer[index] = 0;
        self.position_buffer[index] = def.position;
        self.velocity_buffer[index] = def.velocity;
        self.weight_buffer[index] = 0.0;
        if let Some(buf) = &mut self.static_pressure_buffer {
            buf[index] = 0.0;
        }
        self.group_buffer[index] = None;
        if let Some(buf) = &mut self.depth_buffer {
            buf[index] = 0.0;
        }
        if self.color_allocated() || !def.color.is_zero() {
            self.request_color_buffer();
            self.color_buffer[index] = def.color;
        }
        if self.user_data_allocated() || def.user_data != 0 {
            self.request_user_data_buffer();
            self.user_data_buffer[index] = def.user_data;
        }
        // The tag is recomputed by the next broad-phase pass.
        self.proxy_buffer.push(Proxy {
            tag: 0,
            index: index as i32,
        });
        self.set_particle_flags(index as i32, def.flags);
        index as i32
    }

    /// Flag a particle for removal at the next compaction pass.
    pub fn destroy_particle(&mut self, index: i32, call_destruction_listener: bool) {
        let mut flags = ZOMBIE_PARTICLE;
        if call_destruction_listener {
            flags |= DESTRUCTION_LISTENER_PARTICLE;
        }
        let current = self.flags_buffer[index as usize];
        self.set_particle_flags(index, current | flags);
    }

    /// Flag every particle whose position lies inside `shape` for removal.
    /// Returns the number of particles destroyed.
    pub fn destroy_particles_in_shape<W: RigidWorld>(
        &mut self,
        world: &W,
        shape: &dyn Shape,
        xf: &Transform,
        call_destruction_listener: bool,
    ) -> i32 {
        debug_assert!(!world.is_locked());
        if world.is_locked() {
            return 0;
        }

        let aabb = shape.compute_aabb(xf, 0);
        let mut doomed = Vec::new();
        self.query_aabb(&aabb, &mut |index| {
            debug_assert!((index as usize) < self.count);
            if shape.test_point(xf, self.position_buffer[index as usize]) {
                doomed.push(index);
            }
            true
        });
        for &index in &doomed {
            self.destroy_particle(index, call_destruction_listener);
        }
        doomed.len() as i32
    }

    /// Flag every particle of `group` for removal.
    pub fn destroy_particles_in_group<W: RigidWorld>(
        &mut self,
        world: &W,
        group: GroupHandle,
        call_destruction_listener: bool,
    ) {
        debug_assert!(!world.is_locked());
        if world.is_locked() {
            return;
        }

        let Some(group) = self.groups.get(group) else {
            return;
        };
        let (first, last) = (group.first_index, group.last_index);
        for i in first..last {
            self.destroy_particle(i, call_destruction_listener);
        }
    }

    fn create_particle_for_group<W: RigidWorld>(
        &mut self,
        world: &W,
        group_def: &ParticleGroupDef,
        xf: &Transform,
        p: Vec2,
    ) -> i32 {
        let position = xf.mul_vec2(p);
        let def = ParticleDef {
            flags: group_def.flags,
            position,
            velocity: group_def.linear_velocity
                + cross_sv(group_def.angular_velocity, position - group_def.position),
            color: group_def.color,
            user_data: group_def.user_data,
        };
        self.create_particle(world, &def)
    }

    /// Stamp particles along the perimeter of an edge or chain shape.
    fn create_particles_stroke_shape_for_group<W: RigidWorld>(
        &mut self,
        world: &W,
        group_def: &ParticleGroupDef,
        xf: &Transform,
    ) {
        let shape = group_def.shape.expect("stroke stamping requires a shape");
        let stride = if group_def.stride > 0.0 {
            group_def.stride
        } else {
            self.particle_stride()
        };
        let mut position_on_edge = 0.0;
        for child in 0..shape.child_count() {
            let (v1, v2) = shape
                .child_edge(child)
                .expect("stroke shapes expose child edges");
            let d = v2 - v1;
            let edge_length = d.length();
            while position_on_edge < edge_length {
                let p = v1 + position_on_edge / edge_length * d;
                self.create_particle_for_group(world, group_def, xf, p);
                position_on_edge += stride;
            }
            position_on_edge -= edge_length;
        }
    }

    /// Stamp particles on a stride-aligned grid across the interior of a
    /// filled shape.
    fn create_particles_fill_shape_for_group<W: RigidWorld>(
        &mut self,
        world: &W,
        group_def: &ParticleGroupDef,
        xf: &Transform,
    ) {
        let shape = group_def.shape.expect("fill stamping requires a shape");
        let stride = if group_def.stride > 0.0 {
            group_def.stride
        } else {
            self.particle_stride()
        };
        let identity = Transform::IDENTITY;
        debug_assert!(shape.child_count() == 1);
        let aabb = shape.compute_aabb(&identity, 0);
        let mut y = (aabb.lower.y / stride).floor() * stride;
        while y < aabb.upper.y {
            let mut x = (aabb.lower.x / stride).floor() * stride;
            while x < aabb.upper.x {
                let p = Vec2::new(x, y);
                if shape.test_point(&identity, p) {
                    self.create_particle_for_group(world, group_def, xf, p);
                }
                x += stride;
            }
            y += stride;
        }
    }

    /// Create a group of particles stamped from the definition's shape
    /// and/or explicit positions. Returns `None` when the world is locked.
    pub fn create_particle_group<W: RigidWorld>(
        &mut self,
        world: &W,
        group_def: &ParticleGroupDef,
    ) -> Option<GroupHandle> {
        debug_assert!(!world.is_locked());
        if world.is_locked() {
            return None;
        }
        debug_assert!(group_def.group_flags & PARTICLE_GROUP_INTERNAL_MASK == 0);

        let transform = Transform::new(group_def.position, group_def.angle);
        let first_index = self.count;
        if let Some(shape) = group_def.shape {
            if shape.child_edge(0).is_some() {
                self.create_particles_stroke_shape_for_group(world, group_def, &transform);
            } else {
                self.create_particles_fill_shape_for_group(world, group_def, &transform);
            }
        }
        for &p in group_def.position_data {
            self.create_particle_for_group(world, group_def, &transform, p);
        }
        let last_index = self.count;

        let group = ParticleGroup::new(
            first_index as i32,
            last_index as i32,
            group_def.strength,
            group_def.user_data,
            transform,
        );
        let handle = self.groups.insert(group);
        self.group_list.insert(0, handle);
        for i in first_index..last_index {
            self.group_buffer[i] = Some(handle);
        }
        self.set_group_flags(handle, group_def.group_flags);

        self.update_contacts(true);
        self.update_pairs_and_triads(first_index as i32, last_index as i32, handle, handle);

        Some(handle)
    }

    /// Merge group B into group A. B's particles are rotated adjacent to
    /// A's range, pairs and triads are re-emitted across the union, and B
    /// is destroyed.
    pub fn join_particle_groups<W: RigidWorld>(
        &mut self,
        world: &W,
        group_a: GroupHandle,
        group_b: GroupHandle,
    ) {
        debug_assert!(!world.is_locked());
        if world.is_locked() {
            return;
        }
        debug_assert!(group_a != group_b);
        debug_assert!(self.groups.contains(group_a) && self.groups.contains(group_b));

        let range = |groups: &crate::group::GroupSlab, handle| {
            let g = groups.get(handle).expect("checked above");
            (g.first_index, g.last_index)
        };

        // Rotate B to the end of the arena, then rotate A flush against it.
        let (b_first, b_last) = range(&self.groups, group_b);
        self.rotate_buffer(b_first, b_last, self.count as i32);
        debug_assert!(range(&self.groups, group_b).1 == self.count as i32);
        let (a_first, a_last) = range(&self.groups, group_a);
        self.rotate_buffer(a_first, a_last, range(&self.groups, group_b).0);
        let (a_first, a_last) = range(&self.groups, group_a);
        let (b_first, b_last) = range(&self.groups, group_b);
        debug_assert!(a_last == b_first);

        self.update_contacts(true);
        self.update_pairs_and_triads(a_first, b_last, group_a, group_b);

        for i in b_first..b_last {
            self.group_buffer[i as usize] = Some(group_a);
        }
        let group_flags = {
            let a = self.groups.get(group_a).expect("checked above");
            let b = self.groups.get(group_b).expect("checked above");
            a.group_flags | b.group_flags
        };
        self.set_group_flags(group_a, group_flags);
        {
            let a = self.groups.get_mut(group_a).expect("checked above");
            a.last_index = b_last;
        }
        {
            let b = self.groups.get_mut(group_b).expect("checked above");
            b.first_index = b.last_index;
        }
        self.destroy_particle_group(group_b);
    }

    /// Only called from `solve_zombie` or `join_particle_groups`.
    pub(crate) fn destroy_particle_group(&mut self, handle: GroupHandle) {
        debug_assert!(!self.group_list.is_empty());
        debug_assert!(self.groups.contains(handle));

        if let Some(listener) = &mut self.destruction_listener {
            listener.say_goodbye_group(handle);
        }

        self.set_group_flags(handle, 0);
        let (first, last) = {
            let group = self.groups.get(handle).expect("checked above");
            (group.first_index, group.last_index)
        };
        for i in first..last {
            self.group_buffer[i as usize] = None;
        }

        self.group_list.retain(|&h| h != handle);
        self.groups.remove(handle);
    }

    /// Record pairs and triads for the pair/triad-flagged particles of
    /// `[first_index, last_index)`, connecting groups A and B. The caller
    /// guarantees the groups' ranges are disjoint or identical.
    pub(crate) fn update_pairs_and_triads(
        &mut self,
        first_index: i32,
        last_index: i32,
        group_a: GroupHandle,
        group_b: GroupHandle,
    ) {
        let mut particle_flags = 0;
        for i in first_index..last_index {
            particle_flags |= self.flags_buffer[i as usize];
        }

        let (a_first, a_last, a_strength) = {
            let a = self.groups.get(group_a).expect("live group");
            (a.first_index, a.last_index, a.strength)
        };
        let (b_first, b_last, b_strength) = {
            let b = self.groups.get(group_b).expect("live group");
            (b.first_index, b.last_index, b.strength)
        };
        let in_a = |i: i32| a_first <= i && i < a_last;
        let in_b = |i: i32| b_first <= i && i < b_last;
        let strength = a_strength.min(b_strength);

        if particle_flags & PAIR_FLAGS != 0 {
            for k in 0..self.contact_buffer.len() {
                let contact = self.contact_buffer[k];
                let (mut a, mut b) = (contact.index_a, contact.index_b);
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                if (in_a(a) || in_b(b)) && (in_a(b) || in_b(a)) {
                    self.pair_buffer.push(ParticlePair {
                        index_a: a,
                        index_b: b,
                        flags: contact.flags,
                        strength,
                        distance: self.position_buffer[a as usize]
                            .distance(self.position_buffer[b as usize]),
                    });
                }
            }
        }

        if particle_flags & TRIAD_FLAGS != 0 {
            let mut diagram = VoronoiDiagram::new((last_index - first_index) as usize);
            for i in first_index..last_index {
                if self.flags_buffer[i as usize] & ZOMBIE_PARTICLE == 0 && (in_a(i) || in_b(i)) {
                    diagram.add_generator(self.position_buffer[i as usize], i);
                }
            }
            let flags_buffer = self.flags_buffer.as_slice();
            let positions = self.position_buffer.as_slice();
            let triads = &mut self.triad_buffer;
            let squared_diameter = self.squared_diameter;
            let half_stride =
                crate::constants::PARTICLE_STRIDE * self.particle_diameter / 2.0;
            diagram.generate(half_stride, &mut |a, b, c| {
                // Create a triad only if it will contain particles from
                // both groups.
                if !((in_a(a) || in_a(b) || in_a(c)) && (in_b(a) || in_b(b) || in_b(c))) {
                    return;
                }
                let af = flags_buffer[a as usize];
                let bf = flags_buffer[b as usize];
                let cf = flags_buffer[c as usize];
                if af & bf & cf & TRIAD_FLAGS == 0 {
                    return;
                }
                let pa = positions[a as usize];
                let pb = positions[b as usize];
                let pc = positions[c as usize];
                let dab = pa - pb;
                let dbc = pb - pc;
                let dca = pc - pa;
                let max_distance_squared = MAX_TRIAD_DISTANCE_SQUARED * squared_diameter;
                if dab.dot(dab) >= max_distance_squared
                    || dbc.dot(dbc) >= max_distance_squared
                    || dca.dot(dca) >= max_distance_squared
                {
                    return;
                }
                let mid_point = (pa + pb + pc) / 3.0;
                triads.push(ParticleTriad {
                    index_a: a,
                    index_b: b,
                    index_c: c,
                    flags: af | bf | cf,
                    strength,
                    pa: pa - mid_point,
                    pb: pb - mid_point,
                    pc: pc - mid_point,
                    ka: -dca.dot(dab),
                    kb: -dab.dot(dbc),
                    kc: -dbc.dot(dca),
                    s: pa.perp_dot(pb) + pb.perp_dot(pc) + pc.perp_dot(pa),
                });
            });
        }
    }

    /// Rotate the ranges `[start, mid)` and `[mid, end)` of every particle
    /// buffer so the second precedes the first, and rewrite every
    /// index-bearing structure through the induced permutation.
    pub(crate) fn rotate_buffer(&mut self, start: i32, mid: i32, end: i32) {
        if start == mid || mid == end {
            return;
        }
        debug_assert!(start < mid && mid < end && end <= self.count as i32);

        // The permutation an in-place rotation applies to old indices.
        let new_indices = move |i: i32| -> i32 {
            if i < start {
                i
            } else if i < mid {
                i + end - mid
            } else if i < end {
                i + start - mid
            } else {
                i
            }
        };

        let (start_u, mid_u, end_u) = (start as usize, mid as usize, end as usize);
        let pivot = mid_u - start_u;
        self.flags_buffer.as_mut_slice()[start_u..end_u].rotate_left(pivot);
        self.position_buffer.as_mut_slice()[start_u..end_u].rotate_left(pivot);
        self.velocity_buffer.as_mut_slice()[start_u..end_u].rotate_left(pivot);
        self.group_buffer[start_u..end_u].rotate_left(pivot);
        if let Some(buf) = &mut self.static_pressure_buffer {
            buf[start_u..end_u].rotate_left(pivot);
        }
        if let Some(buf) = &mut self.depth_buffer {
            buf[start_u..end_u].rotate_left(pivot);
        }
        if self.color_allocated() {
            self.color_buffer.as_mut_slice()[start_u..end_u].rotate_left(pivot);
        }
        if self.user_data_allocated() {
            self.user_data_buffer.as_mut_slice()[start_u..end_u].rotate_left(pivot);
        }

        for proxy in &mut self.proxy_buffer {
            proxy.index = new_indices(proxy.index);
        }
        for contact in &mut self.contact_buffer {
            contact.index_a = new_indices(contact.index_a);
            contact.index_b = new_indices(contact.index_b);
        }
        for contact in &mut self.body_contact_buffer {
            contact.index = new_indices(contact.index);
        }
        for pair in &mut self.pair_buffer {
            pair.index_a = new_indices(pair.index_a);
            pair.index_b = new_indices(pair.index_b);
        }
        for triad in &mut self.triad_buffer {
            triad.index_a = new_indices(triad.index_a);
            triad.index_b = new_indices(triad.index_b);
            triad.index_c = new_indices(triad.index_c);
        }
        for &handle in &self.group_list.clone() {
            if let Some(group) = self.groups.get_mut(handle) {
                group.first_index = new_indices(group.first_index);
                group.last_index = new_indices(group.last_index - 1) + 1;
            }
        }
    }

    /// Remove zombie-flagged particles, moving survivors down and rewriting
    /// every derived structure through the dense remap.
    pub(crate) fn solve_zombie(&mut self) {
        let mut new_count = 0usize;
        let mut new_indices = vec![INVALID_PARTICLE_INDEX; self.count];
        let mut all_particle_flags = 0;
        for i in 0..self.count {
            let flags = self.flags_buffer[i];
            if flags & ZOMBIE_PARTICLE != 0 {
                if flags & DESTRUCTION_LISTENER_PARTICLE != 0 {
                    if let Some(listener) = &mut self.destruction_listener {
                        listener.say_goodbye_particle(i as i32);
                    }
                }
                new_indices[i] = INVALID_PARTICLE_INDEX;
            } else {
                new_indices[i] = new_count as i32;
                if i != new_count {
                    self.flags_buffer[new_count] = self.flags_buffer[i];
                    self.position_buffer[new_count] = self.position_buffer[i];
                    self.velocity_buffer[new_count] = self.velocity_buffer[i];
                    self.group_buffer[new_count] = self.group_buffer[i];
                    if let Some(buf) = &mut self.static_pressure_buffer {
                        buf[new_count] = buf[i];
                    }
                    if let Some(buf) = &mut self.depth_buffer {
                        buf[new_count] = buf[i];
                    }
                    if self.color_allocated() {
                        self.color_buffer[new_count] = self.color_buffer[i];
                    }
                    if self.user_data_allocated() {
                        self.user_data_buffer[new_count] = self.user_data_buffer[i];
                    }
                }
                new_count += 1;
                all_particle_flags |= flags;
            }
        }
        log::debug!(
            "compacted {} zombie particles, {} survive",
            self.count - new_count,
            new_count
        );

        // Rewrite indices and drop entries referencing removed particles.
        for proxy in &mut self.proxy_buffer {
            proxy.index = new_indices[proxy.index as usize];
        }
        self.proxy_buffer.retain(|proxy| proxy.index >= 0);

        for contact in &mut self.contact_buffer {
            contact.index_a = new_indices[contact.index_a as usize];
            contact.index_b = new_indices[contact.index_b as usize];
        }
        self.contact_buffer
            .retain(|contact| contact.index_a >= 0 && contact.index_b >= 0);

        for contact in &mut self.body_contact_buffer {
            contact.index = new_indices[contact.index as usize];
        }
        self.body_contact_buffer.retain(|contact| contact.index >= 0);

        for pair in &mut self.pair_buffer {
            pair.index_a = new_indices[pair.index_a as usize];
            pair.index_b = new_indices[pair.index_b as usize];
        }
        self.pair_buffer
            .retain(|pair| pair.index_a >= 0 && pair.index_b >= 0);

        for triad in &mut self.triad_buffer {
            triad.index_a = new_indices[triad.index_a as usize];
            triad.index_b = new_indices[triad.index_b as usize];
            triad.index_c = new_indices[triad.index_c as usize];
        }
        self.triad_buffer
            .retain(|triad| triad.index_a >= 0 && triad.index_b >= 0 && triad.index_c >= 0);

        // Shrink each group to the range its survivors occupy.
        for &handle in &self.group_list.clone() {
            let Some(group) = self.groups.get(handle) else {
                continue;
            };
            let (old_first, old_last, group_flags) =
                (group.first_index, group.last_index, group.group_flags);
            let mut first_index = new_count as i32;
            let mut last_index = 0;
            let mut modified = false;
            for i in old_first..old_last {
                let j = new_indices[i as usize];
                if j >= 0 {
                    first_index = first_index.min(j);
                    last_index = last_index.max(j + 1);
                } else {
                    modified = true;
                }
            }
            if first_index < last_index {
                {
                    let group = self.groups.get_mut(handle).expect("live group");
                    group.first_index = first_index;
                    group.last_index = last_index;
                }
                if modified && group_flags & SOLID_PARTICLE_GROUP != 0 {
                    self.set_group_flags(
                        handle,
                        group_flags | PARTICLE_GROUP_NEEDS_UPDATE_DEPTH,
                    );
                }
                // Splitting disconnected remnants is intentionally not done.
            } else {
                {
                    let group = self.groups.get_mut(handle).expect("live group");
                    group.first_index = 0;
                    group.last_index = 0;
                }
                if group_flags & PARTICLE_GROUP_CAN_BE_EMPTY == 0 {
                    self.set_group_flags(handle, group_flags | PARTICLE_GROUP_WILL_BE_DESTROYED);
                }
            }
        }

        self.count = new_count;
        self.all_particle_flags = all_particle_flags;
        self.needs_update_all_particle_flags = false;

        // Destroy groups that lost all of their particles.
        for &handle in &self.group_list.clone() {
            let Some(group) = self.groups.get(handle) else {
                continue;
            };
            if group.group_flags & PARTICLE_GROUP_WILL_BE_DESTROYED != 0 {
                self.destroy_particle_group(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::NullWorld;
    use crate::shapes::BoxShape;
    use crate::system::ParticleSystemDef;
    use crate::particle::{ELASTIC_PARTICLE, SPRING_PARTICLE};

    fn system() -> ParticleSystem {
        ParticleSystem::new(&ParticleSystemDef {
            radius: 0.5,
            ..Default::default()
        })
    }

    #[test]
    fn fill_group_stamps_inside_the_shape() {
        let mut system = system();
        let world = NullWorld::default();
        let shape = BoxShape::new(2.0, 1.0);
        let def = ParticleGroupDef {
            shape: Some(&shape),
            position: Vec2::new(5.0, 0.0),
            ..Default::default()
        };
        let handle = system.create_particle_group(&world, &def).unwrap();
        let group = system.group(handle).unwrap();
        assert!(group.particle_count() > 0);
        for &p in system.positions() {
            assert!(
                (p.x - 5.0).abs() <= 2.0 + 1e-4 && p.y.abs() <= 1.0 + 1e-4,
                "stamped particle {p:?} escapes the shape"
            );
        }
        for g in system.particle_groups() {
            assert_eq!(*g, Some(handle));
        }
    }

    #[test]
    fn group_def_velocity_applies_rigid_motion() {
        let mut system = system();
        let world = NullWorld::default();
        let positions = [Vec2::new(1.0, 0.0), Vec2::new(-1.0, 0.0)];
        let def = ParticleGroupDef {
            position_data: &positions,
            linear_velocity: Vec2::new(0.5, 0.0),
            angular_velocity: 2.0,
            ..Default::default()
        };
        system.create_particle_group(&world, &def).unwrap();
        let v = system.velocities();
        // v = linear + omega x r.
        assert!((v[0] - Vec2::new(0.5, 2.0)).length() < 1e-5);
        assert!((v[1] - Vec2::new(0.5, -2.0)).length() < 1e-5);
    }

    #[test]
    fn spring_group_records_pairs() {
        let mut system = system();
        let world = NullWorld::default();
        let positions = [Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.0)];
        let def = ParticleGroupDef {
            flags: SPRING_PARTICLE,
            position_data: &positions,
            ..Default::default()
        };
        system.create_particle_group(&world, &def).unwrap();
        assert_eq!(system.pairs().len(), 1);
        let pair = system.pairs()[0];
        assert!(pair.index_a < pair.index_b);
        assert!((pair.distance - 0.5).abs() < 1e-5);
    }

    #[test]
    fn elastic_group_records_triads() {
        let mut system = system();
        let world = NullWorld::default();
        let positions = [
            Vec2::new(0.0, 0.0),
            Vec2::new(0.6, 0.0),
            Vec2::new(0.3, 0.5),
        ];
        let def = ParticleGroupDef {
            flags: ELASTIC_PARTICLE,
            position_data: &positions,
            ..Default::default()
        };
        system.create_particle_group(&world, &def).unwrap();
        assert!(!system.triads().is_empty());
        let triad = system.triads()[0];
        // Reference offsets are measured from the centroid.
        assert!((triad.pa + triad.pb + triad.pc).length() < 1e-4);
    }

    #[test]
    fn join_merges_ranges_and_destroys_the_second_group() {
        let mut system = system();
        let world = NullWorld::default();
        let pa = [Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.0)];
        let pb = [Vec2::new(1.0, 0.0), Vec2::new(1.5, 0.0)];
        let a = system
            .create_particle_group(&world, &ParticleGroupDef {
                position_data: &pa,
                ..Default::default()
            })
            .unwrap();
        let b = system
            .create_particle_group(&world, &ParticleGroupDef {
                position_data: &pb,
                ..Default::default()
            })
            .unwrap();
        system.join_particle_groups(&world, a, b);
        assert!(system.group(b).is_none(), "joined group must be destroyed");
        let a_ref = system.group(a).unwrap();
        assert_eq!(a_ref.particle_count(), 4);
        assert_eq!(system.group_count(), 1);
        for g in system.particle_groups() {
            assert_eq!(*g, Some(a));
        }
    }

    #[test]
    fn rotate_buffer_remaps_every_structure() {
        let mut system = system();
        let world = NullWorld::default();
        for i in 0..6 {
            let def = ParticleDef {
                position: Vec2::new(i as f32, 0.0),
                user_data: i + 1,
                ..Default::default()
            };
            system.create_particle(&world, &def);
        }
        system.update_contacts(false);
        system.rotate_buffer(1, 3, 6);
        // Old order 0,1,2,3,4,5 -> 0,3,4,5,1,2 by position.
        let expected_x = [0.0, 3.0, 4.0, 5.0, 1.0, 2.0];
        for (i, &x) in expected_x.iter().enumerate() {
            assert_eq!(system.positions()[i].x, x);
            assert_eq!(system.user_data_mut()[i], x as u64 + 1);
        }
        // Proxies still point at the particles they were created for.
        for proxy in system.proxies() {
            assert!(proxy.index >= 0 && (proxy.index as usize) < 6);
        }
    }

    #[test]
    fn zombie_compaction_preserves_survivors() {
        let mut system = system();
        let world = NullWorld::default();
        for i in 0..5 {
            let def = ParticleDef {
                position: Vec2::new(i as f32, 0.0),
                velocity: Vec2::new(0.0, i as f32),
                ..Default::default()
            };
            system.create_particle(&world, &def);
        }
        system.destroy_particle(2, false);
        system.solve_zombie();
        assert_eq!(system.particle_count(), 4);
        // The old particle at index 3 is now at index 2, data intact.
        assert_eq!(system.positions()[2].x, 3.0);
        assert_eq!(system.velocities()[2].y, 3.0);
        assert_eq!(system.proxies().len(), 4);

        // A second pass with no new zombies is a no-op.
        let positions: Vec<Vec2> = system.positions().to_vec();
        system.solve_zombie();
        assert_eq!(system.particle_count(), 4);
        assert_eq!(system.positions(), positions.as_slice());
    }

    #[test]
    fn empty_group_is_destroyed_unless_flagged() {
        let mut system = system();
        let world = NullWorld::default();
        let positions = [Vec2::ZERO, Vec2::new(0.5, 0.0)];
        let doomed = system
            .create_particle_group(&world, &ParticleGroupDef {
                position_data: &positions,
                ..Default::default()
            })
            .unwrap();
        let kept = system
            .create_particle_group(&world, &ParticleGroupDef {
                position_data: &positions,
                group_flags: PARTICLE_GROUP_CAN_BE_EMPTY,
                ..Default::default()
            })
            .unwrap();
        system.destroy_particles_in_group(&world, doomed, false);
        system.destroy_particles_in_group(&world, kept, false);
        system.solve_zombie();
        assert!(system.group(doomed).is_none());
        let kept_group = system.group(kept).expect("can-be-empty group survives");
        assert_eq!(kept_group.particle_count(), 0);
    }
}

//! The solver: one `solve` call advances the system by one timestep,
//! subdivided into sub-steps that rebuild contacts and run the force
//! kernels in a fixed order.

use super::{ParticleSystem, TimeStep};
use crate::constants::{
    BARRIER_COLLISION_TIME, LINEAR_SLOP, MAX_PARTICLE_PRESSURE, MIN_PARTICLE_WEIGHT,
    PARTICLE_STRIDE,
};
use crate::coupling::{RayCastInput, RigidWorld};
use crate::group::{
    PARTICLE_GROUP_NEEDS_UPDATE_DEPTH, RIGID_PARTICLE_GROUP, SOLID_PARTICLE_GROUP,
};
use crate::math::{cross_sv, inv_sqrt, Aabb, Rot, Transform};
use crate::particle::{
    ParticleColor, BARRIER_PARTICLE, COLOR_MIXING_PARTICLE, ELASTIC_PARTICLE,
    EXTRA_DAMPING_FLAGS, NO_PRESSURE_FLAGS, POWDER_PARTICLE, SPRING_PARTICLE,
    STATIC_PRESSURE_PARTICLE, TENSILE_PARTICLE, VISCOUS_PARTICLE, WALL_PARTICLE,
    ZOMBIE_PARTICLE,
};
use glam::Vec2;

impl ParticleSystem {
    /// Advance the system by `step`, coupling against `world`.
    ///
    /// Kernel order within each sub-step is fixed; the elastic and spring
    /// kernels read current velocities and run late, while collision,
    /// rigid and wall run last because they overwrite velocities.
    pub fn solve<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        if self.count == 0 {
            return;
        }
        if self.all_particle_flags & ZOMBIE_PARTICLE != 0 {
            self.solve_zombie();
        }
        if self.needs_update_all_particle_flags {
            self.update_all_particle_flags();
        }
        if self.needs_update_all_group_flags {
            self.update_all_group_flags();
        }

        self.iteration_index = 0;
        while self.iteration_index < step.particle_iterations {
            self.timestamp += 1;
            let sub_step = TimeStep {
                dt: step.dt / step.particle_iterations as f32,
                inv_dt: step.inv_dt * step.particle_iterations as f32,
                particle_iterations: step.particle_iterations,
            };
            self.update_body_contacts(&*world);
            self.update_contacts(false);
            self.compute_weight();
            if self.all_group_flags & PARTICLE_GROUP_NEEDS_UPDATE_DEPTH != 0 {
                self.compute_depth();
            }
            if self.all_particle_flags & VISCOUS_PARTICLE != 0 {
                self.solve_viscous(world);
            }
            if self.all_particle_flags & POWDER_PARTICLE != 0 {
                self.solve_powder(&sub_step);
            }
            if self.all_particle_flags & TENSILE_PARTICLE != 0 {
                self.solve_tensile(&sub_step);
            }
            if self.all_group_flags & SOLID_PARTICLE_GROUP != 0 {
                self.solve_solid(&sub_step);
            }
            if self.all_particle_flags & COLOR_MIXING_PARTICLE != 0 {
                self.solve_color_mixing();
            }
            self.solve_gravity(world, &sub_step);
            if self.all_particle_flags & STATIC_PRESSURE_PARTICLE != 0 {
                self.solve_static_pressure(&sub_step);
            }
            self.solve_pressure(world, &sub_step);
            self.solve_damping(world, &sub_step);
            if self.all_particle_flags & EXTRA_DAMPING_FLAGS != 0 {
                self.solve_extra_damping(world);
            }
            if self.all_particle_flags & ELASTIC_PARTICLE != 0 {
                self.solve_elastic(&sub_step);
            }
            if self.all_particle_flags & SPRING_PARTICLE != 0 {
                self.solve_spring(&sub_step);
            }
            self.limit_velocity(&sub_step);
            if self.all_particle_flags & BARRIER_PARTICLE != 0 {
                self.solve_barrier(&sub_step);
            }
            self.solve_collision(world, &sub_step);
            if self.all_group_flags & RIGID_PARTICLE_GROUP != 0 {
                self.solve_rigid(&sub_step);
            }
            if self.all_particle_flags & WALL_PARTICLE != 0 {
                self.solve_wall();
            }
            // Positions move only at the very end of the sub-step.
            for i in 0..self.count {
                let v = self.velocity_buffer[i];
                self.position_buffer[i] += sub_step.dt * v;
            }
            self.iteration_index += 1;
        }
    }

    /// Sum contact weights per particle: a dimensionless density.
    pub(crate) fn compute_weight(&mut self) {
        self.weight_buffer[..self.count].fill(0.0);
        for contact in &self.body_contact_buffer {
            self.weight_buffer[contact.index as usize] += contact.weight;
        }
        for contact in &self.contact_buffer {
            self.weight_buffer[contact.index_a as usize] += contact.weight;
            self.weight_buffer[contact.index_b as usize] += contact.weight;
        }
    }

    /// Relax per-particle distance to the surface of each solid group that
    /// requested an update.
    pub(crate) fn compute_depth(&mut self) {
        // Contacts internal to a group that needs updating.
        let mut contact_groups = Vec::with_capacity(self.contact_buffer.len());
        for contact in &self.contact_buffer {
            let group_a = self.group_buffer[contact.index_a as usize];
            let group_b = self.group_buffer[contact.index_b as usize];
            if let Some(handle) = group_a {
                if group_a == group_b
                    && self
                        .groups
                        .get(handle)
                        .is_some_and(|g| g.group_flags & PARTICLE_GROUP_NEEDS_UPDATE_DEPTH != 0)
                {
                    contact_groups.push(*contact);
                }
            }
        }

        let mut groups_to_update = Vec::with_capacity(self.group_list.len());
        for &handle in &self.group_list.clone() {
            let Some(group) = self.groups.get(handle) else {
                continue;
            };
            if group.group_flags & PARTICLE_GROUP_NEEDS_UPDATE_DEPTH != 0 {
                groups_to_update.push(handle);
                let flags = group.group_flags & !PARTICLE_GROUP_NEEDS_UPDATE_DEPTH;
                self.set_group_flags(handle, flags);
            }
        }

        debug_assert!(self.depth_buffer.is_some());
        let depth = self.depth_buffer.as_mut().expect("depth buffer allocated");
        for &handle in &groups_to_update {
            let group = self.groups.get(handle).expect("live group");
            for i in group.first_index..group.last_index {
                let w = self.weight_buffer[i as usize];
                depth[i as usize] = if w < 0.8 { 0.0 } else { f32::MAX };
            }
        }

        // The iteration count needed equals the particle distance from the
        // deepest particle to the nearest surface particle, which is in
        // general smaller than the square root of the particle count.
        let iteration_count = (self.count as f32).sqrt() as i32;
        for _ in 0..iteration_count {
            let mut updated = false;
            for contact in &contact_groups {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let r = 1.0 - contact.weight;
                if depth[a] > depth[b] + r {
                    depth[a] = depth[b] + r;
                    updated = true;
                }
                if depth[b] > depth[a] + r {
                    depth[b] = depth[a] + r;
                    updated = true;
                }
            }
            if !updated {
                break;
            }
        }
        for &handle in &groups_to_update {
            let group = self.groups.get(handle).expect("live group");
            for i in group.first_index..group.last_index {
                let p = &mut depth[i as usize];
                if *p < f32::MAX {
                    *p *= self.particle_diameter;
                } else {
                    *p = 0.0;
                }
            }
        }
    }

    fn solve_gravity<W: RigidWorld>(&mut self, world: &W, step: &TimeStep) {
        let gravity = step.dt * self.gravity_scale * world.gravity();
        for i in 0..self.count {
            self.velocity_buffer[i] += gravity;
        }
    }

    /// Compute static pressure satisfying the modified Poisson equation
    ///     sum_j((p_i - p_j) * w_ij) + relaxation * p_i =
    ///         pressure_per_weight * (w_i - min_weight)
    /// by iterating
    ///     p_i = (sum_j(p_j * w_ij) + pressure_per_weight *
    ///           (w_i - min_weight)) / (w_i + relaxation)
    fn solve_static_pressure(&mut self, step: &TimeStep) {
        self.request_static_pressure_buffer();
        let critical_pressure = self.critical_pressure(step);
        let pressure_per_weight = self.def.static_pressure_strength * critical_pressure;
        let max_pressure = MAX_PARTICLE_PRESSURE * critical_pressure;
        let relaxation = self.def.static_pressure_relaxation;
        for _ in 0..self.def.static_pressure_iterations {
            self.accumulation_buffer[..self.count].fill(0.0);
            let static_pressure = self.static_pressure_buffer.as_ref().expect("requested");
            for contact in &self.contact_buffer {
                if contact.flags & STATIC_PRESSURE_PARTICLE != 0 {
                    let a = contact.index_a as usize;
                    let b = contact.index_b as usize;
                    let w = contact.weight;
                    self.accumulation_buffer[a] += w * static_pressure[b];
                    self.accumulation_buffer[b] += w * static_pressure[a];
                }
            }
            let static_pressure = self.static_pressure_buffer.as_mut().expect("requested");
            for i in 0..self.count {
                let w = self.weight_buffer[i];
                if self.flags_buffer[i] & STATIC_PRESSURE_PARTICLE != 0 {
                    let wh = self.accumulation_buffer[i];
                    let h = (wh + pressure_per_weight * (w - MIN_PARTICLE_WEIGHT))
                        / (w + relaxation);
                    static_pressure[i] = h.clamp(0.0, max_pressure);
                } else {
                    static_pressure[i] = 0.0;
                }
            }
        }
    }

    /// Pressure as a linear function of density, applied along contact
    /// normals.
    fn solve_pressure<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        let critical_pressure = self.critical_pressure(step);
        let pressure_per_weight = self.def.pressure_strength * critical_pressure;
        let max_pressure = MAX_PARTICLE_PRESSURE * critical_pressure;
        for i in 0..self.count {
            let w = self.weight_buffer[i];
            let h = pressure_per_weight * (w - MIN_PARTICLE_WEIGHT).max(0.0);
            self.accumulation_buffer[i] = h.min(max_pressure);
        }
        // Particles with their own repulsive force are exempt.
        if self.all_particle_flags & NO_PRESSURE_FLAGS != 0 {
            for i in 0..self.count {
                if self.flags_buffer[i] & NO_PRESSURE_FLAGS != 0 {
                    self.accumulation_buffer[i] = 0.0;
                }
            }
        }
        if self.all_particle_flags & STATIC_PRESSURE_PARTICLE != 0 {
            let static_pressure = self
                .static_pressure_buffer
                .as_ref()
                .expect("static pressure buffer allocated");
            for i in 0..self.count {
                if self.flags_buffer[i] & STATIC_PRESSURE_PARTICLE != 0 {
                    self.accumulation_buffer[i] += static_pressure[i];
                }
            }
        }

        let velocity_per_pressure = step.dt / (self.density * self.particle_diameter);
        let particle_inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contact_buffer.len() {
            let contact = self.body_contact_buffer[k];
            let a = contact.index as usize;
            let w = contact.weight;
            let m = contact.mass;
            let n = contact.normal;
            let p = self.position_buffer[a];
            let h = self.accumulation_buffer[a] + pressure_per_weight * w;
            let f = velocity_per_pressure * w * m * h * n;
            self.velocity_buffer[a] -= particle_inv_mass * f;
            world.apply_linear_impulse(contact.body, f, p);
        }
        for contact in &self.contact_buffer {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let w = contact.weight;
            let n = contact.normal;
            let h = self.accumulation_buffer[a] + self.accumulation_buffer[b];
            let f = velocity_per_pressure * w * h * n;
            self.velocity_buffer[a] -= f;
            self.velocity_buffer[b] += f;
        }
    }

    /// Reduce the normal velocity of approaching contacts.
    fn solve_damping<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        let linear_damping = self.def.damping_strength;
        let quadratic_damping = 1.0 / self.critical_velocity(step);
        let particle_inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contact_buffer.len() {
            let contact = self.body_contact_buffer[k];
            let a = contact.index as usize;
            let w = contact.weight;
            let m = contact.mass;
            let n = contact.normal;
            let p = self.position_buffer[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity_buffer[a];
            let vn = v.dot(n);
            if vn < 0.0 {
                let damping =
                    (linear_damping * w).max((-quadratic_damping * vn).min(0.5));
                let f = damping * m * vn * n;
                self.velocity_buffer[a] += particle_inv_mass * f;
                world.apply_linear_impulse(contact.body, -f, p);
            }
        }
        for contact in &self.contact_buffer {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let w = contact.weight;
            let n = contact.normal;
            let v = self.velocity_buffer[b] - self.velocity_buffer[a];
            let vn = v.dot(n);
            if vn < 0.0 {
                let damping =
                    (linear_damping * w).max((-quadratic_damping * vn).min(0.5));
                let f = damping * vn * n;
                self.velocity_buffer[a] += f;
                self.velocity_buffer[b] -= f;
            }
        }
    }

    /// Additional unconditional damping against bodies for particles that
    /// can produce strong repulsive forces; applying damping several times
    /// suppresses vibration.
    fn solve_extra_damping<W: RigidWorld>(&mut self, world: &mut W) {
        let particle_inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contact_buffer.len() {
            let contact = self.body_contact_buffer[k];
            let a = contact.index as usize;
            if self.flags_buffer[a] & EXTRA_DAMPING_FLAGS == 0 {
                continue;
            }
            let m = contact.mass;
            let n = contact.normal;
            let p = self.position_buffer[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity_buffer[a];
            let vn = v.dot(n);
            if vn < 0.0 {
                let f = 0.5 * m * vn * n;
                self.velocity_buffer[a] += particle_inv_mass * f;
                world.apply_linear_impulse(contact.body, -f, p);
            }
        }
    }

    fn solve_wall(&mut self) {
        for i in 0..self.count {
            if self.flags_buffer[i] & WALL_PARTICLE != 0 {
                self.velocity_buffer[i] = Vec2::ZERO;
            }
        }
    }

    /// Move each rigid group as a single body: advance its transform by the
    /// aggregate velocity, then overwrite member velocities from the rigid
    /// motion.
    fn solve_rigid(&mut self, step: &TimeStep) {
        for &handle in &self.group_list.clone() {
            let Some(group) = self.groups.get(handle) else {
                continue;
            };
            if group.group_flags & RIGID_PARTICLE_GROUP == 0 {
                continue;
            }
            self.update_group_statistics(handle);
            let group = self.groups.get_mut(handle).expect("live group");
            let rotation = Rot::new(step.dt * group.angular_velocity);
            let transform = Transform {
                p: group.center + step.dt * group.linear_velocity
                    - rotation.mul_vec2(group.center),
                q: rotation,
            };
            group.transform = transform.mul(group.transform);
            // Mapping positions through this degenerate transform yields
            // the rigid velocity field directly.
            let velocity_transform = Transform {
                p: step.inv_dt * transform.p,
                q: Rot {
                    s: step.inv_dt * transform.q.s,
                    c: step.inv_dt * (transform.q.c - 1.0),
                },
            };
            let (first, last) = (group.first_index as usize, group.last_index as usize);
            for i in first..last {
                let p = self.position_buffer[i];
                self.velocity_buffer[i] = velocity_transform.mul_vec2(p);
            }
        }
    }

    /// Rotate each elastic triad's reference configuration onto the
    /// predicted positions and pull the particles toward it.
    fn solve_elastic(&mut self, step: &TimeStep) {
        let elastic_strength = step.inv_dt * self.def.elastic_strength;
        for k in 0..self.triad_buffer.len() {
            let triad = self.triad_buffer[k];
            if triad.flags & ELASTIC_PARTICLE == 0 {
                continue;
            }
            let a = triad.index_a as usize;
            let b = triad.index_b as usize;
            let c = triad.index_c as usize;
            let (oa, ob, oc) = (triad.pa, triad.pb, triad.pc);
            let mut pa = self.position_buffer[a];
            let mut pb = self.position_buffer[b];
            let mut pc = self.position_buffer[c];
            let va = self.velocity_buffer[a];
            let vb = self.velocity_buffer[b];
            let vc = self.velocity_buffer[c];
            pa += step.dt * va;
            pb += step.dt * vb;
            pc += step.dt * vc;
            let mid_point = (pa + pb + pc) / 3.0;
            pa -= mid_point;
            pb -= mid_point;
            pc -= mid_point;
            let mut r = Rot {
                s: oa.perp_dot(pa) + ob.perp_dot(pb) + oc.perp_dot(pc),
                c: oa.dot(pa) + ob.dot(pb) + oc.dot(pc),
            };
            let r2 = r.s * r.s + r.c * r.c;
            let inv_r = inv_sqrt(r2);
            r.s *= inv_r;
            r.c *= inv_r;
            let strength = elastic_strength * triad.strength;
            self.velocity_buffer[a] += strength * (r.mul_vec2(oa) - pa);
            self.velocity_buffer[b] += strength * (r.mul_vec2(ob) - pb);
            self.velocity_buffer[c] += strength * (r.mul_vec2(oc) - pc);
        }
    }

    /// Pull each spring pair toward its rest distance at the predicted
    /// positions.
    fn solve_spring(&mut self, step: &TimeStep) {
        let spring_strength = step.inv_dt * self.def.spring_strength;
        for k in 0..self.pair_buffer.len() {
            let pair = self.pair_buffer[k];
            if pair.flags & SPRING_PARTICLE == 0 {
                continue;
            }
            let a = pair.index_a as usize;
            let b = pair.index_b as usize;
            let mut pa = self.position_buffer[a];
            let mut pb = self.position_buffer[b];
            pa += step.dt * self.velocity_buffer[a];
            pb += step.dt * self.velocity_buffer[b];
            let d = pb - pa;
            let r0 = pair.distance;
            let r1 = d.length();
            let strength = spring_strength * pair.strength;
            let f = strength * (r0 - r1) / r1 * d;
            self.velocity_buffer[a] -= f;
            self.velocity_buffer[b] += f;
        }
    }

    /// Surface tension: accumulate signed contact normals, then apply a
    /// pressure term from total weight and a normal term from the
    /// accumulated gradient.
    fn solve_tensile(&mut self, step: &TimeStep) {
        debug_assert!(self.accumulation2_buffer.is_some());
        let critical_velocity = self.critical_velocity(step);
        let pressure_strength =
            self.def.surface_tension_pressure_strength * critical_velocity;
        let normal_strength = self.def.surface_tension_normal_strength * critical_velocity;
        let accumulation2 = self
            .accumulation2_buffer
            .as_mut()
            .expect("tensile flag allocates the buffer");
        accumulation2[..self.count].fill(Vec2::ZERO);
        for contact in &self.contact_buffer {
            if contact.flags & TENSILE_PARTICLE != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let w = contact.weight;
                let n = contact.normal;
                let weighted_normal = (1.0 - w) * w * n;
                accumulation2[a] -= weighted_normal;
                accumulation2[b] += weighted_normal;
            }
        }
        for contact in &self.contact_buffer {
            if contact.flags & TENSILE_PARTICLE != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let w = contact.weight;
                let n = contact.normal;
                let h = self.weight_buffer[a] + self.weight_buffer[b];
                let s = accumulation2[b] - accumulation2[a];
                let fn_ = (pressure_strength * (h - 2.0) + normal_strength * s.dot(n)) * w;
                let f = fn_ * n;
                self.velocity_buffer[a] -= f;
                self.velocity_buffer[b] += f;
            }
        }
    }

    /// Diffuse velocity between viscous particles and against bodies.
    fn solve_viscous<W: RigidWorld>(&mut self, world: &mut W) {
        let viscous_strength = self.def.viscous_strength;
        let particle_inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contact_buffer.len() {
            let contact = self.body_contact_buffer[k];
            let a = contact.index as usize;
            if self.flags_buffer[a] & VISCOUS_PARTICLE == 0 {
                continue;
            }
            let w = contact.weight;
            let m = contact.mass;
            let p = self.position_buffer[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity_buffer[a];
            let f = viscous_strength * m * w * v;
            self.velocity_buffer[a] += particle_inv_mass * f;
            world.apply_linear_impulse(contact.body, -f, p);
        }
        for contact in &self.contact_buffer {
            if contact.flags & VISCOUS_PARTICLE != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let w = contact.weight;
                let v = self.velocity_buffer[b] - self.velocity_buffer[a];
                let f = viscous_strength * w * v;
                self.velocity_buffer[a] += f;
                self.velocity_buffer[b] -= f;
            }
        }
    }

    /// Push powder particles apart once packed tighter than the stamping
    /// stride.
    fn solve_powder(&mut self, step: &TimeStep) {
        let powder_strength = self.def.powder_strength * self.critical_velocity(step);
        let min_weight = 1.0 - PARTICLE_STRIDE;
        for contact in &self.contact_buffer {
            if contact.flags & POWDER_PARTICLE != 0 {
                let w = contact.weight;
                if w > min_weight {
                    let a = contact.index_a as usize;
                    let b = contact.index_b as usize;
                    let f = powder_strength * (w - min_weight) * contact.normal;
                    self.velocity_buffer[a] -= f;
                    self.velocity_buffer[b] += f;
                }
            }
        }
    }

    /// Extra repulsion between different solid groups, scaled by how deep
    /// the contact sits inside them.
    fn solve_solid(&mut self, step: &TimeStep) {
        debug_assert!(self.depth_buffer.is_some());
        let depth = self.depth_buffer.as_ref().expect("solid flag allocates depth");
        let ejection_strength = step.inv_dt * self.def.ejection_strength;
        for contact in &self.contact_buffer {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            if self.group_buffer[a] != self.group_buffer[b] {
                let w = contact.weight;
                let h = depth[a] + depth[b];
                let f = ejection_strength * h * w * contact.normal;
                self.velocity_buffer[a] -= f;
                self.velocity_buffer[b] += f;
            }
        }
    }

    /// Mix color between contacting color-mixing particles.
    fn solve_color_mixing(&mut self) {
        debug_assert!(self.color_allocated());
        let color_mixing128 = (128.0 * self.def.color_mixing_strength) as i32;
        if color_mixing128 == 0 {
            return;
        }
        for k in 0..self.contact_buffer.len() {
            let contact = self.contact_buffer[k];
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            if self.flags_buffer[a] & self.flags_buffer[b] & COLOR_MIXING_PARTICLE != 0 {
                let colors = self.color_buffer.as_mut_slice();
                let (head, tail) = colors.split_at_mut(b);
                ParticleColor::mix_colors(&mut head[a], &mut tail[0], color_mixing128);
            }
        }
    }

    /// Clamp particle speed to the critical velocity, one grid cell per
    /// sub-step.
    fn limit_velocity(&mut self, step: &TimeStep) {
        let critical_velocity_squared = self.critical_velocity_squared(step);
        for i in 0..self.count {
            let v = self.velocity_buffer[i];
            let v2 = v.dot(v);
            if v2 > critical_velocity_squared {
                self.velocity_buffer[i] = v * (critical_velocity_squared / v2).sqrt();
            }
        }
    }

    /// Keep particles from crossing barrier pair segments.
    ///
    /// For each barrier pair (a, b) and nearby particle c, solve
    ///     (1-s)*(pa + t*va) + s*(pb + t*vb) = pc + t*vc
    /// for the time t at which c crosses the line through a and b; if a
    /// solution exists with s in [0, 1] within the lookahead window, c's
    /// velocity is replaced by the interpolated barrier velocity.
    fn solve_barrier(&mut self, step: &TimeStep) {
        for i in 0..self.count {
            let flags = self.flags_buffer[i];
            if flags & BARRIER_PARTICLE == 0 {
                continue;
            }
            if flags & WALL_PARTICLE != 0 {
                self.velocity_buffer[i] = Vec2::ZERO;
                continue;
            }
            let Some(handle) = self.group_buffer[i] else {
                continue;
            };
            let is_rigid = self
                .groups
                .get(handle)
                .is_some_and(|g| g.group_flags & RIGID_PARTICLE_GROUP != 0);
            if is_rigid {
                self.update_group_statistics(handle);
                let group = self.groups.get(handle).expect("live group");
                let (center, linear, angular) =
                    (group.center, group.linear_velocity, group.angular_velocity);
                self.velocity_buffer[i] =
                    linear + cross_sv(angular, self.position_buffer[i] - center);
            }
        }

        let tmax = BARRIER_COLLISION_TIME * step.dt;
        for k in 0..self.pair_buffer.len() {
            let pair = self.pair_buffer[k];
            if pair.flags & BARRIER_PARTICLE == 0 {
                continue;
            }
            let a = pair.index_a;
            let b = pair.index_b;
            let pa = self.position_buffer[a as usize];
            let pb = self.position_buffer[b as usize];
            let mut aabb = Aabb::new(pa.min(pb), pa.max(pb));
            aabb.expand(self.particle_diameter);
            let (first, last) = self.proxy_range_for_aabb(&aabb);
            let va = self.velocity_buffer[a as usize];
            let vb = self.velocity_buffer[b as usize];
            let pba = pb - pa;
            let vba = vb - va;
            for p in first..last {
                let c = self.proxy_buffer[p].index;
                let pc = self.position_buffer[c as usize];
                if !aabb.contains(pc)
                    || self.group_buffer[a as usize] == self.group_buffer[c as usize]
                    || self.group_buffer[b as usize] == self.group_buffer[c as usize]
                {
                    continue;
                }
                let vc = self.velocity_buffer[c as usize];
                let pca = pc - pa;
                let vca = vc - va;
                let e2 = vba.perp_dot(vca);
                let e1 = pba.perp_dot(vca) - pca.perp_dot(vba);
                let e0 = pba.perp_dot(pca);
                let s;
                if e2 == 0.0 {
                    if e1 == 0.0 {
                        continue;
                    }
                    let t = -e0 / e1;
                    if !(0.0..=tmax).contains(&t) {
                        continue;
                    }
                    let qba = pba + t * vba;
                    let qca = pca + t * vca;
                    s = qba.dot(qca) / qba.dot(qba);
                    if !(0.0..=1.0).contains(&s) {
                        continue;
                    }
                } else {
                    let det = e1 * e1 - 4.0 * e0 * e2;
                    if det < 0.0 {
                        continue;
                    }
                    let sqrt_det = det.sqrt();
                    let mut t1 = (-e1 - sqrt_det) / (2.0 * e2);
                    let mut t2 = (-e1 + sqrt_det) / (2.0 * e2);
                    if t1 > t2 {
                        std::mem::swap(&mut t1, &mut t2);
                    }
                    let mut t = t1;
                    let mut qba = pba + t * vba;
                    let mut qca = pca + t * vca;
                    let s1 = qba.dot(qca) / qba.dot(qba);
                    if !(0.0..=tmax).contains(&t) || !(0.0..=1.0).contains(&s1) {
                        t = t2;
                        if !(0.0..=tmax).contains(&t) {
                            continue;
                        }
                        qba = pba + t * vba;
                        qca = pca + t * vca;
                        let s2 = qba.dot(qca) / qba.dot(qba);
                        if !(0.0..=1.0).contains(&s2) {
                            continue;
                        }
                        s = s2;
                    } else {
                        s = s1;
                    }
                }
                self.velocity_buffer[c as usize] = va + s * vba;
            }
        }
    }

    /// Stop particles crossing fixture boundaries along their predicted
    /// path, applying the reaction impulse to the body as precisely as
    /// numerical stability allows.
    fn solve_collision<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        let mut aabb = Aabb::EMPTY;
        for i in 0..self.count {
            let v = self.velocity_buffer[i];
            let p1 = self.position_buffer[i];
            let p2 = p1 + step.dt * v;
            aabb.extend(p1.min(p2));
            aabb.extend(p1.max(p2));
        }

        let mut fixtures = Vec::new();
        world.query_aabb(&aabb, &mut |fixture| {
            fixtures.push(fixture);
            true
        });
        let particle_mass = self.particle_mass();
        for fixture in fixtures {
            if world.is_sensor(fixture) {
                continue;
            }
            let body = world.body_of(fixture);
            let mut limit_body_velocity = false;
            for child in 0..world.child_count(fixture) {
                let mut child_aabb = world.child_aabb(fixture, child);
                child_aabb.expand(self.particle_diameter);
                let (first, last) = self.proxy_range_for_aabb(&child_aabb);
                for k in first..last {
                    let a = self.proxy_buffer[k].index as usize;
                    let ap = self.position_buffer[a];
                    if !child_aabb.contains(ap) {
                        continue;
                    }
                    let av = self.velocity_buffer[a];
                    // On the first iteration the particle is carried along
                    // with the body's own motion over the host step.
                    let p1 = if self.iteration_index == 0 {
                        world
                            .transform(body)
                            .mul_vec2(world.step_start_transform(body).mul_t_vec2(ap))
                    } else {
                        ap
                    };
                    let input = RayCastInput {
                        p1,
                        p2: ap + step.dt * av,
                        max_fraction: 1.0,
                    };
                    if let Some(hit) = world.ray_cast(fixture, &input, child) {
                        let p = (1.0 - hit.fraction) * input.p1
                            + hit.fraction * input.p2
                            + LINEAR_SLOP * hit.normal;
                        let v = step.inv_dt * (p - ap);
                        self.velocity_buffer[a] = v;
                        let mut f = particle_mass * (av - v);
                        f = f.dot(hit.normal) * hit.normal;
                        // Bodies less dense than the particles receive a
                        // discounted reaction.
                        let density_ratio = world.density(fixture) * self.inverse_density;
                        if density_ratio < 1.0 {
                            f *= density_ratio;
                        }
                        world.apply_linear_impulse(body, f, p);
                        limit_body_velocity = true;
                    }
                }
            }
            if limit_body_velocity {
                let lc = world.local_center(body);
                let m = world.mass(body);
                let inertia = world.inertia(body) - m * lc.dot(lc);
                let v = world.linear_velocity(body);
                let w = world.angular_velocity(body);
                let energy = 0.5 * m * v.dot(v) + 0.5 * inertia * w * w;
                let max_energy = m * self.critical_velocity_squared(step);
                if energy > max_energy {
                    let s = max_energy / energy;
                    world.set_linear_velocity(body, s * v);
                    world.set_angular_velocity(body, s * w);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::NullWorld;
    use crate::group::ParticleGroupDef;
    use crate::particle::ParticleDef;
    use crate::system::ParticleSystemDef;

    fn system(radius: f32) -> ParticleSystem {
        ParticleSystem::new(&ParticleSystemDef {
            radius,
            ..Default::default()
        })
    }

    #[test]
    fn compute_weight_sums_both_endpoints() {
        let mut sys = system(0.5);
        let world = NullWorld::default();
        for p in [Vec2::ZERO, Vec2::new(0.5, 0.0), Vec2::new(1.0, 0.0)] {
            sys.create_particle(&world, &ParticleDef {
                position: p,
                ..Default::default()
            });
        }
        sys.update_contacts(false);
        sys.compute_weight();
        // Middle particle touches both neighbors at half a diameter.
        assert!((sys.weights()[1] - 1.0).abs() < 1e-4);
        assert!((sys.weights()[0] - 0.5).abs() < 1e-4);
        assert!((sys.weights()[2] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn gravity_integrates_velocity_and_position() {
        let mut sys = system(0.5);
        let mut world = NullWorld::new(Vec2::new(0.0, -10.0));
        sys.create_particle(&world, &ParticleDef::default());
        let step = TimeStep::new(1.0 / 60.0, 1);
        sys.solve(&mut world, &step);
        let v = sys.velocities()[0];
        let p = sys.positions()[0];
        assert!((v.y + 10.0 / 60.0).abs() < 1e-5, "v = {v:?}");
        assert!((p.y + 10.0 / 3600.0).abs() < 1e-5, "p = {p:?}");
    }

    #[test]
    fn pressure_pushes_overlapping_particles_apart_symmetrically() {
        let mut sys = system(0.5);
        let mut world = NullWorld::new(Vec2::ZERO);
        sys.create_particle(&world, &ParticleDef::default());
        sys.create_particle(&world, &ParticleDef {
            position: Vec2::new(0.5, 0.0),
            ..Default::default()
        });
        let step = TimeStep::new(1.0 / 60.0, 1);
        sys.solve(&mut world, &step);
        let v = sys.velocities();
        assert!(v[0].x < 0.0 && v[1].x > 0.0, "v = {v:?}");
        assert!((v[0] + v[1]).length() < 1e-4, "momentum must be conserved");
    }

    #[test]
    fn wall_particles_do_not_move() {
        let mut sys = system(0.5);
        let mut world = NullWorld::default();
        sys.create_particle(&world, &ParticleDef {
            flags: WALL_PARTICLE,
            velocity: Vec2::new(3.0, 4.0),
            ..Default::default()
        });
        let step = TimeStep::new(1.0 / 60.0, 1);
        sys.solve(&mut world, &step);
        assert_eq!(sys.velocities()[0], Vec2::ZERO);
        assert_eq!(sys.positions()[0], Vec2::ZERO);
    }

    #[test]
    fn limit_velocity_clamps_to_critical() {
        let mut sys = system(0.5);
        let mut world = NullWorld::new(Vec2::ZERO);
        sys.create_particle(&world, &ParticleDef {
            velocity: Vec2::new(1e4, 0.0),
            ..Default::default()
        });
        let step = TimeStep::new(1.0 / 60.0, 1);
        sys.solve(&mut world, &step);
        let critical = sys.critical_velocity(&step);
        assert!(sys.velocities()[0].length() <= critical * 1.0001);
    }

    #[test]
    fn viscous_contacts_share_momentum() {
        let mut sys = system(0.5);
        let mut world = NullWorld::new(Vec2::ZERO);
        sys.create_particle(&world, &ParticleDef {
            flags: VISCOUS_PARTICLE,
            velocity: Vec2::new(1.0, 0.0),
            ..Default::default()
        });
        sys.create_particle(&world, &ParticleDef {
            flags: VISCOUS_PARTICLE,
            position: Vec2::new(0.0, 0.5),
            ..Default::default()
        });
        let step = TimeStep::new(1.0 / 60.0, 1);
        sys.solve(&mut world, &step);
        let v = sys.velocities();
        let total = v[0] + v[1];
        assert!((total - Vec2::new(1.0, 0.0)).length() < 1e-3);
        assert!(v[1].x > 0.0, "viscosity must drag the neighbor along");
        assert!(v[0].x < 1.0, "viscosity must slow the mover");
    }

    #[test]
    fn rigid_group_rotates_as_one_body() {
        // Radius 1 keeps the member speeds below the critical velocity so
        // the limiter does not distort the rigid motion.
        let mut sys = system(1.0);
        let mut world = NullWorld::new(Vec2::ZERO);
        let positions = [
            Vec2::new(1.0, 0.0),
            Vec2::new(-0.5, 0.866),
            Vec2::new(-0.5, -0.866),
        ];
        let def = ParticleGroupDef {
            group_flags: RIGID_PARTICLE_GROUP,
            position_data: &positions,
            angular_velocity: std::f32::consts::PI,
            ..Default::default()
        };
        sys.create_particle_group(&world, &def).unwrap();
        let before: Vec<Vec2> = sys.positions().to_vec();
        let step = TimeStep::new(0.5, 1);
        sys.solve(&mut world, &step);
        // Half a second at pi rad/s is a quarter turn about the centroid.
        let rot = Rot::new(std::f32::consts::FRAC_PI_2);
        for (p_new, p_old) in sys.positions().iter().zip(&before) {
            let expected = rot.mul_vec2(*p_old);
            assert!(
                (*p_new - expected).length() < 1e-3,
                "expected {expected:?}, got {p_new:?}"
            );
        }
    }

    #[test]
    fn barrier_wall_pair_stops_crossing_particle() {
        let mut sys = system(0.5);
        let mut world = NullWorld::new(Vec2::ZERO);
        let r = 0.5;
        // Barrier particles one stride apart so that a contact, and hence a
        // barrier pair, exists between them.
        let barrier = [Vec2::new(0.0, 0.0), Vec2::new(1.5 * r, 0.0)];
        sys.create_particle_group(&world, &ParticleGroupDef {
            flags: BARRIER_PARTICLE | WALL_PARTICLE,
            position_data: &barrier,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sys.pairs().len(), 1, "barrier particles must pair up");
        let free = sys.create_particle(&world, &ParticleDef {
            position: Vec2::new(0.75 * r, -2.0 * r),
            velocity: Vec2::new(0.0, 10.0 * r),
            ..Default::default()
        });
        let step = TimeStep::new(1.0 / 60.0, 1);
        for _ in 0..30 {
            sys.solve(&mut world, &step);
        }
        // The barrier holds the line y = 0; the crossing particle must have
        // been stopped (barrier velocity is zero).
        let p = sys.positions()[free as usize];
        assert!(p.y < 0.5 * r, "particle crossed the barrier: {p:?}");
    }
}

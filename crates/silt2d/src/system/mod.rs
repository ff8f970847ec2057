//! The particle system: a structure-of-arrays arena of particles plus the
//! derived structures (proxies, contacts, pairs, triads, groups) the solver
//! maintains over them.
//!
//! Submodules split the implementation by concern:
//! - [`lifecycle`]: creation, destruction, groups, compaction
//! - [`contacts`]: spatial hash and broad phase
//! - [`solver`]: the per-step force kernels
//! - [`queries`]: AABB / ray-cast queries over particles

mod contacts;
mod lifecycle;
mod queries;
mod solver;

use crate::buffer::UserOverridableBuffer;
use crate::constants::MIN_PARTICLE_BUFFER_CAPACITY;
use crate::coupling::{BodyId, DestructionListener, FixtureId};
use crate::group::{
    GroupHandle, GroupSlab, ParticleGroup, PARTICLE_GROUP_NEEDS_UPDATE_DEPTH,
    SOLID_PARTICLE_GROUP,
};
use crate::particle::{
    ParticleColor, UserData, COLOR_MIXING_PARTICLE, TENSILE_PARTICLE,
};
use glam::Vec2;

/// One solver timestep, subdivided into `particle_iterations` sub-steps.
#[derive(Clone, Copy, Debug)]
pub struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    pub particle_iterations: i32,
}

impl TimeStep {
    pub fn new(dt: f32, particle_iterations: i32) -> Self {
        Self {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            particle_iterations,
        }
    }
}

/// Tuning parameters of a particle system.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParticleSystemDef {
    /// Enable the spurious body-contact filter.
    pub strict_contact_check: bool,
    /// Particle mass density (kg/m²).
    pub density: f32,
    /// Scale applied to the host world's gravity.
    pub gravity_scale: f32,
    /// Particle radius (meters). The interaction diameter is twice this.
    pub radius: f32,
    /// Hard particle count limit; 0 means unlimited.
    pub max_count: usize,

    /// Repulsion between overlapping particles, as a fraction of the
    /// critical pressure.
    pub pressure_strength: f32,
    /// Linear damping coefficient of contact normal velocity.
    pub damping_strength: f32,
    /// Restoring strength of elastic triads.
    pub elastic_strength: f32,
    /// Restoring strength of spring pairs.
    pub spring_strength: f32,
    /// Velocity diffusion between viscous particles.
    pub viscous_strength: f32,
    /// Surface-tension pressure term for tensile particles.
    pub surface_tension_pressure_strength: f32,
    /// Surface-tension normal term for tensile particles.
    pub surface_tension_normal_strength: f32,
    /// Repulsion between packed powder particles.
    pub powder_strength: f32,
    /// Ejection of intruders from solid groups, per diameter of depth.
    pub ejection_strength: f32,
    /// Static pressure source term, as a fraction of critical pressure.
    pub static_pressure_strength: f32,
    /// Relaxation of the static pressure iteration; larger is softer.
    pub static_pressure_relaxation: f32,
    /// Poisson relaxation iterations per sub-step.
    pub static_pressure_iterations: i32,
    /// Fraction of color difference exchanged per contact, in `0..=1`.
    pub color_mixing_strength: f32,
}

impl Default for ParticleSystemDef {
    fn default() -> Self {
        Self {
            strict_contact_check: false,
            density: 1.0,
            gravity_scale: 1.0,
            radius: 1.0,
            max_count: 0,
            pressure_strength: 0.05,
            damping_strength: 1.0,
            elastic_strength: 0.25,
            spring_strength: 0.25,
            viscous_strength: 0.25,
            surface_tension_pressure_strength: 0.2,
            surface_tension_normal_strength: 0.7,
            powder_strength: 0.5,
            ejection_strength: 0.5,
            static_pressure_strength: 0.2,
            static_pressure_relaxation: 0.2,
            static_pressure_iterations: 8,
            color_mixing_strength: 0.5,
        }
    }
}

/// Broad-phase proxy: a particle index keyed by its grid-cell tag.
#[derive(Clone, Copy, Debug)]
pub struct Proxy {
    pub tag: u32,
    pub index: i32,
}

/// Proximity contact between two particles, `index_a < index_b`.
#[derive(Clone, Copy, Debug)]
pub struct ParticleContact {
    pub index_a: i32,
    pub index_b: i32,
    /// OR of both endpoints' behavior flags.
    pub flags: u32,
    /// `1 - distance / diameter`, in `(0, 1]`.
    pub weight: f32,
    /// Unit vector from particle A to particle B.
    pub normal: Vec2,
}

/// Proximity contact between a particle and a host-world fixture.
#[derive(Clone, Copy, Debug)]
pub struct ParticleBodyContact {
    pub index: i32,
    /// Weak reference, valid only for the sub-step that produced it.
    pub body: BodyId,
    /// Weak reference, valid only for the sub-step that produced it.
    pub fixture: FixtureId,
    /// `1 - distance / diameter`.
    pub weight: f32,
    /// Negated surface normal, pointing from the particle into the fixture.
    pub normal: Vec2,
    /// Effective mass of the contact pair.
    pub mass: f32,
}

/// Two-particle constraint recorded at group creation.
#[derive(Clone, Copy, Debug)]
pub struct ParticlePair {
    pub index_a: i32,
    pub index_b: i32,
    /// OR of both endpoints' behavior flags at creation time.
    pub flags: u32,
    pub strength: f32,
    /// Rest distance.
    pub distance: f32,
}

/// Three-particle constraint recorded at group creation via the Voronoi
/// diagram, consumed by the elastic kernel.
#[derive(Clone, Copy, Debug)]
pub struct ParticleTriad {
    pub index_a: i32,
    pub index_b: i32,
    pub index_c: i32,
    pub flags: u32,
    pub strength: f32,
    /// Reference offsets of the three particles from their centroid.
    pub pa: Vec2,
    pub pb: Vec2,
    pub pc: Vec2,
    /// Edge dot-product invariants of the reference configuration.
    pub ka: f32,
    pub kb: f32,
    pub kc: f32,
    /// Twice the signed reference area.
    pub s: f32,
}

/// A 2D particle-based fluid and soft-body solver coupled to a host
/// rigid-body world.
pub struct ParticleSystem {
    pub(crate) def: ParticleSystemDef,

    pub(crate) timestamp: i32,
    pub(crate) iteration_index: i32,
    pub(crate) all_particle_flags: u32,
    pub(crate) needs_update_all_particle_flags: bool,
    pub(crate) all_group_flags: u32,
    pub(crate) needs_update_all_group_flags: bool,

    pub(crate) density: f32,
    pub(crate) inverse_density: f32,
    pub(crate) gravity_scale: f32,
    pub(crate) particle_diameter: f32,
    pub(crate) inverse_diameter: f32,
    pub(crate) squared_diameter: f32,
    pub(crate) strict_contact_check: bool,

    pub(crate) count: usize,
    pub(crate) internal_allocated_capacity: usize,
    pub(crate) max_count: usize,

    pub(crate) flags_buffer: UserOverridableBuffer<u32>,
    pub(crate) position_buffer: UserOverridableBuffer<Vec2>,
    pub(crate) velocity_buffer: UserOverridableBuffer<Vec2>,
    /// Lazily allocated: only once a particle has a color or mixes colors.
    pub(crate) color_buffer: UserOverridableBuffer<ParticleColor>,
    /// Lazily allocated: only once a particle carries user data.
    pub(crate) user_data_buffer: UserOverridableBuffer<UserData>,

    pub(crate) weight_buffer: Vec<f32>,
    /// Lazily allocated scratch for the static pressure relaxation.
    pub(crate) static_pressure_buffer: Option<Vec<f32>>,
    /// Scalar scratch shared by the pressure kernels.
    pub(crate) accumulation_buffer: Vec<f32>,
    /// Lazily allocated vector scratch for the tensile kernel.
    pub(crate) accumulation2_buffer: Option<Vec<Vec2>>,
    /// Lazily allocated: surface distance of particles in solid groups.
    pub(crate) depth_buffer: Option<Vec<f32>>,
    pub(crate) group_buffer: Vec<Option<GroupHandle>>,

    pub(crate) proxy_buffer: Vec<Proxy>,
    pub(crate) contact_buffer: Vec<ParticleContact>,
    pub(crate) body_contact_buffer: Vec<ParticleBodyContact>,
    pub(crate) pair_buffer: Vec<ParticlePair>,
    pub(crate) triad_buffer: Vec<ParticleTriad>,

    pub(crate) groups: GroupSlab,
    /// Live groups, newest first.
    pub(crate) group_list: Vec<GroupHandle>,

    pub(crate) destruction_listener: Option<Box<dyn DestructionListener>>,
}

impl ParticleSystem {
    /// Create an empty system with the given tuning.
    pub fn new(def: &ParticleSystemDef) -> Self {
        debug_assert!(def.radius > 0.0);
        let mut system = Self {
            def: *def,
            timestamp: 0,
            iteration_index: 0,
            all_particle_flags: 0,
            needs_update_all_particle_flags: false,
            all_group_flags: 0,
            needs_update_all_group_flags: false,
            density: 1.0,
            inverse_density: 1.0,
            gravity_scale: def.gravity_scale,
            particle_diameter: 0.0,
            inverse_diameter: 0.0,
            squared_diameter: 0.0,
            strict_contact_check: def.strict_contact_check,
            count: 0,
            internal_allocated_capacity: 0,
            max_count: def.max_count,
            flags_buffer: UserOverridableBuffer::new(),
            position_buffer: UserOverridableBuffer::new(),
            velocity_buffer: UserOverridableBuffer::new(),
            color_buffer: UserOverridableBuffer::new(),
            user_data_buffer: UserOverridableBuffer::new(),
            weight_buffer: Vec::new(),
            static_pressure_buffer: None,
            accumulation_buffer: Vec::new(),
            accumulation2_buffer: None,
            depth_buffer: None,
            group_buffer: Vec::new(),
            proxy_buffer: Vec::new(),
            contact_buffer: Vec::new(),
            body_contact_buffer: Vec::new(),
            pair_buffer: Vec::new(),
            triad_buffer: Vec::new(),
            groups: GroupSlab::new(),
            group_list: Vec::new(),
            destruction_listener: None,
        };
        system.set_radius(def.radius);
        system.set_density(def.density);
        system
    }

    // ===== Tuning =====

    /// Particle radius. Also rederives the interaction diameter.
    pub fn set_radius(&mut self, radius: f32) {
        self.particle_diameter = 2.0 * radius;
        self.squared_diameter = self.particle_diameter * self.particle_diameter;
        self.inverse_diameter = 1.0 / self.particle_diameter;
    }

    pub fn radius(&self) -> f32 {
        self.particle_diameter / 2.0
    }

    pub fn set_density(&mut self, density: f32) {
        self.density = density;
        self.inverse_density = 1.0 / density;
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn set_gravity_scale(&mut self, gravity_scale: f32) {
        self.gravity_scale = gravity_scale;
    }

    pub fn gravity_scale(&self) -> f32 {
        self.gravity_scale
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.def.damping_strength = damping;
    }

    pub fn damping(&self) -> f32 {
        self.def.damping_strength
    }

    pub fn set_static_pressure_iterations(&mut self, iterations: i32) {
        self.def.static_pressure_iterations = iterations;
    }

    pub fn static_pressure_iterations(&self) -> i32 {
        self.def.static_pressure_iterations
    }

    pub fn set_strict_contact_check(&mut self, enabled: bool) {
        self.strict_contact_check = enabled;
    }

    pub fn strict_contact_check(&self) -> bool {
        self.strict_contact_check
    }

    /// Cap the particle count. Creation fails with the invalid sentinel once
    /// the cap is reached.
    pub fn set_max_particle_count(&mut self, count: usize) {
        debug_assert!(self.count <= count || count == 0);
        self.max_count = count;
    }

    pub fn max_particle_count(&self) -> usize {
        self.max_count
    }

    pub fn set_destruction_listener(&mut self, listener: Option<Box<dyn DestructionListener>>) {
        self.destruction_listener = listener;
    }

    // ===== Derived quantities =====

    /// Velocity a particle may travel in one sub-step without skipping a
    /// grid cell.
    pub fn critical_velocity(&self, step: &TimeStep) -> f32 {
        self.particle_diameter * step.inv_dt
    }

    pub fn critical_velocity_squared(&self, step: &TimeStep) -> f32 {
        let v = self.critical_velocity(step);
        v * v
    }

    pub fn critical_pressure(&self, step: &TimeStep) -> f32 {
        self.density * self.critical_velocity_squared(step)
    }

    /// Spacing between stamped particles.
    pub fn particle_stride(&self) -> f32 {
        crate::constants::PARTICLE_STRIDE * self.particle_diameter
    }

    pub fn particle_mass(&self) -> f32 {
        let stride = self.particle_stride();
        self.density * stride * stride
    }

    pub fn particle_inv_mass(&self) -> f32 {
        // Historical constant, kept bit-for-bit: not 1 / particle_mass().
        1.777777 * self.inverse_density * self.inverse_diameter * self.inverse_diameter
    }

    // ===== Particle data access =====

    /// Number of live (possibly zombie-flagged) particles.
    pub fn particle_count(&self) -> usize {
        self.count
    }

    pub fn flags(&self) -> &[u32] {
        &self.flags_buffer.as_slice()[..self.count]
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.position_buffer.as_slice()[..self.count]
    }

    pub fn positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.position_buffer.as_mut_slice()[..self.count]
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.velocity_buffer.as_slice()[..self.count]
    }

    pub fn velocities_mut(&mut self) -> &mut [Vec2] {
        &mut self.velocity_buffer.as_mut_slice()[..self.count]
    }

    pub fn weights(&self) -> &[f32] {
        &self.weight_buffer[..self.count]
    }

    /// Colors; allocates the color buffer on first access.
    pub fn colors_mut(&mut self) -> &mut [ParticleColor] {
        self.request_color_buffer();
        &mut self.color_buffer.as_mut_slice()[..self.count]
    }

    /// User data; allocates the user-data buffer on first access.
    pub fn user_data_mut(&mut self) -> &mut [UserData] {
        self.request_user_data_buffer();
        &mut self.user_data_buffer.as_mut_slice()[..self.count]
    }

    /// Owning group of each particle.
    pub fn particle_groups(&self) -> &[Option<GroupHandle>] {
        &self.group_buffer[..self.count]
    }

    pub fn contacts(&self) -> &[ParticleContact] {
        &self.contact_buffer
    }

    pub fn body_contacts(&self) -> &[ParticleBodyContact] {
        &self.body_contact_buffer
    }

    pub fn pairs(&self) -> &[ParticlePair] {
        &self.pair_buffer
    }

    pub fn triads(&self) -> &[ParticleTriad] {
        &self.triad_buffer
    }

    pub(crate) fn proxies(&self) -> &[Proxy] {
        &self.proxy_buffer
    }

    // ===== Group access =====

    pub fn group_count(&self) -> usize {
        self.group_list.len()
    }

    /// Live groups, newest first.
    pub fn group_handles(&self) -> &[GroupHandle] {
        &self.group_list
    }

    /// Resolve a group handle; `None` once the group is destroyed.
    pub fn group(&self, handle: GroupHandle) -> Option<&ParticleGroup> {
        self.groups.get(handle)
    }

    /// Mass of a group, from the current member particles.
    pub fn group_mass(&mut self, handle: GroupHandle) -> f32 {
        self.update_group_statistics(handle);
        self.groups.get(handle).map_or(0.0, |g| g.mass)
    }

    /// Rotational inertia of a group about its centroid.
    pub fn group_inertia(&mut self, handle: GroupHandle) -> f32 {
        self.update_group_statistics(handle);
        self.groups.get(handle).map_or(0.0, |g| g.inertia)
    }

    /// Centroid of a group.
    pub fn group_center(&mut self, handle: GroupHandle) -> Vec2 {
        self.update_group_statistics(handle);
        self.groups.get(handle).map_or(Vec2::ZERO, |g| g.center)
    }

    /// Mass-averaged linear velocity of a group.
    pub fn group_linear_velocity(&mut self, handle: GroupHandle) -> Vec2 {
        self.update_group_statistics(handle);
        self.groups
            .get(handle)
            .map_or(Vec2::ZERO, |g| g.linear_velocity)
    }

    /// Angular velocity of a group about its centroid.
    pub fn group_angular_velocity(&mut self, handle: GroupHandle) -> f32 {
        self.update_group_statistics(handle);
        self.groups.get(handle).map_or(0.0, |g| g.angular_velocity)
    }

    /// Recompute the cached statistics of a group if stale.
    pub(crate) fn update_group_statistics(&mut self, handle: GroupHandle) {
        let Some(group) = self.groups.get(handle) else {
            return;
        };
        if group.timestamp == self.timestamp {
            return;
        }
        let (first, last) = (group.first_index as usize, group.last_index as usize);
        let positions = self.position_buffer.as_slice();
        let velocities = self.velocity_buffer.as_slice();

        let m = self.particle_mass();
        let mut mass = 0.0;
        let mut center = Vec2::ZERO;
        let mut linear_velocity = Vec2::ZERO;
        for i in first..last {
            mass += m;
            center += m * positions[i];
            linear_velocity += m * velocities[i];
        }
        if mass > 0.0 {
            center /= mass;
            linear_velocity /= mass;
        }
        let mut inertia = 0.0;
        let mut angular_velocity = 0.0;
        for i in first..last {
            let p = positions[i] - center;
            let v = velocities[i] - linear_velocity;
            inertia += m * p.dot(p);
            angular_velocity += m * p.perp_dot(v);
        }
        if inertia > 0.0 {
            angular_velocity *= 1.0 / inertia;
        }

        let timestamp = self.timestamp;
        let group = self.groups.get_mut(handle).expect("checked above");
        group.mass = mass;
        group.center = center;
        group.linear_velocity = linear_velocity;
        group.inertia = inertia;
        group.angular_velocity = angular_velocity;
        group.timestamp = timestamp;
    }

    // ===== Flags =====

    /// Set a particle's behavior flags, lazily allocating the buffers the
    /// new flags require.
    pub fn set_particle_flags(&mut self, index: i32, new_flags: u32) {
        let old_flags = self.flags_buffer[index as usize];
        if old_flags & !new_flags != 0 {
            // Some flags may be cleared; the union cache must be rebuilt.
            self.needs_update_all_particle_flags = true;
        }
        if !self.all_particle_flags & new_flags != 0 {
            if new_flags & TENSILE_PARTICLE != 0 {
                self.request_accumulation2_buffer();
            }
            if new_flags & COLOR_MIXING_PARTICLE != 0 {
                self.request_color_buffer();
            }
            self.all_particle_flags |= new_flags;
        }
        self.flags_buffer[index as usize] = new_flags;
    }

    /// Set a group's behavior flags, scheduling a depth update when the
    /// solid flag changes.
    pub fn set_group_flags(&mut self, handle: GroupHandle, new_flags: u32) {
        let Some(group) = self.groups.get(handle) else {
            return;
        };
        let old_flags = group.group_flags;
        let mut new_flags = new_flags;
        if (old_flags ^ new_flags) & SOLID_PARTICLE_GROUP != 0 {
            new_flags |= PARTICLE_GROUP_NEEDS_UPDATE_DEPTH;
        }
        if old_flags & !new_flags != 0 {
            self.needs_update_all_group_flags = true;
        }
        if !self.all_group_flags & new_flags != 0 {
            if new_flags & SOLID_PARTICLE_GROUP != 0 {
                self.request_depth_buffer();
            }
            self.all_group_flags |= new_flags;
        }
        if let Some(group) = self.groups.get_mut(handle) {
            group.group_flags = new_flags;
        }
    }

    pub(crate) fn update_all_particle_flags(&mut self) {
        self.all_particle_flags = 0;
        for i in 0..self.count {
            self.all_particle_flags |= self.flags_buffer[i];
        }
        self.needs_update_all_particle_flags = false;
    }

    pub(crate) fn update_all_group_flags(&mut self) {
        self.all_group_flags = 0;
        for &handle in &self.group_list {
            if let Some(group) = self.groups.get(handle) {
                self.all_group_flags |= group.group_flags;
            }
        }
        self.needs_update_all_group_flags = false;
    }

    // ===== Buffer management =====

    /// Grow the internal particle buffers to `capacity`, clamped to the
    /// user-supplied buffer capacities and the max count.
    pub(crate) fn reallocate_internal_buffers(&mut self, capacity: usize) {
        let mut capacity = capacity;
        let mut limit = |cap: Option<usize>| {
            if let Some(cap) = cap {
                capacity = capacity.min(cap);
            }
        };
        limit((self.max_count > 0).then_some(self.max_count));
        limit(self.flags_buffer.user_supplied_capacity());
        limit(self.position_buffer.user_supplied_capacity());
        limit(self.velocity_buffer.user_supplied_capacity());
        limit(self.color_buffer.user_supplied_capacity());
        limit(self.user_data_buffer.user_supplied_capacity());

        if self.internal_allocated_capacity < capacity {
            self.flags_buffer.grow(capacity);
            self.position_buffer.grow(capacity);
            self.velocity_buffer.grow(capacity);
            self.weight_buffer.resize(capacity, 0.0);
            self.accumulation_buffer.resize(capacity, 0.0);
            self.group_buffer.resize(capacity, None);
            // Deferred buffers grow only once allocated.
            if let Some(buf) = &mut self.static_pressure_buffer {
                buf.resize(capacity, 0.0);
            }
            if let Some(buf) = &mut self.accumulation2_buffer {
                buf.resize(capacity, Vec2::ZERO);
            }
            if let Some(buf) = &mut self.depth_buffer {
                buf.resize(capacity, 0.0);
            }
            if self.color_allocated() {
                self.color_buffer.grow(capacity);
            }
            if self.user_data_allocated() {
                self.user_data_buffer.grow(capacity);
            }
            self.internal_allocated_capacity = capacity;
        }
    }

    fn ensure_arena_allocated(&mut self) {
        if self.internal_allocated_capacity == 0 {
            self.reallocate_internal_buffers(MIN_PARTICLE_BUFFER_CAPACITY);
        }
    }

    pub(crate) fn color_allocated(&self) -> bool {
        !self.color_buffer.as_slice().is_empty()
    }

    pub(crate) fn user_data_allocated(&self) -> bool {
        !self.user_data_buffer.as_slice().is_empty()
    }

    pub(crate) fn request_color_buffer(&mut self) {
        self.ensure_arena_allocated();
        self.color_buffer.grow(self.internal_allocated_capacity);
    }

    pub(crate) fn request_user_data_buffer(&mut self) {
        self.ensure_arena_allocated();
        self.user_data_buffer.grow(self.internal_allocated_capacity);
    }

    pub(crate) fn request_static_pressure_buffer(&mut self) {
        self.ensure_arena_allocated();
        if self.static_pressure_buffer.is_none() {
            self.static_pressure_buffer = Some(vec![0.0; self.internal_allocated_capacity]);
        }
    }

    pub(crate) fn request_accumulation2_buffer(&mut self) {
        self.ensure_arena_allocated();
        if self.accumulation2_buffer.is_none() {
            self.accumulation2_buffer = Some(vec![Vec2::ZERO; self.internal_allocated_capacity]);
        }
    }

    pub(crate) fn request_depth_buffer(&mut self) {
        self.ensure_arena_allocated();
        if self.depth_buffer.is_none() {
            self.depth_buffer = Some(vec![0.0; self.internal_allocated_capacity]);
        }
    }

    // ===== User buffer overrides =====

    /// Replace the flags buffer with host-owned storage; its length becomes
    /// a capacity cap for the whole arena.
    pub fn set_flags_buffer(&mut self, buffer: Vec<u32>) -> Option<Vec<u32>> {
        debug_assert!(buffer.len() >= self.count);
        self.flags_buffer.set_user_buffer(buffer)
    }

    /// Replace the position buffer with host-owned storage.
    pub fn set_position_buffer(&mut self, buffer: Vec<Vec2>) -> Option<Vec<Vec2>> {
        debug_assert!(buffer.len() >= self.count);
        self.position_buffer.set_user_buffer(buffer)
    }

    /// Replace the velocity buffer with host-owned storage.
    pub fn set_velocity_buffer(&mut self, buffer: Vec<Vec2>) -> Option<Vec<Vec2>> {
        debug_assert!(buffer.len() >= self.count);
        self.velocity_buffer.set_user_buffer(buffer)
    }

    /// Replace the color buffer with host-owned storage.
    pub fn set_color_buffer(&mut self, buffer: Vec<ParticleColor>) -> Option<Vec<ParticleColor>> {
        debug_assert!(buffer.len() >= self.count);
        self.color_buffer.set_user_buffer(buffer)
    }

    /// Replace the user-data buffer with host-owned storage.
    pub fn set_user_data_buffer(&mut self, buffer: Vec<UserData>) -> Option<Vec<UserData>> {
        debug_assert!(buffer.len() >= self.count);
        self.user_data_buffer.set_user_buffer(buffer)
    }
}

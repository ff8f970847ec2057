//! Arena and lifecycle invariants exercised through the public API.

mod common;

use common::TestWorld;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use silt2d::{
    CircleShape, DestructionListener, GroupHandle, NullWorld, ParticleColor, ParticleDef,
    ParticleGroupDef, ParticleSystem, ParticleSystemDef, TimeStep, Transform,
    PARTICLE_GROUP_CAN_BE_EMPTY,
};
use std::cell::RefCell;
use std::rc::Rc;

fn make_system(radius: f32) -> ParticleSystem {
    ParticleSystem::new(&ParticleSystemDef {
        radius,
        ..Default::default()
    })
}

/// Every derived structure references only live, in-range particles.
fn assert_index_integrity(system: &ParticleSystem) {
    let count = system.particle_count() as i32;
    let flags = system.flags();
    let live = |i: i32| {
        assert!(i >= 0 && i < count, "index {i} out of range 0..{count}");
        assert_eq!(
            flags[i as usize] & silt2d::particle::ZOMBIE_PARTICLE,
            0,
            "index {i} references a zombie"
        );
    };
    for contact in system.contacts() {
        live(contact.index_a);
        live(contact.index_b);
    }
    for contact in system.body_contacts() {
        live(contact.index);
    }
    for pair in system.pairs() {
        live(pair.index_a);
        live(pair.index_b);
    }
    for triad in system.triads() {
        live(triad.index_a);
        live(triad.index_b);
        live(triad.index_c);
    }
    for &group in system.group_handles() {
        let group = system.group(group).expect("listed groups are live");
        assert!(group.first_index() >= 0);
        assert!(group.last_index() <= count);
    }
}

#[test]
fn contact_geometry_invariants_after_solve() {
    let mut system = make_system(0.5);
    let mut world = NullWorld::new(Vec2::new(0.0, -10.0));
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let def = ParticleDef {
            position: Vec2::new(rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)),
            ..Default::default()
        };
        system.create_particle(&world, &def);
    }
    let step = TimeStep::new(1.0 / 60.0, 2);
    system.solve(&mut world, &step);
    // A zero-length step rebuilds the contact set without integrating
    // positions, so the recorded weights match current distances exactly.
    system.solve(&mut world, &TimeStep::new(0.0, 1));

    let diameter = 2.0 * system.radius();
    for contact in system.contacts() {
        let pa = system.positions()[contact.index_a as usize];
        let pb = system.positions()[contact.index_b as usize];
        let d = pa.distance(pb);
        assert!(contact.index_a < contact.index_b);
        assert!(d < diameter, "contact at distance {d} >= diameter");
        assert!(
            (contact.weight - (1.0 - d / diameter)).abs() <= 1e-4,
            "weight {} vs distance {}",
            contact.weight,
            d
        );
        assert!((contact.normal.length() - 1.0).abs() <= 1e-4);
        // Both endpoints sit within one grid cell of each other.
        assert!((pa.x - pb.x).abs() <= diameter && (pa.y - pb.y).abs() <= diameter);
    }
    assert_index_integrity(&system);
}

#[test]
fn zombie_compaction_is_exact_and_idempotent() {
    let mut system = make_system(0.5);
    let mut world = NullWorld::new(Vec2::ZERO);
    for i in 0..5u64 {
        system.create_particle(&world, &ParticleDef {
            position: Vec2::new(i as f32, 0.0),
            velocity: Vec2::new(0.1 * i as f32, 0.0),
            color: ParticleColor::new(i as u8, 0, 0, 255),
            user_data: i + 1,
            ..Default::default()
        });
    }
    system.destroy_particle(2, false);
    let step = TimeStep::new(1.0 / 60.0, 1);
    system.solve(&mut world, &step);

    assert_eq!(system.particle_count(), 4);
    // The old particle 3 now sits at index 2 with its payload intact.
    assert_eq!(system.user_data_mut()[2], 4);
    assert_eq!(system.colors_mut()[2].r, 3);
    assert_index_integrity(&system);

    // Solving again with no new zombies keeps every size stable.
    let count = system.particle_count();
    let pairs = system.pairs().len();
    let triads = system.triads().len();
    system.solve(&mut world, &step);
    assert_eq!(system.particle_count(), count);
    assert_eq!(system.pairs().len(), pairs);
    assert_eq!(system.triads().len(), triads);
}

#[test]
fn destruction_listener_hears_flagged_particles() {
    struct Recorder {
        particles: Rc<RefCell<Vec<i32>>>,
        groups: Rc<RefCell<Vec<GroupHandle>>>,
    }
    impl DestructionListener for Recorder {
        fn say_goodbye_particle(&mut self, index: i32) {
            self.particles.borrow_mut().push(index);
        }
        fn say_goodbye_group(&mut self, group: GroupHandle) {
            self.groups.borrow_mut().push(group);
        }
    }

    let particles = Rc::new(RefCell::new(Vec::new()));
    let groups = Rc::new(RefCell::new(Vec::new()));
    let mut system = make_system(0.5);
    system.set_destruction_listener(Some(Box::new(Recorder {
        particles: particles.clone(),
        groups: groups.clone(),
    })));
    let mut world = NullWorld::new(Vec2::ZERO);

    let positions = [Vec2::ZERO, Vec2::new(0.5, 0.0)];
    let handle = system
        .create_particle_group(&world, &ParticleGroupDef {
            position_data: &positions,
            ..Default::default()
        })
        .unwrap();
    system.destroy_particles_in_group(&world, handle, true);
    let step = TimeStep::new(1.0 / 60.0, 1);
    system.solve(&mut world, &step);

    assert_eq!(particles.borrow().as_slice(), &[0, 1]);
    assert_eq!(groups.borrow().as_slice(), &[handle]);
    assert!(system.group(handle).is_none());
}

#[test]
fn destroy_particles_in_shape_hits_only_contained() {
    let mut system = make_system(0.5);
    let world = NullWorld::new(Vec2::ZERO);
    for i in 0..10 {
        system.create_particle(&world, &ParticleDef {
            position: Vec2::new(i as f32, 0.0),
            ..Default::default()
        });
    }
    system.solve(&mut NullWorld::new(Vec2::ZERO), &TimeStep::new(1.0 / 60.0, 1));

    let circle = CircleShape::new(1.6);
    let destroyed = system.destroy_particles_in_shape(
        &world,
        &circle,
        &Transform::new(Vec2::new(5.0, 0.0), 0.0),
        false,
    );
    // Particles at x = 4, 5, 6 fall inside the circle around (5, 0).
    assert_eq!(destroyed, 3);
    system.solve(&mut NullWorld::new(Vec2::ZERO), &TimeStep::new(1.0 / 60.0, 1));
    assert_eq!(system.particle_count(), 7);
    assert_index_integrity(&system);
}

#[test]
fn locked_world_rejects_mutation() {
    let mut system = make_system(0.5);
    let mut world = TestWorld::new(Vec2::ZERO);
    world.locked = true;
    let positions = [Vec2::ZERO, Vec2::new(0.5, 0.0)];
    let def = ParticleGroupDef {
        position_data: &positions,
        ..Default::default()
    };
    // Release behavior: silent no-op.
    #[cfg(not(debug_assertions))]
    {
        assert!(system.create_particle_group(&world, &def).is_none());
        assert_eq!(system.particle_count(), 0);
    }
    #[cfg(debug_assertions)]
    {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            system.create_particle_group(&world, &def)
        }));
        assert!(result.is_err(), "debug builds assert on locked worlds");
    }
}

#[test]
fn user_supplied_buffers_are_visible_through_accessors() {
    let mut system = make_system(0.5);
    let world = NullWorld::new(Vec2::ZERO);
    system.create_particle(&world, &ParticleDef::default());
    let _ = system.set_position_buffer(vec![Vec2::new(9.0, 9.0); 8]);
    assert_eq!(system.positions()[0], Vec2::new(9.0, 9.0));
    system.positions_mut()[0] = Vec2::new(1.0, 2.0);
    assert_eq!(system.positions()[0], Vec2::new(1.0, 2.0));
}

#[test]
fn group_join_emits_cross_group_pairs() {
    let mut system = make_system(0.5);
    let world = NullWorld::new(Vec2::ZERO);
    let left = [Vec2::new(0.0, 0.0)];
    let right = [Vec2::new(0.6, 0.0)];
    let a = system
        .create_particle_group(&world, &ParticleGroupDef {
            flags: silt2d::particle::SPRING_PARTICLE,
            position_data: &left,
            ..Default::default()
        })
        .unwrap();
    let b = system
        .create_particle_group(&world, &ParticleGroupDef {
            flags: silt2d::particle::SPRING_PARTICLE,
            position_data: &right,
            ..Default::default()
        })
        .unwrap();
    // Single-particle groups cannot pair internally.
    assert!(system.pairs().is_empty());
    system.join_particle_groups(&world, a, b);
    assert_eq!(system.pairs().len(), 1, "join must pair across the seam");
    assert_index_integrity(&system);
}

#[test]
fn random_churn_preserves_index_integrity() {
    let mut system = make_system(0.5);
    let mut world = NullWorld::new(Vec2::new(0.0, -10.0));
    let mut rng = StdRng::seed_from_u64(42);
    let step = TimeStep::new(1.0 / 60.0, 2);

    for round in 0..20 {
        for _ in 0..30 {
            let def = ParticleDef {
                position: Vec2::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)),
                velocity: Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
                ..Default::default()
            };
            system.create_particle(&world, &def);
        }
        // Occasionally stamp an elastic group to exercise pairs and triads.
        if round % 5 == 0 {
            let positions: Vec<Vec2> = (0..6)
                .map(|_| Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect();
            let _ = system.create_particle_group(&world, &ParticleGroupDef {
                flags: silt2d::particle::ELASTIC_PARTICLE | silt2d::particle::SPRING_PARTICLE,
                group_flags: PARTICLE_GROUP_CAN_BE_EMPTY,
                position_data: &positions,
                ..Default::default()
            });
        }
        let count = system.particle_count();
        for _ in 0..count / 4 {
            let victim = rng.gen_range(0..count) as i32;
            system.destroy_particle(victim, false);
        }
        system.solve(&mut world, &step);
        assert_index_integrity(&system);
        for &p in system.positions() {
            assert!(p.is_finite(), "position diverged: {p:?}");
        }
    }
}

#[test]
fn query_shape_aabb_reports_particles_under_shape() {
    let mut system = make_system(0.5);
    let world = NullWorld::new(Vec2::ZERO);
    for i in 0..6 {
        system.create_particle(&world, &ParticleDef {
            position: Vec2::new(i as f32 * 2.0, 0.0),
            ..Default::default()
        });
    }
    system.solve(&mut NullWorld::new(Vec2::ZERO), &TimeStep::new(1.0 / 60.0, 1));

    let circle = CircleShape::new(1.5);
    let mut reported = Vec::new();
    system.query_shape_aabb(
        &circle,
        &Transform::new(Vec2::new(4.0, 0.0), 0.0),
        &mut |i| {
            reported.push(i);
            true
        },
    );
    reported.sort_unstable();
    assert_eq!(reported, vec![2], "only the particle at x = 4 is inside");
}

use std::sync::atomic::{AtomicU32, Ordering};

use lattice::{ComponentDesc, ComponentId, EcsError, QueryDesc, World};

#[derive(Clone, Copy, PartialEq, Debug)]
struct Position([f32; 3]);

#[derive(Clone, Copy, PartialEq, Debug)]
struct Velocity([f32; 3]);

struct Fixture {
    world: World,
    position: ComponentId,
    velocity: ComponentId,
}

fn populated_fixture(entity_count: u32) -> Fixture {
    let mut world = World::new(None).unwrap();
    let position = world
        .register_component(&ComponentDesc::of::<Position>("Position"))
        .unwrap();
    let velocity = world
        .register_component(&ComponentDesc::of::<Velocity>("Velocity"))
        .unwrap();

    for i in 0..entity_count {
        let e = world.entity_create().unwrap();
        world
            .add_component_value(e, position, Position([i as f32, 0.0, 0.0]))
            .unwrap();
        world
            .add_component_value(e, velocity, Velocity([1.0, i as f32, 0.0]))
            .unwrap();
    }

    Fixture {
        world,
        position,
        velocity,
    }
}

fn integrate(world: &World, position: ComponentId, velocity: ComponentId, workers: u32) {
    let mut query = world
        .query_create(&QueryDesc::new().write(position).read(velocity))
        .unwrap();
    world
        .for_each_chunk_parallel(&mut query, workers, |view, _worker| {
            let positions = unsafe { view.column_mut::<Position>(0) };
            let velocities = unsafe { view.column::<Velocity>(1) };
            for row in 0..view.count() as usize {
                positions[row].0[0] += velocities[row].0[0];
                positions[row].0[1] += velocities[row].0[1];
            }
        })
        .unwrap();
}

#[test]
fn argument_validation() {
    let Fixture {
        mut world,
        position,
        ..
    } = populated_fixture(4);

    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    assert_eq!(
        world.for_each_chunk_parallel(&mut query, 0, |_, _| {}),
        Err(EcsError::InvalidArgument)
    );

    world.begin_defer().unwrap();
    assert_eq!(
        world.for_each_chunk_parallel(&mut query, 1, |_, _| {}),
        Err(EcsError::Conflict)
    );
    world.end_defer().unwrap();

    let other = World::new(None).unwrap();
    assert_eq!(
        other.for_each_chunk_parallel(&mut query, 1, |_, _| {}),
        Err(EcsError::InvalidArgument)
    );
}

#[test]
fn every_nonempty_chunk_is_visited_once() {
    let Fixture {
        world, position, ..
    } = populated_fixture(100);

    let chunks_seen = AtomicU32::new(0);
    let rows_seen = AtomicU32::new(0);
    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    world
        .for_each_chunk_parallel(&mut query, 4, |view, _worker| {
            chunks_seen.fetch_add(1, Ordering::SeqCst);
            rows_seen.fetch_add(view.count(), Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(rows_seen.load(Ordering::SeqCst), 100);
    assert!(chunks_seen.load(Ordering::SeqCst) >= 1);
}

#[test]
fn single_worker_runs_on_caller_thread() {
    let Fixture {
        world, position, ..
    } = populated_fixture(10);

    let caller = std::thread::current().id();
    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    world
        .for_each_chunk_parallel(&mut query, 1, move |_view, worker| {
            assert_eq!(worker, 0);
            assert_eq!(std::thread::current().id(), caller);
        })
        .unwrap();
}

#[test]
fn worker_indices_stay_in_range() {
    let Fixture {
        world, position, ..
    } = populated_fixture(64);

    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    world
        .for_each_chunk_parallel(&mut query, 3, |_view, worker| {
            assert!(worker < 3);
        })
        .unwrap();
}

#[test]
fn chunk_local_callbacks_are_deterministic_across_worker_counts() {
    let serial = populated_fixture(200);
    let parallel = populated_fixture(200);

    integrate(&serial.world, serial.position, serial.velocity, 1);
    integrate(&parallel.world, parallel.position, parallel.velocity, 4);

    let mut serial_live = vec![lattice::Entity::NULL; 200];
    let mut parallel_live = vec![lattice::Entity::NULL; 200];
    assert_eq!(serial.world.live_entities(&mut serial_live), 200);
    assert_eq!(parallel.world.live_entities(&mut parallel_live), 200);
    assert_eq!(serial_live, parallel_live);

    for (&a, &b) in serial_live.iter().zip(parallel_live.iter()) {
        let left = serial
            .world
            .get_component_ref::<Position>(a, serial.position)
            .unwrap();
        let right = parallel
            .world
            .get_component_ref::<Position>(b, parallel.position)
            .unwrap();
        assert_eq!(left, right);
    }
}

use std::alloc::Layout;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use lattice::{AllocatorConfig, EcsError, Entity, World, WorldConfig};

fn failing_alloc(_size: usize, _align: usize, _user: *mut ()) -> *mut u8 {
    ptr::null_mut()
}

fn noop_free(_ptr: *mut u8, _size: usize, _align: usize, _user: *mut ()) {}

#[test]
fn world_create_destroy_defaults() {
    let world = World::new(None).unwrap();
    let stats = world.get_stats();

    assert_eq!(stats.live_entities, 0);
    assert_eq!(stats.registered_components, 0);
    assert_eq!(stats.pending_commands, 0);
    assert_eq!(stats.defer_depth, 0);
    assert_eq!(stats.structural_moves, 0);
    // The empty root archetype always exists.
    assert_eq!(stats.archetype_count, 1);
}

#[test]
fn world_rejects_partial_allocator_config() {
    let config = WorldConfig {
        allocator: AllocatorConfig {
            alloc: Some(failing_alloc),
            free: None,
            user: ptr::null_mut(),
        },
        ..WorldConfig::default()
    };
    assert_eq!(
        World::new(Some(&config)).err(),
        Some(EcsError::InvalidArgument)
    );

    let config = WorldConfig {
        allocator: AllocatorConfig {
            alloc: None,
            free: Some(noop_free),
            user: ptr::null_mut(),
        },
        ..WorldConfig::default()
    };
    assert_eq!(
        World::new(Some(&config)).err(),
        Some(EcsError::InvalidArgument)
    );
}

#[test]
fn entity_lifecycle_and_stale_generation() {
    let mut world = World::new(None).unwrap();

    let e0 = world.entity_create().unwrap();
    assert!(world.entity_is_alive(e0));

    world.entity_destroy(e0).unwrap();
    assert!(!world.entity_is_alive(e0));
    assert_eq!(world.entity_destroy(e0), Err(EcsError::StaleEntity));

    let e1 = world.entity_create().unwrap();
    assert_ne!(e1, e0);

    let stats = world.get_stats();
    assert_eq!(stats.live_entities, 1);
    assert_eq!(stats.free_entity_slots, 0);
}

#[test]
fn slot_reuse_bumps_generation() {
    let mut world = World::new(None).unwrap();

    let e0 = world.entity_create().unwrap();
    world.entity_destroy(e0).unwrap();
    let e1 = world.entity_create().unwrap();

    assert_eq!(e1.index(), e0.index());
    assert_eq!(e1.generation(), e0.generation() + 1);
}

#[test]
fn entity_capacity_growth() {
    const ENTITY_COUNT: usize = 300;

    let config = WorldConfig {
        initial_entity_capacity: 4,
        ..WorldConfig::default()
    };
    let mut world = World::new(Some(&config)).unwrap();
    assert_eq!(world.get_stats().entity_capacity, 4);

    let mut entities = Vec::with_capacity(ENTITY_COUNT);
    for _ in 0..ENTITY_COUNT {
        let entity = world.entity_create().unwrap();
        assert_ne!(entity, Entity::NULL);
        entities.push(entity);
    }

    let stats = world.get_stats();
    assert_eq!(stats.live_entities, ENTITY_COUNT as u32);
    assert!(stats.entity_capacity >= ENTITY_COUNT as u32);
    // Doubling from 4 keeps the capacity a power of two.
    assert!(stats.entity_capacity.is_power_of_two());

    for entity in &entities {
        assert!(world.entity_is_alive(*entity));
    }
}

#[test]
fn is_alive_is_total() {
    let mut world = World::new(None).unwrap();
    let e = world.entity_create().unwrap();

    assert!(!world.entity_is_alive(Entity::NULL));
    // Out-of-range index reports dead rather than failing.
    assert!(!world.entity_is_alive(Entity(e.0 + 1000)));
    // Same index, wrong generation.
    assert!(!world.entity_is_alive(Entity(e.0 + (1u64 << 32))));
}

#[test]
fn destroy_null_entity_is_invalid() {
    let mut world = World::new(None).unwrap();
    assert_eq!(
        world.entity_destroy(Entity::NULL),
        Err(EcsError::InvalidArgument)
    );
}

#[test]
fn failing_allocator_surfaces_allocation_failed() {
    let config = WorldConfig {
        allocator: AllocatorConfig {
            alloc: Some(failing_alloc),
            free: Some(noop_free),
            user: ptr::null_mut(),
        },
        ..WorldConfig::default()
    };

    // No storage is allocated until the first entity needs a slot.
    let mut world = World::new(Some(&config)).unwrap();
    assert_eq!(world.entity_create(), Err(EcsError::AllocationFailed));

    let stats = world.get_stats();
    assert_eq!(stats.live_entities, 0);
    assert_eq!(stats.allocated_entity_slots, 0);
}

#[test]
fn reserve_entities_grows_capacity() {
    let mut world = World::new(None).unwrap();
    world.reserve_entities(500).unwrap();
    assert!(world.get_stats().entity_capacity >= 500);
}

static LIVE_BLOCKS: AtomicUsize = AtomicUsize::new(0);
static TOTAL_ALLOCS: AtomicUsize = AtomicUsize::new(0);

fn counting_alloc(size: usize, align: usize, _user: *mut ()) -> *mut u8 {
    LIVE_BLOCKS.fetch_add(1, Ordering::SeqCst);
    TOTAL_ALLOCS.fetch_add(1, Ordering::SeqCst);
    let layout = Layout::from_size_align(size, align).unwrap();
    unsafe { std::alloc::alloc_zeroed(layout) }
}

fn counting_free(block: *mut u8, size: usize, align: usize, _user: *mut ()) {
    LIVE_BLOCKS.fetch_sub(1, Ordering::SeqCst);
    let layout = Layout::from_size_align(size, align).unwrap();
    unsafe { std::alloc::dealloc(block, layout) }
}

#[test]
fn allocator_hooks_balance_on_teardown() {
    use lattice::ComponentDesc;

    {
        let config = WorldConfig {
            allocator: AllocatorConfig {
                alloc: Some(counting_alloc),
                free: Some(counting_free),
                user: ptr::null_mut(),
            },
            ..WorldConfig::default()
        };
        let mut world = World::new(Some(&config)).unwrap();

        let position = world
            .register_component(&ComponentDesc::new("Position", 12, 4))
            .unwrap();

        let mut entities = Vec::new();
        for i in 0..100u32 {
            let entity = world.entity_create().unwrap();
            let value = [i as f32, 0.0, 0.0];
            let bytes = unsafe {
                std::slice::from_raw_parts(value.as_ptr() as *const u8, 12)
            };
            world.add_component(entity, position, Some(bytes)).unwrap();
            entities.push(entity);
        }

        // Leave pending commands (one carrying a payload) in the queue so
        // teardown has to release them.
        world.begin_defer().unwrap();
        let value = [9.0f32, 9.0, 9.0];
        let bytes =
            unsafe { std::slice::from_raw_parts(value.as_ptr() as *const u8, 12) };
        world.entity_destroy(entities[0]).unwrap();
        world
            .add_component(entities[1], position, Some(bytes))
            .unwrap();
        world.remove_component(entities[2], position).unwrap();
        assert_eq!(world.get_stats().pending_commands, 3);
    }

    assert!(TOTAL_ALLOCS.load(Ordering::SeqCst) > 0);
    assert_eq!(LIVE_BLOCKS.load(Ordering::SeqCst), 0);
}

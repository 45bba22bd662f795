use std::sync::{Arc, Mutex};

use lattice::{
    ComponentDesc, ComponentId, EcsError, Entity, QueryDesc, TraceEvent, TraceEventKind, World,
    WorldConfig,
};

#[derive(Clone, Copy, PartialEq, Debug)]
struct Position([f32; 3]);

#[derive(Clone, Copy, PartialEq, Debug)]
struct Velocity([f32; 3]);

struct Fixture {
    world: World,
    position: ComponentId,
    velocity: ComponentId,
}

fn fixture() -> Fixture {
    let mut world = World::new(None).unwrap();
    let position = world
        .register_component(&ComponentDesc::of::<Position>("Position"))
        .unwrap();
    let velocity = world
        .register_component(&ComponentDesc::of::<Velocity>("Velocity"))
        .unwrap();
    Fixture {
        world,
        position,
        velocity,
    }
}

fn visited_entities(world: &World, desc: &QueryDesc) -> Vec<Entity> {
    let mut query = world.query_create(desc).unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();
    let mut visited = Vec::new();
    while let Some(view) = iter.next_chunk().unwrap() {
        visited.extend_from_slice(view.entities());
    }
    visited
}

#[test]
fn include_exclude_filtering() {
    let Fixture {
        mut world,
        position,
        velocity,
    } = fixture();

    let e0 = world.entity_create().unwrap();
    world
        .add_component_value(e0, position, Position([0.0; 3]))
        .unwrap();

    let e1 = world.entity_create().unwrap();
    world
        .add_component_value(e1, position, Position([1.0; 3]))
        .unwrap();
    world
        .add_component_value(e1, velocity, Velocity([1.0; 3]))
        .unwrap();

    let e2 = world.entity_create().unwrap();
    world
        .add_component_value(e2, velocity, Velocity([2.0; 3]))
        .unwrap();

    let _e3 = world.entity_create().unwrap();

    let pos_without_vel = QueryDesc::new().read(position).without(velocity);
    assert_eq!(visited_entities(&world, &pos_without_vel), vec![e0]);

    // The same query re-resolves against updated storage.
    world
        .add_component_value(e0, velocity, Velocity([0.0; 3]))
        .unwrap();
    assert_eq!(visited_entities(&world, &pos_without_vel), Vec::<Entity>::new());

    let pos_and_vel = QueryDesc::new().write(position).read(velocity);
    let visited = visited_entities(&world, &pos_and_vel);
    assert_eq!(visited.len(), 2);
    assert!(visited.contains(&e0));
    assert!(visited.contains(&e1));
}

#[test]
fn descriptor_validation() {
    let Fixture {
        world,
        position,
        velocity,
        ..
    } = fixture();

    // Duplicate include term.
    assert!(matches!(
        world.query_create(&QueryDesc::new().read(position).write(position)),
        Err(EcsError::Conflict)
    ));

    // Duplicate exclude term.
    assert!(matches!(
        world.query_create(&QueryDesc::new().read(position).without(velocity).without(velocity)),
        Err(EcsError::Conflict)
    ));

    // Include/exclude overlap.
    assert!(matches!(
        world.query_create(&QueryDesc::new().read(position).without(position)),
        Err(EcsError::Conflict)
    ));

    // Unknown ids.
    assert!(matches!(
        world.query_create(&QueryDesc::new().read(ComponentId(99))),
        Err(EcsError::NotFound)
    ));
    assert!(matches!(
        world.query_create(&QueryDesc::new().read(position).without(ComponentId::INVALID)),
        Err(EcsError::NotFound)
    ));
}

#[test]
fn iterator_is_finite_and_sticky_after_exhaustion() {
    let Fixture {
        mut world,
        position,
        ..
    } = fixture();

    for i in 0..10 {
        let e = world.entity_create().unwrap();
        world
            .add_component_value(e, position, Position([i as f32, 0.0, 0.0]))
            .unwrap();
    }

    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();

    let mut rows = 0u32;
    while let Some(view) = iter.next_chunk().unwrap() {
        assert!(view.count() > 0);
        rows += view.count();
    }
    assert_eq!(rows, 10);

    // Exhausted for good.
    assert!(iter.next_chunk().unwrap().is_none());
    assert!(iter.next_chunk().unwrap().is_none());
}

#[test]
fn iteration_spans_multiple_chunks_deterministically() {
    // A tiny byte budget forces a handful of rows per chunk.
    let config = WorldConfig {
        target_chunk_bytes: 64,
        ..WorldConfig::default()
    };
    let mut world = World::new(Some(&config)).unwrap();
    let position = world
        .register_component(&ComponentDesc::of::<Position>("Position"))
        .unwrap();

    let mut entities = Vec::new();
    for i in 0..10 {
        let e = world.entity_create().unwrap();
        world
            .add_component_value(e, position, Position([i as f32, 0.0, 0.0]))
            .unwrap();
        entities.push(e);
    }

    // Entity handle (8) + Position (12) = 20 bytes per row → 3 rows per chunk.
    let desc = QueryDesc::new().read(position);
    let mut query = world.query_create(&desc).unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();
    let mut chunk_sizes = Vec::new();
    let mut visited = Vec::new();
    while let Some(view) = iter.next_chunk().unwrap() {
        chunk_sizes.push(view.count());
        visited.extend_from_slice(view.entities());
    }
    assert_eq!(chunk_sizes, vec![3, 3, 3, 1]);
    assert_eq!(visited, entities);

    // Two passes over unchanged storage agree exactly.
    assert_eq!(visited_entities(&world, &desc), entities);
    assert!(world.get_stats().chunk_count >= 4);
}

#[test]
fn writes_through_chunk_views_are_visible() {
    let Fixture {
        mut world,
        position,
        velocity,
    } = fixture();

    let mut entities = Vec::new();
    for i in 0..5 {
        let e = world.entity_create().unwrap();
        world
            .add_component_value(e, position, Position([0.0; 3]))
            .unwrap();
        world
            .add_component_value(e, velocity, Velocity([i as f32, 0.0, 0.0]))
            .unwrap();
        entities.push(e);
    }

    let mut query = world
        .query_create(&QueryDesc::new().write(position).read(velocity))
        .unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();
    while let Some(view) = iter.next_chunk().unwrap() {
        let positions = unsafe { view.column_mut::<Position>(0) };
        let velocities = unsafe { view.column::<Velocity>(1) };
        for row in 0..view.count() as usize {
            positions[row].0[0] += velocities[row].0[0];
        }
    }
    drop(iter);

    for (i, e) in entities.iter().enumerate() {
        assert_eq!(
            *world.get_component_ref::<Position>(*e, position).unwrap(),
            Position([i as f32, 0.0, 0.0])
        );
    }
}

#[test]
fn tag_columns_are_null() {
    let mut world = World::new(None).unwrap();
    let tag = world
        .register_component(&ComponentDesc::tag("Marker"))
        .unwrap();
    let e = world.entity_create().unwrap();
    world.add_component(e, tag, None).unwrap();

    let mut query = world.query_create(&QueryDesc::new().read(tag)).unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();
    let view = iter.next_chunk().unwrap().unwrap();
    assert_eq!(view.count(), 1);
    assert!(view.column_ptr(0).is_null());
}

#[test]
fn empty_chunks_are_skipped() {
    let Fixture {
        mut world,
        position,
        ..
    } = fixture();

    let e = world.entity_create().unwrap();
    world
        .add_component_value(e, position, Position([0.0; 3]))
        .unwrap();
    world.entity_destroy(e).unwrap();

    // The archetype still matches but its single chunk is empty.
    let visited = visited_entities(&world, &QueryDesc::new().read(position));
    assert!(visited.is_empty());
}

#[test]
fn cross_world_queries_are_rejected() {
    let fixture_a = fixture();
    let Fixture { world: world_b, .. } = fixture();

    let mut query = fixture_a
        .world
        .query_create(&QueryDesc::new().read(fixture_a.position))
        .unwrap();

    assert!(matches!(
        world_b.query_refresh(&mut query),
        Err(EcsError::InvalidArgument)
    ));
    assert!(world_b.query_iter_begin(&mut query).is_err());
}

#[test]
fn iteration_emits_begin_chunk_end_events() {
    let Fixture {
        mut world,
        position,
        ..
    } = fixture();

    for _ in 0..3 {
        let e = world.entity_create().unwrap();
        world
            .add_component_value(e, position, Position([0.0; 3]))
            .unwrap();
    }

    let events: Arc<Mutex<Vec<TraceEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    world.set_trace_hook(Some(Arc::new(move |event: &TraceEvent| {
        sink.lock().unwrap().push(*event);
    })));

    let mut query = world.query_create(&QueryDesc::new().read(position)).unwrap();
    let mut iter = world.query_iter_begin(&mut query).unwrap();
    while iter.next_chunk().unwrap().is_some() {}
    drop(iter);

    let log = events.lock().unwrap();
    let kinds: Vec<TraceEventKind> = log.iter().map(|event| event.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TraceEventKind::QueryIterBegin,
            TraceEventKind::QueryIterChunk,
            TraceEventKind::QueryIterEnd,
        ]
    );

    // Begin/end carry the match count, the chunk event its row count.
    assert_eq!(log[0].operation, query.match_count());
    assert_eq!(log[1].operation, 3);
    assert_eq!(log[2].operation, query.match_count());
}

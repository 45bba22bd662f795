use lattice::{ComponentDesc, ComponentId, World};

pub const AGENTS_SMALL: u32 = 100_000;
pub const AGENTS_MED: u32 = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position(pub [f32; 3]);

#[derive(Clone, Copy)]
pub struct Velocity(pub [f32; 3]);

pub struct BenchWorld {
    pub world: World,
    pub position: ComponentId,
    pub velocity: ComponentId,
}

pub fn make_world() -> BenchWorld {
    let mut world = World::new(None).unwrap();
    let position = world
        .register_component(&ComponentDesc::of::<Position>("Position"))
        .unwrap();
    let velocity = world
        .register_component(&ComponentDesc::of::<Velocity>("Velocity"))
        .unwrap();
    BenchWorld {
        world,
        position,
        velocity,
    }
}

pub fn populate(bench: &mut BenchWorld, count: u32) {
    bench.world.reserve_entities(count).unwrap();
    for i in 0..count {
        let e = bench.world.entity_create().unwrap();
        bench
            .world
            .add_component_value(e, bench.position, Position([i as f32, 0.0, 0.0]))
            .unwrap();
        bench
            .world
            .add_component_value(e, bench.velocity, Velocity([1.0, 0.0, 0.0]))
            .unwrap();
    }
}

use criterion::{criterion_group, criterion_main, Criterion};
use phalanx::World;

pub const N_POS_PER_VEL: usize = 10;
pub const N_POS: usize = 10000;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

fn build() -> World {
    let world = World::new();

    let pos_with_vel = N_POS / N_POS_PER_VEL;
    let pos_without_vel = N_POS - pos_with_vel;

    for _ in 0..pos_without_vel {
        world.create_with((Position { x: 0.0, y: 0.0 },));
    }
    for _ in 0..pos_with_vel {
        world.create_with((Position { x: 0.0, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }));
    }

    world
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build", |b| b.iter(build));
}

fn bench_update(c: &mut Criterion) {
    let world = build();
    c.bench_function("update", |b| {
        b.iter(|| {
            world.each_no_entity::<(Position, Velocity), _>(|(pos, vel)| {
                pos.x += vel.dx;
                pos.y += vel.dy;
            });
        })
    });
}

criterion_group!(pos_vel, bench_build, bench_update);
criterion_main!(pos_vel);

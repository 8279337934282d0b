use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use bytemuck::Zeroable;
use gesture_particles::animator::{Instance, ParticleField};
use gesture_particles::formation::Formations;
use gesture_particles::gesture::GestureLabel;

fn formation_benchmark(c: &mut Criterion) {
    c.bench_function("generate_formations_3500", |b| {
        b.iter(|| black_box(Formations::generate(black_box(3500), 15.0, 12.0, 5.0)))
    });
}

fn field_step_benchmark(c: &mut Criterion) {
    let formations = Formations::generate(3500, 15.0, 12.0, 5.0);
    let mut field = ParticleField::new(formations);
    let mut cuboids = vec![Instance::zeroed(); field.cuboid_count()];
    let mut spheres = vec![Instance::zeroed(); field.sphere_count()];

    // Advancing time so the oscillators never hit a fixed point
    let mut time = 0.0f32;
    c.bench_function("field_step_3500", |b| {
        b.iter(|| {
            time += 1.0 / 60.0;
            field.step(
                black_box(GestureLabel::Tree),
                black_box(time),
                &mut cuboids,
                &mut spheres,
            );
            black_box(&cuboids);
        })
    });
}

criterion_group!(benches, formation_benchmark, field_step_benchmark);
criterion_main!(benches);

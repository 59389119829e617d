use criterion::{criterion_group, criterion_main, Criterion, black_box};

use glam::{Vec2, Vec3};

use strata::core::{Camera, SpatialIndexConfig};
use strata::math::Aabb;
use strata::scene::ObjectId;
use strata::spatial::SpatialIndex;

const WORLD: f32 = 8192.0;

fn config() -> SpatialIndexConfig {
    SpatialIndexConfig {
        world_bounds: Aabb::from_coords(0.0, 0.0, WORLD, WORLD),
        ..Default::default()
    }
}

/// Deterministic scatter of small boxes
fn boxes(n: usize) -> Vec<Aabb> {
    let mut state = 0x853c_49e6_748f_ea9b_u64;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((state >> 33) % WORLD as u64) as f32;
            let y = ((state >> 11) % WORLD as u64) as f32;
            let size = ((state >> 55) % 30) as f32 + 1.0;
            Aabb::from_coords(x, y, x + size, y + size)
        })
        .collect()
}

fn filled_index(n: usize) -> SpatialIndex {
    let mut index = SpatialIndex::new(config());
    for (i, bounds) in boxes(n).into_iter().enumerate() {
        index.insert(ObjectId(i as u64 + 1), bounds, true);
    }
    index
}

fn bench_insert_10k(c: &mut Criterion) {
    let data = boxes(10_000);

    c.bench_function("spatial_insert_10k", |b| {
        b.iter(|| {
            let mut index = SpatialIndex::new(config());
            for (i, bounds) in data.iter().enumerate() {
                index.insert(ObjectId(i as u64 + 1), *bounds, true);
            }
            black_box(index.len())
        });
    });
}

fn bench_query_uncached(c: &mut Criterion) {
    let mut index = filled_index(50_000);

    c.bench_function("spatial_query_uncached", |b| {
        b.iter(|| {
            // A new frame each time so both caches miss
            for _ in 0..4 {
                index.begin_frame();
            }
            let area = Aabb::from_coords(2000.0, 2000.0, 3000.0, 3000.0);
            black_box(index.query(black_box(&area)).len())
        });
    });
}

fn bench_query_cached(c: &mut Criterion) {
    let mut index = filled_index(50_000);
    let area = Aabb::from_coords(2000.0, 2000.0, 3000.0, 3000.0);
    index.query(&area);

    c.bench_function("spatial_query_cached", |b| {
        b.iter(|| black_box(index.query(black_box(&area)).len()));
    });
}

fn bench_update(c: &mut Criterion) {
    let mut index = filled_index(50_000);

    c.bench_function("spatial_update_moving_object", |b| {
        let mut step = 0u32;
        b.iter(|| {
            step = step.wrapping_add(1);
            let x = (step % 8000) as f32;
            index.update(ObjectId(1), Aabb::from_center_half_extent(Vec2::new(x, 100.0), Vec2::splat(2.0)))
        });
    });
}

fn bench_spatial_groups(c: &mut Criterion) {
    let mut index = filled_index(50_000);
    let mut camera = Camera::look_at(
        Vec3::new(4096.0, 3500.0, 200.0),
        Vec3::new(4096.0, 4096.0, 0.0),
        Vec3::Z,
    );
    camera.far = 1500.0;

    c.bench_function("spatial_query_groups", |b| {
        b.iter(|| {
            index.begin_frame();
            black_box(index.query_spatial_groups(&camera).len())
        });
    });
}

criterion_group!(
    benches,
    bench_insert_10k,
    bench_query_uncached,
    bench_query_cached,
    bench_update,
    bench_spatial_groups,
);
criterion_main!(benches);

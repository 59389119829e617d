//! Headless culling demo - builds a synthetic map and runs both visibility paths.
//!
//! Usage: cargo run --release --bin cull_demo -- [OPTIONS]
//!
//! Options:
//!   --objects <N>      Number of objects (default: 5000)
//!   --world <METERS>   Side length of the square world (default: 8000)
//!   --seed <SEED>      Random seed (default: 12345)
//!   --config <PATH>    StoreConfig JSON to load instead of the defaults
//!   --stats <PATH>     Write frame statistics as JSON

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;
use serde_json::json;

use strata::core::{logging, Camera, StoreConfig};
use strata::math::Aabb;
use strata::render::buffer::{BufferPool, ChunkId, GeometryBuilder, GeometryType};
use strata::render::context::GpuContext;
use strata::render::RenderManager;
use strata::scene::{Model, ObjectBuilder, ObjectCollection};
use strata::spatial::SpatialIndex;
use strata::streaming::{GeometryUploader, UploadRequest, UploadResult};

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let object_count = parse_arg::<usize>(&args, "--objects").unwrap_or(5000);
    let world = parse_arg::<f32>(&args, "--world").unwrap_or(8000.0);
    let seed = parse_arg::<u64>(&args, "--seed").unwrap_or(12345);

    let mut config = match parse_arg::<PathBuf>(&args, "--config") {
        Some(path) => match StoreConfig::load_sync(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => StoreConfig::default(),
    };
    config.spatial_index.world_bounds = Aabb::from_coords(0.0, 0.0, world, world);

    let ctx = match pollster::block_on(GpuContext::new_headless()) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("No GPU available: {}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "Adapter: {} (indirect count: {})",
        ctx.adapter.get_info().name,
        ctx.supports_indirect_count()
    );

    let pool = Arc::new(BufferPool::new(
        ctx.device.clone(),
        ctx.queue.clone(),
        config.buffer_pool.clone(),
    ));

    // Geometry is generated in parallel, uploads go through the background loader
    let start = Instant::now();
    let builders: Vec<GeometryBuilder> = (0..object_count)
        .into_par_iter()
        .map(|i| synthetic_geometry(seed, i as u64, world))
        .collect();
    log::info!("Generated {} shapes in {:.1?}", builders.len(), start.elapsed());

    let start = Instant::now();
    let chunks = upload_all(&pool, &builders);
    log::info!(
        "Uploaded {} chunks into {} segments in {:.1?}",
        chunks.len(),
        pool.statistics().segment_count,
        start.elapsed()
    );

    let mut objects = ObjectCollection::new();
    for (tag, chunk) in &chunks {
        let builder = builders[*tag as usize].clone();
        objects.insert(ObjectBuilder::new(Model::new(builder)).chunk(*chunk));
    }

    let mut index = SpatialIndex::new(config.spatial_index.clone());
    index.apply_changes(&objects.drain_changes());

    let center = Vec2::splat(world * 0.5);
    let map_camera = Camera::top_down(center, Vec2::splat(world * 0.125), 500.0, 1000.0);

    // CPU path: per-chunk bounds test in the pool
    let start = Instant::now();
    let cpu_visible: usize = GeometryType::ALL
        .iter()
        .map(|&ty| pool.get_visible_chunks(&map_camera, ty).len())
        .sum();
    log::info!("CPU chunk test: {} visible in {:.2?}", cpu_visible, start.elapsed());

    // GPU path, with and without the spatial pre-filter
    let mut manager = match RenderManager::new(
        ctx.device.clone(),
        ctx.queue.clone(),
        pool.clone(),
        &config,
        wgpu::TextureFormat::Rgba8Unorm,
    ) {
        Ok(manager) => manager,
        Err(e) => {
            log::error!("Culler setup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = manager.prepare_frame(&objects, &map_camera, None) {
        log::error!("Culling failed: {}", e);
        std::process::exit(1);
    }
    let unfiltered = manager.statistics().clone();
    log::info!(
        "GPU cull: {} / {} visible in {:.2} ms",
        unfiltered.visible_chunks,
        unfiltered.candidates,
        unfiltered.cull_time_ms
    );

    index.begin_frame();
    if let Err(e) = manager.prepare_frame(&objects, &map_camera, Some(&mut index)) {
        log::error!("Culling failed: {}", e);
        std::process::exit(1);
    }
    let filtered = manager.statistics().clone();
    log::info!(
        "GPU cull with index: {} / {} visible in {:.2} ms",
        filtered.visible_chunks,
        filtered.candidates,
        filtered.cull_time_ms
    );
    if filtered.visible_chunks != unfiltered.visible_chunks {
        log::warn!("Pre-filter changed the visible set");
    }

    // Perspective view for LOD grouping
    let mut street_camera = Camera::look_at(
        Vec3::new(center.x, center.y - 300.0, 150.0),
        center.extend(0.0),
        Vec3::Z,
    );
    street_camera.far = 1500.0;
    let groups = index.query_spatial_groups(&street_camera);
    for group in groups.iter().take(5) {
        log::info!(
            "Group {:?} band {}: {} objects, priority {}",
            group.lod,
            group.distance_bucket,
            group.objects.len(),
            group.priority
        );
    }

    let report = json!({
        "objects": object_count,
        "cpu_visible_chunks": cpu_visible,
        "gpu": unfiltered,
        "gpu_with_index": filtered,
        "groups": groups.len(),
        "pool": pool.statistics(),
        "draw_mode": format!("{:?}", pool.draw_mode()),
        "index": index.statistics(),
    });
    let text = match serde_json::to_string_pretty(&report) {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to serialize statistics: {}", e);
            std::process::exit(1);
        }
    };

    match parse_arg::<PathBuf>(&args, "--stats") {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &text) {
                log::error!("Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
            log::info!("Statistics written to {}", path.display());
        }
        None => println!("{}", text),
    }
}

/// Push every builder through a [`GeometryUploader`] and wait for the results.
/// Returns (builder index, chunk) pairs in submission order.
fn upload_all(pool: &Arc<BufferPool>, builders: &[GeometryBuilder]) -> BTreeMap<u64, ChunkId> {
    let mut uploader = match GeometryUploader::new(pool.clone()) {
        Ok(uploader) => uploader,
        Err(e) => {
            log::error!("Failed to start uploader: {}", e);
            std::process::exit(1);
        }
    };

    for (tag, builder) in builders.iter().enumerate() {
        uploader.submit(UploadRequest {
            tag: tag as u64,
            builder: builder.clone(),
        });
    }

    let mut chunks = BTreeMap::new();
    while uploader.pending_count() > 0 {
        let results = uploader.poll_results();
        if results.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        for result in results {
            match result {
                UploadResult::Uploaded { tag, chunk } => {
                    chunks.insert(tag, chunk);
                }
                UploadResult::Rejected { tag } => log::warn!("Shape {} rejected", tag),
                UploadResult::Failed { tag, error } => log::error!("Shape {} failed: {}", tag, error),
            }
        }
    }
    chunks
}

/// Small random point cluster, road segment or building footprint
fn synthetic_geometry(seed: u64, index: u64, world: f32) -> GeometryBuilder {
    let mut state = seed ^ index.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 40) as f32 / (1u64 << 24) as f32
    };

    let origin = Vec2::new(next(), next()) * world;
    let color = Vec4::new(next(), next(), next(), 1.0);

    match index % 3 {
        0 => {
            let mut builder = GeometryBuilder::new(GeometryType::Points);
            for _ in 0..8 {
                builder.add_point(origin + Vec2::new(next(), next()) * 10.0, color);
            }
            builder
        }
        1 => {
            let mut builder = GeometryBuilder::new(GeometryType::Lines);
            let points: Vec<Vec2> = (0..6)
                .map(|k| origin + Vec2::new(k as f32 * 8.0, (next() - 0.5) * 10.0))
                .collect();
            builder.add_polyline(&points, color);
            builder
        }
        _ => {
            let mut builder = GeometryBuilder::new(GeometryType::Polygons);
            let size = Vec2::new(5.0 + next() * 20.0, 5.0 + next() * 20.0);
            builder.add_polygon(
                &[origin, origin + Vec2::new(size.x, 0.0), origin + size, origin + Vec2::new(0.0, size.y)],
                color,
            );
            builder
        }
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

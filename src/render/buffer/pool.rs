//! Buffer pool: packs independently allocated chunks into large segments
//!
//! One writer, many readers. Allocation and draw-command upload take the
//! write lock; lookups, visibility tests and draws take the read lock. Every
//! successful mutation bumps [`BufferPool::generation`], so a reader can tell
//! whether what it resolved earlier is still current.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};

use serde::Serialize;

use super::chunk::{Chunk, ChunkId, GeometryBuilder, GeometryType, Vertex};
use super::draw::DrawBatch;
use super::ledger::{ChunkLedger, SegmentUsage};
use super::segment::{create_draw_bind_group_layout, DrawMode, Segment};
use crate::core::{BufferPoolConfig, CameraView, Result};
use crate::math::Aabb;

/// Sent to subscribers whenever a segment is created
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentEvent {
    pub geometry_type: GeometryType,
    pub segment_index: usize,
    pub vertex_capacity: u32,
    pub index_capacity: u32,
}

/// Snapshot of pool occupancy
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolStatistics {
    pub chunk_count: usize,
    pub segment_count: usize,
    pub used_vertices: u64,
    pub used_indices: u64,
    pub memory_bytes: u64,
    pub generation: u64,
}

struct PoolState {
    ledger: ChunkLedger,
    segments: HashMap<GeometryType, Vec<Segment>>,
}

/// Chunked geometry store on the device
pub struct BufferPool {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: BufferPoolConfig,
    draw_layout: wgpu::BindGroupLayout,
    draw_mode: DrawMode,
    state: RwLock<PoolState>,
    generation: AtomicU64,
    listeners: Mutex<Vec<mpsc::Sender<SegmentEvent>>>,
}

impl BufferPool {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: BufferPoolConfig) -> Self {
        let draw_layout = create_draw_bind_group_layout(&device);
        let draw_mode = DrawMode::for_features(device.features());

        log::info!(
            "BufferPool: segments of {} vertices / {} indices, {} initial draw commands, {:?} draws",
            config.vertex_capacity,
            config.index_capacity,
            config.initial_draw_commands,
            draw_mode
        );

        Self {
            device,
            queue,
            state: RwLock::new(PoolState {
                ledger: ChunkLedger::new(config.vertex_capacity, config.index_capacity),
                segments: HashMap::new(),
            }),
            config,
            draw_layout,
            draw_mode,
            generation: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Receive a [`SegmentEvent`] for every segment created from now on
    pub fn subscribe_segments(&self) -> mpsc::Receiver<SegmentEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    /// Copy `builder` into the pool and return the new chunk's id.
    ///
    /// Empty geometry yields `Ok(None)` and a warning. A full segment is
    /// replaced transparently by a new one; only device failures are errors.
    pub fn allocate_buffer(&self, builder: &GeometryBuilder) -> Result<Option<ChunkId>> {
        let mut state = self.state.write().unwrap();

        let Some(placement) = state.ledger.plan(builder) else {
            log::warn!(
                "BufferPool: rejected {} geometry without vertices",
                builder.geometry_type.name()
            );
            return Ok(None);
        };
        let ty = placement.geometry_type;

        if let Some((vertex_capacity, index_capacity)) = placement.new_segment {
            let segment = Segment::new(
                &self.device,
                &self.draw_layout,
                ty,
                placement.segment_index,
                vertex_capacity,
                index_capacity,
                self.config.initial_draw_commands,
            )?;
            state.segments.entry(ty).or_default().push(segment);
            state.ledger.push_segment(ty, vertex_capacity, index_capacity);

            log::info!(
                "BufferPool: created {} segment {} ({} vertices, {} indices)",
                ty.name(),
                placement.segment_index,
                vertex_capacity,
                index_capacity
            );
            self.notify(SegmentEvent {
                geometry_type: ty,
                segment_index: placement.segment_index,
                vertex_capacity,
                index_capacity,
            });
        }

        let Some(segment) = state
            .segments
            .get(&ty)
            .and_then(|segments| segments.get(placement.segment_index))
        else {
            log::warn!("BufferPool: no {} segment {}", ty.name(), placement.segment_index);
            return Ok(None);
        };
        segment.write_geometry(
            &self.device,
            &self.queue,
            placement.vertex_offset,
            &builder.vertices,
            placement.index_offset,
            &builder.indices,
        )?;

        let id = state.ledger.commit(&placement);
        if let Some(id) = id {
            self.generation.fetch_add(1, Ordering::Release);
            log::debug!(
                "BufferPool: chunk {} -> {} segment {} (+{} vertices, +{} indices)",
                id.0,
                ty.name(),
                placement.segment_index,
                placement.vertex_count,
                placement.index_count
            );
        }
        Ok(id)
    }

    /// Raw ingestion entry point: a numeric type tag plus vertex/index arrays.
    ///
    /// Unknown tags are rejected like empty geometry.
    pub fn allocate_raw(
        &self,
        type_tag: u32,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        bounds: Aabb,
    ) -> Result<Option<ChunkId>> {
        let Some(geometry_type) = GeometryType::from_tag(type_tag) else {
            log::warn!("BufferPool: rejected unknown geometry type {}", type_tag);
            return Ok(None);
        };
        self.allocate_buffer(&GeometryBuilder {
            geometry_type,
            vertices,
            indices,
            bounds,
        })
    }

    fn notify(&self, event: SegmentEvent) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event).is_ok());
    }

    /// CPU visibility path: chunks of `ty` whose uploaded (model-local) bounds
    /// overlap the camera's ground rectangle
    pub fn get_visible_chunks(&self, camera: &impl CameraView, ty: GeometryType) -> Vec<ChunkId> {
        let view = camera.frustum_2d();
        self.state.read().unwrap().ledger.visible_chunks(&view, ty)
    }

    pub fn get_chunk(&self, id: ChunkId) -> Option<Chunk> {
        self.state.read().unwrap().ledger.get_chunk(id).copied()
    }

    pub fn get_chunk_type(&self, id: ChunkId) -> Option<GeometryType> {
        self.state.read().unwrap().ledger.chunk_type(id)
    }

    /// Segment index holding `id`
    pub fn get_chunk_buffer_index(&self, id: ChunkId) -> Option<usize> {
        self.state.read().unwrap().ledger.chunk_segment_index(id)
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().unwrap().ledger.chunk_count()
    }

    pub fn chunk_ids_for_type(&self, ty: GeometryType) -> Vec<ChunkId> {
        self.state.read().unwrap().ledger.chunk_ids_for_type(ty)
    }

    pub fn segment_count(&self, ty: GeometryType) -> usize {
        self.state.read().unwrap().ledger.segment_count(ty)
    }

    pub fn segment_usage(&self, ty: GeometryType) -> Vec<SegmentUsage> {
        self.state.read().unwrap().ledger.segment_usage(ty)
    }

    /// Incremented by every successful allocation and draw-command upload
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Layout of the per-segment producer bind group
    pub fn draw_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.draw_layout
    }

    /// Bind group exposing a segment's draw-command and draw-count buffers
    pub fn segment_bind_group(&self, ty: GeometryType, index: usize) -> Option<wgpu::BindGroup> {
        let state = self.state.read().unwrap();
        state
            .segments
            .get(&ty)
            .and_then(|segments| segments.get(index))
            .map(|segment| segment.bind_group.clone())
    }

    /// Resolve visible chunk ids into per-segment draw commands
    pub fn resolve_visible(&self, ids: &[ChunkId]) -> DrawBatch {
        DrawBatch::resolve(&self.state.read().unwrap().ledger, ids)
    }

    /// Resolve (chunk, instance slot) pairs into per-segment draw commands,
    /// one command per pair with `first_instance` set to the slot
    pub fn resolve_instances(&self, draws: &[(ChunkId, u32)]) -> DrawBatch {
        DrawBatch::resolve_instances(&self.state.read().unwrap().ledger, draws)
    }

    /// How segments issue their draws on this device
    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    /// Grow a segment's draw-command buffer; false if the segment is unknown
    /// or the device refused the new size.
    pub fn ensure_draw_command_capacity(&self, ty: GeometryType, index: usize, required: u32) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(segment) = state.segments.get_mut(&ty).and_then(|s| s.get_mut(index)) else {
            return false;
        };
        segment.ensure_draw_command_capacity(
            &self.device,
            &self.draw_layout,
            required,
            self.config.draw_command_growth,
        )
    }

    /// Write a batch into every segment's draw buffers.
    ///
    /// Segments without visible chunks get a zero count. A segment whose
    /// command buffer cannot grow draws the commands that fit.
    pub fn upload_draw_commands(&self, batch: &DrawBatch) {
        let mut state = self.state.write().unwrap();
        for segments in state.segments.values_mut() {
            for segment in segments.iter_mut() {
                let commands = batch.commands(segment.geometry_type, segment.index);
                segment.ensure_draw_command_capacity(
                    &self.device,
                    &self.draw_layout,
                    commands.len() as u32,
                    self.config.draw_command_growth,
                );
                segment.write_draw_commands(&self.queue, commands);
            }
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Bind one segment's vertex and index buffers; false if it does not exist
    pub fn bind_buffers_for_type(&self, pass: &mut wgpu::RenderPass<'_>, ty: GeometryType, index: usize) -> bool {
        let state = self.state.read().unwrap();
        let Some(segment) = state.segments.get(&ty).and_then(|s| s.get(index)) else {
            return false;
        };
        pass.set_vertex_buffer(0, segment.vertex_buffer.slice(..));
        pass.set_index_buffer(segment.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        true
    }

    /// Draw every segment of `ty` in the pool's [`DrawMode`]. The pipeline
    /// must already be set.
    ///
    /// Only [`DrawMode::DeviceCount`] sees commands written on the device;
    /// the other modes replay the last CPU upload.
    pub fn draw_gpu_driven(&self, pass: &mut wgpu::RenderPass<'_>, ty: GeometryType) {
        let state = self.state.read().unwrap();
        if let Some(segments) = state.segments.get(&ty) {
            for segment in segments {
                segment.draw(pass, self.draw_mode);
            }
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let state = self.state.read().unwrap();
        let mut stats = PoolStatistics {
            chunk_count: state.ledger.chunk_count(),
            generation: self.generation(),
            ..Default::default()
        };
        for ty in GeometryType::ALL {
            for usage in state.ledger.segment_usage(ty) {
                stats.segment_count += 1;
                stats.used_vertices += usage.used_vertices as u64;
                stats.used_indices += usage.used_indices as u64;
            }
        }
        stats.memory_bytes = state
            .segments
            .values()
            .flatten()
            .map(Segment::memory_bytes)
            .sum();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Vec2, Vec4};
    use crate::core::Camera;
    use crate::render::buffer::DrawIndexedIndirect;
    use crate::render::context::GpuContext;

    fn small_pool(ctx: &GpuContext) -> BufferPool {
        BufferPool::new(
            ctx.device.clone(),
            ctx.queue.clone(),
            BufferPoolConfig {
                vertex_capacity: 64,
                index_capacity: 192,
                initial_draw_commands: 2,
                draw_command_growth: 1.5,
            },
        )
    }

    fn square(min: Vec2, size: f32) -> GeometryBuilder {
        let mut builder = GeometryBuilder::new(GeometryType::Polygons);
        builder.add_polygon(
            &[
                min,
                min + Vec2::new(size, 0.0),
                min + Vec2::splat(size),
                min + Vec2::new(0.0, size),
            ],
            Vec4::ONE,
        );
        builder
    }

    #[test]
    fn test_allocate_and_lookup() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);

        let a = pool.allocate_buffer(&square(Vec2::ZERO, 1.0)).unwrap().unwrap();
        let b = pool.allocate_buffer(&square(Vec2::ONE, 1.0)).unwrap().unwrap();
        assert!(b > a);

        let chunk = pool.get_chunk(b).unwrap();
        assert_eq!(chunk.vertex_count, 4);
        assert_eq!(chunk.index_count, 6);
        assert_eq!(chunk.vertex_offset, 4);
        assert_eq!(pool.get_chunk_type(a), Some(GeometryType::Polygons));
        assert_eq!(pool.get_chunk_buffer_index(a), Some(0));
        assert_eq!(pool.get_chunk(ChunkId(77)), None);
        assert_eq!(pool.generation(), 2);
    }

    #[test]
    fn test_invalid_input_returns_none() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);

        assert_eq!(pool.allocate_buffer(&GeometryBuilder::new(GeometryType::Points)).unwrap(), None);
        assert_eq!(
            pool.allocate_raw(9, vec![Vertex::new(Vec2::ZERO, Vec4::ONE)], vec![0], Aabb::EMPTY).unwrap(),
            None
        );
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.segment_count(GeometryType::Points), 0);
    }

    #[test]
    fn test_overflow_creates_segment_and_notifies() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);
        let events = pool.subscribe_segments();

        for i in 0..16 {
            pool.allocate_buffer(&square(Vec2::splat(i as f32), 1.0)).unwrap().unwrap();
        }
        assert_eq!(pool.segment_count(GeometryType::Polygons), 1);

        let id = pool.allocate_buffer(&square(Vec2::ZERO, 2.0)).unwrap().unwrap();
        assert_eq!(pool.segment_count(GeometryType::Polygons), 2);
        assert_eq!(pool.get_chunk_buffer_index(id), Some(1));

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].segment_index, 1);

        for usage in pool.segment_usage(GeometryType::Polygons) {
            assert!(usage.used_vertices <= usage.vertex_capacity);
            assert!(usage.used_indices <= usage.index_capacity);
        }
    }

    #[test]
    fn test_visible_chunks_end_to_end() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);
        let a = pool.allocate_buffer(&square(Vec2::new(0.0, 0.0), 1.0)).unwrap().unwrap();
        let b = pool.allocate_buffer(&square(Vec2::new(5.0, 5.0), 1.0)).unwrap().unwrap();
        let _c = pool.allocate_buffer(&square(Vec2::new(100.0, 100.0), 1.0)).unwrap().unwrap();

        let camera = Camera::top_down(Vec2::new(4.5, 4.5), Vec2::splat(5.5), 50.0, 500.0);
        let visible = pool.get_visible_chunks(&camera, GeometryType::Polygons);
        assert_eq!(visible, vec![a, b]);
    }

    #[test]
    fn test_upload_grows_draw_commands() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);
        let ids: Vec<_> = (0..5)
            .map(|i| pool.allocate_buffer(&square(Vec2::splat(i as f32), 1.0)).unwrap().unwrap())
            .collect();

        let batch = pool.resolve_visible(&ids);
        assert_eq!(batch.len(), 5);
        pool.upload_draw_commands(&batch);

        let state = pool.state.read().unwrap();
        let segment = &state.segments[&GeometryType::Polygons][0];
        assert!(segment.draw_command_capacity >= 5);
        assert_eq!(segment.host_draw_count, 5);
        assert_eq!(segment.host_commands.len(), 5);
    }

    #[test]
    fn test_compute_pass_writes_segment_draws() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);
        let _a = pool.allocate_buffer(&square(Vec2::ZERO, 1.0)).unwrap().unwrap();
        let b = pool.allocate_buffer(&square(Vec2::splat(3.0), 1.0)).unwrap().unwrap();
        let expected = DrawIndexedIndirect::for_chunk(&pool.get_chunk(b).unwrap());

        // A producer writes one command for `b` and sets the count itself
        let source = format!(
            "struct DrawIndexedIndirect {{
                index_count: u32,
                instance_count: u32,
                first_index: u32,
                base_vertex: i32,
                first_instance: u32,
            }}
            @group(0) @binding(0) var<storage, read_write> commands: array<DrawIndexedIndirect>;
            @group(0) @binding(1) var<storage, read_write> count: atomic<u32>;
            @compute @workgroup_size(1)
            fn main() {{
                commands[0] = DrawIndexedIndirect({}u, 1u, {}u, {}i, 0u);
                atomicStore(&count, 1u);
            }}",
            expected.index_count, expected.first_index, expected.base_vertex
        );
        let module = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("producer_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("producer_layout"),
            bind_group_layouts: &[pool.draw_bind_group_layout()],
            immediate_size: 0,
        });
        let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("producer_pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let bind_group = pool.segment_bind_group(GeometryType::Polygons, 0).unwrap();
        assert!(pool.segment_bind_group(GeometryType::Polygons, 1).is_none());
        assert!(pool.segment_bind_group(GeometryType::Points, 0).is_none());

        let size = std::mem::size_of::<DrawIndexedIndirect>() as u64;
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("producer_staging"),
            size: size + 4,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("producer_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("producer_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        {
            let state = pool.state.read().unwrap();
            let segment = &state.segments[&GeometryType::Polygons][0];
            encoder.copy_buffer_to_buffer(&segment.draw_commands, 0, &staging, 0, size);
            encoder.copy_buffer_to_buffer(&segment.draw_count, 0, &staging, size, 4);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .unwrap();
        rx.recv().unwrap().unwrap();
        {
            let data = slice.get_mapped_range();
            let written: DrawIndexedIndirect = bytemuck::pod_read_unaligned(&data[..size as usize]);
            let count: u32 = bytemuck::pod_read_unaligned(&data[size as usize..]);
            assert_eq!(written, expected);
            assert_eq!(count, 1);
        }
        staging.unmap();

        // Devices that read counts draw straight from the producer's output
        let first_instance = ctx.device.features().contains(wgpu::Features::INDIRECT_FIRST_INSTANCE);
        if ctx.supports_indirect_count() && first_instance {
            assert_eq!(pool.draw_mode(), DrawMode::DeviceCount);
        } else {
            assert_ne!(pool.draw_mode(), DrawMode::DeviceCount);
        }
    }

    #[test]
    fn test_statistics() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let pool = small_pool(&ctx);
        pool.allocate_buffer(&square(Vec2::ZERO, 1.0)).unwrap();

        let stats = pool.statistics();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.segment_count, 1);
        assert_eq!(stats.used_vertices, 4);
        assert!(stats.memory_bytes > 0);
        assert!(serde_json::to_string(&stats).unwrap().contains("chunk_count"));
    }
}

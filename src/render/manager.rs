//! Per-frame visibility and draw orchestration
//!
//! The GPU culler decides what is visible. The spatial index, when given,
//! only narrows the object list handed to the culler. Every visible object
//! gets an instance slot holding its transform and colour, so a chunk is
//! drawn where the culler saw its object.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::core::{CameraView, Result, StoreConfig};
use crate::render::buffer::{BufferPool, ChunkId, DrawBatch, GeometryType};
use crate::render::culling::{GpuFrustumCuller, ObjectGpuData};
use crate::render::pipeline::{GeometryPipeline, InstanceData};
use crate::scene::{Object, ObjectCollection, ObjectId};
use crate::spatial::SpatialIndex;

/// Counters for the last prepared frame
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameStatistics {
    /// Visible objects in the collection
    pub objects: usize,
    /// Objects handed to the culler after the optional pre-filter
    pub candidates: usize,
    pub visible_chunks: usize,
    pub draw_commands: usize,
    pub cull_time_ms: f64,
}

/// Ties the buffer pool, the culler and the geometry pipelines together
pub struct RenderManager {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pool: Arc<BufferPool>,
    culler: GpuFrustumCuller,
    pipeline: GeometryPipeline,
    visible: Vec<ChunkId>,
    instances: Vec<InstanceData>,
    stats: FrameStatistics,
}

impl RenderManager {
    /// Initialize the culler and build pipelines targeting `format`
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        pool: Arc<BufferPool>,
        config: &StoreConfig,
        format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let mut culler = GpuFrustumCuller::new(device.clone(), queue.clone(), config.culler.clone());
        culler.initialize(config.culler.initial_max_objects)?;
        let pipeline = GeometryPipeline::new(&device, &queue, format);

        Ok(Self {
            device,
            queue,
            pool,
            culler,
            pipeline,
            visible: Vec::new(),
            instances: Vec::new(),
            stats: FrameStatistics::default(),
        })
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Chunk ids the last cull reported visible
    pub fn visible_chunks(&self) -> &[ChunkId] {
        &self.visible
    }

    /// Instance slots of the last prepared frame; a command's
    /// `first_instance` indexes this slice
    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    pub fn statistics(&self) -> &FrameStatistics {
        &self.stats
    }

    /// Cull `objects`, resolve the visible chunks and upload draw commands
    /// and instance data.
    ///
    /// With `index`, only objects overlapping the camera's ground footprint
    /// are sent to the device.
    pub fn prepare_frame(
        &mut self,
        objects: &ObjectCollection,
        camera: &impl CameraView,
        index: Option<&mut SpatialIndex>,
    ) -> Result<DrawBatch> {
        let candidates: Option<HashSet<ObjectId>> =
            index.map(|index| index.query(&camera.frustum_2d()).into_iter().collect());

        let mut object_count = 0;
        let submitted: Vec<&Object> = objects
            .iter()
            .filter(|o| o.is_visible())
            .inspect(|_| object_count += 1)
            .filter(|o| candidates.as_ref().is_none_or(|c| c.contains(&o.id())))
            .collect();
        let data: Vec<ObjectGpuData> = submitted.iter().map(|o| ObjectGpuData::from_object(o)).collect();

        let start = Instant::now();
        let mut culled = self.culler.cull_objects(&data, camera)?;
        let cull_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        culled.sort();

        self.visible.clear();
        self.instances.clear();
        let mut draws = Vec::with_capacity(culled.len());
        for visible in culled {
            let (Some(chunk), Some(object)) = (visible.chunk, submitted.get(visible.index as usize)) else {
                continue;
            };
            draws.push((chunk, self.instances.len() as u32));
            self.instances.push(InstanceData::from_object(object));
            self.visible.push(chunk);
        }

        let batch = self.pool.resolve_instances(&draws);
        self.pool.upload_draw_commands(&batch);
        self.pipeline.update_instances(&self.device, &self.queue, &self.instances);
        self.pipeline.update_view(&self.queue, camera);

        self.stats = FrameStatistics {
            objects: object_count,
            candidates: submitted.len(),
            visible_chunks: self.visible.len(),
            draw_commands: batch.len(),
            cull_time_ms,
        };
        log::debug!(
            "RenderManager: {} objects, {} candidates, {} visible chunks",
            self.stats.objects,
            self.stats.candidates,
            self.stats.visible_chunks
        );
        Ok(batch)
    }

    /// Draw every segment of `ty` with the commands of the last prepared frame
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, ty: GeometryType) {
        self.pipeline.bind(pass, ty);
        self.pool.draw_gpu_driven(pass, ty);
    }

    /// Draw all geometry types in order: polygons, lines, points
    pub fn draw_all(&self, pass: &mut wgpu::RenderPass<'_>) {
        for ty in [GeometryType::Polygons, GeometryType::Lines, GeometryType::Points] {
            self.draw(pass, ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Vec2, Vec3, Vec4};
    use crate::core::Camera;
    use crate::math::Aabb;
    use crate::render::buffer::GeometryBuilder;
    use crate::render::context::GpuContext;
    use crate::scene::{Model, ObjectBuilder};

    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    fn square(min: Vec2) -> GeometryBuilder {
        let mut builder = GeometryBuilder::new(GeometryType::Polygons);
        builder.add_polygon(
            &[min, min + Vec2::new(1.0, 0.0), min + Vec2::ONE, min + Vec2::new(0.0, 1.0)],
            Vec4::ONE,
        );
        builder
    }

    /// Three squares at (0,0), (5,5), (100,100), each uploaded as its own chunk
    fn scene(pool: &BufferPool) -> ObjectCollection {
        let mut objects = ObjectCollection::new();
        for min in [Vec2::ZERO, Vec2::splat(5.0), Vec2::splat(100.0)] {
            let builder = square(min);
            let chunk = pool.allocate_buffer(&builder).unwrap().unwrap();
            objects.insert(ObjectBuilder::new(Model::new(builder)).chunk(chunk));
        }
        objects
    }

    fn setup() -> Option<(GpuContext, RenderManager)> {
        let ctx = GpuContext::headless_for_tests()?;
        let pool = Arc::new(BufferPool::new(
            ctx.device.clone(),
            ctx.queue.clone(),
            crate::core::BufferPoolConfig {
                vertex_capacity: 4096,
                index_capacity: 4096,
                ..Default::default()
            },
        ));
        let config = StoreConfig {
            culler: crate::core::CullerConfig {
                initial_max_objects: 16,
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = RenderManager::new(ctx.device.clone(), ctx.queue.clone(), pool, &config, FORMAT).ok()?;
        Some((ctx, manager))
    }

    fn camera() -> Camera {
        Camera::top_down(Vec2::new(4.5, 4.5), Vec2::splat(5.5), 50.0, 200.0)
    }

    #[test]
    fn test_prepare_frame_culls_far_object() {
        let Some((ctx, mut manager)) = setup() else {
            return;
        };
        let objects = scene(manager.pool());

        let batch = manager.prepare_frame(&objects, &camera(), None).unwrap();
        let mut visible = manager.visible_chunks().to_vec();
        visible.sort();
        assert_eq!(visible, vec![ChunkId(1), ChunkId(2)]);
        assert_eq!(batch.commands(GeometryType::Polygons, 0).len(), 2);

        let stats = manager.statistics();
        assert_eq!(stats.objects, 3);
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.visible_chunks, 2);

        // Recording the draws must be valid against a real target
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("manager_test_target"),
            size: wgpu::Extent3d {
                width: 64,
                height: 64,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("manager_test_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("manager_test_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            manager.draw_all(&mut pass);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    #[test]
    fn test_spatial_prefilter() {
        let Some((_ctx, mut manager)) = setup() else {
            return;
        };
        let mut objects = scene(manager.pool());
        let mut index = SpatialIndex::new(crate::core::SpatialIndexConfig {
            world_bounds: Aabb::from_coords(-512.0, -512.0, 512.0, 512.0),
            ..Default::default()
        });
        index.apply_changes(&objects.drain_changes());

        manager.prepare_frame(&objects, &camera(), Some(&mut index)).unwrap();
        let stats = manager.statistics();
        assert_eq!(stats.candidates, 2);
        assert_eq!(stats.visible_chunks, 2);

        // Hidden objects never reach the culler
        let hidden = objects.iter().next().map(|o| o.id()).unwrap();
        objects.set_visible(hidden, false);
        manager.prepare_frame(&objects, &camera(), None).unwrap();
        assert_eq!(manager.statistics().objects, 2);
        assert_eq!(manager.statistics().visible_chunks, 1);
    }

    #[test]
    fn test_moved_object_drawn_where_culled() {
        let Some((_ctx, mut manager)) = setup() else {
            return;
        };
        let builder = square(Vec2::ZERO);
        let chunk = manager.pool().allocate_buffer(&builder).unwrap().unwrap();
        let mut objects = ObjectCollection::new();
        let id = objects.insert(ObjectBuilder::new(Model::new(builder)).chunk(chunk));
        objects.set_translation(id, Vec3::new(100.0, 100.0, 0.0));
        objects.set_color(id, Vec4::new(1.0, 0.0, 0.0, 1.0));

        // Nothing is drawn at the chunk's upload position
        manager.prepare_frame(&objects, &camera(), None).unwrap();
        assert!(manager.visible_chunks().is_empty());

        let moved = Camera::top_down(Vec2::splat(100.5), Vec2::splat(5.5), 50.0, 200.0);
        let batch = manager.prepare_frame(&objects, &moved, None).unwrap();
        assert_eq!(manager.visible_chunks(), &[chunk]);

        let commands = batch.commands(GeometryType::Polygons, 0);
        assert_eq!(commands.len(), 1);
        let instance = manager.instances()[commands[0].first_instance as usize];
        let object = objects.get(id).unwrap();

        let chunk_bounds = manager.pool().get_chunk(chunk).unwrap().bounds;
        let drawn = chunk_bounds.transformed(&instance.transform());
        assert_eq!(drawn, object.world_bounds());
        assert_eq!(drawn, Aabb::from_coords(100.0, 100.0, 101.0, 101.0));
        assert_eq!(instance.color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_shared_chunk_drawn_per_object() {
        let Some((_ctx, mut manager)) = setup() else {
            return;
        };
        let builder = square(Vec2::ZERO);
        let chunk = manager.pool().allocate_buffer(&builder).unwrap().unwrap();
        let model = Model::new(builder);
        let mut objects = ObjectCollection::new();
        for offset in [0.0, 4.0] {
            let id = objects.insert(ObjectBuilder::new(model.clone()).chunk(chunk));
            objects.set_translation(id, Vec3::new(offset, offset, 0.0));
        }

        let batch = manager.prepare_frame(&objects, &camera(), None).unwrap();
        let commands = batch.commands(GeometryType::Polygons, 0);
        assert_eq!(commands.len(), 2);
        assert_ne!(commands[0].first_instance, commands[1].first_instance);

        let mut origins: Vec<Vec2> = commands
            .iter()
            .map(|c| manager.instances()[c.first_instance as usize].transform().w_axis.truncate().truncate())
            .collect();
        origins.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert_eq!(origins, vec![Vec2::ZERO, Vec2::splat(4.0)]);
    }

    #[test]
    fn test_empty_scene() {
        let Some((_ctx, mut manager)) = setup() else {
            return;
        };
        let batch = manager
            .prepare_frame(&ObjectCollection::new(), &Camera::new(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0), None)
            .unwrap();
        assert!(batch.is_empty());
        assert!(manager.visible_chunks().is_empty());
    }
}

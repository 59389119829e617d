//! GPU frustum culler: one compute thread per object, compacted visible list out

use std::sync::Arc;

use super::gpu_data::{CameraGpuData, CullParams, ObjectGpuData};
use crate::core::{CameraView, CullerConfig, Error, Result};
use crate::render::buffer::ChunkId;

/// Work-group size compiled into `frustum_cull.wgsl`
pub const WORKGROUP_SIZE: u32 = 64;

const OBJECT_SIZE: u64 = std::mem::size_of::<ObjectGpuData>() as u64;
const ID_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Capacity-dependent buffers
struct CullBuffers {
    objects: wgpu::Buffer,
    visible_ids: wgpu::Buffer,
    visible_objects: wgpu::Buffer,
    visible_count: wgpu::Buffer,
    count_staging: wgpu::Buffer,
    ids_staging: wgpu::Buffer,
    objects_staging: wgpu::Buffer,
}

/// One object that passed the frustum test
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VisibleObject {
    /// Position in the slice handed to [`GpuFrustumCuller::cull_objects`]
    pub index: u32,
    pub chunk: Option<ChunkId>,
}

/// Per-object visibility on the device.
///
/// `initialize` must run before `perform_culling`. Both culling and
/// `resize` block until the device has finished.
pub struct GpuFrustumCuller {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: CullerConfig,
    camera_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipeline: Option<wgpu::ComputePipeline>,
    buffers: Option<CullBuffers>,
    bind_group: Option<wgpu::BindGroup>,
    max_objects: u32,
}

impl GpuFrustumCuller {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: CullerConfig) -> Self {
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_camera_uniform"),
            size: std::mem::size_of::<CameraGpuData>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_params_uniform"),
            size: std::mem::size_of::<CullParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            config,
            camera_buffer,
            params_buffer,
            bind_group_layout: None,
            pipeline: None,
            buffers: None,
            bind_group: None,
            max_objects: 0,
        }
    }

    /// Allocate buffers for `max_objects`, build the binding layout and the pipeline
    pub fn initialize(&mut self, max_objects: u32) -> Result<()> {
        if self.config.workgroup_size != WORKGROUP_SIZE {
            return Err(Error::Config(format!(
                "culler workgroup_size {} does not match the shader ({})",
                self.config.workgroup_size, WORKGROUP_SIZE
            )));
        }

        let max_objects = max_objects.max(1);
        let buffers = self.create_buffers(max_objects)?;

        let uniform = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frustum_cull_bind_group_layout"),
            entries: &[
                // Camera
                uniform(0),
                // Objects
                storage(1, true),
                // Visible chunk ids
                storage(2, false),
                // Visible count (atomic)
                storage(3, false),
                // Params
                uniform(4),
                // Visible object indices
                storage(5, false),
            ],
        });

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frustum_cull_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/frustum_cull.wgsl").into()),
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frustum_cull_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("frustum_cull_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        self.bind_group = Some(self.create_bind_group(&bind_group_layout, &buffers));
        self.bind_group_layout = Some(bind_group_layout);
        self.pipeline = Some(pipeline);
        self.buffers = Some(buffers);
        self.max_objects = max_objects;

        log::info!("GpuFrustumCuller: initialized for {} objects", max_objects);
        Ok(())
    }

    fn create_buffers(&self, max_objects: u32) -> Result<CullBuffers> {
        let limits = self.device.limits();
        let object_bytes = max_objects as u64 * OBJECT_SIZE;
        let id_bytes = max_objects as u64 * ID_SIZE;
        let binding_limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if object_bytes > binding_limit {
            return Err(Error::ResourceCreation(format!(
                "culler object buffer of {} bytes exceeds binding limit {}",
                object_bytes, binding_limit
            )));
        }

        let objects = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_objects"),
            size: object_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let visible_ids = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_visible_ids"),
            size: id_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let visible_objects = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_visible_objects"),
            size: id_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let visible_count = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_visible_count"),
            size: ID_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let count_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_count_staging"),
            size: ID_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let ids_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_ids_staging"),
            size: id_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let objects_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cull_objects_staging"),
            size: id_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(CullBuffers {
            objects,
            visible_ids,
            visible_objects,
            visible_count,
            count_staging,
            ids_staging,
            objects_staging,
        })
    }

    fn create_bind_group(&self, layout: &wgpu::BindGroupLayout, buffers: &CullBuffers) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frustum_cull_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.objects.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.visible_ids.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.visible_count.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffers.visible_objects.as_entire_binding(),
                },
            ],
        })
    }

    /// Grow capacity to `new_max` objects. Never shrinks.
    ///
    /// Waits for the device to go idle before replacing the buffers.
    pub fn resize(&mut self, new_max: u32) -> Result<()> {
        if new_max <= self.max_objects {
            return Ok(());
        }
        if self.bind_group_layout.is_none() {
            return Err(Error::NotInitialized("bind group layout"));
        }

        self.wait_idle()?;
        let buffers = self.create_buffers(new_max)?;
        let Some(layout) = self.bind_group_layout.as_ref() else {
            return Err(Error::NotInitialized("bind group layout"));
        };
        self.bind_group = Some(self.create_bind_group(layout, &buffers));
        self.buffers = Some(buffers);

        log::info!("GpuFrustumCuller: resized {} -> {} objects", self.max_objects, new_max);
        self.max_objects = new_max;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| Error::Gpu(format!("device wait failed: {:?}", e)))
    }

    /// Test every object against the camera frustum on the device.
    ///
    /// Returns the chunk ids of visible objects in no particular order;
    /// objects without a chunk are tested but not reported.
    pub fn perform_culling(
        &mut self,
        objects: &[ObjectGpuData],
        camera: &impl CameraView,
    ) -> Result<Vec<ChunkId>> {
        Ok(self
            .cull_objects(objects, camera)?
            .into_iter()
            .filter_map(|visible| visible.chunk)
            .collect())
    }

    /// Like [`perform_culling`](Self::perform_culling), but reports every
    /// visible object with its input position, chunk or not.
    pub fn cull_objects(
        &mut self,
        objects: &[ObjectGpuData],
        camera: &impl CameraView,
    ) -> Result<Vec<VisibleObject>> {
        if self.pipeline.is_none() {
            return Err(Error::NotInitialized("pipeline"));
        }
        if self.bind_group_layout.is_none() {
            return Err(Error::NotInitialized("bind group layout"));
        }
        if self.bind_group.is_none() || self.buffers.is_none() {
            return Err(Error::NotInitialized("bind group"));
        }
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let object_count = u32::try_from(objects.len())
            .map_err(|_| Error::ResourceCreation(format!("{} objects exceed u32", objects.len())))?;
        if object_count > self.max_objects {
            self.resize(object_count.next_power_of_two())?;
        }

        let (Some(pipeline), Some(bind_group), Some(buffers)) =
            (self.pipeline.as_ref(), self.bind_group.as_ref(), self.buffers.as_ref())
        else {
            return Err(Error::NotInitialized("bind group"));
        };

        let camera_data = CameraGpuData::from_view(camera);
        self.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera_data));
        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&CullParams::new(object_count)));
        self.queue.write_buffer(&buffers.objects, 0, bytemuck::cast_slice(objects));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frustum_cull_encoder"),
        });

        encoder.clear_buffer(&buffers.visible_count, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("frustum_cull_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(object_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&buffers.visible_count, 0, &buffers.count_staging, 0, ID_SIZE);
        let list_bytes = object_count as u64 * ID_SIZE;
        encoder.copy_buffer_to_buffer(&buffers.visible_ids, 0, &buffers.ids_staging, 0, list_bytes);
        encoder.copy_buffer_to_buffer(&buffers.visible_objects, 0, &buffers.objects_staging, 0, list_bytes);

        self.queue.submit(std::iter::once(encoder.finish()));

        let count = read_staging(&self.device, &buffers.count_staging, ID_SIZE, |data| {
            u32::from_le_bytes([data[0], data[1], data[2], data[3]])
        })?
        .min(object_count);

        if count == 0 {
            log::debug!("GpuFrustumCuller: 0 / {} visible", object_count);
            return Ok(Vec::new());
        }

        let read_bytes = count as u64 * ID_SIZE;
        let ids = read_staging(&self.device, &buffers.ids_staging, read_bytes, |data| {
            bytemuck::cast_slice::<u8, u32>(data).to_vec()
        })?;
        let indices = read_staging(&self.device, &buffers.objects_staging, read_bytes, |data| {
            bytemuck::cast_slice::<u8, u32>(data).to_vec()
        })?;

        let visible = indices
            .into_iter()
            .zip(ids)
            .map(|(index, raw)| VisibleObject {
                index,
                chunk: ChunkId::from_gpu(raw),
            })
            .collect();

        log::debug!("GpuFrustumCuller: {} / {} visible", count, object_count);
        Ok(visible)
    }

    /// Current object capacity
    pub fn max_objects(&self) -> u32 {
        self.max_objects
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some() && self.bind_group.is_some()
    }
}

/// Map the first `size` bytes of a staging buffer, block until ready, read and unmap
fn read_staging<T>(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    size: u64,
    read: impl FnOnce(&[u8]) -> T,
) -> Result<T> {
    let slice = staging.slice(..size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| Error::BufferMap(format!("{:?}", e)))?;

    rx.recv()
        .map_err(|e| Error::BufferMap(e.to_string()))?
        .map_err(|e| Error::BufferMap(e.to_string()))?;

    let value = {
        let data = slice.get_mapped_range();
        read(&data)
    };
    staging.unmap();
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Vec2, Vec3};
    use crate::core::Camera;
    use crate::math::Aabb;
    use crate::render::buffer::GeometryType;
    use crate::render::context::GpuContext;
    use std::collections::HashSet;

    fn culler(ctx: &GpuContext, max_objects: u32) -> GpuFrustumCuller {
        let mut culler = GpuFrustumCuller::new(ctx.device.clone(), ctx.queue.clone(), CullerConfig::default());
        culler.initialize(max_objects).unwrap();
        culler
    }

    fn object(id: u32, bounds: Aabb) -> ObjectGpuData {
        ObjectGpuData::new(Mat4::IDENTITY, bounds, Some(ChunkId(id)), GeometryType::Polygons)
    }

    /// Unit boxes on a 4-unit lattice, offset so no edge sits on a view boundary
    fn lattice() -> Vec<ObjectGpuData> {
        let mut objects = Vec::new();
        let mut id = 1;
        for y in -20..20 {
            for x in -20..20 {
                let min = Vec2::new(x as f32 * 4.0 + 0.25, y as f32 * 4.0 + 0.25);
                objects.push(object(id, Aabb::new(min, min + Vec2::ONE)));
                id += 1;
            }
        }
        objects
    }

    fn cpu_visible(objects: &[ObjectGpuData], camera: &impl CameraView) -> HashSet<ChunkId> {
        let frustum = camera.frustum();
        objects
            .iter()
            .filter(|o| frustum.intersects_aabb(&o.bounds()))
            .map(|o| ChunkId(o.chunk_id))
            .collect()
    }

    #[test]
    fn test_not_initialized() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = GpuFrustumCuller::new(ctx.device.clone(), ctx.queue.clone(), CullerConfig::default());
        let camera = Camera::default();
        let result = culler.perform_culling(&[object(1, Aabb::from_coords(0.0, 0.0, 1.0, 1.0))], &camera);
        assert!(matches!(result, Err(Error::NotInitialized(_))));
        assert!(matches!(culler.resize(10), Err(Error::NotInitialized(_))));
    }

    #[test]
    fn test_mismatched_workgroup_size_rejected() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let config = CullerConfig {
            workgroup_size: 128,
            ..Default::default()
        };
        let mut culler = GpuFrustumCuller::new(ctx.device.clone(), ctx.queue.clone(), config);
        assert!(matches!(culler.initialize(16), Err(Error::Config(_))));
    }

    #[test]
    fn test_end_to_end_scenario() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 16);
        let objects = [
            object(1, Aabb::from_coords(0.0, 0.0, 1.0, 1.0)),
            object(2, Aabb::from_coords(5.0, 5.0, 6.0, 6.0)),
            object(3, Aabb::from_coords(100.0, 100.0, 101.0, 101.0)),
        ];
        let camera = Camera::top_down(Vec2::new(4.5, 4.5), Vec2::splat(5.5), 50.0, 500.0);

        let mut visible = culler.perform_culling(&objects, &camera).unwrap();
        visible.sort();
        assert_eq!(visible, vec![ChunkId(1), ChunkId(2)]);
    }

    #[test]
    fn test_matches_cpu_plane_test() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4096);
        let objects = lattice();

        let cameras = [
            Camera::top_down(Vec2::ZERO, Vec2::splat(50.5), 20.0, 200.0),
            Camera::new(Vec3::new(0.3, 0.2, 30.0), 90.0, 1.0),
        ];
        for camera in &cameras {
            let expected = cpu_visible(&objects, camera);
            assert!(!expected.is_empty() && expected.len() < objects.len());

            let visible = culler.perform_culling(&objects, camera).unwrap();
            assert_eq!(visible.len(), expected.len());
            assert_eq!(visible.into_iter().collect::<HashSet<_>>(), expected);
        }
    }

    #[test]
    fn test_idempotent() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4096);
        let objects = lattice();
        let camera = Camera::top_down(Vec2::new(10.0, -6.0), Vec2::splat(30.5), 20.0, 200.0);

        let first: HashSet<_> = culler.perform_culling(&objects, &camera).unwrap().into_iter().collect();
        let second: HashSet<_> = culler.perform_culling(&objects, &camera).unwrap().into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_grows_for_large_object_sets() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4);
        let objects: Vec<_> = (1..=10)
            .map(|i| object(i, Aabb::from_coords(i as f32, 0.0, i as f32 + 0.5, 0.5)))
            .collect();
        let camera = Camera::top_down(Vec2::new(5.0, 0.0), Vec2::splat(20.0), 20.0, 200.0);

        let visible = culler.perform_culling(&objects, &camera).unwrap();
        assert_eq!(visible.len(), 10);
        assert_eq!(culler.max_objects(), 16);

        culler.resize(8).unwrap();
        assert_eq!(culler.max_objects(), 16);
    }

    #[test]
    fn test_empty_input() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4);
        assert!(culler.perform_culling(&[], &Camera::default()).unwrap().is_empty());
    }

    #[test]
    fn test_unassigned_chunks_not_reported() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4);
        let objects = [
            ObjectGpuData::new(Mat4::IDENTITY, Aabb::from_coords(0.0, 0.0, 1.0, 1.0), None, GeometryType::Points),
            object(5, Aabb::from_coords(1.0, 1.0, 2.0, 2.0)),
        ];
        let camera = Camera::top_down(Vec2::ZERO, Vec2::splat(10.0), 20.0, 200.0);
        assert_eq!(culler.perform_culling(&objects, &camera).unwrap(), vec![ChunkId(5)]);
    }

    #[test]
    fn test_cull_objects_reports_input_positions() {
        let Some(ctx) = GpuContext::headless_for_tests() else {
            return;
        };
        let mut culler = culler(&ctx, 4);
        let objects = [
            object(7, Aabb::from_coords(100.0, 100.0, 101.0, 101.0)),
            ObjectGpuData::new(Mat4::IDENTITY, Aabb::from_coords(0.0, 0.0, 1.0, 1.0), None, GeometryType::Points),
            object(9, Aabb::from_coords(2.0, 2.0, 3.0, 3.0)),
        ];
        let camera = Camera::top_down(Vec2::ZERO, Vec2::splat(10.0), 20.0, 200.0);

        let mut visible = culler.cull_objects(&objects, &camera).unwrap();
        visible.sort();
        assert_eq!(
            visible,
            vec![
                VisibleObject { index: 1, chunk: None },
                VisibleObject {
                    index: 2,
                    chunk: Some(ChunkId(9))
                },
            ]
        );
    }
}

//! Render pipelines for pool geometry, one per geometry type

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::core::types::{Mat4, Vec4};
use crate::core::CameraView;
use crate::render::buffer::{GeometryType, Vertex};
use crate::scene::Object;

/// View uniform (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ViewUniform {
    pub view_projection: [[f32; 4]; 4],
}

impl ViewUniform {
    pub fn from_view(camera: &impl CameraView) -> Self {
        Self {
            view_projection: camera.view_projection().to_cols_array_2d(),
        }
    }
}

/// Per-draw object data, selected by `first_instance` (80 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Model to world transform
    pub transform: [[f32; 4]; 4],
    /// Multiplied with the vertex colour
    pub color: [f32; 4],
}

impl InstanceData {
    pub fn new(transform: Mat4, color: Vec4) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            color: color.to_array(),
        }
    }

    pub fn from_object(object: &Object) -> Self {
        Self::new(object.transform(), object.color())
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.transform)
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec4::ONE)
    }
}

const INSTANCE_SIZE: u64 = std::mem::size_of::<InstanceData>() as u64;

/// Flat-colour pipelines drawing segment vertex/index buffers
pub struct GeometryPipeline {
    pipelines: HashMap<GeometryType, wgpu::RenderPipeline>,
    view_buffer: wgpu::Buffer,
    view_layout: wgpu::BindGroupLayout,
    view_bind_group: wgpu::BindGroup,
    instance_buffer: wgpu::Buffer,
    instance_capacity: u32,
    format: wgpu::TextureFormat,
}

impl GeometryPipeline {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("geometry_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/geometry.wgsl").into()),
        });

        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geometry_view"),
            size: std::mem::size_of::<ViewUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("geometry_view_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        // Slot 0 starts as identity/white so a draw before the first upload is harmless
        let instance_buffer = create_instance_buffer(device, 1);
        queue.write_buffer(&instance_buffer, 0, bytemuck::bytes_of(&InstanceData::default()));
        let view_bind_group = create_view_bind_group(device, &view_layout, &view_buffer, &instance_buffer);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("geometry_pipeline_layout"),
            bind_group_layouts: &[&view_layout],
            immediate_size: 0,
        });

        let pipelines = GeometryType::ALL
            .into_iter()
            .map(|ty| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(ty.name()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs_main"),
                        buffers: &[Vertex::layout()],
                        compilation_options: Default::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: ty.topology(),
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some("fs_main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    multiview_mask: None,
                    cache: None,
                });
                (ty, pipeline)
            })
            .collect();

        Self {
            pipelines,
            view_buffer,
            view_layout,
            view_bind_group,
            instance_buffer,
            instance_capacity: 1,
            format,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn update_view(&self, queue: &wgpu::Queue, camera: &impl CameraView) {
        queue.write_buffer(&self.view_buffer, 0, bytemuck::bytes_of(&ViewUniform::from_view(camera)));
    }

    /// Upload per-draw instances, growing the buffer when needed.
    ///
    /// Slot `i` is what a command with `first_instance == i` draws with.
    pub fn update_instances(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, instances: &[InstanceData]) {
        if instances.is_empty() {
            return;
        }
        let required = instances.len() as u32;
        if required > self.instance_capacity {
            let capacity = required.next_power_of_two();
            self.instance_buffer = create_instance_buffer(device, capacity);
            self.view_bind_group =
                create_view_bind_group(device, &self.view_layout, &self.view_buffer, &self.instance_buffer);
            log::debug!(
                "GeometryPipeline: instance buffer {} -> {} slots",
                self.instance_capacity,
                capacity
            );
            self.instance_capacity = capacity;
        }
        queue.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(instances));
    }

    pub fn instance_capacity(&self) -> u32 {
        self.instance_capacity
    }

    /// Set the pipeline and view bind group for `ty`
    pub fn bind(&self, pass: &mut wgpu::RenderPass<'_>, ty: GeometryType) {
        if let Some(pipeline) = self.pipelines.get(&ty) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.view_bind_group, &[]);
        }
    }
}

fn create_instance_buffer(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("geometry_instances"),
        size: capacity as u64 * INSTANCE_SIZE,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_view_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view_buffer: &wgpu::Buffer,
    instance_buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("geometry_view_bg"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: view_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: instance_buffer.as_entire_binding(),
            },
        ],
    })
}

//! Device buffers backing one pool segment

use wgpu::util::DeviceExt;

use super::chunk::{GeometryType, Vertex};
use super::draw::DrawIndexedIndirect;
use crate::core::{Error, Result};

/// Size of one vertex in bytes
pub const VERTEX_SIZE: u64 = std::mem::size_of::<Vertex>() as u64;
/// Size of one index in bytes
pub const INDEX_SIZE: u64 = std::mem::size_of::<u32>() as u64;
/// Size of one indirect draw command in bytes
pub const DRAW_COMMAND_SIZE: u64 = std::mem::size_of::<DrawIndexedIndirect>() as u64;

/// Bind group layout exposing a segment's draw-command and draw-count buffers
/// to a compute pass that produces indirect draws on the device.
///
/// binding 0: `array<DrawIndexedIndirect>` (read_write)
/// binding 1: `atomic<u32>` draw count (read_write)
pub fn create_draw_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("segment_draw_bind_group_layout"),
        entries: &[storage(0), storage(1)],
    })
}

fn checked_size(device: &wgpu::Device, what: &str, size: u64) -> Result<u64> {
    let limit = device.limits().max_buffer_size;
    if size == 0 || size > limit {
        return Err(Error::ResourceCreation(format!(
            "{} buffer of {} bytes (device limit {})",
            what, size, limit
        )));
    }
    Ok(size)
}

/// One vertex buffer, one index buffer and the indirect-draw buffers for
/// a single geometry type.
pub struct Segment {
    pub geometry_type: GeometryType,
    pub index: usize,
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub vertex_capacity: u32,
    pub index_capacity: u32,
    /// Indirect commands, filled by the pool or a device-side producer
    pub draw_commands: wgpu::Buffer,
    pub draw_command_capacity: u32,
    /// Single `u32` consumed by indirect-draw-with-count
    pub draw_count: wgpu::Buffer,
    /// Producer bindings for `draw_commands` / `draw_count`
    pub bind_group: wgpu::BindGroup,
    /// Count last written from the CPU, used when the device cannot read counts
    pub host_draw_count: u32,
    /// Commands last written from the CPU, used for direct draws
    pub host_commands: Vec<DrawIndexedIndirect>,
}

/// How a segment issues its draws, picked from the device features
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawMode {
    /// Indirect draws with the count read from `draw_count`
    DeviceCount,
    /// Indirect draws with the count last uploaded from the CPU
    HostCount,
    /// One `draw_indexed` per uploaded command; for devices that ignore
    /// `first_instance` in indirect arguments
    Direct,
}

impl DrawMode {
    pub fn for_features(features: wgpu::Features) -> Self {
        if !features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            Self::Direct
        } else if features.contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT) {
            Self::DeviceCount
        } else {
            Self::HostCount
        }
    }
}

impl Segment {
    /// Allocate all device buffers for a new segment
    pub fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        geometry_type: GeometryType,
        index: usize,
        vertex_capacity: u32,
        index_capacity: u32,
        draw_command_capacity: u32,
    ) -> Result<Self> {
        let ty = geometry_type.name();
        let vertex_size = checked_size(device, "vertex", vertex_capacity as u64 * VERTEX_SIZE)?;
        let index_size = checked_size(device, "index", index_capacity as u64 * INDEX_SIZE)?;
        let draw_command_capacity = draw_command_capacity.max(1);
        let command_size = checked_size(device, "draw command", draw_command_capacity as u64 * DRAW_COMMAND_SIZE)?;

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("segment_{}_{}_vertices", ty, index)),
            size: vertex_size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("segment_{}_{}_indices", ty, index)),
            size: index_size,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let draw_commands = Self::create_command_buffer(device, geometry_type, index, command_size);

        let draw_count = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("segment_{}_{}_draw_count", ty, index)),
            size: 4,
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = Self::create_bind_group(device, layout, &draw_commands, &draw_count);

        Ok(Self {
            geometry_type,
            index,
            vertex_buffer,
            index_buffer,
            vertex_capacity,
            index_capacity,
            draw_commands,
            draw_command_capacity,
            draw_count,
            bind_group,
            host_draw_count: 0,
            host_commands: Vec::new(),
        })
    }

    fn create_command_buffer(
        device: &wgpu::Device,
        geometry_type: GeometryType,
        index: usize,
        size: u64,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("segment_{}_{}_draw_commands", geometry_type.name(), index)),
            size,
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        draw_commands: &wgpu::Buffer,
        draw_count: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("segment_draw_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: draw_commands.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: draw_count.as_entire_binding(),
                },
            ],
        })
    }

    /// Copy geometry into the segment at the given element offsets.
    ///
    /// Goes through a short-lived staging buffer and a device-side copy, then
    /// waits for the copy so later draws never see a partial range.
    pub fn write_geometry(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        vertex_offset: u32,
        vertices: &[Vertex],
        index_offset: u32,
        indices: &[u32],
    ) -> Result<()> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("segment_upload_encoder"),
        });

        // Staging buffers are dropped after submit; wgpu keeps them alive until the copy completes
        if !vertex_bytes.is_empty() {
            let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("segment_vertex_staging"),
                contents: vertex_bytes,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            encoder.copy_buffer_to_buffer(
                &staging,
                0,
                &self.vertex_buffer,
                vertex_offset as u64 * VERTEX_SIZE,
                vertex_bytes.len() as u64,
            );
        }

        if !index_bytes.is_empty() {
            let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("segment_index_staging"),
                contents: index_bytes,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            encoder.copy_buffer_to_buffer(
                &staging,
                0,
                &self.index_buffer,
                index_offset as u64 * INDEX_SIZE,
                index_bytes.len() as u64,
            );
        }

        let submission = queue.submit(std::iter::once(encoder.finish()));
        device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| Error::Gpu(format!("segment upload wait failed: {:?}", e)))?;
        Ok(())
    }

    /// Grow the draw-command buffer so it holds at least `required` commands.
    ///
    /// Grows by `growth` (at least to `required`) and rebuilds the producer
    /// bind group. Returns false and keeps the old buffer if the new size is
    /// beyond the device limit.
    pub fn ensure_draw_command_capacity(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        required: u32,
        growth: f32,
    ) -> bool {
        if required <= self.draw_command_capacity {
            return true;
        }

        let grown = (self.draw_command_capacity as f64 * growth.max(1.0) as f64).ceil() as u32;
        let new_capacity = grown.max(required);
        let size = match checked_size(device, "draw command", new_capacity as u64 * DRAW_COMMAND_SIZE) {
            Ok(size) => size,
            Err(e) => {
                log::warn!(
                    "Segment {} ({}): keeping {} draw commands, growth failed: {}",
                    self.index,
                    self.geometry_type.name(),
                    self.draw_command_capacity,
                    e
                );
                return false;
            }
        };

        self.draw_commands = Self::create_command_buffer(device, self.geometry_type, self.index, size);
        self.bind_group = Self::create_bind_group(device, layout, &self.draw_commands, &self.draw_count);
        log::debug!(
            "Segment {} ({}): draw commands {} -> {}",
            self.index,
            self.geometry_type.name(),
            self.draw_command_capacity,
            new_capacity
        );
        self.draw_command_capacity = new_capacity;
        true
    }

    /// Write commands and their count. The caller ensures capacity first.
    pub fn write_draw_commands(&mut self, queue: &wgpu::Queue, commands: &[DrawIndexedIndirect]) {
        let count = (commands.len() as u32).min(self.draw_command_capacity);
        if count > 0 {
            queue.write_buffer(
                &self.draw_commands,
                0,
                bytemuck::cast_slice(&commands[..count as usize]),
            );
        }
        queue.write_buffer(&self.draw_count, 0, bytemuck::bytes_of(&count));
        self.host_draw_count = count;
        self.host_commands.clear();
        self.host_commands.extend_from_slice(&commands[..count as usize]);
    }

    /// Bind vertex/index buffers and issue this segment's draws
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, mode: DrawMode) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);

        match mode {
            DrawMode::DeviceCount => pass.multi_draw_indexed_indirect_count(
                &self.draw_commands,
                0,
                &self.draw_count,
                0,
                self.draw_command_capacity,
            ),
            DrawMode::HostCount => {
                if self.host_draw_count > 0 {
                    pass.multi_draw_indexed_indirect(&self.draw_commands, 0, self.host_draw_count);
                }
            }
            DrawMode::Direct => {
                for cmd in &self.host_commands {
                    pass.draw_indexed(
                        cmd.first_index..cmd.first_index + cmd.index_count,
                        cmd.base_vertex,
                        cmd.first_instance..cmd.first_instance + cmd.instance_count,
                    );
                }
            }
        }
    }

    /// Bytes of device memory held by this segment
    pub fn memory_bytes(&self) -> u64 {
        self.vertex_buffer.size()
            + self.index_buffer.size()
            + self.draw_commands.size()
            + self.draw_count.size()
    }
}

//! GPU context management using wgpu

use std::sync::Arc;

use crate::core::error::Error;

/// Headless GPU context: instance, adapter, device and queue.
///
/// Window and surface handling belongs to the embedding application; the
/// geometry store only needs a device and a queue.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Create a context without a surface, using the adapter's buffer limits.
    ///
    /// `MULTI_DRAW_INDIRECT_COUNT` is requested only when the adapter has it;
    /// without it indirect draws fall back to CPU-known counts.
    pub async fn new_headless() -> Result<Self, Error> {
        Self::with_limits(|adapter_limits| wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..Default::default()
        })
        .await
    }

    async fn with_limits(
        limits: impl FnOnce(&wgpu::Limits) -> wgpu::Limits,
    ) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let adapter_limits = adapter.limits();
        let optional = wgpu::Features::MULTI_DRAW_INDIRECT_COUNT | wgpu::Features::INDIRECT_FIRST_INSTANCE;

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("strata_device"),
            required_features: adapter.features() & optional,
            required_limits: limits(&adapter_limits),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let info = adapter.get_info();
        log::info!(
            "GPU: {} ({:?}), max_buffer_size={}MB, indirect count: {}",
            info.name,
            info.backend,
            device.limits().max_buffer_size / 1024 / 1024,
            device.features().contains(optional)
        );

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Device with the adapter's own limits for unit tests; `None` when no
    /// adapter exists
    #[cfg(test)]
    pub fn headless_for_tests() -> Option<Self> {
        match pollster::block_on(Self::with_limits(|adapter_limits| adapter_limits.clone())) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                log::warn!("Skipping GPU test: {}", e);
                None
            }
        }
    }

    /// Whether the device can read draw counts from a buffer
    pub fn supports_indirect_count(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT)
    }
}

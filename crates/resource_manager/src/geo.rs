use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, error, trace};

use crate::{BufferHandle, ResourceManager, ResourceManagerError, Result};

/// Vertex and index buffers living in device memory, freed on drop.
pub struct Geometry {
    resource_manager: Arc<ResourceManager>,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Geometry {
    /// Uploads pre-interleaved vertex bytes and `u32` index bytes.
    pub fn from_bytes(
        resource_manager: Arc<ResourceManager>,
        vertex_bytes: &[u8],
        vertex_count: u32,
        index_bytes: &[u8],
        index_count: u32,
    ) -> Result<Self> {
        trace!(
            "Creating Geometry: {} vertices ({} bytes), {} indices ({} bytes)",
            vertex_count,
            vertex_bytes.len(),
            index_count,
            index_bytes.len()
        );

        if vertex_bytes.is_empty() || index_bytes.is_empty() {
            return Err(ResourceManagerError::EmptyData);
        }

        let vertex_buffer = resource_manager.create_buffer_init(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
            vertex_bytes,
        )?;

        let index_buffer = match resource_manager.create_buffer_init(
            vk::BufferUsageFlags::INDEX_BUFFER,
            MemoryLocation::GpuOnly,
            index_bytes,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = resource_manager.destroy_buffer(vertex_buffer) {
                    error!("Failed to free vertex buffer after index upload failed: {}", cleanup);
                }
                return Err(e);
            }
        };

        debug!(
            "Geometry created successfully: VB={:?}, IB={:?}, Indices={}",
            vertex_buffer, index_buffer, index_count
        );

        Ok(Self {
            resource_manager,
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
        })
    }

    /// Binds the vertex buffer at binding 0 and the `u32` index buffer.
    pub fn bind(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<()> {
        let vb_info = self.resource_manager.get_buffer_info(self.vertex_buffer)?;
        let ib_info = self.resource_manager.get_buffer_info(self.index_buffer)?;

        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[vb_info.buffer], &[0]);
            device.cmd_bind_index_buffer(command_buffer, ib_info.buffer, 0, vk::IndexType::UINT32);
        }
        Ok(())
    }

    /// Binds the geometry buffers and issues one indexed draw.
    pub fn draw(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.bind(device, command_buffer)?;
        trace!("Drawing geometry: {} indices", self.index_count);
        unsafe {
            device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }
}

impl Drop for Geometry {
    fn drop(&mut self) {
        debug!(
            "Dropping Geometry: VB={:?}, IB={:?}",
            self.vertex_buffer, self.index_buffer
        );
        for buffer in [self.vertex_buffer, self.index_buffer] {
            if let Err(e) = self.resource_manager.destroy_buffer(buffer) {
                tracing::error!(
                    "Failed to destroy buffer {:?} during Geometry drop: {}",
                    buffer,
                    e
                );
            }
        }
    }
}

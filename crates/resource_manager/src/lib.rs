mod error;
mod geo;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use ash::vk;
use gfx_hal::{device::Device, instance::Instance, Fence};
use tracing::{debug, error, trace, warn};

pub use error::{ResourceManagerError, Result};
pub use geo::Geometry;

use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
    MemoryLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewHandle(u64);

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub handle: BufferHandle,
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub mapped_ptr: Option<*mut u8>,
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub handle: ImageHandle,
    pub image: vk::Image,
    pub default_view_handle: ImageViewHandle,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Debug, Clone)]
pub struct ImageViewInfo {
    pub handle: ImageViewHandle,
    pub view: vk::ImageView,
}

struct InternalBufferInfo {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>, // taken in Drop
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    handle: BufferHandle,
}

impl Drop for InternalBufferInfo {
    fn drop(&mut self) {
        trace!("Dropping InternalBufferInfo for handle: {:?}", self.handle);
        if let Some(allocation) = self.allocation.take() {
            match self.allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!(
                            "Failed to free allocation for buffer handle {:?}, {}",
                            self.handle, e
                        );
                    }
                }
                Err(_) => error!("Allocator mutex poisoned, leaking buffer {:?}", self.handle),
            }
        }
        unsafe {
            self.device.raw().destroy_buffer(self.buffer, None);
        }
        trace!("Destroyed vk::Buffer for handle {:?}", self.handle);
    }
}

struct InternalImageInfo {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    image: vk::Image,
    default_view_handle: ImageViewHandle,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent3D,
    usage: vk::ImageUsageFlags,
    handle: ImageHandle,
}

impl Drop for InternalImageInfo {
    fn drop(&mut self) {
        trace!("Dropping InternalImageInfo for handle {:?}", self.handle);
        if let Some(allocation) = self.allocation.take() {
            match self.allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!(
                            "Failed to free allocation for image handle {:?}: {}",
                            self.handle, e
                        );
                    }
                }
                Err(_) => error!("Allocator mutex poisoned, leaking image {:?}", self.handle),
            }
        }
        unsafe {
            self.device.raw().destroy_image(self.image, None);
        }
        trace!("Destroyed vk::Image for handle {:?}", self.handle);
    }
}

struct InternalImageViewInfo {
    device: Arc<Device>,
    view: vk::ImageView,
    handle: ImageViewHandle,
}

impl Drop for InternalImageViewInfo {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image_view(self.view, None);
        }
        trace!("Destroyed vk::ImageView for handle {:?}", self.handle);
    }
}

/// One-shot command submission state for uploads.
struct TransferSetup {
    command_pool: vk::CommandPool,
    fence: Fence,
}

/// Owns every buffer, image and image view the renderer allocates and hands
/// out copyable handles to them. Memory comes from `gpu-allocator`.
pub struct ResourceManager {
    allocator: Arc<Mutex<Allocator>>,
    buffers: Mutex<HashMap<u64, InternalBufferInfo>>,
    images: Mutex<HashMap<u64, InternalImageInfo>>,
    image_views: Mutex<HashMap<u64, InternalImageViewInfo>>,
    next_id: AtomicU64,
    transfer_setup: Mutex<TransferSetup>,
    device: Arc<Device>,
    _instance: Arc<Instance>,
}

impl ResourceManager {
    pub fn new(instance: Arc<Instance>, device: Arc<Device>) -> Result<Self> {
        debug!("Initializing ResourceManager...");
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.ash_instance().clone(),
            device: device.raw().clone(),
            physical_device: device.physical_device_handle(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        debug!("GPU Allocator created.");

        // Uploads go through the graphics queue, which always supports transfers.
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(device.graphics_queue_family_index());
        let command_pool = unsafe { device.raw().create_command_pool(&pool_info, None)? };

        let fence = match Fence::new(Arc::clone(&device), false) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.raw().destroy_command_pool(command_pool, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            image_views: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            transfer_setup: Mutex::new(TransferSetup {
                command_pool,
                fence,
            }),
            device,
            _instance: instance,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Records commands with `record_fn` into a temporary command buffer,
    /// submits it and blocks until the GPU is done.
    unsafe fn submit_commands_and_wait<F>(
        &self,
        transfer_setup: &TransferSetup,
        record_fn: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device_raw = self.device.raw();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(transfer_setup.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = device_raw
            .allocate_command_buffers(&alloc_info)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResourceManagerError::TransferFailed("no command buffer allocated".to_string())
            })?;

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device_raw.begin_command_buffer(command_buffer, &begin_info)?;
            record_fn(command_buffer);
            device_raw.end_command_buffer(command_buffer)?;
            trace!("Transfer commands recorded.");

            let submits =
                [vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&command_buffer))];
            self.device
                .graphics_queue()
                .submit(&self.device, &submits, Some(&transfer_setup.fence))?;
            transfer_setup.fence.wait_and_reset(None)?;
            Ok(())
        })();

        device_raw.free_command_buffers(transfer_setup.command_pool, &[command_buffer]);
        trace!("Temporary command buffer freed.");
        result
    }

    /// Creates a Vulkan buffer and allocates/binds memory for it.
    ///
    /// Buffers in `CpuToGpu` memory stay persistently mapped.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<BufferHandle> {
        trace!(
            "Creating buffer: size={}, usage={:?}, location={:?}",
            size,
            usage,
            location
        );
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.raw().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.raw().get_buffer_memory_requirements(buffer) };

        let allocation = self
            .allocator
            .lock()
            .map_err(ResourceManagerError::from)
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: &format!("buffer_usage_{:?}_loc_{:?}", usage, location),
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(ResourceManagerError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.raw().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let handle = BufferHandle(self.next_id());
        // From here on the Drop impl cleans up on error.
        let internal_info = InternalBufferInfo {
            device: Arc::clone(&self.device),
            allocator: Arc::clone(&self.allocator),
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            handle,
        };

        if let Some(allocation) = internal_info.allocation.as_ref() {
            unsafe {
                self.device
                    .raw()
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
            }
        }

        self.buffers.lock()?.insert(handle.0, internal_info);
        debug!("Buffer created successfully: handle={:?}", handle);
        Ok(handle)
    }

    /// Creates a buffer in `location` holding `data`, uploading through a staging
    /// buffer when the destination is not host visible.
    pub fn create_buffer_init(
        &self,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        data: &[u8],
    ) -> Result<BufferHandle> {
        let size = data.len() as vk::DeviceSize;
        if size == 0 {
            return Err(ResourceManagerError::EmptyData);
        }
        debug!(
            "Creating buffer with init data: size={}, usage={:?}, location={:?}",
            size, usage, location
        );

        if location != MemoryLocation::GpuOnly {
            let handle = self.create_buffer(size, usage, location)?;
            self.write_buffer(handle, 0, data)?;
            return Ok(handle);
        }

        let staging_handle =
            self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)?;
        let result = self.write_buffer(staging_handle, 0, data).and_then(|()| {
            let dest_handle =
                self.create_buffer(size, usage | vk::BufferUsageFlags::TRANSFER_DST, location)?;
            match self.copy_buffer(staging_handle, dest_handle, size) {
                Ok(()) => Ok(dest_handle),
                Err(e) => {
                    if let Err(cleanup) = self.destroy_buffer(dest_handle) {
                        error!("Failed to free buffer after copy failed: {}", cleanup);
                    }
                    Err(e)
                }
            }
        });

        self.destroy_buffer(staging_handle)?;
        trace!("Staging buffer destroyed: handle={:?}", staging_handle);
        result
    }

    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: vk::DeviceSize) -> Result<()> {
        let src_buffer = self.get_buffer_info(src)?.buffer;
        let dst_buffer = self.get_buffer_info(dst)?.buffer;
        let transfer_setup = self.transfer_setup.lock()?;

        trace!("Submitting buffer copy command...");
        unsafe {
            self.submit_commands_and_wait(&transfer_setup, |cmd| {
                let region = vk::BufferCopy::default().size(size);
                self.device
                    .raw()
                    .cmd_copy_buffer(cmd, src_buffer, dst_buffer, &[region]);
            })
        }
    }

    /// Copies `data` into a mapped buffer at `offset`.
    pub fn write_buffer(&self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let info = self.get_buffer_info(handle)?;
        let mapping = info.mapped_ptr.ok_or(ResourceManagerError::NotMapped)?;

        let end = offset.checked_add(data.len());
        if end.map_or(true, |end| end as vk::DeviceSize > info.size) {
            return Err(ResourceManagerError::OutOfBounds {
                offset,
                len: data.len(),
                size: info.size,
            });
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapping.add(offset), data.len());
        }
        trace!("Wrote {} bytes to buffer {:?}", data.len(), handle);
        Ok(())
    }

    /// Creates a Vulkan image, binds memory for it and creates a default view.
    /// The image starts in `UNDEFINED` layout.
    pub fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        aspect_flags: vk::ImageAspectFlags,
    ) -> Result<ImageHandle> {
        trace!(
            "Creating image: format={:?}, extent={:?}, usage={:?}, location={:?}",
            create_info.format,
            create_info.extent,
            create_info.usage,
            location
        );

        let image = unsafe { self.device.raw().create_image(create_info, None)? };
        let requirements = unsafe { self.device.raw().get_image_memory_requirements(image) };
        let allocation = self
            .allocator
            .lock()
            .map_err(ResourceManagerError::from)
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: &format!(
                            "image_fmt_{:?}_usage_{:?}",
                            create_info.format, create_info.usage
                        ),
                        requirements,
                        location,
                        linear: create_info.tiling == vk::ImageTiling::LINEAR,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(ResourceManagerError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.raw().destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .raw()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let default_view = bound.map_err(ResourceManagerError::from).and_then(|()| {
            let view_info = default_view_info(create_info, aspect_flags).image(image);
            self.register_image_view(&view_info)
        });

        let handle = ImageHandle(self.next_id());
        let mut internal_info = InternalImageInfo {
            device: Arc::clone(&self.device),
            allocator: Arc::clone(&self.allocator),
            image,
            default_view_handle: ImageViewHandle(0),
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
            usage: create_info.usage,
            handle,
        };
        // dropping `internal_info` on error frees the image and its memory
        internal_info.default_view_handle = default_view?;

        self.images.lock()?.insert(handle.0, internal_info);
        debug!("Image created successfully: handle={:?}", handle);
        Ok(handle)
    }

    fn register_image_view(&self, view_info: &vk::ImageViewCreateInfo) -> Result<ImageViewHandle> {
        let view = unsafe { self.device.raw().create_image_view(view_info, None)? };

        let handle = ImageViewHandle(self.next_id());
        let internal = InternalImageViewInfo {
            device: Arc::clone(&self.device),
            view,
            handle,
        };
        self.image_views.lock()?.insert(handle.0, internal);
        trace!("Image view registered: handle={:?}", handle);
        Ok(handle)
    }

    /// Destroys a buffer and frees its memory.
    pub fn destroy_buffer(&self, handle: BufferHandle) -> Result<()> {
        let removed = self.buffers.lock()?.remove(&handle.0);
        match removed {
            Some(_) => {
                debug!("Buffer handle {:?} destroyed.", handle);
                Ok(())
            }
            None => {
                warn!("Attempted to destroy non-existent buffer handle {:?}", handle);
                Err(ResourceManagerError::HandleNotFound(handle.0))
            }
        }
    }

    /// Destroys an image, its default view and frees its memory.
    pub fn destroy_image(&self, handle: ImageHandle) -> Result<()> {
        let removed = self.images.lock()?.remove(&handle.0);
        match removed {
            Some(info) => {
                // view first, the image must outlive it
                self.image_views.lock()?.remove(&info.default_view_handle.0);
                drop(info);
                debug!("Image handle {:?} destroyed.", handle);
                Ok(())
            }
            None => {
                warn!("Attempted to destroy non-existent image handle {:?}", handle);
                Err(ResourceManagerError::HandleNotFound(handle.0))
            }
        }
    }

    /// Gets non-owning information about a buffer.
    pub fn get_buffer_info(&self, handle: BufferHandle) -> Result<BufferInfo> {
        let buffers_map = self.buffers.lock()?;
        buffers_map
            .get(&handle.0)
            .map(|internal| BufferInfo {
                handle: internal.handle,
                buffer: internal.buffer,
                size: internal.size,
                usage: internal.usage,
                mapped_ptr: internal
                    .allocation
                    .as_ref()
                    .and_then(|a| a.mapped_ptr().map(|p| p.as_ptr() as *mut u8)),
            })
            .ok_or(ResourceManagerError::HandleNotFound(handle.0))
    }

    pub fn get_image_info(&self, handle: ImageHandle) -> Result<ImageInfo> {
        let images_map = self.images.lock()?;
        images_map
            .get(&handle.0)
            .map(|internal| ImageInfo {
                handle: internal.handle,
                image: internal.image,
                default_view_handle: internal.default_view_handle,
                format: internal.format,
                extent: internal.extent,
                usage: internal.usage,
            })
            .ok_or(ResourceManagerError::HandleNotFound(handle.0))
    }

    pub fn get_image_view_info(&self, handle: ImageViewHandle) -> Result<ImageViewInfo> {
        let views_map = self.image_views.lock()?;
        views_map
            .get(&handle.0)
            .map(|internal| ImageViewInfo {
                handle: internal.handle,
                view: internal.view,
            })
            .ok_or(ResourceManagerError::HandleNotFound(handle.0))
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        debug!("Destroying ResourceManager...");
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during ResourceManager drop: {}", e);
        }

        // Views before images, both before the allocator goes away.
        match self.image_views.lock() {
            Ok(mut views) => views.clear(),
            Err(_) => error!("Image view map mutex poisoned during drop."),
        }
        match self.images.lock() {
            Ok(mut images) => {
                debug!("Clearing {} image entries...", images.len());
                images.clear();
            }
            Err(_) => error!("Image map mutex poisoned during drop."),
        }
        match self.buffers.lock() {
            Ok(mut buffers) => {
                debug!("Clearing {} buffer entries...", buffers.len());
                buffers.clear();
            }
            Err(_) => error!("Buffer map mutex poisoned during drop."),
        }

        match self.transfer_setup.lock() {
            Ok(setup) => unsafe {
                self.device
                    .raw()
                    .destroy_command_pool(setup.command_pool, None);
            },
            Err(_) => error!("TransferSetup mutex poisoned during drop."),
        }

        debug!("ResourceManager destroyed.");
    }
}

/// Builds a 2D view covering every mip level and layer of an image.
/// The caller still has to set the image handle.
pub fn default_view_info<'a>(
    image_create_info: &vk::ImageCreateInfo,
    aspect_flags: vk::ImageAspectFlags,
) -> vk::ImageViewCreateInfo<'a> {
    vk::ImageViewCreateInfo::default()
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(image_create_info.format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_flags)
                .base_mip_level(0)
                .level_count(image_create_info.mip_levels)
                .base_array_layer(0)
                .layer_count(image_create_info.array_layers),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_image() -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::D32_SFLOAT)
            .extent(vk::Extent3D {
                width: 800,
                height: 600,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
    }

    #[test]
    fn default_view_covers_the_whole_image() {
        let info = default_view_info(&depth_image(), vk::ImageAspectFlags::DEPTH);

        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.format, vk::Format::D32_SFLOAT);
        assert_eq!(info.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(info.subresource_range.level_count, 1);
        assert_eq!(info.subresource_range.layer_count, 1);
    }

    #[test]
    fn default_view_spans_every_mip_level() {
        let mipped = depth_image()
            .format(vk::Format::R8G8B8A8_UNORM)
            .mip_levels(4);
        let info = default_view_info(&mipped, vk::ImageAspectFlags::COLOR);

        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.subresource_range.base_mip_level, 0);
        assert_eq!(info.subresource_range.level_count, 4);
    }
}

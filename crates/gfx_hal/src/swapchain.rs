use std::sync::Arc;

use ash::khr::swapchain::Device as SwapchainLoader;
use ash::vk;

use crate::device::Device;
use crate::error::{GfxHalError, Result};
use crate::queue::Queue;
use crate::surface::Surface;
use crate::sync::{Fence, Semaphore};

/// Configuration for creating or recreating a `Swapchain`.
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    /// Desired number of images (clamped by the surface capabilities).
    pub desired_image_count: u32,
    /// Preferred surface format, e.g. `B8G8R8A8_SRGB` / `SRGB_NONLINEAR`.
    pub desired_format: vk::SurfaceFormatKHR,
    /// Preferred presentation mode. FIFO is used when it is unavailable.
    pub desired_present_mode: vk::PresentModeKHR,
    pub image_usage: vk::ImageUsageFlags,
    /// Window size in pixels, used when the surface leaves the extent to us.
    pub extent: vk::Extent2D,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainConfig {
    /// Triple-buffered sRGB colour attachments with FIFO (vsync) presentation.
    pub fn for_window(width: u32, height: u32) -> Self {
        Self {
            desired_image_count: 3,
            desired_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            desired_present_mode: vk::PresentModeKHR::FIFO,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            extent: vk::Extent2D { width, height },
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        }
    }
}

/// Represents the Vulkan swapchain, managing presentation images.
///
/// Owns the `vk::SwapchainKHR`, its loader and one image view per image.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a new `Swapchain`, optionally replacing `old_swapchain`.
    ///
    /// # Safety
    /// - `device` and `surface` must be valid and compatible.
    /// - `old_swapchain` must have been created for the same `surface`, must no
    ///   longer be in use and is to be dropped by the caller afterwards.
    pub unsafe fn new(
        device: Arc<Device>,
        surface: &Surface,
        config: &SwapchainConfig,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = surface.query_support(device.physical_device_handle())?;
        if !support.is_adequate() {
            return Err(GfxHalError::NoSuitableGpu(
                "Swapchain creation failed: No formats or present modes available.".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats, config.desired_format);
        let present_mode = choose_present_mode(&support.present_modes, config.desired_present_mode);
        let extent = choose_extent(&support.capabilities, config.extent);
        let image_count = choose_image_count(&support.capabilities, config.desired_image_count);

        tracing::info!(
            "Creating swapchain: Format={:?}, ColorSpace={:?}, PresentMode={:?}, Extent={:?}, ImageCount={}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent,
            image_count
        );

        let queue_family_indices = [
            device.graphics_queue_family_index(),
            device.present_queue_family_index(),
        ];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(config.image_usage)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if queue_family_indices[0] != queue_family_indices[1] {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        if let Some(old) = old_swapchain {
            create_info = create_info.old_swapchain(old.handle());
            tracing::debug!("Passing old swapchain handle for recreation.");
        }

        let swapchain_loader = SwapchainLoader::new(device.instance().ash_instance(), device.raw());
        let swapchain = swapchain_loader.create_swapchain(&create_info, None)?;

        let images = match swapchain_loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };
        tracing::debug!("Retrieved {} swapchain images.", images.len());

        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views: Vec::new(),
            format: surface_format,
            extent,
        };
        // on failure `this` drops and takes the swapchain with it
        this.image_views = this.create_image_views()?;
        tracing::info!("Swapchain created successfully.");

        Ok(this)
    }

    /// Acquires the next presentable image, signalling `signal_semaphore` when it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    /// An out-of-date swapchain is reported as [`GfxHalError::SurfaceLost`].
    ///
    /// # Safety
    /// `signal_semaphore` and `signal_fence` must not have pending signal operations.
    pub unsafe fn acquire_next_image(
        &self,
        timeout_ns: u64,
        signal_semaphore: Option<&Semaphore>,
        signal_fence: Option<&Fence>,
    ) -> Result<(u32, bool)> {
        let semaphore_handle = signal_semaphore.map_or(vk::Semaphore::null(), |s| s.handle());
        let fence_handle = signal_fence.map_or(vk::Fence::null(), |f| f.handle());

        match self.swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore_handle,
            fence_handle,
        ) {
            Ok((image_index, suboptimal)) => Ok((image_index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GfxHalError::SurfaceLost),
            Err(e) => Err(GfxHalError::VulkanError(e)),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphores` are signalled.
    ///
    /// Returns `true` when the swapchain is suboptimal and should be recreated.
    ///
    /// # Safety
    /// `image_index` must have been acquired from this swapchain and rendered to.
    pub unsafe fn present(
        &self,
        queue: &Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match queue.with_lock(|q| self.swapchain_loader.queue_present(q, &present_info))? {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GfxHalError::SurfaceLost),
            Err(e) => Err(GfxHalError::VulkanError(e)),
        }
    }

    /// Gets the raw `vk::SwapchainKHR` handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images the driver actually created.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    unsafe fn create_image_views(&self) -> Result<Vec<vk::ImageView>> {
        let mut views = Vec::with_capacity(self.images.len());
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            match self.device.raw().create_image_view(&create_info, None) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        self.device.raw().destroy_image_view(view, None);
                    }
                    return Err(e.into());
                }
            }
        }
        tracing::debug!("Created {} swapchain image views.", views.len());
        Ok(views)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        tracing::debug!("Destroying swapchain...");
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.raw().destroy_image_view(view, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        tracing::debug!("Swapchain destroyed.")
    }
}

/// Picks `desired` if offered, otherwise the first available format.
///
/// `available` must not be empty.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    desired: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if let Some(format) = available
        .iter()
        .find(|f| f.format == desired.format && f.color_space == desired.color_space)
    {
        return *format;
    }

    let fallback = available[0];
    tracing::warn!(
        "Desired swapchain format {:?}/{:?} not available. Falling back to {:?}/{:?}.",
        desired.format,
        desired.color_space,
        fallback.format,
        fallback.color_space
    );
    fallback
}

/// Picks `desired` if offered. FIFO is always available, so it is the fallback.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&desired) {
        desired
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent, or clamps `desired` when the surface
/// lets the swapchain decide (`current_extent.width == u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Clamps `desired` to the surface limits. A `max_image_count` of 0 means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let mut count = desired.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb() -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn unorm() -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_format_prefers_desired() {
        assert_eq!(choose_surface_format(&[unorm(), srgb()], srgb()), srgb());
        assert_eq!(choose_surface_format(&[unorm()], srgb()), unorm());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn extent_is_clamped_when_free() {
        let extent = choose_extent(
            &capabilities(2, 3),
            vk::Extent2D {
                width: 8000,
                height: 0,
            },
        );
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn image_count_respects_limits() {
        assert_eq!(choose_image_count(&capabilities(2, 8), 3), 3);
        assert_eq!(choose_image_count(&capabilities(4, 8), 3), 4);
        assert_eq!(choose_image_count(&capabilities(1, 2), 3), 2);
        assert_eq!(choose_image_count(&capabilities(2, 0), 5), 5);
    }
}

use crate::{
    error::{GfxHalError, Result},
    instance::Instance,
};

use ash::{khr::surface::Instance as SurfaceLoader, vk};
use std::sync::Arc;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Everything a physical device reports about presenting to a surface.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// A swapchain needs at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Represents a Vulkan presentation surface, tied to a window.
///
/// Owns the `vk::SurfaceKHR` handle and the `ash` Surface loader extension.
pub struct Surface {
    instance: Arc<Instance>,
    surface_loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Creates a new Vulkan `Surface`. Usually reached through `Instance::create_surface`.
    ///
    /// # Safety
    /// `window` must provide valid window and display handles for the lifetime
    /// of the `Surface`.
    pub unsafe fn new(
        instance: Arc<Instance>,
        window: &(impl HasWindowHandle + HasDisplayHandle),
    ) -> Result<Arc<Self>> {
        let surface_loader = SurfaceLoader::new(instance.entry(), instance.ash_instance());
        let surface = ash_window::create_surface(
            instance.entry(),
            instance.ash_instance(),
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
            None,
        )
        .map_err(GfxHalError::SurfaceCreationError)?;

        tracing::info!("Vulkan surface created successfully.");

        Ok(Arc::new(Self {
            instance,
            surface_loader,
            surface,
        }))
    }

    /// Gets the raw `vk::SurfaceKHR` handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Gets a reference to the `ash` Surface loader extension.
    pub fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    /// Gets a reference to the `Instance` this surface belongs to.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Queries surface capabilities for a given physical device.
    ///
    /// # Safety
    /// The `physical_device` handle must be valid and compatible with this surface.
    pub unsafe fn get_physical_device_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        self.surface_loader
            .get_physical_device_surface_capabilities(physical_device, self.surface)
            .map_err(GfxHalError::VulkanError)
    }

    /// Queries supported surface formats for a given physical device.
    ///
    /// # Safety
    /// The `physical_device` handle must be valid and compatible with this surface.
    pub unsafe fn get_physical_device_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>> {
        self.surface_loader
            .get_physical_device_surface_formats(physical_device, self.surface)
            .map_err(GfxHalError::VulkanError)
    }

    /// Queries supported present modes for a given physical device.
    ///
    /// # Safety
    /// The `physical_device` handle must be valid and compatible with this surface.
    pub unsafe fn get_physical_device_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        self.surface_loader
            .get_physical_device_surface_present_modes(physical_device, self.surface)
            .map_err(GfxHalError::VulkanError)
    }

    /// Queries capabilities, formats and present modes in one go.
    ///
    /// # Safety
    /// The `physical_device` handle must be valid and compatible with this surface.
    pub unsafe fn query_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self.get_physical_device_surface_capabilities(physical_device)?,
            formats: self.get_physical_device_surface_formats(physical_device)?,
            present_modes: self.get_physical_device_surface_present_modes(physical_device)?,
        })
    }

    /// Queries surface support for a given queue family index on a physical device.
    ///
    /// # Safety
    /// The `physical_device` handle must be valid and compatible with this surface.
    pub unsafe fn get_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool> {
        self.surface_loader
            .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
            .map_err(GfxHalError::VulkanError)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        tracing::debug!("Destroying Vulkan surface...");
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        tracing::debug!("Vulkan surface destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_needs_formats_and_present_modes() {
        let mut support = SurfaceSupport::default();
        assert!(!support.is_adequate());

        support.formats.push(vk::SurfaceFormatKHR::default());
        assert!(!support.is_adequate());

        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }
}

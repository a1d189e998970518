use std::{ffi::CStr, sync::Arc};

use ash::vk;

use crate::error::{GfxHalError, Result};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDevice, QueueFamilyIndices};
use crate::queue::Queue;

/// Represents the logical Vulkan device, created from a `PhysicalDevice`.
///
/// Owns the `ash::Device` and the graphics and present queues.
pub struct Device {
    instance: Arc<Instance>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: Arc<Queue>,
    present_queue: Arc<Queue>,
}

impl Device {
    /// Creates a new logical device with dynamic rendering enabled.
    /// Typically called via `PhysicalDevice::create_logical_device`.
    ///
    /// # Safety
    /// - `queue_family_indices` must come from `physical_device_handle`.
    /// - `required_extensions` and `enabled_features` must be supported by it.
    pub(crate) unsafe fn new(
        instance: Arc<Instance>,
        physical_device_handle: vk::PhysicalDevice,
        queue_family_indices: &QueueFamilyIndices,
        required_extensions: &[&CStr],
        enabled_features: &vk::PhysicalDeviceFeatures,
    ) -> Result<Arc<Self>> {
        let graphics_family = queue_family_indices.graphics_family.ok_or_else(|| {
            GfxHalError::MissingQueueFamily("Graphics Queue Family Missing".to_string())
        })?;
        let present_family = queue_family_indices.present_family.ok_or_else(|| {
            GfxHalError::MissingQueueFamily("Present Queue Family Missing".to_string())
        })?;

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = queue_family_indices
            .unique_families()
            .into_iter()
            .map(|family_index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family_index)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extension_names_raw: Vec<*const std::ffi::c_char> =
            required_extensions.iter().map(|s| s.as_ptr()).collect();

        let mut vulkan13_features =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(*enabled_features)
            .push_next(&mut vulkan13_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names_raw)
            .push_next(&mut features2);

        tracing::info!(
            "Creating logical device with extensions: {:?}",
            required_extensions
        );
        let device = instance.ash_instance().create_device(
            physical_device_handle,
            &device_create_info,
            None,
        )?;
        tracing::info!("Logical device created successfully.");

        let graphics_queue = Arc::new(Queue::new(
            device.get_device_queue(graphics_family, 0),
            graphics_family,
        ));
        let present_queue = if present_family == graphics_family {
            Arc::clone(&graphics_queue)
        } else {
            Arc::new(Queue::new(
                device.get_device_queue(present_family, 0),
                present_family,
            ))
        };

        Ok(Arc::new(Self {
            instance,
            physical_device: physical_device_handle,
            device,
            graphics_queue,
            present_queue,
        }))
    }

    /// Provides raw access to the underlying `ash::Device`.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Gets the handle of the physical device this logical device was created from.
    pub fn physical_device_handle(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue_family_index(&self) -> u32 {
        self.graphics_queue.family_index()
    }

    pub fn present_queue_family_index(&self) -> u32 {
        self.present_queue.family_index()
    }

    pub fn graphics_queue(&self) -> &Arc<Queue> {
        &self.graphics_queue
    }

    /// May be the same queue as [`Device::graphics_queue`].
    pub fn present_queue(&self) -> &Arc<Queue> {
        &self.present_queue
    }

    /// Waits until the logical device becomes idle.
    /// Blocks on all queues, so keep it for teardown and swapchain recreation.
    pub fn wait_idle(&self) -> Result<()> {
        tracing::debug!("Waiting for device idle...");
        unsafe { self.device.device_wait_idle()? };
        tracing::debug!("Device idle.");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Destroying logical device...");
        if let Err(e) = self.wait_idle() {
            tracing::error!("Error waiting for device idle during drop: {}", e);
        }
        unsafe {
            self.device.destroy_device(None);
        }
        tracing::debug!("Logical device destroyed.");
    }
}

impl PhysicalDevice {
    /// Creates the logical device (`Device`) from this physical device.
    ///
    /// # Safety
    /// See `Device::new`.
    pub unsafe fn create_logical_device(
        &self,
        required_extensions: &[&CStr],
        queue_family_indices: &QueueFamilyIndices,
        enabled_features: &vk::PhysicalDeviceFeatures,
    ) -> Result<Arc<Device>> {
        Device::new(
            Arc::clone(self.instance()),
            self.handle(),
            queue_family_indices,
            required_extensions,
            enabled_features,
        )
    }
}

use std::{collections::HashSet, ffi::CStr, sync::Arc};

use ash::vk;

use crate::{
    error::{GfxHalError, Result},
    instance::Instance,
    surface::Surface,
};

/// Represents a physical Vulkan device (GPU).
///
/// Holds the raw handle and a reference back to the `Instance` it came from.
/// Physical devices are owned by the instance, so there is nothing to destroy.
#[derive(Clone)]
pub struct PhysicalDevice {
    instance: Arc<Instance>,
    handle: vk::PhysicalDevice,
}

/// Queue families the renderer needs from a `PhysicalDevice`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Queue family index supporting graphics operations.
    pub graphics_family: Option<u32>,
    /// Queue family index able to present to the surface.
    /// Often the same as the graphics family.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Picks queue families from `families`, preferring one family that does both
    /// graphics and presentation.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(index);

            if graphics && present {
                return Self {
                    graphics_family: Some(index),
                    present_family: Some(index),
                };
            }
            if graphics && indices.graphics_family.is_none() {
                indices.graphics_family = Some(index);
            }
            if present && indices.present_family.is_none() {
                indices.present_family = Some(index);
            }
        }

        indices
    }

    /// Checks if all essential queue families (graphics, present if required) were found.
    pub fn is_complete(&self, requires_present: bool) -> bool {
        self.graphics_family.is_some() && (!requires_present || self.present_family.is_some())
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics_family, self.present_family].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Represents the suitability of a physical device.
#[derive(Debug)]
pub enum Suitability {
    /// The device meets every requirement.
    Suitable {
        /// Preference score (higher is better).
        score: u32,
        indices: QueueFamilyIndices,
        properties: Box<vk::PhysicalDeviceProperties>,
        features: Box<vk::PhysicalDeviceFeatures>,
    },
    /// The device is not suitable.
    NotSuitable { reason: String },
}

/// Ranks device types: discrete GPUs over integrated over everything else.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

impl PhysicalDevice {
    pub(crate) fn new(instance: Arc<Instance>, handle: vk::PhysicalDevice) -> Self {
        Self { instance, handle }
    }

    /// Gets the raw `vk::PhysicalDevice` handle.
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    /// Gets a reference to the `Instance` this device belongs to.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Human readable device name from the driver.
    pub fn name(&self) -> String {
        let properties = self.get_properties();
        properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".to_string())
    }

    pub fn get_properties(&self) -> vk::PhysicalDeviceProperties {
        unsafe {
            self.instance
                .ash_instance()
                .get_physical_device_properties(self.handle)
        }
    }

    /// Queries the core features and whether dynamic rendering is available.
    pub fn get_features(&self) -> (vk::PhysicalDeviceFeatures, bool) {
        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 =
            vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan13_features);

        unsafe {
            self.instance
                .ash_instance()
                .get_physical_device_features2(self.handle, &mut features2);
        }
        let features = features2.features;

        (features, vulkan13_features.dynamic_rendering == vk::TRUE)
    }

    pub fn get_queue_family_properties(&self) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .ash_instance()
                .get_physical_device_queue_family_properties(self.handle)
        }
    }

    /// Queries the device specific extensions supported by this physical device.
    pub fn get_supported_extensions(&self) -> Result<Vec<vk::ExtensionProperties>> {
        unsafe {
            self.instance
                .ash_instance()
                .enumerate_device_extension_properties(self.handle)
                .map_err(GfxHalError::VulkanError)
        }
    }

    /// Finds the graphics and present queue families for `surface`.
    ///
    /// # Safety
    /// `surface` must belong to the same instance as this device.
    pub unsafe fn find_queue_families(&self, surface: &Surface) -> Result<QueueFamilyIndices> {
        let families = self.get_queue_family_properties();
        let mut query_error = None;

        let indices = QueueFamilyIndices::select(&families, |index| {
            match surface.get_physical_device_surface_support(self.handle, index) {
                Ok(supported) => supported,
                Err(e) => {
                    query_error.get_or_insert(e);
                    false
                }
            }
        });

        match query_error {
            Some(e) if !indices.is_complete(true) => Err(e),
            _ => Ok(indices),
        }
    }

    /// Checks the device against the renderer's requirements and scores it.
    ///
    /// Requires Vulkan 1.3, dynamic rendering, every extension in
    /// `required_extensions`, graphics and present queues and at least one
    /// surface format and present mode.
    ///
    /// # Safety
    /// `surface` must belong to the same instance as this device.
    pub unsafe fn check_suitability(
        &self,
        required_extensions: &[&CStr],
        surface: &Surface,
    ) -> Result<Suitability> {
        let properties = self.get_properties();
        let name = self.name();

        if properties.api_version < vk::API_VERSION_1_3 {
            return Ok(Suitability::NotSuitable {
                reason: format!(
                    "{} only supports Vulkan {}.{}",
                    name,
                    vk::api_version_major(properties.api_version),
                    vk::api_version_minor(properties.api_version)
                ),
            });
        }

        let (features, dynamic_rendering) = self.get_features();
        if !dynamic_rendering {
            return Ok(Suitability::NotSuitable {
                reason: format!("{} does not support dynamic rendering", name),
            });
        }

        let supported = self.get_supported_extensions()?;
        let supported: HashSet<&CStr> = supported
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        if let Some(missing) = required_extensions
            .iter()
            .find(|ext| !supported.contains(*ext))
        {
            return Ok(Suitability::NotSuitable {
                reason: format!("{} is missing extension {:?}", name, missing),
            });
        }

        let indices = self.find_queue_families(surface)?;
        if !indices.is_complete(true) {
            return Ok(Suitability::NotSuitable {
                reason: format!("{} lacks graphics or present queue families", name),
            });
        }

        if !surface.query_support(self.handle)?.is_adequate() {
            return Ok(Suitability::NotSuitable {
                reason: format!("{} reports no surface formats or present modes", name),
            });
        }

        let score = device_type_score(properties.device_type)
            + properties.limits.max_image_dimension2_d / 1024;

        Ok(Suitability::Suitable {
            score,
            indices,
            properties: Box::new(properties),
            features: Box::new(features),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::select(&families, |index| index != 0);

        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
        assert_eq!(indices.unique_families(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::select(&families, |index| index == 1);

        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete(true));
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::select(&families, |_| false);

        assert!(indices.is_complete(false));
        assert!(!indices.is_complete(true));
    }

    #[test]
    fn skips_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = QueueFamilyIndices::select(&[empty], |_| true);

        assert_eq!(indices, QueueFamilyIndices::default());
    }

    #[test]
    fn discrete_gpus_rank_first() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }
}

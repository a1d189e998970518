use std::{sync::Arc, time::Duration};

use ash::vk;

use crate::{
    device::Device,
    error::{GfxHalError, Result},
};

/// Wraps a `vk::Fence`, used for CPU-GPU synchronization.
///
/// Owns the `vk::Fence` handle.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new `Fence`.
    ///
    /// # Arguments
    /// * `device` - The logical device.
    /// * `signaled` - If true, the fence is created in the signaled state.
    pub fn new(device: Arc<Device>, signaled: bool) -> Result<Self> {
        let create_flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(create_flags);
        let fence = unsafe { device.raw().create_fence(&create_info, None)? };
        tracing::trace!("Created Fence (signaled: {})", signaled);
        Ok(Self { device, fence })
    }

    /// Returns the device used by the fence.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Waits for the fence to become signaled. `None` waits indefinitely.
    ///
    /// A timeout surfaces as `VulkanError(vk::Result::TIMEOUT)`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout_ns = timeout.map_or(u64::MAX, timeout_to_nanos);
        tracing::trace!("Waiting for Fence with timeout: {:?}", timeout);
        let fences = [self.fence];
        match unsafe { self.device.raw().wait_for_fences(&fences, true, timeout_ns) } {
            Ok(_) => {
                tracing::trace!("Fence signaled.");
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                tracing::trace!("Fence wait timed out.");
                Err(GfxHalError::VulkanError(vk::Result::TIMEOUT))
            }
            Err(e) => Err(GfxHalError::VulkanError(e)),
        }
    }

    /// Resets the fence to the unsignaled state.
    /// Must only be called when the fence is not in use by pending GPU work.
    pub fn reset(&self) -> Result<()> {
        tracing::trace!("Resetting Fence.");
        let fences = [self.fence];
        unsafe { self.device.raw().reset_fences(&fences)? };
        Ok(())
    }

    /// Waits for the fence, then resets it for reuse by the next submission.
    pub fn wait_and_reset(&self, timeout: Option<Duration>) -> Result<()> {
        self.wait(timeout)?;
        self.reset()
    }

    /// Gets the raw `vk::Fence` handle.
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::trace!("Destroying fence...");
        unsafe {
            self.device.raw().destroy_fence(self.fence, None);
        }
        tracing::trace!("Fence destroyed.")
    }
}

/// Converts a wait timeout to Vulkan nanoseconds, saturating at "forever".
fn timeout_to_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Wraps a `vk::Semaphore`, used for GPU-GPU synchronization (within or across queues).
///
/// Owns the `vk::Semaphore` handle.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new `Semaphore`.
    pub fn new(device: Arc<Device>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.raw().create_semaphore(&create_info, None)? };
        tracing::trace!("Created Semaphore.");
        Ok(Self { device, semaphore })
    }

    /// Gets the raw `vk::Semaphore` handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::trace!("Destroying Semaphore...");
        unsafe {
            self.device.raw().destroy_semaphore(self.semaphore, None);
        }
        tracing::trace!("Semaphore destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_saturate() {
        assert_eq!(timeout_to_nanos(Duration::from_millis(2)), 2_000_000);
        assert_eq!(timeout_to_nanos(Duration::MAX), u64::MAX);
    }
}

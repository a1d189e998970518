use std::sync::Mutex;

use ash::vk;

use crate::device::Device;
use crate::error::Result;
use crate::sync::Fence;

/// A device queue handle and its family index.
///
/// The `vk::Queue` is owned by the `Device`, so there is no `Drop` impl. The
/// queue does not hold the device either; callers pass it in, which keeps
/// `Device` free of reference cycles.
pub struct Queue {
    queue: vk::Queue,
    family_index: u32,
    // vkQueueSubmit and vkQueuePresentKHR need external synchronization per queue.
    submit_lock: Mutex<()>,
}

impl Queue {
    pub(crate) fn new(queue: vk::Queue, family_index: u32) -> Self {
        Self {
            queue,
            family_index,
            submit_lock: Mutex::new(()),
        }
    }

    /// Gets the raw `vk::Queue` handle.
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    /// Gets the queue family index this queue belongs to.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submits command buffers, optionally signalling `signal_fence` on completion.
    ///
    /// # Safety
    /// - `device` must be the device this queue was retrieved from.
    /// - Command buffers and semaphores in `submits` must belong to `device`.
    /// - `signal_fence`, if provided, must be unsignaled.
    pub unsafe fn submit(
        &self,
        device: &Device,
        submits: &[vk::SubmitInfo],
        signal_fence: Option<&Fence>,
    ) -> Result<()> {
        if let Some(fence) = signal_fence {
            debug_assert!(
                fence.device().raw().handle() == device.raw().handle(),
                "Fence passed to Queue::submit belongs to a different logical device"
            );
        }
        let fence_handle = signal_fence.map_or(vk::Fence::null(), |f| f.handle());

        let _lock = self.submit_lock.lock()?;
        tracing::trace!(
            "Submitting {} batch(es) to queue family {}",
            submits.len(),
            self.family_index
        );
        device.raw().queue_submit(self.queue, submits, fence_handle)?;
        Ok(())
    }

    /// Runs `f` while holding this queue's submission lock. Used for presentation.
    pub(crate) fn with_lock<T>(&self, f: impl FnOnce(vk::Queue) -> T) -> Result<T> {
        let _lock = self.submit_lock.lock()?;
        Ok(f(self.queue))
    }
}

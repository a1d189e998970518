use ash::vk;
use thiserror::Error;

/// Top-level error type for the gfx_hal crate.
#[derive(Error, Debug)]
pub enum GfxHalError {
    /// Error originating directly from a Vulkan API call.
    #[error("Vulkan API Error: {0}")]
    VulkanError(#[from] vk::Result),

    /// No physical device (GPU) meets the requirements of the renderer.
    #[error("No suitable physical device found: {0}")]
    NoSuitableGpu(String),

    /// A required Vulkan instance or device extension is not supported.
    #[error("Missing required Vulkan extension: {0:?}")]
    MissingExtension(String),

    /// Failed to find a required queue family (graphics, present).
    #[error("Could not find required queue family: {0}")]
    MissingQueueFamily(String),

    /// Error related to window system integration surface creation.
    #[error("Failed to create Vulkan surface: {0}")]
    SurfaceCreationError(vk::Result),

    /// The swapchain no longer matches the surface (window resized or minimised).
    #[error("Vulkan surface is out of date and the swapchain must be recreated")]
    SurfaceLost,

    /// Error converting a C-style string.
    #[error("Invalid C string: {0}")]
    InvalidCString(#[from] std::ffi::NulError),

    /// Error reading raw window or display handles.
    #[error("Winit Error: {0}")]
    WinitHandleError(#[from] winit::raw_window_handle::HandleError),

    /// Ash loader error.
    #[error("Error loading the ash entry: {0}")]
    AshEntryError(#[from] ash::LoadingError),

    /// Poisoned Mutex
    #[error("Error from poisoned mutex: {0}")]
    MutexPoisoned(String),
}

pub type Result<T, E = GfxHalError> = std::result::Result<T, E>;

impl<T> From<std::sync::PoisonError<T>> for GfxHalError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::MutexPoisoned(e.to_string())
    }
}

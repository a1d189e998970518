use thiserror::Error;

/// Any errors that can be returned from this crate.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Error from ResourceManager: {0}")]
    ResourceManagerError(#[from] resource_manager::ResourceManagerError),

    #[error("Rotation axis {0:?} has no direction")]
    InvalidSpinAxis([f32; 3]),
}

pub type Result<T> = std::result::Result<T, SceneError>;

use thiserror::Error;

/// Errors returned while building procedural meshes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// A generation parameter is outside the range that yields a closed mesh.
    #[error("Invalid mesh parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

pub type Result<T, E = MeshError> = std::result::Result<T, E>;

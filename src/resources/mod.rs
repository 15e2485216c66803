//! Resource management
//!
//! GPU buffers and textures live in a [`ResourcePool`] and are addressed by
//! small integer handles. Texture decoding for material slots lives here too.

mod pool;
mod texture;

pub use pool::{BufferHandle, ResourcePool, TextureHandle};
pub use texture::{TextureData, TextureError};

use crate::backend::BackendError;
use thiserror::Error;

/// Resource creation and upload failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Resource '{0}' has a zero size")]
    ZeroSized(String),
    #[error("Unknown {0} handle")]
    UnknownHandle(&'static str),
    #[error("Buffer '{0}' is not in a CPU-visible heap and can't be mapped")]
    NotMappable(String),
    #[error("Upload of {size} bytes doesn't fit into '{label}' ({capacity} bytes)")]
    UploadTooLarge {
        label: String,
        size: u64,
        capacity: u64,
    },
    #[error("Invalid subresource layout for '{label}': {reason}")]
    InvalidLayout { label: String, reason: String },
}

//! Renderer-level error type

use crate::backend::BackendError;
use crate::descriptor::DescriptorError;
use crate::passes::FrameState;
use crate::pipeline::CompileError;
use crate::resources::AllocError;
use crate::shader::ShaderError;
use thiserror::Error;

/// Errors surfaced by the renderer and its frame orchestration.
///
/// Everything that reaches this type stops the current operation. Per-object
/// failures (one pipeline, one texture slot) are logged and recorded on the
/// object instead of being returned here.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("frame recorded out of order: expected {expected:?}, found {found:?}")]
    FrameOutOfOrder {
        expected: FrameState,
        found: FrameState,
    },
    #[error("scene has not been prepared for rendering")]
    SceneNotPrepared,
}

pub type RendererResult<T> = Result<T, RendererError>;

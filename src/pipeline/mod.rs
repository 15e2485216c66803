//! Pipeline configuration, fingerprinting and caching
//!
//! Configurations flow one way: [`GraphicsPipelineBuilder`] produces an
//! immutable [`GraphicsPipelineDesc`], its [`PipelineFingerprint`] keys the
//! [`PipelineCache`], and the cache hands back a [`PipelineId`] that draws
//! resolve to native handles at record time.

pub mod builder;
pub mod cache;
pub mod fingerprint;
pub mod signature;

pub use builder::{
    ComputePipelineDesc, GraphicsPipelineBuilder, GraphicsPipelineDesc, MAX_RENDER_TARGETS,
};
pub use cache::{CacheStats, PipelineCache, PipelineEntry, PipelineId};
pub use fingerprint::PipelineFingerprint;
pub use signature::{
    BindingSignatureDesc, DescriptorRange, DescriptorRangeType, ResourceDimension, RootParameter,
    StaticSampler,
};

use crate::backend::{BackendError, ShaderStage};
use thiserror::Error;

/// Why a pipeline could not be produced for a configuration or a primitive
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Can't compile pipeline '{pipeline}': {source}")]
    Native {
        pipeline: String,
        #[source]
        source: BackendError,
    },
    #[error("Pipeline '{pipeline}' has no {stage:?} shader bytecode")]
    MissingBytecode { pipeline: String, stage: ShaderStage },
    #[error("Invalid configuration for pipeline '{pipeline}': {reason}")]
    InvalidConfiguration { pipeline: String, reason: String },
    #[error("Primitive '{primitive}' has no material")]
    MaterialMissing { primitive: String },
    #[error("Primitive '{primitive}' references material {material}, but its model has {count}")]
    MaterialOutOfRange {
        primitive: String,
        material: usize,
        count: usize,
    },
}

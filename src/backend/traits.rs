//! Core backend abstraction traits
//!
//! These traits define the interface a native graphics API must implement to
//! drive the renderer. Nothing above this layer talks to a native API directly.

use crate::backend::types::*;
use crate::descriptor::DescriptorHandle;
use crate::pipeline::{BindingSignatureDesc, ComputePipelineDesc, GraphicsPipelineDesc};
use std::ops::Range;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("No suitable adapter: {0}")]
    NoSuitableAdapter(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create descriptor heap: {0}")]
    DescriptorHeapCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to map buffer: {0}")]
    MapFailed(String),
    #[error("Failed to create binding signature: {0}")]
    SignatureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to record commands: {0}")]
    RecordingFailed(String),
    #[error("Failed to submit work: {0}")]
    SubmitFailed(String),
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a native GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBuffer(pub(crate) u64);

/// Handle to a native GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeTexture(pub(crate) u64);

/// Handle to a compiled native pipeline object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePipeline(pub(crate) u64);

/// Handle to a native binding signature (root signature / pipeline layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSignature(pub(crate) u64);

/// Handle to a native descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHeap(pub(crate) u64);

/// Handle to an open command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandList(pub(crate) u64);

/// Top-level acceleration structure built by the geometry collaborator,
/// identified by its GPU virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccelerationStructureHandle(pub u64);

/// Either kind of native resource, as referenced by barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResource {
    Buffer(NativeBuffer),
    Texture(NativeTexture),
}

/// Addresses of a freshly created descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub heap: NativeHeap,
    pub cpu_base: u64,
    /// Present only for shader-visible heaps
    pub gpu_base: Option<u64>,
    pub stride: u32,
}

/// A view written into a descriptor heap slot
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorView {
    ConstantBuffer {
        buffer: NativeBuffer,
        offset: u64,
        size: u64,
    },
    StructuredBuffer {
        buffer: NativeBuffer,
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
    StorageBuffer {
        buffer: NativeBuffer,
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
    Texture {
        texture: NativeTexture,
        format: TextureFormat,
    },
    /// Read-write view of a single mip level, covering every array layer
    StorageTexture {
        texture: NativeTexture,
        format: TextureFormat,
        mip_level: u32,
    },
    RenderTarget {
        texture: NativeTexture,
        format: TextureFormat,
    },
    DepthStencil {
        texture: NativeTexture,
        format: TextureFormat,
    },
    AccelerationStructure(AccelerationStructureHandle),
    Sampler(SamplerDescriptor),
}

/// Resource barrier recorded into a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    Transition {
        resource: NativeResource,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders unordered-access writes against later accesses
    UnorderedAccess { resource: NativeResource },
}

impl ResourceBarrier {
    pub fn transition(resource: NativeResource, before: ResourceState, after: ResourceState) -> Self {
        ResourceBarrier::Transition {
            resource,
            before,
            after,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Color attachment for a rendering scope
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub texture: NativeTexture,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f32; 4],
}

/// Depth attachment for a rendering scope
#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachment {
    pub texture: NativeTexture,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_depth: f32,
}

/// Render targets bound for a sequence of draws
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// Pipeline family a binding signature is bound for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Main graphics backend trait.
///
/// Command recording calls take the [`CommandList`] they record into. A
/// command list is opened with [`GraphicsBackend::begin_command_list`] and
/// closed by [`GraphicsBackend::submit`], which returns the fence value the
/// owning queue signals once the work has executed.
pub trait GraphicsBackend {
    /// Human-readable backend name
    fn name(&self) -> &'static str;

    /// Whether ray queries against an acceleration structure are available
    fn supports_raytracing(&self) -> bool;

    // Descriptor heaps

    /// Create a descriptor heap with a fixed number of slots
    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> BackendResult<DescriptorHeapInfo>;

    /// Write a view into one slot of a heap
    fn write_descriptor(
        &mut self,
        heap: NativeHeap,
        index: u32,
        view: &DescriptorView,
    ) -> BackendResult<()>;

    // Resource creation

    /// Create a committed buffer. Contents are undefined until written.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<NativeBuffer>;

    /// Create a committed texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<NativeTexture>;

    /// Map a CPU-visible buffer, copy `data` at `offset`, and unmap it
    fn write_buffer(&mut self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: NativeBuffer);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: NativeTexture);

    // Pipeline creation

    /// Create a binding signature describing what a pipeline can bind
    fn create_binding_signature(
        &mut self,
        desc: &BindingSignatureDesc,
    ) -> BackendResult<NativeSignature>;

    /// Compile a graphics pipeline
    fn compile_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> BackendResult<NativePipeline>;

    /// Compile a compute pipeline
    fn compile_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> BackendResult<NativePipeline>;

    // Command recording

    /// Open a command list on a queue
    fn begin_command_list(&mut self, queue: QueueType, label: &str) -> BackendResult<CommandList>;

    /// Record resource barriers
    fn resource_barrier(&mut self, cmd: CommandList, barriers: &[ResourceBarrier]);

    /// Bind render targets for the following draws
    fn begin_rendering(&mut self, cmd: CommandList, desc: &RenderingDesc);

    /// End the current rendering scope
    fn end_rendering(&mut self, cmd: CommandList);

    /// Set viewport
    fn set_viewport(&mut self, cmd: CommandList, viewport: &Viewport);

    /// Set scissor rect
    fn set_scissor(&mut self, cmd: CommandList, rect: &ScissorRect);

    /// Bind the descriptor heaps that shader-visible tables point into
    fn set_descriptor_heaps(&mut self, cmd: CommandList, heaps: &[NativeHeap]);

    /// Bind a binding signature. Parameter-setting calls that follow refer to it.
    fn set_binding_signature(
        &mut self,
        cmd: CommandList,
        bind_point: BindPoint,
        signature: NativeSignature,
    );

    /// Bind a compiled pipeline
    fn set_pipeline(&mut self, cmd: CommandList, pipeline: NativePipeline);

    /// Set the topology used by following draws
    fn set_primitive_topology(&mut self, cmd: CommandList, topology: PrimitiveTopology);

    /// Bind a constant buffer directly to a signature parameter
    fn set_constant_buffer(
        &mut self,
        cmd: CommandList,
        parameter: u32,
        buffer: NativeBuffer,
        offset: u64,
    );

    /// Write 32-bit constants into a push-constant parameter
    fn set_push_constants(&mut self, cmd: CommandList, parameter: u32, values: &[u32]);

    /// Point a descriptor-table parameter at a run of heap slots
    fn set_descriptor_table(&mut self, cmd: CommandList, parameter: u32, base: DescriptorHandle);

    /// Set vertex buffer
    fn set_vertex_buffer(
        &mut self,
        cmd: CommandList,
        slot: u32,
        buffer: NativeBuffer,
        offset: u64,
        stride: u32,
    );

    /// Set index buffer
    fn set_index_buffer(
        &mut self,
        cmd: CommandList,
        buffer: NativeBuffer,
        offset: u64,
        format: IndexFormat,
    );

    /// Draw primitives
    fn draw(&mut self, cmd: CommandList, vertices: Range<u32>, instances: Range<u32>);

    /// Draw indexed primitives
    fn draw_indexed(
        &mut self,
        cmd: CommandList,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    );

    /// Dispatch compute work
    fn dispatch(&mut self, cmd: CommandList, x: u32, y: u32, z: u32);

    /// Copy tightly described subresources from a buffer into a texture.
    /// The texture must be in the `CopyDest` state.
    fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandList,
        source: NativeBuffer,
        layouts: &[SubresourceLayout],
        destination: NativeTexture,
    );

    // Queues and fences

    /// Queue an open command list was begun on, `None` for unknown lists
    fn command_list_queue(&self, cmd: CommandList) -> Option<QueueType>;

    /// Close and execute a command list, returning the fence value that marks its completion
    fn submit(&mut self, cmd: CommandList) -> BackendResult<FenceValue>;

    /// Signal the next fence value on a queue
    fn signal(&mut self, queue: QueueType) -> BackendResult<FenceValue>;

    /// Last fence value the queue has completed
    fn completed_fence_value(&self, queue: QueueType) -> FenceValue;

    /// Block until the queue reaches `value`
    fn wait_for_fence(&mut self, queue: QueueType, value: FenceValue) -> BackendResult<()>;
}

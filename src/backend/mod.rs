//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait that every native API implements,
//! the types shared between backends, and [`Backend`], which picks an
//! implementation at runtime.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use dummy::{DummyBackend, RecordedCommand, SubmittedCommandList};
pub use traits::*;
pub use types::*;

#[cfg(feature = "vulkan")]
use vulkan::VulkanBackend;

use crate::descriptor::DescriptorHandle;
use crate::pipeline::{BindingSignatureDesc, ComputePipelineDesc, GraphicsPipelineDesc};
use crate::BackendType;
use std::ops::Range;

/// Backend wrapper to abstract over different backends
pub enum Backend {
    Dummy(DummyBackend),
    #[cfg(feature = "vulkan")]
    Vulkan(VulkanBackend),
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::Dummy($backend) => $call,
            #[cfg(feature = "vulkan")]
            Backend::Vulkan($backend) => $call,
        }
    };
}

impl Backend {
    /// Create the requested backend. Failing to find a device is fatal to the caller.
    pub fn new(backend_type: BackendType) -> BackendResult<Self> {
        match backend_type {
            BackendType::Dummy => Ok(Backend::Dummy(DummyBackend::new())),
            #[cfg(feature = "vulkan")]
            BackendType::Vulkan => Ok(Backend::Vulkan(VulkanBackend::new()?)),
            #[cfg(not(feature = "vulkan"))]
            BackendType::Vulkan => Err(BackendError::InitializationFailed(
                "Vulkan backend is not compiled in (enable the \"vulkan\" feature)".to_string(),
            )),
        }
    }

    pub fn as_dummy(&self) -> Option<&DummyBackend> {
        match self {
            Backend::Dummy(b) => Some(b),
            #[cfg(feature = "vulkan")]
            _ => None,
        }
    }

    #[cfg(feature = "vulkan")]
    pub fn as_vulkan(&self) -> Option<&VulkanBackend> {
        match self {
            Backend::Vulkan(b) => Some(b),
            _ => None,
        }
    }
}

impl GraphicsBackend for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self, b => b.name())
    }

    fn supports_raytracing(&self) -> bool {
        dispatch!(self, b => b.supports_raytracing())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> BackendResult<DescriptorHeapInfo> {
        dispatch!(self, b => b.create_descriptor_heap(kind, capacity, shader_visible))
    }

    fn write_descriptor(
        &mut self,
        heap: NativeHeap,
        index: u32,
        view: &DescriptorView,
    ) -> BackendResult<()> {
        dispatch!(self, b => b.write_descriptor(heap, index, view))
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<NativeBuffer> {
        dispatch!(self, b => b.create_buffer(desc))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<NativeTexture> {
        dispatch!(self, b => b.create_texture(desc))
    }

    fn write_buffer(&mut self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> BackendResult<()> {
        dispatch!(self, b => b.write_buffer(buffer, offset, data))
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        dispatch!(self, b => b.destroy_buffer(buffer))
    }

    fn destroy_texture(&mut self, texture: NativeTexture) {
        dispatch!(self, b => b.destroy_texture(texture))
    }

    fn create_binding_signature(
        &mut self,
        desc: &BindingSignatureDesc,
    ) -> BackendResult<NativeSignature> {
        dispatch!(self, b => b.create_binding_signature(desc))
    }

    fn compile_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> BackendResult<NativePipeline> {
        dispatch!(self, b => b.compile_graphics_pipeline(desc))
    }

    fn compile_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> BackendResult<NativePipeline> {
        dispatch!(self, b => b.compile_compute_pipeline(desc))
    }

    fn begin_command_list(&mut self, queue: QueueType, label: &str) -> BackendResult<CommandList> {
        dispatch!(self, b => b.begin_command_list(queue, label))
    }

    fn resource_barrier(&mut self, cmd: CommandList, barriers: &[ResourceBarrier]) {
        dispatch!(self, b => b.resource_barrier(cmd, barriers))
    }

    fn begin_rendering(&mut self, cmd: CommandList, desc: &RenderingDesc) {
        dispatch!(self, b => b.begin_rendering(cmd, desc))
    }

    fn end_rendering(&mut self, cmd: CommandList) {
        dispatch!(self, b => b.end_rendering(cmd))
    }

    fn set_viewport(&mut self, cmd: CommandList, viewport: &Viewport) {
        dispatch!(self, b => b.set_viewport(cmd, viewport))
    }

    fn set_scissor(&mut self, cmd: CommandList, rect: &ScissorRect) {
        dispatch!(self, b => b.set_scissor(cmd, rect))
    }

    fn set_descriptor_heaps(&mut self, cmd: CommandList, heaps: &[NativeHeap]) {
        dispatch!(self, b => b.set_descriptor_heaps(cmd, heaps))
    }

    fn set_binding_signature(
        &mut self,
        cmd: CommandList,
        bind_point: BindPoint,
        signature: NativeSignature,
    ) {
        dispatch!(self, b => b.set_binding_signature(cmd, bind_point, signature))
    }

    fn set_pipeline(&mut self, cmd: CommandList, pipeline: NativePipeline) {
        dispatch!(self, b => b.set_pipeline(cmd, pipeline))
    }

    fn set_primitive_topology(&mut self, cmd: CommandList, topology: PrimitiveTopology) {
        dispatch!(self, b => b.set_primitive_topology(cmd, topology))
    }

    fn set_constant_buffer(
        &mut self,
        cmd: CommandList,
        parameter: u32,
        buffer: NativeBuffer,
        offset: u64,
    ) {
        dispatch!(self, b => b.set_constant_buffer(cmd, parameter, buffer, offset))
    }

    fn set_push_constants(&mut self, cmd: CommandList, parameter: u32, values: &[u32]) {
        dispatch!(self, b => b.set_push_constants(cmd, parameter, values))
    }

    fn set_descriptor_table(&mut self, cmd: CommandList, parameter: u32, base: DescriptorHandle) {
        dispatch!(self, b => b.set_descriptor_table(cmd, parameter, base))
    }

    fn set_vertex_buffer(
        &mut self,
        cmd: CommandList,
        slot: u32,
        buffer: NativeBuffer,
        offset: u64,
        stride: u32,
    ) {
        dispatch!(self, b => b.set_vertex_buffer(cmd, slot, buffer, offset, stride))
    }

    fn set_index_buffer(
        &mut self,
        cmd: CommandList,
        buffer: NativeBuffer,
        offset: u64,
        format: IndexFormat,
    ) {
        dispatch!(self, b => b.set_index_buffer(cmd, buffer, offset, format))
    }

    fn draw(&mut self, cmd: CommandList, vertices: Range<u32>, instances: Range<u32>) {
        dispatch!(self, b => b.draw(cmd, vertices, instances))
    }

    fn draw_indexed(
        &mut self,
        cmd: CommandList,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) {
        dispatch!(self, b => b.draw_indexed(cmd, indices, base_vertex, instances))
    }

    fn dispatch(&mut self, cmd: CommandList, x: u32, y: u32, z: u32) {
        dispatch!(self, b => b.dispatch(cmd, x, y, z))
    }

    fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandList,
        source: NativeBuffer,
        layouts: &[SubresourceLayout],
        destination: NativeTexture,
    ) {
        dispatch!(self, b => b.copy_buffer_to_texture(cmd, source, layouts, destination))
    }

    fn command_list_queue(&self, cmd: CommandList) -> Option<QueueType> {
        dispatch!(self, b => b.command_list_queue(cmd))
    }

    fn submit(&mut self, cmd: CommandList) -> BackendResult<FenceValue> {
        dispatch!(self, b => b.submit(cmd))
    }

    fn signal(&mut self, queue: QueueType) -> BackendResult<FenceValue> {
        dispatch!(self, b => b.signal(queue))
    }

    fn completed_fence_value(&self, queue: QueueType) -> FenceValue {
        dispatch!(self, b => b.completed_fence_value(queue))
    }

    fn wait_for_fence(&mut self, queue: QueueType, value: FenceValue) -> BackendResult<()> {
        dispatch!(self, b => b.wait_for_fence(queue, value))
    }
}

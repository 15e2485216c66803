//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It keeps every object
//! it is asked to create, records every command into per-list logs that can be
//! inspected after submission, and completes fences as soon as they are
//! signalled.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::traits::*;
use super::types::*;
use crate::descriptor::DescriptorHandle;
use crate::pipeline::{BindingSignatureDesc, ComputePipelineDesc, GraphicsPipelineDesc};

const DESCRIPTOR_STRIDE: u32 = 32;
const GPU_ADDRESS_BIT: u64 = 1 << 63;

/// A command as it was recorded
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Barrier(Vec<ResourceBarrier>),
    BeginRendering(RenderingDesc),
    EndRendering,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetDescriptorHeaps(Vec<NativeHeap>),
    SetBindingSignature {
        bind_point: BindPoint,
        signature: NativeSignature,
    },
    SetPipeline(NativePipeline),
    SetPrimitiveTopology(PrimitiveTopology),
    SetConstantBuffer {
        parameter: u32,
        buffer: NativeBuffer,
        offset: u64,
    },
    SetPushConstants {
        parameter: u32,
        values: Vec<u32>,
    },
    SetDescriptorTable {
        parameter: u32,
        base: DescriptorHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: NativeBuffer,
        offset: u64,
        stride: u32,
    },
    SetIndexBuffer {
        buffer: NativeBuffer,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferToTexture {
        source: NativeBuffer,
        layouts: Vec<SubresourceLayout>,
        destination: NativeTexture,
    },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
        )
    }
}

/// A closed command list and the fence value it completes with
#[derive(Debug, Clone)]
pub struct SubmittedCommandList {
    pub queue: QueueType,
    pub label: String,
    pub commands: Vec<RecordedCommand>,
    pub fence: FenceValue,
}

#[derive(Debug)]
struct DummyBuffer {
    descriptor: BufferDescriptor,
    contents: Vec<u8>,
}

#[derive(Debug)]
struct DummyHeap {
    kind: DescriptorHeapKind,
    slots: Vec<Option<DescriptorView>>,
}

#[derive(Debug)]
struct OpenCommandList {
    queue: QueueType,
    label: String,
    commands: Vec<RecordedCommand>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_handle: u64,
    raytracing: bool,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    heaps: HashMap<u64, DummyHeap>,
    signatures: HashMap<u64, BindingSignatureDesc>,
    pipelines: HashMap<u64, String>,
    pipeline_compiles: usize,
    failing_pipelines: HashSet<String>,
    open_lists: HashMap<u64, OpenCommandList>,
    submitted: Vec<SubmittedCommandList>,
    signalled: [u64; 3],
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn queue_index(queue: QueueType) -> usize {
    match queue {
        QueueType::Direct => 0,
        QueueType::Compute => 1,
        QueueType::Copy => 2,
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            raytracing: false,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            heaps: HashMap::new(),
            signatures: HashMap::new(),
            pipelines: HashMap::new(),
            pipeline_compiles: 0,
            failing_pipelines: HashSet::new(),
            open_lists: HashMap::new(),
            submitted: Vec::new(),
            signalled: [0; 3],
        }
    }

    /// Report ray query support, as a raytracing-capable device would
    pub fn with_raytracing(mut self, supported: bool) -> Self {
        self.raytracing = supported;
        self
    }

    /// Make every later compile of a pipeline with this name fail
    pub fn fail_pipeline(&mut self, name: &str) {
        self.failing_pipelines.insert(name.to_string());
    }

    pub fn clear_pipeline_failures(&mut self) {
        self.failing_pipelines.clear();
    }

    /// Native pipeline compilations performed so far, successful ones only
    pub fn pipeline_compile_count(&self) -> usize {
        self.pipeline_compiles
    }

    pub fn submitted(&self) -> &[SubmittedCommandList] {
        &self.submitted
    }

    pub fn take_submitted(&mut self) -> Vec<SubmittedCommandList> {
        std::mem::take(&mut self.submitted)
    }

    /// Draw calls across every submitted command list
    pub fn draw_count(&self) -> usize {
        self.submitted
            .iter()
            .flat_map(|list| &list.commands)
            .filter(|command| command.is_draw())
            .count()
    }

    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<&[u8]> {
        self.buffers
            .get(&buffer.0)
            .map(|buffer| buffer.contents.as_slice())
    }

    pub fn descriptor(&self, heap: NativeHeap, index: u32) -> Option<&DescriptorView> {
        self.heaps
            .get(&heap.0)?
            .slots
            .get(index as usize)?
            .as_ref()
    }

    pub fn pipeline_name(&self, pipeline: NativePipeline) -> Option<&str> {
        self.pipelines.get(&pipeline.0).map(String::as_str)
    }

    pub fn signature_desc(&self, signature: NativeSignature) -> Option<&BindingSignatureDesc> {
        self.signatures.get(&signature.0)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_descriptor(&self, texture: NativeTexture) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&mut self, cmd: CommandList, command: RecordedCommand) {
        match self.open_lists.get_mut(&cmd.0) {
            Some(list) => {
                log::trace!("DummyBackend: [{}] {:?}", list.label, command);
                list.commands.push(command);
            }
            None => log::error!(
                "DummyBackend: {:?} recorded into closed or unknown command list {}",
                command,
                cmd.0
            ),
        }
    }

    fn compile(&mut self, name: &str) -> BackendResult<NativePipeline> {
        if self.failing_pipelines.contains(name) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "injected failure for '{}'",
                name
            )));
        }
        let handle = self.allocate_handle();
        self.pipelines.insert(handle, name.to_string());
        self.pipeline_compiles += 1;
        log::trace!("DummyBackend: compiled pipeline '{}'", name);
        Ok(NativePipeline(handle))
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn supports_raytracing(&self) -> bool {
        self.raytracing
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> BackendResult<DescriptorHeapInfo> {
        if shader_visible && !kind.can_be_shader_visible() {
            return Err(BackendError::DescriptorHeapCreationFailed(format!(
                "{} heaps can't be shader visible",
                kind.name()
            )));
        }

        let handle = self.allocate_handle();
        self.heaps.insert(
            handle,
            DummyHeap {
                kind,
                slots: vec![None; capacity as usize],
            },
        );
        log::trace!(
            "DummyBackend: creating {} descriptor heap ({} slots)",
            kind.name(),
            capacity
        );

        let cpu_base = handle << 32;
        Ok(DescriptorHeapInfo {
            heap: NativeHeap(handle),
            cpu_base,
            gpu_base: shader_visible.then_some(GPU_ADDRESS_BIT | cpu_base),
            stride: DESCRIPTOR_STRIDE,
        })
    }

    fn write_descriptor(
        &mut self,
        heap: NativeHeap,
        index: u32,
        view: &DescriptorView,
    ) -> BackendResult<()> {
        let heap = self
            .heaps
            .get_mut(&heap.0)
            .ok_or(BackendError::InvalidHandle("descriptor heap"))?;
        let kind = heap.kind;
        let slot = heap
            .slots
            .get_mut(index as usize)
            .ok_or(BackendError::InvalidHandle("descriptor slot"))?;

        if let DescriptorView::StorageTexture {
            texture, mip_level, ..
        } = view
        {
            let desc = self
                .textures
                .get(&texture.0)
                .ok_or(BackendError::InvalidHandle("texture"))?;
            if !desc.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) || *mip_level >= desc.mip_levels {
                return Err(BackendError::InvalidHandle("storage texture view"));
            }
        }

        let expected = match view {
            DescriptorView::RenderTarget { .. } => DescriptorHeapKind::Rtv,
            DescriptorView::DepthStencil { .. } => DescriptorHeapKind::Dsv,
            DescriptorView::Sampler(_) => DescriptorHeapKind::Sampler,
            _ => DescriptorHeapKind::CbvSrvUav,
        };
        if expected != kind {
            return Err(BackendError::InvalidHandle("descriptor heap kind"));
        }

        *slot = Some(view.clone());
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<NativeBuffer> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let handle = self.allocate_handle();
        self.buffers.insert(
            handle,
            DummyBuffer {
                descriptor: desc.clone(),
                // Real buffers start with undefined contents
                contents: vec![0xCD; desc.size as usize],
            },
        );
        Ok(NativeBuffer(handle))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<NativeTexture> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        if desc.mip_levels == 0 || desc.mip_levels > full_mip_chain(desc.width, desc.height) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} mip levels for a {}x{} texture",
                desc.mip_levels, desc.width, desc.height
            )));
        }
        if desc.dimension == TextureDimension::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(
                "cube faces must be square".to_string(),
            ));
        }
        let handle = self.allocate_handle();
        self.textures.insert(handle, desc.clone());
        Ok(NativeTexture(handle))
    }

    fn write_buffer(&mut self, buffer: NativeBuffer, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buffer = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;

        if !buffer.descriptor.heap.is_cpu_visible() {
            return Err(BackendError::MapFailed(format!(
                "buffer {:?} is not CPU visible",
                buffer.descriptor.label
            )));
        }

        let start = offset as usize;
        let end = start + data.len();
        let target = buffer.contents.get_mut(start..end).ok_or_else(|| {
            BackendError::MapFailed(format!(
                "write of {} bytes at {} overruns buffer {:?}",
                data.len(),
                offset,
                buffer.descriptor.label
            ))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        log::trace!("DummyBackend: destroying buffer {}", buffer.0);
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: NativeTexture) {
        log::trace!("DummyBackend: destroying texture {}", texture.0);
        self.textures.remove(&texture.0);
    }

    fn create_binding_signature(
        &mut self,
        desc: &BindingSignatureDesc,
    ) -> BackendResult<NativeSignature> {
        log::trace!(
            "DummyBackend: creating binding signature '{}' ({} parameters)",
            desc.name,
            desc.parameters.len()
        );
        let handle = self.allocate_handle();
        self.signatures.insert(handle, desc.clone());
        Ok(NativeSignature(handle))
    }

    fn compile_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> BackendResult<NativePipeline> {
        if !self.signatures.contains_key(&desc.signature.0) {
            return Err(BackendError::InvalidHandle("binding signature"));
        }
        self.compile(&desc.name)
    }

    fn compile_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> BackendResult<NativePipeline> {
        if !self.signatures.contains_key(&desc.signature.0) {
            return Err(BackendError::InvalidHandle("binding signature"));
        }
        self.compile(&desc.name)
    }

    fn begin_command_list(&mut self, queue: QueueType, label: &str) -> BackendResult<CommandList> {
        let handle = self.allocate_handle();
        self.open_lists.insert(
            handle,
            OpenCommandList {
                queue,
                label: label.to_string(),
                commands: Vec::new(),
            },
        );
        Ok(CommandList(handle))
    }

    fn resource_barrier(&mut self, cmd: CommandList, barriers: &[ResourceBarrier]) {
        if !barriers.is_empty() {
            self.record(cmd, RecordedCommand::Barrier(barriers.to_vec()));
        }
    }

    fn begin_rendering(&mut self, cmd: CommandList, desc: &RenderingDesc) {
        self.record(cmd, RecordedCommand::BeginRendering(desc.clone()));
    }

    fn end_rendering(&mut self, cmd: CommandList) {
        self.record(cmd, RecordedCommand::EndRendering);
    }

    fn set_viewport(&mut self, cmd: CommandList, viewport: &Viewport) {
        self.record(cmd, RecordedCommand::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, cmd: CommandList, rect: &ScissorRect) {
        self.record(cmd, RecordedCommand::SetScissor(*rect));
    }

    fn set_descriptor_heaps(&mut self, cmd: CommandList, heaps: &[NativeHeap]) {
        self.record(cmd, RecordedCommand::SetDescriptorHeaps(heaps.to_vec()));
    }

    fn set_binding_signature(
        &mut self,
        cmd: CommandList,
        bind_point: BindPoint,
        signature: NativeSignature,
    ) {
        self.record(
            cmd,
            RecordedCommand::SetBindingSignature {
                bind_point,
                signature,
            },
        );
    }

    fn set_pipeline(&mut self, cmd: CommandList, pipeline: NativePipeline) {
        self.record(cmd, RecordedCommand::SetPipeline(pipeline));
    }

    fn set_primitive_topology(&mut self, cmd: CommandList, topology: PrimitiveTopology) {
        self.record(cmd, RecordedCommand::SetPrimitiveTopology(topology));
    }

    fn set_constant_buffer(
        &mut self,
        cmd: CommandList,
        parameter: u32,
        buffer: NativeBuffer,
        offset: u64,
    ) {
        self.record(
            cmd,
            RecordedCommand::SetConstantBuffer {
                parameter,
                buffer,
                offset,
            },
        );
    }

    fn set_push_constants(&mut self, cmd: CommandList, parameter: u32, values: &[u32]) {
        self.record(
            cmd,
            RecordedCommand::SetPushConstants {
                parameter,
                values: values.to_vec(),
            },
        );
    }

    fn set_descriptor_table(&mut self, cmd: CommandList, parameter: u32, base: DescriptorHandle) {
        self.record(cmd, RecordedCommand::SetDescriptorTable { parameter, base });
    }

    fn set_vertex_buffer(
        &mut self,
        cmd: CommandList,
        slot: u32,
        buffer: NativeBuffer,
        offset: u64,
        stride: u32,
    ) {
        self.record(
            cmd,
            RecordedCommand::SetVertexBuffer {
                slot,
                buffer,
                offset,
                stride,
            },
        );
    }

    fn set_index_buffer(
        &mut self,
        cmd: CommandList,
        buffer: NativeBuffer,
        offset: u64,
        format: IndexFormat,
    ) {
        self.record(
            cmd,
            RecordedCommand::SetIndexBuffer {
                buffer,
                offset,
                format,
            },
        );
    }

    fn draw(&mut self, cmd: CommandList, vertices: Range<u32>, instances: Range<u32>) {
        self.record(
            cmd,
            RecordedCommand::Draw {
                vertices,
                instances,
            },
        );
    }

    fn draw_indexed(
        &mut self,
        cmd: CommandList,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) {
        self.record(
            cmd,
            RecordedCommand::DrawIndexed {
                indices,
                base_vertex,
                instances,
            },
        );
    }

    fn dispatch(&mut self, cmd: CommandList, x: u32, y: u32, z: u32) {
        self.record(cmd, RecordedCommand::Dispatch { x, y, z });
    }

    fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandList,
        source: NativeBuffer,
        layouts: &[SubresourceLayout],
        destination: NativeTexture,
    ) {
        self.record(
            cmd,
            RecordedCommand::CopyBufferToTexture {
                source,
                layouts: layouts.to_vec(),
                destination,
            },
        );
    }

    fn command_list_queue(&self, cmd: CommandList) -> Option<QueueType> {
        self.open_lists.get(&cmd.0).map(|list| list.queue)
    }

    fn submit(&mut self, cmd: CommandList) -> BackendResult<FenceValue> {
        let list = self
            .open_lists
            .remove(&cmd.0)
            .ok_or(BackendError::InvalidHandle("command list"))?;
        let fence = self.signal(list.queue)?;
        log::trace!(
            "DummyBackend: submitted '{}' ({} commands) on {:?}, fence {}",
            list.label,
            list.commands.len(),
            list.queue,
            fence.0
        );
        self.submitted.push(SubmittedCommandList {
            queue: list.queue,
            label: list.label,
            commands: list.commands,
            fence,
        });
        Ok(fence)
    }

    fn signal(&mut self, queue: QueueType) -> BackendResult<FenceValue> {
        let counter = &mut self.signalled[queue_index(queue)];
        *counter += 1;
        Ok(FenceValue(*counter))
    }

    fn completed_fence_value(&self, queue: QueueType) -> FenceValue {
        FenceValue(self.signalled[queue_index(queue)])
    }

    fn wait_for_fence(&mut self, queue: QueueType, value: FenceValue) -> BackendResult<()> {
        if value.0 > self.signalled[queue_index(queue)] {
            return Err(BackendError::SubmitFailed(format!(
                "fence value {} was never signalled on {:?}",
                value.0, queue
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_buffer(backend: &mut DummyBackend, size: u64, heap: HeapKind) -> NativeBuffer {
        backend
            .create_buffer(&BufferDescriptor {
                label: Some("test".to_string()),
                size,
                heap,
                flags: ResourceFlags::NONE,
                initial_state: ResourceState::GenericRead,
            })
            .unwrap()
    }

    #[test]
    fn test_commands_are_recorded_per_list() {
        let mut backend = DummyBackend::new();
        let a = backend.begin_command_list(QueueType::Direct, "a").unwrap();
        let b = backend.begin_command_list(QueueType::Compute, "b").unwrap();

        backend.draw(a, 0..3, 0..1);
        backend.dispatch(b, 1, 1, 1);
        backend.draw(a, 0..6, 0..1);

        let fence_a = backend.submit(a).unwrap();
        let fence_b = backend.submit(b).unwrap();

        let submitted = backend.submitted();
        assert_eq!(submitted[0].commands.len(), 2);
        assert_eq!(submitted[1].commands, vec![RecordedCommand::Dispatch { x: 1, y: 1, z: 1 }]);
        assert_eq!(fence_a, FenceValue(1));
        assert_eq!(fence_b, FenceValue(1));
        assert_eq!(backend.draw_count(), 2);
    }

    #[test]
    fn test_recording_after_submit_is_dropped() {
        let mut backend = DummyBackend::new();
        let cmd = backend.begin_command_list(QueueType::Direct, "once").unwrap();
        backend.submit(cmd).unwrap();
        backend.draw(cmd, 0..3, 0..1);

        assert_eq!(backend.draw_count(), 0);
        assert!(backend.submit(cmd).is_err());
    }

    #[test]
    fn test_write_buffer_requires_cpu_visible_heap() {
        let mut backend = DummyBackend::new();
        let upload = upload_buffer(&mut backend, 8, HeapKind::Upload);
        let local = upload_buffer(&mut backend, 8, HeapKind::Default);

        backend.write_buffer(upload, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.buffer_contents(upload).unwrap()[4..], [1, 2, 3, 4]);

        assert!(backend.write_buffer(local, 0, &[1]).is_err());
        assert!(backend.write_buffer(upload, 6, &[0; 4]).is_err());
    }

    #[test]
    fn test_fences_complete_when_signalled() {
        let mut backend = DummyBackend::new();
        assert_eq!(backend.completed_fence_value(QueueType::Copy), FenceValue(0));
        assert!(backend.wait_for_fence(QueueType::Copy, FenceValue(1)).is_err());

        let value = backend.signal(QueueType::Copy).unwrap();
        assert_eq!(backend.completed_fence_value(QueueType::Copy), value);
        backend.wait_for_fence(QueueType::Copy, value).unwrap();
    }

    #[test]
    fn test_descriptor_kind_must_match_heap() {
        let mut backend = DummyBackend::new();
        let info = backend
            .create_descriptor_heap(DescriptorHeapKind::Rtv, 4, false)
            .unwrap();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();

        let rtv = DescriptorView::RenderTarget {
            texture,
            format: TextureFormat::Rgba8Unorm,
        };
        backend.write_descriptor(info.heap, 0, &rtv).unwrap();
        assert_eq!(backend.descriptor(info.heap, 0), Some(&rtv));

        let srv = DescriptorView::Texture {
            texture,
            format: TextureFormat::Rgba8Unorm,
        };
        assert!(backend.write_descriptor(info.heap, 1, &srv).is_err());
        assert!(backend.write_descriptor(info.heap, 4, &rtv).is_err());
        assert!(backend
            .create_descriptor_heap(DescriptorHeapKind::Dsv, 4, true)
            .is_err());
    }

    #[test]
    fn test_storage_views_need_unordered_access_and_an_existing_mip() {
        let mut backend = DummyBackend::new();
        let info = backend
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 4, true)
            .unwrap();
        let mipped = backend
            .create_texture(&TextureDescriptor {
                width: 8,
                height: 8,
                mip_levels: 4,
                flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
                ..Default::default()
            })
            .unwrap();
        let sampled_only = backend.create_texture(&TextureDescriptor::default()).unwrap();

        let view = |texture, mip_level| DescriptorView::StorageTexture {
            texture,
            format: TextureFormat::Rgba8Unorm,
            mip_level,
        };
        backend.write_descriptor(info.heap, 0, &view(mipped, 3)).unwrap();
        assert!(backend.write_descriptor(info.heap, 1, &view(mipped, 4)).is_err());
        assert!(backend
            .write_descriptor(info.heap, 1, &view(sampled_only, 0))
            .is_err());
    }

    #[test]
    fn test_texture_shape_is_validated() {
        let mut backend = DummyBackend::new();
        let too_many_mips = TextureDescriptor {
            width: 8,
            height: 4,
            mip_levels: 5,
            ..Default::default()
        };
        assert!(backend.create_texture(&too_many_mips).is_err());

        let flat_cube = TextureDescriptor {
            width: 8,
            height: 4,
            dimension: TextureDimension::Cube,
            ..Default::default()
        };
        assert!(backend.create_texture(&flat_cube).is_err());
        assert_eq!(backend.live_textures(), 0);
    }
}

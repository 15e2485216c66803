//! Resource handle pool
//!
//! Every GPU buffer and texture the renderer creates is owned by one
//! [`ResourcePool`] and addressed by a small integer handle. The pool tracks
//! the state each resource was last transitioned to, so barriers can be
//! derived from the requested state alone, and it is the single place where
//! resources are destroyed.

use super::AllocError;
use crate::backend::{
    BufferDescriptor, CommandList, FenceValue, GraphicsBackend, HeapKind, NativeBuffer,
    NativeResource, NativeTexture, ResourceBarrier, ResourceFlags, ResourceState,
    SubresourceLayout, TextureDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u32);

#[derive(Debug)]
struct BufferSlot {
    native: NativeBuffer,
    descriptor: BufferDescriptor,
    state: ResourceState,
}

#[derive(Debug)]
struct TextureSlot {
    native: NativeTexture,
    descriptor: TextureDescriptor,
    state: ResourceState,
}

/// Intermediate buffer of a texture upload, alive until its copy has executed
#[derive(Debug)]
struct StagingBuffer {
    native: NativeBuffer,
    fence: Option<FenceValue>,
}

#[derive(Debug, Default)]
pub struct ResourcePool {
    buffers: Vec<Option<BufferSlot>>,
    textures: Vec<Option<TextureSlot>>,
    staging: Vec<StagingBuffer>,
}

fn label_of(label: &Option<String>) -> String {
    label.clone().unwrap_or_else(|| "unnamed".to_string())
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a committed buffer. Its contents are undefined until uploaded.
    pub fn create_buffer<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        label: &str,
        size: u64,
        heap: HeapKind,
        flags: ResourceFlags,
        initial_state: ResourceState,
    ) -> Result<BufferHandle, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSized(label.to_string()));
        }

        let descriptor = BufferDescriptor {
            label: Some(label.to_string()),
            size,
            heap,
            flags,
            initial_state,
        };
        let native = backend.create_buffer(&descriptor).map_err(|e| {
            log::error!("Can't create buffer '{}' ({} bytes): {}", label, size, e);
            e
        })?;

        self.buffers.push(Some(BufferSlot {
            native,
            descriptor,
            state: initial_state,
        }));
        Ok(BufferHandle((self.buffers.len() - 1) as u32))
    }

    pub fn create_texture<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, AllocError> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.mip_levels == 0 {
            return Err(AllocError::ZeroSized(label_of(&descriptor.label)));
        }

        let native = backend.create_texture(descriptor).map_err(|e| {
            log::error!(
                "Can't create texture '{}' ({}x{}): {}",
                label_of(&descriptor.label),
                descriptor.width,
                descriptor.height,
                e
            );
            e
        })?;

        self.textures.push(Some(TextureSlot {
            native,
            descriptor: descriptor.clone(),
            state: descriptor.initial_state,
        }));
        Ok(TextureHandle((self.textures.len() - 1) as u32))
    }

    /// Write `bytes` at the start of a CPU-visible buffer.
    ///
    /// The buffer is mapped, written and unmapped immediately. If it must end
    /// up in a different state for GPU reads, the transition is recorded into
    /// `cmd`, which orders the write before any later work on that list.
    pub fn upload<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cmd: CommandList,
        handle: BufferHandle,
        bytes: &[u8],
        target_state: ResourceState,
    ) -> Result<(), AllocError> {
        let slot = self
            .buffers
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownHandle("buffer"))?;

        if !slot.descriptor.heap.is_cpu_visible() {
            return Err(AllocError::NotMappable(label_of(&slot.descriptor.label)));
        }
        if bytes.len() as u64 > slot.descriptor.size {
            return Err(AllocError::UploadTooLarge {
                label: label_of(&slot.descriptor.label),
                size: bytes.len() as u64,
                capacity: slot.descriptor.size,
            });
        }

        backend.write_buffer(slot.native, 0, bytes)?;

        if slot.state != target_state {
            backend.resource_barrier(
                cmd,
                &[ResourceBarrier::transition(
                    NativeResource::Buffer(slot.native),
                    slot.state,
                    target_state,
                )],
            );
            slot.state = target_state;
        }
        Ok(())
    }

    /// Copy texel data into a texture through an intermediate upload buffer.
    ///
    /// `layouts` describe where each subresource starts inside `bytes`. The
    /// intermediate buffer is kept until [`ResourcePool::retire_staging`] sees
    /// the fence of the submission that carries `cmd`.
    pub fn upload_texture<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cmd: CommandList,
        handle: TextureHandle,
        bytes: &[u8],
        layouts: &[SubresourceLayout],
        target_state: ResourceState,
    ) -> Result<(), AllocError> {
        let slot = self
            .textures
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownHandle("texture"))?;
        let label = label_of(&slot.descriptor.label);

        if bytes.is_empty() {
            return Err(AllocError::ZeroSized(label));
        }
        if layouts.is_empty() || layouts.len() > slot.descriptor.mip_levels as usize {
            return Err(AllocError::InvalidLayout {
                label,
                reason: format!(
                    "{} subresource layouts for {} mip levels",
                    layouts.len(),
                    slot.descriptor.mip_levels
                ),
            });
        }
        if let Some(layout) = layouts
            .iter()
            .find(|layout| layout.offset + layout.slice_pitch > bytes.len() as u64)
        {
            return Err(AllocError::InvalidLayout {
                label,
                reason: format!(
                    "subresource at {} with {} bytes overruns {} bytes of source data",
                    layout.offset,
                    layout.slice_pitch,
                    bytes.len()
                ),
            });
        }

        let staging = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{} (staging)", label)),
            size: bytes.len() as u64,
            heap: HeapKind::Upload,
            flags: ResourceFlags::NONE,
            initial_state: ResourceState::GenericRead,
        })?;
        if let Err(e) = backend.write_buffer(staging, 0, bytes) {
            backend.destroy_buffer(staging);
            return Err(e.into());
        }

        let texture = NativeResource::Texture(slot.native);
        if slot.state != ResourceState::CopyDest {
            backend.resource_barrier(
                cmd,
                &[ResourceBarrier::transition(
                    texture,
                    slot.state,
                    ResourceState::CopyDest,
                )],
            );
        }
        backend.copy_buffer_to_texture(cmd, staging, layouts, slot.native);
        if target_state != ResourceState::CopyDest {
            backend.resource_barrier(
                cmd,
                &[ResourceBarrier::transition(
                    texture,
                    ResourceState::CopyDest,
                    target_state,
                )],
            );
        }
        slot.state = target_state;

        self.staging.push(StagingBuffer {
            native: staging,
            fence: None,
        });
        Ok(())
    }

    /// Tag pending staging buffers with the fence of the submission that uses them
    pub fn mark_submitted(&mut self, fence: FenceValue) {
        for staging in self.staging.iter_mut().filter(|s| s.fence.is_none()) {
            staging.fence = Some(fence);
        }
    }

    /// Destroy staging buffers whose copies are known to have executed
    pub fn retire_staging<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        completed: FenceValue,
    ) -> usize {
        let before = self.staging.len();
        self.staging.retain(|staging| match staging.fence {
            Some(fence) if fence <= completed => {
                backend.destroy_buffer(staging.native);
                false
            }
            _ => true,
        });
        before - self.staging.len()
    }

    /// Record the barrier that moves a buffer into `after`, if it isn't there yet
    pub fn transition_buffer(
        &mut self,
        handle: BufferHandle,
        after: ResourceState,
    ) -> Result<Option<ResourceBarrier>, AllocError> {
        let slot = self
            .buffers
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownHandle("buffer"))?;
        if slot.state == after {
            return Ok(None);
        }
        let barrier =
            ResourceBarrier::transition(NativeResource::Buffer(slot.native), slot.state, after);
        slot.state = after;
        Ok(Some(barrier))
    }

    /// Record the barrier that moves a texture into `after`, if it isn't there yet
    pub fn transition_texture(
        &mut self,
        handle: TextureHandle,
        after: ResourceState,
    ) -> Result<Option<ResourceBarrier>, AllocError> {
        let slot = self
            .textures
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownHandle("texture"))?;
        if slot.state == after {
            return Ok(None);
        }
        let barrier =
            ResourceBarrier::transition(NativeResource::Texture(slot.native), slot.state, after);
        slot.state = after;
        Ok(Some(barrier))
    }

    fn buffer_slot(&self, handle: BufferHandle) -> Result<&BufferSlot, AllocError> {
        self.buffers
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AllocError::UnknownHandle("buffer"))
    }

    fn texture_slot(&self, handle: TextureHandle) -> Result<&TextureSlot, AllocError> {
        self.textures
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AllocError::UnknownHandle("texture"))
    }

    pub fn native_buffer(&self, handle: BufferHandle) -> Result<NativeBuffer, AllocError> {
        self.buffer_slot(handle).map(|slot| slot.native)
    }

    pub fn native_texture(&self, handle: TextureHandle) -> Result<NativeTexture, AllocError> {
        self.texture_slot(handle).map(|slot| slot.native)
    }

    pub fn buffer_descriptor(&self, handle: BufferHandle) -> Result<&BufferDescriptor, AllocError> {
        self.buffer_slot(handle).map(|slot| &slot.descriptor)
    }

    pub fn texture_descriptor(
        &self,
        handle: TextureHandle,
    ) -> Result<&TextureDescriptor, AllocError> {
        self.texture_slot(handle).map(|slot| &slot.descriptor)
    }

    pub fn buffer_state(&self, handle: BufferHandle) -> Result<ResourceState, AllocError> {
        self.buffer_slot(handle).map(|slot| slot.state)
    }

    pub fn texture_state(&self, handle: TextureHandle) -> Result<ResourceState, AllocError> {
        self.texture_slot(handle).map(|slot| slot.state)
    }

    /// Destroy a buffer. The GPU must no longer reference it.
    pub fn destroy_buffer<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        handle: BufferHandle,
    ) -> Result<(), AllocError> {
        let slot = self
            .buffers
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(AllocError::UnknownHandle("buffer"))?;
        backend.destroy_buffer(slot.native);
        Ok(())
    }

    /// Destroy a texture. The GPU must no longer reference it.
    pub fn destroy_texture<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        handle: TextureHandle,
    ) -> Result<(), AllocError> {
        let slot = self
            .textures
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(AllocError::UnknownHandle("texture"))?;
        backend.destroy_texture(slot.native);
        Ok(())
    }

    /// Destroy everything the pool owns, textures first, then buffers, then staging.
    ///
    /// Callers flush every queue before calling this.
    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for slot in self.textures.drain(..).flatten() {
            backend.destroy_texture(slot.native);
        }
        for slot in self.buffers.drain(..).flatten() {
            backend.destroy_buffer(slot.native);
        }
        for staging in self.staging.drain(..) {
            backend.destroy_buffer(staging.native);
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }

    pub fn staging_count(&self) -> usize {
        self.staging.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, QueueType, RecordedCommand, TextureFormat};

    fn upload_buffer(pool: &mut ResourcePool, backend: &mut DummyBackend, size: u64) -> BufferHandle {
        pool.create_buffer(
            backend,
            "vertices",
            size,
            HeapKind::Upload,
            ResourceFlags::NONE,
            ResourceState::GenericRead,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_sized_buffer_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let err = pool
            .create_buffer(
                &mut backend,
                "empty",
                0,
                HeapKind::Upload,
                ResourceFlags::NONE,
                ResourceState::GenericRead,
            )
            .unwrap_err();
        assert_eq!(err, AllocError::ZeroSized("empty".to_string()));
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_upload_writes_and_transitions() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let handle = upload_buffer(&mut pool, &mut backend, 4);

        let cmd = backend.begin_command_list(QueueType::Direct, "upload").unwrap();
        pool.upload(
            &mut backend,
            cmd,
            handle,
            &[9, 8, 7, 6],
            ResourceState::VertexAndConstantBuffer,
        )
        .unwrap();
        backend.submit(cmd).unwrap();

        let native = pool.native_buffer(handle).unwrap();
        assert_eq!(backend.buffer_contents(native), Some(&[9u8, 8, 7, 6][..]));
        assert_eq!(
            backend.submitted()[0].commands,
            vec![RecordedCommand::Barrier(vec![ResourceBarrier::transition(
                NativeResource::Buffer(native),
                ResourceState::GenericRead,
                ResourceState::VertexAndConstantBuffer,
            )])]
        );
        assert_eq!(
            pool.buffer_state(handle),
            Ok(ResourceState::VertexAndConstantBuffer)
        );
    }

    #[test]
    fn test_upload_in_target_state_records_no_barrier() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let handle = upload_buffer(&mut pool, &mut backend, 4);

        let cmd = backend.begin_command_list(QueueType::Direct, "upload").unwrap();
        pool.upload(&mut backend, cmd, handle, &[1], ResourceState::GenericRead)
            .unwrap();
        backend.submit(cmd).unwrap();
        assert!(backend.submitted()[0].commands.is_empty());
    }

    #[test]
    fn test_upload_errors() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let small = upload_buffer(&mut pool, &mut backend, 2);
        let local = pool
            .create_buffer(
                &mut backend,
                "local",
                16,
                HeapKind::Default,
                ResourceFlags::NONE,
                ResourceState::Common,
            )
            .unwrap();
        let cmd = backend.begin_command_list(QueueType::Direct, "upload").unwrap();

        assert!(matches!(
            pool.upload(&mut backend, cmd, small, &[0; 3], ResourceState::GenericRead),
            Err(AllocError::UploadTooLarge { size: 3, capacity: 2, .. })
        ));
        assert_eq!(
            pool.upload(&mut backend, cmd, local, &[0; 3], ResourceState::GenericRead),
            Err(AllocError::NotMappable("local".to_string()))
        );
    }

    #[test]
    fn test_texture_upload_goes_through_staging() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let texture = pool
            .create_texture(
                &mut backend,
                &TextureDescriptor {
                    label: Some("albedo".to_string()),
                    width: 2,
                    height: 2,
                    format: TextureFormat::Rgba8Unorm,
                    initial_state: ResourceState::Common,
                    ..Default::default()
                },
            )
            .unwrap();

        let cmd = backend.begin_command_list(QueueType::Direct, "upload").unwrap();
        let layout = SubresourceLayout {
            offset: 0,
            row_pitch: 8,
            slice_pitch: 16,
        };
        pool.upload_texture(
            &mut backend,
            cmd,
            texture,
            &[255; 16],
            &[layout],
            ResourceState::PixelShaderResource,
        )
        .unwrap();
        let fence = backend.submit(cmd).unwrap();

        let commands = &backend.submitted()[0].commands;
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            commands[1],
            RecordedCommand::CopyBufferToTexture { .. }
        ));
        assert_eq!(
            pool.texture_state(texture),
            Ok(ResourceState::PixelShaderResource)
        );

        // Staging survives until its submission is known to be complete
        assert_eq!(pool.retire_staging(&mut backend, fence), 0);
        pool.mark_submitted(fence);
        assert_eq!(pool.retire_staging(&mut backend, FenceValue(0)), 0);
        assert_eq!(pool.retire_staging(&mut backend, fence), 1);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_transition_only_when_state_changes() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let handle = upload_buffer(&mut pool, &mut backend, 4);

        assert_eq!(
            pool.transition_buffer(handle, ResourceState::GenericRead),
            Ok(None)
        );
        assert!(pool
            .transition_buffer(handle, ResourceState::NonPixelShaderResource)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_destroyed_handles_are_unknown() {
        let mut backend = DummyBackend::new();
        let mut pool = ResourcePool::new();
        let handle = upload_buffer(&mut pool, &mut backend, 4);

        pool.destroy_buffer(&mut backend, handle).unwrap();
        assert_eq!(
            pool.native_buffer(handle),
            Err(AllocError::UnknownHandle("buffer"))
        );
        assert_eq!(pool.buffer_count(), 0);
        assert_eq!(backend.live_buffers(), 0);
    }
}

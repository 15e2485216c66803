//! Mip chain generation for material textures
//!
//! Mip 0 is uploaded from the CPU; every further level is a 2x2 box filter of
//! the level above it, one compute dispatch per level. Both levels are bound
//! as storage views, so the whole texture stays in the unordered access state
//! while the chain is built and leaves it readable by every shader stage.

use super::{group_count, resolve_pipeline};
use crate::backend::{
    mip_size, BindPoint, CommandList, DescriptorView, GraphicsBackend, NativeResource,
    NativeSignature, ResourceBarrier, ResourceState, ShaderStage, ShaderVisibility,
    TextureFormat,
};
use crate::descriptor::DescriptorHeap;
use crate::pipeline::{
    BindingSignatureDesc, ComputePipelineDesc, DescriptorRange, PipelineCache, PipelineId,
};
use crate::resources::{ResourcePool, TextureHandle};
use crate::shader::{ShaderCompileParameters, ShaderStorage, MIPS_SHADER};
use crate::RendererResult;

pub mod mip_parameters {
    pub const SOURCE: u32 = 0;
    pub const DESTINATION: u32 = 1;
    pub const CONSTANTS: u32 = 2;
}

use mip_parameters::*;

pub const MIP_GROUP_SIZE: u32 = 8;

pub struct MipGenerator {
    signature: NativeSignature,
    pipeline: PipelineId,
}

impl MipGenerator {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("mips")
            .with_table(&[DescriptorRange::storage_texture(0, 1)], ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::storage_texture(1, 1)], ShaderVisibility::Compute)
            .with_push_constants(0, 4, ShaderVisibility::Compute)
    }

    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create mip binding signature: {}", err))?;
        let pipeline = Self::compile(backend, cache, shaders, signature)?;
        Ok(Self {
            signature,
            pipeline,
        })
    }

    fn compile<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
        signature: NativeSignature,
    ) -> RendererResult<PipelineId> {
        let bytecode = shaders.compile(&ShaderCompileParameters::new(
            MIPS_SHADER,
            ShaderStage::Compute,
            "cs_main",
        ))?;
        let desc = ComputePipelineDesc::new("mips", signature, bytecode)?;
        Ok(cache.get_or_create_compute(backend, &desc)?)
    }

    pub fn reload_shaders<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<()> {
        self.pipeline = Self::compile(backend, cache, shaders, self.signature)?;
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Formats the filter shader can read and write
    pub fn supports(format: TextureFormat) -> bool {
        format.storage_format() == TextureFormat::Rgba8Unorm
    }

    /// Push constant block, laid out as the shader's `MipParameters`
    pub fn constants(width: u32, height: u32, srgb: bool) -> [u32; 4] {
        [width, height, srgb as u32, 0]
    }

    /// Record the dispatches that fill mips 1.. of `texture` from mip 0.
    ///
    /// Returns the number of dispatches; a texture with a single level needs
    /// none and is left untouched.
    pub fn generate<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        cache: &PipelineCache,
        pool: &mut ResourcePool,
        heap: &mut DescriptorHeap,
        cmd: CommandList,
        texture: TextureHandle,
    ) -> RendererResult<u32> {
        let desc = pool.texture_descriptor(texture)?.clone();
        if desc.mip_levels <= 1 {
            return Ok(0);
        }
        let (pipeline, signature) = resolve_pipeline(cache, self.pipeline, "mips")?;
        let native = pool.native_texture(texture)?;

        let mut views = Vec::with_capacity(desc.mip_levels as usize);
        for mip_level in 0..desc.mip_levels {
            let view = heap.allocate()?;
            heap.write(
                backend,
                &view,
                &DescriptorView::StorageTexture {
                    texture: native,
                    format: desc.format.storage_format(),
                    mip_level,
                },
            )?;
            views.push(view);
        }

        if let Some(barrier) = pool.transition_texture(texture, ResourceState::UnorderedAccess)? {
            backend.resource_barrier(cmd, &[barrier]);
        }
        backend.set_binding_signature(cmd, BindPoint::Compute, signature);
        backend.set_pipeline(cmd, pipeline);

        for level in 1..desc.mip_levels {
            let width = mip_size(desc.width, level);
            let height = mip_size(desc.height, level);
            backend.set_descriptor_table(cmd, SOURCE, views[level as usize - 1]);
            backend.set_descriptor_table(cmd, DESTINATION, views[level as usize]);
            backend.set_push_constants(
                cmd,
                CONSTANTS,
                &Self::constants(width, height, desc.format.is_srgb()),
            );
            backend.dispatch(
                cmd,
                group_count(width, MIP_GROUP_SIZE),
                group_count(height, MIP_GROUP_SIZE),
                1,
            );
            // The next level reads what this one wrote
            backend.resource_barrier(
                cmd,
                &[ResourceBarrier::UnorderedAccess {
                    resource: NativeResource::Texture(native),
                }],
            );
        }

        if let Some(barrier) = pool.transition_texture(texture, ResourceState::AllShaderResource)? {
            backend.resource_barrier(cmd, &[barrier]);
        }
        log::debug!(
            "Generated {} mip levels for '{}'",
            desc.mip_levels - 1,
            desc.label.as_deref().unwrap_or("texture")
        );
        Ok(desc.mip_levels - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        DescriptorHeapKind, DummyBackend, QueueType, RecordedCommand, ResourceFlags,
        TextureDescriptor,
    };

    struct Fixture {
        backend: DummyBackend,
        cache: PipelineCache,
        pool: ResourcePool,
        heap: DescriptorHeap,
        mips: MipGenerator,
    }

    fn fixture() -> Fixture {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut shaders = ShaderStorage::embedded();
        let mips = MipGenerator::new(&mut backend, &mut cache, &mut shaders).unwrap();
        let heap =
            DescriptorHeap::create(&mut backend, DescriptorHeapKind::CbvSrvUav, 32, true).unwrap();
        Fixture {
            backend,
            cache,
            pool: ResourcePool::new(),
            heap,
            mips,
        }
    }

    fn texture(f: &mut Fixture, width: u32, height: u32, mip_levels: u32) -> TextureHandle {
        f.pool
            .create_texture(
                &mut f.backend,
                &TextureDescriptor {
                    label: Some("albedo".to_string()),
                    width,
                    height,
                    mip_levels,
                    format: TextureFormat::Rgba8UnormSrgb,
                    flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
                    initial_state: ResourceState::AllShaderResource,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn test_one_dispatch_per_level_sized_to_the_level() {
        let mut f = fixture();
        let handle = texture(&mut f, 20, 8, 5);
        let cmd = f.backend.begin_command_list(QueueType::Direct, "mips").unwrap();

        let dispatches = f
            .mips
            .generate(&mut f.backend, &f.cache, &mut f.pool, &mut f.heap, cmd, handle)
            .unwrap();
        f.backend.submit(cmd).unwrap();

        assert_eq!(dispatches, 4);
        let groups: Vec<_> = f.backend.submitted()[0]
            .commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect();
        // Levels 10x4, 5x2, 2x1, 1x1
        assert_eq!(groups, vec![(2, 1, 1), (1, 1, 1), (1, 1, 1), (1, 1, 1)]);
        assert_eq!(
            f.pool.texture_state(handle).unwrap(),
            ResourceState::AllShaderResource
        );
        // A storage view per level
        assert_eq!(f.heap.allocated(), 5);
    }

    #[test]
    fn test_levels_are_separated_by_uav_barriers() {
        let mut f = fixture();
        let handle = texture(&mut f, 4, 4, 3);
        let native = f.pool.native_texture(handle).unwrap();
        let cmd = f.backend.begin_command_list(QueueType::Direct, "mips").unwrap();
        f.mips
            .generate(&mut f.backend, &f.cache, &mut f.pool, &mut f.heap, cmd, handle)
            .unwrap();
        f.backend.submit(cmd).unwrap();

        let uav_barrier = RecordedCommand::Barrier(vec![ResourceBarrier::UnorderedAccess {
            resource: NativeResource::Texture(native),
        }]);
        let commands = &f.backend.submitted()[0].commands;
        let dispatch_positions: Vec<_> = commands
            .iter()
            .enumerate()
            .filter(|(_, command)| matches!(command, RecordedCommand::Dispatch { .. }))
            .map(|(i, _)| i)
            .collect();
        for position in dispatch_positions {
            assert_eq!(commands[position + 1], uav_barrier);
        }
    }

    #[test]
    fn test_single_level_texture_is_left_alone() {
        let mut f = fixture();
        let handle = texture(&mut f, 16, 16, 1);
        let cmd = f.backend.begin_command_list(QueueType::Direct, "mips").unwrap();

        let dispatches = f
            .mips
            .generate(&mut f.backend, &f.cache, &mut f.pool, &mut f.heap, cmd, handle)
            .unwrap();
        f.backend.submit(cmd).unwrap();

        assert_eq!(dispatches, 0);
        assert!(f.backend.submitted()[0].commands.is_empty());
        assert_eq!(f.heap.allocated(), 0);
    }

    #[test]
    fn test_srgb_flag_and_supported_formats() {
        assert_eq!(MipGenerator::constants(8, 4, true), [8, 4, 1, 0]);
        assert!(MipGenerator::supports(TextureFormat::Rgba8UnormSrgb));
        assert!(MipGenerator::supports(TextureFormat::Rgba8Unorm));
        assert!(!MipGenerator::supports(TextureFormat::Rgba16Float));
    }
}

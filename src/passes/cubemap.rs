//! Equirectangular sky image to cubemap conversion
//!
//! Runs once per prepared scene. The six faces are written by one dispatch
//! through a 2D array storage view; the skybox samples the result through a
//! cube view.

use super::{group_count, resolve_pipeline};
use crate::backend::{
    BindPoint, CommandList, DescriptorView, GraphicsBackend, NativeSignature, NativeTexture,
    ResourceFlags, ResourceState, SamplerDescriptor, ShaderStage, ShaderVisibility,
    TextureDescriptor, TextureDimension, TextureFormat,
};
use crate::descriptor::{DescriptorHandle, DescriptorHeap};
use crate::pipeline::{
    BindingSignatureDesc, ComputePipelineDesc, DescriptorRange, PipelineCache, PipelineId,
};
use crate::resources::{ResourcePool, TextureData, TextureHandle};
use crate::scene::{EnvironmentMap, SceneBuilder};
use crate::shader::{ShaderCompileParameters, ShaderStorage, CUBEMAP_SHADER};
use crate::RendererResult;

pub mod cubemap_parameters {
    pub const EQUIRECT: u32 = 0;
    pub const FACES: u32 = 1;
    pub const CONSTANTS: u32 = 2;
}

use cubemap_parameters::*;

pub const CUBEMAP_GROUP_SIZE: u32 = 8;
pub const CUBEMAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

pub struct CubemapConverter {
    signature: NativeSignature,
    pipeline: PipelineId,
}

impl CubemapConverter {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("cubemap")
            .with_table(&[DescriptorRange::texture(0, 1)], ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::storage_texture(0, 1)], ShaderVisibility::Compute)
            .with_push_constants(0, 1, ShaderVisibility::Compute)
            .with_static_sampler(0, SamplerDescriptor::default(), ShaderVisibility::Compute)
    }

    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create cubemap binding signature: {}", err))?;
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
            CUBEMAP_SHADER,
            ShaderStage::Compute,
            "cs_main",
        ))?;
        let desc = ComputePipelineDesc::new("cubemap", signature, bytecode)?;
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

    /// Upload `sky` and record its conversion into a new cubemap with faces
    /// of `face_size` texels.
    ///
    /// The cubemap is left readable by pixel shaders. On failure neither
    /// texture is kept.
    #[allow(clippy::too_many_arguments)]
    pub fn convert<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        cache: &PipelineCache,
        pool: &mut ResourcePool,
        heap: &mut DescriptorHeap,
        cmd: CommandList,
        sky: &TextureData,
        face_size: u32,
    ) -> RendererResult<EnvironmentMap> {
        let source = SceneBuilder::upload_texture(backend, pool, cmd, sky, &sky.descriptor())?;
        let cubemap = match pool.create_texture(
            backend,
            &TextureDescriptor {
                label: Some(format!("{} (cubemap)", sky.name)),
                width: face_size,
                height: face_size,
                dimension: TextureDimension::Cube,
                format: CUBEMAP_FORMAT,
                flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
                initial_state: ResourceState::UnorderedAccess,
                ..Default::default()
            },
        ) {
            Ok(cubemap) => cubemap,
            Err(err) => {
                discard(backend, pool, &[source]);
                return Err(err.into());
            }
        };

        match self.record(backend, cache, pool, heap, cmd, source, cubemap, face_size) {
            Ok(cubemap_srv) => {
                log::info!(
                    "Converting sky '{}' ({}x{}) to a {}x{} cubemap",
                    sky.name,
                    sky.width,
                    sky.height,
                    face_size,
                    face_size
                );
                Ok(EnvironmentMap {
                    source,
                    cubemap,
                    cubemap_srv,
                    face_size,
                })
            }
            Err(err) => {
                discard(backend, pool, &[source, cubemap]);
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        cache: &PipelineCache,
        pool: &mut ResourcePool,
        heap: &mut DescriptorHeap,
        cmd: CommandList,
        source: TextureHandle,
        cubemap: TextureHandle,
        face_size: u32,
    ) -> RendererResult<DescriptorHandle> {
        let (pipeline, signature) = resolve_pipeline(cache, self.pipeline, "cubemap")?;
        let source_native = pool.native_texture(source)?;
        let cubemap_native = pool.native_texture(cubemap)?;
        let source_format = pool.texture_descriptor(source)?.format;

        let equirect_srv = write(
            backend,
            heap,
            DescriptorView::Texture {
                texture: source_native,
                format: source_format,
            },
        )?;
        let faces_uav = write(
            backend,
            heap,
            DescriptorView::StorageTexture {
                texture: cubemap_native,
                format: CUBEMAP_FORMAT,
                mip_level: 0,
            },
        )?;
        let cubemap_srv = write(backend, heap, sampled(cubemap_native))?;

        if let Some(barrier) = pool.transition_texture(cubemap, ResourceState::UnorderedAccess)? {
            backend.resource_barrier(cmd, &[barrier]);
        }
        backend.set_binding_signature(cmd, BindPoint::Compute, signature);
        backend.set_pipeline(cmd, pipeline);
        backend.set_descriptor_table(cmd, EQUIRECT, equirect_srv);
        backend.set_descriptor_table(cmd, FACES, faces_uav);
        backend.set_push_constants(cmd, CONSTANTS, &[face_size]);
        let groups = group_count(face_size, CUBEMAP_GROUP_SIZE);
        backend.dispatch(cmd, groups, groups, 6);

        if let Some(barrier) =
            pool.transition_texture(cubemap, ResourceState::PixelShaderResource)?
        {
            backend.resource_barrier(cmd, &[barrier]);
        }
        Ok(cubemap_srv)
    }
}

fn sampled(texture: NativeTexture) -> DescriptorView {
    DescriptorView::Texture {
        texture,
        format: CUBEMAP_FORMAT,
    }
}

fn write<B: GraphicsBackend>(
    backend: &mut B,
    heap: &mut DescriptorHeap,
    view: DescriptorView,
) -> RendererResult<DescriptorHandle> {
    let handle = heap.allocate()?;
    heap.write(backend, &handle, &view)?;
    Ok(handle)
}

fn discard<B: GraphicsBackend>(
    backend: &mut B,
    pool: &mut ResourcePool,
    textures: &[TextureHandle],
) {
    for &texture in textures {
        if let Err(err) = pool.destroy_texture(backend, texture) {
            log::error!("Can't destroy sky texture: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DescriptorHeapKind, DummyBackend, QueueType, RecordedCommand};

    fn setup() -> (DummyBackend, PipelineCache, ResourcePool, DescriptorHeap, CubemapConverter) {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut shaders = ShaderStorage::embedded();
        let converter = CubemapConverter::new(&mut backend, &mut cache, &mut shaders).unwrap();
        let heap =
            DescriptorHeap::create(&mut backend, DescriptorHeapKind::CbvSrvUav, 16, true).unwrap();
        (backend, cache, ResourcePool::new(), heap, converter)
    }

    fn sky(width: u32, height: u32) -> TextureData {
        TextureData {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: vec![128; (width * height * 4) as usize],
            name: "sky".to_string(),
        }
    }

    #[test]
    fn test_conversion_covers_six_faces() {
        let (mut backend, cache, mut pool, mut heap, converter) = setup();
        let cmd = backend.begin_command_list(QueueType::Direct, "sky").unwrap();

        let map = converter
            .convert(&mut backend, &cache, &mut pool, &mut heap, cmd, &sky(8, 4), 20)
            .unwrap();
        backend.submit(cmd).unwrap();

        assert!(backend.submitted()[0]
            .commands
            .contains(&RecordedCommand::Dispatch { x: 3, y: 3, z: 6 }));
        let desc = pool.texture_descriptor(map.cubemap).unwrap();
        assert_eq!(desc.dimension, TextureDimension::Cube);
        assert_eq!((desc.width, desc.height), (20, 20));
        assert_eq!(
            pool.texture_state(map.cubemap).unwrap(),
            ResourceState::PixelShaderResource
        );
        assert_eq!(
            backend.descriptor(heap.native(), map.cubemap_srv.index),
            Some(&sampled(pool.native_texture(map.cubemap).unwrap()))
        );
    }

    #[test]
    fn test_unreadable_sky_keeps_no_textures() {
        let (mut backend, cache, mut pool, mut heap, converter) = setup();
        let cmd = backend.begin_command_list(QueueType::Direct, "sky").unwrap();
        let mut broken = sky(8, 4);
        broken.data.truncate(10);

        assert!(converter
            .convert(&mut backend, &cache, &mut pool, &mut heap, cmd, &broken, 16)
            .is_err());
        assert_eq!(pool.texture_count(), 0);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_failed_recording_releases_both_textures() {
        let (mut backend, cache, mut pool, _, converter) = setup();
        // No room for the three views
        let mut heap =
            DescriptorHeap::create(&mut backend, DescriptorHeapKind::CbvSrvUav, 2, true).unwrap();
        let cmd = backend.begin_command_list(QueueType::Direct, "sky").unwrap();

        assert!(converter
            .convert(&mut backend, &cache, &mut pool, &mut heap, cmd, &sky(8, 4), 16)
            .is_err());
        assert_eq!(pool.texture_count(), 0);
    }
}

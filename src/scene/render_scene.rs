//! The render scene and its merged GPU buffers
//!
//! Every primitive's geometry lives in one merged vertex buffer and one merged
//! index buffer. Each primitive records how many vertices and indices precede
//! it, in model, mesh, primitive order; the same order assigns instance ids and
//! global material ids. The merged buffers are written once when the scene is
//! built and only read while rendering.

use super::camera::Camera;
use super::light::{DirectionalLight, EnvironmentLight};
use super::material::SurfaceShaderParameters;
use super::mesh::{Mesh, Primitive, Vertex};
use super::model::Model;
use crate::backend::{
    CommandList, DescriptorView, GraphicsBackend, HeapKind, ResourceFlags, ResourceState,
    TextureDescriptor,
};
use crate::descriptor::{DescriptorHandle, DescriptorHeap};
use crate::passes::MipGenerator;
use crate::resources::{AllocError, BufferHandle, ResourcePool, TextureData, TextureHandle};
use crate::RendererResult;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Per-primitive instance data, laid out as the shaders' `RenderInstance` struct
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderInstanceData {
    pub model_matrix: Mat4,
    /// Global material id, `-1` when the primitive has no valid material
    pub material_id: i32,
    pub vertices_before: i32,
    pub indices_before: i32,
    pub pad: i32,
}

/// Element counts of the merged buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneTotals {
    pub vertices: u32,
    pub indices: u32,
    pub primitives: u32,
    pub materials: u32,
}

/// Sky cubemap converted from the environment's equirectangular image
#[derive(Debug)]
pub struct EnvironmentMap {
    /// Uploaded equirectangular image the cubemap was converted from
    pub source: TextureHandle,
    pub cubemap: TextureHandle,
    /// Sampled cube view for the skybox
    pub cubemap_srv: DescriptorHandle,
    pub face_size: u32,
}

/// GPU side of a built scene
#[derive(Debug)]
pub struct SceneBuffers {
    /// `None` when the scene has no vertices
    pub vertices: Option<BufferHandle>,
    /// `None` when no primitive is indexed
    pub indices: Option<BufferHandle>,
    pub instances: BufferHandle,
    pub materials: BufferHandle,
    pub instance_srv: DescriptorHandle,
    pub material_srv: DescriptorHandle,
    pub textures: Vec<TextureHandle>,
    /// `None` when the environment has no sky image
    pub environment: Option<EnvironmentMap>,
    pub totals: SceneTotals,
}

impl SceneBuffers {
    /// Destroy the buffers and textures. The GPU must be done with them.
    pub fn release<B: GraphicsBackend>(self, backend: &mut B, pool: &mut ResourcePool) {
        let buffers = [self.vertices, self.indices, Some(self.instances), Some(self.materials)];
        for handle in buffers.into_iter().flatten() {
            if let Err(err) = pool.destroy_buffer(backend, handle) {
                log::error!("Can't release scene buffer: {}", err);
            }
        }
        let environment = self
            .environment
            .into_iter()
            .flat_map(|map| [map.source, map.cubemap]);
        for handle in self.textures.into_iter().chain(environment) {
            if let Err(err) = pool.destroy_texture(backend, handle) {
                log::error!("Can't release scene texture: {}", err);
            }
        }
    }
}

/// A primitive together with its position in draw order
pub struct ScenePrimitive<'a> {
    /// Global primitive index, which is also the primitive's instance id
    pub instance_id: u32,
    pub model: &'a Model,
    pub mesh: &'a Mesh,
    pub primitive: &'a Primitive,
}

/// Aggregate root of everything that gets rendered
#[derive(Debug, Default)]
pub struct RenderScene {
    pub camera: Camera,
    pub directional_light: DirectionalLight,
    pub environment_light: EnvironmentLight,
    pub models: Vec<Model>,
    pub(crate) buffers: Option<SceneBuffers>,
}

impl RenderScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    pub fn add_model(&mut self, model: Model) -> usize {
        self.models.push(model);
        self.models.len() - 1
    }

    /// Merged GPU buffers, once the scene has been built
    pub fn buffers(&self) -> Option<&SceneBuffers> {
        self.buffers.as_ref()
    }

    pub fn take_buffers(&mut self) -> Option<SceneBuffers> {
        self.buffers.take()
    }

    /// Every primitive in draw order
    pub fn primitives(&self) -> impl Iterator<Item = ScenePrimitive<'_>> {
        self.models
            .iter()
            .flat_map(|model| model.primitives().map(move |(mesh, primitive)| (model, mesh, primitive)))
            .enumerate()
            .map(|(index, (model, mesh, primitive))| ScenePrimitive {
                instance_id: index as u32,
                model,
                mesh,
                primitive,
            })
    }

    pub fn primitive_count(&self) -> usize {
        self.models.iter().map(Model::primitive_count).sum()
    }

    /// Every primitive in draw order, for pipeline assignment
    pub(crate) fn primitives_mut(&mut self) -> impl Iterator<Item = &mut Primitive> {
        self.models
            .iter_mut()
            .flat_map(|model| model.meshes.iter_mut())
            .flat_map(|mesh| mesh.primitives.iter_mut())
    }
}

/// Builds the merged buffers of a [`RenderScene`]
pub struct SceneBuilder;

impl SceneBuilder {
    /// Record each primitive's prefix offsets and return the merged totals
    pub fn assign_offsets(scene: &mut RenderScene) -> SceneTotals {
        let mut totals = SceneTotals::default();
        for model in &mut scene.models {
            for mesh in &mut model.meshes {
                for primitive in &mut mesh.primitives {
                    primitive.vertices_before = totals.vertices;
                    primitive.indices_before = totals.indices;
                    totals.vertices += primitive.vertex_count();
                    totals.indices += primitive.index_count();
                    totals.primitives += 1;
                }
            }
            totals.materials += model.materials.len() as u32;
        }
        totals
    }

    /// Instance data in draw order. Offsets must have been assigned.
    pub fn instance_data(scene: &RenderScene) -> Vec<RenderInstanceData> {
        let mut materials_before = 0usize;
        let mut instances = Vec::with_capacity(scene.primitive_count());
        for model in &scene.models {
            for (mesh, primitive) in model.primitives() {
                let material_id = match model.material_for(primitive) {
                    Ok(_) => primitive
                        .material
                        .map_or(-1, |local| (materials_before + local) as i32),
                    Err(_) => -1,
                };
                instances.push(RenderInstanceData {
                    model_matrix: model.transform * mesh.transform,
                    material_id,
                    vertices_before: primitive.vertices_before() as i32,
                    indices_before: primitive.indices_before() as i32,
                    pad: 0,
                });
            }
            materials_before += model.materials.len();
        }
        instances
    }

    /// Shader parameters of every material, models in order
    pub fn material_data(scene: &RenderScene) -> Vec<SurfaceShaderParameters> {
        scene
            .models
            .iter()
            .flat_map(|model| model.materials.iter().map(|m| m.shader_parameters))
            .collect()
    }

    /// Create, fill and describe the merged buffers, replacing any previous ones.
    ///
    /// Upload barriers are recorded into `cmd`; the buffers are ready for
    /// rendering once it has executed. With `mipmapped`, material textures in
    /// a filterable format get room for a full mip chain that the caller must
    /// fill before sampling below mip 0.
    pub fn upload<B: GraphicsBackend>(
        scene: &mut RenderScene,
        backend: &mut B,
        pool: &mut ResourcePool,
        heap: &mut DescriptorHeap,
        cmd: CommandList,
        mipmapped: bool,
    ) -> RendererResult<SceneTotals> {
        if let Some(previous) = scene.buffers.take() {
            previous.release(backend, pool);
        }

        let totals = Self::assign_offsets(scene);

        let (textures, material_data) =
            Self::upload_textures(scene, backend, pool, heap, cmd, mipmapped)?;

        let vertex_data: Vec<Vertex> = scene
            .models
            .iter()
            .flat_map(|model| model.primitives())
            .flat_map(|(_, primitive)| primitive.vertices.iter().copied())
            .collect();
        let index_data: Vec<u32> = scene
            .models
            .iter()
            .flat_map(|model| model.primitives())
            .flat_map(|(_, primitive)| primitive.indices.iter().copied())
            .collect();
        let instance_data = Self::instance_data(scene);

        let vertices = Self::upload_slice(backend, pool, cmd, "scene vertices", &vertex_data)?;
        let indices = Self::upload_slice(backend, pool, cmd, "scene indices", &index_data)?;
        let instances = Self::upload_elements(backend, pool, cmd, "scene instances", &instance_data)?;
        let materials = Self::upload_elements(backend, pool, cmd, "scene materials", &material_data)?;

        let instance_srv = Self::structured_view::<B, RenderInstanceData>(
            backend,
            pool,
            heap,
            instances,
            instance_data.len(),
        )?;
        let material_srv = Self::structured_view::<B, SurfaceShaderParameters>(
            backend,
            pool,
            heap,
            materials,
            material_data.len(),
        )?;

        log::info!(
            "Built scene: {} models, {} primitives, {} vertices, {} indices, {} materials, {} textures",
            scene.models.len(),
            totals.primitives,
            totals.vertices,
            totals.indices,
            totals.materials,
            textures.len()
        );

        scene.buffers = Some(SceneBuffers {
            vertices,
            indices,
            instances,
            materials,
            instance_srv,
            material_srv,
            textures,
            environment: None,
            totals,
        });
        Ok(totals)
    }

    /// Upload every material texture and point the material data at its view.
    ///
    /// A texture that fails to upload is disabled for its material only.
    fn upload_textures<B: GraphicsBackend>(
        scene: &RenderScene,
        backend: &mut B,
        pool: &mut ResourcePool,
        heap: &mut DescriptorHeap,
        cmd: CommandList,
        mipmapped: bool,
    ) -> RendererResult<(Vec<TextureHandle>, Vec<SurfaceShaderParameters>)> {
        let mut handles = Vec::new();
        let mut material_data = Vec::new();

        for material in scene.models.iter().flat_map(|model| &model.materials) {
            let mut parameters = material.shader_parameters;
            for (slot, texture) in material.textures() {
                let desc = if mipmapped && MipGenerator::supports(texture.format) {
                    texture.mipmapped_descriptor()
                } else {
                    texture.descriptor()
                };
                let uploaded = Self::upload_texture(backend, pool, cmd, texture, &desc);

                match uploaded {
                    Ok(handle) => {
                        let srv = heap.allocate()?;
                        heap.write(
                            backend,
                            &srv,
                            &DescriptorView::Texture {
                                texture: pool.native_texture(handle)?,
                                format: texture.format,
                            },
                        )?;
                        *parameters.texture_index_mut(slot) = srv.index as i32;
                        handles.push(handle);
                    }
                    Err(err) => {
                        log::warn!(
                            "Material '{}': {:?} texture '{}' disabled: {}",
                            material.name,
                            slot,
                            texture.name,
                            err
                        );
                        parameters.texture_enable_bitmask &= !slot.bit();
                        *parameters.texture_index_mut(slot) = -1;
                    }
                }
            }
            material_data.push(parameters);
        }

        Ok((handles, material_data))
    }

    /// Create a texture and upload `texture` into its first mip. Nothing is
    /// left behind in the pool when the upload fails.
    pub fn upload_texture<B: GraphicsBackend>(
        backend: &mut B,
        pool: &mut ResourcePool,
        cmd: CommandList,
        texture: &TextureData,
        desc: &TextureDescriptor,
    ) -> Result<TextureHandle, AllocError> {
        let handle = pool.create_texture(backend, desc)?;
        let uploaded = pool.upload_texture(
            backend,
            cmd,
            handle,
            &texture.data,
            &[texture.layout()],
            ResourceState::AllShaderResource,
        );
        match uploaded {
            Ok(()) => Ok(handle),
            Err(err) => {
                if let Err(destroy_err) = pool.destroy_texture(backend, handle) {
                    log::error!("Can't destroy texture '{}': {}", texture.name, destroy_err);
                }
                Err(err)
            }
        }
    }

    fn upload_slice<B: GraphicsBackend, T: Pod>(
        backend: &mut B,
        pool: &mut ResourcePool,
        cmd: CommandList,
        label: &str,
        data: &[T],
    ) -> RendererResult<Option<BufferHandle>> {
        if data.is_empty() {
            return Ok(None);
        }
        Self::upload_bytes(backend, pool, cmd, label, bytemuck::cast_slice(data)).map(Some)
    }

    /// Like `upload_slice`, but always creates a buffer so a view can point at it
    fn upload_elements<B: GraphicsBackend, T: Pod + Zeroable>(
        backend: &mut B,
        pool: &mut ResourcePool,
        cmd: CommandList,
        label: &str,
        data: &[T],
    ) -> RendererResult<BufferHandle> {
        let placeholder = [T::zeroed()];
        let data = if data.is_empty() { &placeholder[..] } else { data };
        Self::upload_bytes(backend, pool, cmd, label, bytemuck::cast_slice(data))
    }

    fn upload_bytes<B: GraphicsBackend>(
        backend: &mut B,
        pool: &mut ResourcePool,
        cmd: CommandList,
        label: &str,
        bytes: &[u8],
    ) -> RendererResult<BufferHandle> {
        let handle = pool.create_buffer(
            backend,
            label,
            bytes.len() as u64,
            HeapKind::Upload,
            ResourceFlags::NONE,
            ResourceState::Common,
        )?;
        pool.upload(backend, cmd, handle, bytes, ResourceState::GenericRead)?;
        Ok(handle)
    }

    fn structured_view<B: GraphicsBackend, T>(
        backend: &mut B,
        pool: &ResourcePool,
        heap: &mut DescriptorHeap,
        buffer: BufferHandle,
        count: usize,
    ) -> RendererResult<DescriptorHandle> {
        let srv = heap.allocate()?;
        heap.write(
            backend,
            &srv,
            &DescriptorView::StructuredBuffer {
                buffer: pool.native_buffer(buffer)?,
                first_element: 0,
                element_count: count.max(1) as u32,
                stride: std::mem::size_of::<T>() as u32,
            },
        )?;
        Ok(srv)
    }
}

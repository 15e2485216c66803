//! Surface materials
//!
//! A material carries the fixed-function state that goes into a pipeline
//! (blend and rasterizer) and the shader parameters that go into the merged
//! material buffer. Two materials that differ only in shader parameters share
//! a pipeline.

use crate::backend::{BlendState, RasterizerState};
use crate::resources::TextureData;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use std::path::Path;

/// Texture slots of a surface material, numbered by their enable bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Albedo = 0,
    MetallicRoughness = 1,
    Normal = 2,
    Occlusion = 3,
    Emissive = 4,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 5] = [
        TextureSlot::Albedo,
        TextureSlot::MetallicRoughness,
        TextureSlot::Normal,
        TextureSlot::Occlusion,
        TextureSlot::Emissive,
    ];

    pub fn bit(self) -> i32 {
        1 << self as i32
    }
}

/// Material buffer element, laid out as the shaders' `SurfaceParameters` struct.
///
/// Texture indices are descriptor slots in the resource heap; absent textures
/// are `-1` and have their enable bit cleared.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SurfaceShaderParameters {
    pub base_color_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub texture_enable_bitmask: i32,
    pub albedo_texture_index: i32,
    pub metallic_roughness_texture_index: i32,
    pub normal_texture_index: i32,
    pub occlusion_texture_index: i32,
    pub emissive_texture_index: i32,
}

impl Default for SurfaceShaderParameters {
    fn default() -> Self {
        Self {
            base_color_factor: Vec4::ONE,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            texture_enable_bitmask: 0,
            albedo_texture_index: -1,
            metallic_roughness_texture_index: -1,
            normal_texture_index: -1,
            occlusion_texture_index: -1,
            emissive_texture_index: -1,
        }
    }
}

impl SurfaceShaderParameters {
    pub fn texture_index_mut(&mut self, slot: TextureSlot) -> &mut i32 {
        match slot {
            TextureSlot::Albedo => &mut self.albedo_texture_index,
            TextureSlot::MetallicRoughness => &mut self.metallic_roughness_texture_index,
            TextureSlot::Normal => &mut self.normal_texture_index,
            TextureSlot::Occlusion => &mut self.occlusion_texture_index,
            TextureSlot::Emissive => &mut self.emissive_texture_index,
        }
    }

    pub fn has_texture(&self, slot: TextureSlot) -> bool {
        self.texture_enable_bitmask & slot.bit() != 0
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub shader_parameters: SurfaceShaderParameters,
    textures: [Option<TextureData>; 5],
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blend: BlendState::opaque(),
            rasterizer: RasterizerState::default(),
            shader_parameters: SurfaceShaderParameters::default(),
            textures: Default::default(),
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.shader_parameters.base_color_factor = color;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn set_texture(&mut self, slot: TextureSlot, texture: TextureData) {
        self.textures[slot as usize] = Some(texture);
        self.shader_parameters.texture_enable_bitmask |= slot.bit();
    }

    /// Decode an image file into a texture slot.
    ///
    /// A file that can't be decoded leaves the slot empty: the failure is
    /// logged and the material keeps rendering without that texture.
    pub fn load_texture(&mut self, slot: TextureSlot, path: impl AsRef<Path>) -> bool {
        match TextureData::from_file(path) {
            Ok(texture) => {
                self.set_texture(slot, texture);
                true
            }
            Err(err) => {
                log::warn!(
                    "Material '{}': {:?} texture disabled: {}",
                    self.name,
                    slot,
                    err
                );
                self.clear_texture(slot);
                false
            }
        }
    }

    pub fn clear_texture(&mut self, slot: TextureSlot) {
        self.textures[slot as usize] = None;
        self.shader_parameters.texture_enable_bitmask &= !slot.bit();
        *self.shader_parameters.texture_index_mut(slot) = -1;
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&TextureData> {
        self.textures[slot as usize].as_ref()
    }

    /// Occupied texture slots in bit order
    pub fn textures(&self) -> impl Iterator<Item = (TextureSlot, &TextureData)> {
        TextureSlot::ALL
            .into_iter()
            .filter_map(|slot| self.texture(slot).map(|texture| (slot, texture)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_surface_parameters_layout() {
        assert_eq!(std::mem::size_of::<SurfaceShaderParameters>(), 48);
    }

    #[test]
    fn test_texture_bits() {
        assert_eq!(TextureSlot::Albedo.bit(), 1);
        assert_eq!(TextureSlot::Emissive.bit(), 16);
    }

    #[test]
    fn test_failed_texture_load_clears_slot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a png").unwrap();

        let mut material = Material::new("broken");
        material.set_texture(TextureSlot::Normal, TextureData::solid_color([0; 4], "n"));
        assert!(material.shader_parameters.has_texture(TextureSlot::Normal));

        assert!(!material.load_texture(TextureSlot::Normal, file.path()));
        assert!(!material.shader_parameters.has_texture(TextureSlot::Normal));
        assert!(material.texture(TextureSlot::Normal).is_none());
        assert_eq!(material.shader_parameters.normal_texture_index, -1);
    }

    #[test]
    fn test_textures_iterate_in_slot_order() {
        let mut material = Material::new("m");
        material.set_texture(TextureSlot::Emissive, TextureData::solid_color([1; 4], "e"));
        material.set_texture(TextureSlot::Albedo, TextureData::solid_color([2; 4], "a"));

        let slots: Vec<_> = material.textures().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![TextureSlot::Albedo, TextureSlot::Emissive]);
        assert_eq!(material.shader_parameters.texture_enable_bitmask, 0b10001);
    }
}

//! Models: meshes plus the materials their primitives index into

use super::material::Material;
use super::mesh::{Mesh, Primitive};
use crate::pipeline::CompileError;
use glam::Mat4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderParameters {
    pub cast_shadows: bool,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self { cast_shadows: true }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub render_parameters: RenderParameters,
    pub transform: Mat4,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            render_parameters: RenderParameters::default(),
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            materials: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.materials.push(material);
        self
    }

    pub fn with_cast_shadows(mut self, cast_shadows: bool) -> Self {
        self.render_parameters.cast_shadows = cast_shadows;
        self
    }

    /// Material a primitive of this model draws with
    pub fn material_for(&self, primitive: &Primitive) -> Result<&Material, CompileError> {
        let index = primitive.material.ok_or_else(|| CompileError::MaterialMissing {
            primitive: primitive.name.clone(),
        })?;
        self.materials
            .get(index)
            .ok_or_else(|| CompileError::MaterialOutOfRange {
                primitive: primitive.name.clone(),
                material: index,
                count: self.materials.len(),
            })
    }

    pub fn primitives(&self) -> impl Iterator<Item = (&Mesh, &Primitive)> {
        self.meshes
            .iter()
            .flat_map(|mesh| mesh.primitives.iter().map(move |primitive| (mesh, primitive)))
    }

    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(|mesh| mesh.primitives.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_lookup() {
        let model = Model::new("m").with_material(Material::new("only"));

        let ok = Primitive::cube("ok", Some(0));
        let missing = Primitive::cube("missing", None);
        let out_of_range = Primitive::cube("far", Some(3));

        assert_eq!(model.material_for(&ok).unwrap().name, "only");
        assert_eq!(
            model.material_for(&missing).unwrap_err(),
            CompileError::MaterialMissing {
                primitive: "missing".to_string()
            }
        );
        assert_eq!(
            model.material_for(&out_of_range).unwrap_err(),
            CompileError::MaterialOutOfRange {
                primitive: "far".to_string(),
                material: 3,
                count: 1,
            }
        );
    }
}

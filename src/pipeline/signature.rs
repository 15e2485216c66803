//! Binding signatures: what a pipeline can bind, parameter by parameter
//!
//! Parameters are addressed by their index in [`BindingSignatureDesc::parameters`].
//! Shaders see every parameter except push constants as its own bind group,
//! numbered in parameter order; static samplers share one extra group after
//! the last parameter group.

use crate::backend::{SamplerDescriptor, ShaderVisibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    /// Read-only buffer or texture view
    ShaderResource,
    /// Read-write buffer or texture view
    UnorderedAccess,
    ConstantBuffer,
    Sampler,
}

/// What the views in a range point at. Native APIs that type their
/// descriptor slots need this to build the table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceDimension {
    #[default]
    Buffer,
    Texture2D,
    AccelerationStructure,
}

/// A run of consecutive heap slots inside a descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub dimension: ResourceDimension,
    pub count: u32,
    pub base_register: u32,
    pub space: u32,
}

impl DescriptorRange {
    fn new(
        range_type: DescriptorRangeType,
        dimension: ResourceDimension,
        base_register: u32,
        count: u32,
    ) -> Self {
        Self {
            range_type,
            dimension,
            count,
            base_register,
            space: 0,
        }
    }

    /// Read-only structured buffers
    pub fn shader_resource(base_register: u32, count: u32) -> Self {
        Self::new(
            DescriptorRangeType::ShaderResource,
            ResourceDimension::Buffer,
            base_register,
            count,
        )
    }

    /// Read-write structured buffers
    pub fn unordered_access(base_register: u32, count: u32) -> Self {
        Self::new(
            DescriptorRangeType::UnorderedAccess,
            ResourceDimension::Buffer,
            base_register,
            count,
        )
    }

    pub fn texture(base_register: u32, count: u32) -> Self {
        Self::new(
            DescriptorRangeType::ShaderResource,
            ResourceDimension::Texture2D,
            base_register,
            count,
        )
    }

    pub fn storage_texture(base_register: u32, count: u32) -> Self {
        Self::new(
            DescriptorRangeType::UnorderedAccess,
            ResourceDimension::Texture2D,
            base_register,
            count,
        )
    }

    pub fn acceleration_structure(base_register: u32) -> Self {
        Self::new(
            DescriptorRangeType::ShaderResource,
            ResourceDimension::AccelerationStructure,
            base_register,
            1,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// Constant buffer bound directly by address
    ConstantBuffer {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    /// 32-bit values written straight into the command list
    PushConstants {
        register: u32,
        count_u32: u32,
        visibility: ShaderVisibility,
    },
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticSampler {
    pub register: u32,
    pub space: u32,
    pub sampler: SamplerDescriptor,
    pub visibility: ShaderVisibility,
}

/// Description of a binding signature (root signature / pipeline layout)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindingSignatureDesc {
    pub name: String,
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
}

impl BindingSignatureDesc {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_constant_buffer(mut self, register: u32, visibility: ShaderVisibility) -> Self {
        self.parameters.push(RootParameter::ConstantBuffer {
            register,
            space: 0,
            visibility,
        });
        self
    }

    pub fn with_push_constants(
        mut self,
        register: u32,
        count_u32: u32,
        visibility: ShaderVisibility,
    ) -> Self {
        self.parameters.push(RootParameter::PushConstants {
            register,
            count_u32,
            visibility,
        });
        self
    }

    pub fn with_table(mut self, ranges: &[DescriptorRange], visibility: ShaderVisibility) -> Self {
        self.parameters.push(RootParameter::DescriptorTable {
            ranges: ranges.to_vec(),
            visibility,
        });
        self
    }

    pub fn with_static_sampler(
        mut self,
        register: u32,
        sampler: SamplerDescriptor,
        visibility: ShaderVisibility,
    ) -> Self {
        self.static_samplers.push(StaticSampler {
            register,
            space: 0,
            sampler,
            visibility,
        });
        self
    }

    /// Bind group a parameter occupies; `None` for push constants or out of range
    pub fn bind_group_of(&self, parameter: u32) -> Option<u32> {
        let index = parameter as usize;
        match self.parameters.get(index)? {
            RootParameter::PushConstants { .. } => None,
            _ => Some(
                self.parameters[..index]
                    .iter()
                    .filter(|p| !matches!(p, RootParameter::PushConstants { .. }))
                    .count() as u32,
            ),
        }
    }

    /// Number of bind groups used by parameters, excluding static samplers
    pub fn parameter_group_count(&self) -> u32 {
        self.parameters
            .iter()
            .filter(|p| !matches!(p, RootParameter::PushConstants { .. }))
            .count() as u32
    }

    /// Bind group holding the static samplers, if there are any
    pub fn static_sampler_group(&self) -> Option<u32> {
        (!self.static_samplers.is_empty()).then(|| self.parameter_group_count())
    }

    /// Byte offset of a push-constant parameter inside the push-constant block.
    ///
    /// Push-constant parameters are packed in parameter order.
    pub fn push_constant_offset(&self, parameter: u32) -> Option<u32> {
        let index = parameter as usize;
        if !matches!(
            self.parameters.get(index)?,
            RootParameter::PushConstants { .. }
        ) {
            return None;
        }
        let offset = self.parameters[..index]
            .iter()
            .map(|p| match p {
                RootParameter::PushConstants { count_u32, .. } => count_u32 * 4,
                _ => 0,
            })
            .sum();
        Some(offset)
    }

    /// Total size of the push-constant block in bytes
    pub fn push_constant_size(&self) -> u32 {
        self.parameters
            .iter()
            .map(|p| match p {
                RootParameter::PushConstants { count_u32, .. } => count_u32 * 4,
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_like() -> BindingSignatureDesc {
        BindingSignatureDesc::new("forward")
            .with_constant_buffer(0, ShaderVisibility::All)
            .with_constant_buffer(1, ShaderVisibility::All)
            .with_push_constants(2, 1, ShaderVisibility::Vertex)
            .with_table(&[DescriptorRange::shader_resource(0, 1)], ShaderVisibility::All)
            .with_static_sampler(0, SamplerDescriptor::default(), ShaderVisibility::Pixel)
    }

    #[test]
    fn test_bind_groups_skip_push_constants() {
        let desc = forward_like();
        assert_eq!(desc.bind_group_of(0), Some(0));
        assert_eq!(desc.bind_group_of(1), Some(1));
        assert_eq!(desc.bind_group_of(2), None);
        assert_eq!(desc.bind_group_of(3), Some(2));
        assert_eq!(desc.bind_group_of(4), None);
        assert_eq!(desc.static_sampler_group(), Some(3));
    }

    #[test]
    fn test_push_constant_packing() {
        let desc = BindingSignatureDesc::new("packed")
            .with_push_constants(0, 4, ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::unordered_access(0, 1)], ShaderVisibility::Compute)
            .with_push_constants(1, 2, ShaderVisibility::Compute);

        assert_eq!(desc.push_constant_offset(0), Some(0));
        assert_eq!(desc.push_constant_offset(1), None);
        assert_eq!(desc.push_constant_offset(2), Some(16));
        assert_eq!(desc.push_constant_size(), 24);
        assert_eq!(desc.static_sampler_group(), None);
    }
}

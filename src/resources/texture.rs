//! Texture decoding for material slots

use crate::backend::{
    full_mip_chain, ResourceFlags, SubresourceLayout, TextureDescriptor, TextureFormat,
};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Can't decode texture '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Can't decode texture '{name}' from memory: {source}")]
    DecodeBytes {
        name: String,
        #[source]
        source: image::ImageError,
    },
}

/// Decoded RGBA8 texel data, ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|source| TextureError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Load texture from encoded bytes (PNG, JPEG, ...)
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes).map_err(|source| TextureError::DecodeBytes {
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// 1x1 texture of a single color
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn row_pitch(&self) -> u64 {
        self.width as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Layout of the single mip level stored in `data`
    pub fn layout(&self) -> SubresourceLayout {
        SubresourceLayout {
            offset: 0,
            row_pitch: self.row_pitch(),
            slice_pitch: self.row_pitch() * self.height as u64,
        }
    }

    /// Single-level texture holding exactly `data`
    pub fn descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            ..Default::default()
        }
    }

    /// Texture with room for the full mip chain below `data`, writable by the
    /// mip filter
    pub fn mipmapped_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            mip_levels: full_mip_chain(self.width, self.height),
            flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
            ..self.descriptor()
        }
    }
}

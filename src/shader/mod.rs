//! Shader storage: WGSL to SPIR-V compilation and change tracking
//!
//! Shaders are identified by [`ShaderCompileParameters`]. Sources are looked up
//! under the storage root first and fall back to the sources embedded in the
//! crate, so a file placed under the root overrides the built-in version of
//! the same name.
//!
//! Pipelines only ever see the resulting [`ShaderBytecode`]; they do not care
//! how it was produced.

use crate::backend::ShaderStage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

pub const FORWARD_SHADER: &str = "forward.wgsl";
pub const SHADOW_SHADER: &str = "shadow.wgsl";
pub const TONEMAP_SHADER: &str = "tonemap.wgsl";
pub const SKYBOX_SHADER: &str = "skybox.wgsl";
pub const CUBEMAP_SHADER: &str = "cubemap.wgsl";
pub const MIPS_SHADER: &str = "mips.wgsl";

const EMBEDDED_SOURCES: &[(&str, &str)] = &[
    (FORWARD_SHADER, include_str!("forward.wgsl")),
    (SHADOW_SHADER, include_str!("shadow.wgsl")),
    (TONEMAP_SHADER, include_str!("tonemap.wgsl")),
    (SKYBOX_SHADER, include_str!("skybox.wgsl")),
    (CUBEMAP_SHADER, include_str!("cubemap.wgsl")),
    (MIPS_SHADER, include_str!("mips.wgsl")),
];

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Can't read shader '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Shader source '{0}' not found")]
    NotFound(PathBuf),
    #[error("WGSL parse error in '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Validation error in '{path}': {message}")]
    Validation { path: PathBuf, message: String },
    #[error("Entry point '{entry_point}' not found for stage {stage:?} in '{path}'")]
    MissingEntryPoint {
        path: PathBuf,
        entry_point: String,
        stage: ShaderStage,
    },
    #[error("Shader stage {0:?} can't be compiled from WGSL")]
    UnsupportedStage(ShaderStage),
    #[error("SPIR-V generation error in '{path}': {message}")]
    SpirV { path: PathBuf, message: String },
}

/// Compiled shader bytecode for one entry point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub entry_point: String,
    bytes: Arc<[u8]>,
}

impl ShaderBytecode {
    pub fn new(stage: ShaderStage, entry_point: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            stage,
            entry_point: entry_point.to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Key of a compiled shader: source path, stage, entry point and defines
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderCompileParameters {
    pub path: PathBuf,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub defines: Vec<(String, String)>,
}

impl ShaderCompileParameters {
    pub fn new(path: impl Into<PathBuf>, stage: ShaderStage, entry_point: &str) -> Self {
        Self {
            path: path.into(),
            stage,
            entry_point: entry_point.to_string(),
            defines: Vec::new(),
        }
    }

    pub fn with_define(mut self, name: &str, value: &str) -> Self {
        self.defines.push((name.to_string(), value.to_string()));
        self
    }
}

struct CompiledShader {
    bytecode: ShaderBytecode,
    /// File under the root that provides the source. Embedded sources keep
    /// the path an override would have, so creating it counts as a change.
    source_file: Option<PathBuf>,
    modified: Option<SystemTime>,
}

/// Compiles and caches shaders, and reports sources changed on disk
pub struct ShaderStorage {
    root: Option<PathBuf>,
    compiled: HashMap<ShaderCompileParameters, CompiledShader>,
}

impl ShaderStorage {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            compiled: HashMap::new(),
        }
    }

    /// Storage that only knows the embedded sources
    pub fn embedded() -> Self {
        Self::new(None)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Compile a shader, or return the cached bytecode if it was compiled before
    pub fn compile(
        &mut self,
        parameters: &ShaderCompileParameters,
    ) -> Result<ShaderBytecode, ShaderError> {
        if let Some(compiled) = self.compiled.get(parameters) {
            return Ok(compiled.bytecode.clone());
        }
        self.compile_uncached(parameters)
    }

    /// Compile a shader again from its current source.
    ///
    /// On failure the previously compiled bytecode stays in place and the
    /// source is not reported as changed again until it is modified.
    pub fn recompile(
        &mut self,
        parameters: &ShaderCompileParameters,
    ) -> Result<ShaderBytecode, ShaderError> {
        match self.compile_uncached(parameters) {
            Ok(bytecode) => Ok(bytecode),
            Err(err) => {
                log::error!(
                    "Can't recompile shader {} ({}): {}",
                    parameters.path.display(),
                    parameters.entry_point,
                    err
                );
                if let Some(compiled) = self.compiled.get_mut(parameters) {
                    compiled.modified = compiled
                        .source_file
                        .as_deref()
                        .and_then(modification_time);
                }
                Err(err)
            }
        }
    }

    /// Shaders whose source file changed since they were last compiled,
    /// including embedded shaders that gained an override file under the root
    pub fn changed_shaders(&self) -> Vec<ShaderCompileParameters> {
        let mut changed: Vec<ShaderCompileParameters> = self
            .compiled
            .iter()
            .filter(|(_, compiled)| {
                let Some(file) = compiled.source_file.as_deref() else {
                    return false;
                };
                modification_time(file) != compiled.modified
            })
            .map(|(parameters, _)| parameters.clone())
            .collect();

        changed.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.entry_point.cmp(&b.entry_point))
        });
        changed
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn compile_uncached(
        &mut self,
        parameters: &ShaderCompileParameters,
    ) -> Result<ShaderBytecode, ShaderError> {
        let (source, source_file) = self.load_source(&parameters.path)?;
        let modified = source_file.as_deref().and_then(modification_time);

        log::info!(
            "Compiling shader: {} ({:?}, {})",
            parameters.path.display(),
            parameters.stage,
            parameters.entry_point
        );

        let source = inject_defines(&source, &parameters.defines);
        let bytecode = compile_wgsl(&source, parameters)?;

        self.compiled.insert(
            parameters.clone(),
            CompiledShader {
                bytecode: bytecode.clone(),
                source_file,
                modified,
            },
        );
        Ok(bytecode)
    }

    /// Source text and the root path to watch for it
    fn load_source(&self, path: &Path) -> Result<(String, Option<PathBuf>), ShaderError> {
        let full_path = self.root.as_ref().map(|root| root.join(path));
        if let Some(full_path) = full_path.as_ref().filter(|p| p.is_file()) {
            let source = std::fs::read_to_string(full_path).map_err(|source| ShaderError::Io {
                path: full_path.clone(),
                source,
            })?;
            return Ok((source, Some(full_path.clone())));
        }

        let embedded = path
            .to_str()
            .and_then(|name| {
                EMBEDDED_SOURCES
                    .iter()
                    .find(|(embedded, _)| *embedded == name)
            })
            .map(|(_, source)| source.to_string())
            .ok_or_else(|| ShaderError::NotFound(path.to_path_buf()))?;
        Ok((embedded, full_path))
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Prepend each define as a module-scope WGSL constant
pub fn inject_defines(source: &str, defines: &[(String, String)]) -> String {
    if defines.is_empty() {
        return source.to_string();
    }

    let mut result = String::with_capacity(source.len() + defines.len() * 32);
    for (name, value) in defines {
        result.push_str(&format!("const {name} = {value};\n"));
    }
    result.push_str(source);
    result
}

fn compile_wgsl(
    source: &str,
    parameters: &ShaderCompileParameters,
) -> Result<ShaderBytecode, ShaderError> {
    let path = parameters.path.clone();

    let naga_stage = match parameters.stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Pixel => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
        stage => return Err(ShaderError::UnsupportedStage(stage)),
    };

    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        path: path.clone(),
        message: e.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderError::Validation {
            path: path.clone(),
            message: e.to_string(),
        })?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == parameters.entry_point && ep.stage == naga_stage)
    {
        return Err(ShaderError::MissingEntryPoint {
            path,
            entry_point: parameters.entry_point.clone(),
            stage: parameters.stage,
        });
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: parameters.entry_point.clone(),
    };

    let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| ShaderError::SpirV {
            path,
            message: e.to_string(),
        })?;

    Ok(ShaderBytecode::new(
        parameters.stage,
        &parameters.entry_point,
        bytemuck::cast_slice::<u32, u8>(&words).to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn magic(bytecode: &ShaderBytecode) -> u32 {
        let bytes = bytecode.bytes();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn test_embedded_shaders_compile() {
        let mut storage = ShaderStorage::embedded();
        let cases = [
            (FORWARD_SHADER, ShaderStage::Vertex, "vs_main"),
            (FORWARD_SHADER, ShaderStage::Pixel, "ps_main"),
            (SHADOW_SHADER, ShaderStage::Vertex, "vs_main"),
            (TONEMAP_SHADER, ShaderStage::Compute, "cs_main"),
            (SKYBOX_SHADER, ShaderStage::Vertex, "vs_main"),
            (SKYBOX_SHADER, ShaderStage::Pixel, "ps_main"),
            (CUBEMAP_SHADER, ShaderStage::Compute, "cs_main"),
            (MIPS_SHADER, ShaderStage::Compute, "cs_main"),
        ];

        for (path, stage, entry_point) in cases {
            let bytecode = storage
                .compile(&ShaderCompileParameters::new(path, stage, entry_point))
                .unwrap();
            assert_eq!(magic(&bytecode), SPIRV_MAGIC, "{path} {entry_point}");
            assert_eq!(bytecode.stage, stage);
        }
        assert_eq!(storage.len(), 8);
    }

    #[test]
    fn test_compile_is_cached() {
        let mut storage = ShaderStorage::embedded();
        let parameters = ShaderCompileParameters::new(SHADOW_SHADER, ShaderStage::Vertex, "vs_main");

        let first = storage.compile(&parameters).unwrap();
        let second = storage.compile(&parameters).unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_missing_entry_point() {
        let mut storage = ShaderStorage::embedded();
        let err = storage
            .compile(&ShaderCompileParameters::new(
                FORWARD_SHADER,
                ShaderStage::Compute,
                "vs_main",
            ))
            .unwrap_err();
        assert!(matches!(err, ShaderError::MissingEntryPoint { .. }));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unknown_source() {
        let mut storage = ShaderStorage::embedded();
        let err = storage
            .compile(&ShaderCompileParameters::new(
                "missing.wgsl",
                ShaderStage::Vertex,
                "vs_main",
            ))
            .unwrap_err();
        assert!(matches!(err, ShaderError::NotFound(_)));
    }

    #[test]
    fn test_stage_without_wgsl_equivalent() {
        let mut storage = ShaderStorage::embedded();
        let err = storage
            .compile(&ShaderCompileParameters::new(
                FORWARD_SHADER,
                ShaderStage::Geometry,
                "gs_main",
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            ShaderError::UnsupportedStage(ShaderStage::Geometry)
        ));
    }

    #[test]
    fn test_defines_become_constants() {
        let source = inject_defines(
            "fn f() -> u32 { return SAMPLES; }",
            &[("SAMPLES".to_string(), "4u".to_string())],
        );
        assert_eq!(source, "const SAMPLES = 4u;\nfn f() -> u32 { return SAMPLES; }");
    }

    #[test]
    fn test_defines_are_part_of_the_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fill.wgsl"),
            "@compute @workgroup_size(1) fn cs_main() { let value: u32 = FILL_VALUE; }",
        )
        .unwrap();

        let mut storage = ShaderStorage::new(Some(dir.path().to_path_buf()));
        let base = ShaderCompileParameters::new("fill.wgsl", ShaderStage::Compute, "cs_main");

        // FILL_VALUE only exists when defined
        assert!(storage.compile(&base).is_err());
        storage
            .compile(&base.clone().with_define("FILL_VALUE", "1u"))
            .unwrap();
        storage
            .compile(&base.with_define("FILL_VALUE", "2u"))
            .unwrap();
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_file_overrides_embedded_source_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(TONEMAP_SHADER);
        std::fs::write(
            &file,
            "@compute @workgroup_size(8, 8, 1) fn cs_main() {}",
        )
        .unwrap();

        let mut storage = ShaderStorage::new(Some(dir.path().to_path_buf()));
        let parameters =
            ShaderCompileParameters::new(TONEMAP_SHADER, ShaderStage::Compute, "cs_main");
        let overridden = storage.compile(&parameters).unwrap();
        assert!(storage.changed_shaders().is_empty());

        let embedded = ShaderStorage::embedded().compile(&parameters).unwrap();
        assert_ne!(overridden, embedded);

        std::fs::write(
            &file,
            "@compute @workgroup_size(4, 4, 1) fn cs_main() {}",
        )
        .unwrap();
        let later = SystemTime::now() + Duration::from_secs(10);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(storage.changed_shaders(), vec![parameters.clone()]);

        let reloaded = storage.recompile(&parameters).unwrap();
        assert_ne!(reloaded, overridden);
        assert!(storage.changed_shaders().is_empty());
    }

    #[test]
    fn test_override_created_after_compile_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = ShaderStorage::new(Some(dir.path().to_path_buf()));
        let parameters =
            ShaderCompileParameters::new(TONEMAP_SHADER, ShaderStage::Compute, "cs_main");
        let embedded = storage.compile(&parameters).unwrap();
        assert!(storage.changed_shaders().is_empty());

        std::fs::write(
            dir.path().join(TONEMAP_SHADER),
            "@compute @workgroup_size(4, 4, 1) fn cs_main() {}",
        )
        .unwrap();
        assert_eq!(storage.changed_shaders(), vec![parameters.clone()]);

        let overridden = storage.recompile(&parameters).unwrap();
        assert_ne!(overridden, embedded);
        assert!(storage.changed_shaders().is_empty());

        // Removing the override falls back to the embedded source
        std::fs::remove_file(dir.path().join(TONEMAP_SHADER)).unwrap();
        assert_eq!(storage.changed_shaders(), vec![parameters.clone()]);
        assert_eq!(storage.recompile(&parameters).unwrap(), embedded);
    }

    #[test]
    fn test_embedded_only_storage_reports_nothing() {
        let mut storage = ShaderStorage::embedded();
        storage
            .compile(&ShaderCompileParameters::new(
                SHADOW_SHADER,
                ShaderStage::Vertex,
                "vs_main",
            ))
            .unwrap();
        assert!(storage.changed_shaders().is_empty());
    }

    #[test]
    fn test_failed_recompile_keeps_previous_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.wgsl");
        std::fs::write(&file, "@compute @workgroup_size(1) fn cs_main() {}").unwrap();

        let mut storage = ShaderStorage::new(Some(dir.path().to_path_buf()));
        let parameters = ShaderCompileParameters::new("broken.wgsl", ShaderStage::Compute, "cs_main");
        let original = storage.compile(&parameters).unwrap();

        std::fs::write(&file, "this is not wgsl").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        assert!(storage.recompile(&parameters).is_err());
        assert!(storage.changed_shaders().is_empty());
        assert_eq!(storage.compile(&parameters).unwrap(), original);
    }
}

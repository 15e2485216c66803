//! Pipeline state cache
//!
//! At most one native pipeline exists per distinct configuration. Entries live
//! for the lifetime of the cache; nothing is evicted. A shader hot reload
//! changes bytecode, so it produces new fingerprints and new entries next to
//! the old ones.

use super::builder::{ComputePipelineDesc, GraphicsPipelineDesc};
use super::fingerprint::PipelineFingerprint;
use super::CompileError;
use crate::backend::{BackendResult, GraphicsBackend, NativePipeline, NativeSignature};
use std::collections::HashMap;

/// Identifier of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u32);

impl PipelineId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineEntry {
    pub fingerprint: PipelineFingerprint,
    pub pipeline: NativePipeline,
    pub signature: NativeSignature,
}

/// Counters exposed to overlays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Native compilations that succeeded
    pub compiles: u64,
    pub failures: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: Vec<PipelineEntry>,
    lookup: HashMap<PipelineFingerprint, PipelineId>,
    stats: CacheStats,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pipeline for `desc`, compiling it on first use
    pub fn get_or_create<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, CompileError> {
        self.get_or_insert(desc.fingerprint(), &desc.name, desc.signature, || {
            backend.compile_graphics_pipeline(desc)
        })
    }

    /// Return the compute pipeline for `desc`, compiling it on first use
    pub fn get_or_create_compute<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        desc: &ComputePipelineDesc,
    ) -> Result<PipelineId, CompileError> {
        self.get_or_insert(desc.fingerprint(), &desc.name, desc.signature, || {
            backend.compile_compute_pipeline(desc)
        })
    }

    fn get_or_insert(
        &mut self,
        fingerprint: PipelineFingerprint,
        name: &str,
        signature: NativeSignature,
        compile: impl FnOnce() -> BackendResult<NativePipeline>,
    ) -> Result<PipelineId, CompileError> {
        if let Some(&id) = self.lookup.get(&fingerprint) {
            self.stats.hits += 1;
            log::info!("Cache hit for pipeline '{}' ({})", name, fingerprint);
            return Ok(id);
        }

        self.stats.misses += 1;
        let pipeline = match compile() {
            Ok(pipeline) => pipeline,
            Err(source) => {
                self.stats.failures += 1;
                log::error!("Can't compile pipeline '{}': {}", name, source);
                return Err(CompileError::Native {
                    pipeline: name.to_string(),
                    source,
                });
            }
        };

        let id = PipelineId(self.entries.len() as u32);
        self.entries.push(PipelineEntry {
            fingerprint,
            pipeline,
            signature,
        });
        self.lookup.insert(fingerprint, id);
        self.stats.compiles += 1;
        self.stats.entries = self.entries.len();

        log::info!("Compiled pipeline '{}' ({}) as {:?}", name, fingerprint, id);
        Ok(id)
    }

    /// Native pipeline and binding signature of a cached entry
    pub fn resolve(&self, id: PipelineId) -> Option<(NativePipeline, NativeSignature)> {
        self.entries
            .get(id.index())
            .map(|entry| (entry.pipeline, entry.signature))
    }

    pub fn entry(&self, id: PipelineId) -> Option<&PipelineEntry> {
        self.entries.get(id.index())
    }

    pub fn find(&self, fingerprint: PipelineFingerprint) -> Option<PipelineId> {
        self.lookup.get(&fingerprint).copied()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        CullMode, DummyBackend, RasterizerState, ShaderStage, TextureFormat, TopologyClass,
    };
    use crate::pipeline::{BindingSignatureDesc, GraphicsPipelineBuilder};
    use crate::shader::ShaderBytecode;

    fn desc(backend: &mut DummyBackend, name: &str, cull_mode: CullMode) -> GraphicsPipelineDesc {
        let signature = backend
            .create_binding_signature(&BindingSignatureDesc::new("test"))
            .unwrap();
        GraphicsPipelineBuilder::new(name)
            .with_signature(signature)
            .with_shader(ShaderBytecode::new(ShaderStage::Vertex, "vs_main", vec![3; 8]))
            .with_rasterizer(RasterizerState::default().with_cull_mode(cull_mode))
            .with_topology(TopologyClass::Triangle)
            .with_render_targets(&[TextureFormat::Rgba16Float])
            .build()
            .unwrap()
    }

    #[test]
    fn test_identical_configurations_compile_once() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();

        let a = desc(&mut backend, "first", CullMode::Back);
        let b = GraphicsPipelineDesc {
            name: "second".to_string(),
            ..a.clone()
        };

        let id_a = cache.get_or_create(&mut backend, &a).unwrap();
        let id_b = cache.get_or_create(&mut backend, &b).unwrap();

        assert_eq!(id_a, id_b);
        assert_eq!(backend.pipeline_compile_count(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                compiles: 1,
                failures: 0,
                entries: 1,
            }
        );
    }

    #[test]
    fn test_one_field_difference_gives_distinct_entries() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();

        let back = desc(&mut backend, "back", CullMode::Back);
        let front = GraphicsPipelineDesc {
            rasterizer: back.rasterizer.with_cull_mode(CullMode::Front),
            ..back.clone()
        };

        let id_back = cache.get_or_create(&mut backend, &back).unwrap();
        let id_front = cache.get_or_create(&mut backend, &front).unwrap();

        assert_ne!(id_back, id_front);
        assert_ne!(back.fingerprint(), front.fingerprint());
        assert_eq!(cache.len(), 2);
        assert_eq!(backend.pipeline_compile_count(), 2);
    }

    #[test]
    fn test_failed_compile_leaves_cache_untouched() {
        let mut backend = DummyBackend::new();
        backend.fail_pipeline("broken");
        let mut cache = PipelineCache::new();

        let broken = desc(&mut backend, "broken", CullMode::None);
        let err = cache.get_or_create(&mut backend, &broken).unwrap_err();

        assert!(matches!(err, CompileError::Native { ref pipeline, .. } if pipeline == "broken"));
        assert!(cache.is_empty());
        assert_eq!(cache.find(broken.fingerprint()), None);
        assert_eq!(cache.stats().failures, 1);

        // The same configuration compiles once the failure goes away
        backend.clear_pipeline_failures();
        let id = cache.get_or_create(&mut backend, &broken).unwrap();
        assert!(cache.resolve(id).is_some());
    }

    #[test]
    fn test_resolve_returns_signature() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let d = desc(&mut backend, "p", CullMode::Back);

        let id = cache.get_or_create(&mut backend, &d).unwrap();
        let (_, signature) = cache.resolve(id).unwrap();
        assert_eq!(signature, d.signature);
        assert_eq!(cache.resolve(PipelineId(42)), None);
    }
}

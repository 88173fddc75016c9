//! Compiled-stage cache.
//!
//! Entries are weak: a stage stays cached only while some pipeline still
//! holds the [`Rc`] handed out by [`ShaderCache::insert`] or
//! [`ShaderCache::get`].

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::CompiledShader;
use super::spirv::SpirvVersion;
use crate::backend::RenderingBackend;
use crate::hash::fnv1a64;
use crate::options::CrossCompileTarget;
use crate::shader::types::ShaderStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub stage: ShaderStage,
    pub source_hash: u64,
    pub backend: RenderingBackend,
    pub spirv_version: SpirvVersion,
    pub cross_compile: Option<CrossCompileTarget>,
}

impl CacheKey {
    pub fn new(
        stage: ShaderStage,
        source: &str,
        backend: RenderingBackend,
        spirv_version: SpirvVersion,
        cross_compile: Option<CrossCompileTarget>,
    ) -> Self {
        CacheKey {
            stage,
            source_hash: fnv1a64(source.as_bytes()),
            backend,
            spirv_version,
            cross_compile,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<CacheKey, Weak<CompiledShader>>,
    hits: u64,
    misses: u64,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Rc<CompiledShader>> {
        match self.entries.get(key).and_then(Weak::upgrade) {
            Some(shader) => {
                self.hits += 1;
                debug!(stage = %key.stage, hash = key.source_hash, "shader cache hit");
                Some(shader)
            }
            None => {
                self.misses += 1;
                debug!(stage = %key.stage, hash = key.source_hash, "shader cache miss");
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, shader: CompiledShader) -> Rc<CompiledShader> {
        let shader = Rc::new(shader);
        self.entries.insert(key, Rc::downgrade(&shader));
        shader
    }

    /// Drops entries whose last handle is gone. Returns how many were removed.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Number of entries still alive.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Artifact, ArtifactKind};

    fn shader(stage: ShaderStage) -> CompiledShader {
        CompiledShader {
            stage,
            native: Artifact {
                kind: ArtifactKind::Spirv,
                bytes: vec![0x03, 0x02, 0x23, 0x07],
                entry_point: "main".to_string(),
            },
            cross_compiled: None,
        }
    }

    fn key(stage: ShaderStage, source: &str) -> CacheKey {
        CacheKey::new(stage, source, RenderingBackend::Vulkan, SpirvVersion::V1_0, None)
    }

    #[test]
    fn test_entries_live_while_held() {
        let mut cache = ShaderCache::new();
        let k = key(ShaderStage::Vertex, "void main() {}");
        assert!(cache.get(&k).is_none());
        let held = cache.insert(k, shader(ShaderStage::Vertex));
        let again = cache.get(&k).unwrap();
        assert!(Rc::ptr_eq(&held, &again));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        assert_eq!(cache.len(), 1);

        drop(held);
        drop(again);
        assert!(cache.is_empty());
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.purge(), 0);
    }

    #[test]
    fn test_key_separates_targets() {
        let a = key(ShaderStage::Fragment, "x");
        let b = CacheKey {
            spirv_version: SpirvVersion::V1_3,
            ..a
        };
        let c = key(ShaderStage::Vertex, "x");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, key(ShaderStage::Fragment, "x"));
    }
}

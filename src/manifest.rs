//! Pipeline manifest: the JSON document describing stages and their resources.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::pipeline::traits::PipelineTrait;
use crate::shader::declaration::StorageAccess;
use crate::shader::preprocessor::{ATTRIBUTE_PREFIX, StageSnippet};
use crate::shader::types::{ShaderStage, capitalize_first};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineManifest {
    #[serde(default)]
    pub name: Option<String>,
    pub stages: Vec<StageSource>,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    #[serde(default)]
    pub uniforms: Vec<UniformDecl>,
    #[serde(default)]
    pub samplers: Vec<SamplerDecl>,
    #[serde(default)]
    pub images: Vec<ImageDecl>,
    #[serde(default)]
    pub buffers: Vec<BufferDecl>,
    #[serde(default)]
    pub defines: Vec<DefineDecl>,
    /// `#include` targets by name.
    #[serde(default)]
    pub includes: HashMap<String, String>,
    #[serde(default)]
    pub traits: Vec<PipelineTrait>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StageSource {
    pub stage: ShaderStage,
    #[serde(default)]
    pub source: Option<String>,
    /// Shader file, relative to the manifest.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub pre_main: Vec<String>,
    #[serde(default)]
    pub post_main: Vec<String>,
    #[serde(default)]
    pub output_modifiers: Vec<String>,
}

impl StageSource {
    pub fn inline(stage: ShaderStage, source: impl Into<String>) -> Self {
        StageSource {
            stage,
            source: Some(source.into()),
            path: None,
            pre_main: Vec::new(),
            post_main: Vec::new(),
            output_modifiers: Vec::new(),
        }
    }

    pub fn snippet(&self) -> StageSnippet {
        StageSnippet {
            pre_main: self.pre_main.clone(),
            post_main: self.post_main.clone(),
            output_modifiers: self.output_modifiers.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub divisor: u32,
}

impl AttributeDecl {
    /// `a_model` and `model` both resolve to `Model`.
    pub fn logical_name(&self) -> String {
        let bare = self.name.strip_prefix(ATTRIBUTE_PREFIX).unwrap_or(&self.name);
        capitalize_first(bare)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UniformDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub length: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SamplerDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ImageDecl {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub access: Option<StorageAccess>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferDecl {
    pub name: String,
    #[serde(default)]
    pub access: Option<StorageAccess>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DefineDecl {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// A sampler entry with defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSampler {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub name: String,
    pub ty: String,
    pub format: String,
    pub access: Option<StorageAccess>,
}

impl PipelineManifest {
    pub fn stage(&self, stage: ShaderStage) -> Option<&StageSource> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Samplers with default names (`u_Texture{N}`) and types applied.
    pub fn resolved_samplers(&self) -> Result<Vec<ResolvedSampler>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (i, s) in self.samplers.iter().enumerate() {
            let name = s.name.clone().unwrap_or_else(|| format!("u_Texture{i}"));
            if !seen.insert(name.clone()) {
                bail!("sampler \"{name}\" redefined in manifest");
            }
            out.push(ResolvedSampler {
                name,
                ty: s.ty.clone().unwrap_or_else(|| "sampler2D".to_string()),
            });
        }
        Ok(out)
    }

    /// Images with default names (`u_Image{N}`), types and formats applied.
    pub fn resolved_images(&self) -> Result<Vec<ResolvedImage>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (i, img) in self.images.iter().enumerate() {
            let name = img.name.clone().unwrap_or_else(|| format!("u_Image{i}"));
            if !seen.insert(name.clone()) {
                bail!("image \"{name}\" redefined in manifest");
            }
            out.push(ResolvedImage {
                name,
                ty: img.ty.clone().unwrap_or_else(|| "image2D".to_string()),
                format: img.format.clone().unwrap_or_else(|| "rgba8".to_string()),
                access: img.access,
            });
        }
        Ok(out)
    }

    /// Rejects duplicate names inside each manifest table.
    pub fn validate(&self) -> Result<()> {
        let mut stages = HashSet::new();
        for s in &self.stages {
            if !stages.insert(s.stage) {
                bail!("{} stage declared twice in manifest", s.stage);
            }
        }
        let mut names = HashSet::new();
        for a in &self.attributes {
            if !names.insert(a.logical_name()) {
                bail!("attribute \"{}\" redefined in manifest", a.name);
            }
        }
        names.clear();
        for u in &self.uniforms {
            if !names.insert(u.name.clone()) {
                bail!("uniform \"{}\" redefined in manifest", u.name);
            }
        }
        names.clear();
        for b in &self.buffers {
            if !names.insert(b.name.clone()) {
                bail!("buffer \"{}\" redefined in manifest", b.name);
            }
        }
        self.resolved_samplers()?;
        self.resolved_images()?;
        Ok(())
    }

    /// Source text of `stage`; stages loaded from disk carry it after [`load_manifest_from_path`].
    pub fn stage_text(&self, stage: &StageSource) -> Result<String> {
        stage
            .source
            .clone()
            .ok_or_else(|| anyhow!("{} stage has no source (path {:?} not loaded)", stage.stage, stage.path))
    }
}

pub fn parse_manifest(text: &str) -> Result<PipelineManifest> {
    let manifest: PipelineManifest = serde_json::from_str(text).context("invalid pipeline manifest json")?;
    manifest.validate()?;
    Ok(manifest)
}

/// Reads a manifest and loads every stage `path` relative to the manifest's directory.
pub fn load_manifest_from_path(path: impl AsRef<Path>) -> Result<PipelineManifest> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let mut manifest = parse_manifest(&text).with_context(|| format!("in manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for stage in &mut manifest.stages {
        if stage.source.is_some() {
            continue;
        }
        let Some(rel) = stage.path.as_ref() else {
            bail!("{} stage needs either \"source\" or \"path\"", stage.stage);
        };
        let file = base.join(rel);
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read {} shader {}", stage.stage, file.display()))?;
        stage.source = Some(text);
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_defaults() {
        let manifest = parse_manifest(
            r#"{
                "stages": [{"stage": "vertex", "source": "vec4 ark_main(vec3 position) { return vec4(position, 1.0); }"}],
                "attributes": [{"name": "a_Model", "type": "mat4", "divisor": 1}],
                "uniforms": [{"name": "u_Color", "type": "vec4", "value": "1,1,1,1"}],
                "samplers": [{}, {"name": "u_Env", "type": "samplerCube"}],
                "images": [{"format": "rgba16f", "access": "readOnly"}]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.attributes[0].logical_name(), "Model");
        let samplers = manifest.resolved_samplers().unwrap();
        assert_eq!(samplers[0], ResolvedSampler { name: "u_Texture0".into(), ty: "sampler2D".into() });
        assert_eq!(samplers[1].ty, "samplerCube");
        let images = manifest.resolved_images().unwrap();
        assert_eq!(images[0].name, "u_Image0");
        assert_eq!(images[0].access, Some(StorageAccess::ReadOnly));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = parse_manifest(
            r#"{"stages": [], "uniforms": [{"name": "u_A", "type": "float"}, {"name": "u_A", "type": "vec2"}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("uniform \"u_A\" redefined"));

        let err = parse_manifest(r#"{"stages": [], "samplers": [{"name": "u_Texture1"}, {}]}"#).unwrap_err();
        assert!(format!("{err:#}").contains("sampler \"u_Texture1\" redefined"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = parse_manifest(
            r#"{"stages": [{"stage": "fragment", "source": ""}, {"stage": "fragment", "source": ""}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("fragment stage declared twice"));
    }
}

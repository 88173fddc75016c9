//! [`ShaderCompiler`] backed by naga: GLSL 4.50 in, SPIR-V out, and SPIR-V
//! back in for Metal Shading Language.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use naga::back::msl;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

use super::spirv::SpirvVersion;
use super::{Artifact, ArtifactKind, ShaderCompiler};
use crate::backend::RenderingBackend;
use crate::options::CrossCompileTarget;
use crate::shader::types::ShaderStage;

pub const SPIRV_ENTRY_POINT: &str = "main";

#[derive(Debug, Clone)]
pub struct NagaCompiler {
    pub msl_version: (u8, u8),
}

impl Default for NagaCompiler {
    fn default() -> Self {
        NagaCompiler { msl_version: (2, 0) }
    }
}

fn validate(module: &naga::Module) -> Result<ModuleInfo> {
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(module)
        .map_err(|e| anyhow!("validation failed: {e:?}"))
}

/// Parses and validates generated GLSL.
pub fn parse_glsl(source: &str, stage: ShaderStage) -> Result<(naga::Module, ModuleInfo)> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: stage.to_naga(),
        defines: Default::default(),
    };
    let module = frontend
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))?;
    let info = validate(&module)?;
    Ok((module, info))
}

pub fn write_spirv(
    module: &naga::Module,
    info: &ModuleInfo,
    stage: ShaderStage,
    version: SpirvVersion,
) -> Result<Vec<u8>> {
    let options = naga::back::spv::Options {
        lang_version: version.lang_version(),
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };
    let pipeline = naga::back::spv::PipelineOptions {
        shader_stage: stage.to_naga(),
        entry_point: SPIRV_ENTRY_POINT.to_string(),
    };
    let words = naga::back::spv::write_vec(module, info, &options, Some(&pipeline))
        .map_err(|e| anyhow!("SPIR-V writer failed: {e}"))?;
    Ok(bytemuck::cast_slice::<u32, u8>(&words).to_vec())
}

/// Metal slots per resource kind, in `(group, binding)` order.
fn msl_binding_map(module: &naga::Module) -> BTreeMap<naga::ResourceBinding, msl::BindTarget> {
    let mut bindings: Vec<_> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let rb = var.binding.as_ref()?;
            Some((rb.clone(), module.types[var.ty].inner.clone()))
        })
        .collect();
    bindings.sort_by_key(|(rb, _)| (rb.group, rb.binding));

    let mut map = BTreeMap::new();
    let (mut texture, mut buffer, mut sampler) = (0u8, 0u8, 0u8);
    for (rb, inner) in bindings {
        if map.contains_key(&rb) {
            continue;
        }
        let target = match inner {
            naga::TypeInner::Image { .. } => {
                texture += 1;
                msl::BindTarget {
                    texture: Some(texture - 1),
                    ..Default::default()
                }
            }
            naga::TypeInner::Sampler { .. } => {
                sampler += 1;
                msl::BindTarget {
                    sampler: Some(msl::BindSamplerTarget::Resource(sampler - 1)),
                    ..Default::default()
                }
            }
            _ => {
                buffer += 1;
                msl::BindTarget {
                    buffer: Some(buffer - 1),
                    ..Default::default()
                }
            }
        };
        map.insert(rb, target);
    }
    map
}

impl ShaderCompiler for NagaCompiler {
    fn compile(
        &self,
        source: &str,
        stage: ShaderStage,
        backend: RenderingBackend,
        spirv: SpirvVersion,
    ) -> Result<Artifact> {
        if !backend.compiles_to_spirv() {
            // naga's GLSL front end only reads desktop 4.x, so ES text ships as-is
            return Ok(Artifact {
                kind: ArtifactKind::GlslSource,
                bytes: source.as_bytes().to_vec(),
                entry_point: SPIRV_ENTRY_POINT.to_string(),
            });
        }
        let (module, info) = parse_glsl(source, stage)?;
        let bytes = write_spirv(&module, &info, stage, spirv)?;
        Ok(Artifact {
            kind: ArtifactKind::Spirv,
            bytes,
            entry_point: SPIRV_ENTRY_POINT.to_string(),
        })
    }

    fn cross_compile(&self, spirv: &[u8], stage: ShaderStage, target: CrossCompileTarget) -> Result<Artifact> {
        match target {
            CrossCompileTarget::Msl => {}
        }
        let module = naga::front::spv::parse_u8_slice(spirv, &naga::front::spv::Options::default())
            .map_err(|e| anyhow!("SPIR-V reflection failed: {e}"))?;
        let info = validate(&module)?;
        if !module.entry_points.iter().any(|ep| ep.stage == stage.to_naga()) {
            bail!("SPIR-V module has no {stage} entry point");
        }

        let resources = msl_binding_map(&module);
        let per_entry_point_map = module
            .entry_points
            .iter()
            .map(|ep| {
                (
                    ep.name.clone(),
                    msl::EntryPointResources {
                        resources: resources.clone(),
                        push_constant_buffer: None,
                        sizes_buffer: None,
                    },
                )
            })
            .collect();
        let options = msl::Options {
            lang_version: self.msl_version,
            per_entry_point_map,
            fake_missing_bindings: true,
            ..Default::default()
        };
        let (source, translation) = msl::write_string(&module, &info, &options, &msl::PipelineOptions::default())
            .map_err(|e| anyhow!("MSL writer failed: {e}"))?;
        // Metal renames `main`; the reflected name is the one to bind
        let entry_point = module
            .entry_points
            .iter()
            .zip(&translation.entry_point_names)
            .find(|(ep, _)| ep.stage == stage.to_naga())
            .and_then(|(_, name)| name.as_ref().ok().cloned())
            .ok_or_else(|| anyhow!("MSL writer produced no {stage} entry point"))?;
        Ok(Artifact {
            kind: ArtifactKind::Msl,
            bytes: source.into_bytes(),
            entry_point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = "#version 450\nlayout(location = 0) in vec2 v_Uv;\nlayout(set = 1, binding = 0) uniform UBO0 {\n    vec4 u_Tint;\n};\nlayout(location = 0) out vec4 FragColor;\nvec4 ark_main() { return vec4(v_Uv, 0.0, 1.0) * u_Tint; }\nvoid main() {\n    FragColor = ark_main();\n}\n";

    #[test]
    fn test_compile_to_spirv() {
        let artifact = NagaCompiler::default()
            .compile(FRAGMENT, ShaderStage::Fragment, RenderingBackend::Vulkan, SpirvVersion::V1_3)
            .unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Spirv);
        assert_eq!(&artifact.bytes[..4], &0x0723_0203u32.to_le_bytes());
        // version word: 0x00010300 for 1.3
        assert_eq!(&artifact.bytes[4..8], &0x0001_0300u32.to_le_bytes());
    }

    #[test]
    fn test_cross_compile_to_msl() {
        let compiler = NagaCompiler::default();
        let spirv = compiler
            .compile(FRAGMENT, ShaderStage::Fragment, RenderingBackend::Vulkan, SpirvVersion::V1_0)
            .unwrap();
        let msl = compiler
            .cross_compile(&spirv.bytes, ShaderStage::Fragment, CrossCompileTarget::Msl)
            .unwrap();
        assert_eq!(msl.kind, ArtifactKind::Msl);
        let text = String::from_utf8(msl.bytes).unwrap();
        assert!(text.contains("fragment"));
        assert!(!msl.entry_point.is_empty());
        assert!(text.contains(&msl.entry_point));
    }

    #[test]
    fn test_gles_text_passes_through() {
        let src = "#version 300 es\nvoid main() {}\n";
        let artifact = NagaCompiler::default()
            .compile(src, ShaderStage::Vertex, RenderingBackend::OpenGl, SpirvVersion::V1_0)
            .unwrap();
        assert_eq!(artifact.kind, ArtifactKind::GlslSource);
        assert_eq!(artifact.bytes, src.as_bytes());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = NagaCompiler::default()
            .compile("#version 450\nvoid main() { undefined_call(); }\n", ShaderStage::Vertex, RenderingBackend::Vulkan, SpirvVersion::V1_0)
            .unwrap_err();
        assert!(format!("{err:#}").contains("GLSL parse failed"));
    }
}

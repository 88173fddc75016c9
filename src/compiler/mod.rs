//! Native compile and cross-compile bridge.
//!
//! [`generate_pipeline_sources`] runs the backend-independent build plus a
//! backend policy and renders the final GLSL. [`build_pipeline`] then hands
//! each stage to a [`ShaderCompiler`], reusing cached stages where possible.

pub mod cache;
pub mod naga_compiler;
pub mod spirv;

use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::backend::{LayoutAssignment, RenderingBackend, bgfx, policy_for, render_stage};
use crate::manifest::PipelineManifest;
use crate::options::{CrossCompileTarget, PipelineBuildOptions};
use crate::pipeline::attribute::Attribute;
use crate::pipeline::building_context::PipelineBuildingContext;
use crate::pipeline::layout::PipelineLayout;
use crate::pipeline::traits::PipelineTrait;
use crate::shader::types::ShaderStage;
use cache::{CacheKey, ShaderCache};
use spirv::SpirvVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    GlslSource,
    Spirv,
    BgfxContainer,
    Msl,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::GlslSource => "glsl",
            ArtifactKind::Spirv => "spv",
            ArtifactKind::BgfxContainer => "bin",
            ArtifactKind::Msl => "metal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
    pub entry_point: String,
}

/// One compiled stage, shared between pipelines through [`ShaderCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub native: Artifact,
    pub cross_compiled: Option<Artifact>,
}

pub trait ShaderCompiler {
    /// Compiles final GLSL for `backend`.
    fn compile(&self, source: &str, stage: ShaderStage, backend: RenderingBackend, spirv: SpirvVersion)
    -> Result<Artifact>;

    /// Turns SPIR-V into a backend-native shader, reading bindings from the binary.
    fn cross_compile(&self, spirv: &[u8], stage: ShaderStage, target: CrossCompileTarget) -> Result<Artifact>;
}

/// Final GLSL for every stage plus the state that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedPipeline {
    pub context: PipelineBuildingContext,
    pub assignment: LayoutAssignment,
    pub sources: Vec<(ShaderStage, String)>,
}

impl GeneratedPipeline {
    pub fn source(&self, stage: ShaderStage) -> Option<&str> {
        self.sources.iter().find(|(s, _)| *s == stage).map(|(_, text)| text.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub source: String,
    pub shader: Rc<CompiledShader>,
}

#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    pub name: Option<String>,
    pub backend: RenderingBackend,
    pub layout: PipelineLayout,
    pub attributes: Vec<Attribute>,
    pub traits: Vec<PipelineTrait>,
    pub stages: Vec<CompiledStage>,
}

impl CompiledPipeline {
    pub fn stage(&self, stage: ShaderStage) -> Option<&CompiledStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Every stage, line-numbered, under a `// <stage> stage` header.
pub fn dump_sources(sources: &[(ShaderStage, String)]) -> String {
    let mut out = String::new();
    for (stage, text) in sources {
        out.push_str(&format!("// {stage} stage\n"));
        for (line_num, line) in text.lines().enumerate() {
            out.push_str(&format!("{:4} | {}\n", line_num + 1, line));
        }
    }
    out
}

pub fn generate_pipeline_sources(manifest: &PipelineManifest, backend: RenderingBackend) -> Result<GeneratedPipeline> {
    let policy = policy_for(backend);
    policy.validate_traits(&manifest.traits)?;
    let context = PipelineBuildingContext::new(manifest, policy.limits())?;
    let assignment = policy
        .assign(&context)
        .with_context(|| format!("assigning {backend} layout"))?;
    let mut sources = Vec::with_capacity(assignment.stages.len());
    for ann in &assignment.stages {
        let text = render_stage(&context, &assignment.layout, ann)
            .with_context(|| format!("rendering {} stage", ann.stage))?;
        sources.push((ann.stage, text));
    }
    Ok(GeneratedPipeline {
        context,
        assignment,
        sources,
    })
}

fn compile_stage(
    compiler: &dyn ShaderCompiler,
    generated: &GeneratedPipeline,
    stage: ShaderStage,
    source: &str,
    options: &PipelineBuildOptions,
) -> Result<CompiledShader> {
    let backend = options.backend;
    let mut native = compiler.compile(source, stage, backend, options.spirv())?;
    let cross_compiled = match options.cross_compile {
        Some(target) => {
            if native.kind != ArtifactKind::Spirv {
                bail!("cross-compiling to {target} needs a SPIR-V backend, not {backend}");
            }
            Some(compiler.cross_compile(&native.bytes, stage, target)?)
        }
        None => None,
    };
    if backend == RenderingBackend::Bgfx {
        let ann = generated
            .assignment
            .stage(stage)
            .ok_or_else(|| anyhow!("no layout for {stage} stage"))?;
        native.bytes = bgfx::serialize_container(stage, &ann.uniform_table, &native.bytes)?;
        native.kind = ArtifactKind::BgfxContainer;
    }
    Ok(CompiledShader {
        stage,
        native,
        cross_compiled,
    })
}

/// Generates, compiles and caches every stage of `manifest`.
///
/// A compile failure carries the compiler's diagnostic followed by the
/// complete generated source of every stage.
pub fn build_pipeline(
    manifest: &PipelineManifest,
    options: &PipelineBuildOptions,
    compiler: &dyn ShaderCompiler,
    cache: &mut ShaderCache,
) -> Result<CompiledPipeline> {
    let generated = generate_pipeline_sources(manifest, options.backend)?;
    let mut stages = Vec::with_capacity(generated.sources.len());
    for (stage, source) in &generated.sources {
        let key = CacheKey::new(*stage, source, options.backend, options.spirv(), options.cross_compile);
        let shader = match cache.get(&key) {
            Some(shader) => shader,
            None => {
                let compiled = compile_stage(compiler, &generated, *stage, source, options).map_err(|e| {
                    anyhow!(
                        "{stage} stage failed to compile: {e:#}\n{}",
                        dump_sources(&generated.sources)
                    )
                })?;
                debug!(stage = %stage, bytes = compiled.native.bytes.len(), "compiled shader stage");
                cache.insert(key, compiled)
            }
        };
        stages.push(CompiledStage {
            stage: *stage,
            source: source.clone(),
            shader,
        });
    }
    info!(
        pipeline = manifest.name.as_deref().unwrap_or("<unnamed>"),
        backend = %options.backend,
        stages = stages.len(),
        "pipeline built"
    );
    let GeneratedPipeline {
        context, assignment, ..
    } = generated;
    Ok(CompiledPipeline {
        name: manifest.name.clone(),
        backend: options.backend,
        layout: assignment.layout,
        attributes: context.attributes().to_vec(),
        traits: context.traits.clone(),
        stages,
    })
}

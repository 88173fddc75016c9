//! Backend layout policies.
//!
//! A policy reads the stage-agnostic [`PipelineBuildingContext`] and returns a
//! [`LayoutAssignment`]: per-stage annotations (GLSL version, macros, layout
//! qualifiers keyed by declaration name) plus a copy of the pipeline layout
//! with concrete binding numbers. The context itself is never mutated.
//!
//! Submodules:
//! - `opengl`: OpenGL ES 3, locations for attributes, name-matched uniforms
//! - `vulkan`: set/binding pairs, matched varying locations
//! - `bgfx`: Vulkan-style SPIR-V plus the binary shader container
//! - `sdl3_gpu`: SDL3 GPU resource sets and split samplers
//! - `render`: phase-two text generation

pub mod bgfx;
pub mod opengl;
pub mod render;
pub mod sdl3_gpu;
pub mod vulkan;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::pipeline::building_context::{FRAG_COLOR, PipelineBuildingContext};
use crate::pipeline::layout::{LayoutLimits, PipelineLayout};
use crate::pipeline::traits::PipelineTrait;
use crate::shader::declaration::{DeclarationList, LayoutQualifier, StorageAccess};
use crate::shader::preprocessor::ShaderPreprocessor;
use crate::shader::types::{ShaderStage, location_count};

pub use render::render_stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderingBackend {
    OpenGl,
    Vulkan,
    Bgfx,
    Sdl3Gpu,
}

impl RenderingBackend {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "opengl" | "gles3" | "opengl-es3" | "gl" => Ok(RenderingBackend::OpenGl),
            "vulkan" | "vk" => Ok(RenderingBackend::Vulkan),
            "bgfx" => Ok(RenderingBackend::Bgfx),
            "sdl3" | "sdl3-gpu" | "sdl3gpu" => Ok(RenderingBackend::Sdl3Gpu),
            other => bail!("unknown rendering backend '{other}' (expected opengl, vulkan, bgfx or sdl3)"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderingBackend::OpenGl => "opengl-es3",
            RenderingBackend::Vulkan => "vulkan",
            RenderingBackend::Bgfx => "bgfx",
            RenderingBackend::Sdl3Gpu => "sdl3-gpu",
        }
    }

    /// Whether the native artifact is SPIR-V rather than GLSL text.
    pub fn compiles_to_spirv(self) -> bool {
        !matches!(self, RenderingBackend::OpenGl)
    }
}

impl fmt::Display for RenderingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage's uniforms are emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformStyle {
    /// One `uniform T name;` per uniform, matched by name.
    Loose,
    /// The stage's UBO as an anonymous-instance block with this qualifier.
    Block(LayoutQualifier),
}

/// One entry of the bgfx binary uniform table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformRecord {
    pub name: String,
    pub ty: u8,
    pub num: u8,
    pub reg_index: u16,
    pub reg_count: u16,
    pub tex_info: u16,
    pub tex_format: u16,
}

/// Everything a policy decided for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAnnotations {
    pub stage: ShaderStage,
    pub version: String,
    /// Lines emitted right after `#version` (macros, precision statements).
    pub macros: Vec<String>,
    pub inputs: HashMap<String, LayoutQualifier>,
    pub outputs: HashMap<String, LayoutQualifier>,
    pub uniforms: UniformStyle,
    pub samplers: HashMap<String, LayoutQualifier>,
    pub images: HashMap<String, LayoutQualifier>,
    pub buffers: HashMap<String, LayoutQualifier>,
    /// Explicit storage qualifiers that override what the source wrote.
    pub access: HashMap<String, StorageAccess>,
    /// Emit `textureX`/`sampler` pairs stitched back by a macro.
    pub split_samplers: bool,
    /// Qualifiers for the `sampler` half of each split pair, keyed by sampler name.
    pub sampler_objects: HashMap<String, LayoutQualifier>,
    /// Declare matrix vertex inputs as one vector per column.
    pub split_matrix_inputs: bool,
    /// Values for `${name}` markers.
    pub annotations: BTreeMap<String, String>,
    pub uniform_table: Vec<UniformRecord>,
}

impl StageAnnotations {
    pub fn new(stage: ShaderStage, version: impl Into<String>) -> Self {
        StageAnnotations {
            stage,
            version: version.into(),
            macros: Vec::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            uniforms: UniformStyle::Loose,
            samplers: HashMap::new(),
            images: HashMap::new(),
            buffers: HashMap::new(),
            access: HashMap::new(),
            split_samplers: false,
            sampler_objects: HashMap::new(),
            split_matrix_inputs: false,
            annotations: standard_annotations(),
            uniform_table: Vec::new(),
        }
    }
}

/// A policy's answer for a whole pipeline.
#[derive(Debug, Clone)]
pub struct LayoutAssignment {
    pub backend: RenderingBackend,
    pub layout: PipelineLayout,
    pub stages: Vec<StageAnnotations>,
}

impl LayoutAssignment {
    pub fn stage(&self, stage: ShaderStage) -> Option<&StageAnnotations> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

pub trait BackendLayoutPolicy {
    fn backend(&self) -> RenderingBackend;

    fn limits(&self) -> LayoutLimits;

    /// Rejects fixed-function state the target API cannot express.
    fn validate_traits(&self, traits: &[PipelineTrait]) -> Result<()>;

    fn assign(&self, ctx: &PipelineBuildingContext) -> Result<LayoutAssignment>;
}

pub fn policy_for(backend: RenderingBackend) -> Box<dyn BackendLayoutPolicy> {
    match backend {
        RenderingBackend::OpenGl => Box::new(opengl::OpenGlEs3Policy),
        RenderingBackend::Vulkan => Box::new(vulkan::VulkanPolicy),
        RenderingBackend::Bgfx => Box::new(bgfx::BgfxPolicy),
        RenderingBackend::Sdl3Gpu => Box::new(sdl3_gpu::Sdl3GpuPolicy),
    }
}

pub fn standard_annotations() -> BTreeMap<String, String> {
    [
        ("vert.in", "in"),
        ("vert.out", "out"),
        ("frag.in", "in"),
        ("frag.out", "out"),
        ("frag.color", FRAG_COLOR),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Sequential attribute locations, grouped by stream divisor in stream order.
pub fn vertex_input_locations(ctx: &PipelineBuildingContext, vertex: &ShaderPreprocessor) -> HashMap<String, LayoutQualifier> {
    let mut out = HashMap::new();
    let mut next = 0;
    for stream in ctx.layout.streams.values() {
        for attribute in stream.attributes() {
            if let Some(decl) = vertex.ins.get(&attribute.name) {
                out.insert(decl.name.clone(), LayoutQualifier::location(next));
                next += location_count(&decl.ty) * decl.length;
            }
        }
    }
    for decl in vertex.ins.iter() {
        if !out.contains_key(&decl.name) {
            out.insert(decl.name.clone(), LayoutQualifier::location(next));
            next += location_count(&decl.ty) * decl.length;
        }
    }
    out
}

/// Matching locations for a producer's outputs and a consumer's inputs.
///
/// Consumer inputs are numbered in declaration order; outputs nobody reads
/// are numbered after them so they never collide.
pub fn varying_locations(
    producer: &ShaderPreprocessor,
    consumer: Option<&ShaderPreprocessor>,
) -> (HashMap<String, LayoutQualifier>, HashMap<String, LayoutQualifier>) {
    let mut outs = HashMap::new();
    let mut ins = HashMap::new();
    let mut next = 0;
    if let Some(consumer) = consumer {
        for decl in consumer.ins.iter() {
            ins.insert(decl.name.clone(), LayoutQualifier::location(next));
            if producer.outs.has(&decl.name) {
                outs.insert(decl.name.clone(), LayoutQualifier::location(next));
            }
            next += location_count(&decl.ty) * decl.length;
        }
    }
    for decl in producer.outs.iter() {
        if !outs.contains_key(&decl.name) {
            outs.insert(decl.name.clone(), LayoutQualifier::location(next));
            next += location_count(&decl.ty) * decl.length;
        }
    }
    (outs, ins)
}

pub fn sequential_locations(list: &DeclarationList) -> HashMap<String, LayoutQualifier> {
    let mut out = HashMap::new();
    let mut next = 0;
    for decl in list.iter() {
        out.insert(decl.name.clone(), LayoutQualifier::location(next));
        next += location_count(&decl.ty) * decl.length;
    }
    out
}

/// `FragColor` at 0, additional colour outputs from 1.
pub fn fragment_output_locations(fragment: &ShaderPreprocessor) -> HashMap<String, LayoutQualifier> {
    let mut out = HashMap::new();
    out.insert(FRAG_COLOR.to_string(), LayoutQualifier::location(0));
    let mut next = 1;
    for decl in fragment.outs.iter().filter(|d| d.name != FRAG_COLOR) {
        out.insert(decl.name.clone(), LayoutQualifier::location(next));
        next += 1;
    }
    out
}

/// Attribute and varying locations shared by every backend with explicit locations.
pub fn assign_io_locations(ctx: &PipelineBuildingContext, annotations: &mut [StageAnnotations]) {
    let vertex = ctx.stage(ShaderStage::Vertex).filter(|s| !s.is_verbatim());
    let fragment = ctx.stage(ShaderStage::Fragment).filter(|s| !s.is_verbatim());
    for ann in annotations.iter_mut() {
        match ann.stage {
            ShaderStage::Vertex => {
                if let Some(vertex) = vertex {
                    ann.inputs = vertex_input_locations(ctx, vertex);
                    ann.outputs = varying_locations(vertex, fragment).0;
                }
            }
            ShaderStage::Fragment => {
                if let Some(fragment) = fragment {
                    if let Some(vertex) = vertex {
                        ann.inputs = varying_locations(vertex, Some(fragment)).1;
                    } else {
                        ann.inputs = sequential_locations(&fragment.ins);
                    }
                    ann.outputs = fragment_output_locations(fragment);
                }
            }
            ShaderStage::Compute => {}
        }
    }
}

/// Texture and sampler qualifiers for every sampler `stage` uses, as split pairs.
///
/// Textures keep their assigned binding. Sampler objects are numbered from
/// `sampler_base` in texture binding order, so `sampler_base` must lie past
/// every other binding in `set`.
pub fn split_sampler_qualifiers(
    ann: &mut StageAnnotations,
    layout: &PipelineLayout,
    set: u32,
    texture_base: u32,
    sampler_base: u32,
) {
    ann.split_samplers = true;
    for d in layout.samplers.used_by(ann.stage) {
        let Some(binding) = d.binding() else { continue };
        ann.samplers.insert(d.name.clone(), LayoutQualifier::binding(Some(set), binding));
        ann.sampler_objects.insert(
            d.name.clone(),
            LayoutQualifier::binding(Some(set), sampler_base + binding.saturating_sub(texture_base)),
        );
    }
}

/// Fails when the pipeline needs more descriptors of one kind than `available`.
pub fn check_capacity(backend: RenderingBackend, what: &str, requested: usize, available: usize) -> Result<()> {
    if requested > available {
        bail!("{what} capacity exceeded on {backend}: {requested} requested, backend provides {available} slots");
    }
    Ok(())
}

/// Layout qualifier entries for a storage image: its format.
pub fn image_format(ctx: &PipelineBuildingContext, stage: ShaderStage, name: &str) -> String {
    ctx.stage(stage)
        .and_then(|s| s.images.get(name))
        .and_then(|d| d.format.clone())
        .unwrap_or_else(|| "rgba8".to_string())
}

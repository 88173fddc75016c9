//! Cross-stage orchestration: makes every stage's declarations consistent
//! and derives the stage-agnostic [`PipelineLayout`] before a backend policy
//! assigns concrete numbers.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, warn};

use super::attribute::{Attribute, AttributeUsage, glsl_type_of};
use super::layout::{LayoutLimits, PipelineLayout, VERTEX_STREAM_ALIGNMENT};
use super::stream_layout::StreamLayout;
use super::traits::PipelineTrait;
use super::uniform::{Ubo, Uniform, UniformType};
use crate::manifest::{PipelineManifest, ResolvedImage, ResolvedSampler};
use crate::shader::declaration::{Declaration, DeclarationOrigin, StorageAccess};
use crate::shader::preprocessor::{ATTRIBUTE_PREFIX, ShaderPreprocessor};
use crate::shader::types::ShaderStage;

/// Name of the primary fragment colour output.
pub const FRAG_COLOR: &str = "FragColor";

/// Camera matrices every stage may reference without declaring them.
pub const PREDEFINED_UNIFORMS: &[(&str, UniformType)] = &[
    ("u_VP", UniformType::Mat4),
    ("u_View", UniformType::Mat4),
    ("u_Projection", UniformType::Mat4),
];

#[derive(Debug, Clone)]
pub struct PipelineBuildingContext {
    stages: Vec<ShaderPreprocessor>,
    attributes: Vec<Attribute>,
    uniforms: Vec<Uniform>,
    pub layout: PipelineLayout,
    pub limits: LayoutLimits,
    pub defines: Vec<(String, Option<String>)>,
    pub traits: Vec<PipelineTrait>,
}

impl PipelineBuildingContext {
    /// Runs the whole single-pass build for `manifest` under `limits`.
    pub fn new(manifest: &PipelineManifest, limits: LayoutLimits) -> Result<Self> {
        manifest.validate()?;
        check_stage_combination(manifest)?;

        let mut sources = manifest.stages.clone();
        sources.sort_by_key(|s| s.stage);
        let mut stages = Vec::with_capacity(sources.len());
        for source in &sources {
            let text = manifest.stage_text(source)?;
            let pre = ShaderPreprocessor::parse(source.stage, &text, &manifest.includes, source.snippet())
                .with_context(|| format!("while parsing {} stage", source.stage))?;
            stages.push(pre);
        }

        let mut ctx = PipelineBuildingContext {
            stages,
            attributes: Vec::new(),
            uniforms: Vec::new(),
            layout: PipelineLayout::default(),
            limits,
            defines: manifest.defines.iter().map(|d| (d.name.clone(), d.value.clone())).collect(),
            traits: manifest.traits.clone(),
        };
        ctx.initialize_attributes(manifest)?;
        ctx.initialize_streams()?;
        ctx.initialize_uniforms(manifest)?;
        ctx.initialize_ubos()?;
        ctx.initialize_descriptors(manifest)?;
        ctx.layout.color_attachment_count = ctx
            .stage(ShaderStage::Fragment)
            .map(ShaderPreprocessor::color_output_count)
            .unwrap_or(0);
        debug!(
            stages = ctx.stages.len(),
            attributes = ctx.attributes.len(),
            ubos = ctx.layout.ubos.len(),
            samplers = ctx.layout.samplers.len(),
            "pipeline declarations resolved"
        );
        Ok(ctx)
    }

    pub fn stages(&self) -> &[ShaderPreprocessor] {
        &self.stages
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&ShaderPreprocessor> {
        self.stages.iter().find(|s| s.stage() == stage)
    }

    pub fn stage_order(&self) -> Vec<ShaderStage> {
        self.stages.iter().map(ShaderPreprocessor::stage).collect()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    /// Registers an attribute, merging with an existing record of the same name.
    fn add_attribute(&mut self, name: &str, ty: &str, divisor: u32) -> Result<()> {
        if let Some(existing) = self.attributes.iter().find(|a| a.name == name) {
            if existing.declared_type != glsl_type_of(ty) {
                bail!(
                    "attribute \"{name}\" declared with conflicting types: \"{}\" vs \"{ty}\"",
                    existing.declared_type
                );
            }
            return Ok(());
        }
        self.attributes.push(Attribute::infer(name, ty, divisor)?);
        Ok(())
    }

    fn initialize_attributes(&mut self, manifest: &PipelineManifest) -> Result<()> {
        let manifest_attrs: HashMap<String, (String, u32)> = manifest
            .attributes
            .iter()
            .map(|a| (a.logical_name(), (a.ty.clone(), a.divisor)))
            .collect();

        let Some(vertex_idx) = self.stages.iter().position(|s| s.stage() == ShaderStage::Vertex) else {
            return Ok(());
        };
        if self.stages[vertex_idx].is_verbatim() {
            for a in &manifest.attributes {
                self.add_attribute(&a.logical_name(), &a.ty, a.divisor)?;
            }
            return Ok(());
        }

        // Manifest entries come first so their divisors win.
        for a in &manifest.attributes {
            self.add_attribute(&a.logical_name(), &a.ty, a.divisor)?;
        }

        let declared: Vec<(String, String)> = self.stages[vertex_idx]
            .ins
            .iter()
            .map(|d| (d.name.clone(), d.ty.clone()))
            .collect();
        for (name, ty) in declared {
            let divisor = manifest_attrs.get(&name).map(|(_, d)| *d).unwrap_or(0);
            self.add_attribute(&name, &ty, divisor)
                .with_context(|| format!("vertex input a_{name}"))?;
        }

        let referenced: Vec<String> = self.stages[vertex_idx].referenced_attributes().to_vec();
        for name in referenced {
            if self.stages[vertex_idx].ins.has(&name) {
                continue;
            }
            let ty = resolve_type(&name, &manifest_attrs, &[])
                .ok_or_else(|| anyhow!("cannot infer type of attribute a_{name} used by vertex shader"))?;
            self.stages[vertex_idx].declare_input(&name, &format!("{ATTRIBUTE_PREFIX}{name}"), &ty, DeclarationOrigin::Implicit)?;
            let divisor = manifest_attrs.get(&name).map(|(_, d)| *d).unwrap_or(0);
            self.add_attribute(&name, &ty, divisor)?;
        }

        for a in &manifest.attributes {
            let name = a.logical_name();
            if !self.stages[vertex_idx].ins.has(&name) {
                self.stages[vertex_idx].declare_input(
                    &name,
                    &format!("{ATTRIBUTE_PREFIX}{name}"),
                    glsl_type_of(&a.ty),
                    DeclarationOrigin::Generated,
                )?;
            }
        }

        if let Some(fragment_idx) = self.stages.iter().position(|s| s.stage() == ShaderStage::Fragment) {
            if !self.stages[fragment_idx].is_verbatim() {
                self.link_stages(vertex_idx, fragment_idx, &manifest_attrs)?;
                self.stages[fragment_idx].declare_color_output(FRAG_COLOR)?;
            }
        }

        let vertex = &self.stages[vertex_idx];
        let dangling: Vec<String> = vertex
            .referenced_varyings()
            .iter()
            .filter(|n| !vertex.outs.has(n))
            .cloned()
            .collect();
        for name in dangling {
            let ty = resolve_type(&name, &manifest_attrs, &[])
                .ok_or_else(|| anyhow!("cannot infer type of varying v_{name} written by vertex shader"))?;
            self.stages[vertex_idx].declare_output(&name, &ty, DeclarationOrigin::Generated)?;
        }
        Ok(())
    }

    /// Declares every varying the later stage reads and routes values it
    /// needs but the earlier stage does not compute through as passthroughs.
    fn link_stages(
        &mut self,
        producer_idx: usize,
        consumer_idx: usize,
        manifest_attrs: &HashMap<String, (String, u32)>,
    ) -> Result<()> {
        let consumer = &self.stages[consumer_idx];
        let mut needed: Vec<String> = consumer.ins.names().map(str::to_string).collect();
        for name in consumer.referenced_varyings() {
            if !needed.contains(name) && !consumer.outs.has(name) {
                needed.push(name.clone());
            }
        }

        for name in &needed {
            let producer = &self.stages[producer_idx];
            let consumer = &self.stages[consumer_idx];
            let known = [
                consumer.ins.get(name).map(|d| d.ty.clone()),
                producer.outs.get(name).map(|d| d.ty.clone()),
                producer.ins.get(name).map(|d| d.ty.clone()),
            ];
            let ty = resolve_type(name, manifest_attrs, &known).ok_or_else(|| {
                anyhow!(
                    "cannot infer type of varying v_{name} used by {} shader",
                    consumer.stage()
                )
            })?;

            if !consumer.ins.has(name) {
                self.stages[consumer_idx].declare_input(name, &format!("v_{name}"), &ty, DeclarationOrigin::Generated)?;
            }

            if self.stages[producer_idx].produces(name) {
                self.stages[producer_idx]
                    .declare_output(name, &ty, DeclarationOrigin::Generated)
                    .with_context(|| format!("linking v_{name}"))?;
                continue;
            }

            if !self.stages[producer_idx].ins.has(name) {
                debug!(attribute = %name, "generating attribute for downstream stage");
                self.stages[producer_idx].declare_input(
                    name,
                    &format!("{ATTRIBUTE_PREFIX}{name}"),
                    &ty,
                    DeclarationOrigin::Generated,
                )?;
            }
            let divisor = manifest_attrs.get(name).map(|(_, d)| *d).unwrap_or(0);
            self.add_attribute(name, &ty, divisor)?;
            self.stages[producer_idx]
                .declare_output(name, &ty, DeclarationOrigin::Generated)
                .with_context(|| format!("linking v_{name}"))?;
            self.stages[producer_idx].add_passthrough(name);
        }

        let producer = &self.stages[producer_idx];
        let consumer = &self.stages[consumer_idx];
        for out in producer.outs.iter() {
            if !consumer.ins.has(&out.name) {
                warn!(
                    varying = %out.symbol,
                    "{} output is never read by the {} stage",
                    producer.stage(),
                    consumer.stage()
                );
            }
        }
        Ok(())
    }

    fn initialize_streams(&mut self) -> Result<()> {
        // Custom attributes go last; the sort is stable.
        self.attributes.sort_by_key(|a| a.usage == AttributeUsage::Custom);
        let mut streams = std::collections::BTreeMap::new();
        for attribute in &self.attributes {
            streams
                .entry(attribute.divisor)
                .or_insert_with(|| StreamLayout::new(attribute.divisor))
                .add_attribute(attribute.clone())?;
        }
        for (divisor, stream) in streams.iter_mut() {
            let alignment = if *divisor == 0 {
                VERTEX_STREAM_ALIGNMENT
            } else {
                self.limits.attribute_alignment
            };
            stream.align(alignment);
        }
        for attribute in &mut self.attributes {
            attribute.offset = streams
                .get(&attribute.divisor)
                .and_then(|s| s.get(&attribute.name))
                .and_then(|a| a.offset);
        }
        self.layout.streams = streams;
        Ok(())
    }

    fn register_uniform(&mut self, decl: &Declaration, stage: ShaderStage) -> Result<()> {
        let ty = UniformType::parse(&decl.ty)
            .with_context(|| format!("uniform \"{}\" in {stage} shader", decl.name))?;
        if let Some(existing) = self.uniforms.iter().find(|u| u.name == decl.name) {
            if existing.ty != ty || existing.length != decl.length {
                bail!(
                    "uniform \"{}\" declared with conflicting types: \"{}\" vs \"{}\"",
                    decl.name,
                    existing.ty.glsl_name(),
                    decl.ty
                );
            }
            return Ok(());
        }
        self.uniforms.push(Uniform::new(&decl.name, ty, decl.length));
        Ok(())
    }

    fn initialize_uniforms(&mut self, manifest: &PipelineManifest) -> Result<()> {
        for u in &manifest.uniforms {
            let ty = UniformType::parse(&u.ty).with_context(|| format!("manifest uniform \"{}\"", u.name))?;
            let mut uniform = Uniform::new(&u.name, ty, u.length.unwrap_or(1));
            if let Some(value) = &u.value {
                uniform = uniform.with_value(value)?;
            }
            self.uniforms.push(uniform);
        }
        let samplers = manifest.resolved_samplers()?;
        let images = manifest.resolved_images()?;

        for idx in 0..self.stages.len() {
            if self.stages[idx].is_verbatim() {
                continue;
            }
            let stage = self.stages[idx].stage();

            let declared: Vec<Declaration> = self.stages[idx].uniforms.iter().cloned().collect();
            for decl in &declared {
                self.register_uniform(decl, stage)?;
            }

            let implicit: Vec<Declaration> = self
                .uniforms
                .iter()
                .filter(|u| self.stages[idx].references(&u.name) && !self.stages[idx].uniforms.has(&u.name))
                .map(|u| {
                    Declaration::new(&u.name, &u.name, u.glsl_type())
                        .with_length(u.length)
                        .with_origin(DeclarationOrigin::Implicit)
                })
                .collect();
            for decl in implicit {
                self.stages[idx].uniforms.declare(decl)?;
            }

            for (name, ty) in PREDEFINED_UNIFORMS {
                let pre = &self.stages[idx];
                if pre.references(name) && !pre.uniforms.has(name) {
                    let decl = Declaration::new(*name, *name, ty.glsl_name()).with_origin(DeclarationOrigin::Implicit);
                    self.register_uniform(&decl, stage)?;
                    self.stages[idx].uniforms.declare(decl)?;
                }
            }

            for ResolvedSampler { name, ty } in &samplers {
                if self.stages[idx].references(name) && !self.stages[idx].samplers.has(name) {
                    let decl = Declaration::new(name, name, ty).with_origin(DeclarationOrigin::Implicit);
                    self.stages[idx].samplers.declare(decl)?;
                }
            }

            for ResolvedImage { name, ty, format, access } in &images {
                let pre = &mut self.stages[idx];
                if let Some(existing) = pre.images.get_mut(name) {
                    if existing.format.is_none() {
                        existing.format = Some(format.clone());
                    }
                    if existing.access.is_none() {
                        existing.access = *access;
                    }
                    continue;
                }
                if pre.references(name) {
                    let mut decl = Declaration::new(name, name, ty).with_origin(DeclarationOrigin::Implicit);
                    decl.format = Some(format.clone());
                    decl.access = *access;
                    pre.images.declare(decl)?;
                }
            }
        }

        for u in &manifest.uniforms {
            let used = self.stages.iter().any(|s| s.uniforms.has(&u.name) || s.references(&u.name));
            if !used {
                warn!(uniform = %u.name, "uniform declared in manifest is not used by any stage");
            }
        }
        Ok(())
    }

    fn initialize_ubos(&mut self) -> Result<()> {
        let mut ubos: Vec<Ubo> = Vec::new();
        for pre in &self.stages {
            if pre.uniforms.is_empty() {
                continue;
            }
            let key = Ubo::key_for(pre.uniforms.names());
            let idx = match ubos.iter().position(|u| u.key == key) {
                Some(idx) => idx,
                None => {
                    ubos.push(Ubo::new(ubos.len() as u32, key));
                    ubos.len() - 1
                }
            };
            ubos[idx].add_stage(pre.stage());
            for decl in pre.uniforms.iter() {
                let uniform = self
                    .uniforms
                    .iter()
                    .find(|u| u.name == decl.name)
                    .ok_or_else(|| anyhow!("uniform \"{}\" was never registered", decl.name))?;
                ubos[idx].add_uniform(uniform.clone());
            }
        }
        for ubo in &mut ubos {
            ubo.initialize()?;
        }
        if ubos.len() > self.limits.max_uniform_buffers {
            bail!(
                "uniform buffer capacity exceeded: {} requested, backend provides {} slots",
                ubos.len(),
                self.limits.max_uniform_buffers
            );
        }
        self.layout.ubos = ubos;
        Ok(())
    }

    fn initialize_descriptors(&mut self, manifest: &PipelineManifest) -> Result<()> {
        for pre in &self.stages {
            let stage = pre.stage();
            for decl in pre.samplers.iter() {
                let entry = self.layout.samplers.ensure(&decl.name, &decl.ty);
                if entry.ty != decl.ty {
                    bail!(
                        "sampler \"{}\" declared with conflicting types: \"{}\" vs \"{}\"",
                        decl.name,
                        entry.ty,
                        decl.ty
                    );
                }
                entry.stages.insert(stage);
            }
            for decl in pre.images.iter() {
                let entry = self.layout.images.ensure(&decl.name, &decl.ty);
                entry.stages.insert(stage);
                entry.access = merge_access(entry.access, decl.access);
            }
            for decl in pre.buffers.iter() {
                let Some(declared) = manifest.buffers.iter().find(|b| b.name == decl.name) else {
                    bail!("SSBO \"{}\" does not exist in the pipeline manifest", decl.name);
                };
                let entry = self.layout.ssbos.ensure(&decl.name, "buffer");
                entry.stages.insert(stage);
                entry.access = merge_access(entry.access, decl.access.or(declared.access));
            }
        }
        for b in &manifest.buffers {
            if self.layout.ssbos.get(&b.name).is_none() {
                bail!("SSBO \"{}\" is declared in the manifest but never declared in any stage", b.name);
            }
        }

        let checks = [
            ("sampler", self.layout.samplers.len(), self.limits.max_samplers),
            ("storage image", self.layout.images.len(), self.limits.max_images),
            ("storage buffer", self.layout.ssbos.len(), self.limits.max_storage_buffers),
        ];
        for (what, requested, available) in checks {
            if requested > available {
                bail!("{what} capacity exceeded: {requested} requested, backend provides {available} slots");
            }
        }
        Ok(())
    }
}

fn merge_access(a: Option<StorageAccess>, b: Option<StorageAccess>) -> Option<StorageAccess> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(x), Some(y)) if x == y => Some(x),
        _ => Some(StorageAccess::ReadWrite),
    }
}

/// Type of a varying or attribute: explicit declarations first, then the
/// manifest, then the usage table's default.
fn resolve_type(name: &str, manifest_attrs: &HashMap<String, (String, u32)>, known: &[Option<String>]) -> Option<String> {
    known
        .iter()
        .flatten()
        .next()
        .cloned()
        .or_else(|| manifest_attrs.get(name).map(|(ty, _)| glsl_type_of(ty).to_string()))
        .or_else(|| AttributeUsage::infer(name).default_type().map(str::to_string))
}

fn check_stage_combination(manifest: &PipelineManifest) -> Result<()> {
    if manifest.stages.is_empty() {
        bail!("pipeline manifest declares no stages");
    }
    let has_compute = manifest.stage(ShaderStage::Compute).is_some();
    if has_compute && manifest.stages.len() > 1 {
        let others: Vec<&str> = manifest
            .stages
            .iter()
            .filter(|s| s.stage != ShaderStage::Compute)
            .map(|s| s.stage.name())
            .collect();
        bail!(
            "compute stage is exclusive: it cannot be combined with {} stage(s)",
            others.join(", ")
        );
    }
    if !has_compute && manifest.stage(ShaderStage::Vertex).is_none() {
        bail!("render pipeline requires a vertex stage");
    }
    Ok(())
}

//! Per-stage parser for the `ark_main` dialect.
//!
//! Parsing is the first of two phases: it strips declarations out of the raw
//! text into [`DeclarationList`]s and keeps the remaining text as ordered
//! fragments. Nothing here knows about binding numbers; the backend renderer
//! combines these parts with a policy's annotations to produce final GLSL.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use super::declaration::{Declaration, DeclarationCategory, DeclarationList, DeclarationOrigin, StorageAccess};
use super::scanner::{self, EntrySpan, Parameter, ParameterDirection};
use super::types::{ShaderStage, capitalize_first, is_image_type, is_integer_type, is_sampler_type};

pub const ATTRIBUTE_PREFIX: &str = "a_";
pub const VARYING_PREFIX: &str = "v_";
pub const UNIFORM_PREFIX: &str = "u_";

const MAX_INCLUDE_DEPTH: usize = 8;

/// Extra source an engine feature attaches to a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSnippet {
    /// Statements emitted at the top of the synthesized `main`.
    pub pre_main: Vec<String>,
    /// Statements emitted after the output assignment.
    pub post_main: Vec<String>,
    /// Expressions multiplied into the `ark_main` result.
    pub output_modifiers: Vec<String>,
}

impl StageSnippet {
    fn text(&self) -> String {
        self.pre_main
            .iter()
            .chain(&self.post_main)
            .chain(&self.output_modifiers)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// `vec4 ark_main(...)`, rewritten behind a synthesized `void main()`.
    Dialect { params: Vec<Parameter>, body: String },
    /// Hand-written `void main()` of a compute stage; declarations are still collected.
    Native,
    /// Render stage with its own `void main()`, passed through untouched.
    Verbatim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFragment {
    Text(String),
    /// Where the rewritten `ark_main` definition goes.
    EntryDefinition,
}

#[derive(Debug, Clone)]
pub struct ShaderPreprocessor {
    stage: ShaderStage,
    entry: EntryPoint,
    fragments: Vec<SourceFragment>,
    pub extensions: Vec<String>,
    pub includes: Vec<String>,
    pub structs: Vec<String>,
    pub ins: DeclarationList,
    pub outs: DeclarationList,
    pub uniforms: DeclarationList,
    pub samplers: DeclarationList,
    pub images: DeclarationList,
    pub buffers: DeclarationList,
    snippet: StageSnippet,
    /// Varyings this stage forwards unchanged from its inputs.
    passthrough: Vec<String>,
    referenced_varyings: Vec<String>,
    referenced_attributes: Vec<String>,
    identifiers: HashSet<String>,
}

fn input_prefix(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => ATTRIBUTE_PREFIX,
        _ => VARYING_PREFIX,
    }
}

fn collect_identifiers(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| scanner::is_identifier(t))
        .map(str::to_string)
        .collect()
}

/// Splices `#include "name"` lines whose target is known; unknown ones are returned.
fn resolve_includes(text: &str, table: &HashMap<String, String>, depth: usize) -> Result<(String, Vec<String>)> {
    if depth > MAX_INCLUDE_DEPTH {
        bail!("#include nesting deeper than {MAX_INCLUDE_DEPTH} levels");
    }
    let mut out = String::with_capacity(text.len());
    let mut unresolved = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let Some(target) = trimmed.strip_prefix("#include") else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let target = target.trim().trim_matches(|c| c == '"' || c == '<' || c == '>');
        match table.get(target) {
            Some(content) => {
                let (expanded, nested) = resolve_includes(content, table, depth + 1)
                    .with_context(|| format!("while expanding #include \"{target}\""))?;
                out.push_str(&expanded);
                unresolved.extend(nested);
            }
            None => unresolved.push(trimmed.to_string()),
        }
    }
    Ok((out, unresolved))
}

impl ShaderPreprocessor {
    pub fn parse(
        stage: ShaderStage,
        source: &str,
        includes: &HashMap<String, String>,
        snippet: StageSnippet,
    ) -> Result<Self> {
        let mut pre = ShaderPreprocessor {
            stage,
            entry: EntryPoint::Verbatim,
            fragments: Vec::new(),
            extensions: Vec::new(),
            includes: Vec::new(),
            structs: Vec::new(),
            ins: DeclarationList::new(DeclarationCategory::In),
            outs: DeclarationList::new(DeclarationCategory::Out),
            uniforms: DeclarationList::new(DeclarationCategory::Uniform),
            samplers: DeclarationList::new(DeclarationCategory::Sampler),
            images: DeclarationList::new(DeclarationCategory::Image),
            buffers: DeclarationList::new(DeclarationCategory::Buffer),
            snippet,
            passthrough: Vec::new(),
            referenced_varyings: Vec::new(),
            referenced_attributes: Vec::new(),
            identifiers: HashSet::new(),
        };

        let has_void_main = scanner::has_void_main(source);
        if has_void_main && stage != ShaderStage::Compute {
            warn!(
                stage = %stage,
                "shader defines its own void main(); skipping preprocessing for this stage"
            );
            pre.fragments.push(SourceFragment::Text(source.to_string()));
            pre.identifiers = collect_identifiers(source);
            return Ok(pre);
        }

        let (expanded, unresolved) = resolve_includes(source, includes, 0)?;
        pre.includes = unresolved;
        let expanded = expanded
            .lines()
            .filter(|l| !l.trim_start().starts_with("#include"))
            .collect::<Vec<_>>()
            .join("\n");

        match scanner::find_entry(&expanded)? {
            Some(span) => pre.parse_dialect(&expanded, span)?,
            None if has_void_main => {
                pre.entry = EntryPoint::Native;
                let rest = pre.collect_declarations(&expanded)?;
                pre.fragments.push(SourceFragment::Text(rest));
            }
            None => bail!("undefined {} in {stage} shader", scanner::ENTRY_NAME),
        }

        let mut scanned = pre.searchable_text();
        scanned.push('\n');
        scanned.push_str(&pre.snippet.text());
        pre.identifiers = collect_identifiers(&scanned);
        pre.referenced_varyings = scanner::prefixed_identifiers(&scanned, VARYING_PREFIX);
        if stage == ShaderStage::Vertex {
            pre.referenced_attributes = scanner::prefixed_identifiers(&scanned, ATTRIBUTE_PREFIX);
        }
        debug!(
            stage = %stage,
            ins = pre.ins.len(),
            outs = pre.outs.len(),
            uniforms = pre.uniforms.len(),
            "parsed shader stage"
        );
        Ok(pre)
    }

    fn parse_dialect(&mut self, source: &str, span: EntrySpan) -> Result<()> {
        let params = scanner::parse_parameters(&span.params).with_context(|| format!("in {} shader", self.stage))?;
        let before = self.collect_declarations(&source[..span.start])?;
        let after = self.collect_declarations(&source[span.end..])?;
        self.fragments.push(SourceFragment::Text(before));
        self.fragments.push(SourceFragment::EntryDefinition);
        self.fragments.push(SourceFragment::Text(after));

        let in_prefix = input_prefix(self.stage);
        for param in &params {
            let name = capitalize_first(&param.name);
            match (self.stage, param.direction) {
                (ShaderStage::Compute, _) => {
                    bail!("compute shader {} must not take parameters", scanner::ENTRY_NAME)
                }
                (ShaderStage::Fragment, ParameterDirection::InOut) => {
                    bail!("inout parameter '{}' is only supported in vertex shaders", param.name)
                }
                (_, ParameterDirection::In) => {
                    self.declare_input(&name, &format!("{in_prefix}{name}"), &param.ty, DeclarationOrigin::Source)?;
                }
                (_, ParameterDirection::Out) => {
                    self.declare_output(&name, &param.ty, DeclarationOrigin::Source)?;
                }
                (_, ParameterDirection::InOut) => {
                    self.declare_input(&name, &format!("{in_prefix}{name}"), &param.ty, DeclarationOrigin::Source)?;
                    self.declare_output(&name, &param.ty, DeclarationOrigin::Source)?;
                }
            }
        }
        self.entry = EntryPoint::Dialect {
            params,
            body: span.body,
        };
        Ok(())
    }

    /// Pulls hand-written declarations, structs and directives out of `text`
    /// and returns what is left.
    fn collect_declarations(&mut self, text: &str) -> Result<String> {
        let mut remaining = String::with_capacity(text.len());
        let mut blocks = scanner::find_blocks(text, "struct")?;
        for block in scanner::find_blocks(text, "buffer")? {
            // a struct body may not contain `buffer`, but keep the spans disjoint anyway
            if !blocks.iter().any(|b| b.start <= block.start && block.end <= b.end) {
                blocks.push(block);
            }
        }
        blocks.sort_by_key(|b| b.start);

        let mut cursor = 0;
        for block in blocks {
            if block.start < cursor {
                continue;
            }
            remaining.push_str(&text[cursor..block.start]);
            cursor = block.end;
            if block.qualifiers.last().map(String::as_str) == Some("struct") {
                self.structs.push(text[block.start..block.end].trim().to_string());
            } else {
                let mut decl = Declaration::new(&block.name, &block.name, "buffer");
                decl.access = StorageAccess::from_qualifiers(block.qualifiers.iter().map(String::as_str));
                decl.members = Some(block.members.clone());
                decl.instance = block.instance.clone();
                self.buffers.declare(decl)?;
            }
        }
        remaining.push_str(&text[cursor..]);

        let mut kept = String::with_capacity(remaining.len());
        for line in remaining.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("#version") {
                continue;
            }
            if trimmed.starts_with("#extension") {
                self.extensions.push(trimmed.trim_end().to_string());
                continue;
            }
            if let Some(parsed) = scanner::parse_declaration_line(line) {
                if self.take_declaration(parsed)? {
                    continue;
                }
            }
            kept.push_str(line);
            kept.push('\n');
        }
        Ok(kept)
    }

    /// Returns false when the line is not one of ours and must stay in the text.
    fn take_declaration(&mut self, line: scanner::LineDeclaration) -> Result<bool> {
        let access = StorageAccess::from_qualifiers(line.qualifiers.iter().map(String::as_str));
        match line.keyword.as_str() {
            "in" | "attribute" => {
                let Some(name) = line
                    .name
                    .strip_prefix(ATTRIBUTE_PREFIX)
                    .or_else(|| line.name.strip_prefix(VARYING_PREFIX))
                else {
                    return Ok(false);
                };
                self.declare_input(name, &line.name, &line.ty, DeclarationOrigin::Source)?;
            }
            "out" | "varying" => {
                let Some(name) = line.name.strip_prefix(VARYING_PREFIX) else {
                    return Ok(false);
                };
                self.declare_output(name, &line.ty, DeclarationOrigin::Source)?;
            }
            "uniform" => {
                let decl = Declaration::new(&line.name, &line.name, &line.ty).with_length(line.length);
                if is_sampler_type(&line.ty) {
                    self.samplers.declare(decl)?;
                } else if is_image_type(&line.ty) {
                    let mut decl = decl;
                    decl.access = access;
                    self.images.declare(decl)?;
                } else {
                    self.uniforms.declare(decl)?;
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn declare_input(&mut self, name: &str, symbol: &str, ty: &str, origin: DeclarationOrigin) -> Result<()> {
        let mut decl = Declaration::new(name, symbol, ty).with_origin(origin);
        decl.flat = self.stage != ShaderStage::Vertex && is_integer_type(ty);
        self.ins
            .declare(decl)
            .with_context(|| format!("in {} shader", self.stage))?;
        Ok(())
    }

    pub fn declare_output(&mut self, name: &str, ty: &str, origin: DeclarationOrigin) -> Result<()> {
        let mut decl = Declaration::new(name, format!("{VARYING_PREFIX}{name}"), ty).with_origin(origin);
        decl.flat = self.stage != ShaderStage::Fragment && is_integer_type(ty);
        self.outs
            .declare(decl)
            .with_context(|| format!("in {} shader", self.stage))?;
        Ok(())
    }

    /// Declares `symbol` as a fragment colour output (`FragColor`).
    pub fn declare_color_output(&mut self, symbol: &str) -> Result<()> {
        let decl = Declaration::new(symbol, symbol, "vec4").with_origin(DeclarationOrigin::Generated);
        self.outs.declare(decl)?;
        Ok(())
    }

    /// Forward the first-stage input `name` unchanged to the next stage.
    pub fn add_passthrough(&mut self, name: &str) {
        if !self.passthrough.iter().any(|n| n == name) {
            self.passthrough.push(name.to_string());
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn is_verbatim(&self) -> bool {
        matches!(self.entry, EntryPoint::Verbatim)
    }

    pub fn fragments(&self) -> &[SourceFragment] {
        &self.fragments
    }

    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    /// Names `X` for every `v_X` the stage mentions, first-use order.
    pub fn referenced_varyings(&self) -> &[String] {
        &self.referenced_varyings
    }

    pub fn referenced_attributes(&self) -> &[String] {
        &self.referenced_attributes
    }

    pub fn references(&self, ident: &str) -> bool {
        self.identifiers.contains(ident)
    }

    pub fn produces(&self, name: &str) -> bool {
        self.outs.has(name) || (self.stage == ShaderStage::Vertex && self.referenced_varyings.iter().any(|v| v == name))
    }

    fn searchable_text(&self) -> String {
        let mut text = String::new();
        for fragment in &self.fragments {
            if let SourceFragment::Text(t) = fragment {
                text.push_str(t);
                text.push('\n');
            }
        }
        if let EntryPoint::Dialect { body, .. } = &self.entry {
            text.push_str(body);
        }
        for s in &self.structs {
            text.push('\n');
            text.push_str(s);
        }
        text
    }

    /// The rewritten `ark_main` definition with explicit parameter qualifiers.
    pub fn entry_definition(&self) -> Option<String> {
        let EntryPoint::Dialect { params, body } = &self.entry else {
            return None;
        };
        let params: Vec<String> = params
            .iter()
            .map(|p| match p.direction {
                ParameterDirection::In => format!("{} {}", p.ty, p.name),
                dir => format!("{} {} {}", dir.keyword(), p.ty, p.name),
            })
            .collect();
        Some(format!(
            "{} {}({}) {{{}}}",
            scanner::ENTRY_RETURN_TYPE,
            scanner::ENTRY_NAME,
            params.join(", "),
            body
        ))
    }

    /// The synthesized `void main()` that calls `ark_main` and stores its result in `output`.
    /// `prologue` statements run first.
    pub fn synthesized_main(&self, output: &str, prologue: &[String]) -> Option<String> {
        let EntryPoint::Dialect { params, .. } = &self.entry else {
            return None;
        };
        let in_prefix = input_prefix(self.stage);
        let mut lines = vec!["void main() {".to_string()];
        for stmt in prologue {
            lines.push(format!("    {stmt}"));
        }
        for stmt in &self.snippet.pre_main {
            lines.push(format!("    {}", stmt.trim()));
        }
        for name in &self.passthrough {
            lines.push(format!("    {VARYING_PREFIX}{name} = {in_prefix}{name};"));
        }
        let args: Vec<String> = params
            .iter()
            .map(|p| {
                let name = capitalize_first(&p.name);
                match p.direction {
                    ParameterDirection::In => format!("{in_prefix}{name}"),
                    ParameterDirection::Out | ParameterDirection::InOut => format!("{VARYING_PREFIX}{name}"),
                }
            })
            .collect();
        for p in params.iter().filter(|p| p.direction == ParameterDirection::InOut) {
            let name = capitalize_first(&p.name);
            if !self.passthrough.contains(&name) {
                lines.push(format!("    {VARYING_PREFIX}{name} = {in_prefix}{name};"));
            }
        }
        let call = format!("{}({})", scanner::ENTRY_NAME, args.join(", "));
        if self.stage == ShaderStage::Compute {
            lines.push(format!("    {call};"));
        } else {
            let mut expr = call;
            for modifier in &self.snippet.output_modifiers {
                expr = format!("{expr} * {}", modifier.trim());
            }
            lines.push(format!("    {output} = {expr};"));
        }
        for stmt in &self.snippet.post_main {
            lines.push(format!("    {}", stmt.trim()));
        }
        lines.push("}".to_string());
        Some(lines.join("\n"))
    }

    /// Number of colour attachments written by a fragment stage.
    pub fn color_output_count(&self) -> u32 {
        match &self.entry {
            EntryPoint::Dialect { params, .. } if self.stage == ShaderStage::Fragment => {
                1 + params.iter().filter(|p| p.direction == ParameterDirection::Out).count() as u32
            }
            _ if self.stage == ShaderStage::Fragment => 1,
            _ => 0,
        }
    }
}

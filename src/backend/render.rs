use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};

use super::{StageAnnotations, UniformStyle};
use crate::pipeline::building_context::{FRAG_COLOR, PipelineBuildingContext};
use crate::pipeline::layout::PipelineLayout;
use crate::shader::declaration::{Declaration, DeclarationCategory, LayoutQualifier};
use crate::shader::preprocessor::{ShaderPreprocessor, SourceFragment};
use crate::shader::types::{ShaderStage, matrix_columns, texture_type_for_sampler};

/// Replaces `${key}` markers. Keys are word characters and dots.
pub fn substitute_annotations(text: &str, annotations: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let key_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        if key_len == 0 || !after[key_len..].starts_with('}') {
            out.push_str("${");
            rest = after;
            continue;
        }
        let key = &after[..key_len];
        let value = annotations
            .get(key)
            .ok_or_else(|| anyhow!("cannot find annotation \"${{{key}}}\""))?;
        out.push_str(value);
        rest = &after[key_len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn split_sampler_names(name: &str) -> (String, String) {
    (format!("{name}_tex"), format!("{name}_smp"))
}

fn render_sampler(out: &mut String, decl: &Declaration, ann: &StageAnnotations) {
    let layout = ann.samplers.get(&decl.name);
    if !ann.split_samplers {
        push_line(out, &decl.render(DeclarationCategory::Sampler, layout));
        return;
    }
    let (tex, smp) = split_sampler_names(&decl.symbol);
    let shadow = decl.ty.ends_with("Shadow");
    let texture_type = texture_type_for_sampler(decl.ty.trim_end_matches("Shadow"));
    let sampler_type = if shadow { "samplerShadow" } else { "sampler" };
    let prefix = |q: Option<&LayoutQualifier>| q.map(|l| format!("{l} ")).unwrap_or_default();
    push_line(out, &format!("{}uniform {texture_type} {tex};", prefix(layout)));
    push_line(
        out,
        &format!("{}uniform {sampler_type} {smp};", prefix(ann.sampler_objects.get(&decl.name))),
    );
    push_line(out, &format!("#define {} {}({tex}, {smp})", decl.symbol, decl.ty));
}

/// Declares a matrix vertex input as one input per column plus a private
/// global of the matrix type. Returns the statement that rebuilds it.
fn render_matrix_input(out: &mut String, decl: &Declaration, layout: Option<&LayoutQualifier>) -> Option<String> {
    let (columns, column_type) = matrix_columns(&decl.ty).filter(|_| decl.length == 1)?;
    let base = layout.and_then(|l| l.location).unwrap_or(0);
    let names: Vec<String> = (0..columns).map(|i| format!("{}_{i}", decl.symbol)).collect();
    for (i, name) in names.iter().enumerate() {
        let location = LayoutQualifier::location(base + i as u32);
        push_line(out, &format!("{location} in {column_type} {name};"));
    }
    push_line(out, &format!("{} {};", decl.ty, decl.symbol));
    Some(format!("{} = {}({});", decl.symbol, decl.ty, names.join(", ")))
}

/// Phase two: final GLSL for one stage from its parsed parts and a policy's annotations.
pub fn render_stage(ctx: &PipelineBuildingContext, layout: &PipelineLayout, ann: &StageAnnotations) -> Result<String> {
    let pre = ctx
        .stage(ann.stage)
        .ok_or_else(|| anyhow!("no {} stage in pipeline", ann.stage))?;
    if pre.is_verbatim() {
        let text = pre
            .fragments()
            .iter()
            .map(|f| match f {
                SourceFragment::Text(t) => t.as_str(),
                SourceFragment::EntryDefinition => "",
            })
            .collect::<String>();
        return substitute_annotations(&text, &ann.annotations);
    }

    let mut out = String::new();
    push_line(&mut out, &format!("#version {}", ann.version));
    for ext in &pre.extensions {
        push_line(&mut out, ext);
    }
    for line in &ann.macros {
        push_line(&mut out, line);
    }
    for (name, value) in &ctx.defines {
        match value {
            Some(value) => push_line(&mut out, &format!("#define {name} {value}")),
            None => push_line(&mut out, &format!("#define {name}")),
        }
    }
    out.push('\n');

    for include in &pre.includes {
        push_line(&mut out, include);
    }
    for s in &pre.structs {
        push_line(&mut out, s);
    }

    render_uniforms(&mut out, pre, layout, ann)?;

    for decl in pre.samplers.iter() {
        render_sampler(&mut out, decl, ann);
    }
    for decl in pre.images.iter() {
        let mut decl = decl.clone();
        if let Some(access) = ann.access.get(&decl.name) {
            decl.access = Some(*access);
        }
        push_line(&mut out, &decl.render(DeclarationCategory::Image, ann.images.get(&decl.name)));
    }
    for decl in pre.buffers.iter() {
        let mut decl = decl.clone();
        if let Some(access) = ann.access.get(&decl.name) {
            decl.access = Some(*access);
        }
        push_line(&mut out, &decl.render(DeclarationCategory::Buffer, ann.buffers.get(&decl.name)));
    }
    let mut prologue = Vec::new();
    for decl in pre.ins.iter() {
        let layout = ann.inputs.get(&decl.name);
        if ann.stage == ShaderStage::Vertex && ann.split_matrix_inputs {
            if let Some(rebuild) = render_matrix_input(&mut out, decl, layout) {
                prologue.push(rebuild);
                continue;
            }
        }
        push_line(&mut out, &decl.render(DeclarationCategory::In, layout));
    }
    for decl in pre.outs.iter() {
        push_line(&mut out, &decl.render(DeclarationCategory::Out, ann.outputs.get(&decl.name)));
    }
    out.push('\n');

    for fragment in pre.fragments() {
        match fragment {
            SourceFragment::Text(t) => out.push_str(t),
            SourceFragment::EntryDefinition => {
                if let Some(def) = pre.entry_definition() {
                    push_line(&mut out, &def);
                }
            }
        }
    }

    let output = match ann.stage {
        ShaderStage::Vertex => "gl_Position".to_string(),
        _ => ann
            .annotations
            .get("frag.color")
            .cloned()
            .unwrap_or_else(|| FRAG_COLOR.to_string()),
    };
    if let Some(main) = pre.synthesized_main(&output, &prologue) {
        out.push('\n');
        push_line(&mut out, &main);
    }
    substitute_annotations(&out, &ann.annotations)
}

fn render_uniforms(
    out: &mut String,
    pre: &ShaderPreprocessor,
    layout: &PipelineLayout,
    ann: &StageAnnotations,
) -> Result<()> {
    if pre.uniforms.is_empty() {
        return Ok(());
    }
    match &ann.uniforms {
        UniformStyle::Loose => {
            for decl in pre.uniforms.iter() {
                push_line(out, &decl.render(DeclarationCategory::Uniform, None));
            }
        }
        UniformStyle::Block(qualifier) => {
            let Some(idx) = layout.ubo_for_stage(ann.stage) else {
                bail!("{} stage declares uniforms but owns no uniform block", ann.stage);
            };
            let ubo = &layout.ubos[idx];
            push_line(out, &format!("{qualifier} uniform {} {{", ubo.block_name()));
            for uniform in ubo.uniforms() {
                let suffix = if uniform.length > 1 {
                    format!("[{}]", uniform.length)
                } else {
                    String::new()
                };
                push_line(out, &format!("    {} {}{};", uniform.glsl_type(), uniform.name, suffix));
            }
            push_line(out, "};");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::standard_annotations;

    #[test]
    fn test_substitute_annotations() {
        let text = "${vert.out} vec2 v_Uv;\n${frag.color} = vec4(1.0); // cost: ${ not a key";
        let out = substitute_annotations(text, &standard_annotations()).unwrap();
        assert_eq!(out, "out vec2 v_Uv;\nFragColor = vec4(1.0); // cost: ${ not a key");
    }

    #[test]
    fn test_unknown_annotation_is_fatal() {
        let err = substitute_annotations("${frag.depth}", &standard_annotations()).unwrap_err();
        assert!(format!("{err:#}").contains("cannot find annotation \"${frag.depth}\""));
    }

    #[test]
    fn test_split_sampler_rendering() {
        let decl = Declaration::new("u_Texture0", "u_Texture0", "sampler2D");
        let mut ann = StageAnnotations::new(ShaderStage::Fragment, "450");
        ann.split_samplers = true;
        ann.samplers.insert(decl.name.clone(), LayoutQualifier::binding(Some(2), 0));
        ann.sampler_objects.insert(decl.name.clone(), LayoutQualifier::binding(Some(2), 3));
        let mut out = String::new();
        render_sampler(&mut out, &decl, &ann);
        assert_eq!(
            out,
            "layout(set = 2, binding = 0) uniform texture2D u_Texture0_tex;\n\
             layout(set = 2, binding = 3) uniform sampler u_Texture0_smp;\n\
             #define u_Texture0 sampler2D(u_Texture0_tex, u_Texture0_smp)\n"
        );
    }

    #[test]
    fn test_matrix_input_is_split_into_columns() {
        let decl = Declaration::new("Model", "a_Model", "mat4");
        let mut out = String::new();
        let rebuild = render_matrix_input(&mut out, &decl, Some(&LayoutQualifier::location(2))).unwrap();
        assert_eq!(
            out,
            "layout(location = 2) in vec4 a_Model_0;\n\
             layout(location = 3) in vec4 a_Model_1;\n\
             layout(location = 4) in vec4 a_Model_2;\n\
             layout(location = 5) in vec4 a_Model_3;\n\
             mat4 a_Model;\n"
        );
        assert_eq!(rebuild, "a_Model = mat4(a_Model_0, a_Model_1, a_Model_2, a_Model_3);");

        let vector = Declaration::new("Position", "a_Position", "vec3");
        assert!(render_matrix_input(&mut out, &vector, None).is_none());
    }
}

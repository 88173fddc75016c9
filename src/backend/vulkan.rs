//! Vulkan GLSL 4.50: every resource carries a descriptor set.
//!
//! Set 0 holds storage buffers, set 1 uniform blocks, set 2 sampled
//! textures followed by storage images and then the sampler objects that
//! pair with the textures.

use anyhow::Result;

use super::{
    BackendLayoutPolicy, LayoutAssignment, RenderingBackend, StageAnnotations, UniformStyle, assign_io_locations,
    check_capacity, image_format, split_sampler_qualifiers,
};
use crate::pipeline::building_context::PipelineBuildingContext;
use crate::pipeline::layout::LayoutLimits;
use crate::pipeline::traits::PipelineTrait;
use crate::shader::declaration::LayoutQualifier;
use crate::shader::types::ShaderStage;

pub const STORAGE_BUFFER_SET: u32 = 0;
pub const UNIFORM_BUFFER_SET: u32 = 1;
pub const TEXTURE_SET: u32 = 2;

pub const GLSL_VERSION: &str = "450";

/// Maps GL-era builtins and texture functions onto their Vulkan GLSL names,
/// only for identifiers the stage actually uses.
///
/// The texture functions are function-like so the `texture2D` type of a
/// split sampler declaration is left alone.
pub fn compatibility_macros(stage: ShaderStage, references: impl Fn(&str) -> bool) -> Vec<String> {
    let table: &[(&str, &str)] = match stage {
        ShaderStage::Vertex => &[
            ("gl_InstanceID", "gl_InstanceID gl_InstanceIndex"),
            ("gl_VertexID", "gl_VertexID gl_VertexIndex"),
        ],
        ShaderStage::Fragment => &[
            ("texture2D", "texture2D(s, uv) texture(s, uv)"),
            ("textureCube", "textureCube(s, uv) texture(s, uv)"),
        ],
        ShaderStage::Compute => &[],
    };
    table
        .iter()
        .filter(|(ident, _)| references(ident))
        .map(|(_, definition)| format!("#define {definition}"))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VulkanPolicy;

impl BackendLayoutPolicy for VulkanPolicy {
    fn backend(&self) -> RenderingBackend {
        RenderingBackend::Vulkan
    }

    fn limits(&self) -> LayoutLimits {
        LayoutLimits {
            attribute_alignment: 16,
            max_uniform_buffers: 12,
            max_samplers: 16,
            max_images: 8,
            max_storage_buffers: 8,
        }
    }

    fn validate_traits(&self, traits: &[PipelineTrait]) -> Result<()> {
        for t in traits {
            match t {
                PipelineTrait::DepthTest { .. }
                | PipelineTrait::StencilTest { .. }
                | PipelineTrait::Blend { .. }
                | PipelineTrait::CullFace { .. } => {}
            }
        }
        Ok(())
    }

    fn assign(&self, ctx: &PipelineBuildingContext) -> Result<LayoutAssignment> {
        let limits = self.limits();
        let mut layout = ctx.layout.clone();
        check_capacity(self.backend(), "sampler", layout.samplers.len(), limits.max_samplers)?;
        check_capacity(self.backend(), "storage image", layout.images.len(), limits.max_images)?;
        check_capacity(self.backend(), "storage buffer", layout.ssbos.len(), limits.max_storage_buffers)?;

        let order = ctx.stage_order();
        layout.ssbos.assign_bindings(0, &order);
        layout.samplers.assign_bindings(0, &order);
        let sampler_base = layout.images.assign_bindings(layout.samplers.len() as u32, &order);

        let mut stages: Vec<StageAnnotations> = order
            .iter()
            .map(|&stage| StageAnnotations::new(stage, GLSL_VERSION))
            .collect();
        assign_io_locations(ctx, &mut stages);

        for ann in &mut stages {
            let stage = ann.stage;
            if let Some(pre) = ctx.stage(stage) {
                ann.macros = compatibility_macros(stage, |ident| pre.references(ident));
            }
            if let Some(idx) = layout.ubo_for_stage(stage) {
                ann.uniforms = UniformStyle::Block(LayoutQualifier::binding(
                    Some(UNIFORM_BUFFER_SET),
                    layout.ubos[idx].binding,
                ));
            }
            split_sampler_qualifiers(ann, &layout, TEXTURE_SET, 0, sampler_base);
            ann.split_matrix_inputs = true;
            for d in layout.images.used_by(stage) {
                if let Some(binding) = d.binding() {
                    let q = LayoutQualifier::binding(Some(TEXTURE_SET), binding)
                        .with_extra(image_format(ctx, stage, &d.name));
                    ann.images.insert(d.name.clone(), q);
                }
            }
            for d in layout.ssbos.used_by(stage) {
                if let Some(binding) = d.binding() {
                    let q = LayoutQualifier::binding(Some(STORAGE_BUFFER_SET), binding).with_extra("std430");
                    ann.buffers.insert(d.name.clone(), q);
                }
            }
        }

        Ok(LayoutAssignment {
            backend: self.backend(),
            layout,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::render_stage;
    use crate::manifest::parse_manifest;

    fn context(json: serde_json::Value) -> PipelineBuildingContext {
        let manifest = parse_manifest(&json.to_string()).unwrap();
        PipelineBuildingContext::new(&manifest, VulkanPolicy.limits()).unwrap()
    }

    const FRAGMENT: &str = "layout(std430) readonly buffer Lights { vec4 colors[]; } lights;\n\
                            readonly uniform image2D u_Image0;\n\
                            vec4 ark_main() {\n    return texture2D(u_Texture0, v_Uv) * lights.colors[0] * u_Tint + imageLoad(u_Image0, ivec2(0));\n}\n";

    fn lit_quad() -> PipelineBuildingContext {
        context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": "vec4 ark_main(vec3 position, vec2 uv) { return u_VP * vec4(position, float(gl_InstanceID)); }" },
                { "stage": "fragment", "source": FRAGMENT }
            ],
            "uniforms": [ { "name": "u_Tint", "type": "vec4" } ],
            "samplers": [ {} ],
            "buffers": [ { "name": "Lights", "access": "readOnly" } ]
        }))
    }

    #[test]
    fn test_descriptor_sets() {
        let ctx = lit_quad();
        let assignment = VulkanPolicy.assign(&ctx).unwrap();
        let layout = &assignment.layout;
        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();

        assert_eq!(
            fragment.buffers["Lights"],
            LayoutQualifier::binding(Some(STORAGE_BUFFER_SET), 0).with_extra("std430")
        );
        let ubo = &layout.ubos[layout.ubo_for_stage(ShaderStage::Fragment).unwrap()];
        assert_eq!(
            fragment.uniforms,
            UniformStyle::Block(LayoutQualifier::binding(Some(UNIFORM_BUFFER_SET), ubo.binding))
        );
        assert_eq!(fragment.samplers["u_Texture0"], LayoutQualifier::binding(Some(TEXTURE_SET), 0));
        assert_eq!(
            fragment.images["u_Image0"],
            LayoutQualifier::binding(Some(TEXTURE_SET), 1).with_extra("rgba8")
        );
        assert_eq!(fragment.sampler_objects["u_Texture0"], LayoutQualifier::binding(Some(TEXTURE_SET), 2));
        assert!(fragment.split_samplers);

        let vertex = assignment.stage(ShaderStage::Vertex).unwrap();
        assert!(vertex.split_matrix_inputs);
        assert_eq!(vertex.inputs["Position"], LayoutQualifier::location(0));
        assert_eq!(vertex.outputs["Uv"], fragment.inputs["Uv"]);
    }

    #[test]
    fn test_compatibility_macros_follow_references() {
        let ctx = lit_quad();
        let assignment = VulkanPolicy.assign(&ctx).unwrap();
        let vertex = assignment.stage(ShaderStage::Vertex).unwrap();
        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();
        assert_eq!(vertex.macros, vec!["#define gl_InstanceID gl_InstanceIndex"]);
        assert_eq!(fragment.macros, vec!["#define texture2D(s, uv) texture(s, uv)"]);

        let text = render_stage(&ctx, &assignment.layout, fragment).unwrap();
        assert!(text.contains("layout(set = 2, binding = 0) uniform texture2D u_Texture0_tex;"));
        assert!(text.contains("layout(set = 2, binding = 2) uniform sampler u_Texture0_smp;"));
        let vertex_text = render_stage(&ctx, &assignment.layout, vertex).unwrap();
        assert!(vertex_text.contains("    mat4 u_VP;\n"));
        assert!(!vertex_text.contains("#define u_VP"));

        assert!(compatibility_macros(ShaderStage::Compute, |_| true).is_empty());
        assert!(compatibility_macros(ShaderStage::Fragment, |_| false).is_empty());
    }
}

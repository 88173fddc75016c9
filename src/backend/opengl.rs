//! OpenGL ES 3: explicit locations for attributes and fragment outputs,
//! everything else is matched by name except storage resources.

use anyhow::{Result, bail};

use super::{
    BackendLayoutPolicy, LayoutAssignment, RenderingBackend, StageAnnotations, UniformStyle, assign_io_locations,
    check_capacity, image_format,
};
use crate::pipeline::building_context::PipelineBuildingContext;
use crate::pipeline::layout::LayoutLimits;
use crate::pipeline::traits::PipelineTrait;
use crate::shader::declaration::LayoutQualifier;
use crate::shader::types::ShaderStage;

/// Engine camera uniforms and the names GL-side fragment code expects.
pub const CAMERA_UNIFORM_RENAMES: &[(&str, &str)] = &[
    ("u_VP", "u_viewProj"),
    ("u_View", "u_view"),
    ("u_Projection", "u_proj"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGlEs3Policy;

impl BackendLayoutPolicy for OpenGlEs3Policy {
    fn backend(&self) -> RenderingBackend {
        RenderingBackend::OpenGl
    }

    fn limits(&self) -> LayoutLimits {
        LayoutLimits {
            attribute_alignment: 16,
            max_uniform_buffers: 12,
            max_samplers: 16,
            max_images: 4,
            max_storage_buffers: 4,
        }
    }

    fn validate_traits(&self, traits: &[PipelineTrait]) -> Result<()> {
        for t in traits {
            match t {
                PipelineTrait::DepthTest { clamp: true, .. } => {
                    bail!("OpenGL ES 3 has no depth clamp; remove \"clamp\" from the depthTest trait")
                }
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
        // Texture units for samplers; storage images come after every other binding.
        layout.ssbos.assign_bindings(0, &order);
        layout.samplers.assign_bindings(0, &order);
        let image_base = (layout.ubos.len() + layout.ssbos.len() + layout.samplers.len()) as u32;
        layout.images.assign_bindings(image_base, &order);

        let version = if layout.images.is_empty() && layout.ssbos.is_empty() {
            "300 es"
        } else {
            "310 es"
        };
        let mut stages: Vec<StageAnnotations> = order
            .iter()
            .map(|&stage| StageAnnotations::new(stage, version))
            .collect();
        assign_io_locations(ctx, &mut stages);

        for ann in &mut stages {
            let stage = ann.stage;
            // varyings are linked by name in ES 3.0
            if stage == ShaderStage::Vertex {
                ann.outputs.clear();
            }
            if stage == ShaderStage::Fragment {
                ann.inputs.clear();
            }
            ann.uniforms = UniformStyle::Loose;

            if stage != ShaderStage::Vertex {
                ann.macros.push("precision highp float;".to_string());
                ann.macros.push("precision highp int;".to_string());
            }
            if ctx.stage(stage).is_some_and(|s| !s.images.is_empty()) {
                ann.macros.push("precision highp image2D;".to_string());
            }
            if stage == ShaderStage::Fragment {
                if let Some(pre) = ctx.stage(stage) {
                    for (from, to) in CAMERA_UNIFORM_RENAMES {
                        if pre.references(from) {
                            ann.macros.push(format!("#define {from} {to}"));
                        }
                    }
                }
            }

            for d in layout.images.used_by(stage) {
                if let Some(binding) = d.binding() {
                    let q = LayoutQualifier::binding(None, binding).with_extra(image_format(ctx, stage, &d.name));
                    ann.images.insert(d.name.clone(), q);
                }
            }
            for d in layout.ssbos.used_by(stage) {
                if let Some(binding) = d.binding() {
                    ann.buffers
                        .insert(d.name.clone(), LayoutQualifier::binding(None, binding).with_extra("std430"));
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
        PipelineBuildingContext::new(&manifest, OpenGlEs3Policy.limits()).unwrap()
    }

    #[test]
    fn test_attributes_have_locations_varyings_do_not() {
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": "vec4 ark_main(vec3 position, vec2 uv) { return u_VP * vec4(position, 1.0); }" },
                { "stage": "fragment", "source": "vec4 ark_main() { return vec4(v_Uv, 0.0, 1.0) * texture(u_Texture0, v_Uv); }" }
            ],
            "samplers": [ {} ]
        }));
        let assignment = OpenGlEs3Policy.assign(&ctx).unwrap();
        let vertex = assignment.stage(ShaderStage::Vertex).unwrap();
        assert_eq!(vertex.version, "300 es");
        assert_eq!(vertex.inputs["Position"], LayoutQualifier::location(0));
        assert_eq!(vertex.inputs["Uv"], LayoutQualifier::location(1));
        assert!(vertex.outputs.is_empty());
        assert_eq!(vertex.uniforms, UniformStyle::Loose);

        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();
        assert!(fragment.inputs.is_empty());
        assert_eq!(fragment.outputs["FragColor"], LayoutQualifier::location(0));
        assert!(fragment.macros.contains(&"precision highp float;".to_string()));
        assert_eq!(assignment.layout.samplers.get("u_Texture0").unwrap().binding(), Some(0));

        let text = render_stage(&ctx, &assignment.layout, fragment).unwrap();
        assert!(text.starts_with("#version 300 es\nprecision highp float;"));
        assert!(text.contains("\nuniform sampler2D u_Texture0;\n"));
        assert!(text.contains("\nin vec2 v_Uv;\n"));
        assert!(text.contains("layout(location = 0) out vec4 FragColor;"));
        assert!(text.contains("FragColor = ark_main();"));

        let text = render_stage(&ctx, &assignment.layout, vertex).unwrap();
        assert!(text.contains("\nuniform mat4 u_VP;\n"));
        assert!(text.contains("layout(location = 1) in vec2 a_Uv;"));
        assert!(text.contains("\nout vec2 v_Uv;\n"));
    }

    #[test]
    fn test_camera_uniforms_are_renamed_in_fragment() {
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": "vec4 ark_main(vec3 position) { return vec4(position, 1.0); }" },
                { "stage": "fragment", "source": "vec4 ark_main() { return u_View[0]; }" }
            ]
        }));
        let assignment = OpenGlEs3Policy.assign(&ctx).unwrap();
        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();
        assert!(fragment.macros.contains(&"#define u_View u_view".to_string()));
        assert!(!fragment.macros.iter().any(|m| m.contains("u_VP")));
    }

    #[test]
    fn test_storage_resources_raise_version() {
        let compute = "layout(local_size_x = 8, local_size_y = 8) in;\nlayout(std430) buffer Params { float scale; } params;\nvoid main() { imageStore(u_Image0, ivec2(gl_GlobalInvocationID.xy), vec4(params.scale)); }\n";
        let ctx = context(serde_json::json!({
            "stages": [ { "stage": "compute", "source": compute } ],
            "images": [ { "access": "writeOnly" } ],
            "buffers": [ { "name": "Params", "access": "readOnly" } ]
        }));
        let assignment = OpenGlEs3Policy.assign(&ctx).unwrap();
        let compute = assignment.stage(ShaderStage::Compute).unwrap();
        assert_eq!(compute.version, "310 es");
        assert_eq!(
            compute.buffers["Params"],
            LayoutQualifier::binding(None, 0).with_extra("std430")
        );
        // images follow every buffer binding
        assert_eq!(compute.images["u_Image0"], LayoutQualifier::binding(None, 1).with_extra("rgba8"));
    }

    #[test]
    fn test_depth_clamp_is_rejected() {
        let traits: Vec<PipelineTrait> =
            serde_json::from_value(serde_json::json!([{ "type": "depthTest", "clamp": true }])).unwrap();
        let err = OpenGlEs3Policy.validate_traits(&traits).unwrap_err();
        assert!(format!("{err:#}").contains("no depth clamp"));
    }
}

//! SDL3 GPU: fixed descriptor-set conventions per stage, split
//! texture/sampler pairs, and read-only storage in graphics stages.
//!
//! | stage    | textures + storage | uniforms |
//! |----------|--------------------|----------|
//! | vertex   | set 0              | set 1    |
//! | fragment | set 2              | set 3    |
//! | compute  | set 0 read-only, set 1 read-write | set 2 |

use anyhow::{Result, bail};

use super::{
    BackendLayoutPolicy, LayoutAssignment, RenderingBackend, StageAnnotations, UniformStyle, assign_io_locations,
    check_capacity, image_format, split_sampler_qualifiers,
};
use crate::pipeline::building_context::PipelineBuildingContext;
use crate::pipeline::descriptor::{DescriptorSet, DescriptorTable};
use crate::pipeline::layout::LayoutLimits;
use crate::pipeline::traits::PipelineTrait;
use crate::shader::declaration::{LayoutQualifier, StorageAccess};
use crate::shader::types::ShaderStage;

pub const GLSL_VERSION: &str = "450";

/// `(resource set, read-write resource set, uniform set)` for `stage`.
pub fn stage_sets(stage: ShaderStage) -> (u32, u32, u32) {
    match stage {
        ShaderStage::Vertex => (0, 0, 1),
        ShaderStage::Fragment => (2, 2, 3),
        ShaderStage::Compute => (0, 1, 2),
    }
}

fn is_writable(d: &DescriptorSet) -> bool {
    d.access.is_some_and(StorageAccess::is_writable)
}

/// Graphics stages only read storage; compute must say which way it goes.
fn check_storage_access(order: &[ShaderStage], table: &mut DescriptorTable, what: &str) -> Result<()> {
    for entry in table.iter_mut() {
        if entry.stages.contains(ShaderStage::Compute) {
            if entry.access.is_none() {
                bail!(
                    "SDL3 GPU compute {what} \"{}\" must be marked readonly or read-write",
                    entry.name
                );
            }
            continue;
        }
        if is_writable(entry) {
            let stage = order
                .iter()
                .copied()
                .find(|s| entry.stages.contains(*s))
                .unwrap_or(ShaderStage::Fragment);
            bail!(
                "SDL3 GPU {stage} shaders can only read {what} \"{}\"; mark it readonly",
                entry.name
            );
        }
        entry.access = Some(StorageAccess::ReadOnly);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sdl3GpuPolicy;

impl BackendLayoutPolicy for Sdl3GpuPolicy {
    fn backend(&self) -> RenderingBackend {
        RenderingBackend::Sdl3Gpu
    }

    fn limits(&self) -> LayoutLimits {
        LayoutLimits {
            attribute_alignment: 16,
            max_uniform_buffers: 4,
            max_samplers: 8,
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

        if let Some(image) = layout.images.used_by(ShaderStage::Vertex).next() {
            bail!("SDL3 GPU vertex shaders cannot declare storage image \"{}\"", image.name);
        }
        let order = ctx.stage_order();
        check_storage_access(&order, &mut layout.images, "storage image")?;
        check_storage_access(&order, &mut layout.ssbos, "storage buffer")?;

        let next = layout.samplers.assign_bindings(0, &order);
        let next = layout.images.assign_bindings_where(next, &order, |d| !is_writable(d));
        let sampler_base = layout.ssbos.assign_bindings_where(next, &order, |d| !is_writable(d));
        let next = layout.images.assign_bindings_where(0, &order, is_writable);
        layout.ssbos.assign_bindings_where(next, &order, is_writable);
        for ubo in &mut layout.ubos {
            ubo.binding = 0;
        }

        let mut stages: Vec<StageAnnotations> = order
            .iter()
            .map(|&stage| StageAnnotations::new(stage, GLSL_VERSION))
            .collect();
        assign_io_locations(ctx, &mut stages);

        for ann in &mut stages {
            let stage = ann.stage;
            let (resource_set, write_set, uniform_set) = stage_sets(stage);
            ann.split_matrix_inputs = true;
            if let Some(pre) = ctx.stage(stage) {
                ann.macros = super::vulkan::compatibility_macros(stage, |ident| pre.references(ident));
            }
            if let Some(idx) = layout.ubo_for_stage(stage) {
                ann.uniforms = UniformStyle::Block(LayoutQualifier::binding(Some(uniform_set), layout.ubos[idx].binding));
            }
            split_sampler_qualifiers(ann, &layout, resource_set, 0, sampler_base);
            for d in layout.images.used_by(stage) {
                let Some(binding) = d.binding() else { continue };
                let set = if is_writable(d) { write_set } else { resource_set };
                let q = LayoutQualifier::binding(Some(set), binding).with_extra(image_format(ctx, stage, &d.name));
                ann.images.insert(d.name.clone(), q);
                if let Some(access) = d.access {
                    ann.access.insert(d.name.clone(), access);
                }
            }
            for d in layout.ssbos.used_by(stage) {
                let Some(binding) = d.binding() else { continue };
                let set = if is_writable(d) { write_set } else { resource_set };
                ann.buffers
                    .insert(d.name.clone(), LayoutQualifier::binding(Some(set), binding).with_extra("std430"));
                if let Some(access) = d.access {
                    ann.access.insert(d.name.clone(), access);
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

    fn context(json: serde_json::Value) -> Result<PipelineBuildingContext> {
        let manifest = parse_manifest(&json.to_string())?;
        PipelineBuildingContext::new(&manifest, Sdl3GpuPolicy.limits())
    }

    const VERTEX: &str = "vec4 ark_main(vec3 position, vec2 uv) { return u_VP * vec4(position, 1.0); }";

    #[test]
    fn test_graphics_sets() {
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": VERTEX },
                { "stage": "fragment", "source": "vec4 ark_main() { return texture(u_Texture0, v_Uv) * u_Tint; }" }
            ],
            "uniforms": [ { "name": "u_Tint", "type": "vec4" } ],
            "samplers": [ {} ]
        }))
        .unwrap();
        let assignment = Sdl3GpuPolicy.assign(&ctx).unwrap();
        let vertex = assignment.stage(ShaderStage::Vertex).unwrap();
        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();
        assert_eq!(vertex.uniforms, UniformStyle::Block(LayoutQualifier::binding(Some(1), 0)));
        assert_eq!(fragment.uniforms, UniformStyle::Block(LayoutQualifier::binding(Some(3), 0)));
        assert_eq!(fragment.samplers["u_Texture0"], LayoutQualifier::binding(Some(2), 0));
        assert_eq!(fragment.sampler_objects["u_Texture0"], LayoutQualifier::binding(Some(2), 1));
        assert!(fragment.split_samplers);

        let text = render_stage(&ctx, &assignment.layout, fragment).unwrap();
        assert!(text.contains("layout(set = 2, binding = 0) uniform texture2D u_Texture0_tex;"));
        assert!(text.contains("layout(set = 2, binding = 1) uniform sampler u_Texture0_smp;"));
        assert!(text.contains("#define u_Texture0 sampler2D(u_Texture0_tex, u_Texture0_smp)"));
        assert!(text.contains("layout(set = 3, binding = 0) uniform UBO"));
    }

    #[test]
    fn test_vertex_storage_image_is_rejected() {
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": "vec4 ark_main(vec3 position) { return imageLoad(u_Image0, ivec2(0)) + vec4(position, 1.0); }" },
                { "stage": "fragment", "source": "vec4 ark_main() { return vec4(1.0); }" }
            ],
            "images": [ { "access": "readOnly" } ]
        }))
        .unwrap();
        let err = Sdl3GpuPolicy.assign(&ctx).unwrap_err();
        assert!(format!("{err:#}").contains("vertex shaders cannot declare storage image \"u_Image0\""));
    }

    #[test]
    fn test_fragment_storage_is_read_only() {
        let fragment = "readonly uniform image2D u_Image0;\nvec4 ark_main() { return imageLoad(u_Image0, ivec2(0)); }";
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": VERTEX },
                { "stage": "fragment", "source": fragment }
            ]
        }))
        .unwrap();
        let assignment = Sdl3GpuPolicy.assign(&ctx).unwrap();
        let ann = assignment.stage(ShaderStage::Fragment).unwrap();
        assert_eq!(ann.images["u_Image0"], LayoutQualifier::binding(Some(2), 0).with_extra("rgba8"));

        let writer = "writeonly uniform image2D u_Image0;\nvec4 ark_main() { imageStore(u_Image0, ivec2(0), vec4(1.0)); return vec4(1.0); }";
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": VERTEX },
                { "stage": "fragment", "source": writer }
            ]
        }))
        .unwrap();
        let err = Sdl3GpuPolicy.assign(&ctx).unwrap_err();
        assert!(format!("{err:#}").contains("can only read storage image \"u_Image0\""));
    }

    #[test]
    fn test_sampler_objects_follow_storage() {
        let fragment = "readonly uniform image2D u_Image0;\nvec4 ark_main() { return texture(u_Texture0, v_Uv) + imageLoad(u_Image0, ivec2(0)); }";
        let ctx = context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": VERTEX },
                { "stage": "fragment", "source": fragment }
            ],
            "samplers": [ {} ]
        }))
        .unwrap();
        let assignment = Sdl3GpuPolicy.assign(&ctx).unwrap();
        let ann = assignment.stage(ShaderStage::Fragment).unwrap();
        assert_eq!(ann.samplers["u_Texture0"], LayoutQualifier::binding(Some(2), 0));
        assert_eq!(ann.images["u_Image0"], LayoutQualifier::binding(Some(2), 1).with_extra("rgba8"));
        assert_eq!(ann.sampler_objects["u_Texture0"], LayoutQualifier::binding(Some(2), 2));
    }

    #[test]
    fn test_compute_splits_read_and_write_sets() {
        let compute = "layout(local_size_x = 64) in;\nreadonly uniform image2D u_Source;\nwriteonly uniform image2D u_Target;\nlayout(std430) buffer Weights { float w[]; } weights;\nvoid main() { imageStore(u_Target, ivec2(0), imageLoad(u_Source, ivec2(0)) * weights.w[0]); }\n";
        let ctx = context(serde_json::json!({
            "stages": [ { "stage": "compute", "source": compute } ],
            "buffers": [ { "name": "Weights", "access": "readOnly" } ]
        }))
        .unwrap();
        let assignment = Sdl3GpuPolicy.assign(&ctx).unwrap();
        let ann = assignment.stage(ShaderStage::Compute).unwrap();
        assert_eq!(ann.images["u_Source"], LayoutQualifier::binding(Some(0), 0).with_extra("rgba8"));
        assert_eq!(ann.buffers["Weights"], LayoutQualifier::binding(Some(0), 1).with_extra("std430"));
        assert_eq!(ann.images["u_Target"], LayoutQualifier::binding(Some(1), 0).with_extra("rgba8"));
        assert_eq!(ann.access["Weights"], StorageAccess::ReadOnly);
    }

    #[test]
    fn test_unmarked_compute_storage_is_rejected() {
        let compute = "layout(local_size_x = 64) in;\nlayout(std430) buffer Data { float v[]; } data;\nvoid main() { data.v[0] = 1.0; }\n";
        let ctx = context(serde_json::json!({
            "stages": [ { "stage": "compute", "source": compute } ],
            "buffers": [ { "name": "Data" } ]
        }))
        .unwrap();
        let err = Sdl3GpuPolicy.assign(&ctx).unwrap_err();
        assert!(format!("{err:#}").contains("\"Data\" must be marked readonly or read-write"));
    }
}

//! bgfx: Vulkan-style GLSL compiled to SPIR-V, shipped inside bgfx's binary
//! shader container together with a uniform table.

use anyhow::{Result, bail};

use super::{
    BackendLayoutPolicy, LayoutAssignment, RenderingBackend, StageAnnotations, UniformRecord, UniformStyle,
    assign_io_locations, check_capacity, image_format, split_sampler_qualifiers,
};
use crate::pipeline::building_context::PipelineBuildingContext;
use crate::pipeline::layout::{LayoutLimits, PipelineLayout};
use crate::pipeline::traits::{PipelineTrait, StencilFace};
use crate::pipeline::uniform::UniformType;
use crate::shader::declaration::LayoutQualifier;
use crate::shader::types::ShaderStage;

pub const GLSL_VERSION: &str = "450";
pub const CONTAINER_VERSION: u8 = 11;
/// Textures and storage resources start after bgfx's reserved uniform bindings.
pub const TEXTURE_BINDING_SHIFT: u32 = 16;

const RESOURCE_SET: u32 = 0;

pub const UNIFORM_SAMPLER: u8 = 0;
pub const UNIFORM_VEC4: u8 = 2;
pub const UNIFORM_MAT3: u8 = 3;
pub const UNIFORM_MAT4: u8 = 4;
pub const FRAGMENT_BIT: u8 = 0x10;
pub const SAMPLER_BIT: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextureComponent {
    Float = 0,
    Int = 1,
    Uint = 2,
    Depth = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextureDimension {
    D1 = 0,
    D2 = 1,
    D2Array = 2,
    Cube = 3,
    CubeArray = 4,
    D3 = 5,
}

/// Component and dimension of a GLSL sampler type such as `isampler2DArray`.
pub fn texture_info(sampler_type: &str) -> (TextureComponent, TextureDimension) {
    let (component, rest) = if sampler_type.ends_with("Shadow") {
        (TextureComponent::Depth, sampler_type.trim_end_matches("Shadow"))
    } else if let Some(rest) = sampler_type.strip_prefix('i') {
        (TextureComponent::Int, rest)
    } else if let Some(rest) = sampler_type.strip_prefix('u') {
        (TextureComponent::Uint, rest)
    } else {
        (TextureComponent::Float, sampler_type)
    };
    let dimension = match rest {
        "sampler1D" | "sampler1DArray" => TextureDimension::D1,
        "sampler2DArray" => TextureDimension::D2Array,
        "sampler3D" => TextureDimension::D3,
        "samplerCube" => TextureDimension::Cube,
        "samplerCubeArray" => TextureDimension::CubeArray,
        _ => TextureDimension::D2,
    };
    (component, dimension)
}

fn register_type(ty: UniformType) -> (u8, u16) {
    match ty {
        UniformType::Mat3 => (UNIFORM_MAT3, 3),
        UniformType::Mat4 => (UNIFORM_MAT4, 4),
        _ => (UNIFORM_VEC4, 1),
    }
}

/// The bgfx uniform table for `stage`: UBO members first, then samplers.
pub fn uniform_table(layout: &PipelineLayout, stage: ShaderStage) -> Result<Vec<UniformRecord>> {
    let stage_bit = if stage == ShaderStage::Fragment { FRAGMENT_BIT } else { 0 };
    let mut records = Vec::new();
    if let Some(idx) = layout.ubo_for_stage(stage) {
        let ubo = &layout.ubos[idx];
        for uniform in ubo.uniforms() {
            let Some(slot) = ubo.slot_of(&uniform.name) else {
                bail!("uniform \"{}\" has no slot in {}", uniform.name, ubo.block_name());
            };
            let (ty, regs) = register_type(uniform.ty);
            records.push(UniformRecord {
                name: uniform.name.clone(),
                ty: ty | stage_bit,
                num: u8::try_from(uniform.length)?,
                reg_index: u16::try_from(slot.offset)?,
                reg_count: regs * u16::try_from(uniform.length)?,
                tex_info: 0,
                tex_format: 0,
            });
        }
    }
    for sampler in layout.samplers.used_by(stage) {
        let Some(binding) = sampler.binding() else {
            bail!("sampler \"{}\" has no binding", sampler.name);
        };
        let (component, dimension) = texture_info(&sampler.ty);
        records.push(UniformRecord {
            name: sampler.name.clone(),
            ty: UNIFORM_SAMPLER | SAMPLER_BIT | stage_bit,
            num: 1,
            reg_index: u16::try_from(binding)?,
            reg_count: 1,
            tex_info: component as u16 | (dimension as u16) << 8,
            tex_format: 0,
        });
    }
    Ok(records)
}

fn stage_tag(stage: ShaderStage) -> u8 {
    match stage {
        ShaderStage::Vertex => b'V',
        ShaderStage::Fragment => b'F',
        ShaderStage::Compute => b'C',
    }
}

/// Wraps compiled bytecode in the bgfx shader container. All fields are little-endian.
pub fn serialize_container(stage: ShaderStage, uniforms: &[UniformRecord], bytecode: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytecode.len() + 16 + uniforms.len() * 16);
    out.extend_from_slice(&[stage_tag(stage), b'S', b'H', CONTAINER_VERSION]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&u16::try_from(uniforms.len())?.to_le_bytes());
    for u in uniforms {
        let name = u.name.as_bytes();
        let Ok(len) = u8::try_from(name.len()) else {
            bail!("uniform name \"{}\" is longer than 255 bytes", u.name);
        };
        out.push(len);
        out.extend_from_slice(name);
        out.push(u.ty);
        out.push(u.num);
        out.extend_from_slice(&u.reg_index.to_le_bytes());
        out.extend_from_slice(&u.reg_count.to_le_bytes());
        out.extend_from_slice(&u.tex_info.to_le_bytes());
        out.extend_from_slice(&u.tex_format.to_le_bytes());
    }
    out.extend_from_slice(&u32::try_from(bytecode.len())?.to_le_bytes());
    out.extend_from_slice(bytecode);
    out.push(0);
    Ok(out)
}

fn check_stencil_face(face: &StencilFace, which: &str) -> Result<()> {
    if face.reference > 0xff || face.mask > 0xff {
        bail!("bgfx stencil {which} reference and mask must fit in 8 bits");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BgfxPolicy;

impl BackendLayoutPolicy for BgfxPolicy {
    fn backend(&self) -> RenderingBackend {
        RenderingBackend::Bgfx
    }

    fn limits(&self) -> LayoutLimits {
        LayoutLimits {
            attribute_alignment: 16,
            max_uniform_buffers: 2,
            max_samplers: 16,
            max_images: 16,
            max_storage_buffers: 16,
        }
    }

    fn validate_traits(&self, traits: &[PipelineTrait]) -> Result<()> {
        for t in traits {
            match t {
                PipelineTrait::StencilTest { front, back } => {
                    check_stencil_face(front, "front")?;
                    if let Some(back) = back {
                        check_stencil_face(back, "back")?;
                    }
                }
                PipelineTrait::DepthTest { .. } | PipelineTrait::Blend { .. } | PipelineTrait::CullFace { .. } => {}
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
        // all texture-like resources share bgfx's 16 stage slots
        let texture_slots = layout.samplers.len() + layout.images.len() + layout.ssbos.len();
        check_capacity(self.backend(), "texture slot", texture_slots, limits.max_samplers)?;

        let order = ctx.stage_order();
        layout.samplers.assign_bindings(TEXTURE_BINDING_SHIFT, &order);
        let image_base = TEXTURE_BINDING_SHIFT + layout.samplers.len() as u32;
        layout.images.assign_bindings(image_base, &order);
        let sampler_base = layout.ssbos.assign_bindings(image_base + layout.images.len() as u32, &order);

        let mut stages: Vec<StageAnnotations> = order
            .iter()
            .map(|&stage| StageAnnotations::new(stage, GLSL_VERSION))
            .collect();
        assign_io_locations(ctx, &mut stages);

        for ann in &mut stages {
            let stage = ann.stage;
            if let Some(pre) = ctx.stage(stage) {
                ann.macros = super::vulkan::compatibility_macros(stage, |ident| pre.references(ident));
            }
            if let Some(idx) = layout.ubo_for_stage(stage) {
                ann.uniforms =
                    UniformStyle::Block(LayoutQualifier::binding(Some(RESOURCE_SET), layout.ubos[idx].binding));
            }
            split_sampler_qualifiers(ann, &layout, RESOURCE_SET, TEXTURE_BINDING_SHIFT, sampler_base);
            ann.split_matrix_inputs = true;
            for d in layout.images.used_by(stage) {
                if let Some(binding) = d.binding() {
                    let q = LayoutQualifier::binding(Some(RESOURCE_SET), binding)
                        .with_extra(image_format(ctx, stage, &d.name));
                    ann.images.insert(d.name.clone(), q);
                }
            }
            for d in layout.ssbos.used_by(stage) {
                if let Some(binding) = d.binding() {
                    ann.buffers.insert(
                        d.name.clone(),
                        LayoutQualifier::binding(Some(RESOURCE_SET), binding).with_extra("std430"),
                    );
                }
            }
            ann.uniform_table = uniform_table(&layout, stage)?;
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
    use crate::manifest::parse_manifest;

    fn context(json: serde_json::Value) -> PipelineBuildingContext {
        let manifest = parse_manifest(&json.to_string()).unwrap();
        PipelineBuildingContext::new(&manifest, BgfxPolicy.limits()).unwrap()
    }

    fn textured_quad() -> PipelineBuildingContext {
        context(serde_json::json!({
            "stages": [
                { "stage": "vertex", "source": "vec4 ark_main(vec3 position, vec2 uv) { return u_VP * vec4(position, 1.0); }" },
                { "stage": "fragment", "source": "vec4 ark_main() { return texture(u_Texture0, v_Uv) * u_Tint * u_Weights[1].x; }" }
            ],
            "uniforms": [
                { "name": "u_Tint", "type": "vec4", "value": "1,1,1,1" },
                { "name": "u_Weights", "type": "vec4", "length": 2 }
            ],
            "samplers": [ { "type": "isampler2DArray" } ]
        }))
    }

    #[test]
    fn test_texture_info() {
        assert_eq!(texture_info("sampler2D"), (TextureComponent::Float, TextureDimension::D2));
        assert_eq!(texture_info("usamplerCube"), (TextureComponent::Uint, TextureDimension::Cube));
        assert_eq!(texture_info("sampler2DShadow"), (TextureComponent::Depth, TextureDimension::D2));
        assert_eq!(texture_info("isampler2DArray"), (TextureComponent::Int, TextureDimension::D2Array));
    }

    #[test]
    fn test_fragment_uniform_table() {
        let ctx = textured_quad();
        let assignment = BgfxPolicy.assign(&ctx).unwrap();
        let fragment = assignment.stage(ShaderStage::Fragment).unwrap();
        let table = &fragment.uniform_table;
        assert_eq!(table.len(), 3);

        let tint = table.iter().find(|u| u.name == "u_Tint").unwrap();
        let weights = table.iter().find(|u| u.name == "u_Weights").unwrap();
        assert_eq!(tint.ty, UNIFORM_VEC4 | FRAGMENT_BIT);
        assert_eq!(weights.num, 2);
        assert_eq!(weights.reg_count, 2);
        assert_ne!(tint.reg_index, weights.reg_index);

        let sampler = table.iter().find(|u| u.name == "u_Texture0").unwrap();
        assert_eq!(sampler.ty, UNIFORM_SAMPLER | SAMPLER_BIT | FRAGMENT_BIT);
        assert_eq!(sampler.reg_index, TEXTURE_BINDING_SHIFT as u16);
        assert_eq!(sampler.tex_info, 1 | (2 << 8));
        assert_eq!(fragment.samplers["u_Texture0"], LayoutQualifier::binding(Some(0), 16));
        assert_eq!(fragment.sampler_objects["u_Texture0"], LayoutQualifier::binding(Some(0), 17));

        let vertex = assignment.stage(ShaderStage::Vertex).unwrap();
        assert_eq!(vertex.uniform_table.len(), 1);
        assert_eq!(vertex.uniform_table[0].ty, UNIFORM_MAT4);
        assert_eq!(vertex.uniform_table[0].reg_count, 4);
    }

    #[test]
    fn test_container_layout() {
        let records = vec![UniformRecord {
            name: "u_Tint".to_string(),
            ty: UNIFORM_VEC4 | FRAGMENT_BIT,
            num: 1,
            reg_index: 16,
            reg_count: 1,
            tex_info: 0,
            tex_format: 0,
        }];
        let bytes = serialize_container(ShaderStage::Fragment, &records, &[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
        assert_eq!(&bytes[..4], b"FSH\x0b");
        assert_eq!(&bytes[4..12], &[0; 8]);
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 1);
        assert_eq!(bytes[14], 6);
        assert_eq!(&bytes[15..21], b"u_Tint");
        assert_eq!(bytes[21], 0x12);
        assert_eq!(bytes[22], 1);
        assert_eq!(u16::from_le_bytes([bytes[23], bytes[24]]), 16);
        let size_at = 21 + 2 + 8;
        assert_eq!(u32::from_le_bytes(bytes[size_at..size_at + 4].try_into().unwrap()), 4);
        assert_eq!(&bytes[size_at + 4..size_at + 8], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(bytes.last(), Some(&0));
        assert_eq!(bytes.len(), size_at + 9);
    }

    #[test]
    fn test_wide_stencil_values_are_rejected() {
        let traits: Vec<PipelineTrait> = serde_json::from_value(serde_json::json!([
            { "type": "stencilTest", "front": { "reference": 300 }, "back": {} }
        ]))
        .unwrap();
        let err = BgfxPolicy.validate_traits(&traits).unwrap_err();
        assert!(format!("{err:#}").contains("fit in 8 bits"));
    }
}

use anyhow::{Context, Result, anyhow, bail};
use tracing::warn;

use crate::hash::name_set_hash;
use crate::shader::types::{ShaderStage, StageMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Int,
    Int2,
    Int3,
    Int4,
    UInt,
    Float,
    Float2,
    Float3,
    Float4,
    Mat3,
    Mat4,
}

impl UniformType {
    pub fn parse(ty: &str) -> Result<Self> {
        Ok(match ty {
            "int" | "bool" => UniformType::Int,
            "ivec2" => UniformType::Int2,
            "ivec3" => UniformType::Int3,
            "ivec4" => UniformType::Int4,
            "uint" => UniformType::UInt,
            "float" => UniformType::Float,
            "vec2" => UniformType::Float2,
            "vec3" => UniformType::Float3,
            "vec4" => UniformType::Float4,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            other => bail!("unsupported uniform type \"{other}\""),
        })
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformType::Int => "int",
            UniformType::Int2 => "ivec2",
            UniformType::Int3 => "ivec3",
            UniformType::Int4 => "ivec4",
            UniformType::UInt => "uint",
            UniformType::Float => "float",
            UniformType::Float2 => "vec2",
            UniformType::Float3 => "vec3",
            UniformType::Float4 => "vec4",
            UniformType::Mat3 => "mat3",
            UniformType::Mat4 => "mat4",
        }
    }

    pub fn component_count(self) -> usize {
        match self {
            UniformType::Int | UniformType::UInt | UniformType::Float => 1,
            UniformType::Int2 | UniformType::Float2 => 2,
            UniformType::Int3 | UniformType::Float3 => 3,
            UniformType::Int4 | UniformType::Float4 => 4,
            UniformType::Mat3 => 9,
            UniformType::Mat4 => 16,
        }
    }

    /// Byte size of one element; every component is four bytes.
    pub fn size(self) -> u32 {
        self.component_count() as u32 * 4
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            UniformType::Int | UniformType::Int2 | UniformType::Int3 | UniformType::Int4 | UniformType::UInt
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub name: String,
    pub ty: UniformType,
    pub length: u32,
    /// Initial contents, `size()` bytes long.
    pub value: Vec<u8>,
}

impl Uniform {
    pub fn new(name: impl Into<String>, ty: UniformType, length: u32) -> Self {
        let length = length.max(1);
        Uniform {
            name: name.into(),
            ty,
            length,
            value: vec![0; (ty.size() * length) as usize],
        }
    }

    /// Parses a comma separated initial value such as `"1,1,1,1"`.
    pub fn with_value(mut self, text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let expected = self.ty.component_count() * self.length as usize;
        if parts.len() != expected {
            bail!(
                "uniform \"{}\" of type {} expects {expected} values, got {}",
                self.name,
                self.ty.glsl_name(),
                parts.len()
            );
        }
        self.value = if self.ty.is_integer() {
            let ints = parts
                .iter()
                .map(|p| p.parse::<i32>().map_err(|e| anyhow!("{p}: {e}")))
                .collect::<Result<Vec<i32>>>()
                .with_context(|| format!("invalid value for uniform \"{}\"", self.name))?;
            bytemuck::cast_slice(&ints).to_vec()
        } else {
            let floats = parts
                .iter()
                .map(|p| p.parse::<f32>().map_err(|e| anyhow!("{p}: {e}")))
                .collect::<Result<Vec<f32>>>()
                .with_context(|| format!("invalid value for uniform \"{}\"", self.name))?;
            bytemuck::cast_slice(&floats).to_vec()
        };
        Ok(self)
    }

    pub fn size(&self) -> u32 {
        self.ty.size() * self.length
    }

    pub fn glsl_type(&self) -> &'static str {
        self.ty.glsl_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSlot {
    pub offset: u32,
    pub size: u32,
}

/// A uniform block shared by every stage that touches the same uniform set.
#[derive(Debug, Clone, PartialEq)]
pub struct Ubo {
    pub binding: u32,
    pub key: u64,
    pub stages: StageMask,
    uniforms: Vec<Uniform>,
    slots: Vec<ByteSlot>,
    size: u32,
}

impl Ubo {
    pub fn new(binding: u32, key: u64) -> Self {
        Ubo {
            binding,
            key,
            stages: StageMask::empty(),
            uniforms: Vec::new(),
            slots: Vec::new(),
            size: 0,
        }
    }

    pub fn key_for<'a>(names: impl IntoIterator<Item = &'a str>) -> u64 {
        name_set_hash(names)
    }

    pub fn add_stage(&mut self, stage: ShaderStage) {
        self.stages.insert(stage);
    }

    /// Adds a uniform if the block does not hold it yet.
    pub fn add_uniform(&mut self, uniform: Uniform) {
        if !self.uniforms.iter().any(|u| u.name == uniform.name) {
            self.uniforms.push(uniform);
        }
    }

    /// Computes tightly packed byte slots for the current uniform order.
    pub fn initialize(&mut self) -> Result<()> {
        self.slots.clear();
        let mut offset = 0;
        for uniform in &self.uniforms {
            if matches!(uniform.ty, UniformType::Float3 | UniformType::Int3 | UniformType::Mat3) {
                warn!(
                    uniform = %uniform.name,
                    "3-component uniforms are padded differently across APIs; prefer vec4/mat4"
                );
            }
            let size = uniform.size();
            if offset % 4 != 0 {
                bail!("uniform \"{}\" would start at unaligned offset {offset}", uniform.name);
            }
            self.slots.push(ByteSlot { offset, size });
            offset += size;
        }
        self.size = offset;
        Ok(())
    }

    pub fn uniforms(&self) -> &[Uniform] {
        &self.uniforms
    }

    pub fn slots(&self) -> &[ByteSlot] {
        &self.slots
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn slot_of(&self, name: &str) -> Option<ByteSlot> {
        let idx = self.uniforms.iter().position(|u| u.name == name)?;
        self.slots.get(idx).copied()
    }

    /// Initial buffer contents assembled from each uniform's value.
    pub fn initial_data(&self) -> Vec<u8> {
        let mut data = vec![0_u8; self.size as usize];
        for (uniform, slot) in self.uniforms.iter().zip(&self.slots) {
            let start = slot.offset as usize;
            let end = start + uniform.value.len().min(slot.size as usize);
            data[start..end].copy_from_slice(&uniform.value[..end - start]);
        }
        data
    }

    pub fn block_name(&self) -> String {
        format!("UBO{}", self.binding)
    }
}

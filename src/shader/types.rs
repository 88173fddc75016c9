use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute];

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vertex" | "vert" => Ok(ShaderStage::Vertex),
            "fragment" | "frag" => Ok(ShaderStage::Fragment),
            "compute" | "comp" => Ok(ShaderStage::Compute),
            other => bail!("unknown shader stage '{other}' (expected vertex, fragment or compute)"),
        }
    }

    fn bit(self) -> u8 {
        match self {
            ShaderStage::Vertex => 1,
            ShaderStage::Fragment => 1 << 1,
            ShaderStage::Compute => 1 << 2,
        }
    }

    pub fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set of stages touching a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageMask(u8);

impl StageMask {
    pub const fn empty() -> Self {
        StageMask(0)
    }

    pub fn of(stage: ShaderStage) -> Self {
        StageMask(stage.bit())
    }

    pub fn insert(&mut self, stage: ShaderStage) {
        self.0 |= stage.bit();
    }

    pub fn contains(self, stage: ShaderStage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl fmt::Display for StageMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages().map(ShaderStage::name).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Number of vertex-input locations a GLSL type occupies.
pub fn location_count(glsl_type: &str) -> u32 {
    match glsl_type {
        "mat4" | "dmat4" => 4,
        "mat3" | "dmat3" => 3,
        "mat2" | "dmat2" => 2,
        _ => 1,
    }
}

/// Column count and column type of a float matrix type.
pub fn matrix_columns(glsl_type: &str) -> Option<(u32, &'static str)> {
    match glsl_type {
        "mat4" => Some((4, "vec4")),
        "mat3" => Some((3, "vec3")),
        "mat2" => Some((2, "vec2")),
        _ => None,
    }
}

pub fn is_sampler_type(glsl_type: &str) -> bool {
    glsl_type.starts_with("sampler")
        || glsl_type.starts_with("isampler")
        || glsl_type.starts_with("usampler")
}

pub fn is_image_type(glsl_type: &str) -> bool {
    glsl_type.starts_with("image") || glsl_type.starts_with("iimage") || glsl_type.starts_with("uimage")
}

/// Integer-valued varyings must be declared `flat` between stages.
pub fn is_integer_type(glsl_type: &str) -> bool {
    matches!(
        glsl_type,
        "int" | "uint" | "ivec2" | "ivec3" | "ivec4" | "uvec2" | "uvec3" | "uvec4"
    )
}

/// `sampler2D` -> `texture2D`, used when a backend splits combined samplers.
pub fn texture_type_for_sampler(sampler_type: &str) -> String {
    let (prefix, rest) = match sampler_type.strip_prefix("isampler") {
        Some(rest) => ("i", rest),
        None => match sampler_type.strip_prefix("usampler") {
            Some(rest) => ("u", rest),
            None => ("", sampler_type.strip_prefix("sampler").unwrap_or(sampler_type)),
        },
    };
    format!("{prefix}texture{rest}")
}

pub fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_mask_tracks_members() {
        let mut mask = StageMask::of(ShaderStage::Fragment);
        assert!(!mask.contains(ShaderStage::Vertex));
        mask.insert(ShaderStage::Vertex);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.to_string(), "vertex|fragment");
    }

    #[test]
    fn sampler_types_map_to_texture_types() {
        assert_eq!(texture_type_for_sampler("sampler2D"), "texture2D");
        assert_eq!(texture_type_for_sampler("samplerCube"), "textureCube");
        assert_eq!(texture_type_for_sampler("usampler2DArray"), "utexture2DArray");
    }

    #[test]
    fn capitalize_first_keeps_tail() {
        assert_eq!(capitalize_first("texCoordinate"), "TexCoordinate");
        assert_eq!(capitalize_first(""), "");
    }
}

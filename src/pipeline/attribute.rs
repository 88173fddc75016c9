use anyhow::{Result, bail};

/// What an attribute carries, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeUsage {
    Position,
    TexCoord,
    Normal,
    Tangent,
    Bitangent,
    Color,
    ModelMatrix,
    NodeId,
    MaterialId,
    Custom,
}

impl AttributeUsage {
    /// `name` is the capitalized logical name, without the `a_` prefix.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "position" => AttributeUsage::Position,
            "normal" => AttributeUsage::Normal,
            "tangent" => AttributeUsage::Tangent,
            "bitangent" => AttributeUsage::Bitangent,
            "color" => AttributeUsage::Color,
            "model" => AttributeUsage::ModelMatrix,
            "nodeid" => AttributeUsage::NodeId,
            "materialid" => AttributeUsage::MaterialId,
            _ if lower.starts_with("uv") || lower.starts_with("texcoord") => AttributeUsage::TexCoord,
            _ => AttributeUsage::Custom,
        }
    }

    /// Declared types accepted for this usage; `None` means the generic table applies.
    pub fn allowed_types(self) -> Option<&'static [&'static str]> {
        match self {
            AttributeUsage::Position => Some(&["int", "vec2", "vec3", "vec4"]),
            AttributeUsage::TexCoord => Some(&["int", "vec2", "vec3"]),
            AttributeUsage::Normal | AttributeUsage::Tangent | AttributeUsage::Bitangent => Some(&["vec3"]),
            AttributeUsage::Color => Some(&["vec4", "vec4b"]),
            AttributeUsage::ModelMatrix => Some(&["mat4"]),
            AttributeUsage::NodeId | AttributeUsage::MaterialId => Some(&["int", "uint"]),
            AttributeUsage::Custom => None,
        }
    }

    /// Type assumed when a varying of this usage is only known by name.
    pub fn default_type(self) -> Option<&'static str> {
        match self {
            AttributeUsage::Position | AttributeUsage::Normal | AttributeUsage::Tangent | AttributeUsage::Bitangent => {
                Some("vec3")
            }
            AttributeUsage::TexCoord => Some("vec2"),
            AttributeUsage::Color => Some("vec4"),
            AttributeUsage::ModelMatrix => Some("mat4"),
            AttributeUsage::NodeId | AttributeUsage::MaterialId => Some("int"),
            AttributeUsage::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Float,
    Int,
    UInt,
    Short,
    UShort,
    Byte,
    UByte,
}

impl ComponentType {
    pub fn size(self) -> u32 {
        match self {
            ComponentType::Float | ComponentType::Int | ComponentType::UInt => 4,
            ComponentType::Short | ComponentType::UShort => 2,
            ComponentType::Byte | ComponentType::UByte => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub usage: AttributeUsage,
    pub name: String,
    pub component_type: ComponentType,
    /// GLSL type the shader sees (`vec4` for a `vec4b` manifest attribute).
    pub declared_type: String,
    pub component_count: u32,
    pub normalized: bool,
    pub divisor: u32,
    /// Byte offset inside the stream, unset until the stream is laid out.
    pub offset: Option<u32>,
}

impl Attribute {
    pub fn size(&self) -> u32 {
        self.component_count * self.component_type.size()
    }

    /// Builds an attribute for `name` declared as `ty`, enforcing the usage table.
    pub fn infer(name: &str, ty: &str, divisor: u32) -> Result<Self> {
        let usage = AttributeUsage::infer(name);
        if let Some(allowed) = usage.allowed_types() {
            if !allowed.contains(&ty) {
                bail!(
                    "attribute \"{name}\" is inferred as {usage:?} and must be one of {allowed:?}, got \"{ty}\""
                );
            }
        }
        let (component_type, component_count, normalized, declared_type) = match (usage, ty) {
            (AttributeUsage::Position, "int") => (ComponentType::Int, 1, false, "int"),
            (AttributeUsage::Position, t) => {
                let n = vector_width(t).unwrap_or(3);
                (ComponentType::Float, n.min(3), false, t)
            }
            (AttributeUsage::TexCoord, "vec2") => (ComponentType::UShort, 2, true, "vec2"),
            (AttributeUsage::TexCoord, "vec3") => (ComponentType::Float, 3, false, "vec3"),
            (AttributeUsage::TexCoord, _) => (ComponentType::Int, 1, false, "int"),
            (AttributeUsage::Color, _) => (ComponentType::UByte, 4, true, "vec4"),
            (AttributeUsage::NodeId | AttributeUsage::MaterialId, "uint") => (ComponentType::UInt, 1, false, "uint"),
            (AttributeUsage::NodeId | AttributeUsage::MaterialId, _) => (ComponentType::Int, 1, false, "int"),
            (_, t) => return generic(usage, name, t, divisor),
        };
        Ok(Attribute {
            usage,
            name: name.to_string(),
            component_type,
            declared_type: declared_type.to_string(),
            component_count,
            normalized,
            divisor,
            offset: None,
        })
    }
}

fn vector_width(ty: &str) -> Option<u32> {
    let digit = ty.strip_prefix("vec").or_else(|| ty.strip_prefix("ivec")).or_else(|| ty.strip_prefix("uvec"))?;
    digit.parse().ok()
}

/// Generic manifest type table for attributes without a dedicated usage rule.
fn generic(usage: AttributeUsage, name: &str, ty: &str, divisor: u32) -> Result<Attribute> {
    let (component_type, component_count, normalized, declared_type) = match ty {
        "float" => (ComponentType::Float, 1, false, "float"),
        "vec2" | "vec3" | "vec4" => (ComponentType::Float, vector_width(ty).unwrap_or(4), false, ty),
        "int" => (ComponentType::Int, 1, false, "int"),
        "uint" => (ComponentType::UInt, 1, false, "uint"),
        "ivec2" | "ivec3" | "ivec4" => (ComponentType::Int, vector_width(ty).unwrap_or(4), false, ty),
        "uvec2" | "uvec3" | "uvec4" => (ComponentType::UInt, vector_width(ty).unwrap_or(4), false, ty),
        "uint8" => (ComponentType::UByte, 1, false, "uint"),
        "vec3b" => (ComponentType::UByte, 3, true, "vec3"),
        "vec4b" => (ComponentType::UByte, 4, true, "vec4"),
        "mat3" => (ComponentType::Float, 9, false, "mat3"),
        "mat4" => (ComponentType::Float, 16, false, "mat4"),
        other => bail!("unknown attribute type \"{other}\" for attribute \"{name}\""),
    };
    Ok(Attribute {
        usage,
        name: name.to_string(),
        component_type,
        declared_type: declared_type.to_string(),
        component_count,
        normalized,
        divisor,
        offset: None,
    })
}

/// The GLSL type a manifest attribute type is declared as in shader text.
pub fn glsl_type_of(manifest_type: &str) -> &str {
    match manifest_type {
        "uint8" => "uint",
        "vec3b" => "vec3",
        "vec4b" => "vec4",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_inference() {
        assert_eq!(AttributeUsage::infer("TexCoordinate"), AttributeUsage::TexCoord);
        assert_eq!(AttributeUsage::infer("Uv1"), AttributeUsage::TexCoord);
        assert_eq!(AttributeUsage::infer("Model"), AttributeUsage::ModelMatrix);
        assert_eq!(AttributeUsage::infer("Weights"), AttributeUsage::Custom);
    }

    #[test]
    fn test_position_keeps_at_most_three_components() {
        let attr = Attribute::infer("Position", "vec4", 0).unwrap();
        assert_eq!(attr.component_count, 3);
        assert_eq!(attr.size(), 12);
        assert_eq!(attr.declared_type, "vec4");
    }

    #[test]
    fn test_tex_coord_is_normalized_ushort() {
        let attr = Attribute::infer("TexCoordinate", "vec2", 0).unwrap();
        assert_eq!(attr.component_type, ComponentType::UShort);
        assert!(attr.normalized);
        assert_eq!(attr.size(), 4);
    }

    #[test]
    fn test_color_accepts_byte_colors() {
        for ty in ["vec4", "vec4b"] {
            let attr = Attribute::infer("Color", ty, 0).unwrap();
            assert_eq!((attr.component_type, attr.component_count, attr.normalized), (ComponentType::UByte, 4, true));
            assert_eq!(attr.declared_type, "vec4");
        }
        assert!(Attribute::infer("Color", "vec3", 0).is_err());
    }

    #[test]
    fn test_usage_rejects_disallowed_types() {
        let err = Attribute::infer("TexCoordinate", "vec4", 0).unwrap_err();
        assert!(format!("{err:#}").contains("TexCoord"));
        let err = Attribute::infer("Model", "mat3", 1).unwrap_err();
        assert!(format!("{err:#}").contains("mat4"));
    }

    #[test]
    fn test_generic_table() {
        let attr = Attribute::infer("Tint", "vec4b", 0).unwrap();
        assert_eq!((attr.component_type, attr.component_count, attr.normalized), (ComponentType::UByte, 4, true));
        assert_eq!(attr.declared_type, "vec4");
        assert!(Attribute::infer("Weights", "dvec4", 0).is_err());
        assert_eq!(Attribute::infer("Model", "mat4", 1).unwrap().size(), 64);
    }
}

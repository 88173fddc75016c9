//! Named, typed shader declarations and their per-category lists.
//!
//! Declarations never carry layout numbers themselves. A backend policy
//! produces [`LayoutQualifier`]s keyed by declaration name and the renderer
//! combines both when emitting text.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeclarationCategory {
    In,
    Out,
    Uniform,
    Sampler,
    Image,
    Buffer,
}

impl DeclarationCategory {
    pub fn name(self) -> &'static str {
        match self {
            DeclarationCategory::In => "in",
            DeclarationCategory::Out => "out",
            DeclarationCategory::Uniform => "uniform",
            DeclarationCategory::Sampler => "sampler",
            DeclarationCategory::Image => "image",
            DeclarationCategory::Buffer => "buffer",
        }
    }
}

/// Memory access declared on a storage image or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl StorageAccess {
    pub fn from_qualifiers<'a>(qualifiers: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut access = None;
        for q in qualifiers {
            access = match (access, q) {
                (None, "readonly") => Some(StorageAccess::ReadOnly),
                (None, "writeonly") => Some(StorageAccess::WriteOnly),
                (Some(StorageAccess::ReadOnly), "writeonly") | (Some(StorageAccess::WriteOnly), "readonly") => {
                    Some(StorageAccess::ReadWrite)
                }
                (current, _) => current,
            };
        }
        access
    }

    pub fn keyword(self) -> Option<&'static str> {
        match self {
            StorageAccess::ReadOnly => Some("readonly"),
            StorageAccess::WriteOnly => Some("writeonly"),
            StorageAccess::ReadWrite => None,
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, StorageAccess::ReadOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationOrigin {
    /// Written in the stage source.
    Source,
    /// Registered from the manifest or predefined tables.
    Implicit,
    /// Synthesized while linking stages.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Logical name shared across stages: `TexCoordinate` for varyings,
    /// `u_Color` for uniforms, the block name for buffers.
    pub name: String,
    /// Identifier emitted in GLSL (`a_TexCoordinate`, `v_TexCoordinate`, ...).
    pub symbol: String,
    pub ty: String,
    pub length: u32,
    pub flat: bool,
    pub access: Option<StorageAccess>,
    /// Image format qualifier such as `rgba8`.
    pub format: Option<String>,
    /// Member list of a buffer block.
    pub members: Option<String>,
    pub instance: Option<String>,
    pub origin: DeclarationOrigin,
}

impl Declaration {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, ty: impl Into<String>) -> Self {
        Declaration {
            name: name.into(),
            symbol: symbol.into(),
            ty: ty.into(),
            length: 1,
            flat: false,
            access: None,
            format: None,
            members: None,
            instance: None,
            origin: DeclarationOrigin::Source,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length.max(1);
        self
    }

    pub fn with_origin(mut self, origin: DeclarationOrigin) -> Self {
        self.origin = origin;
        self
    }

    fn array_suffix(&self) -> String {
        if self.length > 1 { format!("[{}]", self.length) } else { String::new() }
    }

    /// `vec4 u_Color[2]` style member text.
    pub fn member_text(&self) -> String {
        format!("{} {}{}", self.ty, self.symbol, self.array_suffix())
    }

    /// Renders the declaration as a single GLSL statement.
    pub fn render(&self, category: DeclarationCategory, layout: Option<&LayoutQualifier>) -> String {
        let mut out = String::new();
        if let Some(layout) = layout.filter(|l| !l.is_empty()) {
            out.push_str(&layout.to_string());
            out.push(' ');
        }
        if self.flat && matches!(category, DeclarationCategory::In | DeclarationCategory::Out) {
            out.push_str("flat ");
        }
        if let Some(keyword) = self.access.and_then(StorageAccess::keyword) {
            out.push_str(keyword);
            out.push(' ');
        }
        match category {
            DeclarationCategory::Buffer => {
                out.push_str(&format!(
                    "buffer {} {{{}}}{};",
                    self.symbol,
                    self.members.as_deref().unwrap_or(""),
                    self.instance.as_deref().map(|i| format!(" {i}")).unwrap_or_default()
                ));
            }
            DeclarationCategory::In => out.push_str(&format!("in {};", self.member_text())),
            DeclarationCategory::Out => out.push_str(&format!("out {};", self.member_text())),
            DeclarationCategory::Uniform | DeclarationCategory::Sampler | DeclarationCategory::Image => {
                out.push_str(&format!("uniform {};", self.member_text()))
            }
        }
        out
    }
}

/// `layout(...)` contents assigned by a backend policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutQualifier {
    pub location: Option<u32>,
    pub set: Option<u32>,
    pub binding: Option<u32>,
    /// Leading free-form entries such as `std430` or `rgba8`.
    pub extra: Vec<String>,
}

impl LayoutQualifier {
    pub fn location(location: u32) -> Self {
        LayoutQualifier {
            location: Some(location),
            ..Default::default()
        }
    }

    pub fn binding(set: Option<u32>, binding: u32) -> Self {
        LayoutQualifier {
            set,
            binding: Some(binding),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra.push(extra.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.set.is_none() && self.binding.is_none() && self.extra.is_empty()
    }
}

impl fmt::Display for LayoutQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.extra.clone();
        if let Some(location) = self.location {
            parts.push(format!("location = {location}"));
        }
        if let Some(set) = self.set {
            parts.push(format!("set = {set}"));
        }
        if let Some(binding) = self.binding {
            parts.push(format!("binding = {binding}"));
        }
        write!(f, "layout({})", parts.join(", "))
    }
}

/// Insertion-ordered name -> declaration map for one category of one stage.
#[derive(Debug, Clone)]
pub struct DeclarationList {
    category: DeclarationCategory,
    items: Vec<Declaration>,
}

impl DeclarationList {
    pub fn new(category: DeclarationCategory) -> Self {
        DeclarationList {
            category,
            items: Vec::new(),
        }
    }

    pub fn category(&self) -> DeclarationCategory {
        self.category
    }

    pub fn get(&self, name: &str) -> Option<&Declaration> {
        self.items.iter().find(|d| d.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Declaration> {
        self.items.iter_mut().find(|d| d.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a declaration, or returns the existing one when name and type agree.
    /// A different type for the same name is an error naming both types.
    pub fn declare(&mut self, decl: Declaration) -> Result<&Declaration> {
        if let Some(idx) = self.items.iter().position(|d| d.name == decl.name) {
            let existing = &self.items[idx];
            if existing.ty != decl.ty || existing.length != decl.length {
                bail!(
                    "{} \"{}\" redeclared with conflicting types: \"{}{}\" vs \"{}{}\"",
                    self.category.name(),
                    decl.name,
                    existing.ty,
                    array_text(existing.length),
                    decl.ty,
                    array_text(decl.length)
                );
            }
            return Ok(&self.items[idx]);
        }
        self.items.push(decl);
        let last = self.items.len() - 1;
        Ok(&self.items[last])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Declaration> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|d| d.name.as_str())
    }
}

fn array_text(length: u32) -> String {
    if length > 1 { format!("[{length}]") } else { String::new() }
}

impl<'a> IntoIterator for &'a DeclarationList {
    type Item = &'a Declaration;
    type IntoIter = std::slice::Iter<'a, Declaration>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_is_idempotent_for_same_type() {
        let mut list = DeclarationList::new(DeclarationCategory::In);
        list.declare(Declaration::new("Position", "a_Position", "vec3")).unwrap();
        list.declare(Declaration::new("Position", "a_Position", "vec3")).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_declare_conflict_names_both_types() {
        let mut list = DeclarationList::new(DeclarationCategory::Uniform);
        list.declare(Declaration::new("u_Color", "u_Color", "vec4")).unwrap();
        let err = list.declare(Declaration::new("u_Color", "u_Color", "vec3")).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("conflicting types"));
        assert!(msg.contains("\"vec4\" vs \"vec3\""));
    }

    #[test]
    fn test_render_with_layout() {
        let decl = Declaration::new("TexCoordinate", "v_TexCoordinate", "vec2");
        let layout = LayoutQualifier::location(1);
        assert_eq!(
            decl.render(DeclarationCategory::Out, Some(&layout)),
            "layout(location = 1) out vec2 v_TexCoordinate;"
        );
        assert_eq!(decl.render(DeclarationCategory::In, None), "in vec2 v_TexCoordinate;");
    }

    #[test]
    fn test_render_storage_image_and_buffer() {
        let mut image = Declaration::new("u_Image0", "u_Image0", "image2D");
        image.access = Some(StorageAccess::ReadOnly);
        let layout = LayoutQualifier::binding(Some(2), 3).with_extra("rgba8");
        assert_eq!(
            image.render(DeclarationCategory::Image, Some(&layout)),
            "layout(rgba8, set = 2, binding = 3) readonly uniform image2D u_Image0;"
        );

        let mut buffer = Declaration::new("Particles", "Particles", "buffer");
        buffer.members = Some(" vec4 data[]; ".to_string());
        buffer.instance = Some("particles".to_string());
        let layout = LayoutQualifier::binding(Some(0), 0).with_extra("std430");
        assert_eq!(
            buffer.render(DeclarationCategory::Buffer, Some(&layout)),
            "layout(std430, set = 0, binding = 0) buffer Particles { vec4 data[]; } particles;"
        );
    }

    #[test]
    fn test_storage_access_from_qualifiers() {
        assert_eq!(StorageAccess::from_qualifiers(["readonly"]), Some(StorageAccess::ReadOnly));
        assert_eq!(
            StorageAccess::from_qualifiers(["readonly", "writeonly"]),
            Some(StorageAccess::ReadWrite)
        );
        assert_eq!(StorageAccess::from_qualifiers(["flat"]), None);
    }
}

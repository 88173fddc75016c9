use anyhow::{Result, bail};

use super::attribute::Attribute;

/// Attributes sharing one vertex-buffer step rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    pub divisor: u32,
    attributes: Vec<Attribute>,
    stride: u32,
}

pub fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

impl StreamLayout {
    pub fn new(divisor: u32) -> Self {
        StreamLayout {
            divisor,
            attributes: Vec::new(),
            stride: 0,
        }
    }

    /// Appends `attribute` at the current end of the stream.
    pub fn add_attribute(&mut self, mut attribute: Attribute) -> Result<()> {
        if self.attributes.iter().any(|a| a.name == attribute.name) {
            bail!("attribute \"{}\" added twice to stream {}", attribute.name, self.divisor);
        }
        if attribute.divisor != self.divisor {
            bail!(
                "attribute \"{}\" has divisor {} but stream has divisor {}",
                attribute.name,
                attribute.divisor,
                self.divisor
            );
        }
        attribute.offset = Some(self.stride);
        self.stride += attribute.size();
        self.attributes.push(attribute);
        Ok(())
    }

    /// Rounds the stride up to `alignment`. Calling it again is a no-op.
    pub fn align(&mut self, alignment: u32) {
        self.stride = align_up(self.stride, alignment);
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

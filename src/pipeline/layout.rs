use std::collections::BTreeMap;

use super::descriptor::{DescriptorKind, DescriptorTable};
use super::stream_layout::StreamLayout;
use super::uniform::Ubo;

/// Fixed capacities and alignment rules a backend imposes on a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutLimits {
    /// Stride alignment of per-instance streams. Stream 0 always aligns to 4.
    pub attribute_alignment: u32,
    pub max_uniform_buffers: usize,
    pub max_samplers: usize,
    pub max_images: usize,
    pub max_storage_buffers: usize,
}

impl Default for LayoutLimits {
    fn default() -> Self {
        LayoutLimits {
            attribute_alignment: 16,
            max_uniform_buffers: 16,
            max_samplers: 16,
            max_images: 8,
            max_storage_buffers: 8,
        }
    }
}

pub const VERTEX_STREAM_ALIGNMENT: u32 = 4;

/// Resource layout shared by every stage of one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayout {
    /// Vertex streams keyed by divisor.
    pub streams: BTreeMap<u32, StreamLayout>,
    pub ubos: Vec<Ubo>,
    pub ssbos: DescriptorTable,
    pub samplers: DescriptorTable,
    pub images: DescriptorTable,
    pub color_attachment_count: u32,
}

impl Default for PipelineLayout {
    fn default() -> Self {
        PipelineLayout {
            streams: BTreeMap::new(),
            ubos: Vec::new(),
            ssbos: DescriptorTable::new(DescriptorKind::StorageBuffer),
            samplers: DescriptorTable::new(DescriptorKind::Sampler),
            images: DescriptorTable::new(DescriptorKind::Image),
            color_attachment_count: 0,
        }
    }
}

impl PipelineLayout {
    pub fn stream(&self, divisor: u32) -> Option<&StreamLayout> {
        self.streams.get(&divisor)
    }

    /// Index into `ubos` of the block a stage reads, if any.
    pub fn ubo_for_stage(&self, stage: crate::shader::types::ShaderStage) -> Option<usize> {
        self.ubos.iter().position(|u| u.stages.contains(stage))
    }
}

//! Fixed-function state attached to a pipeline, one variant per trait kind.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StencilFace {
    #[serde(default)]
    pub func: CompareFunc,
    #[serde(default)]
    pub reference: u32,
    #[serde(default = "full_mask")]
    pub mask: u32,
    #[serde(default)]
    pub fail: StencilOp,
    #[serde(default)]
    pub depth_fail: StencilOp,
    #[serde(default)]
    pub pass: StencilOp,
}

fn full_mask() -> u32 {
    0xff
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineTrait {
    #[serde(rename_all = "camelCase")]
    DepthTest {
        #[serde(default = "enabled")]
        enabled: bool,
        #[serde(default = "enabled")]
        write_enabled: bool,
        #[serde(default)]
        func: CompareFunc,
        /// Clamp fragment depth instead of clipping.
        #[serde(default)]
        clamp: bool,
    },
    StencilTest {
        front: StencilFace,
        #[serde(default)]
        back: Option<StencilFace>,
    },
    #[serde(rename_all = "camelCase")]
    Blend {
        src_color: BlendFactor,
        dst_color: BlendFactor,
        #[serde(default)]
        color_op: BlendOp,
        #[serde(default)]
        src_alpha: Option<BlendFactor>,
        #[serde(default)]
        dst_alpha: Option<BlendFactor>,
        #[serde(default)]
        alpha_op: BlendOp,
    },
    #[serde(rename_all = "camelCase")]
    CullFace {
        mode: CullMode,
        #[serde(default)]
        front_face: FrontFace,
    },
}

impl PipelineTrait {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineTrait::DepthTest { .. } => "depthTest",
            PipelineTrait::StencilTest { .. } => "stencilTest",
            PipelineTrait::Blend { .. } => "blend",
            PipelineTrait::CullFace { .. } => "cullFace",
        }
    }
}

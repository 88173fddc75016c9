//! Build options shared by the library entry points and the CLI.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::backend::RenderingBackend;
use crate::compiler::spirv::SpirvVersion;

/// Backend-native shader language produced from SPIR-V.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossCompileTarget {
    Msl,
}

impl CrossCompileTarget {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "msl" | "metal" => Ok(CrossCompileTarget::Msl),
            other => bail!("unknown cross-compile target '{other}' (expected msl)"),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            CrossCompileTarget::Msl => "metal",
        }
    }
}

impl fmt::Display for CrossCompileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossCompileTarget::Msl => f.write_str("msl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBuildOptions {
    pub backend: RenderingBackend,
    /// `10..=16` or `0..=6`; see [`SpirvVersion::from_config`].
    #[serde(default)]
    pub spirv_version: u32,
    #[serde(default)]
    pub cross_compile: Option<CrossCompileTarget>,
}

impl PipelineBuildOptions {
    pub fn new(backend: RenderingBackend) -> Self {
        PipelineBuildOptions {
            backend,
            spirv_version: 10,
            cross_compile: None,
        }
    }

    pub fn spirv(&self) -> SpirvVersion {
        SpirvVersion::from_config(self.spirv_version)
    }
}

impl Default for PipelineBuildOptions {
    fn default() -> Self {
        PipelineBuildOptions::new(RenderingBackend::Vulkan)
    }
}

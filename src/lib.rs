//! Shader preprocessing and pipeline layout compilation.
//!
//! A [`manifest::PipelineManifest`] lists the stages of one pipeline, written
//! in the `ark_main` dialect, together with the attributes, uniforms and
//! resources the engine provides. [`compiler::build_pipeline`] turns it into
//! backend-ready shaders for OpenGL ES 3, Vulkan, bgfx or SDL3 GPU.

pub mod backend;
pub mod compiler;
pub mod hash;
pub mod manifest;
pub mod options;
pub mod pipeline;
pub mod shader;

pub use backend::RenderingBackend;
pub use compiler::{CompiledPipeline, build_pipeline, generate_pipeline_sources};
pub use manifest::{PipelineManifest, load_manifest_from_path, parse_manifest};
pub use options::{CrossCompileTarget, PipelineBuildOptions};

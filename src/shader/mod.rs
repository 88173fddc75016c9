//! Per-stage source handling: the `ark_main` dialect scanner, the
//! declaration model and the stage preprocessor.

pub mod declaration;
pub mod preprocessor;
pub mod scanner;
pub mod types;

pub use declaration::{Declaration, DeclarationCategory, DeclarationList, LayoutQualifier, StorageAccess};
pub use preprocessor::{ShaderPreprocessor, StageSnippet};
pub use types::{ShaderStage, StageMask};

//! Cross-stage state: attributes and their vertex streams, uniform blocks,
//! descriptor tables, fixed-function traits and the building context that
//! ties them together.

pub mod attribute;
pub mod building_context;
pub mod descriptor;
pub mod layout;
pub mod stream_layout;
pub mod traits;
pub mod uniform;

pub use building_context::PipelineBuildingContext;
pub use layout::{LayoutLimits, PipelineLayout};

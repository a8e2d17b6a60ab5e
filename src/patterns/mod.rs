//! Patterns
//!
//! - `registry`: named routing/enhancement rules and their usage statistics
//! - `promoter`: mints literal-template patterns from high-scoring history

pub mod promoter;
pub mod registry;

pub use promoter::{PatternPromoter, QualityReport, QualityRun};
pub use registry::{
    OutputFormat, Pattern, PatternMetadata, PatternRegistry, PatternStats, PatternType,
    PromotedTemplate, SharedRegistry, Transformation,
};

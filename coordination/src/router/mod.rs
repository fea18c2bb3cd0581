//! Lane Router: resolves docs/standard/heavy lane from file-list inspection.

mod classifier;

pub use classifier::{ClassificationInputs, ClassificationResult, LaneRouter, LaneRouterError};

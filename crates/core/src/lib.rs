pub mod error;
pub mod ids;
pub mod model;
pub mod resolution;

pub use error::CoreError;
pub use ids::*;
pub use model::*;
pub use resolution::{Confidence, Resolution, ResolutionMethod};

//! Object detection for a photo encyclopedia: ask a vision model what is in
//! an image, validate the structured answer, and map its normalized boxes
//! onto an overlay and onto full-resolution crops.

pub mod crop;
pub mod error;
pub mod files;
pub mod gemini;
pub mod geometry;
pub mod model;
pub mod overlay;
pub mod parse;
pub mod request;
pub mod session;

pub use error::AnalysisError;
pub use model::{AnalysisResult, BoundingBox, DetectedObject, ModelKind};
pub use session::{AnalyzeOutcome, Session};

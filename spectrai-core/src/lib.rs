pub mod analysis;
pub mod annotation;
pub mod consts;
pub mod download;
pub mod error;
pub mod inference;
pub mod predictor;
pub mod project;
pub mod render;
pub mod view;

// Re-export commonly used types
pub use analysis::{Bbox, ImageSize, LabelSet};
pub use annotation::{BoundingBox, BoxId, BoxManager, BoxRecord, BoxUpdate};
pub use error::SpectraiError;
pub use predictor::{Detection, Detector, PredictorManager, merge_labels, predict_in_background};
pub use project::{AnnotationSession, Direction, ProjectConfig};
pub use view::{Canvas, FitMode, ImageManager};

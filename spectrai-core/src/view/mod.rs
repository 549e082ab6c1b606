pub mod canvas;
pub mod image_manager;

pub use canvas::{AnnotationEvent, Canvas, InteractionMode};
pub use image_manager::{FitMode, ImageManager};

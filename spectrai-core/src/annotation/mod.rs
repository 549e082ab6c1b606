pub mod bounding_box;
pub mod box_manager;
pub mod yolo;

pub use bounding_box::{BoundingBox, BoxId, BoxSource, BoxUpdate};
pub use box_manager::{BoxManager, BoxRecord};
pub use yolo::{YoloLine, read_annotation_file, write_annotation_file};

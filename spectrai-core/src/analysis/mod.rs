pub mod bbox;
pub mod labels;

pub use bbox::{Bbox, ImageSize};
pub use labels::LabelSet;

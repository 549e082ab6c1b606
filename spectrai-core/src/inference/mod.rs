pub mod model;
pub mod yolo;

pub use model::session_builder;

pub mod model;
pub mod session;

pub use model::{YoloConfig, YoloConfigBuilder, YoloModel};
pub use session::YoloSession;

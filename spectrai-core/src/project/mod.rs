pub mod catalog;
pub mod config;
pub mod session;

pub use catalog::{Direction, ImageCatalog};
pub use config::{ModelEntry, ProjectConfig, SessionSettings};
pub use session::{AnnotationSession, ApplyOutcome, LoadIssue, PredictionTicket, SaveOutcome};

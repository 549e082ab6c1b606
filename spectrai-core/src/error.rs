use snafu::prelude::*;

use crate::annotation::BoxId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SpectraiError {
    #[snafu(display("Invalid box geometry: {}", message))]
    InvalidGeometry { message: String },
    #[snafu(display("Invalid viewport {}x{}", width, height))]
    InvalidViewport { width: f32, height: f32 },
    #[snafu(display("Box `{}` not found", box_id))]
    NotFound { box_id: BoxId },
    #[snafu(display("Label index {} is outside the label set of {} labels", label_id, len))]
    UnknownLabel { label_id: usize, len: usize },
    #[snafu(display("Duplicate label `{}` in label set", name))]
    DuplicateLabel { name: String },
    #[snafu(display("Model `{}` unavailable: {}", path, message))]
    ModelUnavailable { path: String, message: String },
    #[snafu(display("Model `{}` is not an onnx export", path))]
    UnsupportedModel { path: String },
    #[snafu(display("Ort Session init stage `{}` error: {}", stage, source))]
    OrtInit {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Inference failed at stage `{}`: {}", stage, source))]
    InferenceFailed {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Onnx Output can not found {}", output_name))]
    NotFoundOutput { output_name: String },
    #[snafu(display("Ndarray Shape error at stage `{}`: {}", stage, source))]
    Shape {
        source: ndarray::ShapeError,
        stage: String,
    },
    #[snafu(display(
        "Model output carries {} classes but the model label set has {}",
        actual,
        expected
    ))]
    OutputMismatch { expected: usize, actual: usize },
    #[snafu(display("Background inference worker failed: {}", source))]
    WorkerJoin { source: tokio::task::JoinError },
    #[snafu(display("Download of `{}` failed: {}", url, message))]
    DownloadFailed { url: String, message: String },
    #[snafu(display("Malformed annotation file `{}` at line {}: {}", path, line, message))]
    MalformedAnnotationFile {
        path: String,
        line: usize,
        message: String,
    },
    #[snafu(display("Malformed label file `{}`: {}", path, message))]
    LabelFile { path: String, message: String },
    #[snafu(display("Image Read `{}` error: {}", path, source))]
    ImageRead {
        source: image::ImageError,
        path: String,
    },
    #[snafu(display("Image Write `{}` error: {}", path, source))]
    ImageWrite {
        source: image::ImageError,
        path: String,
    },
    #[snafu(display("Read `{}` error: {}", path, source))]
    IoRead {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Write `{}` error: {}", path, source))]
    IoWrite {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Json `{}` error: {}", path, source))]
    Json {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Yaml `{}` error: {}", path, source))]
    Yaml {
        source: serde_yaml::Error,
        path: String,
    },
    #[snafu(display("No images found in `{}`", path))]
    NoImages { path: String },
    #[snafu(display("Image index {} is out of range for {} images", index, len))]
    IndexOutOfRange { index: usize, len: usize },
}

impl SpectraiError {
    /// Detector problems. The session keeps running in manual-only mode after these.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            SpectraiError::ModelUnavailable { .. }
                | SpectraiError::UnsupportedModel { .. }
                | SpectraiError::OrtInit { .. }
                | SpectraiError::InferenceFailed { .. }
                | SpectraiError::NotFoundOutput { .. }
                | SpectraiError::Shape { .. }
                | SpectraiError::OutputMismatch { .. }
                | SpectraiError::WorkerJoin { .. }
        )
    }

    /// Errors raised by a single edit that left every piece of state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SpectraiError::InvalidGeometry { .. }
                | SpectraiError::NotFound { .. }
                | SpectraiError::UnknownLabel { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let geometry = SpectraiError::InvalidGeometry {
            message: "width must be positive".to_string(),
        };
        assert!(geometry.is_recoverable());
        assert!(!geometry.is_model_error());

        let model = SpectraiError::ModelUnavailable {
            path: "model.onnx".to_string(),
            message: "missing".to_string(),
        };
        assert!(model.is_model_error());
        assert!(!model.is_recoverable());

        let download = SpectraiError::DownloadFailed {
            url: "https://example.invalid".to_string(),
            message: "offline".to_string(),
        };
        assert!(!download.is_model_error());
    }

    #[test]
    fn test_not_found_display() {
        let err = SpectraiError::NotFound {
            box_id: BoxId::new(7),
        };
        assert_eq!(err.to_string(), "Box `7` not found");
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use derive_builder::Builder;
use ndarray::{ArrayBase, Dim, OwnedRepr};
use snafu::ensure;
use tracing::*;

use crate::{
    analysis::labels::LabelSet,
    consts::{
        BACKGROUND_FILL_VALUE, BATCH_SIZE, CXYWH_OFFSET, INPUT_CHANNELS, NMS_IOU_THRESHOLD,
        PROBA_THRESHOLD, REQUIRED_HEIGHT, REQUIRED_WIDTH,
    },
    error::{SpectraiError, UnsupportedModelSnafu},
    inference::model::Model,
};

pub type YoloInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;
pub type YoloOutput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>;

/// Detector settings. Defaults match an Ultralytics export at 640px.
#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(default)]
pub struct YoloConfig {
    pub required_width: usize,
    pub required_height: usize,
    pub batch_size: usize,
    pub input_channels: usize,
    pub background_fill_value: f32,
    pub cxywh_size: usize,
    pub proba_threshold: f32,
    pub iou_threshold: f32,
    #[builder(setter(into))]
    pub input_name: String,
    #[builder(setter(into))]
    pub output_name: String,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            required_width: REQUIRED_WIDTH as usize,
            required_height: REQUIRED_HEIGHT as usize,
            batch_size: BATCH_SIZE,
            input_channels: INPUT_CHANNELS,
            background_fill_value: BACKGROUND_FILL_VALUE,
            cxywh_size: CXYWH_OFFSET,
            proba_threshold: PROBA_THRESHOLD,
            iou_threshold: NMS_IOU_THRESHOLD,
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
        }
    }
}

/// An exported YOLO detector read from disk, with the class names it was trained on.
pub struct YoloModel {
    path: PathBuf,
    bytes: Vec<u8>,
    labels: LabelSet,
    config: YoloConfig,
}

impl YoloModel {
    /// Reads an `.onnx` file. Any other extension is rejected before touching the file.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        labels: LabelSet,
        config: YoloConfig,
    ) -> Result<Self, SpectraiError> {
        let path = path.as_ref();
        let is_onnx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        ensure!(
            is_onnx,
            UnsupportedModelSnafu {
                path: path.to_string_lossy()
            }
        );

        let bytes = fs::read(path).map_err(|err| SpectraiError::ModelUnavailable {
            path: path.to_string_lossy().to_string(),
            message: err.to_string(),
        })?;
        info!(
            "Read model {} ({} bytes, {} classes)",
            path.display(),
            bytes.len(),
            labels.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            labels,
            config,
        })
    }

    /// Reads the model and the `names` of its dataset file.
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        labels_path: Q,
        config: YoloConfig,
    ) -> Result<Self, SpectraiError> {
        let labels = LabelSet::load(labels_path)?;
        Self::from_path(model_path, labels, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

impl Model for YoloModel {
    type Input = YoloInput;
    type Output = YoloOutput;
    type Config = YoloConfig;

    const MODEL_NAME: &'static str = "spectrai-yolo";

    fn load(&self) -> &[u8] {
        &self.bytes
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }

    fn input_name(&self) -> &str {
        &self.config.input_name
    }

    fn output_name(&self) -> &str {
        &self.config.output_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_defaults() {
        let config = YoloConfigBuilder::default()
            .proba_threshold(0.5)
            .output_name("detections")
            .build()
            .unwrap();
        assert_eq!(config.proba_threshold, 0.5);
        assert_eq!(config.output_name, "detections");
        assert_eq!(config.required_width, 640);
        assert_eq!(config.iou_threshold, 0.45);
        assert_eq!(config.input_name, "images");
    }

    #[test]
    fn test_non_onnx_rejected() {
        let err = YoloModel::from_path("weights/best.pt", LabelSet::new(), YoloConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SpectraiError::UnsupportedModel { .. }));
        assert!(err.is_model_error());
    }

    #[test]
    fn test_missing_file_unavailable() {
        let path = std::env::temp_dir().join(format!("missing-{}.onnx", uuid::Uuid::new_v4()));
        let err = YoloModel::from_path(&path, LabelSet::new(), YoloConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SpectraiError::ModelUnavailable { .. }));
    }
}

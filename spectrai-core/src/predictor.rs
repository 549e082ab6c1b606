use std::{path::Path, sync::Arc};

use glam::Vec2;
use image::{DynamicImage, GenericImageView};
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::*;

use crate::{
    analysis::{
        bbox::{Bbox, ImageSize},
        labels::LabelSet,
    },
    annotation::{BoundingBox, BoxSource},
    consts::PROBA_THRESHOLD,
    error::{SpectraiError, WorkerJoinSnafu},
    inference::{
        model::session_builder,
        yolo::{YoloConfig, YoloModel, YoloSession},
    },
};

/// One object found by a detector, in image pixels and model label space.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub label_id: usize,
    pub confidence: f32,
}

/// A detection turned into a workspace box, with its score kept for display filtering.
#[derive(Clone, Debug)]
pub struct Prediction {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Black-box object detector.
pub trait Detector: Send {
    /// Class names in model index order.
    fn labels(&self) -> &LabelSet;

    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, SpectraiError>;
}

/// Model label index to workspace label index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMapping {
    targets: Vec<usize>,
    appended: Vec<String>,
}

impl LabelMapping {
    pub fn get(&self, model_label: usize) -> Option<usize> {
        self.targets.get(model_label).copied()
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Names this merge added to the workspace.
    pub fn appended(&self) -> &[String] {
        &self.appended
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Maps every model label onto the workspace, appending names the workspace lacks.
///
/// Existing workspace indices never move, so running it twice gives the same mapping
/// and the second run appends nothing.
pub fn merge_labels(model_labels: &LabelSet, workspace_labels: &mut LabelSet) -> LabelMapping {
    let mut mapping = LabelMapping::default();
    for (_, name) in model_labels.iter() {
        let (idx, appended) = workspace_labels.get_or_insert(name);
        if appended {
            info!("Added model label `{}` to workspace at index {}", name, idx);
            mapping.appended.push(name.to_string());
        }
        mapping.targets.push(idx);
    }
    mapping
}

/// Runs a detector and translates its output into workspace boxes.
pub struct PredictorManager {
    detector: Box<dyn Detector>,
    min_confidence: f32,
}

impl PredictorManager {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            detector,
            min_confidence: PROBA_THRESHOLD,
        }
    }

    /// Loads an ONNX export and the `dataset.yaml` naming its classes.
    pub fn from_onnx<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        labels_path: Q,
        config: YoloConfig,
    ) -> Result<Self, SpectraiError> {
        let model = YoloModel::from_files(model_path, labels_path, config)?;
        let session = YoloSession::new(session_builder()?, model)?;
        Ok(Self::new(Box::new(session)))
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.min_confidence = min_confidence;
    }

    pub fn model_labels(&self) -> &LabelSet {
        self.detector.labels()
    }

    /// Detections in image pixels, clipped to the image, above the confidence floor.
    pub fn predict(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, SpectraiError> {
        let (width, height) = image.dimensions();
        let size = ImageSize::new(width, height).as_vec2();

        let raw = self.detector.detect(image)?;
        let total = raw.len();
        let detections: Vec<_> = raw
            .into_iter()
            .filter(|detection| detection.confidence >= self.min_confidence)
            .filter_map(|detection| {
                let bbox = detection.bbox.clamp(Vec2::ZERO, size);
                if bbox.is_degenerate() {
                    warn!("Dropped degenerate detection {:?}", detection.bbox);
                    return None;
                }
                Some(Detection { bbox, ..detection })
            })
            .collect();

        debug!("Predicted {} of {} detections", detections.len(), total);
        Ok(detections)
    }

    /// Remaps detections into workspace labels, growing the workspace when needed.
    pub fn convert(
        &self,
        detections: Vec<Detection>,
        workspace_labels: &mut LabelSet,
    ) -> Vec<Prediction> {
        let mapping = merge_labels(self.model_labels(), workspace_labels);

        detections
            .into_iter()
            .filter_map(|detection| {
                let Some(label_id) = mapping.get(detection.label_id) else {
                    warn!(
                        "Dropped detection with label {} outside the {} model labels",
                        detection.label_id,
                        mapping.len()
                    );
                    return None;
                };
                match BoundingBox::from_bbox(&detection.bbox, label_id) {
                    Ok(bbox) => Some(Prediction {
                        bbox: bbox.with_source(BoxSource::Prediction),
                        confidence: detection.confidence,
                    }),
                    Err(err) => {
                        warn!("Dropped detection: {}", err);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn predict_and_convert(
        &mut self,
        image: &DynamicImage,
        workspace_labels: &mut LabelSet,
    ) -> Result<Vec<Prediction>, SpectraiError> {
        let detections = self.predict(image)?;
        Ok(self.convert(detections, workspace_labels))
    }
}

/// Runs [`PredictorManager::predict`] on a blocking worker.
///
/// Only raw detections come back; label merging and box insertion happen on the
/// caller's side once it has checked the result is still wanted.
pub async fn predict_in_background(
    predictor: Arc<Mutex<PredictorManager>>,
    image: Arc<DynamicImage>,
) -> Result<Vec<Detection>, SpectraiError> {
    tokio::task::spawn_blocking(move || {
        let mut predictor = predictor.blocking_lock();
        predictor.predict(&image)
    })
    .await
    .context(WorkerJoinSnafu)?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Detector returning a fixed set of detections.
    pub(crate) struct FakeDetector {
        pub labels: LabelSet,
        pub detections: Vec<Detection>,
    }

    impl Detector for FakeDetector {
        fn labels(&self) -> &LabelSet {
            &self.labels
        }

        fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Detection>, SpectraiError> {
            Ok(self.detections.clone())
        }
    }

    struct BrokenDetector {
        labels: LabelSet,
    }

    impl Detector for BrokenDetector {
        fn labels(&self) -> &LabelSet {
            &self.labels
        }

        fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Detection>, SpectraiError> {
            Err(SpectraiError::ModelUnavailable {
                path: "model.onnx".to_string(),
                message: "session closed".to_string(),
            })
        }
    }

    pub(crate) fn detection(
        min: (f32, f32),
        max: (f32, f32),
        label_id: usize,
        confidence: f32,
    ) -> Detection {
        Detection {
            bbox: Bbox::new(Vec2::new(min.0, min.1), Vec2::new(max.0, max.1)),
            label_id,
            confidence,
        }
    }

    fn predictor(model_labels: &[&str], detections: Vec<Detection>) -> PredictorManager {
        PredictorManager::new(Box::new(FakeDetector {
            labels: LabelSet::from_names(model_labels.iter().copied()).unwrap(),
            detections,
        }))
    }

    #[test]
    fn test_merge_labels_appends_missing() {
        let model = LabelSet::from_names(["ketones", "phenol", "aromatics"]).unwrap();
        let mut workspace = LabelSet::from_names(["aromatics", "alcohols", "ketones"]).unwrap();

        let mapping = merge_labels(&model, &mut workspace);
        assert_eq!(mapping.targets(), [2, 3, 0]);
        assert_eq!(mapping.appended(), ["phenol"]);
        assert_eq!(
            workspace.names(),
            ["aromatics", "alcohols", "ketones", "phenol"]
        );
    }

    #[test]
    fn test_merge_labels_idempotent() {
        let model = LabelSet::from_names(["x", "aromatics", "y"]).unwrap();
        let mut workspace = LabelSet::from_names(["aromatics"]).unwrap();

        let first = merge_labels(&model, &mut workspace);
        let after_first = workspace.clone();
        let second = merge_labels(&model, &mut workspace);

        assert_eq!(first.targets(), second.targets());
        assert!(second.appended().is_empty());
        assert_eq!(workspace, after_first);
    }

    #[test]
    fn test_predict_filters_and_clips() {
        let mut predictor = predictor(
            &["a", "b"],
            vec![
                detection((10.0, 10.0), (50.0, 50.0), 0, 0.9),
                detection((10.0, 10.0), (50.0, 50.0), 1, 0.1),
                detection((90.0, 40.0), (130.0, 60.0), 1, 0.8),
                detection((120.0, 10.0), (150.0, 20.0), 0, 0.8),
            ],
        )
        .with_min_confidence(0.5);

        let image = DynamicImage::new_rgb8(100, 80);
        let detections = predictor.predict(&image).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[1].bbox.max, Vec2::new(100.0, 60.0));
    }

    #[test]
    fn test_predict_and_convert_remaps_labels() {
        let mut predictor = predictor(
            &["nitriles", "aromatics"],
            vec![
                detection((10.0, 10.0), (50.0, 50.0), 0, 0.9),
                detection((20.0, 20.0), (40.0, 70.0), 1, 0.7),
            ],
        );
        let mut workspace = LabelSet::from_names(["aromatics"]).unwrap();

        let image = DynamicImage::new_rgb8(100, 80);
        let predictions = predictor
            .predict_and_convert(&image, &mut workspace)
            .unwrap();

        assert_eq!(workspace.names(), ["aromatics", "nitriles"]);
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].bbox.label_id(), 1);
        assert_eq!(predictions[1].bbox.label_id(), 0);
        assert_eq!(predictions[1].confidence, 0.7);
        for prediction in &predictions {
            assert_eq!(prediction.bbox.box_id(), None);
            assert_eq!(prediction.bbox.source(), BoxSource::Prediction);
        }
    }

    #[test]
    fn test_convert_drops_unknown_model_label() {
        let predictor = predictor(&["a"], vec![]);
        let mut workspace = LabelSet::new();
        let predictions = predictor.convert(
            vec![detection((0.0, 0.0), (10.0, 10.0), 3, 0.9)],
            &mut workspace,
        );
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_model_failure_is_model_error() {
        let mut predictor = PredictorManager::new(Box::new(BrokenDetector {
            labels: LabelSet::new(),
        }));
        let err = predictor
            .predict(&DynamicImage::new_rgb8(10, 10))
            .unwrap_err();
        assert!(err.is_model_error());
    }

    #[tokio::test]
    async fn test_predict_in_background() {
        let predictor = Arc::new(Mutex::new(predictor(
            &["a"],
            vec![detection((1.0, 1.0), (9.0, 9.0), 0, 0.9)],
        )));
        let image = Arc::new(DynamicImage::new_rgb8(10, 10));

        let detections = predict_in_background(predictor.clone(), image)
            .await
            .unwrap();
        assert_eq!(detections.len(), 1);

        // The predictor is free again afterwards
        assert_eq!(predictor.lock().await.model_labels().len(), 1);
    }
}

use glam::Vec2;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::*;

use crate::{
    analysis::{
        bbox::{Bbox, ImageSize},
        labels::LabelSet,
    },
    error::*,
    inference::{
        model::{Model, OnnxSession},
        yolo::model::{YoloConfig, YoloModel},
    },
    predictor::{Detection, Detector},
};

pub struct YoloSession<M: Model> {
    session: Session,
    model: M,
}

impl YoloSession<YoloModel> {
    pub fn new(session: SessionBuilder, model: YoloModel) -> Result<Self, SpectraiError> {
        let session = session.commit_from_memory(model.load()).map_err(|err| {
            SpectraiError::ModelUnavailable {
                path: model.path().to_string_lossy().to_string(),
                message: err.to_string(),
            }
        })?;
        info!(
            "Loaded {} from {}",
            YoloModel::MODEL_NAME,
            model.path().display()
        );

        Ok(Self { session, model })
    }
}

/// Calculates optimal scaling dimensions to fit an image within target dimensions while maintaining aspect ratio.
fn scale_wh(w0: f32, h0: f32, target_w: f32, target_h: f32) -> (f32, f32, f32) {
    let scale = f32::min(target_w / w0, target_h / h0);
    let w_new = (w0 * scale).round();
    let h_new = (h0 * scale).round();
    (scale, w_new, h_new)
}

impl OnnxSession<YoloModel> for YoloSession<YoloModel> {
    type Output = Vec<Detection>;
    type Extra = ImageSize;

    fn preprocess(&self, image: &DynamicImage) -> Result<<YoloModel as Model>::Input, SpectraiError> {
        let config = self.model.config();

        let (w0, h0) = image.dimensions();
        let (_, w_new, h_new) = scale_wh(
            w0 as f32,
            h0 as f32,
            config.required_width as f32,
            config.required_height as f32,
        );

        let resized_img = image.resize_exact(w_new as u32, h_new as u32, FilterType::Triangle);

        // Padding right and below keeps the origin fixed, so undoing the resize is a division
        let mut input_tensor = Array4::from_elem(
            [
                config.batch_size,
                config.input_channels,
                config.required_height,
                config.required_width,
            ],
            config.background_fill_value,
        );

        for (x, y, pixel) in resized_img.pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b, _] = pixel.0;
            input_tensor[[0, 0, y, x]] = r as f32 / 255.0;
            input_tensor[[0, 1, y, x]] = g as f32 / 255.0;
            input_tensor[[0, 2, y, x]] = b as f32 / 255.0;
        }

        Ok(input_tensor)
    }

    fn postprocess(
        &self,
        output: <YoloModel as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, SpectraiError> {
        let config = self.model.config();

        let channels = output.shape()[1];
        let classes = channels.saturating_sub(config.cxywh_size);
        ensure!(
            channels > config.cxywh_size && classes == self.model.labels().len(),
            OutputMismatchSnafu {
                expected: self.model.labels().len(),
                actual: classes,
            }
        );

        let (scale, _, _) = scale_wh(
            extra.width as f32,
            extra.height as f32,
            config.required_width as f32,
            config.required_height as f32,
        );

        let mut detections = extract_detections(output.view(), config, scale, extra);
        let before = detections.len();
        nms(&mut detections, config.iou_threshold);
        debug!(
            "Kept {} of {} candidates after NMS",
            detections.len(),
            before
        );

        Ok(detections)
    }

    fn infer(
        &mut self,
        input: <YoloModel as Model>::Input,
    ) -> Result<<YoloModel as Model>::Output, SpectraiError> {
        let input_name = self.model.input_name().to_string();
        let output_name = self.model.output_name().to_string();

        let output = self
            .session
            .run(ort::inputs![
                input_name => TensorRef::from_array_view(&input).context(InferenceFailedSnafu { stage: "input" })?
            ])
            .context(InferenceFailedSnafu { stage: "run" })?;

        let tensor = output
            .get(output_name.as_str())
            .context(NotFoundOutputSnafu {
                output_name: &output_name,
            })?
            .try_extract_array::<f32>()
            .context(InferenceFailedSnafu { stage: "extract" })?;

        let output = tensor
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "output" })?
            .to_owned();

        Ok(output)
    }
}

/// Turns raw `[1, 4 + nc, N]` rows into image-space detections above the threshold.
fn extract_detections(
    output: ArrayView3<f32>,
    config: &YoloConfig,
    scale: f32,
    image_size: ImageSize,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    let output = output.slice(s![0, .., ..]);

    for prediction in output.axis_iter(Axis(1)) {
        let bbox = prediction.slice(s![0..config.cxywh_size]);
        let scores = prediction.slice(s![config.cxywh_size..]);

        let Some((label_id, &confidence)) = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            continue;
        };

        if confidence < config.proba_threshold {
            continue;
        }

        let bbox = Bbox::from_center_size(
            Vec2::new(bbox[0_usize], bbox[1_usize]),
            Vec2::new(bbox[2_usize], bbox[3_usize]),
        )
        .unscale(scale)
        .clamp(Vec2::ZERO, image_size.as_vec2());

        if bbox.is_degenerate() {
            continue;
        }

        detections.push(Detection {
            bbox,
            label_id,
            confidence,
        });
    }

    detections
}

/// Class-aware non-maximum suppression, highest confidence first.
fn nms(detections: &mut Vec<Detection>, iou_threshold: f32) {
    if detections.len() < 2 {
        return;
    }

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep_flags = vec![true; detections.len()];
    for current_index in 0..detections.len() {
        if !keep_flags[current_index] {
            continue;
        }

        for other_index in current_index + 1..detections.len() {
            if !keep_flags[other_index]
                || detections[other_index].label_id != detections[current_index].label_id
            {
                continue;
            }

            if detections[current_index]
                .bbox
                .iou(&detections[other_index].bbox)
                > iou_threshold
            {
                keep_flags[other_index] = false;
            }
        }
    }

    let mut flags = keep_flags.into_iter();
    detections.retain(|_| flags.next().unwrap_or(false));
}

impl Detector for YoloSession<YoloModel> {
    fn labels(&self) -> &LabelSet {
        self.model.labels()
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, SpectraiError> {
        let (width, height) = image.dimensions();
        self.run(image, ImageSize::new(width, height))
    }
}

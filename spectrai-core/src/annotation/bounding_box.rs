use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::{
    analysis::bbox::{Bbox, ImageSize},
    annotation::box_manager::BoxRecord,
    error::{InvalidGeometrySnafu, SpectraiError},
};

/// Identity of a box inside one image's collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(u64);

impl BoxId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a box. Only affects how it is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoxSource {
    #[default]
    Manual,
    Prediction,
}

/// One annotation, stored in original-image pixel space.
///
/// Geometry is validated on construction and on every update: `width` and `height`
/// are strictly positive and all four numbers are finite. `selected` and `source`
/// are UI state and never persisted; serde goes through [`BoxRecord`] so a
/// deserialized box is validated like any other.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "BoxRecord", into = "BoxRecord")]
pub struct BoundingBox {
    box_id: Option<BoxId>,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    label_id: usize,
    selected: bool,
    source: BoxSource,
}

impl TryFrom<BoxRecord> for BoundingBox {
    type Error = SpectraiError;

    fn try_from(record: BoxRecord) -> Result<Self, Self::Error> {
        record.to_box()
    }
}

impl From<BoundingBox> for BoxRecord {
    fn from(bbox: BoundingBox) -> Self {
        BoxRecord::from(&bbox)
    }
}

/// Partial update applied by [`BoxManager::update_box`](crate::annotation::BoxManager::update_box).
///
/// Only the fields that are `Some` replace the box's current values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoxUpdate {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub label_id: Option<usize>,
}

impl BoxUpdate {
    pub fn position(mut self, x: f32, y: f32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn size(mut self, width: f32, height: f32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn label(mut self, label_id: usize) -> Self {
        self.label_id = Some(label_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl BoundingBox {
    pub fn new(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        label_id: usize,
    ) -> Result<Self, SpectraiError> {
        validate_geometry(x, y, width, height)?;
        Ok(Self {
            box_id: None,
            x,
            y,
            width,
            height,
            label_id,
            selected: false,
            source: BoxSource::Manual,
        })
    }

    /// Builds a box covering `bbox`.
    pub fn from_bbox(bbox: &Bbox, label_id: usize) -> Result<Self, SpectraiError> {
        let size = bbox.size();
        Self::new(bbox.min.x, bbox.min.y, size.x, size.y, label_id)
    }

    pub fn with_source(mut self, source: BoxSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_id(mut self, box_id: BoxId) -> Self {
        self.box_id = Some(box_id);
        self
    }

    pub fn box_id(&self) -> Option<BoxId> {
        self.box_id
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn label_id(&self) -> usize {
        self.label_id
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn source(&self) -> BoxSource {
        self.source
    }

    /// `(x, y, x + width, y + height)`
    pub fn get_bounds(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }

    pub fn bounds(&self) -> Bbox {
        Bbox::new_from_min_size(Vec2::new(self.x, self.y), Vec2::new(self.width, self.height))
    }

    pub fn set_label_id(&mut self, label_id: usize) {
        self.label_id = label_id;
    }

    /// Replaces the geometry, leaving the box untouched when the new values are invalid.
    pub fn set_geometry(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), SpectraiError> {
        validate_geometry(x, y, width, height)?;
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Returns a copy with `update` applied. `self` is never modified.
    pub fn apply(&self, update: &BoxUpdate) -> Result<Self, SpectraiError> {
        let mut updated = self.clone();
        updated.set_geometry(
            update.x.unwrap_or(self.x),
            update.y.unwrap_or(self.y),
            update.width.unwrap_or(self.width),
            update.height.unwrap_or(self.height),
        )?;
        if let Some(label_id) = update.label_id {
            updated.label_id = label_id;
        }
        Ok(updated)
    }

    /// Clips the box to the image, failing when no positive area is left.
    pub fn clamped_to(&self, size: ImageSize) -> Result<Self, SpectraiError> {
        let clipped = self.bounds().clamp(Vec2::ZERO, size.as_vec2());
        ensure!(
            !clipped.is_degenerate(),
            InvalidGeometrySnafu {
                message: format!(
                    "box {:?} lies outside the {}x{} image",
                    self.get_bounds(),
                    size.width,
                    size.height
                ),
            }
        );

        let mut clamped = self.clone();
        clamped.set_geometry(
            clipped.min.x,
            clipped.min.y,
            clipped.width(),
            clipped.height(),
        )?;
        Ok(clamped)
    }

    pub(crate) fn assign_id(&mut self, box_id: BoxId) {
        self.box_id = Some(box_id);
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.label_id == other.label_id
    }
}

impl PartialEq for BoundingBox {
    /// Boxes are equal when they share an id. Unassigned boxes fall back to geometry and label.
    fn eq(&self, other: &Self) -> bool {
        match (self.box_id, other.box_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.same_shape(other),
            _ => false,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .box_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "BoundingBox(id={}, x={}, y={}, w={}, h={}, label_id={})",
            id, self.x, self.y, self.width, self.height, self.label_id
        )
    }
}

pub(crate) fn validate_geometry(
    x: f32,
    y: f32,
    width: f32,
    height: f32,
) -> Result<(), SpectraiError> {
    ensure!(
        x.is_finite() && y.is_finite(),
        InvalidGeometrySnafu {
            message: format!("position ({x}, {y}) is not finite"),
        }
    );
    ensure!(
        width.is_finite() && width > 0.0,
        InvalidGeometrySnafu {
            message: format!("width must be positive, got {width}"),
        }
    );
    ensure!(
        height.is_finite() && height > 0.0,
        InvalidGeometrySnafu {
            message: format!("height must be positive, got {height}"),
        }
    );
    Ok(())
}

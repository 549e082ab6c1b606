use std::collections::VecDeque;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{
    analysis::{bbox::Bbox, labels::LabelSet},
    annotation::{BoundingBox, BoxId, BoxManager, BoxUpdate},
    consts::MIN_BOX_SIZE,
    error::SpectraiError,
    view::image_manager::ImageManager,
};

/// What a click on the image does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    /// Two-click drawing, or selecting an existing box.
    #[default]
    Box,
    /// Deletes the clicked box.
    Erase,
    /// Relabels the clicked box with the current label.
    Update,
}

/// Notification of a change made through the canvas or the session.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationEvent {
    BoxCreated(BoxId),
    BoxUpdated(BoxId),
    BoxDeleted(BoxId),
    SelectionChanged(Option<BoxId>),
    BoxesReplaced { count: usize },
}

/// Turns viewport input into box edits.
///
/// The drawing anchor is kept in image space so a resize between the two clicks
/// does not move it. Events are queued at mutation time and drained by the owner.
#[derive(Debug)]
pub struct Canvas {
    mode: InteractionMode,
    current_label: usize,
    min_box_size: f32,
    anchor: Option<Vec2>,
    cursor: Option<Vec2>,
    events: VecDeque<AnnotationEvent>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            mode: InteractionMode::default(),
            current_label: 0,
            min_box_size: MIN_BOX_SIZE,
            anchor: None,
            cursor: None,
            events: VecDeque::new(),
        }
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_box_size(mut self, min_box_size: f32) -> Self {
        self.min_box_size = min_box_size;
        self
    }

    /// Handles a click at a viewport position. Clicks in the padding are ignored.
    pub fn press(
        &mut self,
        point: Vec2,
        image: &ImageManager,
        boxes: &mut BoxManager,
    ) -> Result<(), SpectraiError> {
        let Some(point) = image.screen_to_image_clamped(point) else {
            trace!("Click at {:?} outside the image", point);
            return Ok(());
        };

        match self.mode {
            InteractionMode::Box => self.press_box(point, boxes),
            InteractionMode::Erase => {
                if let Some(box_id) = boxes.box_at(point) {
                    self.remove(box_id, boxes)?;
                }
                Ok(())
            }
            InteractionMode::Update => {
                if let Some(box_id) = boxes.box_at(point) {
                    boxes.update_box(box_id, BoxUpdate::default().label(self.current_label))?;
                    self.events.push_back(AnnotationEvent::BoxUpdated(box_id));
                }
                Ok(())
            }
        }
    }

    fn press_box(&mut self, point: Vec2, boxes: &mut BoxManager) -> Result<(), SpectraiError> {
        // Second click
        if let Some(anchor) = self.anchor.take() {
            self.cursor = None;
            let rect = Bbox::from_corners(anchor, point);
            if rect.width() <= self.min_box_size || rect.height() <= self.min_box_size {
                debug!(
                    "Discarded {}x{} box below the minimum size",
                    rect.width(),
                    rect.height()
                );
                return Ok(());
            }

            let bbox = BoundingBox::from_bbox(&rect, self.current_label)?;
            let box_id = boxes.add_box(bbox);
            self.events.push_back(AnnotationEvent::BoxCreated(box_id));
            return Ok(());
        }

        // First click
        if let Some(box_id) = boxes.box_at(point) {
            boxes.select(box_id)?;
            self.events
                .push_back(AnnotationEvent::SelectionChanged(Some(box_id)));
        } else {
            self.anchor = Some(point);
            self.cursor = Some(point);
            self.clear_selection(boxes);
        }
        Ok(())
    }

    /// Tracks the cursor for the drawing preview. Outside the image the preview
    /// sticks to the nearest edge.
    pub fn hover(&mut self, point: Vec2, image: &ImageManager) {
        if self.anchor.is_none() {
            return;
        }
        if let Some(size) = image.image_size() {
            self.cursor = Some(image.screen_to_image(point).clamp(Vec2::ZERO, size.as_vec2()));
        }
    }

    /// Rectangle between the anchor and the cursor while drawing, in image space.
    pub fn preview(&self) -> Option<Bbox> {
        Some(Bbox::from_corners(self.anchor?, self.cursor?))
    }

    pub fn is_drawing(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn cancel_drawing(&mut self) {
        self.anchor = None;
        self.cursor = None;
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InteractionMode, boxes: &mut BoxManager) {
        self.cancel_drawing();
        self.clear_selection(boxes);
        self.mode = mode;
        debug!("Interaction mode set to {:?}", mode);
    }

    pub fn current_label(&self) -> usize {
        self.current_label
    }

    pub fn set_current_label(
        &mut self,
        label_id: usize,
        labels: &LabelSet,
    ) -> Result<(), SpectraiError> {
        labels.check_index(label_id)?;
        self.current_label = label_id;
        Ok(())
    }

    /// Removes the selected box, if any, and returns its id.
    pub fn delete_selected(
        &mut self,
        boxes: &mut BoxManager,
    ) -> Result<Option<BoxId>, SpectraiError> {
        let Some(box_id) = boxes.selected() else {
            return Ok(None);
        };
        self.remove(box_id, boxes)?;
        Ok(Some(box_id))
    }

    fn remove(&mut self, box_id: BoxId, boxes: &mut BoxManager) -> Result<(), SpectraiError> {
        let was_selected = boxes.selected() == Some(box_id);
        boxes.remove_box(box_id)?;
        self.events.push_back(AnnotationEvent::BoxDeleted(box_id));
        if was_selected {
            self.events.push_back(AnnotationEvent::SelectionChanged(None));
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<AnnotationEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn push_event(&mut self, event: AnnotationEvent) {
        self.events.push_back(event);
    }

    /// Drops any drawing in progress, used when the image changes.
    pub fn reset(&mut self) {
        self.cancel_drawing();
    }

    fn clear_selection(&mut self, boxes: &mut BoxManager) {
        if boxes.selected().is_some() {
            boxes.deselect();
            self.events.push_back(AnnotationEvent::SelectionChanged(None));
        }
    }
}

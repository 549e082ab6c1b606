use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use tracing::*;

use crate::{
    annotation::bounding_box::{BoundingBox, BoxId, BoxUpdate, validate_geometry},
    error::{NotFoundSnafu, SpectraiError},
};

const FIRST_BOX_ID: u64 = 1;

/// Largest caller-supplied id that is kept. Higher ids are reassigned so the counter
/// always has room to move forward.
const MAX_SUPPLIED_ID: u64 = u64::MAX / 2;

/// Flat, serializable form of a box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<BoxId>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label_id: usize,
}

impl BoxRecord {
    pub fn to_box(&self) -> Result<BoundingBox, SpectraiError> {
        let bbox = BoundingBox::new(self.x, self.y, self.width, self.height, self.label_id)?;
        Ok(match self.box_id {
            Some(box_id) => bbox.with_id(box_id),
            None => bbox,
        })
    }
}

impl From<&BoundingBox> for BoxRecord {
    fn from(bbox: &BoundingBox) -> Self {
        Self {
            box_id: bbox.box_id(),
            x: bbox.x(),
            y: bbox.y(),
            width: bbox.width(),
            height: bbox.height(),
            label_id: bbox.label_id(),
        }
    }
}

/// The boxes of the image currently on screen.
///
/// Ids come from a counter that only moves forward, so the map order is creation order
/// and an id is never handed out twice until [`BoxManager::reset`].
#[derive(Debug)]
pub struct BoxManager {
    boxes: BTreeMap<BoxId, BoundingBox>,
    next_id: u64,
    selected: Option<BoxId>,
}

impl Default for BoxManager {
    fn default() -> Self {
        Self {
            boxes: BTreeMap::new(),
            next_id: FIRST_BOX_ID,
            selected: None,
        }
    }
}

impl BoxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `bbox` and returns its id.
    ///
    /// A box that carries an id this manager has never issued keeps it, as long as it
    /// is at most `u64::MAX / 2`; any other box gets the next free id.
    pub fn add_box(&mut self, mut bbox: BoundingBox) -> BoxId {
        let box_id = match bbox.box_id() {
            Some(id) if (self.next_id..=MAX_SUPPLIED_ID).contains(&id.value()) => id,
            _ => BoxId::new(self.next_id),
        };
        self.next_id = box_id.value().saturating_add(1);

        bbox.assign_id(box_id);
        bbox.set_selected(false);
        debug!("Box added: {}", bbox);
        self.boxes.insert(box_id, bbox);
        box_id
    }

    pub fn get_box(&self, box_id: BoxId) -> Option<&BoundingBox> {
        self.boxes.get(&box_id)
    }

    /// Snapshot of every box in creation order.
    pub fn get_all_boxes(&self) -> Vec<BoundingBox> {
        self.boxes.values().cloned().collect()
    }

    pub fn get_boxes_by_label(&self, label_id: usize) -> Vec<BoundingBox> {
        self.boxes
            .values()
            .filter(|bbox| bbox.label_id() == label_id)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundingBox> {
        self.boxes.values()
    }

    /// Applies `update` to one box. On error the box keeps its previous values.
    pub fn update_box(&mut self, box_id: BoxId, update: BoxUpdate) -> Result<(), SpectraiError> {
        let current = self.boxes.get_mut(&box_id).context(NotFoundSnafu { box_id })?;
        let updated = current.apply(&update)?;
        debug!("Box updated: {}", updated);
        *current = updated;
        Ok(())
    }

    pub fn remove_box(&mut self, box_id: BoxId) -> Result<BoundingBox, SpectraiError> {
        let removed = self.boxes.remove(&box_id).context(NotFoundSnafu { box_id })?;
        if self.selected == Some(box_id) {
            self.selected = None;
        }
        debug!("Box removed: {}", removed);
        Ok(removed)
    }

    pub fn select(&mut self, box_id: BoxId) -> Result<(), SpectraiError> {
        if !self.boxes.contains_key(&box_id) {
            return NotFoundSnafu { box_id }.fail();
        }
        self.deselect();
        if let Some(bbox) = self.boxes.get_mut(&box_id) {
            bbox.set_selected(true);
        }
        self.selected = Some(box_id);
        Ok(())
    }

    pub fn deselect(&mut self) {
        if let Some(previous) = self.selected.take() {
            if let Some(bbox) = self.boxes.get_mut(&previous) {
                bbox.set_selected(false);
            }
        }
    }

    pub fn selected(&self) -> Option<BoxId> {
        self.selected
    }

    /// Topmost box under an image-space point. Later boxes are drawn above earlier ones.
    pub fn box_at(&self, point: Vec2) -> Option<BoxId> {
        self.boxes
            .values()
            .rev()
            .find(|bbox| bbox.bounds().contains_point(point))
            .and_then(BoundingBox::box_id)
    }

    pub fn to_list(&self) -> Vec<BoxRecord> {
        self.boxes.values().map(BoxRecord::from).collect()
    }

    /// Replaces every box with `records`.
    ///
    /// All records are validated before anything changes, so a bad record leaves the
    /// manager exactly as it was.
    pub fn from_list(&mut self, records: &[BoxRecord]) -> Result<(), SpectraiError> {
        for record in records {
            validate_geometry(record.x, record.y, record.width, record.height)?;
        }

        self.clear();
        for record in records {
            self.add_box(record.to_box()?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Removes every box. Ids already issued stay retired.
    pub fn clear(&mut self) {
        self.boxes.clear();
        self.selected = None;
    }

    /// Removes every box and restarts the id counter.
    pub fn reset(&mut self) {
        self.clear();
        self.next_id = FIRST_BOX_ID;
    }
}

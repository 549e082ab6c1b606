use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use glam::Vec2;
use image::DynamicImage;
use tracing::*;
use uuid::Uuid;

use crate::{
    analysis::{bbox::ImageSize, labels::LabelSet},
    annotation::{BoxId, BoxManager, read_annotation_file, write_annotation_file},
    error::SpectraiError,
    predictor::{Detection, PredictorManager},
    project::{
        catalog::{Direction, ImageCatalog},
        config::ProjectConfig,
    },
    view::{AnnotationEvent, Canvas, FitMode, ImageManager, InteractionMode},
};

/// A file that could not be loaded. The image is shown without boxes instead.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadIssue {
    pub image: PathBuf,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SaveOutcome {
    Written { path: PathBuf, boxes: usize },
    /// Nothing to write, or writing would clobber a file that failed to load.
    Skipped,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied { added: usize },
    /// The user left the image while the detector was running.
    Stale,
    NoImage,
}

/// Snapshot of the current image handed to a background detector.
#[derive(Clone, Debug)]
pub struct PredictionTicket {
    token: Uuid,
    pub image: Arc<DynamicImage>,
    pub path: PathBuf,
}

impl PredictionTicket {
    pub fn token(&self) -> Uuid {
        self.token
    }
}

/// Everything needed to annotate one project: the image list, the label set and the
/// state of the image on screen.
pub struct AnnotationSession {
    root: PathBuf,
    config: ProjectConfig,
    catalog: ImageCatalog,
    labels: LabelSet,
    labels_dirty: bool,
    boxes: BoxManager,
    image: ImageManager,
    canvas: Canvas,
    token: Uuid,
    annotation_existed: bool,
    load_failed: bool,
    load_issues: Vec<LoadIssue>,
}

impl AnnotationSession {
    /// Opens the project in `root` and loads its first image.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, SpectraiError> {
        let root = root.as_ref().to_path_buf();
        let config = ProjectConfig::load(&root)?;

        let dataset = config.dataset_path(&root);
        let labels = if dataset.exists() {
            LabelSet::load(&dataset)?
        } else {
            warn!(
                "No {} in project, using the default labels",
                dataset.display()
            );
            LabelSet::default_labels()
        };

        let catalog = ImageCatalog::scan(
            config.images_dir(&root),
            config.annotations_dir(&root),
        )?;

        let settings = &config.settings;
        let image = ImageManager::new(settings.viewport_width, settings.viewport_height)?
            .with_fit_mode(settings.fit_mode);
        let canvas = Canvas::new().with_min_box_size(settings.min_box_size);

        info!(
            "Opened project {} with {} images and {} labels",
            root.display(),
            catalog.len(),
            labels.len()
        );

        let mut session = Self {
            root,
            config,
            catalog,
            labels,
            labels_dirty: false,
            boxes: BoxManager::new(),
            image,
            canvas,
            token: Uuid::new_v4(),
            annotation_existed: false,
            load_failed: false,
            load_issues: Vec::new(),
        };
        session.load_current()?;
        Ok(session)
    }

    /// Creates a project in `root` and opens it.
    pub fn create<P: AsRef<Path>, Q: Into<PathBuf>, R: Into<PathBuf>>(
        root: P,
        images_path: Q,
        annotations_path: R,
    ) -> Result<Self, SpectraiError> {
        ProjectConfig::create(root.as_ref(), images_path, annotations_path)?;
        Self::open(root)
    }

    /// Loads the current image and its boxes.
    ///
    /// An unreadable image, a malformed label file or a file naming a label the
    /// project does not have is logged and recorded in
    /// [`AnnotationSession::load_issues`]; the image then starts with no boxes.
    pub fn load_current(&mut self) -> Result<(), SpectraiError> {
        self.token = Uuid::new_v4();
        self.boxes.reset();
        self.canvas.reset();
        self.load_failed = false;
        self.annotation_existed = false;

        let Some(image_path) = self.catalog.current().map(Path::to_path_buf) else {
            self.image.clear_image();
            return Ok(());
        };

        let size = match self.image.load_image(&image_path) {
            Ok(size) => size,
            Err(err) => {
                self.image.clear_image();
                self.report_issue(&image_path, err);
                self.canvas
                    .push_event(AnnotationEvent::BoxesReplaced { count: 0 });
                return Ok(());
            }
        };

        let annotation_path = self.catalog.annotation_path(&image_path);
        self.annotation_existed = annotation_path.exists();

        let loaded = read_annotation_file(&annotation_path, size).and_then(|records| {
            for record in &records {
                self.labels.check_index(record.label_id)?;
            }
            self.boxes.from_list(&records)
        });
        match loaded {
            Ok(()) => {}
            Err(err @ SpectraiError::MalformedAnnotationFile { .. })
            | Err(err @ SpectraiError::InvalidGeometry { .. })
            | Err(err @ SpectraiError::UnknownLabel { .. }) => {
                self.boxes.reset();
                self.report_issue(&image_path, err);
            }
            Err(err) => return Err(err),
        }

        self.canvas.push_event(AnnotationEvent::BoxesReplaced {
            count: self.boxes.len(),
        });
        debug!(
            "Image {} loaded with {} boxes",
            image_path.display(),
            self.boxes.len()
        );
        Ok(())
    }

    fn report_issue(&mut self, image: &Path, err: SpectraiError) {
        warn!("Skipping annotations of {}: {}", image.display(), err);
        self.load_failed = true;
        self.load_issues.push(LoadIssue {
            image: image.to_path_buf(),
            message: err.to_string(),
        });
    }

    /// Writes the current boxes to the image's label file.
    ///
    /// No file is created for an image without boxes. A file that exists is
    /// rewritten, empty if every box was erased, unless it failed to load and
    /// nothing was added since.
    pub fn save_current(&mut self) -> Result<SaveOutcome, SpectraiError> {
        let (Some(image_path), Some(size)) = (self.catalog.current(), self.image.image_size())
        else {
            return Ok(SaveOutcome::Skipped);
        };
        let annotation_path = self.catalog.annotation_path(image_path);

        let records = self.boxes.to_list();
        if records.is_empty() && (!self.annotation_existed || self.load_failed) {
            debug!("Nothing to save for {}", image_path.display());
            return Ok(SaveOutcome::Skipped);
        }

        write_annotation_file(&annotation_path, &records, size)?;
        self.annotation_existed = true;
        self.load_failed = false;
        info!(
            "Saved {} boxes to {}",
            records.len(),
            annotation_path.display()
        );

        if self.labels_dirty {
            self.labels.save(self.config.dataset_path(&self.root))?;
            self.labels_dirty = false;
        }

        Ok(SaveOutcome::Written {
            path: annotation_path,
            boxes: records.len(),
        })
    }

    /// Saves, then moves one image. Returns `false` at either end of the list.
    pub fn navigate(&mut self, direction: Direction) -> Result<bool, SpectraiError> {
        self.save_current()?;
        if !self.catalog.step(direction) {
            return Ok(false);
        }
        info!("Moved {:?} to image {}", direction, self.catalog.current_index());
        self.load_current()?;
        Ok(true)
    }

    pub fn go_to(&mut self, index: usize) -> Result<bool, SpectraiError> {
        self.save_current()?;
        if !self.catalog.go_to(index) {
            return Ok(false);
        }
        info!("Jumped to image {}", self.catalog.current_index());
        self.load_current()?;
        Ok(true)
    }

    pub fn resize(&mut self, width: f32, height: f32) -> Result<(), SpectraiError> {
        self.image.set_viewport(width, height)
    }

    pub fn set_fit_mode(&mut self, fit_mode: FitMode) {
        self.image.set_fit_mode(fit_mode);
    }

    pub fn press(&mut self, point: Vec2) -> Result<(), SpectraiError> {
        self.canvas.press(point, &self.image, &mut self.boxes)
    }

    pub fn hover(&mut self, point: Vec2) {
        self.canvas.hover(point, &self.image);
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.canvas.set_mode(mode, &mut self.boxes);
    }

    pub fn set_current_label(&mut self, label_id: usize) -> Result<(), SpectraiError> {
        self.canvas.set_current_label(label_id, &self.labels)
    }

    pub fn delete_selected(&mut self) -> Result<Option<BoxId>, SpectraiError> {
        self.canvas.delete_selected(&mut self.boxes)
    }

    /// Captures the current image for a detector running elsewhere.
    pub fn begin_prediction(&self) -> Option<PredictionTicket> {
        let image = self.image.image()?.clone();
        let path = self.catalog.current()?.to_path_buf();
        Some(PredictionTicket {
            token: self.token,
            image,
            path,
        })
    }

    /// Adds detections made for `ticket`, unless the user has moved on since.
    pub fn apply_detections(
        &mut self,
        ticket: &PredictionTicket,
        detections: Vec<Detection>,
        predictor: &PredictorManager,
    ) -> ApplyOutcome {
        if ticket.token != self.token {
            warn!(
                "Discarding {} detections for {}, the image is no longer current",
                detections.len(),
                ticket.path.display()
            );
            return ApplyOutcome::Stale;
        }
        let Some(size) = self.image.image_size() else {
            return ApplyOutcome::NoImage;
        };

        let known = self.labels.len();
        let predictions = predictor.convert(detections, &mut self.labels);
        if self.labels.len() > known {
            self.labels_dirty = true;
        }

        let mut added = 0;
        for prediction in predictions {
            match prediction.bbox.clamped_to(size) {
                Ok(bbox) => {
                    let box_id = self.boxes.add_box(bbox);
                    self.canvas.push_event(AnnotationEvent::BoxCreated(box_id));
                    added += 1;
                }
                Err(err) => warn!("Dropped prediction: {}", err),
            }
        }
        info!(
            "Added {} predicted boxes to {}",
            added,
            ticket.path.display()
        );
        ApplyOutcome::Applied { added }
    }

    /// Runs the detector on the current image and adds its boxes.
    pub fn predict_current(
        &mut self,
        predictor: &mut PredictorManager,
    ) -> Result<ApplyOutcome, SpectraiError> {
        let Some(ticket) = self.begin_prediction() else {
            return Ok(ApplyOutcome::NoImage);
        };
        let detections = predictor.predict(&ticket.image)?;
        Ok(self.apply_detections(&ticket, detections, predictor))
    }

    pub fn drain_events(&mut self) -> Vec<AnnotationEvent> {
        self.canvas.drain_events()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ProjectConfig {
        &mut self.config
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn current_index(&self) -> usize {
        self.catalog.current_index()
    }

    pub fn current_image_path(&self) -> Option<&Path> {
        self.catalog.current()
    }

    pub fn current_image_size(&self) -> Option<ImageSize> {
        self.image.image_size()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn boxes(&self) -> &BoxManager {
        &self.boxes
    }

    pub fn boxes_mut(&mut self) -> &mut BoxManager {
        &mut self.boxes
    }

    pub fn image_manager(&self) -> &ImageManager {
        &self.image
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn load_issues(&self) -> &[LoadIssue] {
        &self.load_issues
    }
}

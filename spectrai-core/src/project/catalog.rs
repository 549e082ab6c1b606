use std::{
    fs,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, ensure};
use tracing::*;

use crate::{
    consts::{ANNOTATION_EXTENSION, IMAGE_EXTENSIONS},
    error::{IndexOutOfRangeSnafu, IoReadSnafu, NoImagesSnafu, SpectraiError},
};

/// Direction of a step through the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Sorted list of a project's images with a cursor on the current one.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    images: Vec<PathBuf>,
    annotations_dir: PathBuf,
    current: usize,
}

impl ImageCatalog {
    /// Lists the images directly inside `images_dir`.
    pub fn scan<P: AsRef<Path>, Q: Into<PathBuf>>(
        images_dir: P,
        annotations_dir: Q,
    ) -> Result<Self, SpectraiError> {
        let images_dir = images_dir.as_ref();
        let entries = fs::read_dir(images_dir).context(IoReadSnafu {
            path: images_dir.to_string_lossy(),
        })?;

        let mut images = Vec::new();
        for entry in entries {
            let path = entry
                .context(IoReadSnafu {
                    path: images_dir.to_string_lossy(),
                })?
                .path();
            if path.is_file() && is_image(&path) {
                images.push(path);
            }
        }
        images.sort();

        ensure!(
            !images.is_empty(),
            NoImagesSnafu {
                path: images_dir.to_string_lossy()
            }
        );
        info!("Found {} images in {}", images.len(), images_dir.display());

        Ok(Self::from_paths(images, annotations_dir))
    }

    /// Builds a catalog from known paths, sorted. The list must not be empty for
    /// [`ImageCatalog::current`] to return anything.
    pub fn from_paths<Q: Into<PathBuf>>(mut images: Vec<PathBuf>, annotations_dir: Q) -> Self {
        images.sort();
        Self {
            images,
            annotations_dir: annotations_dir.into(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&Path> {
        self.images.get(self.current).map(PathBuf::as_path)
    }

    /// `<annotations>/<image stem>.txt`
    pub fn annotation_path(&self, image: &Path) -> PathBuf {
        let mut name = image.file_stem().unwrap_or(image.as_os_str()).to_os_string();
        name.push(".");
        name.push(ANNOTATION_EXTENSION);
        self.annotations_dir.join(name)
    }

    pub fn current_annotation_path(&self) -> Option<PathBuf> {
        self.current().map(|image| self.annotation_path(image))
    }

    /// Fails when `index` names no image, for callers that must not be clamped.
    pub fn check_index(&self, index: usize) -> Result<(), SpectraiError> {
        ensure!(
            index < self.images.len(),
            IndexOutOfRangeSnafu {
                index,
                len: self.images.len(),
            }
        );
        Ok(())
    }

    /// Moves one step, staying put at either end. Returns `true` when the cursor moved.
    pub fn step(&mut self, direction: Direction) -> bool {
        let target = match direction {
            Direction::Next => self.current + 1,
            Direction::Previous => self.current.saturating_sub(1),
        };
        self.go_to(target)
    }

    pub fn next(&mut self) -> bool {
        self.step(Direction::Next)
    }

    pub fn previous(&mut self) -> bool {
        self.step(Direction::Previous)
    }

    /// Jumps to `index`, clamped to the last image.
    pub fn go_to(&mut self, index: usize) -> bool {
        let target = index.min(self.images.len().saturating_sub(1));
        let moved = target != self.current;
        self.current = target;
        moved
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

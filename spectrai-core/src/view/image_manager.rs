use std::{path::Path, sync::Arc};

use glam::Vec2;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tracing::*;

use crate::{
    analysis::bbox::{Bbox, ImageSize},
    annotation::BoundingBox,
    error::{ImageReadSnafu, InvalidViewportSnafu, SpectraiError},
};

/// How an image is fitted into the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Uniform scale, centered, padding on one axis.
    #[default]
    Letterbox,
    /// Independent scale per axis, filling the whole viewport.
    Stretch,
}

/// Maps between original-image pixels and viewport pixels.
///
/// Boxes live in image space only. The transform is recomputed whenever the viewport,
/// the fit mode or the image changes, and stored boxes are never touched by it.
#[derive(Debug, Clone)]
pub struct ImageManager {
    viewport: Vec2,
    fit_mode: FitMode,
    image_size: Option<ImageSize>,
    image: Option<Arc<DynamicImage>>,
    scale: Vec2,
    offset: Vec2,
}

impl ImageManager {
    pub fn new(width: f32, height: f32) -> Result<Self, SpectraiError> {
        check_viewport(width, height)?;
        Ok(Self {
            viewport: Vec2::new(width, height),
            fit_mode: FitMode::default(),
            image_size: None,
            image: None,
            scale: Vec2::ONE,
            offset: Vec2::ZERO,
        })
    }

    pub fn with_fit_mode(mut self, fit_mode: FitMode) -> Self {
        self.set_fit_mode(fit_mode);
        self
    }

    /// Decodes the image at `path` and fits it into the viewport.
    pub fn load_image<P: AsRef<Path>>(&mut self, path: P) -> Result<ImageSize, SpectraiError> {
        let path = path.as_ref();
        let image = image::open(path).context(ImageReadSnafu {
            path: path.to_string_lossy(),
        })?;
        let size = self.set_image(image);
        info!(
            "Loaded image {} ({}x{})",
            path.display(),
            size.width,
            size.height
        );
        Ok(size)
    }

    /// Uses already decoded pixels.
    pub fn set_image(&mut self, image: DynamicImage) -> ImageSize {
        let (width, height) = image.dimensions();
        let size = ImageSize::new(width, height);
        self.image = Some(Arc::new(image));
        self.image_size = Some(size);
        self.recompute();
        size
    }

    /// Sets the original dimensions without pixel data.
    pub fn set_image_size(&mut self, size: ImageSize) {
        self.image = None;
        self.image_size = Some(size);
        self.recompute();
    }

    pub fn clear_image(&mut self) {
        self.image = None;
        self.image_size = None;
        self.recompute();
    }

    /// Resizes the viewport. On error the previous viewport is kept.
    pub fn set_viewport(&mut self, width: f32, height: f32) -> Result<(), SpectraiError> {
        check_viewport(width, height)?;
        self.viewport = Vec2::new(width, height);
        self.recompute();
        Ok(())
    }

    pub fn set_fit_mode(&mut self, fit_mode: FitMode) {
        self.fit_mode = fit_mode;
        self.recompute();
    }

    fn recompute(&mut self) {
        let Some(size) = self.image_size.filter(|size| !size.is_empty()) else {
            self.scale = Vec2::ONE;
            self.offset = Vec2::ZERO;
            return;
        };

        let image = size.as_vec2();
        match self.fit_mode {
            FitMode::Letterbox => {
                let scale = f32::min(self.viewport.x / image.x, self.viewport.y / image.y);
                self.scale = Vec2::splat(scale);
                self.offset = (self.viewport - image * scale) / 2.0;
            }
            FitMode::Stretch => {
                self.scale = self.viewport / image;
                self.offset = Vec2::ZERO;
            }
        }
        debug!(
            "Transform updated: scale={:?} offset={:?} viewport={:?}",
            self.scale, self.offset, self.viewport
        );
    }

    pub fn image_to_screen(&self, point: Vec2) -> Vec2 {
        point * self.scale + self.offset
    }

    /// Inverse of [`ImageManager::image_to_screen`], valid for any point including the padding.
    pub fn screen_to_image(&self, point: Vec2) -> Vec2 {
        (point - self.offset) / self.scale
    }

    /// `true` when `point` falls on the displayed image, edges included.
    pub fn is_mouse_in_image(&self, point: Vec2) -> bool {
        self.displayed_rect()
            .is_some_and(|rect| rect.contains_point(point))
    }

    /// Converted point clamped to the image, or `None` in the padding.
    pub fn screen_to_image_clamped(&self, point: Vec2) -> Option<Vec2> {
        if !self.is_mouse_in_image(point) {
            return None;
        }
        let size = self.image_size?.as_vec2();
        Some(self.screen_to_image(point).clamp(Vec2::ZERO, size))
    }

    pub fn box_to_screen(&self, bbox: &BoundingBox) -> Bbox {
        let bounds = bbox.bounds();
        Bbox::new(
            self.image_to_screen(bounds.min),
            self.image_to_screen(bounds.max),
        )
    }

    /// Where the image lands in the viewport.
    pub fn displayed_rect(&self) -> Option<Bbox> {
        let size = self.image_size.filter(|size| !size.is_empty())?;
        Some(Bbox::new(
            self.offset,
            self.image_to_screen(size.as_vec2()),
        ))
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn viewport(&self) -> Vec2 {
        self.viewport
    }

    pub fn fit_mode(&self) -> FitMode {
        self.fit_mode
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        self.image.as_ref()
    }
}

fn check_viewport(width: f32, height: f32) -> Result<(), SpectraiError> {
    ensure!(
        width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0,
        InvalidViewportSnafu { width, height }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(viewport: (f32, f32), image: (u32, u32), fit_mode: FitMode) -> ImageManager {
        let mut manager = ImageManager::new(viewport.0, viewport.1)
            .unwrap()
            .with_fit_mode(fit_mode);
        manager.set_image_size(ImageSize::new(image.0, image.1));
        manager
    }

    fn assert_close(a: Vec2, b: Vec2) {
        assert!((a - b).length() < 1e-3, "{a:?} != {b:?}");
    }

    #[test]
    fn test_half_scale_without_padding() {
        let manager = manager((400.0, 300.0), (800, 600), FitMode::Letterbox);
        assert_eq!(manager.scale(), Vec2::splat(0.5));
        assert_eq!(manager.offset(), Vec2::ZERO);
        assert_close(
            manager.screen_to_image(Vec2::new(100.0, 100.0)),
            Vec2::new(200.0, 200.0),
        );
    }

    #[test]
    fn test_letterbox_pads_short_axis() {
        let manager = manager((400.0, 400.0), (1000, 500), FitMode::Letterbox);
        assert_eq!(manager.scale(), Vec2::splat(0.4));
        assert_close(manager.offset(), Vec2::new(0.0, 100.0));

        // Padding above the image
        assert!(!manager.is_mouse_in_image(Vec2::new(200.0, 50.0)));
        assert_eq!(manager.screen_to_image_clamped(Vec2::new(200.0, 50.0)), None);
        // The raw conversion still works there
        assert_close(
            manager.screen_to_image(Vec2::new(200.0, 50.0)),
            Vec2::new(500.0, -125.0),
        );

        assert!(manager.is_mouse_in_image(Vec2::new(200.0, 200.0)));
        assert_close(
            manager
                .screen_to_image_clamped(Vec2::new(400.0, 300.0))
                .unwrap(),
            Vec2::new(1000.0, 500.0),
        );
    }

    #[test]
    fn test_stretch_scales_axes_independently() {
        let manager = manager((400.0, 400.0), (1000, 500), FitMode::Stretch);
        assert_close(manager.scale(), Vec2::new(0.4, 0.8));
        assert_eq!(manager.offset(), Vec2::ZERO);
        assert!(manager.is_mouse_in_image(Vec2::new(10.0, 10.0)));
    }

    #[test]
    fn test_round_trip_in_both_modes() {
        let points = [
            Vec2::ZERO,
            Vec2::new(123.4, 56.7),
            Vec2::new(999.0, 499.0),
            Vec2::new(-20.0, 700.0),
        ];
        for fit_mode in [FitMode::Letterbox, FitMode::Stretch] {
            for viewport in [(400.0, 400.0), (1920.0, 1080.0), (333.0, 777.0)] {
                let manager = manager(viewport, (1000, 500), fit_mode);
                for p in points {
                    assert_close(manager.screen_to_image(manager.image_to_screen(p)), p);
                }
            }
        }
    }

    #[test]
    fn test_resize_keeps_boxes_in_image_space() {
        let mut manager = manager((400.0, 300.0), (800, 600), FitMode::Letterbox);
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 100.0, 0).unwrap();
        let before = manager.box_to_screen(&bbox);
        assert_close(before.min, Vec2::new(50.0, 50.0));

        manager.set_viewport(800.0, 600.0).unwrap();
        let after = manager.box_to_screen(&bbox);
        assert_close(after.min, Vec2::new(100.0, 100.0));
        assert_close(after.max, Vec2::new(300.0, 200.0));
        assert_eq!(bbox.get_bounds(), (100.0, 100.0, 300.0, 200.0));
    }

    #[test]
    fn test_invalid_viewport_rejected() {
        assert!(matches!(
            ImageManager::new(0.0, 100.0),
            Err(SpectraiError::InvalidViewport { .. })
        ));

        let mut manager = manager((400.0, 300.0), (800, 600), FitMode::Letterbox);
        assert!(manager.set_viewport(f32::NAN, 10.0).is_err());
        assert_eq!(manager.viewport(), Vec2::new(400.0, 300.0));
    }

    #[test]
    fn test_no_image_means_no_hits() {
        let manager = ImageManager::new(400.0, 300.0).unwrap();
        assert!(!manager.is_mouse_in_image(Vec2::new(10.0, 10.0)));
        assert!(manager.displayed_rect().is_none());
    }

    #[test]
    fn test_set_image_records_size() {
        let mut manager = ImageManager::new(100.0, 100.0).unwrap();
        let size = manager.set_image(DynamicImage::new_rgb8(50, 25));
        assert_eq!(size, ImageSize::new(50, 25));
        assert!(manager.image().is_some());
        assert_eq!(manager.scale(), Vec2::splat(2.0));
        assert_close(manager.offset(), Vec2::new(0.0, 25.0));
    }
}

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of an original image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    /// `true` when either side is zero, which makes normalization impossible.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A 2D axis-aligned rectangle in image space, stored as its minimum and maximum corners.
///
/// Image space has its origin at the top-left corner with y growing downward, so `min`
/// is the top-left corner and `max` the bottom-right one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bbox {
    /// Top-left corner.
    pub min: Vec2,
    /// Bottom-right corner.
    pub max: Vec2,
}

impl Bbox {
    /// Creates a rectangle from its two corners.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use spectrai_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 5.0));
    /// assert_eq!(bbox.size(), Vec2::new(10.0, 5.0));
    /// ```
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Creates a rectangle from two arbitrary corners, in any order.
    ///
    /// Two-click drawing produces corners in whatever direction the user dragged.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use spectrai_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_corners(Vec2::new(30.0, 5.0), Vec2::new(10.0, 25.0));
    /// assert_eq!(bbox.min, Vec2::new(10.0, 5.0));
    /// assert_eq!(bbox.max, Vec2::new(30.0, 25.0));
    /// ```
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Creates a rectangle from its top-left corner and its size.
    pub fn new_from_min_size(min: Vec2, size: Vec2) -> Self {
        Self {
            min,
            max: min + size,
        }
    }

    /// Creates a rectangle from a center point and a size, the layout of YOLO rows.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use spectrai_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_center_size(Vec2::new(100.0, 200.0), Vec2::new(50.0, 80.0));
    /// assert_eq!(bbox.min, Vec2::new(75.0, 160.0));
    /// assert_eq!(bbox.max, Vec2::new(125.0, 240.0));
    /// ```
    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        let half_size = size / 2.0;
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Area of the rectangle, zero for degenerate or inverted rectangles.
    pub fn area(&self) -> f32 {
        let length = self.size().max(Vec2::ZERO);

        length.x * length.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    /// `true` when the rectangle has no positive extent on at least one axis.
    pub fn is_degenerate(&self) -> bool {
        !(self.max.x > self.min.x && self.max.y > self.min.y)
    }

    /// Area shared by two rectangles, `0.0` when they are disjoint or only touch.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use spectrai_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
    /// let bbox2 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
    /// assert_eq!(bbox1.intersection(&bbox2), 4.0);
    /// ```
    pub fn intersection(&self, other: &Self) -> f32 {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);

        if max.x > min.x && max.y > min.y {
            (max.x - min.x) * (max.y - min.y)
        } else {
            0.
        }
    }

    /// Intersection over union of two rectangles, in `[0, 1]`.
    ///
    /// Used by non-maximum suppression to decide whether two detections describe the same
    /// object.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection_area = self.intersection(other);
        let union_area = self.area() + other.area() - intersection_area;

        if union_area > 0.0 {
            intersection_area / union_area
        } else {
            0.0
        }
    }

    /// Clips the rectangle to `[min_bounds, max_bounds]`.
    ///
    /// A rectangle lying fully outside the bounds comes back degenerate.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use spectrai_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::new(-10.0, -5.0), Vec2::new(1030.0, 700.0));
    /// let clamped = bbox.clamp(Vec2::ZERO, Vec2::new(1024.0, 768.0));
    /// assert_eq!(clamped.min, Vec2::new(0.0, 0.0));
    /// assert_eq!(clamped.max, Vec2::new(1024.0, 700.0));
    /// ```
    pub fn clamp(&self, min_bounds: Vec2, max_bounds: Vec2) -> Self {
        Self {
            min: self.min.clamp(min_bounds, max_bounds),
            max: self.max.clamp(min_bounds, max_bounds),
        }
    }

    /// Point-in-rectangle test, edges included.
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.min.x <= point.x
            && point.x <= self.max.x
            && self.min.y <= point.y
            && point.y <= self.max.y
    }

    /// Smallest rectangle covering both inputs.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Divides both corners by `scale`, mapping a rectangle out of a resized frame.
    pub fn unscale(&self, scale: f32) -> Self {
        Self {
            min: self.min / scale,
            max: self.max / scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_area() {
        let bbox = Bbox::new_from_min_size(Vec2::ZERO, Vec2::new(2.0, 3.0));
        assert_eq!(bbox.area(), 6.0);

        // Inverted rectangles have no area
        let inverted = Bbox::new(Vec2::new(5.0, 5.0), Vec2::new(1.0, 1.0));
        assert_eq!(inverted.area(), 0.0);
        assert!(inverted.is_degenerate());

        let line = Bbox::new(Vec2::ZERO, Vec2::new(5.0, 0.0));
        assert_eq!(line.area(), 0.0);
        assert!(line.is_degenerate());
    }

    #[test]
    fn test_bbox_from_center_size() {
        let bbox = Bbox::from_center_size(Vec2::new(512.0, 384.0), Vec2::new(100.0, 200.0));
        assert_eq!(bbox.min, Vec2::new(462.0, 284.0));
        assert_eq!(bbox.max, Vec2::new(562.0, 484.0));
        assert_eq!(bbox.center(), Vec2::new(512.0, 384.0));
        assert_eq!(bbox.area(), 20000.0);
    }

    #[test]
    fn test_bbox_from_corners_any_direction() {
        let expected = Bbox::new(Vec2::new(10.0, 20.0), Vec2::new(40.0, 60.0));
        let corners = [
            (Vec2::new(10.0, 20.0), Vec2::new(40.0, 60.0)),
            (Vec2::new(40.0, 60.0), Vec2::new(10.0, 20.0)),
            (Vec2::new(40.0, 20.0), Vec2::new(10.0, 60.0)),
            (Vec2::new(10.0, 60.0), Vec2::new(40.0, 20.0)),
        ];
        for (a, b) in corners {
            assert_eq!(Bbox::from_corners(a, b), expected);
        }
    }

    #[test]
    fn test_bbox_iou() {
        let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
        let bbox2 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
        assert_eq!(bbox1.iou(&bbox2), 1.0);

        // 4 / (16 + 16 - 4)
        let bbox3 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
        assert!((bbox1.iou(&bbox3) - 4.0 / 28.0).abs() < 1e-6);

        let far = Bbox::new(Vec2::new(10.0, 10.0), Vec2::new(12.0, 12.0));
        assert_eq!(bbox1.iou(&far), 0.0);

        // Touching edges share no area
        let right = Bbox::new(Vec2::new(4.0, 0.0), Vec2::new(8.0, 4.0));
        assert_eq!(bbox1.intersection(&right), 0.0);
    }

    #[test]
    fn test_bbox_clamp_outside_is_degenerate() {
        let outside = Bbox::new(Vec2::new(120.0, 10.0), Vec2::new(150.0, 40.0));
        let clamped = outside.clamp(Vec2::ZERO, Vec2::new(100.0, 100.0));
        assert!(clamped.is_degenerate());
    }

    #[test]
    fn test_bbox_contains_point_edges() {
        let bbox = Bbox::new(Vec2::new(10.0, 10.0), Vec2::new(20.0, 20.0));
        assert!(bbox.contains_point(Vec2::new(10.0, 10.0)));
        assert!(bbox.contains_point(Vec2::new(20.0, 15.0)));
        assert!(!bbox.contains_point(Vec2::new(20.1, 15.0)));
        assert!(!bbox.contains_point(Vec2::new(15.0, 9.9)));
    }

    #[test]
    fn test_bbox_union_and_unscale() {
        let a = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(5.0, 5.0));
        let b = Bbox::new(Vec2::new(3.0, 3.0), Vec2::new(8.0, 8.0));
        assert_eq!(a.union(&b), Bbox::new(Vec2::ZERO, Vec2::new(8.0, 8.0)));

        let scaled = Bbox::new(Vec2::new(10.0, 20.0), Vec2::new(30.0, 40.0)).unscale(0.5);
        assert_eq!(scaled, Bbox::new(Vec2::new(20.0, 40.0), Vec2::new(60.0, 80.0)));
    }

    #[test]
    fn test_image_size() {
        let size = ImageSize::new(800, 600);
        assert_eq!(size.as_vec2(), Vec2::new(800.0, 600.0));
        assert!(!size.is_empty());
        assert!(ImageSize::new(0, 600).is_empty());
    }
}

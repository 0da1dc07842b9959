//! Detected text regions and their integer bounding boxes.

use serde::{Deserialize, Serialize};

/// A 2D integer point in working-image pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[inline]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Converts a detector's floating point coordinate, truncating toward zero.
    #[inline]
    pub fn from_f32(x: f32, y: f32) -> Self {
        Self {
            x: x as i32,
            y: y as i32,
        }
    }
}

/// One text region reported by a detector.
///
/// The label (recognized text, class name, confidence) is carried for
/// logging only; masking uses the polygon alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    /// Polygon vertices in order.
    pub points: Vec<Point>,
    /// Opaque label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DetectedRegion {
    /// Creates a region from polygon vertices.
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points,
            label: None,
        }
    }

    /// Creates an axis-aligned rectangular region covering
    /// columns `x0..=x1` and rows `y0..=y1`.
    pub fn rect(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
    }

    /// Attaches a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The polygon's integer bounding box, or `None` for an empty polygon.
    pub fn bounding_box(&self) -> Option<PixelBox> {
        let first = self.points.first()?;
        let init = PixelBox {
            xmin: first.x,
            ymin: first.y,
            xmax: first.x,
            ymax: first.y,
        };
        Some(self.points.iter().skip(1).fold(init, |b, p| PixelBox {
            xmin: b.xmin.min(p.x),
            ymin: b.ymin.min(p.y),
            xmax: b.xmax.max(p.x),
            ymax: b.ymax.max(p.y),
        }))
    }
}

/// An inclusive integer rectangle: columns `xmin..=xmax`, rows `ymin..=ymax`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl PixelBox {
    /// Number of columns covered.
    #[inline]
    pub fn width(&self) -> u32 {
        (self.xmax - self.xmin + 1).max(0) as u32
    }

    /// Number of rows covered.
    #[inline]
    pub fn height(&self) -> u32 {
        (self.ymax - self.ymin + 1).max(0) as u32
    }

    /// Returns true if the pixel at (x, y) lies inside the box.
    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Intersects the box with a `width` x `height` image.
    ///
    /// Returns `None` if nothing of the box is inside the image.
    pub fn clip(&self, width: u32, height: u32) -> Option<PixelBox> {
        let clipped = PixelBox {
            xmin: self.xmin.max(0),
            ymin: self.ymin.max(0),
            xmax: self.xmax.min(width as i32 - 1),
            ymax: self.ymax.min(height as i32 - 1),
        };
        (clipped.xmin <= clipped.xmax && clipped.ymin <= clipped.ymax).then_some(clipped)
    }
}

//! Coordinate mapping between the two spaces fields live in.
//!
//! Fields and detections are stored as percentages of the page (0-100) with a
//! **top-left** origin. PDF content is drawn in points with a **bottom-left**
//! origin. Every conversion between the two goes through this module:
//! ```text
//! x_pt = x% / 100 * page_width
//! y_pt = page_height - y% / 100 * page_height - h% / 100 * page_height
//! ```
//! The second line anchors the rect at the bottom of the field box, which is
//! where PDF drawing operators start from.

use serde::{Deserialize, Serialize};

/// US Letter, used whenever a page carries no usable MediaBox
pub const LETTER: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

/// Page dimensions in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// A rectangle in percent of the page, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PercentRect {
    /// Clamp the rect so that it lies entirely on the page.
    ///
    /// `x` and `y` are pulled into [0, 100]; `width` and `height` are then
    /// shortened so that `x + width <= 100` and `y + height <= 100`.
    pub fn clamped(&self) -> PercentRect {
        let x = clamp_percent(self.x);
        let y = clamp_percent(self.y);
        PercentRect {
            x,
            y,
            width: self.width.max(0.0).min(100.0 - x),
            height: self.height.max(0.0).min(100.0 - y),
        }
    }
}

/// A rectangle in PDF points, bottom-left origin (`y` is the bottom edge)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Clamp a percentage into [0, 100]. NaN maps to 0.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Convert a top-left-origin point position to page percentages
pub fn point_to_percent(x: f32, y: f32, page: PageSize) -> (f32, f32) {
    let px = if page.width > 0.0 { x / page.width * 100.0 } else { 0.0 };
    let py = if page.height > 0.0 { y / page.height * 100.0 } else { 0.0 };
    (clamp_percent(px), clamp_percent(py))
}

/// Convert a percentage rect to an absolute rect in PDF point space
pub fn percent_rect_to_points(rect: &PercentRect, page: PageSize) -> PointRect {
    let width = rect.width / 100.0 * page.width;
    let height = rect.height / 100.0 * page.height;
    PointRect {
        x: rect.x / 100.0 * page.width,
        y: page.height - rect.y / 100.0 * page.height - height,
        width,
        height,
    }
}

/// Flip a y coordinate between top-left and bottom-left origins.
///
/// The flip is its own inverse.
pub fn flip_y(y: f32, page_height: f32) -> f32 {
    page_height - y
}

/// Scale an image into a box, preserving its aspect ratio, and center it.
///
/// The dimension that would overflow is pinned to the box and the other one
/// follows from the image's aspect ratio.
pub fn fit_image(image_width: u32, image_height: u32, bounds: &PointRect) -> PointRect {
    if image_width == 0 || image_height == 0 || bounds.width <= 0.0 || bounds.height <= 0.0 {
        return PointRect {
            x: bounds.x,
            y: bounds.y,
            width: 0.0,
            height: 0.0,
        };
    }

    let image_ratio = image_width as f32 / image_height as f32;
    let box_ratio = bounds.width / bounds.height;

    let (width, height) = if image_ratio > box_ratio {
        (bounds.width, bounds.width / image_ratio)
    } else {
        (bounds.height * image_ratio, bounds.height)
    };

    PointRect {
        x: bounds.x + (bounds.width - width) / 2.0,
        y: bounds.y + (bounds.height - height) / 2.0,
        width,
        height,
    }
}

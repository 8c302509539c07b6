use crate::model::BoundingBox;
use serde::Serialize;

/// Rectangle in display (logical pixel) space, used by the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Integer region of the full-resolution image, used for crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Size an image is shown at after layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Display size of an image rendered at natural resolution.
    pub fn natural(width: u32, height: u32) -> Self {
        Self::new(f64::from(width), f64::from(height))
    }

    /// Full-width layout: fixed width, height follows the aspect ratio.
    pub fn fit_width(natural_w: u32, natural_h: u32, width: f64) -> Self {
        if natural_w == 0 {
            return Self::new(width, 0.0);
        }
        let height = width * f64::from(natural_h) / f64::from(natural_w);
        Self::new(width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// `{xmin*W, ymin*H, (xmax-xmin)*W, (ymax-ymin)*H}` against the displayed size.
pub fn overlay_rect(b: &BoundingBox, display: DisplaySize) -> PixelRect {
    PixelRect {
        x: b.xmin * display.width,
        y: b.ymin * display.height,
        width: b.width() * display.width,
        height: b.height() * display.height,
    }
}

/// Same mapping against natural dimensions, snapped to whole pixels.
///
/// Edges are rounded independently and clamped to the image; a box that
/// rounds to zero width or height still yields a 1x1 region. Returns
/// `None` only for a zero-sized image.
pub fn crop_rect(b: &BoundingBox, natural_w: u32, natural_h: u32) -> Option<CropRect> {
    if natural_w == 0 || natural_h == 0 {
        return None;
    }
    let (x, width) = snap_span(b.xmin, b.xmax, natural_w);
    let (y, height) = snap_span(b.ymin, b.ymax, natural_h);
    Some(CropRect {
        x,
        y,
        width,
        height,
    })
}

fn snap_span(lo: f64, hi: f64, span: u32) -> (u32, u32) {
    let span_f = f64::from(span);
    let start = (lo * span_f).round().clamp(0.0, span_f) as u32;
    let end = (hi * span_f).round().clamp(0.0, span_f) as u32;
    let len = end.saturating_sub(start);
    if len > 0 {
        return (start, len);
    }
    (start.min(span - 1), 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(ymin: f64, xmin: f64, ymax: f64, xmax: f64) -> BoundingBox {
        BoundingBox::new(ymin, xmin, ymax, xmax).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn overlay_matches_worked_example() {
        // 1000 tall, 2000 wide
        let rect = overlay_rect(&bbox(0.1, 0.2, 0.5, 0.6), DisplaySize::new(2000.0, 1000.0));
        assert!(close(rect.x, 400.0));
        assert!(close(rect.y, 100.0));
        assert!(close(rect.width, 800.0));
        assert!(close(rect.height, 400.0));
    }

    #[test]
    fn overlay_stays_inside_display() {
        let edges = [0.0, 0.05, 0.25, 0.333, 0.5, 0.9, 1.0];
        let displays = [
            DisplaySize::new(1.0, 1.0),
            DisplaySize::new(375.5, 812.25),
            DisplaySize::new(1920.0, 1080.0),
        ];
        for &lo in &edges {
            for &hi in edges.iter().filter(|h| **h >= lo) {
                let b = bbox(lo, lo, hi, hi);
                for d in displays {
                    let r = overlay_rect(&b, d);
                    assert!(r.x >= 0.0 && r.x <= d.width);
                    assert!(r.y >= 0.0 && r.y <= d.height);
                    assert!(r.right() >= 0.0 && r.right() <= d.width + 1e-9);
                    assert!(r.bottom() >= 0.0 && r.bottom() <= d.height + 1e-9);
                }
            }
        }
    }

    #[test]
    fn overlay_follows_display_resize() {
        let b = bbox(0.25, 0.25, 0.75, 0.75);
        let small = overlay_rect(&b, DisplaySize::fit_width(4000, 3000, 400.0));
        let large = overlay_rect(&b, DisplaySize::fit_width(4000, 3000, 800.0));
        assert!(close(small.width, 200.0));
        assert!(close(small.height, 150.0));
        assert!(close(large.width, 400.0));
        assert!(close(large.height, 300.0));
    }

    #[test]
    fn full_box_crops_whole_image() {
        let rect = crop_rect(&BoundingBox::FULL, 640, 480).unwrap();
        assert_eq!(
            rect,
            CropRect {
                x: 0,
                y: 0,
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn crop_uses_natural_size() {
        let rect = crop_rect(&bbox(0.1, 0.2, 0.5, 0.6), 100, 200).unwrap();
        assert_eq!(
            rect,
            CropRect {
                x: 20,
                y: 20,
                width: 40,
                height: 80
            }
        );
    }

    #[test]
    fn degenerate_box_becomes_one_pixel() {
        let rect = crop_rect(&bbox(0.5, 0.5, 0.5, 0.5), 10, 10).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (5, 5, 1, 1));

        let edge = crop_rect(&bbox(1.0, 1.0, 1.0, 1.0), 10, 10).unwrap();
        assert_eq!((edge.x, edge.y, edge.width, edge.height), (9, 9, 1, 1));

        assert!(crop_rect(&BoundingBox::FULL, 0, 10).is_none());
    }
}

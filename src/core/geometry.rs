use serde::{Deserialize, Serialize};

/// Added to the IoU denominator so degenerate boxes never divide by zero.
pub const IOU_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    /// Rescales the box per axis, e.g. from one sensor grid into another.
    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            x1: self.x1 * sx,
            y1: self.y1 * sy,
        }
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    /// Intersection over union. Inverted or zero-area boxes contribute no area,
    /// so any degenerate input yields 0.0.
    pub fn iou(&self, other: &Self) -> f64 {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);

        let inter_area = BBox::new(x0, y0, x1, y1).area();
        if inter_area <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter_area;
        inter_area / (union + IOU_EPSILON)
    }
}

/// Pixel dimensions of one sensor's image grid.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridShape {
    pub width: usize,
    pub height: usize,
}

impl GridShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Widened so that any pair of `usize` axes fits.
    pub fn pixel_count(&self) -> u128 {
        self.width as u128 * self.height as u128
    }

    /// Per-axis factors mapping coordinates of `self` into `target`.
    /// An empty source axis maps with factor 1.0.
    pub fn scale_to(&self, target: &GridShape) -> (f64, f64) {
        let sx = if self.width == 0 {
            1.0
        } else {
            target.width as f64 / self.width as f64
        };
        let sy = if self.height == 0 {
            1.0
        } else {
            target.height as f64 / self.height as f64
        };
        (sx, sy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn computes_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 15.0, 15.0);
        let iou = a.iou(&b);
        assert!((iou - 25.0 / 175.0).abs() < 1e-9);
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = BBox::new(3.0, 4.0, 20.0, 11.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iou_is_symmetric() {
        let a = BBox::new(0.0, 0.0, 12.0, 7.0);
        let b = BBox::new(4.0, 2.0, 30.0, 9.0);
        assert_eq!(a.iou(&b), b.iou(&a));
    }

    #[test]
    fn disjoint_and_degenerate_boxes_have_zero_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let far = BBox::new(20.0, 20.0, 30.0, 30.0);
        let touching = BBox::new(10.0, 0.0, 20.0, 10.0);
        let inverted = BBox::new(8.0, 8.0, 2.0, 2.0);
        let empty = BBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(a.iou(&far), 0.0);
        assert_eq!(a.iou(&touching), 0.0);
        assert_eq!(a.iou(&inverted), 0.0);
        assert_eq!(empty.iou(&empty), 0.0);
    }

    #[test]
    fn scales_between_grids() {
        let rgb = GridShape::new(1000, 800);
        let hyper = GridShape::new(250, 200);
        let (sx, sy) = rgb.scale_to(&hyper);
        assert_eq!((sx, sy), (0.25, 0.25));
        let scaled = BBox::new(100.0, 80.0, 200.0, 160.0).scale(sx, sy);
        assert_eq!(scaled, BBox::new(25.0, 20.0, 50.0, 40.0));
    }

    #[test]
    fn pixel_count_does_not_overflow_on_huge_grids() {
        let huge = GridShape::new(1 << 40, 1 << 40);
        assert_eq!(huge.pixel_count(), 1u128 << 80);
        assert!(huge.pixel_count() > GridShape::new(100, 100).pixel_count());
    }
}

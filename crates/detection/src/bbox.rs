//! Axis aligned boxes, tagged with their coordinate layout.

use std::marker::PhantomData;

/// An axis aligned box in pixels of the network input image.
///
/// The marker `T` names the layout of [`Bbox::inner`], which keeps corner boxes and center boxes
/// from being mixed up. The detection pipeline works on [`Xyxy`] boxes, other layouts are
/// converted through [`ConvertBbox`]:
///
/// ```
/// use detection::bbox::*;
///
/// let corners = Bbox::xyxy(2.0, 4.0, 10.0, 8.0);
/// let center: Bbox<Cxcywh> = corners.convert();
///
/// assert_eq!(center.inner, (6.0, 6.0, 8.0, 4.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox<T> {
    pub inner: (f32, f32, f32, f32),
    _layout: PhantomData<T>,
}

impl<T> Bbox<T> {
    const fn from_tuple(inner: (f32, f32, f32, f32)) -> Self {
        Bbox {
            inner,
            _layout: PhantomData,
        }
    }
}

/// Conversion of a box into the layout `T`.
pub trait ConvertBbox<T> {
    fn convert(&self) -> Bbox<T>;
}

impl<T> Bbox<T>
where
    Bbox<T>: ConvertBbox<Xyxy>,
{
    fn corners(&self) -> (f32, f32, f32, f32) {
        ConvertBbox::<Xyxy>::convert(self).inner
    }

    /// Area of the box, `0.0` when the corners are inverted.
    pub fn area(&self) -> f32 {
        let (x1, y1, x2, y2) = self.corners();
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Area covered by both boxes.
    pub fn intersection<S>(&self, other: &S) -> f32
    where
        S: ConvertBbox<Xyxy>,
    {
        let (ax1, ay1, ax2, ay2) = self.corners();
        let (bx1, by1, bx2, by2) = other.convert().inner;

        let overlap_x = ax2.min(bx2) - ax1.max(bx1);
        let overlap_y = ay2.min(by2) - ay1.max(by1);
        overlap_x.max(0.0) * overlap_y.max(0.0)
    }

    /// Area covered by either box.
    pub fn union<S>(&self, other: &S) -> f32
    where
        S: ConvertBbox<Xyxy>,
    {
        self.area() + other.convert().area() - self.intersection(other)
    }

    /// Intersection over union, in `[0, 1]`.
    ///
    /// Boxes that cover no area together have an IoU of `0.0`.
    pub fn iou<S>(&self, other: &S) -> f32
    where
        S: ConvertBbox<Xyxy>,
    {
        let union = self.union(other);
        if union > 0.0 {
            self.intersection(other) / union
        } else {
            0.0
        }
    }
}

impl<T> From<Bbox<T>> for (f32, f32, f32, f32) {
    fn from(bbox: Bbox<T>) -> Self {
        bbox.inner
    }
}

impl<T> From<Bbox<T>> for [f32; 4] {
    fn from(bbox: Bbox<T>) -> Self {
        let (a, b, c, d) = bbox.inner;
        [a, b, c, d]
    }
}

/// `(x_min, y_min, x_max, y_max)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Xyxy;

impl Bbox<Xyxy> {
    #[must_use]
    pub const fn xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Bbox<Xyxy> {
        Bbox::from_tuple((x1, y1, x2, y2))
    }

    /// Read a box from an `x1, y1, x2, y2` row.
    ///
    /// # Panics
    ///
    /// Panics if the row has fewer than four elements.
    #[must_use]
    pub fn from_row(row: &[f32]) -> Bbox<Xyxy> {
        Bbox::xyxy(row[0], row[1], row[2], row[3])
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.inner.2 - self.inner.0
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.inner.3 - self.inner.1
    }

    /// Whether the box lacks a positive width or a positive height.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    #[must_use]
    pub fn has_min_size(&self, min_size: f32) -> bool {
        self.width() >= min_size && self.height() >= min_size
    }

    /// Clamp every coordinate into `[0, width]` or `[0, height]`.
    ///
    /// Ordered corners stay ordered.
    #[must_use]
    pub fn clamp(&self, width: f32, height: f32) -> Bbox<Xyxy> {
        let (x1, y1, x2, y2) = self.inner;
        Bbox::xyxy(
            x1.clamp(0.0, width),
            y1.clamp(0.0, height),
            x2.clamp(0.0, width),
            y2.clamp(0.0, height),
        )
    }

    /// Multiply the horizontal coordinates by `sx` and the vertical ones by `sy`.
    #[must_use]
    pub fn scaled(&self, sx: f32, sy: f32) -> Bbox<Xyxy> {
        let (x1, y1, x2, y2) = self.inner;
        Bbox::xyxy(x1 * sx, y1 * sy, x2 * sx, y2 * sy)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        <[f32; 4]>::from(*self).iter().all(|value| value.is_finite())
    }
}

impl ConvertBbox<Xyxy> for Bbox<Xyxy> {
    fn convert(&self) -> Bbox<Xyxy> {
        *self
    }
}

impl ConvertBbox<Cxcywh> for Bbox<Xyxy> {
    fn convert(&self) -> Bbox<Cxcywh> {
        let (cx, cy) = (
            self.inner.0 + 0.5 * self.width(),
            self.inner.1 + 0.5 * self.height(),
        );
        Bbox::cxcywh(cx, cy, self.width(), self.height())
    }
}

/// `(center_x, center_y, width, height)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cxcywh;

impl Bbox<Cxcywh> {
    #[must_use]
    pub const fn cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Bbox<Cxcywh> {
        Bbox::from_tuple((cx, cy, w, h))
    }
}

impl ConvertBbox<Xyxy> for Bbox<Cxcywh> {
    fn convert(&self) -> Bbox<Xyxy> {
        let (cx, cy, w, h) = self.inner;
        let (half_w, half_h) = (0.5 * w, 0.5 * h);
        Bbox::xyxy(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }
}

impl ConvertBbox<Cxcywh> for Bbox<Cxcywh> {
    fn convert(&self) -> Bbox<Cxcywh> {
        *self
    }
}

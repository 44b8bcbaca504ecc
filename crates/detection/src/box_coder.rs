use ndarray::{Array2, ArrayView2, Zip, s};
use serde::{Deserialize, Serialize};

use crate::bbox::{Bbox, Xyxy};

/// Regression offsets of a target box relative to a reference box.
///
/// ```text
/// dx = wx * (cx_target - cx_ref) / w_ref
/// dy = wy * (cy_target - cy_ref) / h_ref
/// dw = ww * ln(w_target / w_ref)
/// dh = wh * ln(h_target / h_ref)
/// ```
///
/// In tensors a delta is stored as a `dx, dy, dw, dh` row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Delta {
    pub dx: f32,
    pub dy: f32,
    pub dw: f32,
    pub dh: f32,
}

impl Delta {
    #[must_use]
    pub const fn new(dx: f32, dy: f32, dw: f32, dh: f32) -> Self {
        Self { dx, dy, dw, dh }
    }

    /// Read a delta from a `dx, dy, dw, dh` row.
    ///
    /// # Panics
    ///
    /// Panics if the row has fewer than four elements.
    #[must_use]
    pub fn from_row(row: &[f32]) -> Self {
        Self::new(row[0], row[1], row[2], row[3])
    }

    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.dx, self.dy, self.dw, self.dh]
    }
}

/// Utility that encodes and decodes bounding boxes to and from the regression format of the model.
///
/// Based on the implementation in [torchvision].
///
/// [torchvision]: https://github.com/pytorch/vision/blob/33db2b3ebfdd2f73a9228f430fa7dd91c3b18078/torchvision/models/detection/_utils.py#L129
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCoder {
    /// The weights used for encoding and decoding the bounding boxes.
    pub weights: (f32, f32, f32, f32),
    /// The maximum value for the bounding box transformation, before clamping.
    /// This is used to avoid overflow when applying the exponent.
    pub bbox_xform_clip: f32,
}

impl BoxCoder {
    /// Weights of the region proposal stage.
    pub const RPN_WEIGHTS: (f32, f32, f32, f32) = (4.0, 4.0, 4.0, 4.0);
    /// Weights of the detector stage.
    pub const DETECTOR_WEIGHTS: (f32, f32, f32, f32) = (8.0, 8.0, 4.0, 4.0);

    /// Create a new [`BoxCoder`] with the given weights.
    ///
    /// The weights are used for the x, y, width, and height respectively
    /// of the bounding box.
    ///
    /// This will default to a `bbox_xform_clip` of `ln(1000/16)`.
    #[must_use]
    pub fn new(weights: (f32, f32, f32, f32)) -> Self {
        Self::new_with_clip(weights, (1000.0_f32 / 16.0).ln())
    }

    /// Create a new [`BoxCoder`] with the given weights and clipping value.
    #[must_use]
    pub fn new_with_clip(weights: (f32, f32, f32, f32), bbox_xform_clip: f32) -> Self {
        BoxCoder {
            weights,
            bbox_xform_clip,
        }
    }

    #[must_use]
    pub fn rpn() -> Self {
        Self::new(Self::RPN_WEIGHTS)
    }

    #[must_use]
    pub fn detector() -> Self {
        Self::new(Self::DETECTOR_WEIGHTS)
    }

    /// Encode `target` relative to `reference`.
    ///
    /// A degenerate reference or target (zero or negative width or height) has no defined
    /// offset, and encodes to a zero delta.
    #[must_use]
    pub fn encode(&self, reference: &Bbox<Xyxy>, target: &Bbox<Xyxy>) -> Delta {
        if reference.is_degenerate() || target.is_degenerate() {
            return Delta::default();
        }

        let (wx, wy, ww, wh) = self.weights;
        let (ref_w, ref_h) = (reference.width(), reference.height());
        let (target_w, target_h) = (target.width(), target.height());

        let ref_cx = reference.inner.0 + 0.5 * ref_w;
        let ref_cy = reference.inner.1 + 0.5 * ref_h;
        let target_cx = target.inner.0 + 0.5 * target_w;
        let target_cy = target.inner.1 + 0.5 * target_h;

        Delta {
            dx: wx * (target_cx - ref_cx) / ref_w,
            dy: wy * (target_cy - ref_cy) / ref_h,
            dw: ww * (target_w / ref_w).ln(),
            dh: wh * (target_h / ref_h).ln(),
        }
    }

    /// Apply `delta` to `reference`, the inverse of [`BoxCoder::encode`].
    #[must_use]
    pub fn decode(&self, reference: &Bbox<Xyxy>, delta: Delta) -> Bbox<Xyxy> {
        let (wx, wy, ww, wh) = self.weights;
        let (width, height) = (reference.width(), reference.height());

        let center_x = reference.inner.0 + 0.5 * width;
        let center_y = reference.inner.1 + 0.5 * height;

        let dw = self.clamp_log_scale(delta.dw / ww);
        let dh = self.clamp_log_scale(delta.dh / wh);

        let pred_center_x = delta.dx / wx * width + center_x;
        let pred_center_y = delta.dy / wy * height + center_y;
        let pred_w = dw.exp() * width;
        let pred_h = dh.exp() * height;

        Bbox::xyxy(
            pred_center_x - pred_w / 2.0,
            pred_center_y - pred_h / 2.0,
            pred_center_x + pred_w / 2.0,
            pred_center_y + pred_h / 2.0,
        )
    }

    /// Decode a `[n, 4]` array of `dx, dy, dw, dh` rows against a `[n, 4]` array of reference
    /// boxes, returning a `[n, 4]` array of `x1, y1, x2, y2` rows.
    ///
    /// # Panics
    ///
    /// Panics if the two arrays differ in their number of rows.
    #[must_use]
    pub fn decode_single(&self, rel_codes: ArrayView2<f32>, boxes: ArrayView2<f32>) -> Array2<f32> {
        assert_eq!(
            rel_codes.dim().0,
            boxes.dim().0,
            "every reference box needs exactly one delta row"
        );

        let widths = &boxes.column(2) - &boxes.column(0);
        let heights = &boxes.column(3) - &boxes.column(1);

        let center_x = &boxes.column(0) + &(0.5 * &widths);
        let center_y = &boxes.column(1) + &(0.5 * &heights);

        let (wx, wy, ww, wh) = self.weights;

        let dx = &rel_codes.slice(s![.., 0]) / wx;
        let dy = &rel_codes.slice(s![.., 1]) / wy;

        let dw = rel_codes
            .slice(s![.., 2])
            .mapv(|x| self.clamp_log_scale(x / ww));
        let dh = rel_codes
            .slice(s![.., 3])
            .mapv(|x| self.clamp_log_scale(x / wh));

        let pred_center_x = &dx * &widths + center_x;
        let pred_center_y = &dy * &heights + center_y;

        let pred_w = dw.mapv(f32::exp) * &widths;
        let pred_h = dh.mapv(f32::exp) * &heights;

        let center_to_center_width = pred_w / 2.0;
        let center_to_center_height = pred_h / 2.0;

        let mut decoded = Array2::zeros((boxes.nrows(), 4));
        decoded
            .column_mut(0)
            .assign(&(&pred_center_x - &center_to_center_width));
        decoded
            .column_mut(1)
            .assign(&(&pred_center_y - &center_to_center_height));
        decoded
            .column_mut(2)
            .assign(&(&pred_center_x + &center_to_center_width));
        decoded
            .column_mut(3)
            .assign(&(&pred_center_y + &center_to_center_height));

        decoded
    }

    /// Cap a log scale delta so `exp` cannot overflow.
    ///
    /// `NaN` stays `NaN`, the decoded box is then rejected as non-finite.
    fn clamp_log_scale(&self, value: f32) -> f32 {
        if value > self.bbox_xform_clip {
            self.bbox_xform_clip
        } else {
            value
        }
    }

    /// Encode every target row against its reference row, see [`BoxCoder::encode`].
    ///
    /// # Panics
    ///
    /// Panics if the two arrays differ in their number of rows.
    #[must_use]
    pub fn encode_single(
        &self,
        references: ArrayView2<f32>,
        targets: ArrayView2<f32>,
    ) -> Array2<f32> {
        assert_eq!(
            references.dim().0,
            targets.dim().0,
            "every reference box needs exactly one target box"
        );

        let mut deltas = Array2::zeros((references.dim().0, 4));
        Zip::from(deltas.rows_mut())
            .and(references.rows())
            .and(targets.rows())
            .for_each(|mut delta, reference, target| {
                let reference = Bbox::xyxy(reference[0], reference[1], reference[2], reference[3]);
                let target = Bbox::xyxy(target[0], target[1], target[2], target[3]);
                delta.assign(&ndarray::aview1(&self.encode(&reference, &target).to_array()));
            });

        deltas
    }
}

/// Clip a box to the image bounds, see [`Bbox::clamp`].
#[must_use]
pub fn clip(bbox: &Bbox<Xyxy>, image_width: f32, image_height: f32) -> Bbox<Xyxy> {
    bbox.clamp(image_width, image_height)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn assert_close(a: Bbox<Xyxy>, b: Bbox<Xyxy>) {
        let a: [f32; 4] = a.into();
        let b: [f32; 4] = b.into();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-3 * (1.0 + y.abs()), "{a:?} != {b:?}");
        }
    }

    #[test]
    fn round_trip() {
        let references = [
            Bbox::xyxy(0.0, 0.0, 10.0, 10.0),
            Bbox::xyxy(-56.0, -56.0, 72.0, 72.0),
            Bbox::xyxy(100.0, 40.0, 164.0, 300.0),
        ];
        let targets = [
            Bbox::xyxy(2.0, 3.0, 12.0, 30.0),
            Bbox::xyxy(0.0, 0.0, 32.0, 32.0),
            Bbox::xyxy(90.5, 60.25, 400.0, 320.0),
        ];

        for coder in [
            BoxCoder::rpn(),
            BoxCoder::detector(),
            BoxCoder::new((1.0, 1.0, 1.0, 1.0)),
        ] {
            for reference in &references {
                for target in &targets {
                    let delta = coder.encode(reference, target);
                    assert_close(coder.decode(reference, delta), *target);
                }
            }
        }
    }

    #[test]
    fn identical_boxes_encode_to_zero() {
        let bbox = Bbox::xyxy(4.0, 8.0, 20.0, 40.0);
        assert_eq!(BoxCoder::rpn().encode(&bbox, &bbox), Delta::default());
    }

    #[test]
    fn weights_scale_deltas() {
        let reference = Bbox::xyxy(0.0, 0.0, 10.0, 20.0);
        let target = Bbox::xyxy(5.0, 0.0, 15.0, 20.0);

        let plain = BoxCoder::new((1.0, 1.0, 1.0, 1.0)).encode(&reference, &target);
        let detector = BoxCoder::detector().encode(&reference, &target);

        assert_eq!(plain, Delta::new(0.5, 0.0, 0.0, 0.0));
        assert_eq!(detector, Delta::new(4.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn degenerate_reference_encodes_to_zero() {
        let reference = Bbox::xyxy(5.0, 5.0, 5.0, 15.0);
        let target = Bbox::xyxy(0.0, 0.0, 10.0, 10.0);

        assert_eq!(BoxCoder::rpn().encode(&reference, &target), Delta::default());
    }

    #[test]
    fn decode_clamps_exponent() {
        let coder = BoxCoder::new((1.0, 1.0, 1.0, 1.0));
        let reference = Bbox::xyxy(0.0, 0.0, 1.0, 1.0);

        let decoded = coder.decode(&reference, Delta::new(0.0, 0.0, 100.0, 100.0));
        assert!(decoded.is_finite());
        assert!((decoded.width() - 1000.0 / 16.0).abs() < 1e-2);
    }

    #[test]
    fn array_decode_matches_scalar_decode() {
        let coder = BoxCoder::rpn();
        let boxes = array![[0.0, 0.0, 10.0, 10.0], [20.0, 10.0, 60.0, 30.0]];
        let codes = array![[0.4, -0.8, 0.2, 1.0], [0.0, 0.0, -2.0, 0.5]];

        let decoded = coder.decode_single(codes.view(), boxes.view());

        for i in 0..2 {
            let expected = coder.decode(
                &Bbox::from_row(boxes.row(i).as_slice().unwrap()),
                Delta::from_row(codes.row(i).as_slice().unwrap()),
            );
            assert_close(Bbox::from_row(decoded.row(i).as_slice().unwrap()), expected);
        }
        assert!(decoded.is_standard_layout());
    }

    #[test]
    fn nan_scale_decodes_to_non_finite_box() {
        let coder = BoxCoder::rpn();
        let reference = Bbox::xyxy(0.0, 0.0, 16.0, 16.0);

        assert!(!coder.decode(&reference, Delta::new(0.0, 0.0, f32::NAN, 0.0)).is_finite());
        assert!(!coder.decode(&reference, Delta::new(0.0, 0.0, 0.0, f32::NAN)).is_finite());

        let decoded = coder.decode_single(
            array![[0.0, 0.0, f32::NAN, 0.0]].view(),
            array![[0.0, 0.0, 16.0, 16.0]].view(),
        );
        assert!(decoded.iter().any(|value| value.is_nan()));
    }

    #[test]
    fn array_encode_matches_scalar_encode() {
        let coder = BoxCoder::detector();
        let references = array![[0.0, 0.0, 10.0, 10.0], [20.0, 10.0, 60.0, 30.0]];
        let targets = array![[1.0, 2.0, 11.0, 9.0], [25.0, 5.0, 50.0, 35.0]];

        let encoded = coder.encode_single(references.view(), targets.view());

        for i in 0..2 {
            let expected = coder.encode(
                &Bbox::from_row(references.row(i).as_slice().unwrap()),
                &Bbox::from_row(targets.row(i).as_slice().unwrap()),
            );
            assert_eq!(Delta::from_row(encoded.row(i).as_slice().unwrap()), expected);
        }
    }

    #[test]
    fn clip_to_image() {
        let reference = Bbox::xyxy(80.0, 40.0, 120.0, 60.0);
        let decoded = BoxCoder::rpn().decode(&reference, Delta::new(0.0, 0.0, 4.0, 0.0));
        let clipped = clip(&decoded, 100.0, 50.0);

        assert_eq!(clipped.inner.2, 100.0);
        assert!(clipped.inner.0 >= 0.0 && clipped.inner.0 <= clipped.inner.2);
        assert!(clipped.inner.1 <= clipped.inner.3 && clipped.inner.3 <= 50.0);
    }
}

//! Final detection decode: classifier outputs on top of the proposals.

use ndarray::{ArrayView2, s};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bbox::{Bbox, Xyxy},
    box_coder::{BoxCoder, Delta},
    error::{Error, Result},
    geometry::ImageSize,
    nms::batched_non_max_suppression,
    proposal::Proposal,
    util::argmax,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    /// Number of classes including the background, which is the last class.
    pub num_classes: usize,
    /// Minimum class probability of a detection.
    pub confidence_threshold: f32,
    /// IoU at or above which a lower scoring detection of the same class is suppressed.
    pub nms_threshold: f32,
    pub max_detections_per_class: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            num_classes: 21,
            confidence_threshold: 0.5,
            nms_threshold: 0.3,
            max_detections_per_class: 300,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(Error::InvalidConfig(format!(
                "the detector needs a background and at least one object class, got {} classes",
                self.num_classes
            )));
        }

        let in_unit_range = |value: f32| (0.0..=1.0).contains(&value);
        if !(in_unit_range(self.confidence_threshold) && in_unit_range(self.nms_threshold)) {
            return Err(Error::InvalidConfig(format!(
                "detector thresholds must be within [0, 1], got {} and {}",
                self.confidence_threshold, self.nms_threshold
            )));
        }

        Ok(())
    }
}

/// A detected object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: Bbox<Xyxy>,
    pub class_id: usize,
    pub score: f32,
}

/// Turns per-proposal class probabilities and class specific deltas into detections.
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
    coder: BoxCoder,
    config: DetectorConfig,
}

impl DetectionDecoder {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            coder: BoxCoder::detector(),
            config,
        })
    }

    /// Replace the default detector [`BoxCoder`].
    #[must_use]
    pub fn with_box_coder(mut self, coder: BoxCoder) -> Self {
        self.coder = coder;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Decode the detections of a single image.
    ///
    /// `scores` holds `[num_proposals, num_classes]` class probabilities, `deltas` holds four
    /// columns per class, for either all classes or the object classes only. Every proposal
    /// takes its most likely object class, the background score is not considered. Proposals
    /// whose best object class is less likely than the confidence threshold are dropped. The rest
    /// are refined with the delta of their class, clipped to the `input` image and suppressed
    /// per class.
    ///
    /// The detections are returned in the pixel frame of the `original` image, by descending
    /// score.
    pub fn decode(
        &self,
        proposals: &[Proposal],
        scores: ArrayView2<f32>,
        deltas: ArrayView2<f32>,
        input: ImageSize,
        original: ImageSize,
    ) -> Result<Vec<Detection>> {
        let num_proposals = proposals.len();
        let num_classes = self.config.num_classes;
        let background = num_classes - 1;

        if scores.dim() != (num_proposals, num_classes) {
            return Err(Error::shape(
                "detector scores",
                format!("[{num_proposals}, {num_classes}]"),
                scores.dim(),
            ));
        }

        if deltas.nrows() != num_proposals
            || (deltas.ncols() != 4 * num_classes && deltas.ncols() != 4 * background)
        {
            return Err(Error::shape(
                "detector deltas",
                format!(
                    "[{num_proposals}, {}] or [{num_proposals}, {}]",
                    4 * num_classes,
                    4 * background
                ),
                deltas.dim(),
            ));
        }

        let (width, height) = (input.width as f32, input.height as f32);

        let candidates = proposals
            .iter()
            .zip(scores.rows())
            .zip(deltas.rows())
            .filter_map(|((proposal, scores), deltas)| {
                let objects = scores.slice(s![..background]).to_vec();
                let class_id = argmax(&objects);
                let score = objects[class_id];

                if score.is_nan() || score < self.config.confidence_threshold {
                    return None;
                }

                let delta = Delta::new(
                    deltas[4 * class_id],
                    deltas[4 * class_id + 1],
                    deltas[4 * class_id + 2],
                    deltas[4 * class_id + 3],
                );
                let bbox = self.coder.decode(&proposal.bbox, delta);
                if !bbox.is_finite() {
                    return None;
                }

                let bbox = bbox.clamp(width, height);
                (!bbox.is_degenerate()).then_some((bbox, score, class_id))
            })
            .collect::<Vec<_>>();

        let (scale_x, scale_y) = input.scale_to(original);
        let detections = batched_non_max_suppression(
            &candidates,
            self.config.nms_threshold,
            self.config.max_detections_per_class,
        )
        .into_iter()
        .map(|index| {
            let (bbox, score, class_id) = candidates[index];
            Detection {
                bbox: bbox.scaled(scale_x, scale_y),
                class_id,
                score,
            }
        })
        .collect::<Vec<_>>();

        debug!(
            proposals = num_proposals,
            candidates = candidates.len(),
            detections = detections.len(),
            "decoded detections"
        );

        Ok(detections)
    }
}

//! Decoding of region proposal network outputs into scored proposals.

use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    anchor::Anchors,
    bbox::{Bbox, Xyxy},
    box_coder::BoxCoder,
    error::{Error, Result},
    geometry::ImageSize,
    nms::top_k_non_max_suppression,
    util::softmax,
};

/// Proposal decoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpnConfig {
    /// Number of highest scoring boxes that enter suppression.
    pub pre_nms_top_k: usize,
    /// Maximum number of proposals kept after suppression.
    pub post_nms_top_n: usize,
    /// IoU at or above which a lower scoring box is suppressed.
    pub nms_threshold: f32,
    /// Minimum width and height of a proposal, in pixels.
    pub min_size: f32,
}

impl Default for RpnConfig {
    fn default() -> Self {
        Self {
            pre_nms_top_k: 12000,
            post_nms_top_n: 300,
            nms_threshold: 0.7,
            min_size: 1e-3,
        }
    }
}

impl RpnConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(Error::InvalidConfig(format!(
                "rpn nms threshold must be within [0, 1], got {}",
                self.nms_threshold
            )));
        }

        if !(self.min_size.is_finite() && self.min_size >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "rpn min size must be a non-negative number, got {}",
                self.min_size
            )));
        }

        if self.pre_nms_top_k == 0 || self.post_nms_top_n == 0 {
            return Err(Error::InvalidConfig(
                "rpn proposal counts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A candidate region, in network input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    pub bbox: Bbox<Xyxy>,
    pub score: f32,
}

/// Raw region proposal network outputs for a single image.
#[derive(Debug, Clone)]
pub struct RpnOutput {
    /// `[num_anchors, 1]` foreground probabilities or `[num_anchors, 2]` background/foreground
    /// logits.
    pub scores: Array2<f32>,
    /// `[num_anchors, 4]` deltas.
    pub deltas: Array2<f32>,
}

/// Turns per-anchor objectness and deltas into a suppressed set of proposals.
#[derive(Debug, Clone)]
pub struct ProposalDecoder {
    coder: BoxCoder,
    config: RpnConfig,
}

impl ProposalDecoder {
    pub fn new(config: RpnConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            coder: BoxCoder::rpn(),
            config,
        })
    }

    /// Replace the default region proposal [`BoxCoder`].
    #[must_use]
    pub fn with_box_coder(mut self, coder: BoxCoder) -> Self {
        self.coder = coder;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RpnConfig {
        &self.config
    }

    /// Decode the proposals of a single image.
    ///
    /// Every anchor is moved by its delta and clipped to the image. Boxes with a non-finite
    /// score or coordinate, and boxes smaller than the minimum size, are dropped. The remaining
    /// boxes are ranked by score, the best `pre_nms_top_k` are suppressed and at most
    /// `post_nms_top_n` survive.
    ///
    /// The result is sorted by descending score and may hold fewer than `post_nms_top_n`
    /// proposals, or none at all. Padding to a fixed count is up to the caller.
    pub fn decode(
        &self,
        anchors: &Anchors,
        scores: ArrayView2<f32>,
        deltas: ArrayView2<f32>,
        image: ImageSize,
    ) -> Result<Vec<Proposal>> {
        let num_anchors = anchors.len();

        if scores.nrows() != num_anchors || !(1..=2).contains(&scores.ncols()) {
            return Err(Error::shape(
                "rpn scores",
                format!("[{num_anchors}, 1] or [{num_anchors}, 2]"),
                scores.dim(),
            ));
        }

        if deltas.dim() != (num_anchors, 4) {
            return Err(Error::shape(
                "rpn deltas",
                format!("[{num_anchors}, 4]"),
                deltas.dim(),
            ));
        }

        let objectness = foreground_scores(scores);
        let decoded = self.coder.decode_single(deltas, anchors.to_array().view());
        let (width, height) = (image.width as f32, image.height as f32);

        let candidates = decoded
            .rows()
            .into_iter()
            .zip(objectness)
            .filter_map(|(row, score)| {
                let bbox = Bbox::xyxy(row[0], row[1], row[2], row[3]);
                if !(score.is_finite() && bbox.is_finite()) {
                    return None;
                }

                let bbox = bbox.clamp(width, height);
                bbox.has_min_size(self.config.min_size).then_some((bbox, score))
            })
            .collect::<Vec<_>>();
        let num_candidates = candidates.len();

        // stable, so equal scores stay in anchor order
        let ranked = candidates
            .into_iter()
            .sorted_by(|(_, a), (_, b)| b.total_cmp(a))
            .take(self.config.pre_nms_top_k)
            .collect::<Vec<_>>();

        let proposals = top_k_non_max_suppression(
            &ranked,
            self.config.nms_threshold,
            self.config.post_nms_top_n,
        )
        .into_iter()
        .map(|index| {
            let (bbox, score) = ranked[index];
            Proposal { bbox, score }
        })
        .collect::<Vec<_>>();

        debug!(
            anchors = num_anchors,
            candidates = num_candidates,
            proposals = proposals.len(),
            "decoded proposals"
        );

        Ok(proposals)
    }

    /// Decode every image of a batch in parallel, all images sharing the same anchors.
    pub fn decode_batch(
        &self,
        anchors: &Anchors,
        batch: &[RpnOutput],
        image: ImageSize,
    ) -> Result<Vec<Vec<Proposal>>> {
        batch
            .par_iter()
            .map(|output| self.decode(anchors, output.scores.view(), output.deltas.view(), image))
            .collect()
    }
}

/// Foreground probability per row of an objectness tensor.
fn foreground_scores(scores: ArrayView2<f32>) -> Vec<f32> {
    if scores.ncols() == 1 {
        return scores.column(0).to_vec();
    }

    scores
        .rows()
        .into_iter()
        .map(|row| softmax(&[row[0], row[1]])[1])
        .collect()
}

//! IoU based matching of reference boxes (anchors or proposals) against ground truth boxes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    bbox::{Bbox, Xyxy},
    error::{Error, Result},
};

/// Compute the `[references, ground_truth]` matrix of pairwise IoU values.
#[must_use]
pub fn iou_matrix(references: &[Bbox<Xyxy>], ground_truth: &[Bbox<Xyxy>]) -> Array2<f32> {
    Array2::from_shape_fn((references.len(), ground_truth.len()), |(i, j)| {
        references[i].iou(&ground_truth[j])
    })
}

/// Outcome of matching a single reference box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    Positive,
    Negative,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub label: MatchLabel,
    /// The assigned ground truth box for positives, the best overlapping one otherwise.
    ///
    /// `None` only when there is no ground truth at all.
    pub gt_index: Option<usize>,
    /// IoU between the reference and [`Match::gt_index`].
    pub iou: f32,
    /// Whether the reference was made positive by the best match of a ground truth box, rather
    /// than by its own overlap.
    pub forced: bool,
}

impl Match {
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.label == MatchLabel::Positive
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.label == MatchLabel::Negative
    }

    const fn background() -> Self {
        Self {
            label: MatchLabel::Negative,
            gt_index: None,
            iou: 0.0,
            forced: false,
        }
    }
}

/// Labels reference boxes by their best overlap with the ground truth.
///
/// - best IoU at or above `positive_iou`: positive, assigned to that ground truth box
/// - best IoU below `negative_iou`: negative, unless it is also below `negative_floor`
/// - anything else: ignored
///
/// With `allow_low_quality_matches`, every ground truth box additionally claims its highest
/// overlapping reference as a positive, whatever the IoU. Ties go to the lowest reference index.
/// A reference that was already claimed by an earlier ground truth box is skipped in favour of
/// the next best one, so that as long as there are at least as many references as ground truth
/// boxes, every ground truth box ends up with a positive. Once every reference is claimed, the
/// remaining ground truth boxes get no forced match and earlier claims are kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matcher {
    positive_iou: f32,
    negative_iou: f32,
    negative_floor: f32,
    allow_low_quality_matches: bool,
}

impl Matcher {
    pub fn new(
        positive_iou: f32,
        negative_iou: f32,
        negative_floor: f32,
        allow_low_quality_matches: bool,
    ) -> Result<Self> {
        let in_unit_range = |value: f32| (0.0..=1.0).contains(&value);

        if ![positive_iou, negative_iou, negative_floor].into_iter().all(in_unit_range) {
            return Err(Error::InvalidConfig(format!(
                "matcher thresholds must be within [0, 1], \
                 got {positive_iou}, {negative_iou} and {negative_floor}"
            )));
        }

        if negative_iou > positive_iou || negative_floor > negative_iou {
            return Err(Error::InvalidConfig(format!(
                "matcher thresholds must satisfy floor <= negative <= positive, \
                 got {negative_floor}, {negative_iou} and {positive_iou}"
            )));
        }

        Ok(Self {
            positive_iou,
            negative_iou,
            negative_floor,
            allow_low_quality_matches,
        })
    }

    /// Match every reference box, the result is in reference order.
    ///
    /// Without ground truth, every reference is negative.
    #[must_use]
    pub fn match_boxes(
        &self,
        references: &[Bbox<Xyxy>],
        ground_truth: &[Bbox<Xyxy>],
    ) -> Vec<Match> {
        if ground_truth.is_empty() {
            return vec![Match::background(); references.len()];
        }

        let ious = iou_matrix(references, ground_truth);

        let mut matches = ious
            .rows()
            .into_iter()
            .map(|row| {
                let (gt_index, iou) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, row[0]), |best, (j, iou)| {
                        if iou > best.1 { (j, iou) } else { best }
                    });

                let label = if iou >= self.positive_iou {
                    MatchLabel::Positive
                } else if iou < self.negative_iou && iou >= self.negative_floor {
                    MatchLabel::Negative
                } else {
                    MatchLabel::Ignored
                };

                Match {
                    label,
                    gt_index: Some(gt_index),
                    iou,
                    forced: false,
                }
            })
            .collect::<Vec<_>>();

        if self.allow_low_quality_matches && !references.is_empty() {
            let mut claimed = vec![false; references.len()];

            for (gt_index, column) in ious.columns().into_iter().enumerate() {
                // highest IoU first, lowest index first among equals
                let mut candidates = (0..references.len()).collect::<Vec<_>>();
                candidates.sort_by(|&a, &b| column[b].total_cmp(&column[a]));

                let unclaimed = candidates.into_iter().find(|&index| !claimed[index]);
                let Some(reference) = unclaimed else {
                    trace!(gt_index, "no unclaimed reference left for a forced match");
                    continue;
                };
                claimed[reference] = true;

                trace!(gt_index, reference, iou = column[reference], "forced match");

                matches[reference] = Match {
                    label: MatchLabel::Positive,
                    gt_index: Some(gt_index),
                    iou: column[reference],
                    forced: true,
                };
            }
        }

        matches
    }
}

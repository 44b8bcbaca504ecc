//! Reduction of per-image loss values.

use std::{iter::Sum, ops::Add};

use serde::{Deserialize, Serialize};

/// The four loss components of a two-stage detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub rpn_classification: f32,
    pub rpn_regression: f32,
    pub detector_classification: f32,
    pub detector_regression: f32,
}

impl LossBreakdown {
    #[must_use]
    pub fn total(&self) -> f32 {
        self.rpn_classification
            + self.rpn_regression
            + self.detector_classification
            + self.detector_regression
    }

    /// Component-wise mean, or `None` for an empty iterator.
    pub fn mean(losses: impl IntoIterator<Item = LossBreakdown>) -> Option<LossBreakdown> {
        let (sum, count) = losses
            .into_iter()
            .fold((LossBreakdown::default(), 0_usize), |(sum, count), loss| {
                (sum + loss, count + 1)
            });

        (count > 0).then(|| sum.scaled(1.0 / count as f32))
    }

    fn scaled(self, factor: f32) -> LossBreakdown {
        LossBreakdown {
            rpn_classification: self.rpn_classification * factor,
            rpn_regression: self.rpn_regression * factor,
            detector_classification: self.detector_classification * factor,
            detector_regression: self.detector_regression * factor,
        }
    }
}

impl Add for LossBreakdown {
    type Output = LossBreakdown;

    fn add(self, rhs: LossBreakdown) -> LossBreakdown {
        LossBreakdown {
            rpn_classification: self.rpn_classification + rhs.rpn_classification,
            rpn_regression: self.rpn_regression + rhs.rpn_regression,
            detector_classification: self.detector_classification + rhs.detector_classification,
            detector_regression: self.detector_regression + rhs.detector_regression,
        }
    }
}

impl Sum for LossBreakdown {
    fn sum<I: Iterator<Item = LossBreakdown>>(iter: I) -> LossBreakdown {
        iter.fold(LossBreakdown::default(), Add::add)
    }
}

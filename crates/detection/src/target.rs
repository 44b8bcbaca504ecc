//! Training targets for both stages: labels, sampled sets and regression deltas.

use ndarray::{Array1, Array2, s};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bbox::{Bbox, Xyxy},
    box_coder::{BoxCoder, Delta},
    error::{Error, Result},
    matcher::{Match, MatchLabel, Matcher},
    sampler::{BalancedSampler, Sample, SamplingConfig},
};

/// A labelled ground truth box, in network input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruth {
    pub bbox: Bbox<Xyxy>,
    pub class_id: usize,
}

impl GroundTruth {
    #[must_use]
    pub fn new(bbox: Bbox<Xyxy>, class_id: usize) -> Self {
        Self { bbox, class_id }
    }
}

/// Target of a single reference box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Positive {
        class_id: usize,
        gt_index: usize,
        delta: Delta,
    },
    Negative,
    Ignored,
}

impl Target {
    #[must_use]
    pub fn is_positive(&self) -> bool {
        matches!(self, Target::Positive { .. })
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        matches!(self, Target::Negative)
    }
}

/// Region proposal loss inputs, see [`TrainingTargets::rpn_arrays`].
#[derive(Debug, Clone, PartialEq)]
pub struct RpnArrays {
    /// `[n]` with 1 for sampled positives, 0 for sampled negatives and -1 for everything else.
    pub labels: Array1<f32>,
    /// `[n, 4]` deltas, zero for every reference that is not positive.
    pub deltas: Array2<f32>,
}

/// Detector loss inputs over the sampled regions, see [`TrainingTargets::detector_arrays`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorArrays {
    /// Reference index of every sampled region, positives first.
    pub regions: Vec<usize>,
    /// `[s, num_classes]` one-hot classes, background is the last class.
    pub classes: Array2<f32>,
    /// `[s, 4 * (num_classes - 1)]`, 1 on the four columns of the region's class.
    pub regression_mask: Array2<f32>,
    /// `[s, 4 * (num_classes - 1)]` deltas on the columns of the region's class.
    pub regression: Array2<f32>,
}

/// Targets for every reference box of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTargets {
    /// One target per reference box, in reference order.
    pub targets: Vec<Target>,
    /// The references that contribute to the loss.
    pub sampled: Sample,
}

impl TrainingTargets {
    #[must_use]
    pub fn num_positives(&self) -> usize {
        self.targets.iter().filter(|target| target.is_positive()).count()
    }

    #[must_use]
    pub fn num_negatives(&self) -> usize {
        self.targets.iter().filter(|target| target.is_negative()).count()
    }

    /// Labels and deltas for every reference, in anchor order.
    #[must_use]
    pub fn rpn_arrays(&self) -> RpnArrays {
        let n = self.targets.len();
        let mut labels = Array1::from_elem(n, -1.0);
        let mut deltas = Array2::zeros((n, 4));

        for &index in &self.sampled.positives {
            labels[index] = 1.0;
        }
        for &index in &self.sampled.negatives {
            labels[index] = 0.0;
        }

        for (index, target) in self.targets.iter().enumerate() {
            if let Target::Positive { delta, .. } = target {
                deltas.row_mut(index).assign(&ndarray::aview1(&delta.to_array()));
            }
        }

        RpnArrays { labels, deltas }
    }

    /// One-hot classes and class specific regression targets for the sampled regions.
    ///
    /// `num_classes` includes the background class, which is the last one.
    pub fn detector_arrays(&self, num_classes: usize) -> Result<DetectorArrays> {
        if num_classes < 2 {
            return Err(Error::InvalidConfig(format!(
                "the detector needs a background and at least one object class, \
                 got {num_classes} classes"
            )));
        }

        let background = num_classes - 1;
        let regions = self.sampled.iter().collect::<Vec<_>>();

        let mut classes = Array2::zeros((regions.len(), num_classes));
        let mut regression_mask = Array2::zeros((regions.len(), 4 * background));
        let mut regression = Array2::zeros((regions.len(), 4 * background));

        for (row, &index) in regions.iter().enumerate() {
            match self.targets[index] {
                Target::Positive {
                    class_id, delta, ..
                } => {
                    if class_id >= background {
                        return Err(Error::ClassOutOfRange {
                            class_id,
                            num_classes,
                        });
                    }

                    let columns = s![row, 4 * class_id..4 * class_id + 4];
                    classes[[row, class_id]] = 1.0;
                    regression_mask.slice_mut(columns).fill(1.0);
                    regression
                        .slice_mut(columns)
                        .assign(&ndarray::aview1(&delta.to_array()));
                }
                Target::Negative | Target::Ignored => classes[[row, background]] = 1.0,
            }
        }

        Ok(DetectorArrays {
            regions,
            classes,
            regression_mask,
            regression,
        })
    }
}

/// Matching and sampling parameters of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignerConfig {
    pub positive_iou: f32,
    pub negative_iou: f32,
    /// References whose best IoU is below this are ignored instead of negative.
    pub negative_floor: f32,
    /// Let every ground truth box claim its best overlapping reference.
    pub allow_low_quality_matches: bool,
    pub sampling: SamplingConfig,
}

impl AssignerConfig {
    /// Region proposal stage: anchors against ground truth.
    #[must_use]
    pub fn rpn() -> Self {
        Self {
            positive_iou: 0.7,
            negative_iou: 0.3,
            negative_floor: 0.0,
            allow_low_quality_matches: true,
            sampling: SamplingConfig::default(),
        }
    }

    /// Detector stage: proposals against ground truth.
    #[must_use]
    pub fn detector() -> Self {
        Self {
            positive_iou: 0.5,
            negative_iou: 0.5,
            negative_floor: 0.1,
            allow_low_quality_matches: false,
            sampling: SamplingConfig {
                batch_size_per_image: 128,
                positive_fraction: 0.5,
                fill_with_replacement: true,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.matcher()?;
        self.sampling.validate()
    }

    fn matcher(&self) -> Result<Matcher> {
        Matcher::new(
            self.positive_iou,
            self.negative_iou,
            self.negative_floor,
            self.allow_low_quality_matches,
        )
    }
}

/// Matches references against ground truth, samples them and encodes regression targets.
#[derive(Debug, Clone)]
pub struct TargetAssigner {
    matcher: Matcher,
    sampler: BalancedSampler,
    coder: BoxCoder,
}

impl TargetAssigner {
    pub fn new(config: &AssignerConfig, coder: BoxCoder) -> Result<Self> {
        Ok(Self {
            matcher: config.matcher()?,
            sampler: BalancedSampler::new(config.sampling.clone())?,
            coder,
        })
    }

    /// Default region proposal stage assigner.
    pub fn rpn() -> Result<Self> {
        Self::new(&AssignerConfig::rpn(), BoxCoder::rpn())
    }

    /// Default detector stage assigner.
    pub fn detector() -> Result<Self> {
        Self::new(&AssignerConfig::detector(), BoxCoder::detector())
    }

    /// Assign targets to the references of a single image.
    ///
    /// Without ground truth every reference is negative. The random source only drives the
    /// sampling, the targets themselves are deterministic.
    pub fn assign<R: Rng + ?Sized>(
        &self,
        references: &[Bbox<Xyxy>],
        ground_truth: &[GroundTruth],
        rng: &mut R,
    ) -> TrainingTargets {
        let gt_boxes = ground_truth.iter().map(|gt| gt.bbox).collect::<Vec<_>>();
        let matches = self.matcher.match_boxes(references, &gt_boxes);

        let targets = references
            .iter()
            .zip(&matches)
            .map(|(reference, m)| self.target(reference, m, ground_truth))
            .collect::<Vec<_>>();
        let sampled = self.sampler.sample(&matches, rng);

        let targets = TrainingTargets { targets, sampled };

        debug!(
            references = references.len(),
            ground_truth = ground_truth.len(),
            positives = targets.num_positives(),
            negatives = targets.num_negatives(),
            sampled = targets.sampled.len(),
            "assigned targets"
        );

        targets
    }

    fn target(&self, reference: &Bbox<Xyxy>, m: &Match, ground_truth: &[GroundTruth]) -> Target {
        match (m.label, m.gt_index) {
            (MatchLabel::Positive, Some(gt_index)) => {
                let gt = &ground_truth[gt_index];
                Target::Positive {
                    class_id: gt.class_id,
                    gt_index,
                    delta: self.coder.encode(reference, &gt.bbox),
                }
            }
            (MatchLabel::Negative, _) => Target::Negative,
            _ => Target::Ignored,
        }
    }

    /// Assign targets for every image of a batch in parallel.
    ///
    /// Image `i` samples with a [`StdRng`] seeded from `seed + i`, so the result does not
    /// depend on how the work is scheduled.
    pub fn assign_batch<B>(
        &self,
        references: &[B],
        ground_truth: &[Vec<GroundTruth>],
        seed: u64,
    ) -> Result<Vec<TrainingTargets>>
    where
        B: AsRef<[Bbox<Xyxy>]> + Sync,
    {
        if references.len() != ground_truth.len() {
            return Err(Error::shape(
                "ground truth batch",
                format!("one entry per image ({})", references.len()),
                (ground_truth.len(), 1),
            ));
        }

        Ok(references
            .par_iter()
            .zip(ground_truth.par_iter())
            .enumerate()
            .map(|(index, (references, ground_truth))| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
                self.assign(references.as_ref(), ground_truth, &mut rng)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn references() -> Vec<Bbox<Xyxy>> {
        vec![
            Bbox::xyxy(0.0, 0.0, 10.0, 10.0),
            Bbox::xyxy(10.0, 0.0, 20.0, 10.0),
            Bbox::xyxy(0.0, 10.0, 10.0, 20.0),
            Bbox::xyxy(10.0, 10.0, 20.0, 20.0),
            Bbox::xyxy(0.5, 0.5, 10.5, 10.5),
        ]
    }

    #[test]
    fn positive_targets_carry_class_and_delta() {
        let assigner = TargetAssigner::rpn().unwrap();
        let gt = GroundTruth::new(Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 3);

        let targets = assigner.assign(&references(), &[gt], &mut StdRng::seed_from_u64(0));

        assert_eq!(
            targets.targets[0],
            Target::Positive {
                class_id: 3,
                gt_index: 0,
                delta: Delta::default(),
            }
        );
        assert!(targets.targets[4].is_positive());
        assert!(targets.targets[1].is_negative());
        assert_eq!(targets.num_positives(), 2);
        assert_eq!(targets.num_negatives(), 3);
    }

    #[test]
    fn empty_ground_truth_is_all_negative() {
        let assigner = TargetAssigner::rpn().unwrap();

        let targets = assigner.assign(&references(), &[], &mut StdRng::seed_from_u64(0));

        assert!(targets.targets.iter().all(Target::is_negative));
        assert!(targets.sampled.positives.is_empty());
        assert_eq!(targets.sampled.negatives, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rpn_arrays_follow_the_sample() {
        let assigner = TargetAssigner::rpn().unwrap();
        let gt = GroundTruth::new(Bbox::xyxy(0.0, 0.0, 10.0, 12.0), 0);

        let mut targets = assigner.assign(&references(), &[gt], &mut StdRng::seed_from_u64(0));
        // drop one negative from the loss
        targets.sampled.negatives.retain(|&index| index != 3);

        let arrays = targets.rpn_arrays();

        assert_eq!(arrays.labels.to_vec(), vec![1.0, 0.0, 0.0, -1.0, 1.0]);
        assert_eq!(arrays.deltas.dim(), (5, 4));
        assert!(arrays.deltas.row(0).iter().any(|&value| value != 0.0));
        assert!(arrays.deltas.row(1).iter().all(|&value| value == 0.0));
    }

    #[test]
    fn detector_arrays_use_last_class_as_background() {
        let assigner = TargetAssigner::detector().unwrap();
        let gt = GroundTruth::new(Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 1);
        let references = [
            Bbox::xyxy(0.0, 0.0, 10.0, 10.0),
            Bbox::xyxy(5.0, 0.0, 15.0, 10.0),
        ];

        let targets = assigner.assign(&references, &[gt], &mut StdRng::seed_from_u64(0));
        let arrays = targets.detector_arrays(3).unwrap();

        // one positive, the single negative is repeated to fill the batch
        assert_eq!(arrays.regions.len(), 128);
        assert_eq!(arrays.regions[0], 0);
        assert!(arrays.regions[1..].iter().all(|&index| index == 1));

        assert_eq!(arrays.classes.dim(), (128, 3));
        assert_eq!(arrays.classes.row(0).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(arrays.classes.row(1).to_vec(), vec![0.0, 0.0, 1.0]);

        assert_eq!(arrays.regression_mask.dim(), (128, 8));
        assert_eq!(
            arrays.regression_mask.row(0).to_vec(),
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]
        );
        assert!(arrays.regression_mask.row(1).iter().all(|&value| value == 0.0));
        assert!(arrays.regression.iter().all(|&value| value == 0.0));
    }

    #[test]
    fn detector_arrays_reject_background_ground_truth() {
        let assigner = TargetAssigner::detector().unwrap();
        let gt = GroundTruth::new(Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 2);

        let targets = assigner.assign(&references(), &[gt], &mut StdRng::seed_from_u64(0));

        assert!(matches!(
            targets.detector_arrays(3),
            Err(Error::ClassOutOfRange {
                class_id: 2,
                num_classes: 3
            })
        ));
        assert!(matches!(
            targets.detector_arrays(1),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn batch_is_independent_of_scheduling() {
        let assigner = TargetAssigner::rpn().unwrap();
        let references = references();
        let ground_truth = vec![
            vec![GroundTruth::new(Bbox::xyxy(0.0, 0.0, 10.0, 10.0), 0)],
            vec![],
            vec![GroundTruth::new(Bbox::xyxy(12.0, 12.0, 15.0, 15.0), 1)],
        ];
        let batch = vec![references.as_slice(); 3];

        let targets = assigner.assign_batch(&batch, &ground_truth, 10).unwrap();

        assert_eq!(targets.len(), 3);
        for (index, (targets, ground_truth)) in targets.iter().zip(&ground_truth).enumerate() {
            let mut rng = StdRng::seed_from_u64(10 + index as u64);
            assert_eq!(targets, &assigner.assign(&references, ground_truth, &mut rng));
        }

        assert!(matches!(
            assigner.assign_batch(&batch, &ground_truth[..2], 0),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}

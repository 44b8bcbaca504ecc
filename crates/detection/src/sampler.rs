//! Balanced sampling of positive and negative matches.

use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::{Error, Result},
    matcher::Match,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Total number of sampled references per image.
    pub batch_size_per_image: usize,
    /// Share of the batch reserved for positives.
    pub positive_fraction: f32,
    /// Draw negatives again once they run out, so every image yields a full batch as long as it
    /// has at least one negative.
    pub fill_with_replacement: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            batch_size_per_image: 256,
            positive_fraction: 0.5,
            fill_with_replacement: false,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size_per_image == 0 {
            return Err(Error::InvalidConfig(
                "sampling batch size must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.positive_fraction) {
            return Err(Error::InvalidConfig(format!(
                "positive fraction must be within [0, 1], got {}",
                self.positive_fraction
            )));
        }

        Ok(())
    }
}

/// Indices of the sampled references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Sampled positives, ascending.
    pub positives: Vec<usize>,
    /// Sampled negatives, ascending. May repeat indices when filled with replacement.
    pub negatives: Vec<usize>,
}

impl Sample {
    #[must_use]
    pub fn len(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positives.is_empty() && self.negatives.is_empty()
    }

    /// Positives followed by negatives.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.positives.iter().chain(&self.negatives).copied()
    }
}

/// Samples a fixed budget of matches, aiming for a given share of positives.
///
/// At most `batch_size_per_image * positive_fraction` positives are drawn, forced positives
/// before any others. Negatives fill the rest of the budget, which means they also take over
/// the share of missing positives.
#[derive(Debug, Clone)]
pub struct BalancedSampler {
    config: SamplingConfig,
}

impl BalancedSampler {
    pub fn new(config: SamplingConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn sample<R: Rng + ?Sized>(&self, matches: &[Match], rng: &mut R) -> Sample {
        let batch_size = self.config.batch_size_per_image;
        let positive_budget = (batch_size as f32 * self.config.positive_fraction) as usize;

        let (forced, unforced): (Vec<_>, Vec<_>) = matches
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_positive())
            .partition(|(_, m)| m.forced);
        let forced = forced.into_iter().map(|(i, _)| i).collect::<Vec<_>>();
        let unforced = unforced.into_iter().map(|(i, _)| i).collect::<Vec<_>>();

        let mut positives = choose(&forced, positive_budget, rng);
        let remaining = positive_budget - positives.len();
        positives.extend(choose(&unforced, remaining, rng));
        positives.sort_unstable();

        let candidates = matches
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_negative())
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        let negative_budget = batch_size - positives.len();
        let mut negatives = choose(&candidates, negative_budget, rng);

        if self.config.fill_with_replacement && !candidates.is_empty() {
            let missing = negative_budget - negatives.len();
            negatives.extend(
                (0..missing).map(|_| candidates[rng.random_range(0..candidates.len())]),
            );
        }
        negatives.sort_unstable();

        trace!(
            positives = positives.len(),
            negatives = negatives.len(),
            "sampled matches"
        );

        Sample {
            positives,
            negatives,
        }
    }
}

/// Choose up to `amount` distinct elements of `from`, uniformly at random.
fn choose<R: Rng + ?Sized>(from: &[usize], amount: usize, rng: &mut R) -> Vec<usize> {
    if from.len() <= amount {
        return from.to_vec();
    }

    index::sample(rng, from.len(), amount)
        .into_iter()
        .map(|i| from[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::matcher::MatchLabel;

    fn labelled(labels: &[(MatchLabel, bool)]) -> Vec<Match> {
        labels
            .iter()
            .map(|&(label, forced)| Match {
                label,
                gt_index: Some(0),
                iou: 0.0,
                forced,
            })
            .collect()
    }

    fn sampler(batch_size_per_image: usize, fill_with_replacement: bool) -> BalancedSampler {
        BalancedSampler::new(SamplingConfig {
            batch_size_per_image,
            positive_fraction: 0.5,
            fill_with_replacement,
        })
        .unwrap()
    }

    #[test]
    fn keeps_everything_under_budget() {
        let matches = labelled(&[
            (MatchLabel::Positive, false),
            (MatchLabel::Negative, false),
            (MatchLabel::Ignored, false),
            (MatchLabel::Negative, false),
        ]);

        let sample = sampler(256, false).sample(&matches, &mut StdRng::seed_from_u64(0));

        assert_eq!(sample.positives, vec![0]);
        assert_eq!(sample.negatives, vec![1, 3]);
        assert_eq!(sample.iter().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn caps_positives_and_fills_with_negatives() {
        let mut labels = vec![(MatchLabel::Positive, false); 10];
        labels.extend(vec![(MatchLabel::Negative, false); 20]);
        let matches = labelled(&labels);

        let sample = sampler(8, false).sample(&matches, &mut StdRng::seed_from_u64(1));
        assert_eq!(sample.positives.len(), 4);
        assert_eq!(sample.negatives.len(), 4);
        assert!(sample.positives.iter().all(|&i| i < 10));
        assert!(sample.negatives.iter().all(|&i| i >= 10));

        // few positives: negatives take over their share
        let mut labels = vec![(MatchLabel::Positive, false); 1];
        labels.extend(vec![(MatchLabel::Negative, false); 20]);
        let sample = sampler(8, false).sample(&labelled(&labels), &mut StdRng::seed_from_u64(1));
        assert_eq!(sample.positives, vec![0]);
        assert_eq!(sample.negatives.len(), 7);
    }

    #[test]
    fn forced_positives_come_first() {
        let mut labels = vec![(MatchLabel::Positive, false); 10];
        labels.push((MatchLabel::Positive, true));
        labels.push((MatchLabel::Positive, true));

        let sample = sampler(4, false).sample(&labelled(&labels), &mut StdRng::seed_from_u64(7));

        assert_eq!(sample.positives.len(), 2);
        assert_eq!(sample.positives, vec![10, 11]);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let mut labels = vec![(MatchLabel::Positive, false); 50];
        labels.extend(vec![(MatchLabel::Negative, false); 500]);
        let matches = labelled(&labels);
        let sampler = sampler(64, false);

        let a = sampler.sample(&matches, &mut StdRng::seed_from_u64(42));
        let b = sampler.sample(&matches, &mut StdRng::seed_from_u64(42));

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.positives.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn fills_with_replacement() {
        let matches = labelled(&[
            (MatchLabel::Positive, false),
            (MatchLabel::Negative, false),
            (MatchLabel::Negative, false),
        ]);

        let sample = sampler(6, true).sample(&matches, &mut StdRng::seed_from_u64(3));

        assert_eq!(sample.len(), 6);
        assert_eq!(sample.positives, vec![0]);
        assert!(sample.negatives.iter().all(|&i| i == 1 || i == 2));
        assert!(sample.negatives.contains(&1) && sample.negatives.contains(&2));
    }

    #[test]
    fn no_negatives_to_fill_with() {
        let matches = labelled(&[(MatchLabel::Positive, false), (MatchLabel::Ignored, false)]);

        let sample = sampler(6, true).sample(&matches, &mut StdRng::seed_from_u64(3));

        assert_eq!(sample.positives, vec![0]);
        assert!(sample.negatives.is_empty());
    }

    #[test]
    fn invalid_config() {
        let config = SamplingConfig {
            positive_fraction: -0.1,
            ..SamplingConfig::default()
        };
        assert!(BalancedSampler::new(config).is_err());
    }
}

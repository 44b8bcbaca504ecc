use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use detection::{box_coder::BoxCoder, config::DetectionConfig, target::TargetAssigner};
use miette::{Result, miette};
use tracing::info;

use crate::dump::{self, AssignDump, Assignment};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Stage {
    /// Anchors against ground truth
    #[default]
    Rpn,
    /// Proposals against ground truth
    Detector,
}

/// Assign training targets to reference boxes.
#[derive(Parser)]
#[clap(name = "assign")]
pub struct Assign {
    /// JSON file with the reference boxes and the ground truth
    dump: PathBuf,

    /// Which stage the references belong to
    #[clap(long, value_enum, default_value_t)]
    stage: Stage,

    /// Seed of the positive and negative sampling
    #[clap(long, default_value_t = 0)]
    seed: u64,
}

impl Assign {
    pub fn assign(self, config: &DetectionConfig) -> Result<()> {
        let dump: AssignDump = dump::read(&self.dump)?;

        let assigner = match self.stage {
            Stage::Rpn => TargetAssigner::new(&config.rpn_targets, BoxCoder::rpn())?,
            Stage::Detector => TargetAssigner::new(&config.detector_targets, BoxCoder::detector())?,
        };

        let references = dump.references();
        let targets = assigner
            .assign_batch(&[references], &[dump.ground_truth()], self.seed)?
            .into_iter()
            .next()
            .ok_or_else(|| miette!("no targets were assigned"))?;
        info!(
            positives = targets.num_positives(),
            negatives = targets.num_negatives(),
            sampled = targets.sampled.len(),
            "assigned targets"
        );

        dump::print(&Assignment {
            targets: targets.targets.into_iter().map(Into::into).collect(),
            sampled_positives: targets.sampled.positives,
            sampled_negatives: targets.sampled.negatives,
        })
    }
}

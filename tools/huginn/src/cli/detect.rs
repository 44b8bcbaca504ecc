use std::path::PathBuf;

use clap::Parser;
use detection::{config::DetectionConfig, detector::DetectionDecoder, proposal::Proposal};
use miette::Result;
use tracing::info;

use crate::dump::{self, DetectionRecord, DetectorDump};

/// Decode classifier outputs on top of proposals into detections.
#[derive(Parser)]
#[clap(name = "detect")]
pub struct Detect {
    /// JSON file with the output of `huginn propose`, extended with `scores` and `deltas`
    dump: PathBuf,
}

impl Detect {
    pub fn detect(self, config: &DetectionConfig) -> Result<()> {
        let dump: DetectorDump = dump::read(&self.dump)?;
        let num_classes = config.detector.num_classes;

        let proposals = dump
            .proposals
            .iter()
            .copied()
            .map(Proposal::from)
            .collect::<Vec<_>>();
        let scores = dump::to_array2("scores", &dump.scores, num_classes)?;
        let deltas = dump::to_array2("deltas", &dump.deltas, 4 * num_classes)?;

        let detections = DetectionDecoder::new(config.detector.clone())?.decode(
            &proposals,
            scores.view(),
            deltas.view(),
            dump.input,
            dump.image,
        )?;
        info!(count = detections.len(), "decoded detections");

        dump::print(
            &detections
                .into_iter()
                .map(DetectionRecord::from)
                .collect::<Vec<_>>(),
        )
    }
}

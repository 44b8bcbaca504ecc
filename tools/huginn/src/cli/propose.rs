use std::path::PathBuf;

use clap::Parser;
use detection::{
    anchor::AnchorGenerator,
    config::DetectionConfig,
    geometry::{RESNET50_STAGES, feature_map_size, resize_to_min_side},
    proposal::ProposalDecoder,
};
use miette::Result;
use tracing::info;

use crate::dump::{self, Proposals, RpnDump};

/// Decode a region proposal network dump into proposals.
#[derive(Parser)]
#[clap(name = "propose")]
pub struct Propose {
    /// JSON file with the image size, objectness scores and deltas
    dump: PathBuf,
}

impl Propose {
    pub fn propose(self, config: &DetectionConfig) -> Result<()> {
        let dump: RpnDump = dump::read(&self.dump)?;

        let input = resize_to_min_side(dump.image, config.input.min_side);
        let feature = feature_map_size(input, &RESNET50_STAGES);
        let anchors = AnchorGenerator::from_config(&config.anchors)?
            .generate(feature)
            .clipped(input);

        let scores = dump::to_array2("scores", &dump.scores, 1)?;
        let deltas = dump::to_array2("deltas", &dump.deltas, 4)?;

        let proposals = ProposalDecoder::new(config.rpn.clone())?.decode(
            &anchors,
            scores.view(),
            deltas.view(),
            input,
        )?;
        info!(count = proposals.len(), "decoded proposals");

        dump::print(&Proposals {
            image: dump.image,
            input,
            proposals: proposals.into_iter().map(Into::into).collect(),
        })
    }
}

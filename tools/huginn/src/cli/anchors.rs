use clap::Parser;
use detection::{
    anchor::AnchorGenerator,
    config::DetectionConfig,
    geometry::{ImageSize, RESNET50_STAGES, feature_map_size, resize_to_min_side},
};
use miette::Result;
use serde::Serialize;

use crate::dump;

/// Generate the anchors for an image of the given size.
#[derive(Parser)]
#[clap(name = "anchors")]
pub struct Anchors {
    /// Width of the image before resizing
    width: u32,

    /// Height of the image before resizing
    height: u32,

    /// Print every anchor box, not only the summary
    #[clap(long)]
    boxes: bool,
}

#[derive(Serialize)]
struct AnchorSummary {
    input: ImageSize,
    feature_width: usize,
    feature_height: usize,
    anchors_per_cell: usize,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    boxes: Option<Vec<[f32; 4]>>,
}

impl Anchors {
    pub fn anchors(self, config: &DetectionConfig) -> Result<()> {
        let original = ImageSize::new(self.width, self.height);
        let input = resize_to_min_side(original, config.input.min_side);
        let feature = feature_map_size(input, &RESNET50_STAGES);

        let generator = AnchorGenerator::from_config(&config.anchors)?;
        let anchors = generator.generate(feature).clipped(input);

        dump::print(&AnchorSummary {
            input,
            feature_width: feature.width,
            feature_height: feature.height,
            anchors_per_cell: generator.anchors_per_cell(),
            count: anchors.len(),
            boxes: self
                .boxes
                .then(|| anchors.iter().map(|anchor| anchor.bbox.into()).collect()),
        })
    }
}

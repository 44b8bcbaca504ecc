//! The configuration of the whole pipeline, stored as `detection.toml`.

use serde::{Deserialize, Serialize};

use crate::{
    anchor::AnchorConfig,
    detector::DetectorConfig,
    error::{Error, Result},
    geometry::{RESNET50_STAGES, total_stride},
    proposal::RpnConfig,
    target::AssignerConfig,
};

/// Input image geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Length in pixels of the shorter image side after resizing.
    pub min_side: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { min_side: 600 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    pub input: InputConfig,
    pub anchors: AnchorConfig,
    pub rpn: RpnConfig,
    pub rpn_targets: AssignerConfig,
    pub detector: DetectorConfig,
    pub detector_targets: AssignerConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            anchors: AnchorConfig::default(),
            rpn: RpnConfig::default(),
            rpn_targets: AssignerConfig::rpn(),
            detector: DetectorConfig::default(),
            detector_targets: AssignerConfig::detector(),
        }
    }
}

impl odal::Config for DetectionConfig {
    const PATH: &'static str = "detection.toml";
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input.min_side == 0 {
            return Err(Error::InvalidConfig(
                "input min side must be at least 1 pixel".to_string(),
            ));
        }

        self.anchors.validate()?;

        // feature maps are always computed with the ResNet-50 stages
        let backbone_stride = total_stride(&RESNET50_STAGES);
        if self.anchors.stride as usize != backbone_stride {
            return Err(Error::InvalidConfig(format!(
                "anchor stride {} does not match the backbone stride {backbone_stride}",
                self.anchors.stride
            )));
        }

        self.rpn.validate()?;
        self.rpn_targets.validate()?;
        self.detector.validate()?;
        self.detector_targets.validate()
    }
}

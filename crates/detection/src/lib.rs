//! Geometry of two-stage object detection.
//!
//! This crate holds everything between the tensors of a Faster R-CNN style network and the boxes
//! that come out of it, without running the network itself:
//!
//! - [`anchor`] generates the grid of reference boxes the region proposal network predicts on.
//! - [`box_coder`] converts between boxes and the deltas the network regresses.
//! - [`proposal`] decodes objectness and deltas into suppressed region proposals.
//! - [`target`] matches references against ground truth and produces training targets.
//! - [`detector`] decodes the classifier outputs into the final detections.
//!
//! All boxes are [`Bbox<Xyxy>`](bbox::Bbox) in pixels of the network input image, unless noted
//! otherwise.

pub mod anchor;
pub mod bbox;
pub mod box_coder;
pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod matcher;
pub mod nms;
pub mod proposal;
pub mod sampler;
pub mod stats;
pub mod target;
pub mod util;

pub use error::{Error, Result};

/// `use detection::prelude::*;` to import commonly used items.
pub mod prelude {
    pub use crate::anchor::{AnchorCache, AnchorConfig, AnchorGenerator, AnchorLayout, Anchors};
    pub use crate::bbox::{Bbox, ConvertBbox, Cxcywh, Xyxy};
    pub use crate::box_coder::{BoxCoder, Delta};
    pub use crate::config::DetectionConfig;
    pub use crate::detector::{Detection, DetectionDecoder, DetectorConfig};
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{
        FeatureSize, ImageSize, RESNET50_STAGES, feature_map_size, resize_to_min_side,
    };
    pub use crate::matcher::{Match, MatchLabel, Matcher};
    pub use crate::nms::{batched_non_max_suppression, non_max_suppression};
    pub use crate::proposal::{Proposal, ProposalDecoder, RpnConfig, RpnOutput};
    pub use crate::sampler::{BalancedSampler, Sample, SamplingConfig};
    pub use crate::stats::LossBreakdown;
    pub use crate::target::{AssignerConfig, GroundTruth, Target, TargetAssigner, TrainingTargets};
}

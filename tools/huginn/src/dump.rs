//! JSON formats of the network output dumps read by `huginn`, and of the results it prints.

use std::{fs, path::Path};

use detection::{
    bbox::{Bbox, Xyxy},
    detector::Detection,
    geometry::ImageSize,
    proposal::Proposal,
    target::{GroundTruth, Target},
};
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use ndarray::Array2;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Read and parse a JSON file.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read `{}`", path.display()))?;

    serde_json::from_str(&contents)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse `{}`", path.display()))
}

/// Print a value as pretty JSON on stdout.
pub fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

/// Convert a list of rows into a `[rows, columns]` array.
///
/// All rows must have the same length. An empty list becomes a `[0, empty_columns]` array.
pub fn to_array2(name: &str, rows: &[Vec<f32>], empty_columns: usize) -> Result<Array2<f32>> {
    let columns = rows.first().map_or(empty_columns, Vec::len);

    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != columns) {
        return Err(miette!(
            "row {index} of `{name}` has {} values, expected {columns}",
            row.len()
        ));
    }

    Array2::from_shape_vec((rows.len(), columns), rows.concat())
        .into_diagnostic()
        .wrap_err_with(|| format!("`{name}` is not a matrix"))
}

fn to_bbox(bbox: [f32; 4]) -> Bbox<Xyxy> {
    Bbox::xyxy(bbox[0], bbox[1], bbox[2], bbox[3])
}

/// Region proposal network outputs of one image.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpnDump {
    /// Size of the image before resizing.
    pub image: ImageSize,
    /// One row of one or two objectness values per anchor.
    pub scores: Vec<Vec<f32>>,
    /// One `dx, dy, dw, dh` row per anchor.
    pub deltas: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub bbox: [f32; 4],
    pub score: f32,
}

impl From<Proposal> for ProposalRecord {
    fn from(proposal: Proposal) -> Self {
        Self {
            bbox: proposal.bbox.into(),
            score: proposal.score,
        }
    }
}

impl From<ProposalRecord> for Proposal {
    fn from(record: ProposalRecord) -> Self {
        Self {
            bbox: to_bbox(record.bbox),
            score: record.score,
        }
    }
}

/// Output of `huginn propose`.
#[derive(Debug, Serialize)]
pub struct Proposals {
    /// Size of the image before resizing.
    pub image: ImageSize,
    /// Size of the network input the proposals are expressed in.
    pub input: ImageSize,
    pub proposals: Vec<ProposalRecord>,
}

/// Classifier outputs of one image, on top of its proposals.
///
/// The output of `huginn propose` with the two classifier tensors added.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorDump {
    pub image: ImageSize,
    pub input: ImageSize,
    pub proposals: Vec<ProposalRecord>,
    /// One row of class probabilities per proposal, background last.
    pub scores: Vec<Vec<f32>>,
    /// One row of class specific deltas per proposal.
    pub deltas: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct DetectionRecord {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub score: f32,
}

impl From<Detection> for DetectionRecord {
    fn from(detection: Detection) -> Self {
        Self {
            bbox: detection.bbox.into(),
            class_id: detection.class_id,
            score: detection.score,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroundTruthRecord {
    pub bbox: [f32; 4],
    pub class_id: usize,
}

impl From<GroundTruthRecord> for GroundTruth {
    fn from(record: GroundTruthRecord) -> Self {
        GroundTruth::new(to_bbox(record.bbox), record.class_id)
    }
}

/// Reference boxes and ground truth of one image, in network input pixels.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignDump {
    pub references: Vec<[f32; 4]>,
    pub ground_truth: Vec<GroundTruthRecord>,
}

impl AssignDump {
    #[must_use]
    pub fn references(&self) -> Vec<Bbox<Xyxy>> {
        self.references.iter().copied().map(to_bbox).collect()
    }

    #[must_use]
    pub fn ground_truth(&self) -> Vec<GroundTruth> {
        self.ground_truth.iter().copied().map(GroundTruth::from).collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "label", rename_all = "snake_case")]
pub enum TargetRecord {
    Positive {
        class_id: usize,
        gt_index: usize,
        delta: [f32; 4],
    },
    Negative,
    Ignored,
}

impl From<Target> for TargetRecord {
    fn from(target: Target) -> Self {
        match target {
            Target::Positive {
                class_id,
                gt_index,
                delta,
            } => TargetRecord::Positive {
                class_id,
                gt_index,
                delta: delta.to_array(),
            },
            Target::Negative => TargetRecord::Negative,
            Target::Ignored => TargetRecord::Ignored,
        }
    }
}

/// Output of `huginn assign`.
#[derive(Debug, Serialize)]
pub struct Assignment {
    pub targets: Vec<TargetRecord>,
    pub sampled_positives: Vec<usize>,
    pub sampled_negatives: Vec<usize>,
}

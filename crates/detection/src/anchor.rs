//! Generation of the fixed grid of reference boxes (anchors).
//!
//! The order of the anchors is a contract with the network: the region proposal head emits one
//! score row and one delta row per anchor, in exactly the order defined by [`AnchorLayout`].
//! Both the generator and anything that builds prediction tensors by hand go through
//! [`AnchorLayout::index`] and [`AnchorLayout::position`], so the two can not drift apart.

use std::sync::Arc;

use itertools::iproduct;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bbox::{Bbox, Xyxy},
    error::{Error, Result},
    geometry::{FeatureSize, ImageSize},
};

/// Anchor shapes and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorConfig {
    /// Anchor side lengths in pixels, before applying the aspect ratio.
    pub scales: Vec<f32>,
    /// Aspect ratios, as width divided by height.
    pub ratios: Vec<f32>,
    /// Distance in pixels between two neighbouring feature map cells.
    pub stride: u32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            scales: vec![128.0, 256.0, 512.0],
            ratios: vec![0.5, 1.0, 2.0],
            stride: 16,
        }
    }
}

impl AnchorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() || self.ratios.is_empty() {
            return Err(Error::InvalidConfig(
                "anchor scales and ratios must not be empty".to_string(),
            ));
        }

        if let Some(value) = self
            .scales
            .iter()
            .chain(&self.ratios)
            .find(|value| !(value.is_finite() && **value > 0.0))
        {
            return Err(Error::InvalidConfig(format!(
                "anchor scales and ratios must be positive, got {value}"
            )));
        }

        if self.stride == 0 {
            return Err(Error::InvalidConfig(
                "anchor stride must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A cell of the feature map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// The ordering of anchors in the flat anchor sequence.
///
/// Anchors are ordered row-major over the grid, then by scale, then by ratio:
///
/// `index = ((row * width + col) * num_scales + scale) * num_ratios + ratio`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorLayout {
    pub feature: FeatureSize,
    pub num_scales: usize,
    pub num_ratios: usize,
}

impl AnchorLayout {
    #[must_use]
    pub const fn anchors_per_cell(&self) -> usize {
        self.num_scales * self.num_ratios
    }

    /// Total number of anchors, `width * height * scales * ratios`.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.feature.num_cells() * self.anchors_per_cell()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the anchor for `cell`, `scale` and `ratio` in the flat sequence.
    #[must_use]
    pub const fn index(&self, cell: GridCell, scale: usize, ratio: usize) -> usize {
        ((cell.row * self.feature.width + cell.col) * self.num_scales + scale) * self.num_ratios
            + ratio
    }

    /// Inverse of [`AnchorLayout::index`], returns the cell, scale index and ratio index.
    #[must_use]
    pub const fn position(&self, index: usize) -> (GridCell, usize, usize) {
        let ratio = index % self.num_ratios;
        let rest = index / self.num_ratios;
        let scale = rest % self.num_scales;
        let cell = rest / self.num_scales;

        (
            GridCell::new(cell / self.feature.width, cell % self.feature.width),
            scale,
            ratio,
        )
    }
}

/// A reference box, tagged with where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub bbox: Bbox<Xyxy>,
    pub cell: GridCell,
    pub scale_index: usize,
    pub ratio_index: usize,
}

/// An immutable, ordered anchor sequence for one feature map size.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
    layout: AnchorLayout,
    anchors: Vec<Anchor>,
}

impl Anchors {
    #[must_use]
    pub fn layout(&self) -> AnchorLayout {
        self.layout
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }

    /// The anchor boxes, in anchor order.
    #[must_use]
    pub fn boxes(&self) -> Vec<Bbox<Xyxy>> {
        self.anchors.iter().map(|anchor| anchor.bbox).collect()
    }

    /// The anchor boxes as an `[num_anchors, 4]` array of `x1, y1, x2, y2` rows.
    #[must_use]
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.anchors.len(), 4), |(i, j)| {
            let (x1, y1, x2, y2) = self.anchors[i].bbox.inner;
            [x1, y1, x2, y2][j]
        })
    }

    /// Clip every anchor to the image bounds.
    #[must_use]
    pub fn clipped(&self, image: ImageSize) -> Anchors {
        let (width, height) = (image.width as f32, image.height as f32);
        let anchors = self
            .anchors
            .iter()
            .map(|anchor| Anchor {
                bbox: anchor.bbox.clamp(width, height),
                ..*anchor
            })
            .collect();

        Anchors {
            layout: self.layout,
            anchors,
        }
    }
}

impl<'a> IntoIterator for &'a Anchors {
    type Item = &'a Anchor;
    type IntoIter = std::slice::Iter<'a, Anchor>;

    fn into_iter(self) -> Self::IntoIter {
        self.anchors.iter()
    }
}

/// Generates anchors for a feature map.
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    stride: f32,
    num_scales: usize,
    num_ratios: usize,
    /// Anchor width and height for each (scale, ratio) pair, scale-major.
    wh_pairs: Vec<(f32, f32)>,
}

impl AnchorGenerator {
    /// Create a new generator.
    ///
    /// Scales and ratios are expected to be positive, see [`AnchorConfig::validate`].
    #[must_use]
    pub fn new(scales: &[f32], ratios: &[f32], stride: u32) -> Self {
        AnchorGenerator {
            stride: stride as f32,
            num_scales: scales.len(),
            num_ratios: ratios.len(),
            wh_pairs: Self::create_width_height_pairs(scales, ratios),
        }
    }

    pub fn from_config(config: &AnchorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self::new(&config.scales, &config.ratios, config.stride))
    }

    /// Generate width and height pairs for every scale and ratio.
    ///
    /// The width is the scale times the square root of the aspect ratio, the height is the scale
    /// divided by the square root of the aspect ratio. This keeps the area at `scale * scale`.
    fn create_width_height_pairs(scales: &[f32], ratios: &[f32]) -> Vec<(f32, f32)> {
        iproduct!(scales, ratios)
            .map(|(scale, ratio)| {
                let sqrt_ar = ratio.sqrt();
                (scale * sqrt_ar, scale / sqrt_ar)
            })
            .collect()
    }

    #[must_use]
    pub fn anchors_per_cell(&self) -> usize {
        self.wh_pairs.len()
    }

    #[must_use]
    pub fn layout(&self, feature: FeatureSize) -> AnchorLayout {
        AnchorLayout {
            feature,
            num_scales: self.num_scales,
            num_ratios: self.num_ratios,
        }
    }

    /// Generate the anchors for a feature map, in [`AnchorLayout`] order.
    ///
    /// Anchors are centered on their cell, at `((col + 0.5) * stride, (row + 0.5) * stride)`.
    #[must_use]
    pub fn generate(&self, feature: FeatureSize) -> Anchors {
        let layout = self.layout(feature);

        let anchors = (0..layout.len())
            .map(|index| {
                let (cell, scale_index, ratio_index) = layout.position(index);
                let (w, h) = self.wh_pairs[scale_index * self.num_ratios + ratio_index];

                let cx = (cell.col as f32 + 0.5) * self.stride;
                let cy = (cell.row as f32 + 0.5) * self.stride;

                Anchor {
                    bbox: Bbox::xyxy(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
                    cell,
                    scale_index,
                    ratio_index,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            width = feature.width,
            height = feature.height,
            count = anchors.len(),
            "generated anchors"
        );

        Anchors { layout, anchors }
    }
}

/// Caches the clipped anchors for the last seen feature map and image size.
///
/// The anchors only depend on these two sizes, so a whole batch (or a whole run on fixed size
/// inputs) can share a single sequence.
#[derive(Debug)]
pub struct AnchorCache {
    generator: AnchorGenerator,
    cached: Option<(FeatureSize, ImageSize, Arc<Anchors>)>,
}

impl AnchorCache {
    #[must_use]
    pub fn new(generator: AnchorGenerator) -> Self {
        Self {
            generator,
            cached: None,
        }
    }

    /// Get the anchors for the given sizes, clipped to the image.
    ///
    /// The anchors are only regenerated when one of the sizes changed since the last call.
    pub fn get(&mut self, feature: FeatureSize, image: ImageSize) -> Arc<Anchors> {
        match &self.cached {
            Some((cached_feature, cached_image, anchors))
                if *cached_feature == feature && *cached_image == image =>
            {
                Arc::clone(anchors)
            }
            _ => {
                let anchors = Arc::new(self.generator.generate(feature).clipped(image));
                self.cached = Some((feature, image, Arc::clone(&anchors)));
                anchors
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centers(anchors: &Anchors) -> Vec<(f32, f32)> {
        anchors
            .iter()
            .map(|anchor| {
                let (x1, y1, x2, y2) = anchor.bbox.inner;
                ((y1 + y2) / 2.0, (x1 + x2) / 2.0)
            })
            .collect()
    }

    #[test]
    fn anchor_count() {
        let generator = AnchorGenerator::new(&[64.0, 128.0, 256.0], &[0.5, 1.0, 2.0], 16);

        for (w, h) in [(1, 1), (3, 2), (38, 50)] {
            let anchors = generator.generate(FeatureSize::new(w, h));
            assert_eq!(anchors.len(), w * h * 3 * 3);
        }
    }

    #[test]
    fn single_scale_grid() {
        let generator = AnchorGenerator::new(&[128.0], &[1.0], 16);
        let anchors = generator.generate(FeatureSize::new(2, 2));

        // (y, x) centers in row-major order
        assert_eq!(
            centers(&anchors),
            vec![(8.0, 8.0), (8.0, 24.0), (24.0, 8.0), (24.0, 24.0)]
        );
        for anchor in &anchors {
            assert_eq!(anchor.bbox.width(), 128.0);
            assert_eq!(anchor.bbox.height(), 128.0);
        }

        let clipped = anchors.clipped(ImageSize::new(32, 32));
        for anchor in &clipped {
            assert_eq!(anchor.bbox.inner, (0.0, 0.0, 32.0, 32.0));
        }
    }

    #[test]
    fn ratio_shapes() {
        let generator = AnchorGenerator::new(&[100.0], &[4.0, 0.25], 16);
        let anchors = generator.generate(FeatureSize::new(1, 1));

        let wide = anchors.get(0).unwrap().bbox;
        let tall = anchors.get(1).unwrap().bbox;

        assert_eq!((wide.width(), wide.height()), (200.0, 50.0));
        assert_eq!((tall.width(), tall.height()), (50.0, 200.0));
    }

    #[test]
    fn order_follows_layout() {
        let generator = AnchorGenerator::new(&[32.0, 64.0], &[0.5, 1.0, 2.0], 8);
        let feature = FeatureSize::new(4, 3);
        let anchors = generator.generate(feature);
        let layout = anchors.layout();

        for (index, anchor) in anchors.iter().enumerate() {
            assert_eq!(
                layout.index(anchor.cell, anchor.scale_index, anchor.ratio_index),
                index
            );
            assert_eq!(
                layout.position(index),
                (anchor.cell, anchor.scale_index, anchor.ratio_index)
            );
        }

        // row-major over the grid, then scale-major, then ratio-minor
        assert_eq!(layout.index(GridCell::new(0, 1), 0, 0), 6);
        assert_eq!(layout.index(GridCell::new(1, 0), 0, 0), 24);
        assert_eq!(layout.index(GridCell::new(0, 0), 1, 0), 3);
        assert_eq!(layout.index(GridCell::new(0, 0), 0, 2), 2);
    }

    #[test]
    fn array_matches_boxes() {
        let generator = AnchorGenerator::new(&[16.0], &[1.0, 2.0], 16);
        let anchors = generator.generate(FeatureSize::new(2, 1));
        let array = anchors.to_array();

        assert_eq!(array.dim(), (4, 4));
        for (row, bbox) in array.rows().into_iter().zip(anchors.boxes()) {
            assert_eq!(Bbox::from_row(row.as_slice().unwrap()), bbox);
        }
    }

    #[test]
    fn invalid_config() {
        let config = AnchorConfig {
            ratios: vec![1.0, -2.0],
            ..AnchorConfig::default()
        };
        assert!(AnchorGenerator::from_config(&config).is_err());

        let config = AnchorConfig {
            scales: Vec::new(),
            ..AnchorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cache_reuses_anchors() {
        let mut cache = AnchorCache::new(AnchorGenerator::new(&[128.0], &[1.0], 16));
        let feature = FeatureSize::new(2, 2);
        let image = ImageSize::new(32, 32);

        let first = cache.get(feature, image);
        let second = cache.get(feature, image);
        assert!(Arc::ptr_eq(&first, &second));

        let third = cache.get(FeatureSize::new(3, 2), ImageSize::new(48, 32));
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 6);
    }
}

//! Image and feature map sizes, and how the backbone maps one onto the other.

use serde::{Deserialize, Serialize};

/// Size of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Horizontal and vertical factors that map coordinates in `self` onto `target`.
    #[must_use]
    pub fn scale_to(&self, target: ImageSize) -> (f32, f32) {
        (
            target.width as f32 / self.width as f32,
            target.height as f32 / self.height as f32,
        )
    }
}

/// Size of the shared feature map, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSize {
    pub width: usize,
    pub height: usize,
}

impl FeatureSize {
    #[must_use]
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn num_cells(&self) -> usize {
        self.width * self.height
    }
}

/// Resize `original` so that its shorter side becomes `min_side`.
///
/// The longer side is scaled by the same factor and truncated to whole pixels.
#[must_use]
pub fn resize_to_min_side(original: ImageSize, min_side: u32) -> ImageSize {
    let ImageSize { width, height } = original;

    if width <= height {
        let factor = f64::from(min_side) / f64::from(width);
        ImageSize::new(min_side, (factor * f64::from(height)) as u32)
    } else {
        let factor = f64::from(min_side) / f64::from(height);
        ImageSize::new((factor * f64::from(width)) as u32, min_side)
    }
}

/// A single downsampling convolution of the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvStage {
    pub kernel: usize,
    pub padding: usize,
    pub stride: usize,
}

impl ConvStage {
    #[must_use]
    pub const fn new(kernel: usize, padding: usize, stride: usize) -> Self {
        Self {
            kernel,
            padding,
            stride,
        }
    }

    /// Output length of this stage for an input of `length` pixels.
    #[must_use]
    pub const fn output_length(&self, length: usize) -> usize {
        (length + 2 * self.padding).saturating_sub(self.kernel) / self.stride + 1
    }
}

/// Downsampling stages of the ResNet-50 trunk up to the shared feature map (total stride 16).
pub const RESNET50_STAGES: [ConvStage; 4] = [
    ConvStage::new(7, 3, 2),
    ConvStage::new(3, 1, 2),
    ConvStage::new(1, 0, 2),
    ConvStage::new(1, 0, 2),
];

/// Compute the feature map size the backbone produces for an input image.
#[must_use]
pub fn feature_map_size(image: ImageSize, stages: &[ConvStage]) -> FeatureSize {
    let length = |input: u32| {
        stages
            .iter()
            .fold(input as usize, |length, stage| stage.output_length(length))
    };

    FeatureSize::new(length(image.width), length(image.height))
}

/// Total downsampling factor of a stack of stages.
#[must_use]
pub fn total_stride(stages: &[ConvStage]) -> usize {
    stages.iter().map(|stage| stage.stride).product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_shorter_side() {
        assert_eq!(
            resize_to_min_side(ImageSize::new(500, 375), 600),
            ImageSize::new(800, 600)
        );
        assert_eq!(
            resize_to_min_side(ImageSize::new(300, 700), 600),
            ImageSize::new(600, 1400)
        );
        assert_eq!(
            resize_to_min_side(ImageSize::new(600, 600), 600),
            ImageSize::new(600, 600)
        );
    }

    #[test]
    fn resnet_feature_map() {
        assert_eq!(total_stride(&RESNET50_STAGES), 16);
        assert_eq!(
            feature_map_size(ImageSize::new(600, 800), &RESNET50_STAGES),
            FeatureSize::new(38, 50)
        );
        assert_eq!(
            feature_map_size(ImageSize::new(32, 32), &RESNET50_STAGES),
            FeatureSize::new(2, 2)
        );
    }
}

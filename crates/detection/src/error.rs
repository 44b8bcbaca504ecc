//! See [`Error`].

use miette::Diagnostic;
use thiserror::Error;

/// Error types for this crate.
///
/// Degenerate geometry and empty results are not errors, both are valid outcomes of the
/// pipeline. Everything in here is a programming or configuration mistake.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("`{tensor}` has shape {actual:?}, expected {expected}")]
    #[diagnostic(
        code(detection::shape_mismatch),
        help("the network outputs must follow the anchor (or proposal) order and count")
    )]
    ShapeMismatch {
        tensor: &'static str,
        expected: String,
        actual: (usize, usize),
    },

    #[error("class {class_id} is not an object class of a {num_classes} class detector")]
    #[diagnostic(
        code(detection::class_out_of_range),
        help("the last class is reserved for the background")
    )]
    ClassOutOfRange { class_id: usize, num_classes: usize },

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(detection::invalid_config))]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn shape(
        tensor: &'static str,
        expected: impl Into<String>,
        actual: (usize, usize),
    ) -> Self {
        Error::ShapeMismatch {
            tensor,
            expected: expected.into(),
            actual,
        }
    }
}

/// Type alias for [`Result<T, Error>`].
pub type Result<T> = std::result::Result<T, Error>;

//! Result and Error types for the crate.
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result containing an error variant from this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration error variants
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Reading or writing a config file failed.
    #[error("Failed to access config file `{path}`")]
    #[diagnostic(
        code(odal::io),
        help("Does the config directory exist and contain this file?")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file (or the merged main and overlay tables) is not a valid config.
    #[error("Failed to deserialize config from `{path}`")]
    #[diagnostic(code(odal::deserialize))]
    Deserialize {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The config could not be written as toml.
    #[error("Failed to serialize config `{name}`")]
    #[diagnostic(code(odal::serialize))]
    Serialize {
        name: &'static str,
        #[source]
        source: toml::ser::Error,
    },
}

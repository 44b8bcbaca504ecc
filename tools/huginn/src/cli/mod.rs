use std::path::PathBuf;

use clap::Parser;
use detection::config::DetectionConfig;
use miette::Result;
use odal::Config;
use tracing::debug;

pub mod anchors;
pub mod assign;
pub mod detect;
pub mod propose;

/// `huginn` - inspect the detection geometry without running the network
///
/// Every command reads the pipeline configuration from `<config-dir>/detection.toml`, with the
/// keys of `<overlay-dir>/detection.toml` taking precedence when given. Network outputs are read
/// from JSON dumps and results are printed as JSON.
///
/// # Anchors for an image
/// ```sh
/// huginn anchors 640 480
/// ```
///
/// # Proposals from a region proposal network dump
/// ```sh
/// huginn propose rpn.json > proposals.json
/// ```
#[derive(Parser)]
#[clap(name = "huginn", version)]
pub struct Cli {
    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(subcommand)]
    pub action: Commands,
}

/// All possible commands for the cli, used for clap derive macros.
#[derive(Parser)]
pub enum Commands {
    Anchors(anchors::Anchors),
    Propose(propose::Propose),
    Detect(detect::Detect),
    Assign(assign::Assign),
}

/// Where to find the configuration.
#[derive(Clone, Debug, Parser)]
pub struct ConfigOpts {
    /// Directory holding `detection.toml`
    #[clap(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,

    /// Directory with a `detection.toml` that overrides individual keys
    #[clap(long, global = true)]
    pub overlay_dir: Option<PathBuf>,
}

impl ConfigOpts {
    /// Load and validate the configuration.
    pub fn load(&self) -> Result<DetectionConfig> {
        let config = match &self.overlay_dir {
            Some(overlay_dir) => DetectionConfig::load_with_overlay(&self.config_dir, overlay_dir)?,
            None => DetectionConfig::load(&self.config_dir)?,
        };
        config.validate()?;

        debug!(?config, "loaded configuration");
        Ok(config)
    }
}

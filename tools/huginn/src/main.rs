use clap::Parser;
use huginn::cli::{Cli, Commands};
use miette::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    miette::set_panic_hook();

    let args = Cli::parse();
    let config = args.config.load()?;

    match args.action {
        Commands::Anchors(opts) => opts.anchors(&config)?,
        Commands::Propose(opts) => opts.propose(&config)?,
        Commands::Detect(opts) => opts.detect(&config)?,
        Commands::Assign(opts) => opts.assign(&config)?,
    }

    Ok(())
}

//! `devforge read-configuration` — Print the effective configuration.

use clap::Args;

use super::{Cli, ConfigArgs};

/// Arguments for the `read-configuration` command.
#[derive(Args, Debug)]
pub struct ReadConfigurationArgs {
    /// Configuration inputs.
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Executes the `read-configuration` command.
///
/// Loads the `extends` chain, runs the pre-container substitution pass,
/// merges every layer, and prints the result as JSON. No feature is
/// resolved and no container is touched.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or merged.
pub fn execute(cli: &Cli, args: &ReadConfigurationArgs) -> anyhow::Result<()> {
    let path = args.config.config_path()?;
    let pipeline = cli.pipeline()?;
    let config = pipeline.load_config(&path, &args.config.inputs()?, &args.config.context()?)?;
    crate::output::print_json(&config.to_json())
}

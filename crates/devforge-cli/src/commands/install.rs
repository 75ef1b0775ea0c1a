//! `devforge install` — Install features into a running container.

use clap::Args;
use devforge_common::types::ContainerTarget;
use devforge_install::DockerExec;
use tokio_util::sync::CancellationToken;

use super::{Cli, ConfigArgs, runtime};

/// Arguments for the `install` command.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Configuration inputs.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Id or name of the running container.
    #[arg(long)]
    pub container: String,
}

/// Executes the `install` command.
///
/// Resolves and plans every feature before touching the container, then
/// installs them one by one. Ctrl+C lets the current feature finish and
/// skips the rest.
///
/// # Errors
///
/// Returns an error if planning fails, `docker` is missing, or a feature
/// fails to install. Features installed before a failure stay installed.
pub fn execute(cli: &Cli, args: &InstallArgs) -> anyhow::Result<()> {
    let path = args.config.config_path()?;
    let ctx = args.config.context()?;
    let exec = DockerExec::locate()?;
    let target = ContainerTarget::new(&args.container);
    let pipeline = cli.pipeline()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        #[allow(clippy::print_stderr)]
        eprintln!("\n  Interrupted: finishing the current feature, skipping the rest...");
        on_interrupt.cancel();
    })?;

    let rt = runtime()?;
    let prepared = rt.block_on(pipeline.prepare(&path, &args.config.inputs()?, &ctx))?;
    eprintln!("  Installing {} feature(s) into {target}", prepared.plan.len());

    let report = rt.block_on(pipeline.install(prepared, &exec, target.clone(), cancel))?;
    let config = rt.block_on(pipeline.finalize(&report.config, ctx, &exec, &target));
    let stats = pipeline.close();
    tracing::debug!(hits = stats.hits, stored = stats.stored, "cache session closed");

    crate::output::print_json(&serde_json::json!({
        "installed": report.installed,
        "skipped": report.skipped,
        "cancelled": report.cancelled,
        "configuration": config.to_json(),
    }))?;
    if report.cancelled {
        anyhow::bail!("installation cancelled; {} feature(s) skipped", report.skipped.len());
    }
    Ok(())
}

//! `devforge plan` — Resolve features and show the install order.

use clap::Args;

use super::{Cli, ConfigArgs, config_dir, runtime};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Configuration inputs.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Resolves every enabled feature and its dependencies, then prints the
/// order they would be installed in. Nothing is installed.
///
/// # Errors
///
/// Returns an error if the configuration, a feature, or the dependency
/// graph is invalid.
pub fn execute(cli: &Cli, args: &PlanArgs) -> anyhow::Result<()> {
    let path = args.config.config_path()?;
    let pipeline = cli.pipeline()?;
    let config = pipeline.load_config(&path, &args.config.inputs()?, &args.config.context()?)?;
    let plan = runtime()?.block_on(pipeline.plan(&config, config_dir(&path)))?;
    let _ = pipeline.close();

    if args.json {
        let features: Vec<serde_json::Value> = plan
            .features
            .iter()
            .map(|node| {
                serde_json::json!({
                    "id": node.id().as_str(),
                    "version": node.manifest.resolved_version,
                    "digest": node.manifest.package_digest.as_ref().map(ToString::to_string),
                    "options": node.options,
                })
            })
            .collect();
        let corrections: Vec<serde_json::Value> = plan
            .corrections
            .iter()
            .map(|c| {
                serde_json::json!({
                    "requestedFirst": c.requested_first.as_str(),
                    "placedFirst": c.placed_first.as_str(),
                })
            })
            .collect();
        return crate::output::print_json(&serde_json::json!({
            "features": features,
            "corrections": corrections,
        }));
    }

    println!("Install plan for: {}", path.display());
    println!();
    for (i, node) in plan.features.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, node.id(), node.manifest.resolved_version);
        for (name, value) in &node.options {
            println!("       {name} = {value}");
        }
    }
    println!();
    println!("  {} feature(s) will be installed.", plan.len());
    for correction in &plan.corrections {
        println!(
            "  note: {} installs before {} because of a dependency",
            correction.placed_first, correction.requested_first
        );
    }
    Ok(())
}

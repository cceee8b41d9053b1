//! `patchringctl`: command-line entry point for patch rollouts.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use patchring_config::{Config, ConfigLoader, init_logging};
use patchring_core::{
    PatchApiClient, TokioClock, Workflow, WorkflowReport, remote::remote_control_for,
    resolver::Resolver,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "patchringctl", version)]
#[command(
    about = "Scan, patch and restart a server ring and a database ring through the patch console API"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Path to the INI configuration file
    #[arg(short, long, env = "PATCHRING_CONFIG", default_value = "config.ini")]
    config: PathBuf,

    /// Mirror log output to stdout in addition to the log file
    #[arg(long, default_value_t = false)]
    log_stdout: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full rollout: server ring, database ring, optional power-on
    Run {
        #[command(flatten)]
        args: ConfigArgs,

        /// Log shutdown/reboot commands instead of executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Validate the configuration and resolve every configured name
    Check {
        #[command(flatten)]
        args: ConfigArgs,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { args, dry_run } => run(&args, dry_run).await,
        Command::Check { args } => check(&args).await,
    }
}

fn bootstrap(args: &ConfigArgs) -> anyhow::Result<Config> {
    let config = ConfigLoader::new(&args.config)
        .load()
        .with_context(|| {
            format!("failed to load configuration from {}", args.config.display())
        })?;
    let log_file = init_logging(&config.logging, args.log_stdout)
        .context("failed to set up logging")?;
    info!(
        config = %args.config.display(),
        log_file = %log_file.display(),
        "configuration loaded"
    );
    Ok(config)
}

async fn run(args: &ConfigArgs, dry_run: bool) -> anyhow::Result<()> {
    let config = bootstrap(args)?;
    let api = PatchApiClient::new(&config.server)
        .context("failed to create console API client")?;
    let remote = remote_control_for(config.workflow.remote_control, dry_run);
    if dry_run {
        info!("dry run: machines will not be shut down");
    }

    let report = Workflow::new(&config, &api, remote.as_ref(), &TokioClock)
        .run()
        .await
        .context("rollout failed")?;

    print_report(&report);
    Ok(())
}

async fn check(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = bootstrap(args)?;
    let api = PatchApiClient::new(&config.server)
        .context("failed to create console API client")?;
    let ids = Resolver::new(&api)
        .resolve_all(&config.workflow)
        .await
        .context("failed to resolve configured names")?;

    let workflow = &config.workflow;
    println!("credential           {} -> {}", workflow.run_as_credentials, ids.credential);
    println!("scan template        {} -> {}", workflow.scan_template, ids.scan_template);
    println!(
        "deployment template  {} -> {}",
        workflow.deployment_template, ids.deployment_template
    );
    println!("server group         {} -> {}", workflow.machine_group_server, ids.server_group);
    println!(
        "database group       {} -> {}",
        workflow.machine_group_database, ids.database_group
    );
    Ok(())
}

fn print_report(report: &WorkflowReport) {
    for ring in &report.rings {
        println!(
            "{} ring: scan {} deployment {}",
            ring.ring, ring.scan_id, ring.deployment_id
        );
        for (machine, exit) in ring.machines.iter().zip(&ring.exits) {
            println!("  {} ({}): {}", machine.name, machine.address, exit);
        }
    }
    if !report.powered_on.is_empty() {
        println!("powered on: {}", report.powered_on.join(", "));
    }
}

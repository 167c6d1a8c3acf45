//! Binary entry point for the Gantry CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gantry::{
    CredentialResolver, GantryConfig, LifecycleController, MasterConfig, NodePolicy,
    RemoteExecutor, RunpodRegistry, Ssh2Connector, TerminalPrompt, WorkloadNode,
    tunnel::DashboardTunnel,
};

mod cli;

use cli::{Cli, DashboardCommand, DownCommand, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("experiment config error: {0}")]
    Experiment(String),
    #[error("{phase} phase failed: {message}")]
    Phase { phase: &'static str, message: String },
    #[error("dashboard error: {0}")]
    Dashboard(String),
    #[error("no pod named {0} exists")]
    UnknownPod(String),
    #[error("provider error: {0}")]
    Provider(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gantry=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report_error(err: &CliError) {
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "error: {err}");
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
        Cli::Dashboard(command) => dashboard_command(command).await,
        Cli::Down(command) => down_command(command).await,
    }
}

fn load_config() -> Result<GantryConfig, CliError> {
    let config =
        GantryConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(config)
}

async fn run_command(args: RunCommand) -> Result<(), CliError> {
    let config = load_config()?;
    let config_path = Utf8PathBuf::from(&args.config_path);
    let master =
        MasterConfig::load(&config_path).map_err(|err| CliError::Experiment(err.to_string()))?;

    let registry = RunpodRegistry::new(config.api_key.clone());
    let connector = Ssh2Connector::new(config.verify_host_key);
    let resolver = CredentialResolver::new(config.ssh_defaults(), TerminalPrompt);
    let env_file = config.env_file_path();

    let finetune = NodePolicy::finetune(master.finetune_gpu(), env_file.clone());
    run_phase(
        "finetune",
        finetune,
        &registry,
        &connector,
        &resolver,
        &config_path,
        args.keep,
    )
    .await?;

    let inference = NodePolicy::inference(master.inference_gpu(), env_file);
    run_phase(
        "inference",
        inference,
        &registry,
        &connector,
        &resolver,
        &config_path,
        args.keep,
    )
    .await?;

    info!("experiment complete");
    Ok(())
}

/// Drives one experiment phase end to end: provision, push the experiment
/// config, stream the entrypoint, tear the pod down.
async fn run_phase(
    phase: &'static str,
    policy: NodePolicy,
    registry: &RunpodRegistry,
    connector: &Ssh2Connector,
    resolver: &CredentialResolver<TerminalPrompt>,
    config_path: &Utf8Path,
    keep: bool,
) -> Result<(), CliError> {
    let stage = |message: String| CliError::Phase { phase, message };

    let controller = LifecycleController::new(registry.clone());
    let executor = RemoteExecutor::new(connector.clone());
    let mut node = WorkloadNode::new(policy, controller, executor);

    node.provision(resolver)
        .await
        .map_err(|err| stage(err.to_string()))?;
    let remote_config = node
        .push_config(resolver, config_path)
        .map_err(|err| stage(err.to_string()))?;

    let stdout = io::stdout();
    let mut sink = stdout.lock();
    let task = node.run_task(resolver, &remote_config, &mut sink);
    drop(sink);

    // Tear the pod down even when the task failed; rental pods bill by the
    // minute.
    let teardown = if keep { Ok(()) } else { node.terminate().await };

    task.map_err(|err| stage(err.to_string()))?;
    teardown.map_err(|err| stage(err.to_string()))?;
    Ok(())
}

async fn dashboard_command(args: DashboardCommand) -> Result<(), CliError> {
    let config = load_config()?;
    let volume = config
        .network_volume_id
        .clone()
        .ok_or_else(|| {
            CliError::Config(String::from(
                "missing tracker network volume: set GANTRY_NETWORK_VOLUME_ID or add \
                 network_volume_id to gantry.toml",
            ))
        })?;

    let registry = RunpodRegistry::new(config.api_key.clone());
    let connector = Ssh2Connector::new(config.verify_host_key);
    let resolver = CredentialResolver::new(config.ssh_defaults(), TerminalPrompt);

    let policy = NodePolicy::tracker(volume, config.dashboard_port);
    let controller = LifecycleController::new(registry.clone());
    let executor = RemoteExecutor::new(connector.clone());
    let mut node = WorkloadNode::new(policy, controller, executor);

    node.provision(&resolver)
        .await
        .map_err(|err| CliError::Dashboard(err.to_string()))?;
    let endpoint = node
        .endpoint()
        .ok_or_else(|| CliError::Dashboard(String::from("tracker pod has no endpoint")))?;

    let credentials = resolver
        .resolve()
        .map_err(|err| CliError::Dashboard(err.to_string()))?;
    let local_port = args.local_port.unwrap_or(config.dashboard_port);
    let tunnel = DashboardTunnel::open(endpoint, &credentials, local_port, config.dashboard_port)
        .map_err(|err| CliError::Dashboard(err.to_string()))?;

    let mut stdout = io::stdout();
    let _ = writeln!(
        stdout,
        "dashboard available at {} (press Ctrl-C to close)",
        tunnel.local_url()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::Dashboard(err.to_string()))?;
    tunnel
        .close()
        .map_err(|err| CliError::Dashboard(err.to_string()))?;
    Ok(())
}

async fn down_command(args: DownCommand) -> Result<(), CliError> {
    use gantry::NodeRegistry;

    let config = load_config()?;
    let registry = RunpodRegistry::new(config.api_key);

    let pods = registry
        .list()
        .await
        .map_err(|err| CliError::Provider(err.to_string()))?;
    let pod = pods
        .into_iter()
        .find(|pod| pod.name == args.name)
        .ok_or_else(|| CliError::UnknownPod(args.name.clone()))?;

    registry
        .terminate(&pod.id)
        .await
        .map_err(|err| CliError::Provider(err.to_string()))?;
    info!(pod = %pod.name, "pod terminated");
    Ok(())
}

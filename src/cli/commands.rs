//! CLI command definitions for dockrun.
//!
//! Every command opens one Docker client from the global engine options and
//! drives it through a [`ContainerRunner`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use uuid::Uuid;

use crate::execution::{
    normalize_image_name, parse_registry, ClientPool, ContainerRunner, DeviceMapping, DriverMode,
    EngineConfig, ResourceLimits, RunRequestBuilder, DEFAULT_PULL_TIMEOUT,
};

/// Default registry when neither flag nor environment sets one.
const DEFAULT_REGISTRY: &str = crate::execution::image::DEFAULT_REGISTRY;

/// Supervised single-container runs on a Docker daemon.
#[derive(Parser)]
#[command(name = "dockrun")]
#[command(about = "Run a Docker container under supervision and collect its outcome")]
#[command(version)]
#[command(
    long_about = "dockrun creates a container, starts it, waits for it to exit within an execution budget, collects its logs and removes it.\n\nA budget of zero leaves the container running in detached mode.\n\nExample usage:\n  dockrun run alpine:3.19 --cmd \"echo hello\" --max-execution-time 60000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Daemon and registry options shared by every command.
#[derive(clap::Args, Debug, Clone)]
pub struct EngineArgs {
    /// Docker daemon address (unix:// or tcp://). Local defaults when unset.
    #[arg(long, env = "DOCKER_HOST", global = true)]
    pub docker_host: Option<String>,

    /// Registry the client authenticates against.
    #[arg(long, env = "DOCKRUN_REGISTRY", default_value = DEFAULT_REGISTRY, global = true)]
    pub registry: String,

    /// Registry username.
    #[arg(long, env = "DOCKRUN_REGISTRY_USERNAME", global = true)]
    pub registry_username: Option<String>,

    /// Registry password.
    #[arg(long, env = "DOCKRUN_REGISTRY_PASSWORD", global = true, hide_env_values = true)]
    pub registry_password: Option<String>,
}

impl EngineArgs {
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        EngineConfig::from_parts(
            self.docker_host.clone(),
            &self.registry,
            self.registry_username.clone(),
            self.registry_password.clone(),
        )
        .context("Invalid engine configuration")
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a container to completion (or detached) and report its outcome.
    Run(Box<RunArgs>),

    /// Stop a container, optionally removing it.
    Stop(StopArgs),

    /// Print the state of a container.
    Status(ContainerArgs),

    /// Print the logs of a container.
    Logs(ContainerArgs),

    /// Run a command inside a running container.
    Exec(ExecArgs),

    /// Pull an image.
    Pull(PullArgs),

    /// Image reference utilities.
    #[command(subcommand)]
    Image(ImageCommand),

    /// Network management.
    #[command(subcommand)]
    Network(NetworkCommand),

    /// Volume management.
    #[command(subcommand)]
    Volume(VolumeCommand),
}

/// Arguments for `dockrun run`.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Image to run. Required unless the request file names one.
    pub image: Option<String>,

    /// YAML file describing the request. Flags override its values.
    #[arg(short = 'f', long)]
    pub request: Option<String>,

    /// Container name. Defaults to `dockrun-<uuid>`.
    #[arg(long)]
    pub name: Option<String>,

    /// Command, as a whitespace-separated argument string.
    #[arg(long)]
    pub cmd: Option<String>,

    /// Entrypoint override. An empty string clears the image entrypoint.
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// Environment entry as KEY=VALUE. Repeatable.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Device as host[:container[:permissions]]. Repeatable.
    #[arg(long = "device")]
    pub devices: Vec<DeviceMapping>,

    /// Enclave driver mode (none, legacy, native).
    #[arg(long)]
    pub driver_mode: Option<DriverMode>,

    /// Network mode or user network name.
    #[arg(long)]
    pub network: Option<String>,

    /// Bind mount as host:container[:mode]. Repeatable.
    #[arg(short = 'v', long = "volume")]
    pub binds: Vec<String>,

    /// Container port to expose.
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Working directory inside the container.
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Execution budget in milliseconds. Zero or less runs detached.
    #[arg(short = 't', long, allow_negative_numbers = true)]
    pub max_execution_time: Option<i64>,

    /// Memory limit in megabytes.
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// CPU limit in cores.
    #[arg(long)]
    pub cpus: Option<f64>,

    /// Maximum number of processes.
    #[arg(long)]
    pub pids_limit: Option<u64>,

    /// Pull the image before running.
    #[arg(long)]
    pub pull: bool,

    /// Log the container output once the run is over.
    #[arg(long)]
    pub display_logs: bool,

    /// Output the run result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    /// Merges the optional request file with the flags.
    pub fn to_builder(&self) -> anyhow::Result<RunRequestBuilder> {
        let mut builder = match &self.request {
            Some(path) => RunRequestBuilder::from_yaml_file(path)
                .with_context(|| format!("Failed to load request file {path}"))?,
            None => RunRequestBuilder::default(),
        };

        if let Some(image) = &self.image {
            builder = builder.with_image(image);
        }
        if builder.image.trim().is_empty() {
            bail!("An image is required, either as argument or in the request file");
        }
        if let Some(name) = &self.name {
            builder = builder.with_container_name(name);
        }
        if builder.container_name.trim().is_empty() {
            builder = builder.with_container_name(format!("dockrun-{}", Uuid::new_v4().simple()));
        }
        if let Some(cmd) = &self.cmd {
            builder = builder.with_cmd(cmd);
        }
        if let Some(entrypoint) = &self.entrypoint {
            builder = builder.with_entrypoint(entrypoint);
        }
        if let Some(network) = &self.network {
            builder = builder.with_network_mode(network);
        }
        if let Some(port) = self.port {
            builder = builder.with_exposed_port(port);
        }
        if let Some(dir) = &self.workdir {
            builder = builder.with_working_dir(dir);
        }
        if let Some(millis) = self.max_execution_time {
            builder = builder.with_max_execution_time_ms(millis);
        }
        if self.driver_mode.is_some() {
            builder = builder.with_driver_mode(self.driver_mode);
        }
        if self.memory_mb.is_some() || self.cpus.is_some() || self.pids_limit.is_some() {
            let current = builder.host.limits.clone();
            builder = builder.with_limits(ResourceLimits {
                memory_mb: self.memory_mb.or(current.memory_mb),
                cpu_cores: self.cpus.or(current.cpu_cores),
                max_processes: self.pids_limit.or(current.max_processes),
            });
        }
        for bind in &self.binds {
            builder = builder.with_bind(bind);
        }
        if self.display_logs {
            builder = builder.with_display_logs(true);
        }

        Ok(builder
            .with_env_entries(self.env.iter().cloned())
            .with_devices(self.devices.iter().cloned()))
    }
}

/// Arguments for `dockrun stop`.
#[derive(Parser, Debug)]
pub struct StopArgs {
    /// Container name.
    pub name: String,

    /// Remove the container once stopped.
    #[arg(long)]
    pub rm: bool,
}

/// Arguments naming a single container.
#[derive(Parser, Debug)]
pub struct ContainerArgs {
    /// Container name.
    pub name: String,
}

/// Arguments for `dockrun exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub name: String,

    /// Command and its arguments.
    #[arg(trailing_var_arg = true, required = true)]
    pub cmd: Vec<String>,
}

/// Arguments for `dockrun pull`.
#[derive(Parser, Debug)]
pub struct PullArgs {
    /// Image reference, with a tag.
    pub image: String,

    /// Pull timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_PULL_TIMEOUT.as_secs())]
    pub timeout: u64,
}

/// `dockrun image` subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum ImageCommand {
    /// Print the short form of an image reference.
    Normalize { image: String },
    /// Print the registry an image reference points to.
    Registry { image: String },
    /// Print the id of a local image.
    Id { image: String },
    /// Remove a local image.
    Rm { image: String },
}

/// `dockrun network` subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a bridge network unless it exists.
    Create { name: String },
    /// Remove a network.
    Rm { name: String },
}

/// `dockrun volume` subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum VolumeCommand {
    /// Create a volume unless it exists.
    Create { name: String },
    /// Remove a volume.
    Rm { name: String },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let engine = cli.engine;
    match cli.command {
        Commands::Run(args) => {
            let runner = open_runner(&engine)?;
            run_run_command(&runner, *args).await
        }
        Commands::Stop(args) => {
            let runner = open_runner(&engine)?;
            let done = if args.rm {
                runner.stop_and_remove(&args.name).await
            } else {
                runner.stop_container(&args.name).await
            };
            ensure_done(done, || format!("Failed to stop container '{}'", args.name))
        }
        Commands::Status(args) => {
            let state = open_runner(&engine)?.container_state(&args.name).await;
            println!("{state}");
            Ok(())
        }
        Commands::Logs(args) => {
            let logs = open_runner(&engine)?
                .container_logs(&args.name)
                .await
                .with_context(|| format!("No logs for container '{}'", args.name))?;
            print!("{}", logs.stdout);
            eprint!("{}", logs.stderr);
            Ok(())
        }
        Commands::Exec(args) => {
            let logs = open_runner(&engine)?
                .exec(&args.name, &args.cmd)
                .await
                .with_context(|| format!("Failed to exec in container '{}'", args.name))?;
            print!("{}", logs.stdout);
            eprint!("{}", logs.stderr);
            Ok(())
        }
        Commands::Pull(args) => {
            let pulled = open_runner(&engine)?
                .pull_image(&args.image, Duration::from_secs(args.timeout))
                .await;
            ensure_done(pulled, || format!("Failed to pull image '{}'", args.image))
        }
        Commands::Image(command) => run_image_command(&engine, command).await,
        Commands::Network(NetworkCommand::Create { name }) => {
            let id = open_runner(&engine)?
                .create_network(&name)
                .await
                .with_context(|| format!("Failed to create network '{name}'"))?;
            println!("{id}");
            Ok(())
        }
        Commands::Network(NetworkCommand::Rm { name }) => {
            let removed = open_runner(&engine)?.remove_network(&name).await;
            ensure_done(removed, || format!("Failed to remove network '{name}'"))
        }
        Commands::Volume(VolumeCommand::Create { name }) => {
            let created = open_runner(&engine)?.create_volume(&name).await;
            ensure_done(created, || format!("Failed to create volume '{name}'"))
        }
        Commands::Volume(VolumeCommand::Rm { name }) => {
            let removed = open_runner(&engine)?.remove_volume(&name).await;
            ensure_done(removed, || format!("Failed to remove volume '{name}'"))
        }
    }
}

/// Reference utilities run without a daemon; lookups and removal need one.
async fn run_image_command(engine: &EngineArgs, command: ImageCommand) -> anyhow::Result<()> {
    match command {
        ImageCommand::Normalize { image } => {
            println!("{}", normalize_image_name(&image));
            Ok(())
        }
        ImageCommand::Registry { image } => {
            println!("{}", parse_registry(&image));
            Ok(())
        }
        ImageCommand::Id { image } => {
            let id = open_runner(engine)?
                .image_id(&image)
                .await
                .with_context(|| format!("Image '{image}' not found"))?;
            println!("{id}");
            Ok(())
        }
        ImageCommand::Rm { image } => {
            let removed = open_runner(engine)?.remove_image(&image).await;
            ensure_done(removed, || format!("Failed to remove image '{image}'"))
        }
    }
}

fn open_runner(engine: &EngineArgs) -> anyhow::Result<Arc<ContainerRunner>> {
    let config = engine.engine_config()?;
    let pool: ClientPool = ClientPool::new();
    pool.get_or_open(&config)
        .context("Failed to connect to the Docker daemon")
}

async fn run_run_command(runner: &ContainerRunner, args: RunArgs) -> anyhow::Result<()> {
    let request = args
        .to_builder()?
        .build()
        .context("Invalid run request")?;

    if args.pull && !runner.pull_image(request.image(), DEFAULT_PULL_TIMEOUT).await {
        bail!("Failed to pull image '{}'", request.image());
    }

    let result = runner.run(&request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n=== Run Result ===");
        println!("Container:  {}", request.container_name());
        println!("Status:     {}", result.status);
        println!("Exit code:  {}", result.exit_code);
        if let Some(duration) = result.execution_duration {
            println!("Duration:   {:.3}s", duration.as_secs_f64());
        }
        if result.detached {
            println!("Detached:   container left running");
        }
        if !result.stdout().is_empty() {
            println!("\n--- stdout ---\n{}", result.stdout());
        }
        if !result.stderr().is_empty() {
            println!("\n--- stderr ---\n{}", result.stderr());
        }
    }

    info!(
        container = %request.container_name(),
        status = %result.status,
        exit_code = result.exit_code,
        "Run finished"
    );
    if !result.is_success() {
        bail!("Container '{}' finished with status {}", request.container_name(), result.status);
    }
    Ok(())
}

fn ensure_done(done: bool, message: impl FnOnce() -> String) -> anyhow::Result<()> {
    if done {
        Ok(())
    } else {
        bail!(message())
    }
}

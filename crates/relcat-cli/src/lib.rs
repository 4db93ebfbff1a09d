//! relcat CLI - Command-line interface for the release catalog
//!
//! Pipeline steps call this CLI to:
//! - Create component versions and record build metadata on them
//! - Assign component versions to new application versions
//! - Deploy application versions, or log deployments that ran elsewhere
//! - Record a running cluster as an application version
//! - Merge key/value configuration files into component attributes
//! - Approve and move application versions between domains

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use relcat_client::{CatalogApi, HttpCatalog};
use relcat_engine::EngineConfig;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod commands;
pub mod component_config;
pub mod config;
pub mod deploy_data;
pub mod error;
pub mod kv_config;
pub mod output;
pub mod shell;

use commands::{approve, assign, cluster, deploy, envscript, kv, move_app, updatecomp};
use component_config::{ComponentConfig, DEFAULT_RSP};
use config::CliConfig;
pub use error::{CliError, CliResult};
use output::OutputFormat;
use shell::ShellRunner;

/// relcat CLI application
#[derive(Parser)]
#[command(name = "relcat")]
#[command(about = "relcat - Release catalog client", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELCAT_CONFIG", global = true)]
    config: Option<String>,

    /// Catalog service URL
    #[arg(long, env = "RELCAT_URL", global = true)]
    url: Option<String>,

    /// Catalog user
    #[arg(long, env = "RELCAT_USER", global = true)]
    user: Option<String>,

    /// Catalog password
    #[arg(long, env = "RELCAT_PASS", hide_env_values = true, global = true)]
    pass: Option<String>,

    /// Component response file (TOML or JSON)
    #[arg(long, default_value = DEFAULT_RSP, global = true)]
    rsp: PathBuf,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Deploy an application version, or log a deployment from a deploy data file
    Deploy(deploy::DeployArgs),

    /// Assign existing component versions to a new application version
    Assign(assign::AssignArgs),

    /// Create or replace a component version and assign it to an application version
    Updatecomp(updatecomp::UpdateCompArgs),

    /// Record the workloads of a cluster as an application version
    Cluster(cluster::ClusterArgs),

    /// Merge key/value configuration files into a component version's attributes
    Kv(kv::KvArgs),

    /// Approve an application version
    Approve(approve::ApproveArgs),

    /// Move an application version out of a domain using a domain task
    Move(move_app::MoveArgs),

    /// Write a shell script exporting build variables
    Envscript(envscript::EnvScriptArgs),

    /// Show configuration
    Config,
}

/// Everything a catalog command needs, built once per invocation
pub struct Session {
    pub catalog: Arc<dyn CatalogApi>,
    pub engine: EngineConfig,
    pub output: OutputFormat,
    /// The component response file, empty when there is none
    pub component: ComponentConfig,
}

impl Session {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        engine: EngineConfig,
        output: OutputFormat,
        component: ComponentConfig,
    ) -> Self {
        Self {
            catalog,
            engine,
            output,
            component,
        }
    }
}

/// Catalog credentials after flags, environment and config file are merged
#[derive(Debug)]
struct Credentials {
    url: String,
    user: String,
    pass: String,
}

impl Credentials {
    /// Flags and `RELCAT_*` first, then the legacy `DH*` variables, then the
    /// config file
    fn resolve(cli: &Cli, config: &CliConfig) -> CliResult<Self> {
        let legacy = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let url = cli
            .url
            .clone()
            .or_else(|| legacy("DHURL"))
            .or_else(|| config.url.clone());
        let user = cli
            .user
            .clone()
            .or_else(|| legacy("DHUSER"))
            .or_else(|| config.user.clone());
        let pass = cli.pass.clone().or_else(|| legacy("DHPASS"));

        match (url, user, pass) {
            (Some(url), Some(user), Some(pass)) => Ok(Self { url, user, pass }),
            _ => Err(CliError::Config(
                "catalog url, user and password are required (--url, --user, --pass)".into(),
            )),
        }
    }
}

async fn connect(cli: &Cli, config: &CliConfig) -> CliResult<Session> {
    let credentials = Credentials::resolve(cli, config)?;

    let mut catalog = HttpCatalog::new(&credentials.url)?;
    catalog.login(&credentials.user, &credentials.pass).await?;
    info!(url = %credentials.url, user = %credentials.user, "Logged in");

    let component = load_component_config(&cli.rsp)?;

    Ok(Session::new(
        Arc::new(catalog),
        config.engine_config(),
        cli.output,
        component,
    ))
}

/// The response file, or a name derived from the git checkout when the
/// file does not exist
fn load_component_config(path: &std::path::Path) -> CliResult<ComponentConfig> {
    if path.exists() {
        return ComponentConfig::load(path);
    }
    Ok(ComponentConfig::from_git(&ShellRunner).unwrap_or_default())
}

/// Resolves once the user interrupts the process
pub(crate) async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    // Load config
    let config = CliConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Envscript(args) => envscript::execute(args, &cli.rsp, cli.output),
        Commands::Config => show_config(&cli, &config),
        command => {
            let session = connect(&cli, &config).await?;
            match command {
                Commands::Deploy(args) => deploy::execute(args, &session).await,
                Commands::Assign(args) => assign::execute(args, &session).await,
                Commands::Updatecomp(args) => updatecomp::execute(args, &session).await,
                Commands::Cluster(args) => cluster::execute(args, &session).await,
                Commands::Kv(args) => kv::execute(args, &session).await,
                Commands::Approve(args) => approve::execute(args, &session).await,
                Commands::Move(args) => move_app::execute(args, &session).await,
                Commands::Envscript(_) | Commands::Config => Ok(()),
            }
        }
    }
}

#[derive(serde::Serialize)]
struct ConfigView<'a> {
    config_file: Option<String>,
    url: Option<&'a str>,
    user: Option<&'a str>,
    response_file: String,
    poll_interval_secs: u64,
    deploy_timeout_secs: u64,
    max_version_attempts: usize,
}

fn show_config(cli: &Cli, config: &CliConfig) -> CliResult<()> {
    let engine = config.engine_config();
    let config_file = match &cli.config {
        Some(path) => Some(path.clone()),
        None => CliConfig::default_config_path()
            .ok()
            .map(|p| p.display().to_string()),
    };

    let view = ConfigView {
        config_file,
        url: cli.url.as_deref().or(config.url.as_deref()),
        user: cli.user.as_deref().or(config.user.as_deref()),
        response_file: cli.rsp.display().to_string(),
        poll_interval_secs: engine.poll_interval.as_secs(),
        deploy_timeout_secs: engine.deploy_timeout.as_secs(),
        max_version_attempts: engine.max_version_attempts,
    };

    if cli.output.is_human() {
        println!("Config file: {}", view.config_file.as_deref().unwrap_or("-"));
        println!("URL: {}", view.url.unwrap_or("-"));
        println!("User: {}", view.user.unwrap_or("-"));
        println!("Response file: {}", view.response_file);
        println!("Poll interval: {}s", view.poll_interval_secs);
        println!("Deploy timeout: {}s", view.deploy_timeout_secs);
        println!("Max version attempts: {}", view.max_version_attempts);
        Ok(())
    } else {
        output::print_single(&view, cli.output)
    }
}

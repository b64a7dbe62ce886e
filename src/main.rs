use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use mongoctl::auth::Login;
use mongoctl::config::Config;
use mongoctl::error::{ErrorSeverity, MongoctlError};
use mongoctl::{Mongoctl, RunOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongoctl")]
#[command(about = "Lifecycle and topology manager for MongoDB servers and clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "mongoctl.toml")]
    config: PathBuf,

    /// Treat these servers as local to this machine
    #[arg(long = "assume-local", global = true, value_name = "SERVER_ID", num_args = 1..)]
    assume_local: Vec<String>,

    /// Username for the admin database
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Password for the admin database
    #[arg(short, long, global = true, requires = "username")]
    password: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sharded cluster and add any missing shard
    StartCluster { cluster: String },
    /// Stop the routers of a sharded cluster
    StopCluster { cluster: String },
    /// Add every shard of a new sharded cluster
    ConfigureCluster {
        cluster: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Add a shard to its sharded cluster
    AddShard {
        shard: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Drain and remove a shard from its sharded cluster
    RemoveShard {
        shard: String,
        /// Shard that receives the unsharded databases of the removed shard
        #[arg(long)]
        unsharded_data_destination: Option<String>,
        /// Wait until the drain completes
        #[arg(long)]
        synchronized: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the connection URI template of a server or cluster
    PrintUri {
        id: String,
        #[arg(long)]
        db: Option<String>,
    },
    /// List configured servers and whether they are online
    ListServers,
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

/// Print `e` with its severity. Informational outcomes still exit successfully.
fn report_error(e: &anyhow::Error) -> ExitCode {
    let severity = e
        .downcast_ref::<MongoctlError>()
        .map(MongoctlError::severity)
        .unwrap_or(ErrorSeverity::Error);

    match severity {
        ErrorSeverity::Info => {
            eprintln!("{:#}", e);
            ExitCode::SUCCESS
        }
        severity => {
            eprintln!("{}: {:#}", severity, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Config { output } => return generate_config(output),
        Commands::Version => {
            show_version();
            return Ok(());
        }
        Commands::Validate => return validate_config(&cli.config),
        _ => {}
    }

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    init_logging(&config, cli.verbose)?;
    info!("Configuration loaded from: {:?}", cli.config);

    let options = RunOptions {
        assume_local: cli.assume_local.clone(),
        login: cli
            .username
            .clone()
            .map(|username| Login::new(username, cli.password.clone())),
    };
    let app = Mongoctl::from_config(&config, options);

    match cli.command {
        Commands::StartCluster { cluster } => app.start_cluster(&cluster).await?,
        Commands::StopCluster { cluster } => app.stop_cluster(&cluster).await?,
        Commands::ConfigureCluster { cluster, dry_run } => {
            app.configure_shard_cluster(&cluster, dry_run).await?;
        }
        Commands::AddShard { shard, dry_run } => {
            app.add_shard(&shard, dry_run).await?;
        }
        Commands::RemoveShard {
            shard,
            unsharded_data_destination,
            synchronized,
            dry_run,
        } => {
            app.remove_shard(&shard, unsharded_data_destination.as_deref(), synchronized, dry_run)
                .await?;
        }
        Commands::PrintUri { id, db } => {
            println!("{}", app.connection_uri_template(&id, db.as_deref())?);
        }
        Commands::ListServers => list_servers(&app).await,
        Commands::Config { .. } | Commands::Validate | Commands::Version => {}
    }

    Ok(())
}

async fn list_servers(app: &Mongoctl) {
    let servers = app.list_servers().await;
    if servers.is_empty() {
        info!("No servers have been configured.");
        return;
    }

    let bar = "-".repeat(105);
    println!("{}", bar);
    println!("{:<25} {:<50} {:<20} {}", "_ID", "DESCRIPTION", "STATUS", "CONNECT TO");
    println!("{}", bar);
    for server in servers {
        let status = if server.status.is_healthy() { "online" } else { "offline" };
        println!(
            "{:<25} {:<50} {:<20} {}",
            server.id,
            server.description.unwrap_or_default(),
            status,
            server.connect_to
        );
    }
    println!();
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  mongoctl --config {:?} start-cluster main", output);

    Ok(())
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    let config = Config::load_from_file(config_path).context("Configuration file validation failed")?;
    let app = Mongoctl::from_config(&config, RunOptions::default());
    for cluster in &config.clusters {
        app.repository()
            .lookup_and_validate_cluster(cluster.id())
            .with_context(|| format!("Cluster '{}' is invalid", cluster.id()))?;
    }

    println!("✓ Configuration file is valid");
    println!("  Servers: {}", config.servers.len());
    println!("  Clusters: {}", config.clusters.len());
    for cluster in &config.clusters {
        println!("    {}", cluster.id());
    }

    Ok(())
}

fn show_version() {
    println!("mongoctl v{}", env!("CARGO_PKG_VERSION"));
    println!("Lifecycle and topology manager for MongoDB servers, replica sets and sharded clusters");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
}

fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

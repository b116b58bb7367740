use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use shareddatalayer::config::{Config, DB_HOST_ENV};
use shareddatalayer::discovery::{address_index, create_discovery};
use shareddatalayer::redis::{self, ContentsBuilder, DispatcherOptions};
use shareddatalayer::{DatabaseInfo, DispatcherError, Engine, Reply, TokioEngine};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Namespace used for connectivity checks
const TOOL_NAMESPACE: &str = "sdltool";

#[derive(Parser)]
#[command(name = "sdltool")]
#[command(about = "Shared data layer configuration and backend connectivity tool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "shareddatalayer-team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configuration in effect and where it comes from
    DumpConfiguration {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Discover the backend, connect and send PING
    TestConnectivity {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_sec: u64,
    },
    /// Generate example configuration files
    Config {
        /// Database type (redis-standalone, redis-cluster, redis-sentinel,
        /// sdl-standalone-cluster, sdl-sentinel-cluster)
        #[arg(short = 't', long = "type")]
        db_type: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::DumpConfiguration { config } => dump_configuration(config),
        Commands::TestConnectivity {
            config,
            timeout_sec,
        } => test_connectivity(config, Duration::from_secs(timeout_sec)),
        Commands::Config { db_type, output } => generate_config(db_type, output),
        Commands::Validate { config } => validate_config(config),
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

fn dump_configuration(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    match &config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            println!("Configuration file {:?}:", path);
            for (number, line) in content.lines().enumerate() {
                println!("{:4}: {}", number + 1, line);
            }
        }
        None => println!("No configuration file given, using defaults"),
    }
    println!();

    match std::env::var(DB_HOST_ENV) {
        Ok(host) => println!(
            "{} is set ({:?}): database section comes from the environment",
            DB_HOST_ENV, host
        ),
        Err(_) => println!("{} is not set", DB_HOST_ENV),
    }

    let config = Config::load(config_path.as_ref()).context("Configuration is not valid")?;
    println!("Effective configuration:");
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn test_connectivity(config_path: Option<PathBuf>, limit: Duration) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_ref())
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    let result = local.block_on(&runtime, async {
        tokio::time::timeout(limit, check_backend(&config))
            .await
            .unwrap_or_else(|_| Err(anyhow!("No answer within {:?}", limit)))
    });

    match &result {
        Ok(()) => println!("✓ Backend is reachable"),
        Err(e) => eprintln!("✗ Connectivity test failed: {:#}", e),
    }
    result
}

async fn check_backend(config: &Config) -> anyhow::Result<()> {
    let engine: Rc<dyn Engine> = Rc::new(TokioEngine::new());
    let index = address_index(&config.database, TOOL_NAMESPACE);
    let discovery = create_discovery(
        engine.clone(),
        TOOL_NAMESPACE,
        &config.database,
        index,
        &config.dispatcher,
    )?;

    let (info_tx, mut info_rx) = mpsc::unbounded_channel::<DatabaseInfo>();
    discovery.set_state_changed_cb(Box::new(move |info| {
        let _ = info_tx.send(info.clone());
    }));
    let database_info = info_rx
        .recv()
        .await
        .context("Discovery stopped without reporting a backend")?;
    println!("Discovered {}", database_info);

    let dispatcher = redis::create(
        engine,
        &database_info,
        Rc::new(ContentsBuilder::default()),
        DispatcherOptions::default(),
        &config.dispatcher,
    )?;

    let (connected_tx, connected_rx) = oneshot::channel();
    dispatcher.wait_connected_async(Box::new(move || {
        let _ = connected_tx.send(());
    }));
    connected_rx.await?;
    info!("Connected to {}", database_info);

    let (reply_tx, reply_rx) = oneshot::channel::<(Result<(), DispatcherError>, Reply)>();
    let mut reply_tx = Some(reply_tx);
    dispatcher.dispatch_async(
        Box::new(move |result, reply| {
            if let Some(tx) = reply_tx.take() {
                let _ = tx.send((result, reply.clone()));
            }
        }),
        TOOL_NAMESPACE,
        ContentsBuilder::default().build(&["PING"]),
    );

    let (result, reply) = reply_rx.await?;
    dispatcher.disable_command_callbacks();
    discovery.clear_state_changed_cb();
    match result {
        Ok(()) => {
            println!("PING: {}", reply.as_str_lossy());
            Ok(())
        }
        Err(e) => bail!("PING failed: {} ({:?})", e, e.internal_error().client_error()),
    }
}

fn generate_config(db_type: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", db_type, output);

    Config::create_example_config(&output, &db_type).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  sdltool test-connectivity --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Database type: {}", config.database.db_type);
            let servers = config.database.server_addresses()?;
            println!("  Servers: {} instances", servers.len());
            for (i, server) in servers.iter().enumerate() {
                println!("    {}: {}", i + 1, server);
            }
            if config.database.db_type.uses_sentinel() {
                for i in 0..servers.len() {
                    if let Some(sentinel) = config.database.sentinel_address(i)? {
                        println!(
                            "  Sentinel {}: {} (master group {})",
                            i + 1,
                            sentinel,
                            config.database.sentinel_master_name(i)
                        );
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            eprintln!("  {}", e);
            Err(e.into())
        }
    }
}

fn show_version() {
    println!("sdltool v{}", env!("CARGO_PKG_VERSION"));
    println!("Shared data layer configuration and connectivity tool");
    println!();
    println!(
        "Built with Rust {}",
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
    );
    println!("Target: {}", std::env::consts::ARCH);
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}

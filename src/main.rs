use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use image_server::{Config, create_app, library::Library, metadata, startup_checks};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the image server (default if no command specified)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Content root; each subdirectory is served as a group
        #[arg(long, env = "BASE_DIRECTORY")]
        base_directory: Option<PathBuf>,

        /// Automatically quit after specified number of seconds (useful for testing)
        #[arg(long)]
        quit_after: Option<u64>,
    },
}

#[derive(Debug, Default)]
struct ServeOptions {
    port: Option<u16>,
    host: Option<String>,
    base_directory: Option<PathBuf>,
    quit_after: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging first
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Some(Commands::Serve {
            port,
            host,
            base_directory,
            quit_after,
        }) => {
            run_server(
                cli.config,
                ServeOptions {
                    port,
                    host,
                    base_directory,
                    quit_after,
                },
            )
            .await
        }
        None => {
            // Default to serve; the environment still supplies the content root.
            let base_directory = std::env::var_os("BASE_DIRECTORY").map(PathBuf::from);
            run_server(
                cli.config,
                ServeOptions {
                    base_directory,
                    ..ServeOptions::default()
                },
            )
            .await
        }
    }
}

async fn run_server(
    config_path: PathBuf,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        let config_content = std::fs::read_to_string(&config_path)?;
        toml_edit::de::from_str::<Config>(&config_content)?
    } else {
        info!("Config file not found at {:?}, using defaults", config_path);
        Config::default()
    };

    if let Some(base_directory) = options.base_directory {
        config.catalog.base_directory = base_directory;
    }

    let host = options.host.unwrap_or(config.server.host.clone());
    let port = options.port.unwrap_or(config.server.port);

    info!("Starting {} server", config.app.name);
    info!("Configuration loaded from: {:?}", config_path);
    info!("Base directory: {:?}", config.catalog.base_directory);
    info!("Metadata prefix: {}", config.metadata.prefix);

    match startup_checks::perform_startup_checks(&config).await {
        Ok(()) => info!("All startup checks passed"),
        Err(errors) => {
            for error in &errors {
                tracing::error!("Startup check failed: {}", error);
            }

            if errors.iter().any(|e| e.is_critical()) {
                tracing::error!("Critical startup check failed, exiting");
                return Err("Critical startup check failed".into());
            } else {
                tracing::warn!("Non-critical startup checks failed, continuing");
            }
        }
    }

    let store = metadata::create_store(&config.metadata.backend).await?;
    let library = Library::start(&config.catalog, store, &config.metadata.prefix).await?;

    // A group that cannot finish its initial load (usually an unreachable
    // metadata store) takes the whole process down.
    let fatal = CancellationToken::new();
    {
        let library = library.clone();
        let fatal = fatal.clone();
        tokio::spawn(async move {
            match library.wait_for_initial_load().await {
                Ok(()) => info!("All groups loaded"),
                Err(e) => {
                    tracing::error!("Initial load failed, shutting down: {}", e);
                    fatal.cancel();
                }
            }
        });
    }

    let app = create_app(config.clone(), library.clone());

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(shutdown_signal(options.quit_after, fatal.clone()));

    if let Err(e) = graceful.await {
        tracing::error!("Server error: {}", e);
    }

    library.shutdown().await;

    if fatal.is_cancelled() {
        return Err("Initial load failed".into());
    }

    Ok(())
}

async fn shutdown_signal(quit_after: Option<u64>, fatal: CancellationToken) {
    use tokio::signal;
    use tokio::time::{Duration, sleep};

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let quit_timer = async {
        if let Some(seconds) = quit_after {
            info!(
                "Server will automatically shut down after {} seconds",
                seconds
            );
            sleep(Duration::from_secs(seconds)).await;
            info!("Quit timer expired, shutting down");
        } else {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        },
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        },
        _ = quit_timer => {},
        _ = fatal.cancelled() => {},
    }
}

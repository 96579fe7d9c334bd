use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use snapshelf::{Config, create_app, library::ImageLibrary, startup_checks};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `snapshelf=debug,access_log=warn`.
    /// Defaults to `app.log_level` from the config file; `RUST_LOG` wins over both.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the web server (default if no command specified)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Automatically quit after specified number of seconds (useful for testing)
        #[arg(long)]
        quit_after: Option<u64>,
    },

    /// Inspect or prune stored images
    #[command(subcommand)]
    Images(ImageCommands),
}

#[derive(Subcommand, Debug)]
enum ImageCommands {
    /// List all image records
    List,
    /// Remove images and their files by id
    Remove {
        /// Ids of the images to remove
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config)?;
    let config_found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.app.log_level.clone());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !config_found {
        info!("Config file not found at {:?}, using defaults", cli.config);
    }

    match cli.command {
        Some(Commands::Images(image_cmd)) => handle_image_command(config, image_cmd).await,
        Some(Commands::Serve {
            port,
            host,
            quit_after,
        }) => run_server(config, &cli.config, port, host, quit_after).await,
        None => run_server(config, &cli.config, None, None, None).await,
    }
}

fn load_config(config_path: &Path) -> Result<Option<Config>, Box<dyn std::error::Error>> {
    if config_path.exists() {
        let config_content = std::fs::read_to_string(config_path)?;
        Ok(Some(toml_edit::de::from_str::<Config>(&config_content)?))
    } else {
        Ok(None)
    }
}

async fn handle_image_command(
    config: Config,
    cmd: ImageCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let library = ImageLibrary::new(config.storage);

    match cmd {
        ImageCommands::List => {
            let records = library.store().load_all().await?;
            if records.is_empty() {
                println!("No images in {}", library.store().path().display());
            } else {
                println!("Images in {}:", library.store().path().display());
                for record in records {
                    println!(
                        "  {:>5}  {}  {} ({}, {} bytes, {})",
                        record.id,
                        record.backing_file_name(),
                        record.file_title,
                        record.file_type,
                        record.file_size,
                        record.file_created_at.to_rfc3339()
                    );
                }
            }
        }
        ImageCommands::Remove { ids } => {
            let ids: Vec<serde_json::Value> = ids.into_iter().map(Into::into).collect();
            let outcome = library.delete(&ids).await?;
            for record in &outcome.deleted_images {
                println!("Removed image {} ({})", record.id, record.file_title);
            }
            for id in &outcome.not_found_ids {
                eprintln!("No image with id {}", id);
            }
            println!("Removed {} images", outcome.deleted_count);
        }
    }

    Ok(())
}

async fn run_server(
    config: Config,
    config_path: &Path,
    port: Option<u16>,
    host: Option<String>,
    quit_after: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = host.unwrap_or(config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!("Starting {} server", config.app.name);
    info!("Configuration loaded from: {:?}", config_path);
    info!("Metadata store: {:?}", config.storage.data_file);
    info!("Image directory: {:?}", config.storage.image_directory);
    info!(
        "Static files directory: {:?}",
        config.static_files.directory
    );

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

    let app = create_app(config.clone()).await;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(shutdown_signal(quit_after));

    if let Err(e) = graceful.await {
        tracing::error!("Server error: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(quit_after: Option<u64>) {
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
    }
}

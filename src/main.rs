use anyhow::Result;
use folder_store::{
    AppError, Drive, DriveOptions, SqliteObjectStore, config::AppConfig,
    handlers::command_handlers::handle_command,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, path::Path, process::ExitCode, str::FromStr, sync::Arc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting folder-store with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options =
        SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    let store = SqliteObjectStore::new(db, cfg.storage_dir.clone());
    store.migrate().await?;

    // --- Initialize the folder layer ---
    let drive = Drive::new(
        Arc::new(store),
        DriveOptions {
            bucket: cfg.bucket.clone(),
            max_storage_size: cfg.max_storage_size,
            list_page_size: cfg.list_page_size,
            max_concurrent_ops: cfg.max_concurrent_ops,
            temp_dir: cfg.temp_dir.clone(),
        },
    );
    if let Err(err) = drive.init().await {
        let report = AppError::from(err);
        eprintln!("{}", report.to_json());
        return Ok(ExitCode::FAILURE);
    }

    match handle_command(&drive, command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(report) => {
            eprintln!("{}", report.to_json());
            Ok(ExitCode::FAILURE)
        }
    }
}

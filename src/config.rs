use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::{env, path::PathBuf};

const KB: u64 = 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    /// Per-user ceiling in bytes.
    pub max_storage_size: u64,
    pub list_page_size: usize,
    pub max_concurrent_ops: usize,
    pub temp_dir: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Per-user folders on a flat object store")]
pub struct Args {
    /// Directory where object payloads are stored (overrides FOLDER_STORE_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FOLDER_STORE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Bucket holding every user prefix (overrides FOLDER_STORE_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Per-user limit such as `40MB` or `1GB` (overrides FOLDER_STORE_MAX_STORAGE_SIZE)
    #[arg(long, global = true)]
    pub max_storage_size: Option<String>,

    /// Keys fetched per listing page (overrides FOLDER_STORE_LIST_PAGE_SIZE)
    #[arg(long, global = true)]
    pub list_page_size: Option<usize>,

    /// Store calls in flight during a folder rename (overrides FOLDER_STORE_MAX_CONCURRENT_OPS)
    #[arg(long, global = true)]
    pub max_concurrent_ops: Option<usize>,

    /// Directory for zip exports in progress (overrides FOLDER_STORE_TEMP_DIR)
    #[arg(long, global = true)]
    pub temp_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Authenticated caller, as supplied by the surrounding application.
#[derive(ClapArgs, Debug, Clone)]
pub struct Identity {
    #[arg(long)]
    pub user_id: i64,

    #[arg(long)]
    pub username: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the root folder of a newly registered user
    Provision {
        #[command(flatten)]
        identity: Identity,
    },
    /// List a folder
    Ls {
        #[command(flatten)]
        identity: Identity,
        /// Folder path relative to the user root
        #[arg(default_value = "")]
        path: String,
    },
    /// Create a folder
    Mkdir {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
    },
    /// Delete a folder and everything below it
    Rmdir {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
    },
    /// Rename a folder
    Mvdir {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        old_name: String,
        new_name: String,
    },
    /// Upload a local directory as a new folder
    UploadDir {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        local: PathBuf,
        /// Folder name; defaults to the local directory's name
        #[arg(long)]
        name: Option<String>,
    },
    /// Upload a local file
    Upload {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        local: PathBuf,
        /// File name; defaults to the local file's name
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a file
    Rm {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
    },
    /// Rename a file
    Mv {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        old_name: String,
        new_name: String,
    },
    /// Download a file
    Get {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a file's size in bytes
    Size {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
    },
    /// Export a folder as a zip archive
    Zip {
        #[command(flatten)]
        identity: Identity,
        #[arg(long, default_value = "")]
        path: String,
        name: String,
        /// Output archive
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Find files and folders by name
    Search {
        #[command(flatten)]
        identity: Identity,
        query: String,
    },
    /// Show storage usage
    Usage {
        #[command(flatten)]
        identity: Identity,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let cfg = Self::resolve(&args, |name| env::var(name).ok())?;
        Ok((cfg, args.command))
    }

    /// Merge CLI flags over values from `lookup` over defaults.
    pub fn resolve(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_usize = |name: &str, default: usize| -> Result<usize> {
            match lookup(name) {
                Some(value) => value
                    .parse::<usize>()
                    .with_context(|| format!("parsing {} value `{}`", name, value)),
                None => Ok(default),
            }
        };

        let max_size_raw = args
            .max_storage_size
            .clone()
            .or_else(|| lookup("FOLDER_STORE_MAX_STORAGE_SIZE"))
            .unwrap_or_else(|| "40MB".into());
        let max_storage_size = parse_storage_size(&max_size_raw)
            .with_context(|| format!("parsing max storage size `{}`", max_size_raw))?;

        let list_page_size = match args.list_page_size {
            Some(value) => value,
            None => parse_usize("FOLDER_STORE_LIST_PAGE_SIZE", 1000)?,
        };
        let max_concurrent_ops = match args.max_concurrent_ops {
            Some(value) => value,
            None => parse_usize("FOLDER_STORE_MAX_CONCURRENT_OPS", 16)?,
        };

        Ok(Self {
            storage_dir: args
                .storage_dir
                .clone()
                .or_else(|| lookup("FOLDER_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .clone()
                .or_else(|| lookup("FOLDER_STORE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/folder_store.db".into()),
            bucket: args
                .bucket
                .clone()
                .or_else(|| lookup("FOLDER_STORE_BUCKET"))
                .unwrap_or_else(|| "user-files".into()),
            max_storage_size,
            list_page_size,
            max_concurrent_ops,
            temp_dir: args
                .temp_dir
                .clone()
                .or_else(|| lookup("FOLDER_STORE_TEMP_DIR").map(PathBuf::from)),
        })
    }
}

/// Parse a human size such as `40MB`, `1gb` or `512` into bytes.
///
/// Units are binary (`KB` = 1024) and case-insensitive; a bare number or a
/// `B` suffix means bytes.
pub fn parse_storage_size(raw: &str) -> Result<u64> {
    let normalized = raw.trim().to_ascii_uppercase();
    let units: [(&str, u64); 5] = [
        ("TB", KB * KB * KB * KB),
        ("GB", KB * KB * KB),
        ("MB", KB * KB),
        ("KB", KB),
        ("B", 1),
    ];

    let (digits, multiplier) = units
        .iter()
        .find_map(|(suffix, mult)| normalized.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((normalized.as_str(), 1));

    let digits = digits.trim();
    if digits.is_empty() {
        bail!("missing number in storage size `{}`", raw);
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid number in storage size `{}`", raw))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("storage size `{}` is too large", raw))
}

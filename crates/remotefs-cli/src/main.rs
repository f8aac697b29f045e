//! remotefs: browse and move files on a Jupyter server running spyder-services.
//!
//! Usage:
//!   # Use the default profile from ~/.config/remotefs/servers.ron
//!   remotefs ls -l /home/amy
//!
//!   # Point at a server directly
//!   remotefs --url http://localhost:8888/ --token abc cat /etc/hostname
//!
//! Set RUST_LOG=remotefs_client=debug to see every call.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remotefs_client::{ClientConfig, OpenOptions, RemoteFileServices, ServerConfig};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Remote filesystem client for spyder-services.
#[derive(Parser, Debug)]
#[command(name = "remotefs")]
#[command(about = "Browse and transfer files on a remote Jupyter server")]
struct Args {
    /// Config file (default: ~/.config/remotefs/servers.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server profile from the config file
    #[arg(short, long, global = true, conflicts_with = "url")]
    server: Option<String>,

    /// Server URL, bypassing the config file
    #[arg(long, global = true)]
    url: Option<String>,

    /// Token for --url (default: $JUPYTER_TOKEN)
    #[arg(long, global = true, requires = "url")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        path: String,
        /// Show size, type and mtime
        #[arg(short = 'l', long)]
        long: bool,
    },
    /// Show information about a path
    Stat { path: String },
    /// Check whether a path exists
    Exists { path: String },
    /// Create a directory
    Mkdir {
        path: String,
        /// Create missing parents
        #[arg(short, long)]
        parents: bool,
        /// Succeed if the directory already exists
        #[arg(long)]
        exist_ok: bool,
    },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Remove a file
    Rm {
        path: String,
        /// Ignore missing files
        #[arg(short, long)]
        force: bool,
    },
    /// Copy a file
    Cp {
        src: String,
        dst: String,
        /// Preserve timestamps and permissions
        #[arg(long)]
        metadata: bool,
    },
    /// Move a file or directory
    Mv { src: String, dst: String },
    /// Create a file or update its timestamp
    Touch {
        path: String,
        /// Keep existing contents
        #[arg(long)]
        no_truncate: bool,
    },
    /// Print a remote file to stdout
    Cat { path: String },
    /// Upload a local file
    Put { local: PathBuf, remote: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let fs = connect(&args)?;
    run(&fs, args.command).await
}

fn connect(args: &Args) -> Result<RemoteFileServices> {
    let server = match &args.url {
        Some(url) => ServerConfig {
            token: args.token.clone(),
            ..ServerConfig::new(url.clone())
        },
        None => {
            let config = match &args.config {
                Some(path) => ClientConfig::load(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => ClientConfig::load_default()?,
            };
            config.server(args.server.as_deref())?.clone()
        }
    };
    tracing::debug!(url = %server.url, "using server");
    Ok(RemoteFileServices::from_config(&server)?)
}

async fn run(fs: &RemoteFileServices, command: Command) -> Result<()> {
    match command {
        Command::Ls { path, long } => print_json(&fs.ls(&path, long).await?),
        Command::Stat { path } => print_json(&fs.info(&path).await?),
        Command::Exists { path } => {
            let exists = fs.exists(&path).await?;
            println!("{exists}");
            if !exists {
                std::process::exit(1);
            }
        }
        Command::Mkdir {
            path,
            parents,
            exist_ok,
        } => {
            fs.mkdir(&path, parents, exist_ok).await?;
        }
        Command::Rmdir { path } => {
            fs.rmdir(&path).await?;
        }
        Command::Rm { path, force } => {
            fs.unlink(&path, force).await?;
        }
        Command::Cp { src, dst, metadata } => {
            if metadata {
                fs.copy_with_metadata(&src, &dst).await?;
            } else {
                fs.copy(&src, &dst).await?;
            }
        }
        Command::Mv { src, dst } => {
            fs.replace(&src, &dst).await?;
        }
        Command::Touch { path, no_truncate } => {
            fs.touch(&path, !no_truncate).await?;
        }
        Command::Cat { path } => {
            let mut file = fs.open(&path, OpenOptions::new("rb")?).await?;
            let data = file.readall().await?;
            file.close().await?;
            let bytes = data.into_bytes().context("server returned a non-binary payload")?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
        Command::Put { local, remote } => {
            let bytes = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            let mut file = fs.open(&remote, OpenOptions::new("wb")?.atomic(true)).await?;
            let written = file.write(bytes).await?;
            file.close().await?;
            tracing::info!(remote = %remote, bytes = written, "uploaded");
        }
    }
    Ok(())
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

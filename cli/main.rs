use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use storecrypt::config::{self, Config};
use storecrypt::{Storage, VariantStorage};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// storecrypt - compressed, encrypted object storage over a local directory
#[derive(Parser)]
#[command(name = "storecrypt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (falls back to STORECRYPT_CONFIG, then defaults)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file and generate the encryption key
    Init {
        /// Where to write the config file
        #[arg(long, default_value = "storecrypt.json")]
        path: String,

        /// Storage base directory
        #[arg(short, long, default_value = "./storage")]
        base_dir: String,

        /// Encryption key file path
        #[arg(short, long, default_value = "./storecrypt.key")]
        key_path: String,

        /// Suffix used for new writes
        #[arg(short, long, default_value = ".gz.aes")]
        write_ext: String,
    },

    /// Store a local file under a logical name
    Put {
        input: PathBuf,
        name: String,
    },

    /// Read an object (logical name or explicit variant)
    Get {
        name: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List objects under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,

        /// Collapse coexisting variants into one logical name
        #[arg(short, long)]
        distinct: bool,

        /// Print path, size and modification time as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete every variant of the given objects
    Rm {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Rename every variant of an object
    Mv { old: String, new: String },

    /// Report whether any variant of an object exists
    Exists { name: String },

    /// Print the read-priority table
    Variants,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=info,storecrypt=debug
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "storecrypt starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Commands::Init {
        path,
        base_dir,
        key_path,
        write_ext,
    } = &cli.command
    {
        return cmd_init(path, base_dir, key_path, write_ext).await;
    }

    let cfg = Config::load_with_env(cli.config.as_deref())?;
    let storage = cfg.open().await?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Put { input, name } => cmd_put(&storage, &cancel, &input, &name).await,
        Commands::Get { name, output } => cmd_get(&storage, &cancel, &name, output.as_ref()).await,
        Commands::Ls {
            prefix,
            distinct,
            json,
        } => cmd_ls(&storage, &cancel, &prefix, distinct, json).await,
        Commands::Rm { names } => cmd_rm(&storage, &cancel, &names).await,
        Commands::Mv { old, new } => {
            storage.rename(&cancel, &old, &new).await?;
            println!("{old} -> {new}");
            Ok(())
        }
        Commands::Exists { name } => {
            let found = storage.resolve(&cancel, &name).await?;
            match found {
                Some(stored) => println!("{name}: present as {stored}"),
                None => println!("{name}: absent"),
            }
            Ok(())
        }
        Commands::Variants => {
            for ext in storage.supported_exts() {
                let label = if ext.is_empty() { "(plain)" } else { ext };
                let marker = if ext == storage.write_ext() { "  <- write" } else { "" };
                println!("{label}{marker}");
            }
            Ok(())
        }
    }
}

fn create_spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

async fn cmd_init(path: &str, base_dir: &str, key_path: &str, write_ext: &str) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        bail!("configuration file '{path}' already exists. Remove it first or use a different path.");
    }

    let mut cfg = Config::new(base_dir, key_path);
    cfg.write_ext = write_ext.to_string();
    cfg.validate()?;

    // Opening creates the base directory and the key, and checks write_ext.
    cfg.open().await?;

    let json = serde_json::to_string_pretty(&cfg)?;
    fs::write(path, json)
        .await
        .with_context(|| format!("writing config to '{path}'"))?;

    println!("Config:    {path}");
    println!("Storage:   {base_dir}");
    println!("Key:       {key_path}");
    println!("Write ext: {write_ext}");
    if cfg.encryption.is_some() {
        println!();
        println!("Keep the key file backed up: encrypted objects cannot be read without it.");
    }
    println!();
    println!("Set {}={path} or pass --config to use it.", config::ENV_CONFIG_PATH);
    Ok(())
}

async fn cmd_put(
    storage: &VariantStorage,
    cancel: &CancellationToken,
    input: &PathBuf,
    name: &str,
) -> Result<()> {
    let file = fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let size = file.metadata().await?.len();

    let spinner = create_spinner(&format!("Storing {name}..."))?;
    let res = storage.put(cancel, name, Box::new(file)).await;
    match res {
        Ok(()) => {
            spinner.finish_with_message(format!(
                "Stored {size} bytes as {name}{}",
                storage.write_ext()
            ));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message("store failed");
            Err(e.into())
        }
    }
}

async fn cmd_get(
    storage: &VariantStorage,
    cancel: &CancellationToken,
    name: &str,
    output: Option<&PathBuf>,
) -> Result<()> {
    let spinner = create_spinner(&format!("Reading {name}..."))?;
    let mut reader = match storage.get(cancel, name).await {
        Ok(reader) => reader,
        Err(e) => {
            spinner.abandon_with_message("read failed");
            return Err(e.into());
        }
    };

    match output {
        Some(path) => {
            let mut file = fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            spinner.finish_with_message(format!("Read {bytes} bytes -> {}", path.display()));
        }
        None => {
            spinner.finish_and_clear();
            let mut stdout = tokio::io::stdout();
            let bytes = tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
            eprintln!("Read {bytes} bytes to stdout");
        }
    }
    Ok(())
}

async fn cmd_ls(
    storage: &VariantStorage,
    cancel: &CancellationToken,
    prefix: &str,
    distinct: bool,
    json: bool,
) -> Result<()> {
    if distinct {
        let names = storage.list_distinct(cancel, prefix).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&names)?);
        } else {
            for name in names {
                println!("{name}");
            }
        }
        return Ok(());
    }

    let files = storage.list_info(cancel, prefix).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("No objects found");
        return Ok(());
    }
    println!("{:<48} {:>12}", "NAME", "SIZE (bytes)");
    for file in files {
        println!("{:<48} {:>12}", file.path, file.size);
    }
    Ok(())
}

async fn cmd_rm(storage: &VariantStorage, cancel: &CancellationToken, names: &[String]) -> Result<()> {
    if let [name] = names {
        storage.delete(cancel, name).await?;
    } else {
        storage.delete_all_bulk(cancel, names).await?;
    }
    for name in names {
        println!("Deleted '{name}'");
    }
    Ok(())
}

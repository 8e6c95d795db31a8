//! filesender - Send files through untrusted object storage
//!
//! Usage:
//!   filesender generate            - Create the passphrase-protected file key
//!   filesender send <path> [-e]    - Upload a file, optionally encrypted
//!   filesender receive <code>      - Download a file by its transfer code
//!   filesender list                - Show pending transfers
//!   filesender purge               - Delete all pending transfers

use anyhow::Context;
use clap::{Parser, Subcommand};
use filesender::{
    config::{default_config_dir, Config},
    crypto::{
        confirm_passphrase, install_envelope, unlock_envelope, EnvelopeRepository, FileKey,
        JsonEnvelopeFile,
    },
    progress::{byte_count_iec, transfer_bar},
    store::LocalStore,
    transfer::{ReceiveOptions, Transfers},
    Error, Result,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "filesender")]
#[command(author = "filesender Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send files using an object store and short transfer codes")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the crypto data and store it
    #[command(alias = "g")]
    Generate {
        /// Replace existing crypto data (files sent under the old key become unreadable)
        #[arg(long)]
        force: bool,

        /// Read the passphrase from a file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Send a file
    #[command(alias = "s")]
    Send {
        /// File to send
        path: PathBuf,

        /// Encrypt the file using the stored crypto data
        #[arg(short, long)]
        encrypt: bool,

        /// Read the passphrase from a file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Receive a file
    #[command(alias = "r")]
    Receive {
        /// Transfer code printed by the sender
        code: String,

        /// Leave the file in the store after receiving
        #[arg(short, long)]
        leave: bool,

        /// Overwrite an existing local file without asking
        #[arg(short, long)]
        yes: bool,

        /// Directory to write the file into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Read the passphrase from a file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// List pending transfers
    #[command(alias = "l")]
    List,

    /// Delete all pending transfers
    #[command(alias = "p")]
    Purge,
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_dir().join("config.json"));

    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    if let Err(e) = config.ensure_directories() {
        error!("Failed to create directories: {}", e);
        std::process::exit(e.exit_code());
    }

    if let Err(e) = run_command(cli.command, &config) {
        error!("{:#}", e);
        let code = e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
        std::process::exit(code);
    }
}

fn run_command(command: Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Generate {
            force,
            password_file,
        } => cmd_generate(config, force, password_file.as_deref()),

        Commands::Send {
            path,
            encrypt,
            password_file,
        } => cmd_send(config, &path, encrypt, password_file.as_deref()),

        Commands::Receive {
            code,
            leave,
            yes,
            output_dir,
            password_file,
        } => cmd_receive(config, &code, leave, yes, output_dir, password_file.as_deref()),

        Commands::List => cmd_list(config),

        Commands::Purge => cmd_purge(config),
    }
}

fn open_store(config: &Config) -> anyhow::Result<LocalStore> {
    LocalStore::open(&config.store.root)
        .with_context(|| format!("Unable to open object store at {:?}", config.store.root))
}

fn cmd_generate(config: &Config, force: bool, password_file: Option<&Path>) -> anyhow::Result<()> {
    let repo = JsonEnvelopeFile::new(&config.envelope_path);

    install_envelope(&repo, force, || read_new_passphrase(password_file)).map_err(|e| {
        let hint = match e {
            Error::EnvelopeExists(_) => "Use --force to replace it",
            _ => "Error generating crypto data",
        };
        anyhow::Error::new(e).context(hint)
    })?;

    info!("Crypto data written to {:?}", repo.path());
    println!("Crypto data generated and written to the configuration");
    Ok(())
}

fn cmd_send(
    config: &Config,
    path: &Path,
    encrypt: bool,
    password_file: Option<&Path>,
) -> anyhow::Result<()> {
    if !path.is_file() {
        return Err(Error::NotAFile(path.to_path_buf())).context("Send file does not exist");
    }

    let key = if encrypt {
        Some(unlock_file_key(config, password_file)?)
    } else {
        None
    };

    let store = open_store(config)?;
    let transfers = Transfers::new(&store, config.store.remote_dir.as_str());

    let size = std::fs::metadata(path)?.len();
    println!("Sending {} file: {}", byte_count_iec(size), path.display());

    let bar = transfer_bar(size);
    let receipt = transfers
        .send(path, key.as_ref(), &bar)
        .context("Failed to upload file")?;

    println!();
    println!("Code is: {}", receipt.code);
    println!("On the other computer run: filesender receive {}", receipt.code);
    Ok(())
}

fn cmd_receive(
    config: &Config,
    code: &str,
    leave: bool,
    yes: bool,
    output_dir: PathBuf,
    password_file: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let transfers = Transfers::new(&store, config.store.remote_dir.as_str());
    let options = ReceiveOptions {
        dest_dir: output_dir,
        leave,
    };

    let bar = transfer_bar(0);
    let report = transfers.receive(
        code,
        &options,
        || unlock_file_key(config, password_file),
        |dest| {
            if yes {
                return Ok(true);
            }
            let answer = prompt(&format!(
                "File {} exists locally. Do you want to overwrite? [y/N]: ",
                dest.display()
            ))?;
            Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
        },
        &bar,
    )?;

    match report {
        Some(report) => {
            println!(
                "Received {} file: {}",
                byte_count_iec(report.bytes_written),
                report.path.display()
            );
        }
        None => {
            bar.finish_and_clear();
            println!("Unable to locate file");
        }
    }

    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let pending = Transfers::new(&store, config.store.remote_dir.as_str()).list()?;

    if pending.is_empty() {
        println!("No pending transfers");
        return Ok(());
    }

    for transfer in pending {
        println!(
            "{:<32} {:>10}  {}{}",
            transfer.code,
            byte_count_iec(transfer.size),
            transfer.file_name.as_deref().unwrap_or("?"),
            if transfer.encrypted { "  (encrypted)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_purge(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let removed = Transfers::new(&store, config.store.remote_dir.as_str()).purge()?;
    println!("Purged {} transfers", removed);
    Ok(())
}

/// Load the envelope fresh and unlock the file key with the user's passphrase
fn unlock_file_key(config: &Config, password_file: Option<&Path>) -> Result<FileKey> {
    let record = JsonEnvelopeFile::new(&config.envelope_path).read()?;
    let password = read_passphrase(password_file)?;
    unlock_envelope(password.as_bytes(), &record)
}

fn read_password_file(path: &Path) -> Result<Zeroizing<String>> {
    let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read password file: {}", e))
    })?);
    Ok(Zeroizing::new(content.trim().to_string()))
}

/// Passphrase for unlocking
fn read_passphrase(password_file: Option<&Path>) -> Result<Zeroizing<String>> {
    let password = match password_file {
        Some(path) => read_password_file(path)?,
        None => Zeroizing::new(rpassword::prompt_password("Enter password: ")?),
    };

    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }
    Ok(password)
}

/// New passphrase, entered twice unless read from a file
fn read_new_passphrase(password_file: Option<&Path>) -> Result<Zeroizing<String>> {
    if let Some(path) = password_file {
        let password = read_password_file(path)?;
        return confirm_passphrase(&password, &password);
    }

    let first = Zeroizing::new(rpassword::prompt_password("Enter password: ")?);
    if first.is_empty() {
        return Err(Error::EmptyPassword);
    }
    let second = Zeroizing::new(rpassword::prompt_password("Repeat password: ")?);
    confirm_passphrase(&first, &second)
}

/// Prompt for a line of input
fn prompt(message: &str) -> Result<String> {
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    stdout.write_all(message.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

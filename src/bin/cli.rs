//! CaskKV CLI
//!
//! Opens a store directory, runs one command, and closes it again.

use std::process::ExitCode;

use caskkv::{CaskError, Config, Store};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// CaskKV CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv-cli")]
#[command(about = "CLI for the CaskKV log-structured key-value store")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, default_value = "./caskkv_data")]
    dir: String,

    /// fsync after every write
    #[arg(long)]
    sync: bool,

    /// Rotate the active file after this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Compact immutable data files
    Merge,

    /// List live keys
    Keys,

    /// Print store statistics
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> caskkv::Result<()> {
    let mut builder = Config::builder().sync_on_write(args.sync);
    if let Some(size) = args.max_file_size {
        builder = builder.max_file_size(size);
    }

    let store = Store::open(&args.dir, builder.build())?;
    let outcome = execute(&store, args.command);
    let closed = store.close();

    outcome.and(closed)
}

fn execute(store: &Store, command: Commands) -> caskkv::Result<()> {
    match command {
        Commands::Get { key } => match store.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(CaskError::KeyNotFound) => println!("(nil)"),
            Err(e) => return Err(e),
        },
        Commands::Set { key, value } => {
            store.set(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            store.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Merge => {
            let result = store.merge()?;
            if result.is_noop() {
                println!("nothing to merge");
            } else {
                println!(
                    "merged {} file(s) into {}, {} bytes reclaimed",
                    result.input_files.len(),
                    result.output_files.len(),
                    result.bytes_saved()
                );
            }
        }
        Commands::Keys => {
            let mut keys = store.keys()?;
            keys.sort();
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("keys:        {}", stats.key_count);
            println!("files:       {}", stats.file_count);
            println!("active file: cask.{}", stats.active_file_id);
            println!("total bytes: {}", stats.total_bytes);
            if stats.rotation_failures > 0 {
                println!("rotation failures: {}", stats.rotation_failures);
            }
        }
    }
    Ok(())
}

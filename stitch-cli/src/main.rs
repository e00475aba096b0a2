//! Stitch CLI
//!
//! Command-line front-end for the shard pipeline.
//!
//! # Commands
//! - `split` - Compress, encrypt, and shard a file
//! - `join` - Reconstruct a file from a quorum of shards
//! - `verify` - Check shard and fleet integrity
//! - `rotate` - Re-wrap the file key under a new user key

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod keyspec;
mod progress;

use commands::{join, rotate, split, verify};

#[derive(Parser)]
#[command(name = "stitch")]
#[command(about = "Compress, encrypt, and split data into recoverable shards")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into encrypted, erasure-coded shards
    Split {
        /// Input file path
        input: String,

        /// Output path prefix; shards land at <prefix>.shard0..N
        #[arg(short, long)]
        output: String,

        /// Number of data shards
        #[arg(short, long, default_value_t = 2)]
        data: u8,

        /// Number of parity shards
        #[arg(short, long, default_value_t = 1)]
        parity: u8,

        /// Minimum shards required to reconstruct the file key
        #[arg(short, long, default_value_t = 2)]
        threshold: u8,

        /// Encryption key (16, 24, or 32 bytes; prefix with hex: for hex)
        #[arg(short, long)]
        key: String,

        /// Encryption IV (12 bytes; prefix with hex: for hex)
        #[arg(long)]
        iv: String,
    },

    /// Reconstruct the original file from a set of shards
    Join {
        /// Shard file paths (missing shards may simply be omitted)
        shards: Vec<String>,

        /// Output file path
        #[arg(short, long)]
        output: String,

        /// Number of data shards used at split time
        #[arg(short, long, default_value_t = 2)]
        data: u8,

        /// Number of parity shards used at split time
        #[arg(short, long, default_value_t = 1)]
        parity: u8,

        /// Key threshold used at split time
        #[arg(short, long, default_value_t = 2)]
        threshold: u8,

        /// Decryption key
        #[arg(short, long)]
        key: String,

        /// Decryption IV
        #[arg(long)]
        iv: String,
    },

    /// Verify the integrity of a fleet of shards
    Verify {
        /// Shard file paths
        shards: Vec<String>,

        /// Number of data shards used at split time
        #[arg(short, long, default_value_t = 2)]
        data: u8,

        /// Number of parity shards used at split time
        #[arg(short, long, default_value_t = 1)]
        parity: u8,

        /// Key threshold used at split time
        #[arg(short, long, default_value_t = 2)]
        threshold: u8,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rotate the user key wrapping the file key, in place
    Rotate {
        /// Shard file paths
        shards: Vec<String>,

        /// Number of data shards used at split time
        #[arg(short, long, default_value_t = 2)]
        data: u8,

        /// Number of parity shards used at split time
        #[arg(short, long, default_value_t = 1)]
        parity: u8,

        /// Key threshold used at split time
        #[arg(short, long, default_value_t = 2)]
        threshold: u8,

        /// Current key
        #[arg(long)]
        old_key: String,

        /// Current IV
        #[arg(long)]
        old_iv: String,

        /// Replacement key
        #[arg(long)]
        new_key: String,

        /// Replacement IV
        #[arg(long)]
        new_iv: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Split {
            input,
            output,
            data,
            parity,
            threshold,
            key,
            iv,
        } => split::run(split::SplitConfig {
            input,
            output,
            data,
            parity,
            threshold,
            key,
            iv,
        }),
        Commands::Join {
            shards,
            output,
            data,
            parity,
            threshold,
            key,
            iv,
        } => join::run(join::JoinConfig {
            shards,
            output,
            data,
            parity,
            threshold,
            key,
            iv,
        }),
        Commands::Verify {
            shards,
            data,
            parity,
            threshold,
            json,
        } => verify::run(verify::VerifyConfig {
            shards,
            data,
            parity,
            threshold,
            json,
        }),
        Commands::Rotate {
            shards,
            data,
            parity,
            threshold,
            old_key,
            old_iv,
            new_key,
            new_iv,
        } => rotate::run(rotate::RotateConfig {
            shards,
            data,
            parity,
            threshold,
            old_key,
            old_iv,
            new_key,
            new_iv,
        }),
    }
}

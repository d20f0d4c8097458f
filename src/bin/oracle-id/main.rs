//! Oracle Identity CLI
//!
//! Offline Merkle tooling and a thin client for a running identity server.

mod client;
mod commands;
mod style;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use style::*;

#[derive(Parser)]
#[command(name = "oracle-id")]
#[command(version)]
#[command(about = "Oracle Identity - membership trees and proofs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Identity server URL
    #[arg(
        short,
        long,
        env = "ORACLE_URL",
        default_value = "http://localhost:8090",
        global = true
    )]
    server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tree from a JSON leaf file and print its root and layers
    #[command(visible_alias = "t")]
    Tree {
        /// JSON array of {walletAddress, birthIssueUrl, issueNumber}
        leaves: PathBuf,
    },

    /// Print the inclusion proof for one leaf of a JSON leaf file
    #[command(visible_alias = "p")]
    Prove {
        leaves: PathBuf,

        #[arg(short, long)]
        wallet: String,

        #[arg(short, long)]
        issue: u64,
    },

    /// Verify a proof offline, without the leaf set
    #[command(visible_alias = "c")]
    Check {
        #[arg(short, long)]
        wallet: String,

        /// Birth issue URL
        #[arg(short, long)]
        birth_issue: String,

        #[arg(short, long)]
        issue: u64,

        /// Comma-separated sibling hashes, leaf to root
        #[arg(short, long, value_delimiter = ',', num_args = 0..)]
        proof: Vec<String>,

        #[arg(short, long)]
        root: String,
    },

    /// Fetch the current root from the server
    Root,

    /// Fetch a proof from the server
    Proof {
        #[arg(short, long)]
        wallet: String,

        #[arg(short, long)]
        issue: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    }

    let result = match cli.command {
        Commands::Tree { leaves } => commands::tree::run(&leaves),
        Commands::Prove {
            leaves,
            wallet,
            issue,
        } => commands::prove::run(&leaves, &wallet, issue),
        Commands::Check {
            wallet,
            birth_issue,
            issue,
            proof,
            root,
        } => commands::check::run(&wallet, &birth_issue, issue, &proof, &root),
        Commands::Root => commands::remote::root(&cli.server).await,
        Commands::Proof { wallet, issue } => {
            commands::remote::proof(&cli.server, &wallet, issue).await
        }
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}

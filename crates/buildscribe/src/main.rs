// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Buildscribe - build-correlated CI log accumulation with conversational
//! analysis memory.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod serve;

use std::path::PathBuf;

use buildscribe_config::model::BuildscribeConfig;
use buildscribe_core::{BuildscribeError, ConversationStore};
use clap::{Parser, Subcommand};

/// Buildscribe - CI log accumulation and build analysis.
#[derive(Parser, Debug)]
#[command(name = "buildscribe", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Without it the standard search path is used.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine, reading NDJSON events from a file or stdin.
    Serve {
        /// Input file. Reads stdin when omitted.
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Inspect and maintain stored conversations.
    Conversations {
        #[command(subcommand)]
        action: ConversationCommands,
    },
    /// Inspect and recover analysed builds.
    Builds {
        #[command(subcommand)]
        action: BuildCommands,
    },
    /// Manage buildscribe configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConversationCommands {
    /// List every conversation with its message count.
    List,
    /// Show the most recent messages of a conversation.
    Show {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print messages as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Keep only the newest messages of a conversation.
    Prune {
        id: String,
        #[arg(long)]
        keep: usize,
    },
    /// Delete a conversation and every message in it.
    Delete {
        id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BuildCommands {
    /// List builds whose analysis failed.
    Failed,
    /// Analyse a failed build again.
    Redispatch { job: String, build: u64 },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Load, validate and print the effective configuration.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => buildscribe_config::load_and_validate_path(path),
        None => buildscribe_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            buildscribe_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: BuildscribeConfig) -> Result<(), BuildscribeError> {
    match command {
        Commands::Serve { input } => serve::run_serve(config, input).await,
        Commands::Config {
            action: ConfigCommands::Check,
        } => {
            print!("{}", admin::render_config(&config)?);
            eprintln!("buildscribe: configuration is valid");
            Ok(())
        }
        Commands::Conversations { action } => {
            serve::init_tracing(&config.engine.log_level);
            let store = serve::open_store(&config).await?;
            let output = match action {
                ConversationCommands::List => admin::list_conversations(store.as_ref()).await,
                ConversationCommands::Show { id, limit, json } => {
                    admin::show_conversation(store.as_ref(), &id, limit, json).await
                }
                ConversationCommands::Prune { id, keep } => {
                    admin::prune_conversation(store.as_ref(), &id, keep).await
                }
                ConversationCommands::Delete { id, yes } => {
                    admin::delete_conversation(store.as_ref(), &id, yes).await
                }
            };
            store.close().await?;
            print!("{}", output?);
            Ok(())
        }
        Commands::Builds {
            action: BuildCommands::Failed,
        } => {
            serve::init_tracing(&config.engine.log_level);
            let store = serve::open_store(&config).await?;
            let output = admin::failed_builds(store.as_ref()).await;
            store.close().await?;
            print!("{}", output?);
            Ok(())
        }
        Commands::Builds {
            action: BuildCommands::Redispatch { job, build },
        } => {
            serve::init_tracing(&config.engine.log_level);
            let store = serve::open_store(&config).await?;
            let engine = serve::build_engine(&config, store.clone()).await?;
            let output = admin::redispatch(&engine, &job, build).await;
            engine.drain().await;
            store.close().await?;
            print!("{}", output?);
            Ok(())
        }
    }
}

// SPDX-FileCopyrightText: 2026 Anamnesis Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anamnesis - patient-memory engine for conversational health AI.
//!
//! This is the ops CLI for the memory backend: configuration
//! inspection, embedding backfill, and memory search against the
//! live database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod backfill;
mod list;
mod search;

use anamnesis_config::AnamnesisConfig;
use anamnesis_core::AnamnesisError;
use clap::{Parser, Subcommand};
use tracing::debug;

/// Anamnesis - ops CLI for the patient-memory engine.
#[derive(Parser, Debug)]
#[command(name = "anamnesis", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate and print the resolved configuration.
    Config,
    /// Fill in missing embeddings for stored entities and messages.
    Backfill {
        /// Rows per batch. Defaults to memory.backfill_batch_size.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Search patient memory, or message history with --messages.
    Search {
        /// User whose data is searched.
        user_id: String,
        /// Free-text query.
        query: String,
        /// Search message history instead of memory entities.
        #[arg(long)]
        messages: bool,
        /// Restrict message search to one conversation.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List a user's entity records, newest-updated first.
    List {
        /// User whose records are listed.
        user_id: String,
        /// Maximum number of records to print.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match anamnesis_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            anamnesis_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.service.log_level);
    debug!(
        database_path = %config.storage.database_path,
        "configuration resolved"
    );

    let result = match cli.command {
        Some(Commands::Config) => print_config(&config),
        Some(Commands::Backfill { batch_size }) => backfill::run(&config, batch_size).await,
        Some(Commands::Search {
            user_id,
            query,
            messages,
            conversation,
        }) => search::run(&config, &user_id, &query, messages, conversation.as_deref()).await,
        Some(Commands::List { user_id, limit }) => list::run(&config, &user_id, limit).await,
        None => {
            println!("anamnesis: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("anamnesis: {e}");
        std::process::exit(1);
    }
}

fn print_config(config: &AnamnesisConfig) -> Result<(), AnamnesisError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| AnamnesisError::Internal(format!("failed to render config: {e}")))?;
    print!("{rendered}");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("anamnesis={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn binary_loads_config_defaults() {
        // Verify config loads with defaults (no config file needed)
        let config = anamnesis_config::load_and_validate()
            .expect("default config should be valid");
        assert_eq!(config.service.name, "anamnesis");
    }
}

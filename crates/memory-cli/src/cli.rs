//! CLI argument parsing for the memory store.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

use memory_types::ProviderKind;

/// Agent Memory CLI
///
/// Store text as embeddings and retrieve it by meaning.
#[derive(Parser, Debug)]
#[command(name = "memory-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/agent-memory/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override data directory (cache file and vector index)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Memory commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed and store a memory
    Store {
        /// Text to remember
        content: String,

        /// Explicit id (default: MD5 of the content)
        #[arg(long)]
        id: Option<String>,

        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,

        /// Embedding provider (local, cloud)
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },

    /// Find memories similar to a query
    Search {
        /// Query text
        query: String,

        /// Maximum results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Minimum similarity; values above 1.0 match nothing
        #[arg(short, long, allow_hyphen_values = true)]
        threshold: Option<f32>,

        /// Embedding provider (local, cloud)
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Metadata filter as JSON, e.g. '{"kind": {"$eq": "task"}}'
        #[arg(short, long = "where")]
        filter: Option<String>,
    },

    /// Delete a memory by id
    Delete {
        /// Memory id
        id: String,
    },

    /// Count stored memories
    Count,

    /// Delete every memory
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show embedding cache statistics
    CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_store() {
        let cli = Cli::parse_from(["memory-cli", "store", "hello world"]);
        match cli.command {
            Commands::Store {
                content,
                id,
                metadata,
                provider,
            } => {
                assert_eq!(content, "hello world");
                assert!(id.is_none());
                assert!(metadata.is_none());
                assert!(provider.is_none());
            }
            _ => panic!("Expected Store command"),
        }
    }

    #[test]
    fn test_cli_store_with_options() {
        let cli = Cli::parse_from([
            "memory-cli",
            "store",
            "notes",
            "--id",
            "m-1",
            "--metadata",
            r#"{"kind":"task"}"#,
            "--provider",
            "local",
        ]);
        match cli.command {
            Commands::Store {
                id,
                metadata,
                provider,
                ..
            } => {
                assert_eq!(id, Some("m-1".to_string()));
                assert_eq!(metadata, Some(r#"{"kind":"task"}"#.to_string()));
                assert_eq!(provider, Some(ProviderKind::Local));
            }
            _ => panic!("Expected Store command"),
        }
    }

    #[test]
    fn test_cli_search() {
        let cli = Cli::parse_from([
            "memory-cli",
            "search",
            "hello",
            "-n",
            "3",
            "--threshold",
            "-0.5",
            "--where",
            r#"{"kind":"task"}"#,
        ]);
        match cli.command {
            Commands::Search {
                query,
                limit,
                threshold,
                provider,
                filter,
            } => {
                assert_eq!(query, "hello");
                assert_eq!(limit, Some(3));
                assert_eq!(threshold, Some(-0.5));
                assert!(provider.is_none());
                assert!(filter.is_some());
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_invalid_provider() {
        let result = Cli::try_parse_from(["memory-cli", "store", "x", "--provider", "remote"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_delete() {
        let cli = Cli::parse_from(["memory-cli", "delete", "abc"]);
        match cli.command {
            Commands::Delete { id } => assert_eq!(id, "abc"),
            _ => panic!("Expected Delete command"),
        }
    }

    #[test]
    fn test_cli_count_and_cache_stats() {
        let cli = Cli::parse_from(["memory-cli", "count"]);
        assert!(matches!(cli.command, Commands::Count));

        let cli = Cli::parse_from(["memory-cli", "cache-stats"]);
        assert!(matches!(cli.command, Commands::CacheStats));
    }

    #[test]
    fn test_cli_clear() {
        let cli = Cli::parse_from(["memory-cli", "clear"]);
        assert!(matches!(cli.command, Commands::Clear { yes: false }));

        let cli = Cli::parse_from(["memory-cli", "clear", "--yes"]);
        assert!(matches!(cli.command, Commands::Clear { yes: true }));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "memory-cli",
            "count",
            "--config",
            "/path/to/config.toml",
            "--log-level",
            "debug",
            "--data-dir",
            "/tmp/memory",
        ]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert_eq!(cli.data_dir, Some("/tmp/memory".to_string()));
    }
}

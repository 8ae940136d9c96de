//! Agent Memory CLI
//!
//! Stores text as embeddings and retrieves it by meaning.
//!
//! # Usage
//!
//! ```bash
//! memory-cli store "the build uses cargo" [--metadata '{"kind":"note"}'] [--provider local]
//! memory-cli search "how do we build?" [--limit 5] [--threshold 0.3] [--where '{"kind":"note"}']
//! memory-cli delete <id>
//! memory-cli count
//! memory-cli clear --yes
//! memory-cli cache-stats
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/agent-memory/config.toml)
//! 3. Environment variables (MEMORY_*)
//! 4. CLI flags
//!
//! The cloud API key is read from `GOOGLE_API_KEY` (or a `.env` file in the
//! working directory) when a cloud embedding is first needed.

use anyhow::Result;
use clap::Parser;

use memory_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    run(cli).await
}

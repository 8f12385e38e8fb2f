//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use llmtap::ProviderType;

#[derive(Debug, Parser)]
#[command(name = "llmtap", version, about = "Track OpenAI and Anthropic requests")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write the default config file to ~/.llmtap/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Replay a captured provider stream through the tracking proxy
    Replay(ReplayArgs),
    /// Score a tracked request (0-100)
    Score {
        request_id: String,
        score: i64,
        #[arg(long)]
        name: Option<String>,
    },
    /// Attach key=value metadata to a tracked request
    Metadata {
        request_id: String,
        #[arg(required = true, value_parser = parse_key_value)]
        pairs: Vec<(String, String)>,
    },
    /// Fetch a prompt template
    Prompt {
        name: String,
        #[arg(long)]
        version: Option<u32>,
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Provider that produced the capture: openai or anthropic
    #[arg(long)]
    pub provider: ProviderType,
    /// SSE or JSON Lines capture of the stream
    #[arg(long)]
    pub file: PathBuf,
    /// Function name to report; defaults to the provider's create call
    #[arg(long)]
    pub function_name: Option<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Print the request id the backend assigns
    #[arg(long)]
    pub request_id: bool,
    /// Print only the text deltas
    #[arg(long)]
    pub text: bool,
    /// Drive the stream through the async proxy
    #[arg(long = "async")]
    pub use_async: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

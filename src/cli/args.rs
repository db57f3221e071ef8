// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parley - a resilient chat client for OpenAI-compatible APIs
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about = "Chat with an OpenAI-compatible model from your terminal")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.parley/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question
    Ask(AskArgs),

    /// Open a connection to the API with a minimal request
    Warmup(WarmupArgs),
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: String,

    /// Model to use (overrides settings)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Stream the response as it is generated
    #[arg(short, long)]
    pub stream: bool,

    /// Files to load as context (repeatable)
    #[arg(short, long = "context", value_name = "FILE")]
    pub context: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WarmupArgs {
    /// Model to use (overrides settings)
    #[arg(short, long)]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_minimal() {
        let cli = Cli::parse_from(["parley", "ask", "what is rust?"]);
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.prompt, "what is rust?");
                assert!(!args.stream);
                assert!(args.model.is_none());
                assert!(args.context.is_empty());
            }
            other => panic!("expected ask, got {other:?}"),
        }
    }

    #[test]
    fn test_ask_with_options() {
        let cli = Cli::parse_from([
            "parley",
            "-vv",
            "ask",
            "--stream",
            "--model",
            "o3-mini",
            "--context",
            "a.rs",
            "-c",
            "b.rs",
            "explain",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Ask(args) => {
                assert!(args.stream);
                assert_eq!(args.model.as_deref(), Some("o3-mini"));
                assert_eq!(args.context, vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]);
            }
            other => panic!("expected ask, got {other:?}"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::parse_from(["parley", "warmup", "--config", "/tmp/s.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::Warmup(_)));
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["parley"]).is_err());
    }
}

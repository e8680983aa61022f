//! CLI interface for Quartet
//!
//! This module provides the command-line interface using clap's derive API.
//! Every command builds an in-process orchestrator, so counters shown by
//! `status` cover the current invocation only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Quartet message orchestration engine
///
/// Routes goals, memory, reasoning and environment requests to specialised
/// arms and runs the spiral protocol.
#[derive(Parser, Debug)]
#[command(name = "quartet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a raw message to the conductor
    Send {
        /// Message type (goal, memory_request, reasoning_request, ...)
        #[arg(value_name = "TYPE")]
        kind: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Plan and execute a goal
    Goal {
        text: String,

        #[arg(short, long, default_value = "5")]
        priority: u8,
    },

    /// Store a memory
    Remember {
        text: String,

        #[arg(short, long, value_enum, default_value = "episodic")]
        kind: MemoryKind,

        /// Extra tags
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Retrieve memories matching a query
    Recall { query: String },

    /// Evaluate an arithmetic expression through the calculate tool
    Reason { expression: String },

    /// Run the spiral protocol
    Spiral {
        /// Answers to the inward prompts (up to three)
        #[arg(short, long)]
        answer: Vec<String>,
    },

    /// Show conductor counters and memory statistics
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
        }
    }
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,

    /// Show current configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["quartet", "status"]);
        assert!(matches!(cli.command, Command::Status));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["quartet", "--json", "--log", "debug", "status"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_send_command() {
        let cli = Cli::parse_from([
            "quartet",
            "send",
            "memory_request",
            "--payload",
            r#"{"type":"stats"}"#,
        ]);
        if let Command::Send { kind, payload } = cli.command {
            assert_eq!(kind, "memory_request");
            assert_eq!(payload, r#"{"type":"stats"}"#);
        } else {
            panic!("Expected Send command");
        }
    }

    #[test]
    fn test_remember_defaults_to_episodic() {
        let cli = Cli::parse_from(["quartet", "remember", "walked by the sea"]);
        if let Command::Remember { text, kind, tag } = cli.command {
            assert_eq!(text, "walked by the sea");
            assert_eq!(kind, MemoryKind::Episodic);
            assert!(tag.is_empty());
        } else {
            panic!("Expected Remember command");
        }
    }

    #[test]
    fn test_spiral_answers() {
        let cli = Cli::parse_from(["quartet", "spiral", "-a", "one", "-a", "two"]);
        if let Command::Spiral { answer } = cli.command {
            assert_eq!(answer, vec!["one", "two"]);
        } else {
            panic!("Expected Spiral command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["quartet", "config", "path"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Path
            }
        ));
    }
}

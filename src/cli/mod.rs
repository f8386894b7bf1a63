//! CLI command definitions and parsing
use crate::retrieval::{FilterField, Filters};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lectern",
    version,
    about = "Query routing and hybrid retrieval for a study assistant",
    long_about = "Lectern decides, per student question, whether to answer from the course corpus, \
                  generate unaided, or both, and ranks the supporting passages with weighted \
                  reciprocal rank fusion over exact, lexical and vector sources."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lectern/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply (e.g., "strict")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Corpus file: JSON array of documents
    #[arg(long, global = true, value_name = "FILE")]
    pub corpus: Option<PathBuf>,

    /// Embedding model for the vector source (disabled when omitted)
    #[arg(long, global = true, value_name = "MODEL")]
    pub vectors: Option<String>,

    /// Cross-encoder model for reranking (disabled when omitted)
    #[arg(long, global = true, value_name = "MODEL")]
    pub rerank: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Metadata filters shared by the query commands
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Restrict to a chapter
    #[arg(long)]
    pub chapter: Option<String>,

    /// Restrict to a block kind (e.g., "theorem", "exercise")
    #[arg(long)]
    pub block_kind: Option<String>,

    /// Restrict to a single block
    #[arg(long)]
    pub block_id: Option<String>,

    /// Restrict to a document type
    #[arg(long = "type", value_name = "TYPE")]
    pub doc_type: Option<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> Filters {
        let mut filters = Filters::default();
        filters.set(FilterField::Chapter, self.chapter.clone());
        filters.set(FilterField::BlockKind, self.block_kind.clone());
        filters.set(FilterField::BlockId, self.block_id.clone());
        filters.set(FilterField::Type, self.doc_type.clone());
        filters
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route a single question and show the decision
    Decide {
        /// Question text
        query: String,

        /// Standalone reformulation used for retrieval
        #[arg(long)]
        rewritten: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Retrieve the top passages for a query
    Retrieve {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long, default_value = "6")]
        limit: usize,

        /// Skip the reranker even when one is configured
        #[arg(long)]
        no_rerank: bool,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Interactive session (commands: /pin, /unpin, /reset, /reset-all, /forget, /mode)
    Chat {
        /// Chat id (defaults to a random one)
        #[arg(long)]
        chat_id: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

/// A line typed in the chat REPL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Question(String),
    Pin,
    Unpin,
    Reset { full: bool },
    Forget,
    /// `/mode auto` clears the override
    Mode(Option<String>),
    Quit,
    Unknown(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(ChatInput::Question(line.to_string()));
        };

        let mut parts = command.split_whitespace();
        let input = match parts.next().unwrap_or_default() {
            "pin" => ChatInput::Pin,
            "unpin" => ChatInput::Unpin,
            "reset" => ChatInput::Reset { full: false },
            "reset-all" => ChatInput::Reset { full: true },
            "forget" => ChatInput::Forget,
            "mode" => match parts.next() {
                None | Some("auto") => ChatInput::Mode(None),
                Some(mode) => ChatInput::Mode(Some(mode.to_string())),
            },
            "quit" | "exit" | "q" => ChatInput::Quit,
            other => ChatInput::Unknown(other.to_string()),
        };
        Some(input)
    }
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filter_args() {
        let cli = Cli::parse_from([
            "lectern",
            "decide",
            "what is a limit",
            "--chapter",
            "2",
            "--type",
            "theory",
        ]);
        let Commands::Decide { filters, .. } = cli.command else {
            panic!("expected decide");
        };
        let filters = filters.to_filters();
        assert_eq!(filters.chapter.as_deref(), Some("2"));
        assert_eq!(filters.doc_type.as_deref(), Some("theory"));
        assert_eq!(filters.active_count(), 2);
    }

    #[test]
    fn test_chat_input() {
        assert_eq!(ChatInput::parse("   "), None);
        assert_eq!(
            ChatInput::parse("what is it?"),
            Some(ChatInput::Question("what is it?".to_string()))
        );
        assert_eq!(ChatInput::parse("/reset-all"), Some(ChatInput::Reset { full: true }));
        assert_eq!(ChatInput::parse("/mode auto"), Some(ChatInput::Mode(None)));
        assert_eq!(
            ChatInput::parse("/mode retrieve"),
            Some(ChatInput::Mode(Some("retrieve".to_string())))
        );
        assert_eq!(
            ChatInput::parse("/frobnicate"),
            Some(ChatInput::Unknown("frobnicate".to_string()))
        );
    }
}

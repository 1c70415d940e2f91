use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Fuzzy search over JSON datasets with background indexing"
)]
pub struct Cli {
    /// Settings file (JSON with `engine` and `coordinator` sections)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index a dataset (or load a snapshot) and run one query
    Search(SearchArgs),
    /// Index a dataset and answer queries read from stdin
    Interactive(InteractiveArgs),
    /// Index a dataset and write the resulting snapshot to disk
    Snapshot(SnapshotArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

/// Ranking parameters shared by the query commands.
#[derive(Debug, clap::Args)]
pub struct RankingArgs {
    /// Maximum number of matches (default from settings: 10)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Minimum match quality in [0, 1] (default from settings: 0.3)
    #[arg(long)]
    pub min_quality: Option<f64>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Dataset JSON file (`persons`, `documents` or `items`)
    pub dataset: PathBuf,

    /// The search query
    pub query: String,

    #[command(flatten)]
    pub ranking: RankingArgs,

    /// Treat DATASET as a snapshot written by `docsift snapshot`
    #[arg(long)]
    pub snapshot: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Interactive --

#[derive(Debug, Parser)]
pub struct InteractiveArgs {
    /// Dataset JSON file (`persons`, `documents` or `items`)
    pub dataset: PathBuf,

    #[command(flatten)]
    pub ranking: RankingArgs,

    /// Ignore queries shorter than this many characters
    #[arg(long, default_value = "2")]
    pub min_query_len: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Snapshot --

#[derive(Debug, Parser)]
pub struct SnapshotArgs {
    /// Dataset JSON file (`persons`, `documents` or `items`)
    pub dataset: PathBuf,

    /// Where to write the snapshot
    pub out: PathBuf,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docsift",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docsift", "search", "people.json", "alice"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.dataset, PathBuf::from("people.json"));
                assert_eq!(args.query, "alice");
                assert_eq!(args.ranking.count, None);
                assert_eq!(args.ranking.min_quality, None);
                assert!(!args.snapshot);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_interactive_with_ranking() {
        let cli = Cli::parse_from([
            "docsift",
            "-vv",
            "interactive",
            "people.json",
            "-n",
            "3",
            "--min-quality",
            "0.5",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Interactive(args) => {
                assert_eq!(args.ranking.count, Some(3));
                assert_eq!(args.ranking.min_quality, Some(0.5));
                assert_eq!(args.min_query_len, 2);
            }
            _ => panic!("expected interactive command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result =
            Cli::try_parse_from(["docsift", "-q", "-v", "snapshot", "a", "b"]);
        assert!(result.is_err());
    }
}

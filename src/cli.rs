use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::flatten::NestedPolicy;

/// Top-level CLI definition. With no subcommand, `run` is implied.
#[derive(Parser, Debug)]
#[command(
    name = "unnest",
    version,
    about = "Flatten `<name>-master/<name>-master/` wrappers into `<name>/`"
)]
pub struct Cli {
    #[arg(short = 'C', long = "chdir", global = true)]
    pub chdir: Option<PathBuf>,
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<PathBuf>,
    #[arg(short = 'n', long = "dry-run", global = true)]
    pub dry_run: bool,
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Print the report as JSON instead of text.
    #[arg(long = "json", global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Flatten every candidate directory under the root.
    Run(RunArgs),
    /// Show what `run` would do without touching the filesystem.
    Plan(TargetArgs),
    /// Configuration display and editing.
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
}

#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Directory whose children are scanned.
    #[arg(long = "root")]
    pub root: Option<PathBuf>,
    /// Trailing marker identifying candidate directories.
    #[arg(long = "suffix", allow_hyphen_values = true)]
    pub suffix: Option<String>,
    /// Nested directory selection when several qualify.
    #[arg(long = "nested", value_enum)]
    pub nested: Option<NestedPolicy>,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Keep processing remaining candidates after one fails.
    #[arg(long = "keep-going", short = 'k')]
    pub keep_going: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    Path,
    Generate {
        #[arg()]
        path: Option<PathBuf>,
        #[arg(long = "force", default_value_t = false)]
        force: bool,
    },
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

/// Helper entry point so `main` can stay minimal.
pub fn parse() -> Cli {
    Cli::parse()
}

// porter/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use porter_common::error::Result;
use porter_common::Config;

pub mod classify;
pub mod serve;
pub mod version;

use crate::cli::classify::Classify;
use crate::cli::serve::Serve;
use crate::cli::version::Version;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "porter", bin_name = "porter")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Speak JSON-RPC over stdin/stdout until stdin closes
    Serve(Serve),
    /// Print the installer type of a local file
    Classify(Classify),
    /// Print version information
    Version(Version),
}

impl Command {
    pub async fn run(&self, config: Config) -> Result<()> {
        match self {
            Self::Serve(command) => command.run(config).await,
            Self::Classify(command) => command.run(&config),
            Self::Version(command) => command.run(),
        }
    }

    /// Whether stdout belongs to the protocol and must stay free of logs.
    pub fn owns_stdout(&self) -> bool {
        matches!(self, Self::Serve(_))
    }
}

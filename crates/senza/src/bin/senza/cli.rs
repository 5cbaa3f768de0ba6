//! senza cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a definition and print the resulting template
    Print(PrintCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct PrintCommand {
    #[clap(flatten)]
    pub output: OutputArgs,

    /// Region to compile for
    #[clap(long = "region", default_value = "eu-west-1")]
    pub region: String,

    /// Read parameter values from a YAML mapping file
    ///
    /// Entries assign parameters by name and must not overlap with
    /// parameters given on the command line.
    #[clap(long = "parameter-file")]
    pub parameter_file: Option<PathBuf>,

    /// Definition file
    pub definition: PathBuf,

    /// Stack version, e.g. 1 or cd871
    pub version: String,

    /// Stack parameters, positional values first, then name=value pairs
    pub parameters: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Parse a definition file and dump its structure
    Definition { file: PathBuf },
}

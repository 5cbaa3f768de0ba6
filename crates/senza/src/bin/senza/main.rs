mod cli;

use indexmap::IndexMap;
use senza::value::Value;
use std::path::Path;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("SENZA_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let command_result = match cli.command {
        cli::Command::Print(print_cli) => print(print_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn print(cli: cli::PrintCommand) -> anyhow::Result<()> {
    let definition = senza::definition::Definition::load_file(&cli.definition)?;
    let parameter_file = cli
        .parameter_file
        .as_deref()
        .map(load_parameter_file)
        .transpose()?;

    let options = senza::compile::CompileOptions {
        version: &cli.version,
        arguments: &cli.parameters,
        parameter_file: parameter_file.as_ref(),
    };
    let account_info = senza::cloud::AccountInfo::for_region(&cli.region);

    let compiled = senza::compile::compile(
        &definition,
        &options,
        &account_info,
        &senza::cloud::NullControlPlane,
        &senza::cloud::StaticMetadata::default(),
    )?;

    output(&cli.output, &compiled.template)?;
    Ok(())
}

fn load_parameter_file(path: &Path) -> anyhow::Result<IndexMap<String, String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

fn output(output: &cli::OutputArgs, value: &Value) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (senza-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    match cli.command {
        Definition { file } => {
            let definition = senza::definition::Definition::load_file(&file)?;
            println!("{definition:#?}")
        }
    }

    Ok(())
}

//! textres CLI tool
//!
//! Command-line interface for checking and printing documents in the outline notation.
//!
//! ## Commands
//!
//! - `check <path>`: Load a document and display its diagnostics
//! - `print <path>`: Load a document and print it back

use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use textres_core::{
    codec::{
        diagnostic::{DiagnosticRecord, Severity},
        outline::OutlineSyntax,
    },
    config::{LoadOptions, TomlOptionProvider},
    resource::TextResource,
    resource_set::ResourceSet,
};
use url::Url;

#[derive(Parser)]
#[command(name = "textres")]
#[command(author, version, about = "Check and print text resources", long_about = None)]
struct Cli {
    /// TOML file with default load options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document and display diagnostics
    Check {
        /// Path to the document
        path: PathBuf,

        /// Also load these documents so cross-document references resolve
        #[arg(short, long)]
        with: Vec<PathBuf>,

        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a document and print it with the outline printer
    Print {
        /// Path to the document
        path: PathBuf,

        /// Ignore recorded layout and print canonically
        #[arg(long)]
        canonical: bool,
    },
}

fn file_uri(path: &Path) -> Result<Url, Box<dyn std::error::Error>> {
    let absolute = std::fs::canonicalize(path)?;
    Url::from_file_path(&absolute).map_err(|_| format!("not a file path: {absolute:?}").into())
}

fn open(
    set: &Arc<ResourceSet>,
    path: &Path,
    config: Option<&PathBuf>,
    options: LoadOptions,
) -> Result<Arc<TextResource>, Box<dyn std::error::Error>> {
    let mut builder = TextResource::builder(file_uri(path)?, Arc::new(OutlineSyntax::new()));
    if let Some(config) = config {
        builder = builder.option_provider(Arc::new(TomlOptionProvider::new(config.clone())));
    }
    let resource = set.add(builder.build());
    resource.load_from_path(path, options)?;
    Ok(resource)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let set = ResourceSet::new();

    match cli.command {
        Commands::Check { path, with, json } => {
            // Dependencies first, so the checked document resolves against loaded content.
            for dependency in with.iter() {
                open(&set, dependency, cli.config.as_ref(), LoadOptions::default())?;
            }
            let resource = open(&set, &path, cli.config.as_ref(), LoadOptions::default())?;
            let (errors, warnings) = resource.with_content(|content| {
                (
                    content.records(Severity::Error),
                    content.records(Severity::Warning),
                )
            })?;

            if json {
                let all: Vec<&DiagnosticRecord> = errors.iter().chain(warnings.iter()).collect();
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                for record in errors.iter().chain(warnings.iter()) {
                    println!("{}: {}", record.severity, record);
                }
                println!(
                    "{}: {} errors, {} warnings",
                    path.display(),
                    errors.len(),
                    warnings.len()
                );
            }
            Ok(if errors.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Print { path, canonical } => {
            let options = LoadOptions {
                disable_layout_information_recording: canonical,
                ..Default::default()
            };
            let resource = open(&set, &path, cli.config.as_ref(), options.clone())?;
            print!("{}", resource.save_to_string(&options)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

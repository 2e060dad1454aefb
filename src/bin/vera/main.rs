//! vera CLI tool
//!
//! Command-line interface for checking directive-annotated markdown with vera-core.
//!
//! ## Commands
//!
//! - `check <path>`: Build every document under a path and print diagnostics
//! - `graph <path>`: Build and export the validated graph as JSON
//! - `kinds`: List the entity kinds and their attribute schemas
//!
//! A `vera.toml` at the build root configures the nesting limit, the guarantee confidence
//! threshold and the file extensions to pick up. Both `check` and `graph` exit with status 1
//! when the build reports errors.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use vera_core::{
    codec::SCHEMAS,
    compiler::DocumentCompiler,
    validator::BuildReport,
};

#[derive(Parser)]
#[command(name = "vera")]
#[command(author, version, about = "A checker for directive-annotated markdown documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a document or directory once and display diagnostics
    Check {
        /// Path to the document or directory to check
        path: PathBuf,

        /// Output format for diagnostics
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Build a document or directory and export the graph as JSON
    Graph {
        /// Path to the document or directory to build
        path: PathBuf,

        /// Write the graph to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List every entity kind with its attributes
    Kinds,
}

async fn build(path: &Path) -> Result<BuildReport, Box<dyn std::error::Error>> {
    let compiler = DocumentCompiler::for_root(path)?;
    tracing::debug!("build config: {:?}", compiler.config());
    Ok(compiler.compile_directory(path).await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { path, format } => {
            let report = build(&path).await?;
            match format {
                Format::Text => println!("{report}"),
                Format::Json => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
            }
            if !report.succeeded() {
                std::process::exit(1);
            }
        }

        Commands::Graph { path, output } => {
            let report = build(&path).await?;
            let Some(graph) = report.graph.as_ref() else {
                eprintln!("{report}");
                std::process::exit(1);
            };
            for warning in report.warnings() {
                eprintln!("{warning}");
            }
            let json = graph.to_json_string()?;
            match output {
                Some(output) => {
                    std::fs::write(&output, json)?;
                    println!("Graph written to {}", output.display());
                }
                None => println!("{json}"),
            }
        }

        Commands::Kinds => {
            for schema in SCHEMAS.kinds() {
                let attributes: Vec<String> = schema
                    .attributes
                    .iter()
                    .map(|spec| match spec.required {
                        true => format!("{}*", spec.name),
                        false => spec.name.to_string(),
                    })
                    .collect();
                match schema.kind.short_name() {
                    Some(short) => println!("{} ({short})", schema.kind),
                    None => println!("{}", schema.kind),
                }
                if !attributes.is_empty() {
                    println!("    attributes: {}", attributes.join(", "));
                }
                if !schema.sections.is_empty() {
                    println!("    sections: {}", schema.sections.join(", "));
                }
            }
        }
    }

    Ok(())
}

//! omopgen — resolve placeholder-annotated clinical query templates into
//! executable SQL for an OMOP CDM schema.
//!
//! # Usage
//!
//! ```bash
//! # Resolve a single template
//! omopgen resolve "SELECT 1 FROM <SCHEMA>.person" --schema cmsdesynpuf23m
//!
//! # Resolve a CSV of templates and write out/rendered.sql + out/rendered.json
//! omopgen batch data/sample_queries.csv --schema cmsdesynpuf23m --args data/sample_args.json
//!
//! # List registered template categories
//! omopgen templates
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::Table;

use omopgen::loader;
use omopgen::prelude::*;
use omopgen::report;

#[derive(Parser)]
#[command(name = "omopgen")]
#[command(version)]
#[command(about = "OMOP CDM query template resolver", long_about = None)]
#[command(after_help = "EXAMPLES:
    omopgen resolve 'SELECT 1 FROM <SCHEMA>.person' --schema cmsdesynpuf23m
    omopgen batch data/sample_queries.csv --schema cmsdesynpuf23m
    omopgen templates")]
struct Cli {
    /// Schema name substituted for every <SCHEMA> token
    #[arg(short, long, env = "OMOPGEN_SCHEMA", global = true)]
    schema: Option<String>,

    /// Path to an omopgen.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON argument manifest; the built-in sample fixture is used if omitted
    #[arg(short, long, global = true)]
    args: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a single query template and print the SQL
    Resolve {
        /// The annotated query string
        query: String,
    },
    /// Resolve every template in a CSV file and write SQL + JSON reports
    Batch {
        /// CSV file with a `query` column (optional `required_args` column)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },
    /// List the registered template categories
    Templates,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Resolve { query } => resolve_one(cli, query),
        Commands::Batch { input, output } => run_batch_files(cli, input, output),
        Commands::Templates => {
            show_templates();
            Ok(())
        }
    }
}

/// Build the resolver from --schema, else the discovered config file.
fn build_resolver(cli: &Cli) -> Result<Resolver> {
    let config = match &cli.schema {
        Some(schema) => Config::with_schema(schema.clone())?,
        None => Config::load(cli.config.as_deref())?,
    };
    Ok(Resolver::new(config.schema)?.with_rescan_passes(config.rescan_passes))
}

fn load_arg_store(cli: &Cli) -> Result<ArgStore> {
    match &cli.args {
        Some(path) => loader::load_args(path)
            .with_context(|| format!("failed to load argument manifest {}", path.display())),
        None => Ok(ArgStore::sample()),
    }
}

fn resolve_one(cli: &Cli, query: &str) -> Result<()> {
    let resolver = build_resolver(cli)?;
    let args = load_arg_store(cli)?;

    if cli.verbose {
        println!("{} {}", "Template:".dimmed(), query.yellow());
    }

    let record = resolver.resolve(query, &args);
    match record.status {
        Status::Success => {
            println!("{}", "Resolved SQL:".green().bold());
            println!("{}", record.sql);
            Ok(())
        }
        Status::Failure => {
            eprintln!("{}", "Resolution failed:".red().bold());
            for error in &record.errors {
                eprintln!("  {} {}", "-".red(), error);
            }
            eprintln!("{}", "Partial output:".dimmed());
            eprintln!("{}", record.sql);
            bail!("{} error(s) while resolving query", record.errors.len())
        }
    }
}

fn run_batch_files(cli: &Cli, input: &PathBuf, output: &PathBuf) -> Result<()> {
    let resolver = build_resolver(cli)?;
    let args = load_arg_store(cli)?;

    let defs = loader::load_queries(input)
        .with_context(|| format!("failed to load queries from {}", input.display()))?;
    println!(
        "Loaded {} queries from {}",
        defs.len().to_string().cyan(),
        input.display()
    );

    let report = run_batch(&defs, &resolver, &args);

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("rendered");
    let (sql_path, json_path) = report::write_report(&report, output, stem)?;

    print_summary(&report);
    println!("SQL written to {}", sql_path.display().to_string().cyan());
    println!("Report written to {}", json_path.display().to_string().cyan());

    if cli.verbose {
        for record in report.records.iter().filter(|r| !r.is_success()) {
            eprintln!("{} query {}:", "Failed".red().bold(), record.id);
            for error in &record.errors {
                eprintln!("  {} {}", "-".red(), error);
            }
        }
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    let mut table = Table::new();
    table.set_header(vec!["Total", "Succeeded", "Failed", "Success rate"]);
    table.add_row(vec![
        report.total.to_string(),
        report.succeeded.to_string(),
        report.failed.to_string(),
        format!("{:.1}%", report.success_rate()),
    ]);
    println!("{table}");
}

fn show_templates() {
    let registry = TemplateRegistry::standard();
    println!("{}", "Registered template categories:".bold());
    for category in registry.categories() {
        let family = match category {
            "DRUG" | "CONDITION" => "descendant-concept lookup",
            "STATE" => "location lookup",
            _ => "exact-match concept lookup",
        };
        println!("  {:<12} {}", category.cyan(), family.dimmed());
    }
}

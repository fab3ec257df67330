//! flatdiff CLI tool
//!
//! Diffs two record files into a tagged change log, or sorts one file by key.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use flatdiff::config::DEFAULT_RUN_CAPACITY;
use flatdiff::{
    reader, Comparator, Descriptor, DiffOptions, DiffSummary, ExternalSort, RecordWriter,
    TransformerRegistry,
};

#[derive(Parser)]
#[command(name = "flatdiff")]
#[command(about = "Sort-merge diff of delimited and fixed-width record files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CRE/UPD/DEL change log between two versions of a file
    Diff {
        #[command(flatten)]
        common: CommonArgs,
        /// Previous version of the file
        #[arg(long)]
        old: PathBuf,
        /// Current version of the file
        #[arg(long)]
        new: PathBuf,
        /// Change log to write
        #[arg(long)]
        output: PathBuf,
        /// Sort both inputs in memory instead of spilling runs to disk
        #[arg(long)]
        in_memory: bool,
        /// Omit the TRANSACTION header line from the change log
        #[arg(long)]
        no_output_header: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sort one file by its identifier attributes
    Sort {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// JSON descriptor of the record layout
    #[arg(long, env = "FLATDIFF_DESCRIPTOR")]
    descriptor: PathBuf,
    /// Directory for intermediate sort files
    #[arg(long, env = "FLATDIFF_WORK_DIR")]
    work_dir: Option<PathBuf>,
    /// Column separator of delimited files
    #[arg(long, env = "FLATDIFF_DELIMITER", default_value_t = ';')]
    delimiter: char,
    /// Delimited inputs have no header row; columns follow the descriptor
    #[arg(long)]
    no_header: bool,
    /// Convert types and run inbound transformers while reading
    #[arg(long)]
    transform: bool,
    /// Records held in memory per sort run
    #[arg(long, env = "FLATDIFF_RUN_CAPACITY", default_value_t = DEFAULT_RUN_CAPACITY)]
    run_capacity: usize,
}

impl CommonArgs {
    fn options(&self) -> Result<DiffOptions> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .with_context(|| format!("delimiter {:?} is not a single ASCII character", self.delimiter))?;
        let mut options = DiffOptions::default()
            .with_delimiter(delimiter)
            .with_header(!self.no_header)
            .with_transform(self.transform)
            .with_run_capacity(self.run_capacity);
        if let Some(dir) = &self.work_dir {
            options = options.with_working_dir(dir);
        }
        Ok(options)
    }

    fn descriptor(&self) -> Result<Arc<Descriptor>> {
        let registry = TransformerRegistry::default();
        let descriptor = Descriptor::from_json_file(&self.descriptor, &registry)
            .with_context(|| format!("Failed to load descriptor {}", self.descriptor.display()))?;
        Ok(Arc::new(descriptor))
    }
}

#[derive(Serialize)]
struct Report<'a> {
    old: &'a Path,
    new: &'a Path,
    output: &'a Path,
    mode: &'static str,
    #[serde(flatten)]
    summary: DiffSummary,
    changes: bool,
    elapsed_ms: u64,
}

fn main() -> Result<()> {
    // Optional .env with FLATDIFF_* defaults, loaded before clap parses
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Diff {
            common,
            old,
            new,
            output,
            in_memory,
            no_output_header,
            json,
        } => {
            let options = common.options()?.with_write_header(!no_output_header);
            let descriptor = common.descriptor()?;
            run_diff(descriptor, options, &old, &new, &output, in_memory, json)
        }
        Commands::Sort {
            common,
            input,
            output,
        } => {
            let options = common.options()?;
            let descriptor = common.descriptor()?;
            run_sort(descriptor, options, &input, &output)
        }
    }
}

fn run_diff(
    descriptor: Arc<Descriptor>,
    options: DiffOptions,
    old: &Path,
    new: &Path,
    output: &Path,
    in_memory: bool,
    json: bool,
) -> Result<()> {
    let start_time = Instant::now();

    let mut old_source = reader::open(descriptor.clone(), &options, old)
        .with_context(|| format!("Failed to open {}", old.display()))?;
    let mut new_source = reader::open(descriptor.clone(), &options, new)
        .with_context(|| format!("Failed to open {}", new.display()))?;
    let out = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = RecordWriter::new(descriptor.clone(), &options, out);

    let working_dir = options.working_dir.clone();
    let mut comparator = Comparator::new(descriptor, options)?;
    let result = if in_memory {
        comparator.compare(&mut old_source, &mut new_source, &mut writer)
    } else {
        comparator.compare_external(&mut old_source, &mut new_source, &mut writer, &working_dir)
    };
    let summary = result.context("Diff failed")?;
    let elapsed = start_time.elapsed();

    if json {
        let report = Report {
            old,
            new,
            output,
            mode: if in_memory { "in-memory" } else { "external" },
            summary,
            changes: summary.changes(),
            elapsed_ms: elapsed.as_millis() as u64,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}", "═".repeat(60));
    println!("flatdiff");
    println!("{}", "═".repeat(60));
    println!("  Old:    {}", old.display());
    println!("  New:    {}", new.display());
    println!("  Output: {}", output.display());
    println!("{}", "─".repeat(60));
    println!("  Additions:     {}", summary.additions);
    println!("  Deletions:     {}", summary.deletions);
    println!("  Modifications: {}", summary.modifications);
    println!("  Unchanged:     {}", summary.unchanged);
    println!("  Time: {:.2}s", elapsed.as_secs_f64());
    if summary.changes() {
        println!("  ✅ Change log written");
    } else {
        println!("  ✅ Files are identical");
    }
    Ok(())
}

fn run_sort(descriptor: Arc<Descriptor>, options: DiffOptions, input: &Path, output: &Path) -> Result<()> {
    let start_time = Instant::now();
    let mut source = reader::open(descriptor, &options, input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let sorted = ExternalSort::new(&options)
        .sort(&mut source)
        .with_context(|| format!("Failed to sort {}", input.display()))?;
    let records = sorted.len();
    let runs = sorted.runs();
    sorted
        .persist(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n{}", "═".repeat(60));
    println!("flatdiff sort");
    println!("{}", "═".repeat(60));
    println!("  Input:   {}", input.display());
    println!("  Output:  {}", output.display());
    println!("  Records: {}", records);
    println!("  Runs:    {}", runs);
    println!("  Time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

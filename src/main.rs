use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use index_assembly::index::stats::show_piece_stats;
use index_assembly::index::{Assembler, AssembleOptions, IndexMode, Stage};
use index_assembly::utils::{AppConfig, GitProvenance, NoProvenance};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "assemble-pieces")]
#[command(about = "Merge sharded index pieces into one deterministic index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the app data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble index pieces into one index
    Assemble {
        /// Piece directories (repeatable)
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Output index directory
        #[arg(short, long)]
        out: PathBuf,

        /// Index mode: code, prose, extracted-prose or records
        #[arg(short, long, default_value = "code", value_parser = parse_mode)]
        mode: IndexMode,

        /// Stage to stamp on the assembled index
        #[arg(short, long, value_parser = parse_stage)]
        stage: Option<Stage>,

        /// Repository root, for provenance
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Accept pieces without a manifest or compatibility key
        #[arg(short, long)]
        force: bool,

        /// Skip git provenance
        #[arg(long)]
        no_provenance: bool,
    },
    /// Show a summary of one index piece
    Inspect {
        /// Piece directory
        path: PathBuf,
    },
}

fn parse_mode(raw: &str) -> std::result::Result<IndexMode, String> {
    IndexMode::parse(raw).ok_or_else(|| format!("unknown index mode '{raw}'"))
}

fn parse_stage(raw: &str) -> std::result::Result<Stage, String> {
    Stage::parse(raw).ok_or_else(|| format!("unknown stage '{raw}'"))
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => AppConfig::load().context("Failed to load config"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Assemble {
            inputs,
            out,
            mode,
            stage,
            repo,
            force,
            no_provenance,
        } => {
            if force {
                config.strict = false;
            }
            let mut options = AssembleOptions::new(inputs, out);
            options.mode = mode;
            options.stage = stage;
            options.root = repo;
            options.show_progress = !cli.quiet;
            options.config = config;

            let mut assembler = Assembler::new(&options.config);
            assembler = if no_provenance {
                assembler.with_provenance(NoProvenance)
            } else {
                assembler.with_provenance(GitProvenance)
            };

            let report = assembler
                .assemble(&options)
                .with_context(|| format!("Failed to assemble {}", options.out_dir.display()))?;

            println!("Assembled {} chunk(s) from {} piece(s)", report.chunks, report.pieces);
            println!("  Files:        {}", report.files);
            println!("  Remapped:     {}", if report.remapped { "yes" } else { "no" });
            println!(
                "  BM25:         k1={} b={} avgChunkLen={:.2}",
                report.bm25.k1, report.bm25.b, report.bm25.avg_chunk_len
            );
            if report.dropped_call_sites > 0 {
                println!("  Dropped call sites: {}", report.dropped_call_sites);
            }
            println!("  Output:       {}", report.out_dir.display());
        }
        Commands::Inspect { path } => {
            show_piece_stats(&path, config.strict).with_context(|| format!("Failed to inspect {}", path.display()))?;
        }
    }

    Ok(())
}

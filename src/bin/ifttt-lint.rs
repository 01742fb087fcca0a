use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{fs, thread};

use anyhow::{Context, Result};
use clap::Parser;
use ifttt_lint::{lint_diff, run_scan, Options, Report};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Unified diff to lint. Reads standard input when omitted or "-".
    #[arg(long)]
    diff: Option<PathBuf>,

    /// Scan a directory for directive files and validate label uniqueness
    /// instead of linting a diff.
    #[arg(long, conflicts_with = "diff", value_name = "DIR")]
    scan: Option<PathBuf>,

    /// Worktree root the diff paths are relative to.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Suppress diagnostics for a file or labeled scenario. `<glob>` or
    /// `<glob>#<label>`; globs honor `*` and `?`.
    #[arg(long = "ignore", value_name = "PATTERN")]
    ignore: Vec<String>,

    /// Worker threads for directive extraction. Defaults to the available
    /// parallelism.
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Emit verbose traces on standard error.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("ifttt_lint=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(report) => {
            for line in report.diagnostics() {
                println!("{line}");
            }
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            eprintln!("ifttt-lint: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<Report> {
    let options = Options {
        parallelism: cli.jobs.unwrap_or_else(default_parallelism),
        verbose: cli.verbose,
        ignore: cli.ignore.clone(),
    };

    if let Some(dir) = &cli.scan {
        return run_scan(dir, &options).map_err(Into::into);
    }

    let diff_text = match &cli.diff {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("reading diff from {}", path.display()))?,
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("reading diff from stdin")?;
            buffer
        }
    };
    lint_diff(&diff_text, &cli.root, &options).map_err(Into::into)
}

fn default_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

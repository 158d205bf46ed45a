use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use simdup::{DuplicateFinder, DuplicateReport, FinderError};
use simdup_config::{AnalysisMode, SimdupConfig, config_path, ensure_workspace_config};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Semantic duplicate code finder")]
struct Cli {
    #[arg(long, default_value = ".", help = "Workspace root to analyze")]
    workspace: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain, help = "Log output format")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index the workspace and report duplicate symbols as JSON.
    Analyze {
        #[arg(
            long,
            value_parser = parse_analysis_mode,
            help = "Analysis mode: full, incremental, or targeted. Defaults to the configured mode"
        )]
        mode: Option<AnalysisMode>,

        #[arg(
            long,
            num_args = 1..,
            help = "Files to re-index. Implies incremental mode"
        )]
        files: Vec<PathBuf>,

        #[arg(long, help = "Glob restricting which files a full run reads")]
        pattern: Vec<String>,

        #[arg(long, default_value = ".", help = "Directory to scan, relative to the workspace")]
        root: PathBuf,

        #[arg(long, help = "Minimum similarity score for a match")]
        threshold: Option<f32>,

        #[arg(long, help = "Keep full symbol content in the report")]
        verbose: bool,

        #[arg(long, help = "Write the report here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Print vector store and component statistics.
    Stats,
    /// Drop all indexed vectors and recorded file state.
    Clear,
}

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);

    match run(cli) {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<FinderError>() {
            Some(finder_err) => {
                eprintln!("simdup: {err:#}");
                std::process::exit(finder_err.exit_code());
            }
            None => Err(err),
        },
    }
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace)
        .map_err(|err| FinderError::configuration(simdup::ProgressStage::Initializing, err))
        .with_context(|| {
            format!(
                "failed to load or create workspace config at {}",
                config_path(&workspace).display()
            )
        })?;

    match cli.command {
        Command::Analyze {
            mode,
            files,
            pattern,
            root,
            threshold,
            verbose,
            output,
        } => {
            let mode = resolve_mode(
                mode,
                !files.is_empty(),
                !pattern.is_empty(),
                config.finder.analysis_mode,
            )
            .map_err(|message| {
                FinderError::configuration(simdup::ProgressStage::Initializing, message)
            })?;
            let mut finder = DuplicateFinder::new(&workspace, config)?
                .verbose(verbose)
                .with_query_threshold(threshold);

            let report = match mode {
                AnalysisMode::Full => {
                    let patterns = (!pattern.is_empty()).then_some(pattern.as_slice());
                    finder.analyze_project(&root, patterns)?
                }
                AnalysisMode::Incremental | AnalysisMode::Targeted => {
                    let files = (!files.is_empty()).then_some(files.as_slice());
                    finder.incremental_analysis(files)?
                }
            };
            write_report(&report, output)
        }
        Command::Stats => print_stats(&workspace, config),
        Command::Clear => {
            let mut finder = DuplicateFinder::new(&workspace, config)?;
            finder.clear()?;
            eprintln!("cleared index at {}", workspace.display());
            Ok(())
        }
    }
}

fn write_report(report: &DuplicateReport, output: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, json)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            eprintln!(
                "wrote {} findings to {}",
                report.findings.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_stats(workspace: &std::path::Path, config: SimdupConfig) -> Result<()> {
    let finder = DuplicateFinder::new(workspace, config)?;
    let info = finder.component_info()?;
    let json = serde_json::to_string_pretty(&info).context("failed to serialize stats")?;
    println!("{json}");
    Ok(())
}

fn parse_analysis_mode(value: &str) -> Result<AnalysisMode, String> {
    value.parse()
}

/// Picks the run mode. `--files` implies an incremental run and `--pattern`
/// only narrows a full one, so each is rejected alongside the other mode.
fn resolve_mode(
    requested: Option<AnalysisMode>,
    has_files: bool,
    has_patterns: bool,
    configured: AnalysisMode,
) -> Result<AnalysisMode, String> {
    let mode = match requested {
        Some(mode) => mode,
        None if has_files => AnalysisMode::Incremental,
        None => configured,
    };
    match mode {
        AnalysisMode::Full if has_files => {
            Err("--files cannot be combined with a full analysis".to_owned())
        }
        AnalysisMode::Incremental | AnalysisMode::Targeted if has_patterns => Err(format!(
            "--pattern only applies to full analysis, not {}",
            mode.as_str()
        )),
        mode => Ok(mode),
    }
}

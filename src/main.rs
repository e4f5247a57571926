//! captive - run line-oriented programs as streaming pipeline stages

mod cli;

use std::fs::File;
use std::io::{self, BufReader, BufWriter};

use anyhow::{Context, Result};
use captive::logging::{self, LogConfig};
use captive::pipeline::{Pipeline, PipelineConfig};
use captive::pool::WorkerPool;
use captive::unit::cache::CacheSource;
use captive::unit::document::{DocumentSink, DocumentSource};
use captive::unit::fold::{FoldSource, LineSink};
use captive::unit::{UnitSink, UnitSource};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::debug;

use cli::{ChildCommand, Cli, Commands, PipelineArgs, WrapPoolArgs};

/// Parse arguments, run the selected tool and exit with its status.
///
/// Tool failures print a colored error header followed by each cause in the
/// error chain and exit with status 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    match init_logging(&cli).and_then(|()| run(&cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            std::process::exit(1);
        }
    }
}

/// Dispatch to the selected tool, returning the exit status to propagate.
fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::WrapDoc(args) => run_pipeline(
            &args.child,
            &args.pipeline,
            DocumentSource::new(stdin()),
            DocumentSink::new(stdout()),
        ),
        Commands::WrapFold(args) => FoldSource::new(stdin(), args.fold_options())
            .map_err(anyhow::Error::from)
            .and_then(|source| {
                run_pipeline(&args.child, &args.pipeline, source, LineSink::new(stdout()))
            }),
        Commands::WrapCache(args) => run_pipeline(
            &args.child,
            &args.pipeline,
            CacheSource::new(stdin(), args.cache_options()),
            LineSink::new(stdout()),
        ),
        Commands::WrapPool(args) => run_pool(args).map(|()| 0),
        Commands::Completions(args) => {
            args.generate();
            Ok(0)
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let mut config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(ref path) = cli.log_file {
        config = config.with_file(path.clone());
    }
    let file = config.file_path.clone();
    logging::init(config).with_context(|| match file {
        Some(path) => format!("failed to open log file {}", path.display()),
        None => "failed to set up logging".to_string(),
    })
}

fn stdin() -> BufReader<io::Stdin> {
    BufReader::new(io::stdin())
}

fn stdout() -> BufWriter<io::Stdout> {
    BufWriter::new(io::stdout())
}

/// Run one child over `source`, returning the exit status to propagate.
fn run_pipeline<S: UnitSource, K: UnitSink>(
    child: &ChildCommand,
    args: &PipelineArgs,
    source: S,
    sink: K,
) -> Result<i32> {
    let pipeline = Pipeline::new(child.command.iter().cloned(), PipelineConfig::from(args))?;
    let report = pipeline
        .run(source, sink)
        .with_context(|| format!("while running {}", display_command(child)))?;
    debug!(
        units_fed = report.units_fed,
        units_emitted = report.units_emitted,
        "Pipeline report"
    );
    Ok(report.exit.shell_exit_code())
}

fn run_pool(args: &WrapPoolArgs) -> Result<()> {
    let mut pool = WorkerPool::start(args.child.command.as_slice(), args.pool_config(), stdout())?;
    if args.inputs.is_empty() {
        pool.add_input(io::stdin())?;
    }
    for path in &args.inputs {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        pool.add_input(file)?;
    }
    pool.join()
        .with_context(|| format!("while running {}", display_command(&args.child)))?;
    Ok(())
}

fn display_command(child: &ChildCommand) -> String {
    child
        .command
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

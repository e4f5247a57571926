//! Command-line interface definitions using clap.

use std::ffi::OsString;
use std::path::PathBuf;

use captive::fields::FieldSelection;
use captive::logging::LogFormat;
use captive::pipeline::{DEFAULT_FLUSH_EVERY, PipelineConfig};
use captive::pool::record::Framing;
use captive::pool::{PoolConfig, default_workers};
use captive::unit::cache::CacheOptions;
use captive::unit::fold::{DEFAULT_DELIMITERS, DEFAULT_WIDTH, FoldOptions};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// Wrap line-oriented programs as order-preserving pipeline stages.
#[derive(Parser, Debug)]
#[command(name = "captive")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all diagnostics except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Diagnostic format on stderr.
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write diagnostics to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Disable colored error output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command over base64-encoded documents, one per input line.
    WrapDoc(WrapDocArgs),

    /// Wrap long lines before the command and unwrap its output.
    WrapFold(WrapFoldArgs),

    /// Send only first-seen lines to the command; answer repeats from cache.
    WrapCache(WrapCacheArgs),

    /// Run several copies of the command over framed records.
    WrapPool(WrapPoolArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "captive",
            &mut std::io::stdout(),
        );
    }
}

/// Child command line, taken verbatim after the tool's own options.
#[derive(Args, Debug)]
pub struct ChildCommand {
    /// Program to run and its arguments.
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<OsString>,
}

/// Flow control shared by the single-child tools.
#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Units written to the child between forced flushes.
    #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: usize,

    /// Bound the number of units in flight (unbounded by default).
    #[arg(long, value_name = "UNITS")]
    pub queue_capacity: Option<usize>,
}

impl From<&PipelineArgs> for PipelineConfig {
    fn from(args: &PipelineArgs) -> Self {
        PipelineConfig {
            flush_every: args.flush_every,
            queue_capacity: args.queue_capacity,
        }
    }
}

/// Arguments for the document tool.
#[derive(Parser, Debug)]
pub struct WrapDocArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(flatten)]
    pub child: ChildCommand,
}

/// Arguments for the line-folding tool.
#[derive(Parser, Debug)]
pub struct WrapFoldArgs {
    /// Maximum bytes per wrapped piece.
    #[arg(short, long, default_value_t = DEFAULT_WIDTH)]
    pub width: usize,

    /// Characters to break at, most preferred first.
    #[arg(short, long, default_value = DEFAULT_DELIMITERS)]
    pub delimiters: String,

    /// Do not pass the delimiters around each break to the command;
    /// reinsert them afterwards.
    #[arg(short = 's', long)]
    pub strip_delimiters: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(flatten)]
    pub child: ChildCommand,
}

impl WrapFoldArgs {
    pub fn fold_options(&self) -> FoldOptions {
        FoldOptions {
            width: self.width,
            delimiters: self.delimiters.chars().collect(),
            keep_delimiters: !self.strip_delimiters,
        }
    }
}

/// Arguments for the caching tool.
#[derive(Parser, Debug)]
pub struct WrapCacheArgs {
    /// Fields forming the cache key, e.g. `1-3,5`; the whole line by default.
    #[arg(short, long, value_name = "FIELDS")]
    pub key: Option<FieldSelection>,

    /// Field separator, a single byte.
    #[arg(short = 't', long, default_value = "\t", value_parser = parse_separator)]
    pub separator: u8,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(flatten)]
    pub child: ChildCommand,
}

impl WrapCacheArgs {
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            key: self.key.clone(),
            separator: self.separator,
        }
    }
}

fn parse_separator(s: &str) -> Result<u8, String> {
    match s.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(format!("separator must be a single byte, got '{}'", s)),
    }
}

/// Record framing accepted by the pool.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingArg {
    /// WARC/1.0 records sized by Content-Length
    #[default]
    Warc,
    /// One record per line
    Lines,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Warc => Framing::Warc,
            FramingArg::Lines => Framing::Lines,
        }
    }
}

/// Arguments for the worker pool.
#[derive(Parser, Debug)]
pub struct WrapPoolArgs {
    /// Input files; stdin when none are given. Gzip input is detected.
    #[arg(short, long, num_args = 1.., value_name = "FILE")]
    pub inputs: Vec<PathBuf>,

    /// Number of parallel children.
    #[arg(short = 'j', long, default_value_t = default_workers())]
    pub workers: usize,

    /// Gzip each output record.
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// How records are delimited.
    #[arg(long, value_enum, default_value_t = FramingArg::Warc)]
    pub framing: FramingArg,

    /// Records buffered between the inputs and the children.
    #[arg(long, value_name = "RECORDS")]
    pub queue_capacity: Option<usize>,

    /// Records written to a child between forced flushes.
    #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: usize,

    #[command(flatten)]
    pub child: ChildCommand,
}

impl WrapPoolArgs {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            compress: self.compress,
            framing: self.framing.into(),
            queue_capacity: self.queue_capacity,
            flush_every: self.flush_every,
        }
    }
}

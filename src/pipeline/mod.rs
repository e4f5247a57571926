//! Single-child streaming pipeline.
//!
//! One captive child, one feeder thread, one reader thread, one unit queue
//! between them. Units come out in exactly the order they went in.
//!
//! ```text
//!   input ──▶ Feeder ──payload──▶ child ──lines──▶ Reader ──▶ output
//!               │                                    ▲
//!               └──────── descriptors (queue) ───────┘
//! ```

mod feeder;
mod reader;

pub use feeder::Feeder;
pub use reader::Reader;

use std::ffi::OsString;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{info, warn};

use crate::child::{ChildProcess, ChildReader, ChildWriter, TerminationReason};
use crate::error::{CaptiveError, Result};
use crate::queue::unit_queue;
use crate::unit::{UnitSink, UnitSource};

/// Default number of units between forced flushes of the child's stdin.
pub const DEFAULT_FLUSH_EVERY: usize = 4096;

/// How long to wait for the other thread's diagnosis after a secondary error.
const DIAGNOSIS_GRACE: Duration = Duration::from_secs(5);

const FEEDER: &str = "feeder";
const READER: &str = "reader";

/// Configuration for a single-child pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Units written to the child between forced flushes.
    pub flush_every: usize,
    /// Bound on queued descriptors; `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_every: DEFAULT_FLUSH_EVERY,
            queue_capacity: None,
        }
    }
}

/// Outcome of a pipeline run that completed without a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub units_fed: u64,
    pub units_emitted: u64,
    pub exit: TerminationReason,
}

impl PipelineReport {
    /// The child's exit status, or 256 when it did not exit normally.
    pub fn exit_code(&self) -> i32 {
        self.exit.exit_code()
    }
}

/// A child command wrapped as one pipeline stage.
#[derive(Debug, Clone)]
pub struct Pipeline {
    argv: Vec<OsString>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new<I, S>(argv: I, config: PipelineConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(CaptiveError::InvalidArgument("no command given".into()));
        }
        if config.flush_every == 0 {
            return Err(CaptiveError::InvalidArgument(
                "flush interval must be at least 1".into(),
            ));
        }
        Ok(Self { argv, config })
    }

    /// Launch the child and stream `source` through it into `sink`.
    ///
    /// The first error from either thread is returned as soon as it is
    /// known; the child is then killed. On success the child has been
    /// reaped and its exit status is in the report.
    pub fn run<S: UnitSource, K: UnitSink>(&self, source: S, sink: K) -> Result<PipelineReport> {
        let mut child = ChildProcess::launch(self.argv.as_slice())?;
        let stdin = child.take_stdin().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.take_stdout().ok_or_else(|| missing_pipe("stdout"))?;

        let (producer, consumer) = unit_queue(self.config.queue_capacity);
        let feeder = Feeder::new(
            source,
            ChildWriter::new(stdin),
            producer,
            self.config.flush_every,
        );
        let reader = Reader::new(ChildReader::new(stdout), consumer, sink);

        let (events_tx, events_rx) = bounded(2);
        spawn_stage(FEEDER, events_tx.clone(), move || feeder.run())?;
        spawn_stage(READER, events_tx, move || reader.run())?;

        let done = supervise(&events_rx, 2)?;
        let units_fed = units_of(&done, FEEDER);
        let units_emitted = units_of(&done, READER);

        let exit = child.wait()?;
        if exit.is_success() {
            info!(
                pid = child.pid().as_raw(),
                units_fed, units_emitted, "Pipeline finished"
            );
        } else {
            warn!(
                pid = child.pid().as_raw(),
                program = child.program(),
                %exit,
                "Captive child did not exit cleanly"
            );
        }

        Ok(PipelineReport {
            units_fed,
            units_emitted,
            exit,
        })
    }
}

pub(crate) fn missing_pipe(which: &str) -> CaptiveError {
    io::Error::other(format!("child {which} is not available")).into()
}

/// Final word from one worker thread.
pub(crate) struct StageReport {
    pub name: &'static str,
    pub result: Result<u64>,
}

/// Run `work` on a named thread and report its result (or its panic) on `events`.
pub(crate) fn spawn_stage<F>(name: &'static str, events: Sender<StageReport>, work: F) -> Result<()>
where
    F: FnOnce() -> Result<u64> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("captive-{name}"))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or(Err(CaptiveError::ThreadPanicked(name)));
            let _ = events.send(StageReport { name, result });
        })?;
    Ok(())
}

/// Errors that are usually a symptom of a failure on the other side.
fn is_secondary(err: &CaptiveError) -> bool {
    err.is_broken_pipe() || matches!(err, CaptiveError::QueueClosed)
}

/// Wait for `stages` reports and return each stage's count in arrival
/// order, or the first meaningful error.
pub(crate) fn supervise(
    events: &Receiver<StageReport>,
    stages: usize,
) -> Result<Vec<(&'static str, u64)>> {
    let mut done = Vec::with_capacity(stages);
    let mut deferred: Option<CaptiveError> = None;

    while done.len() < stages {
        let report = if deferred.is_some() {
            match events.recv_timeout(DIAGNOSIS_GRACE) {
                Ok(report) => report,
                Err(_) => break,
            }
        } else {
            events
                .recv()
                .map_err(|_| CaptiveError::ThreadPanicked("supervisor"))?
        };

        match report.result {
            Ok(units) => done.push((report.name, units)),
            // A broken pipe in a feeder is usually explained by the reader
            // or the reaper (the child stopped early); a closed queue by
            // whoever dropped the other end. Give them a chance to report.
            // A closed queue says the least, so any other secondary error
            // replaces it.
            Err(err) if is_secondary(&err) => {
                if deferred
                    .as_ref()
                    .is_none_or(|held| matches!(held, CaptiveError::QueueClosed))
                {
                    deferred = Some(err);
                }
                done.push((report.name, 0));
            }
            Err(err) => return Err(err),
        }
    }

    match deferred {
        Some(err) => Err(err),
        None => Ok(done),
    }
}

/// Sum the counts reported by stages called `name`.
pub(crate) fn units_of(done: &[(&'static str, u64)], name: &str) -> u64 {
    done.iter()
        .filter(|(stage, _)| *stage == name)
        .map(|(_, units)| units)
        .sum()
}

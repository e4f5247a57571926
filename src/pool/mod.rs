//! Worker pool: N captive children over one shared record queue.
//!
//! ```text
//!   inputs ──▶ record queue ──┬──▶ feeder 1 ──▶ child 1 ──▶ reader 1 ──┐
//!                             ├──▶ feeder 2 ──▶ child 2 ──▶ reader 2 ──┼──▶ output (mutex)
//!                             └──▶ feeder N ──▶ child N ──▶ reader N ──┘
//!                                      reaper waits on every child
//! ```
//!
//! Whole records are the unit of work, so no descriptors are needed. Output
//! order across workers is unspecified; records from one worker stay in
//! that worker's order and are never interleaved with each other.
//!
//! Any failure, including any child exiting with a non-zero status, fails
//! the whole run.

pub mod record;

use std::ffi::{OsStr, OsString};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use tracing::{debug, info};

use crate::child::{ChildProcess, ChildReader, ChildWriter};
use crate::error::{CaptiveError, Result};
use crate::pipeline::{
    DEFAULT_FLUSH_EVERY, StageReport, missing_pipe, spawn_stage, supervise, units_of,
};
use record::{Framing, RecordReader, gzip_record, open_input};

const INPUT: &str = "input";
const FEEDER: &str = "worker-feeder";
const READER: &str = "worker-reader";
const REAPER: &str = "reaper";

/// Interval between reaper polls.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of child processes.
    pub workers: usize,
    /// Gzip each output record as its own member.
    pub compress: bool,
    pub framing: Framing,
    /// Records buffered in the shared queue; defaults to two per worker.
    pub queue_capacity: Option<usize>,
    /// Records written to a child between forced flushes.
    pub flush_every: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            compress: false,
            framing: Framing::default(),
            queue_capacity: None,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Totals for a finished pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub records_in: u64,
    pub records_out: u64,
}

/// A running pool of captive children.
pub struct WorkerPool<W> {
    records: Option<Sender<Vec<u8>>>,
    events_tx: Sender<StageReport>,
    events: Receiver<StageReport>,
    stages: usize,
    workers: usize,
    framing: Framing,
    output: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> WorkerPool<W> {
    /// Launch `config.workers` copies of `argv` and their threads.
    pub fn start<S: AsRef<OsStr>>(argv: &[S], config: PoolConfig, output: W) -> Result<Self> {
        if config.workers == 0 {
            return Err(CaptiveError::InvalidArgument(
                "a pool needs at least one worker".into(),
            ));
        }
        if config.flush_every == 0 {
            return Err(CaptiveError::InvalidArgument(
                "flush interval must be at least 1".into(),
            ));
        }
        let argv: Vec<OsString> = argv.iter().map(|a| a.as_ref().to_os_string()).collect();

        let capacity = config.queue_capacity.unwrap_or(config.workers * 2).max(1);
        let (records_tx, records_rx) = bounded::<Vec<u8>>(capacity);
        let (events_tx, events) = unbounded();
        let output = Arc::new(Mutex::new(output));

        let mut children = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let mut child = ChildProcess::launch(argv.as_slice())?;
            let writer = ChildWriter::new(child.take_stdin().ok_or_else(|| missing_pipe("stdin"))?);
            let reader =
                ChildReader::new(child.take_stdout().ok_or_else(|| missing_pipe("stdout"))?);
            debug!(worker, pid = child.pid().as_raw(), "Started pool worker");

            let records = records_rx.clone();
            let flush_every = config.flush_every;
            spawn_stage(FEEDER, events_tx.clone(), move || {
                feed_worker(&records, writer, flush_every)
            })?;

            let output = Arc::clone(&output);
            let (framing, compress) = (config.framing, config.compress);
            spawn_stage(READER, events_tx.clone(), move || {
                drain_worker(reader, framing, compress, &output)
            })?;

            children.push(child);
        }
        // Only the feeders may hold the receiving side, so the queue
        // disconnects once every worker is gone.
        drop(records_rx);

        spawn_stage(REAPER, events_tx.clone(), move || reap(children))?;

        Ok(Self {
            records: Some(records_tx),
            events_tx,
            events,
            stages: 2 * config.workers + 1,
            workers: config.workers,
            framing: config.framing,
            output,
        })
    }

    /// Read records from `input` on a thread of its own and queue them.
    ///
    /// Several inputs are read concurrently and their records interleave.
    pub fn add_input<R: Read + Send + 'static>(&mut self, input: R) -> Result<()> {
        let records = self.records.clone().ok_or(CaptiveError::QueueClosed)?;
        let framing = self.framing;
        spawn_stage(INPUT, self.events_tx.clone(), move || {
            read_input(input, framing, &records)
        })?;
        self.stages += 1;
        Ok(())
    }

    /// Close the record queue once all inputs are read and wait for every
    /// thread and child. Returns on the first error.
    pub fn join(mut self) -> Result<PoolReport> {
        self.records.take();

        let done = supervise(&self.events, self.stages)?;
        self.output
            .lock()
            .map_err(|_| CaptiveError::ThreadPanicked(READER))?
            .flush()?;

        let report = PoolReport {
            workers: self.workers,
            records_in: units_of(&done, INPUT),
            records_out: units_of(&done, READER),
        };
        info!(
            workers = report.workers,
            records_in = report.records_in,
            records_out = report.records_out,
            "Worker pool finished"
        );
        Ok(report)
    }
}

fn read_input<R: Read + Send + 'static>(
    input: R,
    framing: Framing,
    records: &Sender<Vec<u8>>,
) -> Result<u64> {
    let mut reader = RecordReader::new(open_input(input)?, framing);
    let mut count = 0;
    while let Some(record) = reader.read_record()? {
        records.send(record).map_err(|_| CaptiveError::QueueClosed)?;
        count += 1;
    }
    Ok(count)
}

fn feed_worker(records: &Receiver<Vec<u8>>, mut writer: ChildWriter, flush_every: usize) -> Result<u64> {
    let mut fed = 0;
    let mut pending = 0;
    loop {
        let record = match records.try_recv() {
            Ok(record) => record,
            Err(TryRecvError::Empty) => {
                // Nothing queued: let the child work on what it has while we wait.
                writer.flush()?;
                pending = 0;
                match records.recv() {
                    Ok(record) => record,
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };
        writer.write_all(&record)?;
        fed += 1;
        pending += 1;
        if pending >= flush_every {
            writer.flush()?;
            pending = 0;
        }
    }
    writer.close()?;
    Ok(fed)
}

fn drain_worker<W: Write>(
    mut reader: ChildReader,
    framing: Framing,
    compress: bool,
    output: &Mutex<W>,
) -> Result<u64> {
    let mut records = RecordReader::new(reader.get_mut(), framing);
    let mut emitted = 0;
    while let Some(record) = records.read_record()? {
        let record = if compress {
            gzip_record(&record)?
        } else {
            record
        };
        output
            .lock()
            .map_err(|_| CaptiveError::ThreadPanicked(READER))?
            .write_all(&record)?;
        emitted += 1;
    }
    Ok(emitted)
}

/// Wait for every child; the first one that fails ends the run.
fn reap(mut children: Vec<ChildProcess>) -> Result<u64> {
    let mut reaped = 0;
    while !children.is_empty() {
        let mut progressed = false;
        let mut index = 0;
        while index < children.len() {
            match children[index].try_wait()? {
                Some(reason) if reason.is_success() => {
                    children.swap_remove(index);
                    reaped += 1;
                    progressed = true;
                }
                Some(reason) => {
                    return Err(CaptiveError::ChildExit {
                        pid: children[index].pid().as_raw(),
                        reason,
                    });
                }
                None => index += 1,
            }
        }
        if !progressed {
            std::thread::sleep(REAP_POLL);
        }
    }
    Ok(reaped)
}

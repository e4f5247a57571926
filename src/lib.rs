//! Wrap line-oriented programs as order-preserving pipeline stages.
//!
//! A captive child reads lines on stdin and writes exactly one line on
//! stdout per input line, in order. `captive` turns such a program into a
//! stage that consumes and emits larger logical units (documents, long
//! lines, deduplicated lines, framed records) without the program knowing.
//!
//! - [`pipeline::Pipeline`] streams units through one child with a feeder
//!   thread and a reader thread, detecting children that answer too few or
//!   too many lines.
//! - [`pool::WorkerPool`] spreads whole records over several children.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Cursor;
//!
//! use captive::pipeline::{Pipeline, PipelineConfig};
//! use captive::unit::fold::{FoldOptions, FoldSource, LineSink};
//!
//! let source = FoldSource::new(Cursor::new(b"hello world\n".to_vec()), FoldOptions::default())?;
//! let pipeline = Pipeline::new(["tr", "a-z", "A-Z"], PipelineConfig::default())?;
//! let report = pipeline.run(source, LineSink::new(std::io::stdout()))?;
//! assert_eq!(report.exit_code(), 0);
//! # Ok::<(), captive::error::CaptiveError>(())
//! ```

pub mod child;
pub mod error;
pub mod fields;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod unit;

pub use error::{CaptiveError, Result};

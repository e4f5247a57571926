//! Logical units and the descriptors that reassemble them.
//!
//! A unit is what the outside world sees (a document, a sentence, a line).
//! The child only sees lines, so every unit travels twice: its payload goes
//! to the child as zero or more lines, and its [`UnitDescriptor`] goes
//! through the unit queue to tell the reader how many child output lines
//! belong to the unit and how to put them back together.

pub mod cache;
pub mod document;
pub mod fold;

use std::io::{self, BufRead};
use std::sync::{Arc, OnceLock};

use crate::error::Result;

/// Shared cache entry. Filled once by the reader from the child's answer.
///
/// Slots live behind an `Arc`, so a descriptor in the queue stays valid
/// however the cache map grows.
pub type CacheSlot = Arc<OnceLock<Vec<u8>>>;

/// How to rebuild one unit from the child's output lines.
#[derive(Debug, Clone)]
pub enum UnitDescriptor {
    /// `line_count` lines joined with `\n`, plus a final `\n` when
    /// `trailing_newline` is set.
    Document {
        line_count: usize,
        trailing_newline: bool,
    },
    /// One child line per delimiter, each followed by its delimiter.
    Wrapped { delimiters: Vec<Vec<u8>> },
    /// A cache entry: one child line when still empty, none when filled.
    Cached(CacheSlot),
}

impl UnitDescriptor {
    /// Number of child output lines this unit consumes.
    pub fn expected_output_lines(&self) -> usize {
        match self {
            Self::Document { line_count, .. } => *line_count,
            Self::Wrapped { delimiters } => delimiters.len(),
            Self::Cached(slot) => usize::from(slot.get().is_none()),
        }
    }

    /// Rebuild the unit from exactly [`expected_output_lines`] lines.
    ///
    /// [`expected_output_lines`]: UnitDescriptor::expected_output_lines
    pub fn reassemble(&self, lines: Vec<Vec<u8>>) -> Vec<u8> {
        match self {
            Self::Document {
                trailing_newline, ..
            } => {
                let mut unit = lines.join(&b'\n');
                if *trailing_newline {
                    unit.push(b'\n');
                }
                unit
            }
            Self::Wrapped { delimiters } => {
                let size = lines.iter().chain(delimiters).map(Vec::len).sum();
                let mut unit = Vec::with_capacity(size);
                for (line, delimiter) in lines.iter().zip(delimiters) {
                    unit.extend_from_slice(line);
                    unit.extend_from_slice(delimiter);
                }
                unit
            }
            Self::Cached(slot) => {
                let mut lines = lines.into_iter();
                slot.get_or_init(|| lines.next().unwrap_or_default()).clone()
            }
        }
    }
}

/// One unit as produced by a [`UnitSource`]: its descriptor and the bytes
/// to send to the child (newline-terminated lines, possibly none).
#[derive(Debug)]
pub struct FeedUnit {
    pub descriptor: UnitDescriptor,
    pub payload: Vec<u8>,
}

/// Splits the real input into units.
pub trait UnitSource: Send + 'static {
    /// Read and describe the next unit, or `None` when the input is exhausted.
    fn next_unit(&mut self) -> Result<Option<FeedUnit>>;
}

/// Writes reassembled units downstream.
pub trait UnitSink: Send + 'static {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()>;

    /// Flush after the last unit.
    fn finish(&mut self) -> Result<()>;
}

/// Read one input line without its `\n`; `None` at end of input.
pub(crate) fn read_input_line<R: BufRead>(input: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if input.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

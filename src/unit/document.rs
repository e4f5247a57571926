//! Base64 documents: one encoded document per input line.
//!
//! Each decoded document is sent to the child line by line; the child's
//! answer lines are joined back into one document and re-encoded.

use std::io::{BufRead, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{FeedUnit, UnitDescriptor, UnitSink, UnitSource, read_input_line};
use crate::error::{CaptiveError, Result};

/// Reads base64 documents, one per line.
pub struct DocumentSource<R> {
    input: R,
    unit: u64,
}

impl<R: BufRead + Send + 'static> DocumentSource<R> {
    pub fn new(input: R) -> Self {
        Self { input, unit: 0 }
    }
}

impl<R: BufRead + Send + 'static> UnitSource for DocumentSource<R> {
    fn next_unit(&mut self) -> Result<Option<FeedUnit>> {
        let Some(encoded) = read_input_line(&mut self.input)? else {
            return Ok(None);
        };
        self.unit += 1;

        let document = STANDARD
            .decode(&encoded)
            .map_err(|e| CaptiveError::framing(self.unit, format!("invalid base64: {e}")))?;
        Ok(Some(describe_document(document)))
    }
}

/// Split a decoded document into newline-terminated lines for the child.
///
/// An empty document is sent as a single empty line.
pub fn describe_document(mut document: Vec<u8>) -> FeedUnit {
    let trailing_newline = document.last() == Some(&b'\n');
    if !trailing_newline {
        document.push(b'\n');
    }
    let line_count = document.iter().filter(|&&b| b == b'\n').count();
    FeedUnit {
        descriptor: UnitDescriptor::Document {
            line_count,
            trailing_newline,
        },
        payload: document,
    }
}

/// Writes each document base64-encoded on its own line.
pub struct DocumentSink<W> {
    output: W,
}

impl<W: Write + Send + 'static> DocumentSink<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write + Send + 'static> UnitSink for DocumentSink<W> {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        let mut encoded = STANDARD.encode(unit).into_bytes();
        encoded.push(b'\n');
        self.output.write_all(&encoded)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }
}

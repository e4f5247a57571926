//! Record framing for the worker pool.

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::{CaptiveError, Result};

const WARC_VERSION: &[u8] = b"WARC/1.0";
const CONTENT_LENGTH: &[u8] = b"Content-Length:";
const RECORD_END: &[u8] = b"\r\n\r\n";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How records are delimited on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// WARC/1.0 records sized by their `Content-Length` header.
    #[default]
    Warc,
    /// One record per line.
    Lines,
}

/// Splits a byte stream into whole records, framing bytes included.
pub struct RecordReader<R> {
    input: R,
    framing: Framing,
    records: u64,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(input: R, framing: Framing) -> Self {
        Self {
            input,
            framing,
            records: 0,
        }
    }

    /// Read the next record; `None` at a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let record = match self.framing {
            Framing::Lines => self.read_line_record()?,
            Framing::Warc => self.read_warc_record()?,
        };
        if record.is_some() {
            self.records += 1;
        }
        Ok(record)
    }

    fn read_line_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.input.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        Ok(Some(line))
    }

    fn read_warc_record(&mut self) -> Result<Option<Vec<u8>>> {
        let unit = self.records + 1;
        let mut record = Vec::with_capacity(32 * 1024);

        if self.input.read_until(b'\n', &mut record)? == 0 {
            return Ok(None);
        }
        let version = header_line(&record);
        if version != WARC_VERSION {
            return Err(CaptiveError::framing(
                unit,
                format!(
                    "expected WARC/1.0 header but got {:?}",
                    String::from_utf8_lossy(version)
                ),
            ));
        }

        let mut length = None;
        loop {
            let start = record.len();
            if self.input.read_until(b'\n', &mut record)? == 0 {
                return Err(CaptiveError::framing(unit, "WARC ended in header"));
            }
            let line = header_line(&record[start..]);
            if line.is_empty() {
                break;
            }
            if line.len() >= CONTENT_LENGTH.len()
                && line[..CONTENT_LENGTH.len()].eq_ignore_ascii_case(CONTENT_LENGTH)
            {
                if length.is_some() {
                    return Err(CaptiveError::framing(unit, "two Content-Length headers"));
                }
                length = Some(parse_length(&line[CONTENT_LENGTH.len()..]).ok_or_else(|| {
                    CaptiveError::framing(
                        unit,
                        format!(
                            "Content-Length parse error in {:?}",
                            String::from_utf8_lossy(line)
                        ),
                    )
                })?);
            }
        }
        let length =
            length.ok_or_else(|| CaptiveError::framing(unit, "no Content-Length header"))?;

        // Content plus the CRLF CRLF that closes every record.
        let header_len = record.len();
        record.resize(header_len + length + RECORD_END.len(), 0);
        self.input
            .read_exact(&mut record[header_len..])
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => CaptiveError::framing(
                    unit,
                    format!("end of file while reading content of length {length}"),
                ),
                _ => e.into(),
            })?;
        if !record.ends_with(RECORD_END) {
            return Err(CaptiveError::framing(
                unit,
                "end of WARC record missing CRLF CRLF",
            ));
        }
        Ok(Some(record))
    }
}

/// A header line without its line terminator.
fn header_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_length(value: &[u8]) -> Option<usize> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

/// Wrap `input` in a buffered reader, decompressing it when it starts with
/// the gzip magic. Concatenated gzip members are read as one stream.
pub fn open_input<R: Read + Send + 'static>(input: R) -> io::Result<Box<dyn BufRead + Send>> {
    let mut buffered = BufReader::new(input);
    let compressed = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    Ok(if compressed {
        Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
    } else {
        Box::new(buffered)
    })
}

/// Compress one record as a standalone gzip member.
pub fn gzip_record(record: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(record.len() / 2), Compression::default());
    encoder.write_all(record)?;
    encoder.finish()
}

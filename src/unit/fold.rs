//! Sentence wrapping: long lines are cut into pieces for the child.
//!
//! Cuts happen at delimiters where possible. Widths are measured in bytes,
//! delimiters are characters, and a run of consecutive delimiters around a
//! cut is never split.

use std::io::{BufRead, Write};

use super::{FeedUnit, UnitDescriptor, UnitSink, UnitSource, read_input_line};
use crate::error::{CaptiveError, Result};

/// Default maximum piece width in bytes.
pub const DEFAULT_WIDTH: usize = 80;

/// Default delimiters, in order of preference.
pub const DEFAULT_DELIMITERS: &str = ":, -./";

#[derive(Debug, Clone)]
pub struct FoldOptions {
    /// Maximum bytes per piece sent to the child.
    pub width: usize,
    /// Cut points, most preferred first.
    pub delimiters: Vec<char>,
    /// Send the delimiters around a cut to the child with the piece. When
    /// false they are held back and reinserted after the child's answer.
    pub keep_delimiters: bool,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            delimiters: DEFAULT_DELIMITERS.chars().collect(),
            keep_delimiters: true,
        }
    }
}

impl FoldOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(CaptiveError::InvalidArgument(
                "wrap width must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn delimiter_index(&self, c: char) -> Option<usize> {
        self.delimiters.iter().position(|&d| d == c)
    }
}

/// A piece of a wrapped line and the delimiter text that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece<'a> {
    pub text: &'a str,
    pub delimiter: &'a str,
}

/// Cut `line` into pieces of at most `options.width` bytes.
///
/// A piece only exceeds the width when it is a single character wider than
/// `options.width`. Concatenating every piece's text and delimiter yields `line` again. An
/// empty line produces one empty piece.
pub fn wrap_line<'a>(line: &'a str, options: &FoldOptions) -> Vec<Piece<'a>> {
    let width = options.width;
    let mut pieces = Vec::new();

    let mut pos = 0;
    let mut last_cut = 0;
    // Start of the delimiter run ending at the latest occurrence of each delimiter.
    let mut delimiter_positions = vec![0; options.delimiters.len()];
    // Start of the current run of delimiters, or `pos` outside a run.
    let mut run_start = 0;

    while let Some(c) = line[pos..].chars().next() {
        pos += c.len_utf8();

        match options.delimiter_index(c) {
            Some(idx) => delimiter_positions[idx] = run_start,
            None => run_start = pos,
        }

        if pos - last_cut < width {
            continue;
        }

        // Prefer the best delimiter seen since the last cut. Otherwise cut
        // before `c` if it overshoots, unless it is alone in the piece.
        let before = pos - c.len_utf8();
        let hard_cut = if pos - last_cut > width && before > last_cut {
            before
        } else {
            pos
        };
        let cut = delimiter_positions
            .iter()
            .copied()
            .find(|&p| p > last_cut)
            .unwrap_or(hard_cut);

        // Take the delimiters after the cut along with it.
        let mut cut_end = cut;
        while let Some(c) = line[cut_end..].chars().next() {
            if options.keep_delimiters && cut_end + c.len_utf8() - last_cut > width {
                break;
            }
            if options.delimiter_index(c).is_none() {
                break;
            }
            cut_end += c.len_utf8();
        }

        pieces.push(if options.keep_delimiters {
            Piece {
                text: &line[last_cut..cut_end],
                delimiter: "",
            }
        } else {
            Piece {
                text: &line[last_cut..cut],
                delimiter: &line[cut..cut_end],
            }
        });

        last_cut = cut_end;
        pos = cut_end;
        run_start = cut_end;
    }

    if last_cut < pos || pos == 0 {
        pieces.push(Piece {
            text: &line[last_cut..pos],
            delimiter: "",
        });
    }
    pieces
}

/// Reads UTF-8 lines and wraps each one.
pub struct FoldSource<R> {
    input: R,
    options: FoldOptions,
    unit: u64,
}

impl<R: BufRead + Send + 'static> FoldSource<R> {
    pub fn new(input: R, options: FoldOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            input,
            options,
            unit: 0,
        })
    }
}

impl<R: BufRead + Send + 'static> UnitSource for FoldSource<R> {
    fn next_unit(&mut self) -> Result<Option<FeedUnit>> {
        let Some(line) = read_input_line(&mut self.input)? else {
            return Ok(None);
        };
        self.unit += 1;

        let line = std::str::from_utf8(&line)
            .map_err(|e| CaptiveError::framing(self.unit, format!("not UTF-8: {e}")))?;
        let pieces = wrap_line(line, &self.options);

        let mut payload = Vec::with_capacity(line.len() + pieces.len());
        let mut delimiters = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            payload.extend_from_slice(piece.text.as_bytes());
            payload.push(b'\n');
            delimiters.push(piece.delimiter.as_bytes().to_vec());
        }

        Ok(Some(FeedUnit {
            descriptor: UnitDescriptor::Wrapped { delimiters },
            payload,
        }))
    }
}

/// Writes each unit followed by a newline.
pub struct LineSink<W> {
    output: W,
}

impl<W: Write + Send + 'static> LineSink<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write + Send + 'static> UnitSink for LineSink<W> {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        self.output.write_all(unit)?;
        self.output.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }
}

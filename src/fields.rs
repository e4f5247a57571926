//! Cut-style field selection (`1-3,9,12-`).

use std::str::FromStr;

use crate::error::CaptiveError;

/// Half-open range of 0-based field indices. `end == None` runs to the end
/// of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRange {
    pub begin: usize,
    pub end: Option<usize>,
}

/// A sorted, merged, non-overlapping set of field ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    ranges: Vec<FieldRange>,
}

impl FieldSelection {
    pub fn ranges(&self) -> &[FieldRange] {
        &self.ranges
    }

    /// Slice the selected fields out of `line`.
    ///
    /// Adjacent selected fields come back as one slice, separators
    /// included. Fields past the end of the line are silently absent.
    pub fn select<'a>(&self, line: &'a [u8], separator: u8) -> Vec<&'a [u8]> {
        let next_field = |from: usize| {
            line[from..]
                .iter()
                .position(|&b| b == separator)
                .map_or(line.len(), |i| from + i)
                + 1
        };

        let mut selected = Vec::new();
        let mut begin = 0;
        let mut index = 0;
        for range in &self.ranges {
            while index < range.begin {
                begin = next_field(begin);
                if begin >= line.len() {
                    return selected;
                }
                index += 1;
            }
            let Some(end) = range.end else {
                selected.push(&line[begin..]);
                return selected;
            };
            let start = begin;
            while index < end {
                begin = next_field(begin);
                if begin >= line.len() {
                    selected.push(&line[start..]);
                    return selected;
                }
                index += 1;
            }
            selected.push(&line[start..begin - 1]);
        }
        selected
    }
}

impl FromStr for FieldSelection {
    type Err = CaptiveError;

    fn from_str(list: &str) -> Result<Self, Self::Err> {
        let mut ranges = list
            .split(',')
            .map(parse_range)
            .collect::<Result<Vec<_>, _>>()?;

        ranges.sort_by_key(|r| r.begin);
        let mut merged: Vec<FieldRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut() {
                match last.end {
                    Some(end) if end == range.begin => {
                        last.end = range.end;
                        continue;
                    }
                    Some(end) if end < range.begin => {}
                    _ => {
                        return Err(CaptiveError::InvalidArgument(format!(
                            "overlapping field ranges in {list:?}"
                        )));
                    }
                }
            }
            merged.push(range);
        }
        Ok(Self { ranges: merged })
    }
}

fn parse_range(part: &str) -> Result<FieldRange, CaptiveError> {
    let invalid = |why: &str| CaptiveError::InvalidArgument(format!("field {part:?}: {why}"));
    let number = |s: &str| -> Result<usize, CaptiveError> {
        s.parse::<usize>()
            .map_err(|_| invalid("expected a field number"))
    };

    let range = match part.split_once('-') {
        None => {
            let field = number(part)?;
            if field == 0 {
                return Err(invalid("fields are numbered from 1"));
            }
            FieldRange {
                begin: field - 1,
                end: Some(field),
            }
        }
        Some((from, to)) => {
            let begin = if from.is_empty() {
                0
            } else {
                number(from)?
                    .checked_sub(1)
                    .ok_or_else(|| invalid("fields are numbered from 1"))?
            };
            let end = if to.is_empty() {
                None
            } else {
                Some(number(to)?)
            };
            if let Some(end) = end
                && end <= begin
            {
                return Err(invalid("empty range"));
            }
            FieldRange { begin, end }
        }
    };
    Ok(range)
}

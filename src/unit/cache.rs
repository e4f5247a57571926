//! Deduplicating cache in front of a one-line-in, one-line-out child.
//!
//! Only the first line with a given key reaches the child. Every line,
//! repeat or not, is queued as a [`CacheSlot`]; the reader fills a slot
//! from the child's answer the first time it meets it and replays the
//! stored answer afterwards.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::BufRead;

use super::{CacheSlot, FeedUnit, UnitDescriptor, UnitSource, read_input_line};
use crate::error::Result;
use crate::fields::FieldSelection;

/// Default field separator for key columns.
pub const DEFAULT_SEPARATOR: u8 = b'\t';

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Columns forming the key; `None` keys on the whole line.
    pub key: Option<FieldSelection>,
    pub separator: u8,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key: None,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

impl CacheOptions {
    /// Build the dedup key for `line`.
    pub fn key_of(&self, line: &[u8]) -> Vec<u8> {
        let Some(selection) = &self.key else {
            return line.to_vec();
        };
        // Length-prefix each piece so different splits cannot collide.
        let mut key = Vec::with_capacity(line.len() + 16);
        for field in selection.select(line, self.separator) {
            key.extend_from_slice(&(field.len() as u64).to_le_bytes());
            key.extend_from_slice(field);
        }
        key
    }
}

/// Reads lines and sends only unseen keys to the child.
pub struct CacheSource<R> {
    input: R,
    options: CacheOptions,
    slots: HashMap<Vec<u8>, CacheSlot>,
    misses: u64,
}

impl<R: BufRead + Send + 'static> CacheSource<R> {
    pub fn new(input: R, options: CacheOptions) -> Self {
        Self {
            input,
            options,
            slots: HashMap::new(),
            misses: 0,
        }
    }

    /// Lines sent to the child so far.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl<R: BufRead + Send + 'static> UnitSource for CacheSource<R> {
    fn next_unit(&mut self) -> Result<Option<FeedUnit>> {
        let Some(line) = read_input_line(&mut self.input)? else {
            return Ok(None);
        };

        let key = self.options.key_of(&line);
        let (slot, payload) = match self.slots.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), Vec::new()),
            Entry::Vacant(entry) => {
                let slot = entry.insert(CacheSlot::default()).clone();
                self.misses += 1;
                let mut payload = line;
                payload.push(b'\n');
                (slot, payload)
            }
        };

        Ok(Some(FeedUnit {
            descriptor: UnitDescriptor::Cached(slot),
            payload,
        }))
    }
}

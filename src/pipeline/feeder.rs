//! Feeder: real input to the child's stdin, descriptors to the reader.

use tracing::{debug, trace};

use crate::child::ChildWriter;
use crate::error::Result;
use crate::queue::UnitProducer;
use crate::unit::{UnitDescriptor, UnitSource};

pub struct Feeder<S> {
    source: S,
    writer: ChildWriter,
    queue: UnitProducer<UnitDescriptor>,
    flush_every: usize,
}

impl<S: UnitSource> Feeder<S> {
    pub fn new(
        source: S,
        writer: ChildWriter,
        queue: UnitProducer<UnitDescriptor>,
        flush_every: usize,
    ) -> Self {
        Self {
            source,
            writer,
            queue,
            flush_every: flush_every.max(1),
        }
    }

    /// Feed every unit, then send end-of-stream and close the child's stdin.
    ///
    /// Returns the number of units fed.
    pub fn run(mut self) -> Result<u64> {
        let mut units = 0u64;
        let mut pending = 0usize;

        while let Some(unit) = self.source.next_unit()? {
            units += 1;

            // The descriptor must be visible to the reader before any of the
            // unit's input can reach the child.
            if let Some(descriptor) = self.queue.try_produce(unit.descriptor)? {
                // Queue is full: push out what the reader is waiting for first.
                self.writer.flush()?;
                self.queue.produce(descriptor)?;
            }

            if unit.payload.is_empty() {
                continue;
            }
            self.writer.write_all(&unit.payload)?;

            pending += 1;
            if pending >= self.flush_every {
                trace!(units, "Flushing child input");
                self.writer.flush()?;
                pending = 0;
            }
        }

        self.writer.flush()?;
        self.queue.finish()?;
        self.writer.close()?;
        debug!(units, "Feeder reached end of input");
        Ok(units)
    }
}

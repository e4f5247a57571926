//! Reader: child output back into units, in input order.

use tracing::debug;

use crate::child::ChildReader;
use crate::error::{CaptiveError, Result};
use crate::queue::UnitConsumer;
use crate::unit::{UnitDescriptor, UnitSink};

pub struct Reader<K> {
    reader: ChildReader,
    queue: UnitConsumer<UnitDescriptor>,
    sink: K,
}

impl<K: UnitSink> Reader<K> {
    pub fn new(reader: ChildReader, queue: UnitConsumer<UnitDescriptor>, sink: K) -> Self {
        Self {
            reader,
            queue,
            sink,
        }
    }

    /// Reassemble units until end-of-stream. Returns the number of units written.
    pub fn run(mut self) -> Result<u64> {
        let mut unit = 0u64;

        while let Some(descriptor) = self.queue.consume()? {
            unit += 1;

            let expected = descriptor.expected_output_lines();
            let mut lines = Vec::with_capacity(expected);
            for _ in 0..expected {
                match self.reader.read_line()? {
                    Some(line) => lines.push(line),
                    None => return Err(CaptiveError::UnderProduction { unit }),
                }
            }
            self.sink.write_unit(&descriptor.reassemble(lines))?;

            // The feeder queues a descriptor before sending its input, so
            // output that shows up while the queue is still empty was never
            // asked for.
            if self.queue.is_empty() && self.reader.has_pending_output()? && self.queue.is_empty()
            {
                return Err(CaptiveError::OverProduction { unit: unit + 1 });
            }
        }

        if self.reader.has_pending_output()? {
            return Err(CaptiveError::OverProduction { unit: unit + 1 });
        }

        self.sink.finish()?;
        debug!(units = unit, "Reader reached end-of-stream");
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::{ChildWriter, PipeFd};
    use crate::queue::unit_queue;
    use crate::unit::fold::LineSink;

    fn document(line_count: usize) -> UnitDescriptor {
        UnitDescriptor::Document {
            line_count,
            trailing_newline: false,
        }
    }

    #[test]
    fn test_reader_reassembles_in_order() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let (tx, rx) = unit_queue(None);

        tx.produce(document(2)).unwrap();
        tx.produce(document(1)).unwrap();
        tx.finish().unwrap();

        let mut child_out = ChildWriter::new(write_fd);
        for line in ["a", "b", "c"] {
            child_out.write_line(line.as_bytes()).unwrap();
        }
        child_out.close().unwrap();

        let units = Reader::new(ChildReader::new(read_fd), rx, LineSink::new(Vec::new()))
            .run()
            .unwrap();
        assert_eq!(units, 2);
    }

    #[test]
    fn test_reader_detects_under_production() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let (tx, rx) = unit_queue(None);

        tx.produce(document(1)).unwrap();
        tx.produce(document(2)).unwrap();
        tx.finish().unwrap();

        let mut child_out = ChildWriter::new(write_fd);
        child_out.write_line(b"a").unwrap();
        child_out.write_line(b"b").unwrap();
        child_out.close().unwrap();

        let err = Reader::new(ChildReader::new(read_fd), rx, LineSink::new(Vec::new()))
            .run()
            .unwrap_err();
        assert!(matches!(err, CaptiveError::UnderProduction { unit: 2 }));
    }

    #[test]
    fn test_reader_detects_trailing_output() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let (tx, rx) = unit_queue(None);

        tx.produce(document(1)).unwrap();
        tx.finish().unwrap();

        let mut child_out = ChildWriter::new(write_fd);
        child_out.write_line(b"a").unwrap();
        child_out.write_line(b"extra").unwrap();
        child_out.close().unwrap();

        let err = Reader::new(ChildReader::new(read_fd), rx, LineSink::new(Vec::new()))
            .run()
            .unwrap_err();
        assert!(matches!(err, CaptiveError::OverProduction { unit: 2 }));
    }

    #[test]
    fn test_reader_detects_unrequested_output_mid_stream() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let (tx, rx) = unit_queue(None);

        // One unit queued, no end-of-stream yet: the feeder is still "working".
        tx.produce(document(1)).unwrap();

        let mut child_out = ChildWriter::new(write_fd);
        child_out.write_line(b"a").unwrap();
        child_out.write_line(b"unasked").unwrap();
        child_out.flush().unwrap();

        let err = Reader::new(ChildReader::new(read_fd), rx, LineSink::new(Vec::new()))
            .run()
            .unwrap_err();
        assert!(matches!(err, CaptiveError::OverProduction { unit: 2 }));
        drop(tx);
    }

    #[test]
    fn test_reader_without_end_of_stream() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let (tx, rx) = unit_queue::<UnitDescriptor>(None);
        drop(tx);
        drop(write_fd);

        let err = Reader::new(ChildReader::new(read_fd), rx, LineSink::new(Vec::new()))
            .run()
            .unwrap_err();
        assert!(matches!(err, CaptiveError::QueueClosed));
    }
}

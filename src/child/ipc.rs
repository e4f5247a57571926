//! Owned pipe endpoints and buffered line I/O over them.
//!
//! All reads and writes retry on EINTR. A [`PipeFd`] closes its descriptor
//! exactly once, when it is dropped, on every exit path.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;

/// Default buffer size for child I/O (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// One end of an OS pipe, owned.
///
/// Not `Clone`: a descriptor is never duplicated implicitly.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create a close-on-exec pipe, returning `(read_end, write_end)`.
    ///
    /// Both flags are set atomically with creation so a concurrent fork in
    /// another thread can never inherit these ends across exec.
    pub fn pipe() -> nix::Result<(PipeFd, PipeFd)> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
        Ok((PipeFd::new(read), PipeFd::new(write)))
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered reader over a child's stdout.
pub struct ChildReader {
    reader: BufReader<PipeFd>,
}

impl ChildReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Read one line without its trailing `\n`.
    ///
    /// Returns `None` at end-of-stream. A final line that lacks a newline
    /// is still returned as a line.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Block until the child has produced more output or closed its stdout.
    ///
    /// Returns `true` if unread output is pending, `false` at end-of-stream.
    /// Nothing is consumed.
    pub fn has_pending_output(&mut self) -> io::Result<bool> {
        Ok(!self.reader.fill_buf()?.is_empty())
    }

    /// Access the buffered stream for framings that are not line based.
    pub fn get_mut(&mut self) -> &mut BufReader<PipeFd> {
        &mut self.reader
    }
}

/// Buffered writer into a child's stdin.
///
/// Dropping it (or calling [`ChildWriter::close`]) closes the child's stdin,
/// which is how a conforming child learns there is no more input.
pub struct ChildWriter {
    writer: BufWriter<PipeFd>,
}

impl ChildWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Write raw bytes into the buffer; may flush (and block) when it fills.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    /// Write one line, appending `\n`.
    pub fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.writer.write_all(line)?;
        self.writer.write_all(b"\n")
    }

    /// Push buffered bytes to the child. Blocks while the pipe is full.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flush and close the write end.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_reader_writer_roundtrip() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let mut reader = ChildReader::new(read_fd);
        let mut writer = ChildWriter::new(write_fd);

        writer.write_line(b"hello").unwrap();
        writer.write_line(b"").unwrap();
        writer.write_all(b"world\r\n").unwrap();
        writer.close().unwrap();

        assert_eq!(reader.read_line().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.read_line().unwrap(), Some(Vec::new()));
        // Carriage returns are payload, not framing.
        assert_eq!(reader.read_line().unwrap(), Some(b"world\r".to_vec()));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_unterminated_last_line() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let mut reader = ChildReader::new(read_fd);
        let mut writer = ChildWriter::new(write_fd);

        writer.write_all(b"a\nb").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some(b"a".to_vec()));
        assert_eq!(reader.read_line().unwrap(), Some(b"b".to_vec()));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_pending_output_does_not_consume() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let mut reader = ChildReader::new(read_fd);
        let mut writer = ChildWriter::new(write_fd);

        writer.write_line(b"peeked").unwrap();
        writer.flush().unwrap();

        assert!(reader.has_pending_output().unwrap());
        assert!(reader.has_pending_output().unwrap());
        assert_eq!(reader.read_line().unwrap(), Some(b"peeked".to_vec()));

        drop(writer);
        assert!(!reader.has_pending_output().unwrap());
    }

    #[test]
    fn test_unflushed_bytes_stay_in_buffer() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        let mut reader = ChildReader::new(read_fd);
        let mut writer = ChildWriter::new(write_fd);

        writer.write_line(b"buffered").unwrap();
        // Nothing has reached the pipe yet; closing pushes it out.
        writer.close().unwrap();
        assert_eq!(reader.read_line().unwrap(), Some(b"buffered".to_vec()));
    }

    #[test]
    fn test_write_to_closed_pipe_is_broken_pipe() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        drop(read_fd);
        let mut writer = ChildWriter::new(write_fd);
        writer.write_line(b"nobody listens").unwrap();
        let err = writer.flush().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_pipe_ends_are_close_on_exec() {
        let (read_fd, write_fd) = PipeFd::pipe().unwrap();
        for fd in [&read_fd, &write_fd] {
            let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
            assert!(flags >= 0);
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }
}

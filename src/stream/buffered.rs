//! Optional client-side buffering on top of a seekable stream.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::stream::RemoteFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Idle,
    Reading,
    Writing,
}

/// Buffered wrapper over a seekable byte stream.
///
/// One buffer serves both directions, never both at once: buffered writes
/// are flushed before a read, and read-ahead is discarded (with the
/// underlying position corrected) before a write or seek. A capacity of 0
/// disables buffering entirely, making every call on this wrapper exactly
/// one call on the underlying stream.
///
/// Dropping flushes best-effort; use [`flush`](Write::flush) or
/// [`close`](FileStream::close) where the error matters.
pub struct FileStream<S: Read + Write + Seek = RemoteFile> {
    inner: S,
    capacity: usize,
    buf: Vec<u8>,
    /// Read cursor within `buf` while in the reading direction.
    pos: usize,
    dir: Direction,
}

impl<S: Read + Write + Seek> FileStream<S> {
    pub fn with_capacity(capacity: usize, inner: S) -> FileStream<S> {
        FileStream {
            inner,
            capacity,
            buf: Vec::with_capacity(capacity),
            pos: 0,
            dir: Direction::Idle,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unflushed write-buffered byte count.
    pub fn buffered(&self) -> usize {
        match self.dir {
            Direction::Writing => self.buf.len(),
            _ => 0,
        }
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if self.dir == Direction::Writing && !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        if self.dir == Direction::Writing {
            self.dir = Direction::Idle;
        }
        Ok(())
    }

    /// Throw away read-ahead, stepping the underlying position back to
    /// where the caller logically is.
    fn discard_read_ahead(&mut self) -> io::Result<()> {
        if self.dir == Direction::Reading {
            let remaining = (self.buf.len() - self.pos) as i64;
            if remaining > 0 {
                self.inner.seek(SeekFrom::Current(-remaining))?;
            }
            self.buf.clear();
            self.pos = 0;
            self.dir = Direction::Idle;
        }
        Ok(())
    }
}

impl FileStream<RemoteFile> {
    /// Flush buffered writes and close the remote handle, reporting a
    /// failure from either step.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()?;
        self.inner.close_handle().map_err(io::Error::from)
    }
}

impl<S: Read + Write + Seek> Read for FileStream<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.capacity == 0 {
            return self.inner.read(out);
        }
        self.flush_buf()?;
        let mut filled = 0;
        while filled < out.len() {
            if self.pos < self.buf.len() {
                let n = (out.len() - filled).min(self.buf.len() - self.pos);
                out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                filled += n;
                continue;
            }
            self.buf.clear();
            self.pos = 0;
            if out.len() - filled >= self.capacity {
                // Caller wants at least a whole buffer; skip the copy.
                self.dir = Direction::Idle;
                filled += self.inner.read(&mut out[filled..])?;
                break;
            }
            self.buf.resize(self.capacity, 0);
            let n = self.inner.read(&mut self.buf)?;
            self.buf.truncate(n);
            if n == 0 {
                self.dir = Direction::Idle;
                break;
            }
            self.dir = Direction::Reading;
        }
        Ok(filled)
    }
}

impl<S: Read + Write + Seek> Write for FileStream<S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.capacity == 0 {
            return self.inner.write(data);
        }
        self.discard_read_ahead()?;
        if self.buf.len() + data.len() > self.capacity {
            self.flush_buf()?;
        }
        if data.len() >= self.capacity {
            return self.inner.write(data);
        }
        self.buf.extend_from_slice(data);
        self.dir = Direction::Writing;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.inner.flush()
    }
}

impl<S: Read + Write + Seek> Seek for FileStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.capacity == 0 {
            return self.inner.seek(pos);
        }
        self.flush_buf()?;
        if self.dir == Direction::Reading {
            let remaining = (self.buf.len() - self.pos) as i64;
            self.buf.clear();
            self.pos = 0;
            self.dir = Direction::Idle;
            // A relative seek is relative to the caller's logical position,
            // which trails the underlying one by the unread read-ahead.
            if let SeekFrom::Current(offset) = pos {
                return self.inner.seek(SeekFrom::Current(offset - remaining));
            }
        }
        self.inner.seek(pos)
    }
}

impl<S: Read + Write + Seek> Drop for FileStream<S> {
    fn drop(&mut self) {
        let _ = self.flush_buf();
    }
}

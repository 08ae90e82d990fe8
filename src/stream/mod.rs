//! Seekable byte streams over remote files.
//!
//! `RemoteFile` implements the std I/O traits on top of the SFTP transfer
//! primitives. The primitives may transfer fewer bytes than asked even when
//! more are available, so reads and writes loop until the caller's buffer is
//! satisfied; only a zero-byte read signals end-of-file. The connection lock
//! is taken once per low-level call, never across a loop, so two files on
//! one connection interleave their transfers instead of serializing whole
//! requests behind each other.

mod buffered;

pub use buffered::FileStream;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::ptr;

use libc::{c_char, c_int, c_uint, size_t};
use libssh2_sys as raw;
use tracing::trace;

use crate::error::{Error, ErrorDetail};
use crate::sftp::{path2bytes, FileAttributes, SftpChannel};

/// How a remote file is opened.
///
/// A builder-style bit-set. Interactions between the bits are resolved by
/// the flag translation (see [`SftpChannel::open`] and friends for which
/// bits each open call forces); the only combination rejected outright is
/// `no_create` with `no_replace`, which asks for a file that must already
/// exist and must not exist at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    no_create: bool,
    no_replace: bool,
}

impl OpenMode {
    pub fn new() -> OpenMode {
        OpenMode::default()
    }

    pub fn read(mut self, read: bool) -> OpenMode {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> OpenMode {
        self.write = write;
        self
    }

    /// Writes always extend the file instead of truncating it on open.
    pub fn append(mut self, append: bool) -> OpenMode {
        self.append = append;
        self
    }

    /// Truncate an existing file on open. For read-write opens this also
    /// re-enables creation, which read-write otherwise suppresses.
    pub fn truncate(mut self, truncate: bool) -> OpenMode {
        self.truncate = truncate;
        self
    }

    /// Never create the file; opening a non-existent path fails.
    pub fn no_create(mut self, no_create: bool) -> OpenMode {
        self.no_create = no_create;
        self
    }

    /// Creation must be exclusive; opening an existing path fails.
    pub fn no_replace(mut self, no_replace: bool) -> OpenMode {
        self.no_replace = no_replace;
        self
    }

    /// Translate to the protocol-level open flags.
    ///
    /// Purely local; the contradictory `no_create + no_replace` pair fails
    /// here, before any network traffic.
    pub(crate) fn flags(self) -> Result<libc::c_ulong, Error> {
        if self.no_create && self.no_replace {
            return Err(Error::InvalidConfiguration(
                "no_create with no_replace requires the file to both exist and not exist",
            ));
        }
        let mut flags = 0;
        if self.read {
            flags |= raw::LIBSSH2_FXF_READ;
        }
        if self.write {
            flags |= raw::LIBSSH2_FXF_WRITE;
            if !self.read {
                // Write-only: create by default, truncate unless appending.
                if !self.no_create {
                    flags |= raw::LIBSSH2_FXF_CREAT;
                    if self.no_replace {
                        flags |= raw::LIBSSH2_FXF_EXCL;
                    }
                }
                if self.append {
                    flags |= raw::LIBSSH2_FXF_APPEND;
                } else {
                    flags |= raw::LIBSSH2_FXF_TRUNC;
                }
            } else if self.truncate {
                // Read-write suppresses creation unless truncation is asked
                // for explicitly.
                flags |= raw::LIBSSH2_FXF_TRUNC;
                if !self.no_create {
                    flags |= raw::LIBSSH2_FXF_CREAT;
                    if self.no_replace {
                        flags |= raw::LIBSSH2_FXF_EXCL;
                    }
                }
            }
        }
        Ok(flags)
    }
}

/// Combine a base position with a signed offset, rejecting negative targets.
pub(crate) fn offset_position(base: u64, offset: i64) -> Result<u64, Error> {
    let target = base as i128 + offset as i128;
    if target < 0 {
        return Err(Error::InvalidSeek {
            target: target as i64,
        });
    }
    Ok(target as u64)
}

/// Fill `buf` from repeated transfer calls; a zero-byte transfer is
/// end-of-file and stops early. Returns the bytes placed in `buf`.
fn read_to_fill<F>(buf: &mut [u8], mut transfer: F) -> Result<usize, Error>
where
    F: FnMut(&mut [u8]) -> Result<usize, Error>,
{
    let mut filled = 0;
    while filled < buf.len() {
        match transfer(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Drain `data` through repeated transfer calls until all of it is accepted.
///
/// A blocking write either accepts bytes or fails; a zero-byte acceptance
/// would loop forever, so it is reported as an error rather than retried.
fn write_all_from<F>(data: &[u8], mut transfer: F) -> Result<usize, Error>
where
    F: FnMut(&[u8]) -> Result<usize, Error>,
{
    let mut written = 0;
    while written < data.len() {
        match transfer(&data[written..])? {
            0 => {
                return Err(Error::Protocol {
                    detail: ErrorDetail {
                        code: raw::LIBSSH2_ERROR_SOCKET_SEND,
                        message: "write transfer accepted no bytes".to_string(),
                    },
                    fx_code: None,
                    path: None,
                })
            }
            n => written += n,
        }
    }
    Ok(written)
}

/// An open remote file.
///
/// Valid from a successful open until [`close`](RemoteFile::close) or drop;
/// dropping closes the handle under the connection lock with errors ignored,
/// so call `close` where a close failure matters. The path is retained only
/// to enrich errors.
pub struct RemoteFile {
    channel: SftpChannel,
    handle: *mut raw::LIBSSH2_SFTP_HANDLE,
    path: PathBuf,
}

// The handle pointer is only used under the session mutex.
unsafe impl Send for RemoteFile {}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RemoteFile {
    pub(crate) fn open(
        channel: SftpChannel,
        path: &Path,
        mode: OpenMode,
    ) -> Result<RemoteFile, Error> {
        let flags = mode.flags()?;
        let bytes = path2bytes(path);
        let handle = {
            let sess = channel.lock();
            let handle = unsafe {
                raw::libssh2_sftp_open_ex(
                    channel.handle(),
                    bytes.as_ptr() as *const c_char,
                    bytes.len() as c_uint,
                    flags,
                    channel.create_file_permissions(),
                    raw::LIBSSH2_SFTP_OPENFILE as c_int,
                )
            };
            if handle.is_null() {
                return Err(channel.last_error(&sess).with_path(path));
            }
            handle
        };
        trace!(path = %path.display(), flags, "file opened");
        Ok(RemoteFile {
            channel,
            handle,
            path: path.to_path_buf(),
        })
    }

    /// Attributes of the open file (one locked round trip).
    pub fn metadata(&self) -> Result<FileAttributes, Error> {
        let mut attrs = unsafe { std::mem::zeroed::<raw::LIBSSH2_SFTP_ATTRIBUTES>() };
        let sess = self.channel.lock();
        let rc = unsafe { raw::libssh2_sftp_fstat_ex(self.handle, &mut attrs, 0) };
        if rc != 0 {
            return Err(self.channel.last_error(&sess).with_path(&self.path));
        }
        Ok(FileAttributes::from_raw(&attrs))
    }

    /// One locked low-level read. May return less than `buf.len()`; zero is
    /// end-of-file.
    fn read_once(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let sess = self.channel.lock();
        let rc = unsafe {
            raw::libssh2_sftp_read(
                self.handle,
                buf.as_mut_ptr() as *mut c_char,
                buf.len() as size_t,
            )
        };
        if rc < 0 {
            return Err(self.channel.last_error(&sess).with_path(&self.path));
        }
        Ok(rc as usize)
    }

    /// One locked low-level write. May accept less than `data.len()`.
    fn write_once(&mut self, data: &[u8]) -> Result<usize, Error> {
        let sess = self.channel.lock();
        let rc = unsafe {
            raw::libssh2_sftp_write(
                self.handle,
                data.as_ptr() as *const c_char,
                data.len() as size_t,
            )
        };
        if rc < 0 {
            return Err(self.channel.last_error(&sess).with_path(&self.path));
        }
        Ok(rc as usize)
    }

    /// Close the handle, reporting any close failure.
    pub fn close(mut self) -> Result<(), Error> {
        self.close_handle()
    }

    fn close_handle(&mut self) -> Result<(), Error> {
        if self.handle.is_null() {
            return Ok(());
        }
        let sess = self.channel.lock();
        let rc = unsafe { raw::libssh2_sftp_close_handle(self.handle) };
        self.handle = ptr::null_mut();
        let result = if rc == 0 {
            Ok(())
        } else {
            Err(self.channel.last_error(&sess).with_path(&self.path))
        };
        drop(sess);
        trace!(path = %self.path.display(), "file closed");
        result
    }
}

impl Read for RemoteFile {
    /// Reads until `buf` is full or end-of-file. A return shorter than
    /// `buf.len()` therefore means the file ended.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_to_fill(buf, |chunk| self.read_once(chunk))?)
    }
}

impl Write for RemoteFile {
    /// Accepts all of `buf` or fails; never a short write.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(write_all_from(buf, |chunk| self.write_once(chunk))?)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Writes go straight to the server; there is nothing client-side to
        // flush.
        Ok(())
    }
}

impl Seek for RemoteFile {
    /// Repositions the cursor. Seeking from the end costs one stat round
    /// trip to learn the file's size. Seeking past the end is legal: a later
    /// read there yields end-of-file, and a later write extends the file
    /// with zeros up to the written position (for files opened write-only;
    /// read-write behavior past the end is server-dependent).
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => {
                let current = {
                    let _sess = self.channel.lock();
                    unsafe { raw::libssh2_sftp_tell64(self.handle) }
                };
                offset_position(current, offset)?
            }
            SeekFrom::End(offset) => {
                let size = self.metadata()?.size.unwrap_or(0);
                offset_position(size, offset)?
            }
        };
        let _sess = self.channel.lock();
        unsafe { raw::libssh2_sftp_seek64(self.handle, target) };
        Ok(target)
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        let _ = self.close_handle();
    }
}

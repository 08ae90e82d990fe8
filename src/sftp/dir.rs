//! Incremental directory listing.

use std::path::{Path, PathBuf};

use libc::{c_char, c_int, c_long, c_ulong, size_t};
use libssh2_sys as raw;
use tracing::trace;

use crate::error::Error;
use crate::sftp::{bytes_to_path, path2bytes, FileAttributes, SftpChannel};

/// Longest name / long-form entry the server may hand back per step.
const ENTRY_BUFFER_LEN: usize = 1024;

/// One entry of a remote directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Bare file name within the directory.
    pub name: String,
    /// The directory path joined with the entry name.
    pub path: PathBuf,
    /// Server-formatted `ls -l` style line. May be empty.
    pub long_entry: String,
    pub attributes: FileAttributes,
}

/// Cursor over the entries of a remote directory.
///
/// Each `next()` performs one SFTP read-dir round trip under the connection
/// lock, so a slow listing never starves other threads sharing the session.
/// `.` and `..` are filtered out. The native handle is closed when the
/// cursor is dropped.
pub struct ReadDir {
    channel: SftpChannel,
    handle: *mut raw::LIBSSH2_SFTP_HANDLE,
    dir: PathBuf,
    done: bool,
}

// The handle pointer is only used under the session mutex.
unsafe impl Send for ReadDir {}

impl ReadDir {
    pub(crate) fn open(channel: SftpChannel, path: &Path) -> Result<ReadDir, Error> {
        let bytes = path2bytes(path);
        let handle = {
            let sess = channel.lock();
            let handle = unsafe {
                raw::libssh2_sftp_open_ex(
                    channel.handle(),
                    bytes.as_ptr() as *const c_char,
                    bytes.len() as libc::c_uint,
                    0 as c_ulong,
                    0 as c_long,
                    raw::LIBSSH2_SFTP_OPENDIR as c_int,
                )
            };
            if handle.is_null() {
                return Err(channel.last_error(&sess).with_path(path));
            }
            handle
        };
        trace!(path = %path.display(), "directory opened");
        Ok(ReadDir {
            channel,
            handle,
            dir: path.to_path_buf(),
            done: false,
        })
    }

    /// One locked read-dir call. `Ok(None)` is end of listing.
    fn read_entry(&mut self) -> Result<Option<DirEntry>, Error> {
        let mut name = [0u8; ENTRY_BUFFER_LEN];
        let mut long_entry = [0u8; ENTRY_BUFFER_LEN];
        let mut attrs = unsafe { std::mem::zeroed::<raw::LIBSSH2_SFTP_ATTRIBUTES>() };

        let sess = self.channel.lock();
        let rc = unsafe {
            raw::libssh2_sftp_readdir_ex(
                self.handle,
                name.as_mut_ptr() as *mut c_char,
                name.len() as size_t,
                long_entry.as_mut_ptr() as *mut c_char,
                long_entry.len() as size_t,
                &mut attrs,
            )
        };
        if rc < 0 {
            return Err(self.channel.last_error(&sess).with_path(&self.dir));
        }
        drop(sess);
        if rc == 0 {
            return Ok(None);
        }

        let name_bytes = &name[..rc as usize];
        let long_len = long_entry.iter().position(|&b| b == 0).unwrap_or(0);
        Ok(Some(DirEntry {
            name: String::from_utf8_lossy(name_bytes).into_owned(),
            path: self.dir.join(bytes_to_path(name_bytes)),
            long_entry: String::from_utf8_lossy(&long_entry[..long_len]).into_owned(),
            attributes: FileAttributes::from_raw(&attrs),
        }))
    }
}

impl Iterator for ReadDir {
    type Item = Result<DirEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.read_entry() {
                Ok(Some(entry)) => {
                    if entry.name == "." || entry.name == ".." {
                        continue;
                    }
                    return Some(Ok(entry));
                }
                Ok(None) => {
                    self.done = true;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

impl Drop for ReadDir {
    fn drop(&mut self) {
        let _sess = self.channel.lock();
        unsafe {
            let _ = raw::libssh2_sftp_close_handle(self.handle);
        }
    }
}

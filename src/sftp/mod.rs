//! The SFTP subsystem channel and remote filesystem operations.
//!
//! An `SftpChannel` shares the session's connection lock. Every native SFTP
//! call in this module acquires that lock for exactly the duration of the
//! call, so channel operations from different threads interleave safely on
//! the one connection.

mod dir;

pub use dir::{DirEntry, ReadDir};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use libc::{c_char, c_int, c_long, c_uint};
use libssh2_sys as raw;
use tracing::{debug, trace};

use crate::error::Error;
use crate::session::{lock_inner, Session, SessionInner};
use crate::stream::{FileStream, OpenMode, RemoteFile};

/// Permission bits requested for newly created files and directories. The
/// server applies its own umask on top.
const CREATE_FILE_PERMISSIONS: c_long = 0o644;
const CREATE_DIR_PERMISSIONS: c_long = 0o755;

/// SFTP paths are byte strings on the wire. Unix paths pass through as-is;
/// Windows paths are converted lossily through UTF-8.
#[cfg(unix)]
pub(crate) fn path2bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(windows)]
pub(crate) fn path2bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

pub(crate) struct ChannelInner {
    session: Arc<Mutex<SessionInner>>,
    handle: *mut raw::LIBSSH2_SFTP,
}

// The SFTP pointer is only dereferenced while the session mutex is held
// (libssh2 channels share the session's thread-unsafety), so sharing the
// wrapper between threads is sound.
unsafe impl Send for ChannelInner {}
unsafe impl Sync for ChannelInner {}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let _sess = lock_inner(&self.session);
        unsafe {
            let _ = raw::libssh2_sftp_shutdown(self.handle);
        }
        debug!("sftp channel shut down");
    }
}

/// Handle on a session's SFTP subsystem.
///
/// Starting the subsystem costs a server round trip, so open one channel per
/// connection and clone it to share; clones reference the same subsystem.
/// The subsystem shuts down when the last clone (including the files and
/// directory cursors opened through it) is dropped.
#[derive(Clone)]
pub struct SftpChannel {
    inner: Arc<ChannelInner>,
}

impl SftpChannel {
    pub(crate) fn new(session: &Session) -> Result<SftpChannel, Error> {
        let handle = {
            let sess = session.lock();
            let handle = unsafe { raw::libssh2_sftp_init(sess.handle()) };
            if handle.is_null() {
                return Err(sess.last_error());
            }
            handle
        };
        debug!("sftp channel opened");
        Ok(SftpChannel {
            inner: Arc::new(ChannelInner {
                session: session.shared_inner(),
                handle,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock_inner(&self.inner.session)
    }

    pub(crate) fn handle(&self) -> *mut raw::LIBSSH2_SFTP {
        self.inner.handle
    }

    /// Translate the session's last error, capturing the SFTP status code
    /// when the failure came from the file subsystem. Requires the guard so
    /// the two-step read happens under one lock acquisition.
    pub(crate) fn last_error(&self, sess: &SessionInner) -> Error {
        let detail = sess.last_error_detail();
        let fx_code = if detail.code == raw::LIBSSH2_ERROR_SFTP_PROTOCOL {
            Some(unsafe { raw::libssh2_sftp_last_error(self.inner.handle) } as u32)
        } else {
            None
        };
        Error::Protocol {
            detail,
            fx_code,
            path: None,
        }
    }

    fn stat_path(&self, path: &Path, stat_type: c_int) -> Result<FileAttributes, Error> {
        let bytes = path2bytes(path);
        let mut attrs = unsafe { std::mem::zeroed::<raw::LIBSSH2_SFTP_ATTRIBUTES>() };
        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_sftp_stat_ex(
                self.inner.handle,
                bytes.as_ptr() as *const c_char,
                bytes.len() as c_uint,
                stat_type,
                &mut attrs,
            )
        };
        if rc != 0 {
            return Err(self.last_error(&sess).with_path(path));
        }
        Ok(FileAttributes::from_raw(&attrs))
    }

    /// Attributes of the file at `path`, following symlinks.
    pub fn metadata(&self, path: &Path) -> Result<FileAttributes, Error> {
        self.stat_path(path, raw::LIBSSH2_SFTP_STAT as c_int)
    }

    /// Attributes of `path` itself, not following a final symlink.
    pub fn symlink_metadata(&self, path: &Path) -> Result<FileAttributes, Error> {
        self.stat_path(path, raw::LIBSSH2_SFTP_LSTAT as c_int)
    }

    /// Whether a file or directory exists at `path`.
    pub fn exists(&self, path: &Path) -> Result<bool, Error> {
        match self.metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create a directory. Returns `false` if a directory already exists at
    /// `path`.
    ///
    /// Servers commonly report a bare failure status for an existing
    /// directory rather than a specific code, so a failed creation is
    /// followed by a stat to distinguish "already there" from a real error.
    pub fn create_directory(&self, path: &Path) -> Result<bool, Error> {
        let bytes = path2bytes(path);
        let failure = {
            let sess = self.lock();
            let rc = unsafe {
                raw::libssh2_sftp_mkdir_ex(
                    self.inner.handle,
                    bytes.as_ptr() as *const c_char,
                    bytes.len() as c_uint,
                    CREATE_DIR_PERMISSIONS,
                )
            };
            if rc == 0 {
                trace!(path = %path.display(), "directory created");
                return Ok(true);
            }
            self.last_error(&sess).with_path(path)
        };
        match self.metadata(path) {
            Ok(attrs) if attrs.is_dir() => Ok(false),
            _ => Err(failure),
        }
    }

    /// Remove the file or empty directory at `path`. Returns `false` when
    /// nothing exists there.
    pub fn remove(&self, path: &Path) -> Result<bool, Error> {
        let attrs = match self.symlink_metadata(path) {
            Ok(attrs) => attrs,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
        };
        let bytes = path2bytes(path);
        let sess = self.lock();
        let rc = unsafe {
            if attrs.is_dir() {
                raw::libssh2_sftp_rmdir_ex(
                    self.inner.handle,
                    bytes.as_ptr() as *const c_char,
                    bytes.len() as c_uint,
                )
            } else {
                raw::libssh2_sftp_unlink_ex(
                    self.inner.handle,
                    bytes.as_ptr() as *const c_char,
                    bytes.len() as c_uint,
                )
            }
        };
        if rc != 0 {
            return Err(self.last_error(&sess).with_path(path));
        }
        trace!(path = %path.display(), "removed");
        Ok(true)
    }

    /// Remove `path` and, if it is a directory, everything beneath it.
    /// Returns the number of entries removed (0 when nothing existed).
    pub fn remove_all(&self, path: &Path) -> Result<u64, Error> {
        let attrs = match self.symlink_metadata(path) {
            Ok(attrs) => attrs,
            Err(err) if err.is_not_found() => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        if attrs.is_dir() {
            for entry in self.read_dir(path)? {
                let entry = entry?;
                removed += self.remove_all(&entry.path)?;
            }
        }
        self.remove(path)?;
        Ok(removed + 1)
    }

    /// Rename `from` to `to`.
    ///
    /// The overwrite policy is a hint to the server; not every server honors
    /// every flag.
    pub fn rename(&self, from: &Path, to: &Path, overwrite: Overwrite) -> Result<(), Error> {
        let from_bytes = path2bytes(from);
        let to_bytes = path2bytes(to);
        let flags = match overwrite {
            Overwrite::Prevent => 0,
            Overwrite::Allow => {
                raw::LIBSSH2_SFTP_RENAME_OVERWRITE | raw::LIBSSH2_SFTP_RENAME_NATIVE
            }
            Overwrite::Atomic => {
                raw::LIBSSH2_SFTP_RENAME_OVERWRITE
                    | raw::LIBSSH2_SFTP_RENAME_ATOMIC
                    | raw::LIBSSH2_SFTP_RENAME_NATIVE
            }
        };
        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_sftp_rename_ex(
                self.inner.handle,
                from_bytes.as_ptr() as *const c_char,
                from_bytes.len() as c_uint,
                to_bytes.as_ptr() as *const c_char,
                to_bytes.len() as c_uint,
                flags as c_long,
            )
        };
        if rc != 0 {
            return Err(self.last_error(&sess).with_path(from));
        }
        trace!(from = %from.display(), to = %to.display(), "renamed");
        Ok(())
    }

    /// Create a symlink at `link` pointing at `target`.
    ///
    /// Beware: OpenSSH servers send the two paths of the underlying request
    /// in the reverse order of the protocol draft, so against one of those
    /// the link is created at `target` pointing at `link`. There is no way
    /// to detect the quirk from the client side.
    pub fn create_symlink(&self, link: &Path, target: &Path) -> Result<(), Error> {
        let link_bytes = path2bytes(link);
        let mut target_bytes = path2bytes(target);
        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_sftp_symlink_ex(
                self.inner.handle,
                link_bytes.as_ptr() as *const c_char,
                link_bytes.len() as c_uint,
                target_bytes.as_mut_ptr() as *mut c_char,
                target_bytes.len() as c_uint,
                raw::LIBSSH2_SFTP_SYMLINK as c_int,
            )
        };
        if rc != 0 {
            return Err(self.last_error(&sess).with_path(link));
        }
        Ok(())
    }

    /// Read the target a symlink points at.
    pub fn read_link(&self, path: &Path) -> Result<PathBuf, Error> {
        self.resolve(path, raw::LIBSSH2_SFTP_READLINK as c_int)
    }

    /// Resolve `path` to a canonical absolute path on the server.
    pub fn canonicalize(&self, path: &Path) -> Result<PathBuf, Error> {
        self.resolve(path, raw::LIBSSH2_SFTP_REALPATH as c_int)
    }

    fn resolve(&self, path: &Path, link_type: c_int) -> Result<PathBuf, Error> {
        let bytes = path2bytes(path);
        let mut target = [0u8; 1024];
        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_sftp_symlink_ex(
                self.inner.handle,
                bytes.as_ptr() as *const c_char,
                bytes.len() as c_uint,
                target.as_mut_ptr() as *mut c_char,
                target.len() as c_uint,
                link_type,
            )
        };
        if rc < 0 {
            return Err(self.last_error(&sess).with_path(path));
        }
        drop(sess);
        Ok(bytes_to_path(&target[..rc as usize]))
    }

    /// Open a cursor over the entries of the directory at `path`.
    pub fn read_dir(&self, path: &Path) -> Result<ReadDir, Error> {
        ReadDir::open(self.clone(), path)
    }

    /// Open a file for both reading and writing.
    ///
    /// The read and write flags of `mode` are forced on; the remaining mode
    /// bits (append, truncate, creation policy) are honored as given.
    pub fn open(&self, path: &Path, mode: OpenMode) -> Result<RemoteFile, Error> {
        RemoteFile::open(self.clone(), path, mode.read(true).write(true))
    }

    /// Open an existing file read-only.
    pub fn open_read(&self, path: &Path) -> Result<RemoteFile, Error> {
        RemoteFile::open(self.clone(), path, OpenMode::new().read(true))
    }

    /// Open a file for writing. The write flag of `mode` is forced on.
    pub fn open_write(&self, path: &Path, mode: OpenMode) -> Result<RemoteFile, Error> {
        RemoteFile::open(self.clone(), path, mode.write(true))
    }

    /// Open a read-write file wrapped in a buffering layer.
    ///
    /// `buffer_size` 0 disables buffering: every stream call maps to exactly
    /// one SFTP call.
    pub fn open_stream(
        &self,
        path: &Path,
        mode: OpenMode,
        buffer_size: usize,
    ) -> Result<FileStream<RemoteFile>, Error> {
        let file = self.open(path, mode)?;
        Ok(FileStream::with_capacity(buffer_size, file))
    }

    pub(crate) fn create_file_permissions(&self) -> c_long {
        CREATE_FILE_PERMISSIONS
    }
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(windows)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Overwrite policy for [`SftpChannel::rename`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Fail if the destination exists.
    Prevent,
    /// Replace an existing destination.
    Allow,
    /// Replace atomically, so no observer sees the destination missing.
    Atomic,
}

/// Kind of filesystem object, derived from the permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

/// Owned copy of a remote file's attributes.
///
/// Each field is optional because the protocol lets servers omit any of
/// them; absent fields were simply not reported.
#[derive(Debug, Clone, Default)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u64>,
    pub mtime: Option<u64>,
}

impl FileAttributes {
    pub(crate) fn from_raw(attrs: &raw::LIBSSH2_SFTP_ATTRIBUTES) -> FileAttributes {
        fn flag(attrs: &raw::LIBSSH2_SFTP_ATTRIBUTES, bit: libc::c_ulong) -> bool {
            attrs.flags & bit != 0
        }
        FileAttributes {
            size: flag(attrs, raw::LIBSSH2_SFTP_ATTR_SIZE).then_some(attrs.filesize),
            uid: flag(attrs, raw::LIBSSH2_SFTP_ATTR_UIDGID).then_some(attrs.uid as u32),
            gid: flag(attrs, raw::LIBSSH2_SFTP_ATTR_UIDGID).then_some(attrs.gid as u32),
            permissions: flag(attrs, raw::LIBSSH2_SFTP_ATTR_PERMISSIONS)
                .then_some(attrs.permissions as u32),
            atime: flag(attrs, raw::LIBSSH2_SFTP_ATTR_ACMODTIME).then_some(attrs.atime as u64),
            mtime: flag(attrs, raw::LIBSSH2_SFTP_ATTR_ACMODTIME).then_some(attrs.mtime as u64),
        }
    }

    pub fn file_type(&self) -> FileType {
        let Some(perm) = self.permissions else {
            return FileType::Unknown;
        };
        match perm as libc::c_ulong & raw::LIBSSH2_SFTP_S_IFMT {
            x if x == raw::LIBSSH2_SFTP_S_IFREG => FileType::File,
            x if x == raw::LIBSSH2_SFTP_S_IFDIR => FileType::Directory,
            x if x == raw::LIBSSH2_SFTP_S_IFLNK => FileType::Symlink,
            x if x == raw::LIBSSH2_SFTP_S_IFCHR => FileType::CharDevice,
            x if x == raw::LIBSSH2_SFTP_S_IFBLK => FileType::BlockDevice,
            x if x == raw::LIBSSH2_SFTP_S_IFIFO => FileType::Fifo,
            x if x == raw::LIBSSH2_SFTP_S_IFSOCK => FileType::Socket,
            _ => FileType::Unknown,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }
}

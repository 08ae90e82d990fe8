//! SSH session ownership and the connection lock.
//!
//! libssh2 session handles are not thread-safe: two threads must never be
//! inside the library on the same session at once. `SessionInner` owns the
//! raw handle and is only reachable through a `Mutex`, so every native call
//! in this crate runs under one lock acquisition. Calls that block on the
//! network (reads, writes) still take the lock once per low-level call, never
//! across a whole loop, so other threads interleave between packets instead
//! of deadlocking behind a long transfer.

mod host_key;

pub use host_key::{HashType, HostKey, HostKeyType};

use std::ffi::{CStr, CString};
use std::net::TcpStream;
use std::path::Path;
use std::ptr;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use libc::{c_char, c_int, c_uint, size_t};
use libssh2_sys as raw;
use tracing::debug;

use crate::error::{Error, ErrorDetail};
use crate::knownhost::KnownHosts;
use crate::sftp::SftpChannel;

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| unsafe {
        let rc = raw::libssh2_init(0);
        assert_eq!(rc, 0, "libssh2 global initialization failed");
    });
}

#[cfg(unix)]
fn stream_socket(stream: &TcpStream) -> raw::libssh2_socket_t {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}

#[cfg(windows)]
fn stream_socket(stream: &TcpStream) -> raw::libssh2_socket_t {
    use std::os::windows::io::AsRawSocket;
    stream.as_raw_socket() as raw::libssh2_socket_t
}

/// Lock the session, recovering from poison.
///
/// The guarded value is a raw native handle. If a thread panicked while
/// holding the lock, the handle still has to be usable for teardown, so
/// poison is stripped rather than propagated.
pub(crate) fn lock_inner(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sole owner of a raw `LIBSSH2_SESSION`.
///
/// Holds the `TcpStream` alongside the handle so the descriptor outlives
/// every native call. Only constructed inside this module and only handed
/// out behind the session mutex.
pub(crate) struct SessionInner {
    handle: *mut raw::LIBSSH2_SESSION,
    stream: Option<TcpStream>,
    disconnect_message: CString,
}

// The raw pointer is what blocks the auto-impl. SessionInner is always
// wrapped in a Mutex, so at most one thread touches the handle at a time,
// and libssh2 session handles may move between threads when unshared.
unsafe impl Send for SessionInner {}

impl SessionInner {
    pub(crate) fn handle(&self) -> *mut raw::LIBSSH2_SESSION {
        self.handle
    }

    /// Copy the session's last-error state into an owned value.
    ///
    /// Must run before any other call on this session can overwrite the
    /// state; taking `&self` (reachable only through the mutex guard) makes
    /// that ordering impossible to get wrong.
    pub(crate) fn last_error_detail(&self) -> ErrorDetail {
        unsafe {
            let mut msg: *mut c_char = ptr::null_mut();
            let mut msg_len: c_int = 0;
            let code = raw::libssh2_session_last_error(self.handle, &mut msg, &mut msg_len, 0);
            let message = if msg.is_null() || msg_len <= 0 {
                String::new()
            } else {
                let bytes = slice::from_raw_parts(msg as *const u8, msg_len as usize);
                String::from_utf8_lossy(bytes).into_owned()
            };
            ErrorDetail { code, message }
        }
    }

    pub(crate) fn last_error(&self) -> Error {
        Error::Protocol {
            detail: self.last_error_detail(),
            fx_code: None,
            path: None,
        }
    }

    /// Check a native return code, translating non-zero into an error.
    pub(crate) fn rc(&self, rc: c_int) -> Result<(), Error> {
        if rc == 0 {
            Ok(())
        } else {
            Err(self.last_error())
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        unsafe {
            // Only a handshaken session owns a stream; a bare allocation
            // must not attempt the disconnect exchange.
            if self.stream.is_some() {
                let _ = raw::libssh2_session_disconnect_ex(
                    self.handle,
                    raw::SSH_DISCONNECT_BY_APPLICATION as c_int,
                    self.disconnect_message.as_ptr(),
                    b"\0".as_ptr() as *const c_char,
                );
            }
            let _ = raw::libssh2_session_free(self.handle);
        }
        debug!("ssh session freed");
    }
}

/// A blocking SSH session that is safe to share between threads.
///
/// Cloning is shallow: clones share one underlying connection and one lock.
/// The session disconnects and frees itself when the last clone (and every
/// channel, file, and directory handle derived from it) is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Allocate a session without connecting it.
    ///
    /// Useful for work that needs a session context but no server, such as
    /// parsing known-hosts files. Network operations on it will fail.
    pub fn new() -> Result<Session, Error> {
        let inner = allocate()?;
        Ok(Session {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Perform the SSH handshake over an established TCP connection.
    ///
    /// Takes ownership of the stream; it stays open for the session's
    /// lifetime. `disconnect_message` is sent to the server when the session
    /// is dropped. On handshake failure the partially-built native session
    /// is freed before this returns.
    pub fn connect(stream: TcpStream, disconnect_message: &str) -> Result<Session, Error> {
        let message = CString::new(disconnect_message)
            .map_err(|_| Error::InvalidConfiguration("disconnect message contains a nul byte"))?;
        let mut inner = allocate()?;
        let rc = unsafe { raw::libssh2_session_handshake(inner.handle, stream_socket(&stream)) };
        if rc != 0 {
            let detail = inner.last_error_detail();
            debug!(code = detail.code, "ssh handshake failed");
            // inner drops here, freeing the session without a disconnect
            return Err(Error::HandshakeFailed { detail });
        }
        inner.stream = Some(stream);
        inner.disconnect_message = message;
        debug!("ssh handshake complete");
        Ok(Session {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock_inner(&self.inner)
    }

    pub(crate) fn shared_inner(&self) -> Arc<Mutex<SessionInner>> {
        Arc::clone(&self.inner)
    }

    /// Whether any authentication method has succeeded on this session.
    pub fn authenticated(&self) -> bool {
        let sess = self.lock();
        unsafe { raw::libssh2_userauth_authenticated(sess.handle()) != 0 }
    }

    /// Try password authentication.
    ///
    /// Returns `Ok(false)` when the server positively rejected the
    /// credentials; any other failure is an error.
    pub fn authenticate_by_password(&self, username: &str, password: &str) -> Result<bool, Error> {
        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_userauth_password_ex(
                sess.handle(),
                username.as_ptr() as *const c_char,
                username.len() as c_uint,
                password.as_ptr() as *const c_char,
                password.len() as c_uint,
                None,
            )
        };
        if rc == 0 {
            debug!(username, "password authentication succeeded");
            return Ok(true);
        }
        let detail = sess.last_error_detail();
        if detail.code == raw::LIBSSH2_ERROR_AUTHENTICATION_FAILED {
            debug!(username, "password authentication rejected");
            return Ok(false);
        }
        Err(Error::Protocol {
            detail,
            fx_code: None,
            path: None,
        })
    }

    /// Authenticate with a key pair stored on disk.
    ///
    /// `public_key` may be omitted where libssh2 can derive it from the
    /// private key.
    pub fn authenticate_by_key_files(
        &self,
        username: &str,
        public_key: Option<&Path>,
        private_key: &Path,
        passphrase: Option<&str>,
    ) -> Result<(), Error> {
        let user = CString::new(username)
            .map_err(|_| Error::InvalidConfiguration("username contains a nul byte"))?;
        let public_key = public_key
            .map(path_cstring)
            .transpose()?;
        let private_key = path_cstring(private_key)?;
        let passphrase = passphrase
            .map(|p| {
                CString::new(p)
                    .map_err(|_| Error::InvalidConfiguration("passphrase contains a nul byte"))
            })
            .transpose()?;

        let sess = self.lock();
        let rc = unsafe {
            raw::libssh2_userauth_publickey_fromfile_ex(
                sess.handle(),
                user.as_ptr(),
                username.len() as c_uint,
                public_key
                    .as_ref()
                    .map_or(ptr::null(), |p| p.as_ptr()),
                private_key.as_ptr(),
                passphrase.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
            )
        };
        sess.rc(rc)
    }

    /// Authentication methods the server offers for `username`.
    ///
    /// An empty list means the server accepted the `none` probe and the
    /// session is already authenticated.
    pub fn authentication_methods(&self, username: &str) -> Result<Vec<String>, Error> {
        let sess = self.lock();
        let list = unsafe {
            raw::libssh2_userauth_list(
                sess.handle(),
                username.as_ptr() as *const c_char,
                username.len() as c_uint,
            )
        };
        if list.is_null() {
            let authenticated =
                unsafe { raw::libssh2_userauth_authenticated(sess.handle()) != 0 };
            if authenticated {
                return Ok(Vec::new());
            }
            return Err(sess.last_error());
        }
        let joined = unsafe { CStr::from_ptr(list) }.to_string_lossy();
        Ok(joined.split(',').map(str::to_owned).collect())
    }

    /// The server's host key, if the handshake has exchanged one.
    pub fn host_key(&self) -> Option<HostKey> {
        let sess = self.lock();
        unsafe {
            let mut len: size_t = 0;
            let mut kind: c_int = 0;
            let ptr = raw::libssh2_session_hostkey(sess.handle(), &mut len, &mut kind);
            if ptr.is_null() {
                return None;
            }
            let data = slice::from_raw_parts(ptr as *const u8, len).to_vec();
            Some(HostKey {
                data,
                key_type: HostKeyType::from_raw(kind),
            })
        }
    }

    /// Digest of the server's host key.
    pub fn host_key_hash(&self, hash: HashType) -> Option<Vec<u8>> {
        let sess = self.lock();
        unsafe {
            let ptr = raw::libssh2_hostkey_hash(sess.handle(), hash.raw_value());
            if ptr.is_null() {
                return None;
            }
            Some(slice::from_raw_parts(ptr as *const u8, hash.digest_len()).to_vec())
        }
    }

    /// Start the SFTP subsystem on this session.
    ///
    /// Opening a channel is a costly round trip; open one per connection and
    /// clone it to share across threads.
    pub fn sftp(&self) -> Result<SftpChannel, Error> {
        SftpChannel::new(self)
    }

    /// An empty known-hosts collection bound to this session.
    pub fn known_hosts(&self) -> Result<KnownHosts, Error> {
        KnownHosts::new(self)
    }
}

fn allocate() -> Result<SessionInner, Error> {
    init();
    let handle = unsafe { raw::libssh2_session_init_ex(None, None, None, ptr::null_mut()) };
    if handle.is_null() {
        return Err(Error::AllocationFailed);
    }
    unsafe { raw::libssh2_session_set_blocking(handle, 1) };
    Ok(SessionInner {
        handle,
        stream: None,
        disconnect_message: CString::default(),
    })
}

#[cfg(unix)]
pub(crate) fn path_cstring(path: &Path) -> Result<CString, Error> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidConfiguration("path contains a nul byte"))
}

#[cfg(windows)]
pub(crate) fn path_cstring(path: &Path) -> Result<CString, Error> {
    CString::new(path.to_string_lossy().into_owned())
        .map_err(|_| Error::InvalidConfiguration("path contains a nul byte"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_sessions_allocate_and_free() {
        let first = Session::new().unwrap();
        let second = Session::new().unwrap();
        drop(first);
        drop(second);
    }

    #[test]
    fn clones_share_one_session() {
        let session = Session::new().unwrap();
        let clone = session.clone();
        assert!(Arc::ptr_eq(&session.inner, &clone.inner));
    }

    #[test]
    fn unconnected_session_reports_no_host_key() {
        let session = Session::new().unwrap();
        assert!(session.host_key().is_none());
        assert!(session.host_key_hash(HashType::Sha256).is_none());
        assert!(!session.authenticated());
    }
}

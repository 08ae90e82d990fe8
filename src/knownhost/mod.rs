//! Known-hosts collections for host-key verification.
//!
//! The collection shares its session's connection lock: the native
//! known-hosts object records errors on the session, so its calls need the
//! same serialization as everything else touching the handle. Collections
//! work on unconnected sessions too, which makes file parsing and matching
//! testable without a server.

use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex};

use libc::{c_int, size_t};
use libssh2_sys as raw;
use tracing::debug;

use crate::error::Error;
use crate::session::{lock_inner, path_cstring, Session, SessionInner};

/// Outcome of checking a presented host key against the collection.
///
/// Only these three states reach callers; the native "check failed" result
/// is surfaced as an `Err` instead, so a failure can never be mistaken for
/// "host not known".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// The host is known and the key matches.
    Match,
    /// The host is known but presented a different key.
    Mismatch,
    /// The host has no entry in the collection.
    NotFound,
}

/// Encoding of key material passed in and out of the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Raw,
    Base64,
}

impl KeyFormat {
    fn typemask_bits(self) -> c_int {
        match self {
            KeyFormat::Raw => raw::LIBSSH2_KNOWNHOST_KEYENC_RAW as c_int,
            KeyFormat::Base64 => raw::LIBSSH2_KNOWNHOST_KEYENC_BASE64 as c_int,
        }
    }
}

/// Key algorithm recorded with a known-hosts entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    SshRsa,
    SshDss,
    Ecdsa256,
    Ecdsa384,
    Ecdsa521,
    Ed25519,
    Unknown,
}

impl KeyType {
    fn typemask_bits(self) -> c_int {
        (match self {
            KeyType::SshRsa => raw::LIBSSH2_KNOWNHOST_KEY_SSHRSA,
            KeyType::SshDss => raw::LIBSSH2_KNOWNHOST_KEY_SSHDSS,
            KeyType::Ecdsa256 => raw::LIBSSH2_KNOWNHOST_KEY_ECDSA_256,
            KeyType::Ecdsa384 => raw::LIBSSH2_KNOWNHOST_KEY_ECDSA_384,
            KeyType::Ecdsa521 => raw::LIBSSH2_KNOWNHOST_KEY_ECDSA_521,
            KeyType::Ed25519 => raw::LIBSSH2_KNOWNHOST_KEY_ED25519,
            KeyType::Unknown => raw::LIBSSH2_KNOWNHOST_KEY_UNKNOWN,
        }) as c_int
    }
}

/// A collection of known hosts in OpenSSH format.
pub struct KnownHosts {
    session: Arc<Mutex<SessionInner>>,
    handle: *mut raw::LIBSSH2_KNOWNHOSTS,
}

// The handle pointer is only used under the session mutex.
unsafe impl Send for KnownHosts {}

impl KnownHosts {
    pub(crate) fn new(session: &Session) -> Result<KnownHosts, Error> {
        let handle = {
            let sess = session.lock();
            let handle = unsafe { raw::libssh2_knownhost_init(sess.handle()) };
            if handle.is_null() {
                return Err(sess.last_error());
            }
            handle
        };
        Ok(KnownHosts {
            session: session.shared_inner(),
            handle,
        })
    }

    /// Load entries from an OpenSSH-format known-hosts file. Returns the
    /// number of entries added.
    pub fn read_file(&self, path: &Path) -> Result<u32, Error> {
        let file = path_cstring(path)?;
        let sess = lock_inner(&self.session);
        let rc = unsafe {
            raw::libssh2_knownhost_readfile(
                self.handle,
                file.as_ptr(),
                raw::LIBSSH2_KNOWNHOST_FILE_OPENSSH as c_int,
            )
        };
        if rc < 0 {
            return Err(sess.last_error());
        }
        drop(sess);
        debug!(path = %path.display(), entries = rc, "known hosts loaded");
        Ok(rc as u32)
    }

    /// Write the collection out as an OpenSSH-format known-hosts file.
    pub fn write_file(&self, path: &Path) -> Result<(), Error> {
        let file = path_cstring(path)?;
        let sess = lock_inner(&self.session);
        let rc = unsafe {
            raw::libssh2_knownhost_writefile(
                self.handle,
                file.as_ptr(),
                raw::LIBSSH2_KNOWNHOST_FILE_OPENSSH as c_int,
            )
        };
        sess.rc(rc)
    }

    /// Add a host with its key to the collection.
    ///
    /// `host` is a plain host name, optionally `host:port` or `[host]:port`
    /// as in OpenSSH files.
    pub fn add(
        &self,
        host: &str,
        key: &[u8],
        comment: &str,
        format: KeyFormat,
        key_type: KeyType,
    ) -> Result<(), Error> {
        let host = CString::new(host)
            .map_err(|_| Error::InvalidConfiguration("host name contains a nul byte"))?;
        let comment = CString::new(comment)
            .map_err(|_| Error::InvalidConfiguration("comment contains a nul byte"))?;
        let typemask = raw::LIBSSH2_KNOWNHOST_TYPE_PLAIN as c_int
            | format.typemask_bits()
            | key_type.typemask_bits();
        let sess = lock_inner(&self.session);
        let rc = unsafe {
            raw::libssh2_knownhost_addc(
                self.handle,
                host.as_ptr() as *mut _,
                ptr::null_mut(),
                key.as_ptr() as *mut _,
                key.len() as size_t,
                comment.as_ptr() as *const _,
                comment.to_bytes().len() as size_t,
                typemask,
                ptr::null_mut(),
            )
        };
        sess.rc(rc)
    }

    /// Check a host's presented key against the collection.
    ///
    /// `port` narrows the check to a port-specific entry; `None` matches
    /// entries for any port.
    pub fn check_port(
        &self,
        host: &str,
        port: Option<u16>,
        key: &[u8],
        format: KeyFormat,
    ) -> Result<CheckResult, Error> {
        let host = CString::new(host)
            .map_err(|_| Error::InvalidConfiguration("host name contains a nul byte"))?;
        let typemask =
            raw::LIBSSH2_KNOWNHOST_TYPE_PLAIN as c_int | format.typemask_bits();
        let sess = lock_inner(&self.session);
        let rc = unsafe {
            raw::libssh2_knownhost_checkp(
                self.handle,
                host.as_ptr(),
                port.map_or(-1, c_int::from),
                key.as_ptr() as *mut _,
                key.len() as size_t,
                typemask,
                ptr::null_mut(),
            )
        };
        match rc as u32 {
            x if x == raw::LIBSSH2_KNOWNHOST_CHECK_MATCH as u32 => Ok(CheckResult::Match),
            x if x == raw::LIBSSH2_KNOWNHOST_CHECK_MISMATCH as u32 => Ok(CheckResult::Mismatch),
            x if x == raw::LIBSSH2_KNOWNHOST_CHECK_NOTFOUND as u32 => Ok(CheckResult::NotFound),
            _ => Err(sess.last_error()),
        }
    }
}

impl Drop for KnownHosts {
    fn drop(&mut self) {
        let _sess = lock_inner(&self.session);
        unsafe {
            raw::libssh2_knownhost_free(self.handle);
        }
    }
}

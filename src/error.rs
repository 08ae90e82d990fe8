//! Error taxonomy and last-error translation.
//!
//! libssh2 records the outcome of a failing call on the *session*, not on the
//! call itself. A concurrent call on the same session can overwrite that
//! state, so the error must be read and copied into an owned value while the
//! session lock is still held. The translation functions live on
//! `SessionInner`, which is only reachable through the session's
//! `MutexGuard` — making it impossible to read the error state without the
//! lock.

use std::path::PathBuf;

use libssh2_sys as raw;
use thiserror::Error;

/// Owned copy of a session's last-recorded error state.
///
/// Self-contained by design: it never borrows from the session, so it remains
/// valid after the lock is released and the session is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Negative `LIBSSH2_ERROR_*` code.
    pub code: i32,
    /// Human-readable message reported by the library.
    pub message: String,
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", ssh_code_name(self.code))
        } else {
            write!(f, "{} ({})", self.message, ssh_code_name(self.code))
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// libssh2 could not allocate a new session.
    #[error("failed to allocate ssh session")]
    AllocationFailed,

    /// The socket connected but the SSH handshake failed. The partially-built
    /// session has already been freed by the time this is returned.
    #[error("ssh handshake failed: {detail}")]
    HandshakeFailed { detail: ErrorDetail },

    /// The caller supplied a contradictory open-mode configuration. Detected
    /// before any network call.
    #[error("invalid open mode: {0}")]
    InvalidConfiguration(&'static str),

    /// A seek resolved to a position before the start of the file.
    #[error("cannot seek to position {target} before start of file")]
    InvalidSeek { target: i64 },

    /// A low-level call failed. Carries the session's last-error detail, the
    /// SFTP protocol code when the failure came from the file subsystem, and
    /// the file path when one is known.
    #[error("{}", protocol_display(detail, *fx_code, path))]
    Protocol {
        detail: ErrorDetail,
        fx_code: Option<u32>,
        path: Option<PathBuf>,
    },
}

impl Error {
    /// True when the failure was the SFTP server reporting that a file or
    /// directory does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Protocol { fx_code: Some(fx), .. }
                if *fx == raw::LIBSSH2_FX_NO_SUCH_FILE as u32
        )
    }

    /// True when the server refused because the file already exists
    /// (exclusive-create violation).
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Protocol { fx_code: Some(fx), .. }
                if *fx == raw::LIBSSH2_FX_FILE_ALREADY_EXISTS as u32
        )
    }

    pub(crate) fn with_path(self, path: impl Into<PathBuf>) -> Error {
        match self {
            Error::Protocol {
                detail, fx_code, ..
            } => Error::Protocol {
                detail,
                fx_code,
                path: Some(path.into()),
            },
            other => other,
        }
    }
}

fn protocol_display(detail: &ErrorDetail, fx_code: Option<u32>, path: &Option<PathBuf>) -> String {
    let mut out = format!("ssh protocol error: {}", detail);
    if let Some(fx) = fx_code {
        out.push_str(": ");
        out.push_str(sftp_code_name(fx));
    }
    if let Some(path) = path {
        out.push_str(&format!(": {}", path.display()));
    }
    out
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        use std::io::ErrorKind;

        let kind = match &err {
            Error::InvalidConfiguration(_) | Error::InvalidSeek { .. } => ErrorKind::InvalidInput,
            Error::Protocol { .. } if err.is_not_found() => ErrorKind::NotFound,
            Error::Protocol { .. } if err.is_already_exists() => ErrorKind::AlreadyExists,
            Error::Protocol { fx_code: Some(fx), .. }
                if *fx == raw::LIBSSH2_FX_PERMISSION_DENIED as u32 =>
            {
                ErrorKind::PermissionDenied
            }
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

// Present in the libssh2 C headers but not re-exported by libssh2-sys 0.3.
const LIBSSH2_ERROR_SOCKET_NONE: i32 = -1;
const LIBSSH2_FX_OK: u32 = 0;

/// Stringised `LIBSSH2_ERROR_*` code.
pub fn ssh_code_name(code: i32) -> &'static str {
    match code {
        LIBSSH2_ERROR_SOCKET_NONE => "ERROR_SOCKET_NONE",
        raw::LIBSSH2_ERROR_BANNER_RECV => "ERROR_BANNER_RECV",
        raw::LIBSSH2_ERROR_BANNER_SEND => "ERROR_BANNER_SEND",
        raw::LIBSSH2_ERROR_INVALID_MAC => "ERROR_INVALID_MAC",
        raw::LIBSSH2_ERROR_KEX_FAILURE => "ERROR_KEX_FAILURE",
        raw::LIBSSH2_ERROR_ALLOC => "ERROR_ALLOC",
        raw::LIBSSH2_ERROR_SOCKET_SEND => "ERROR_SOCKET_SEND",
        raw::LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE => "ERROR_KEY_EXCHANGE_FAILURE",
        raw::LIBSSH2_ERROR_TIMEOUT => "ERROR_TIMEOUT",
        raw::LIBSSH2_ERROR_HOSTKEY_INIT => "ERROR_HOSTKEY_INIT",
        raw::LIBSSH2_ERROR_HOSTKEY_SIGN => "ERROR_HOSTKEY_SIGN",
        raw::LIBSSH2_ERROR_DECRYPT => "ERROR_DECRYPT",
        raw::LIBSSH2_ERROR_SOCKET_DISCONNECT => "ERROR_SOCKET_DISCONNECT",
        raw::LIBSSH2_ERROR_PROTO => "ERROR_PROTO",
        raw::LIBSSH2_ERROR_PASSWORD_EXPIRED => "ERROR_PASSWORD_EXPIRED",
        raw::LIBSSH2_ERROR_FILE => "ERROR_FILE",
        raw::LIBSSH2_ERROR_METHOD_NONE => "ERROR_METHOD_NONE",
        raw::LIBSSH2_ERROR_AUTHENTICATION_FAILED => "ERROR_AUTHENTICATION_FAILED",
        raw::LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED => "ERROR_PUBLICKEY_UNVERIFIED",
        raw::LIBSSH2_ERROR_CHANNEL_OUTOFORDER => "ERROR_CHANNEL_OUTOFORDER",
        raw::LIBSSH2_ERROR_CHANNEL_FAILURE => "ERROR_CHANNEL_FAILURE",
        raw::LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED => "ERROR_CHANNEL_REQUEST_DENIED",
        raw::LIBSSH2_ERROR_CHANNEL_UNKNOWN => "ERROR_CHANNEL_UNKNOWN",
        raw::LIBSSH2_ERROR_CHANNEL_WINDOW_EXCEEDED => "ERROR_CHANNEL_WINDOW_EXCEEDED",
        raw::LIBSSH2_ERROR_CHANNEL_PACKET_EXCEEDED => "ERROR_CHANNEL_PACKET_EXCEEDED",
        raw::LIBSSH2_ERROR_CHANNEL_CLOSED => "ERROR_CHANNEL_CLOSED",
        raw::LIBSSH2_ERROR_CHANNEL_EOF_SENT => "ERROR_CHANNEL_EOF_SENT",
        raw::LIBSSH2_ERROR_SCP_PROTOCOL => "ERROR_SCP_PROTOCOL",
        raw::LIBSSH2_ERROR_ZLIB => "ERROR_ZLIB",
        raw::LIBSSH2_ERROR_SOCKET_TIMEOUT => "ERROR_SOCKET_TIMEOUT",
        raw::LIBSSH2_ERROR_SFTP_PROTOCOL => "ERROR_SFTP_PROTOCOL",
        raw::LIBSSH2_ERROR_REQUEST_DENIED => "ERROR_REQUEST_DENIED",
        raw::LIBSSH2_ERROR_METHOD_NOT_SUPPORTED => "ERROR_METHOD_NOT_SUPPORTED",
        raw::LIBSSH2_ERROR_INVAL => "ERROR_INVAL",
        raw::LIBSSH2_ERROR_INVALID_POLL_TYPE => "ERROR_INVALID_POLL_TYPE",
        raw::LIBSSH2_ERROR_PUBLICKEY_PROTOCOL => "ERROR_PUBLICKEY_PROTOCOL",
        raw::LIBSSH2_ERROR_EAGAIN => "ERROR_EAGAIN",
        raw::LIBSSH2_ERROR_BUFFER_TOO_SMALL => "ERROR_BUFFER_TOO_SMALL",
        raw::LIBSSH2_ERROR_BAD_USE => "ERROR_BAD_USE",
        raw::LIBSSH2_ERROR_COMPRESS => "ERROR_COMPRESS",
        raw::LIBSSH2_ERROR_OUT_OF_BOUNDARY => "ERROR_OUT_OF_BOUNDARY",
        raw::LIBSSH2_ERROR_AGENT_PROTOCOL => "ERROR_AGENT_PROTOCOL",
        raw::LIBSSH2_ERROR_SOCKET_RECV => "ERROR_SOCKET_RECV",
        raw::LIBSSH2_ERROR_ENCRYPT => "ERROR_ENCRYPT",
        raw::LIBSSH2_ERROR_BAD_SOCKET => "ERROR_BAD_SOCKET",
        _ => "unknown ssh error code",
    }
}

/// Stringised SFTP `FX_*` status code. These codes come from the SFTP
/// standard, not just from libssh2, so the `LIBSSH2_` prefix is dropped.
pub fn sftp_code_name(code: u32) -> &'static str {
    const FX_OK: u32 = LIBSSH2_FX_OK;
    const FX_EOF: u32 = raw::LIBSSH2_FX_EOF as u32;
    const FX_NO_SUCH_FILE: u32 = raw::LIBSSH2_FX_NO_SUCH_FILE as u32;
    const FX_PERMISSION_DENIED: u32 = raw::LIBSSH2_FX_PERMISSION_DENIED as u32;
    const FX_FAILURE: u32 = raw::LIBSSH2_FX_FAILURE as u32;
    const FX_BAD_MESSAGE: u32 = raw::LIBSSH2_FX_BAD_MESSAGE as u32;
    const FX_NO_CONNECTION: u32 = raw::LIBSSH2_FX_NO_CONNECTION as u32;
    const FX_CONNECTION_LOST: u32 = raw::LIBSSH2_FX_CONNECTION_LOST as u32;
    const FX_OP_UNSUPPORTED: u32 = raw::LIBSSH2_FX_OP_UNSUPPORTED as u32;
    const FX_INVALID_HANDLE: u32 = raw::LIBSSH2_FX_INVALID_HANDLE as u32;
    const FX_NO_SUCH_PATH: u32 = raw::LIBSSH2_FX_NO_SUCH_PATH as u32;
    const FX_FILE_ALREADY_EXISTS: u32 = raw::LIBSSH2_FX_FILE_ALREADY_EXISTS as u32;
    const FX_WRITE_PROTECT: u32 = raw::LIBSSH2_FX_WRITE_PROTECT as u32;
    const FX_NO_MEDIA: u32 = raw::LIBSSH2_FX_NO_MEDIA as u32;
    const FX_NO_SPACE_ON_FILESYSTEM: u32 = raw::LIBSSH2_FX_NO_SPACE_ON_FILESYSTEM as u32;
    const FX_QUOTA_EXCEEDED: u32 = raw::LIBSSH2_FX_QUOTA_EXCEEDED as u32;
    const FX_UNKNOWN_PRINCIPAL: u32 = raw::LIBSSH2_FX_UNKNOWN_PRINCIPAL as u32;
    const FX_LOCK_CONFLICT: u32 = raw::LIBSSH2_FX_LOCK_CONFLICT as u32;
    const FX_DIR_NOT_EMPTY: u32 = raw::LIBSSH2_FX_DIR_NOT_EMPTY as u32;
    const FX_NOT_A_DIRECTORY: u32 = raw::LIBSSH2_FX_NOT_A_DIRECTORY as u32;
    const FX_INVALID_FILENAME: u32 = raw::LIBSSH2_FX_INVALID_FILENAME as u32;
    const FX_LINK_LOOP: u32 = raw::LIBSSH2_FX_LINK_LOOP as u32;

    match code {
        FX_OK => "FX_OK",
        FX_EOF => "FX_EOF",
        FX_NO_SUCH_FILE => "FX_NO_SUCH_FILE",
        FX_PERMISSION_DENIED => "FX_PERMISSION_DENIED",
        FX_FAILURE => "FX_FAILURE",
        FX_BAD_MESSAGE => "FX_BAD_MESSAGE",
        FX_NO_CONNECTION => "FX_NO_CONNECTION",
        FX_CONNECTION_LOST => "FX_CONNECTION_LOST",
        FX_OP_UNSUPPORTED => "FX_OP_UNSUPPORTED",
        FX_INVALID_HANDLE => "FX_INVALID_HANDLE",
        FX_NO_SUCH_PATH => "FX_NO_SUCH_PATH",
        FX_FILE_ALREADY_EXISTS => "FX_FILE_ALREADY_EXISTS",
        FX_WRITE_PROTECT => "FX_WRITE_PROTECT",
        FX_NO_MEDIA => "FX_NO_MEDIA",
        FX_NO_SPACE_ON_FILESYSTEM => "FX_NO_SPACE_ON_FILESYSTEM",
        FX_QUOTA_EXCEEDED => "FX_QUOTA_EXCEEDED",
        FX_UNKNOWN_PRINCIPAL => "FX_UNKNOWN_PRINCIPAL",
        FX_LOCK_CONFLICT => "FX_LOCK_CONFLICT",
        FX_DIR_NOT_EMPTY => "FX_DIR_NOT_EMPTY",
        FX_NOT_A_DIRECTORY => "FX_NOT_A_DIRECTORY",
        FX_INVALID_FILENAME => "FX_INVALID_FILENAME",
        FX_LINK_LOOP => "FX_LINK_LOOP",
        _ => "unrecognised sftp status code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failed_display_carries_detail() {
        let err = Error::HandshakeFailed {
            detail: ErrorDetail {
                code: raw::LIBSSH2_ERROR_KEX_FAILURE,
                message: "Unable to exchange encryption keys".to_string(),
            },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ssh handshake failed"));
        assert!(msg.contains("Unable to exchange encryption keys"));
        assert!(msg.contains("ERROR_KEX_FAILURE"));
    }

    #[test]
    fn protocol_error_display_includes_fx_code_and_path() {
        let err = Error::Protocol {
            detail: ErrorDetail {
                code: raw::LIBSSH2_ERROR_SFTP_PROTOCOL,
                message: "SFTP Protocol Error".to_string(),
            },
            fx_code: Some(raw::LIBSSH2_FX_NO_SUCH_FILE as u32),
            path: Some(PathBuf::from("/remote/missing.txt")),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("FX_NO_SUCH_FILE"));
        assert!(msg.contains("/remote/missing.txt"));
    }

    #[test]
    fn not_found_detection() {
        let err = Error::Protocol {
            detail: ErrorDetail {
                code: raw::LIBSSH2_ERROR_SFTP_PROTOCOL,
                message: String::new(),
            },
            fx_code: Some(raw::LIBSSH2_FX_NO_SUCH_FILE as u32),
            path: None,
        };
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());

        let io_err: std::io::Error = err.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn invalid_seek_maps_to_invalid_input() {
        let io_err: std::io::Error = Error::InvalidSeek { target: -3 }.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(io_err.to_string().contains("-3"));
    }

    #[test]
    fn with_path_attaches_to_protocol_errors_only() {
        let err = Error::Protocol {
            detail: ErrorDetail {
                code: raw::LIBSSH2_ERROR_SFTP_PROTOCOL,
                message: String::new(),
            },
            fx_code: None,
            path: None,
        }
        .with_path("/a/b");
        match err {
            Error::Protocol { path, .. } => assert_eq!(path, Some(PathBuf::from("/a/b"))),
            other => panic!("expected Protocol, got {:?}", other),
        }

        let err = Error::AllocationFailed.with_path("/a/b");
        assert!(matches!(err, Error::AllocationFailed));
    }

    #[test]
    fn code_names_cover_common_codes() {
        assert_eq!(ssh_code_name(raw::LIBSSH2_ERROR_ALLOC), "ERROR_ALLOC");
        assert_eq!(
            ssh_code_name(raw::LIBSSH2_ERROR_SFTP_PROTOCOL),
            "ERROR_SFTP_PROTOCOL"
        );
        assert_eq!(
            sftp_code_name(raw::LIBSSH2_FX_PERMISSION_DENIED as u32),
            "FX_PERMISSION_DENIED"
        );
        assert_eq!(sftp_code_name(9999), "unrecognised sftp status code");
    }
}

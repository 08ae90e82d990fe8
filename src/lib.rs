//! Thread-safe SSH/SFTP sessions with seekable remote file streams.
//!
//! libssh2 sessions are not thread-safe, and every channel, file handle, and
//! known-hosts collection derived from a session shares that thread-unsafety.
//! This crate wraps the native handles so the sharing is safe: a [`Session`]
//! owns the connection behind a mutex, and every native call made through
//! it — opening files, transferring bytes, listing directories, checking
//! host keys, closing handles — runs as its own critical section.
//!
//! The lock is held per low-level call, not per logical operation. A large
//! read loops over many small locked transfers, so a second thread using
//! another file on the same connection interleaves between them instead of
//! waiting for the whole read.
//!
//! [`RemoteFile`] implements [`std::io::Read`], [`std::io::Write`] and
//! [`std::io::Seek`]. Reads return short only at end-of-file and writes are
//! never short; wrap a file in [`FileStream`] to add client-side buffering.
//!
//! ```no_run
//! use std::io::Read;
//! use std::net::TcpStream;
//!
//! use sftpio::Session;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tcp = TcpStream::connect("example.com:22")?;
//! let session = Session::connect(tcp, "done")?;
//! session.authenticate_by_password("user", "secret")?;
//!
//! let sftp = session.sftp()?;
//! let mut file = sftp.open_read("/etc/hostname".as_ref())?;
//! let mut contents = String::new();
//! file.read_to_string(&mut contents)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod knownhost;
pub mod session;
pub mod sftp;
pub mod stream;

pub use error::{Error, ErrorDetail};
pub use knownhost::{CheckResult, KeyFormat, KeyType, KnownHosts};
pub use session::{HashType, HostKey, HostKeyType, Session};
pub use sftp::{DirEntry, FileAttributes, FileType, Overwrite, ReadDir, SftpChannel};
pub use stream::{FileStream, OpenMode, RemoteFile};

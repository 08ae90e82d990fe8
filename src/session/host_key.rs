//! Owned copies of the server's host-key material.
//!
//! The native session exposes the key as a borrow into its own memory, which
//! would otherwise pin the connection lock for as long as the key is held.
//! These types copy the bytes out under the lock and are freely shareable.

use libssh2_sys as raw;

/// Algorithm of the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyType {
    Rsa,
    Dss,
    Ecdsa256,
    Ecdsa384,
    Ecdsa521,
    Ed25519,
    Unknown,
}

impl HostKeyType {
    pub(crate) fn from_raw(kind: i32) -> HostKeyType {
        match kind as u32 {
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_RSA as u32 => HostKeyType::Rsa,
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_DSS as u32 => HostKeyType::Dss,
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_256 as u32 => HostKeyType::Ecdsa256,
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_384 as u32 => HostKeyType::Ecdsa384,
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_ECDSA_521 as u32 => HostKeyType::Ecdsa521,
            x if x == raw::LIBSSH2_HOSTKEY_TYPE_ED25519 as u32 => HostKeyType::Ed25519,
            _ => HostKeyType::Unknown,
        }
    }
}

/// The server's host key, copied out of the session.
#[derive(Debug, Clone)]
pub struct HostKey {
    /// Raw key blob in the wire encoding.
    pub data: Vec<u8>,
    pub key_type: HostKeyType,
}

/// Digest algorithm for [`crate::Session::host_key_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
}

impl HashType {
    pub(crate) fn raw_value(self) -> i32 {
        match self {
            HashType::Md5 => raw::LIBSSH2_HOSTKEY_HASH_MD5 as i32,
            HashType::Sha1 => raw::LIBSSH2_HOSTKEY_HASH_SHA1 as i32,
            HashType::Sha256 => raw::LIBSSH2_HOSTKEY_HASH_SHA256 as i32,
        }
    }

    /// Length in bytes of the digest the native hash call hands back. The
    /// buffer is not length-prefixed, so the caller has to know this.
    pub(crate) fn digest_len(self) -> usize {
        match self {
            HashType::Md5 => 16,
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_type_from_raw_maps_known_and_unknown() {
        assert_eq!(
            HostKeyType::from_raw(raw::LIBSSH2_HOSTKEY_TYPE_ED25519 as i32),
            HostKeyType::Ed25519
        );
        assert_eq!(HostKeyType::from_raw(-42), HostKeyType::Unknown);
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(HashType::Md5.digest_len(), 16);
        assert_eq!(HashType::Sha1.digest_len(), 20);
        assert_eq!(HashType::Sha256.digest_len(), 32);
    }
}

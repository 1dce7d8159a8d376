// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::io::Write;
use std::pin::Pin;
use std::task::Poll;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};
use tokio::io::AsyncWrite;

use crate::{Error, Result};

/// The number of bytes in a [`Digest`].
///
/// Variant-ids, build-ids and result hashes are all 20-byte digests, matching
/// the original tool's use of a 160-bit content hash for every identity it
/// tracks.
pub const DIGEST_SIZE: usize = 20;

/// The digest of zero bytes, useful as a sentinel "nothing was hashed" value.
pub const NULL_DIGEST: Digest = Digest([0; DIGEST_SIZE]);

/// A 20-byte content digest.
///
/// Used for variant-ids (hash of a step's recipe-derived definition),
/// build-ids (hash identifying a step's result for archive lookup) and
/// result hashes (hash of a workspace's contents after a step completes).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Build a digest from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; DIGEST_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::DigestLengthError(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// View this digest as its raw bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Encode this digest as a lowercase hex string, as used for
    /// `/bob/<hex variant-id>` sandbox paths and directory suffixes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Parse a digest from its hex string form.
pub fn parse_digest<S: AsRef<str>>(source: S) -> Result<Digest> {
    let bytes = hex::decode(source.as_ref()).map_err(Error::DigestDecodeError)?;
    Digest::from_bytes(&bytes)
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Digest").field(&self.to_hex()).finish()
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for Digest {
    type Err = Error;

    fn from_str(source: &str) -> Result<Self> {
        parse_digest(source)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_digest(s).map_err(D::Error::custom)
    }
}

/// Computes a [`Digest`] from the bytes written to it.
///
/// A write-through target can optionally be specified at creation time
/// using [`Hasher::with_target`]. In this form the hasher writes to the
/// given target while also tracking the digest of everything that passed
/// through it -- used by the workspace manager to hash a directory tree
/// while optionally streaming it elsewhere.
pub struct Hasher<T> {
    ctx: Sha1,
    target: T,
}

impl<T> Hasher<T> {
    /// The target of the hasher receives a copy of every byte written to it.
    pub fn with_target(writer: T) -> Self {
        Self {
            ctx: Sha1::new(),
            target: writer,
        }
    }

    /// Finalize the hasher and return the computed digest.
    pub fn digest(self) -> Digest {
        let out = self.ctx.finalize();
        Digest(out.into())
    }
}

impl Default for Hasher<std::io::Sink> {
    fn default() -> Self {
        Self {
            ctx: Sha1::new(),
            target: std::io::sink(),
        }
    }
}

impl<T> Write for Hasher<T>
where
    T: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.ctx.update(buf);
        self.target.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.target.flush()
    }
}

impl<T> AsyncWrite for Hasher<T>
where
    T: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let written = match Pin::new(&mut self.target).poll_write(cx, buf) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            Poll::Ready(Ok(count)) => count,
        };
        self.ctx.update(&buf[..written]);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.target).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.target).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod hash_test {
    use super::*;

    #[test]
    fn empty_digest_roundtrips_through_hex() {
        let hasher = Hasher::default();
        let digest = hasher.digest();
        let hex = digest.to_hex();
        let parsed = parse_digest(&hex).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn digest_is_stable_for_same_input() {
        let mut a = Hasher::default();
        a.write_all(b"hello world").unwrap();
        let mut b = Hasher::default();
        b.write_all(b"hello world").unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_differs_for_different_input() {
        let mut a = Hasher::default();
        a.write_all(b"hello").unwrap();
        let mut b = Hasher::default();
        b.write_all(b"world").unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Digest::from_bytes(&[0; 4]).is_err());
    }
}

//! Payload codec for tunnel frames
//!
//! Outgoing payloads are optionally Snappy-compressed and then sealed by a
//! [`PayloadCipher`]; incoming payloads are opened and then decompressed.
//! Compression is a static server policy, not negotiated with the client.
//!
//! Only key derivation is defined for the cipher side. [`Passthrough`] is the
//! default cipher and leaves payloads untouched.

use std::fmt;
use std::sync::Arc;

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of a derived symmetric key
pub const KEY_SIZE: usize = 32;

/// Size of the salt taken from the secret's digest
pub const SALT_SIZE: usize = 16;

const KEY_INFO: &[u8] = b"wstun payload key";

/// Derive a symmetric key from a shared secret
///
/// The salt is the first [`SALT_SIZE`] bytes of SHA-256(secret), so the same
/// secret always yields the same key on both ends.
pub fn derive_key(secret: &str) -> Result<[u8; KEY_SIZE]> {
    let digest = Sha256::digest(secret.as_bytes());
    let salt = &digest[..SALT_SIZE];

    let hk = Hkdf::<Sha256>::new(Some(salt), secret.as_bytes());
    let mut key = [0u8; KEY_SIZE];
    hk.expand(KEY_INFO, &mut key)
        .map_err(|e| Error::KeyDerivation(format!("HKDF expand failed: {:?}", e)))?;

    Ok(key)
}

/// Pluggable payload protection
pub trait PayloadCipher: Send + Sync {
    /// Protect an outgoing payload
    fn seal(&self, payload: Vec<u8>) -> Result<Vec<u8>>;

    /// Recover an incoming payload
    fn open(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Cipher that leaves payloads unchanged
#[derive(Clone, Default)]
pub struct Passthrough {
    key: Option<[u8; KEY_SIZE]>,
}

impl Passthrough {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep key material derived from `secret` for a future cipher
    pub fn with_secret(secret: &str) -> Result<Self> {
        Ok(Self {
            key: Some(derive_key(secret)?),
        })
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Debug for Passthrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key bytes
        f.debug_struct("Passthrough")
            .field("has_key", &self.has_key())
            .finish()
    }
}

impl PayloadCipher for Passthrough {
    fn seal(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }

    fn open(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }
}

/// Frame payload encoder/decoder shared by every relay flow
#[derive(Clone)]
pub struct Codec {
    compress: bool,
    max_packet: usize,
    cipher: Arc<dyn PayloadCipher>,
}

impl Codec {
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            max_packet: crate::DEFAULT_BUFFER_SIZE,
            cipher: Arc::new(Passthrough::new()),
        }
    }

    /// Refuse compressed frames that claim to expand past `limit` bytes
    pub fn with_max_packet(mut self, limit: usize) -> Self {
        self.max_packet = limit;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn PayloadCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Encode a packet read from the interface for a client
    pub fn encode(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let payload = if self.compress {
            snap::raw::Encoder::new()
                .compress_vec(packet)
                .map_err(|e| Error::Compression(e.to_string()))?
        } else {
            packet.to_vec()
        };
        self.cipher.seal(payload)
    }

    /// Decode a client frame into a packet for the interface
    pub fn decode(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let payload = self.cipher.open(frame)?;
        if !self.compress {
            return Ok(payload);
        }

        // The length header is client-controlled; check it before allocating
        let len = snap::raw::decompress_len(&payload)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        if len > self.max_packet {
            return Err(Error::Decompression(format!(
                "frame expands to {} bytes, limit is {}",
                len, self.max_packet
            )));
        }

        snap::raw::Decoder::new()
            .decompress_vec(&payload)
            .map_err(|e| Error::Decompression(e.to_string()))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("compress", &self.compress)
            .field("max_packet", &self.max_packet)
            .finish_non_exhaustive()
    }
}

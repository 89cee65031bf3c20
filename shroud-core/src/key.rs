//! Symmetric keys for the session and group layers.
//!
//! Both layers use the same primitive: UTF-8 text is AES-CBC encrypted
//! (PKCS#7 padding, fixed IV) and the ciphertext is base64 framed. A
//! [`Key`] with no material is the bootstrap state before a handshake
//! completes, and `encrypt`/`decrypt` pass text through unchanged.
//!
//! # Security Notes
//!
//! - The IV is a public constant, so equal plaintexts under one key produce
//!   equal ciphertexts. This is the interop format and must not change.
//! - Group keys come from [`fold_artifact`], an XOR fold of a shared file.
//!   It is not a KDF and is pending security review.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Fixed CBC initialization vector shared by every peer.
pub const IV: [u8; 16] = *b"shroud:cbc:iv:v1";

/// Public seed the group fold starts from.
pub const GROUP_SEED: [u8; 16] = [
    0x0, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8, 0x9, 0xA, 0xB, 0xC, 0xD, 0xE, 0xF,
];

/// Size of a generated session key (AES-256).
pub const SESSION_KEY_SIZE: usize = 32;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AES accepts 16, 24 or 32 byte keys.
    #[error("invalid key length: {0} (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// Ciphertext was not valid base64.
    #[error("ciphertext is not base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Hex key material could not be decoded.
    #[error("key is not hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Padding or UTF-8 check failed after decryption (wrong key or corrupt data).
    #[error("decryption failed")]
    DecryptionFailed,

    /// The OS random source failed.
    #[error("random source failed: {0}")]
    Random(String),
}

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key material, possibly absent.
#[derive(Clone, Default)]
pub struct Key {
    bytes: Option<Zeroizing<Vec<u8>>>,
}

impl Key {
    /// The empty key: encryption is a no-op.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap raw key bytes (16, 24 or 32 bytes).
    pub fn new(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self {
                bytes: Some(Zeroizing::new(bytes.to_vec())),
            }),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    /// Generate a fresh AES-256 session key.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new(vec![0u8; SESSION_KEY_SIZE]);
        getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
        Ok(Self { bytes: Some(bytes) })
    }

    /// Key protecting handshake bodies, derived from the router passphrase.
    ///
    /// An empty passphrase yields the empty key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        if passphrase.is_empty() {
            return Self::none();
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        Self {
            bytes: Some(Zeroizing::new(digest.to_vec())),
        }
    }

    /// Group key folded from the bytes of a shared artifact.
    pub fn from_artifact(artifact: &[u8]) -> Self {
        Self {
            bytes: Some(Zeroizing::new(fold_artifact(artifact).to_vec())),
        }
    }

    /// Parse hex key material (as sent in a handshake reply).
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex::decode(text)?);
        Self::new(&bytes)
    }

    /// Hex encoding of the key, empty for the empty key.
    pub fn to_hex(&self) -> String {
        self.bytes.as_deref().map(hex::encode).unwrap_or_default()
    }

    /// Raw bytes, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref().map(Vec::as_slice)
    }

    /// True when key material is present.
    pub fn is_set(&self) -> bool {
        self.bytes.is_some()
    }

    /// Encrypt text to base64 ciphertext.
    ///
    /// Empty text stays empty; without key material the text is returned as is.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let key = match self.bytes.as_deref() {
            Some(key) if !plaintext.is_empty() => key,
            _ => return Ok(plaintext.to_string()),
        };

        let data = plaintext.as_bytes();
        let ciphertext = match key.len() {
            16 => Aes128CbcEnc::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(16))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            24 => Aes192CbcEnc::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(24))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            32 => Aes256CbcEnc::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(32))?
                .encrypt_padded_vec_mut::<Pkcs7>(data),
            n => return Err(CryptoError::InvalidKeyLength(n)),
        };

        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypt base64 ciphertext back to text.
    ///
    /// Empty input stays empty; without key material the input is returned as is.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let key = match self.bytes.as_deref() {
            Some(key) if !ciphertext.is_empty() => key,
            _ => return Ok(ciphertext.to_string()),
        };

        let data = STANDARD.decode(ciphertext.trim())?;
        let plaintext = match key.len() {
            16 => Aes128CbcDec::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(16))?
                .decrypt_padded_vec_mut::<Pkcs7>(&data),
            24 => Aes192CbcDec::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(24))?
                .decrypt_padded_vec_mut::<Pkcs7>(&data),
            32 => Aes256CbcDec::new_from_slices(key, &IV)
                .map_err(|_| CryptoError::InvalidKeyLength(32))?
                .decrypt_padded_vec_mut::<Pkcs7>(&data),
            n => return Err(CryptoError::InvalidKeyLength(n)),
        }
        .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.bytes {
            Some(bytes) => write!(f, "Key([REDACTED; {}])", bytes.len()),
            None => f.write_str("Key(none)"),
        }
    }
}

/// XOR-fold an artifact into a 16-byte key.
///
/// Starts from [`GROUP_SEED`] and XORs in every full 16-byte block of the
/// artifact. A trailing partial block does not contribute.
pub fn fold_artifact(artifact: &[u8]) -> [u8; 16] {
    let mut out = GROUP_SEED;
    for block in artifact.chunks_exact(out.len()) {
        for (o, b) in out.iter_mut().zip(block) {
            *o ^= b;
        }
    }
    out
}

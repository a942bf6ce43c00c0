// cinder is the trust engine implementing the upload/download protocol shared logic.
// Copyright (C) 2024  Himbeer <himbeerserverde@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use thiserror::Error;

/// A `CinderError` indicates an error condition raised anywhere in the
/// upload/download trust engine.
///
/// Variants map 1:1 onto the error taxonomy of the specification: each
/// carries exactly the meaning documented on it, and the (out of scope)
/// transport layer is the only component allowed to translate a variant
/// into a status code or a user-facing message.
#[derive(Debug, Error)]
pub enum CinderError {
    /// A required byte input was empty or absent.
    #[error("required byte input is null or empty")]
    NullOrEmpty,
    /// A secret's length fell outside its declared bounds or alignment.
    #[error("secret size out of bounds: {0}")]
    SizeError(String),
    /// A `SealedBlob` or identifier was malformed.
    #[error("malformed wire format: {0}")]
    FormatError(String),
    /// A safe-secret container was read or consumed after it was already
    /// consumed or closed. This is always a programmer error, never
    /// downgraded or caught by the engine.
    #[error("safe container used after consume/close")]
    StateError,
    /// Two pieces of gate material had unequal lengths and could not be
    /// compared.
    #[error("gate material length mismatch")]
    SizeMismatch,

    /// No `SecureFile` exists for the requested id.
    #[error("file not found")]
    FileNotFound,
    /// The `SecureFile`'s expiry date has passed.
    #[error("file has expired")]
    FileExpired,
    /// The link identifier was unknown or malformed.
    #[error("invalid link")]
    InvalidLink,
    /// The session was missing, expired, or used in the wrong mode.
    #[error("invalid session")]
    InvalidSession,
    /// The supplied access hash did not unlock the gate.
    #[error("access verification failed")]
    AccessVerification,
    /// The download-attempt counter for this link reached zero.
    #[error("maximum download attempts exceeded")]
    MaxAttemptsExceeded,
    /// A timestamp fell outside the allowed clock-skew window.
    #[error("timestamp outside allowed skew")]
    TimestampSkew,

    /// Random-byte generation, HMAC, or seal/unseal failed.
    #[error("cryptographic operation failed: {0}")]
    CryptoError(String),
    /// The blob store or a repository port failed.
    #[error("storage operation failed: {0}")]
    StorageError(String),

    /// A `toml::de::Error` configuration parsing error occurred.
    #[error("configuration parsing error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// A `hex::FromHexError` occurred decoding a configured pepper key.
    #[error("pepper key is not valid hex: {0}")]
    PepperHex(#[from] hex::FromHexError),
}

/// Convenience alias for `Result<T, CinderError>`, matching the teacher's
/// per-binary `pub type Result<T>` convention.
pub type CinderResult<T> = std::result::Result<T, CinderError>;

impl From<chacha20poly1305::Error> for CinderError {
    fn from(_: chacha20poly1305::Error) -> Self {
        CinderError::CryptoError("AEAD seal/unseal failure".to_string())
    }
}

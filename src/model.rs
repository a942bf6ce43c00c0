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

//! The persisted data model: `SealedBlob`'s self-describing wire format,
//! the `Gate` tagged variant, and the `SecureFile`/`DownloadLimit`/
//! `Session` records the use cases in [`crate::upload`] and
//! [`crate::download`] operate on.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::clock::Timestamp;
use crate::error::{CinderError, CinderResult};
use crate::ids::{FileId, LinkId, PathReference, SessionId, UserId};

/// Smallest legal `SealedBlob` encoding: 2 bytes version + 2 bytes nonce
/// length + at least 1 nonce byte + at least 1 ciphertext byte.
const SEALED_BLOB_MIN_LEN: usize = 6;

/// The non-secret wire format a sealed server-resident value is carried
/// in: a versioned, self-describing AEAD envelope.
///
/// ```text
/// offset 0              : u16 big-endian pepperVersion
/// offset 2              : u16 big-endian nonceLength (>= 1)
/// offset 4              : nonce[nonceLength]
/// offset 4+nonceLength  : ciphertext[>= 1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pepper_version: u16,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Builds a `SealedBlob` from its logical parts. Both `nonce` and
    /// `ciphertext` must be non-empty; `nonce` must fit in a `u16` length
    /// prefix.
    pub fn build(pepper_version: u16, nonce: Vec<u8>, ciphertext: Vec<u8>) -> CinderResult<Self> {
        if nonce.is_empty() {
            return Err(CinderError::FormatError(
                "SealedBlob nonce must be at least 1 byte".to_string(),
            ));
        }
        if ciphertext.is_empty() {
            return Err(CinderError::FormatError(
                "SealedBlob ciphertext must be at least 1 byte".to_string(),
            ));
        }
        if nonce.len() > u16::MAX as usize {
            return Err(CinderError::FormatError(format!(
                "SealedBlob nonce length {} exceeds u16 range",
                nonce.len()
            )));
        }
        Ok(Self {
            pepper_version,
            nonce,
            ciphertext,
        })
    }

    /// Parses the fixed wire layout out of `bytes`. Fails with
    /// `FormatError` if `bytes` is shorter than the 6-byte minimum, or if
    /// `nonceLength` is zero or inconsistent with the total length.
    pub fn parse(bytes: &[u8]) -> CinderResult<Self> {
        if bytes.len() < SEALED_BLOB_MIN_LEN {
            return Err(CinderError::FormatError(format!(
                "SealedBlob must be at least {SEALED_BLOB_MIN_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let pepper_version = u16::from_be_bytes([bytes[0], bytes[1]]);
        let nonce_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if nonce_length == 0 {
            return Err(CinderError::FormatError(
                "SealedBlob nonceLength must be at least 1".to_string(),
            ));
        }

        let nonce_end = 4 + nonce_length;
        if bytes.len() <= nonce_end {
            return Err(CinderError::FormatError(
                "SealedBlob nonceLength inconsistent with total length".to_string(),
            ));
        }

        Ok(Self {
            pepper_version,
            nonce: bytes[4..nonce_end].to_vec(),
            ciphertext: bytes[nonce_end..].to_vec(),
        })
    }

    /// Serializes to the fixed wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.nonce.len() + self.ciphertext.len());
        out.extend_from_slice(&self.pepper_version.to_be_bytes());
        out.extend_from_slice(&(self.nonce.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn pepper_version(&self) -> u16 {
        self.pepper_version
    }

    /// Returns an independent copy of the nonce.
    pub fn nonce(&self) -> Vec<u8> {
        self.nonce.clone()
    }

    /// Returns an independent copy of the ciphertext.
    pub fn ciphertext(&self) -> Vec<u8> {
        self.ciphertext.clone()
    }
}

const GATE_TAG_QUIZ: u8 = 1;

/// The challenge mechanism a downloader must satisfy to unlock a link.
///
/// Stored as opaque bytes (`gate_box`/`gate_context`) on `SecureFile`; a
/// one-byte discriminator at the front of `gate_box` identifies the
/// variant, so new gate kinds can be added without touching the record
/// layout or any code that merely passes the bytes through.
///
/// `gate_hash` is plaintext gate material — the same secret-lifetime
/// discipline spec.md §4.6 requires of the envelope and salt applies to
/// it, so `Gate` zeroizes it on drop rather than leaving it for whoever
/// last held the enum to remember.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// A hash of the expected answer(s) concatenated with a nonce, plus
    /// the (server-opaque) encrypted question text shown to the
    /// downloader.
    Quiz {
        gate_hash: Vec<u8>,
        encrypted_questions: Option<Vec<u8>>,
    },
}

impl Drop for Gate {
    fn drop(&mut self) {
        match self {
            Gate::Quiz { gate_hash, .. } => gate_hash.zeroize(),
        }
    }
}

impl Gate {
    /// Splits this gate into the `(gate_box, gate_context)` pair a
    /// `SecureFile` record stores.
    pub fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        match self {
            Gate::Quiz {
                gate_hash,
                encrypted_questions,
            } => {
                let mut gate_box = Vec::with_capacity(1 + gate_hash.len());
                gate_box.push(GATE_TAG_QUIZ);
                gate_box.extend_from_slice(gate_hash);
                (gate_box, encrypted_questions.clone())
            }
        }
    }

    /// Reconstructs a `Gate` from a persisted `(gate_box, gate_context)`
    /// pair. An empty or unrecognized discriminator is a `FormatError`.
    pub fn decode(gate_box: &[u8], gate_context: Option<&[u8]>) -> CinderResult<Self> {
        let (tag, rest) = gate_box
            .split_first()
            .ok_or_else(|| CinderError::FormatError("gate box is empty".to_string()))?;

        match *tag {
            GATE_TAG_QUIZ => Ok(Gate::Quiz {
                gate_hash: rest.to_vec(),
                encrypted_questions: gate_context.map(|c| c.to_vec()),
            }),
            other => Err(CinderError::FormatError(format!(
                "unrecognized gate discriminator {other}"
            ))),
        }
    }

    pub fn gate_hash_bytes(&self) -> &[u8] {
        match self {
            Gate::Quiz { gate_hash, .. } => gate_hash,
        }
    }

    pub fn encrypted_questions(&self) -> Option<&[u8]> {
        match self {
            Gate::Quiz {
                encrypted_questions,
                ..
            } => encrypted_questions.as_deref(),
        }
    }
}

/// Smallest and largest legal `retryCount`, inclusive.
pub const MIN_RETRY_COUNT: u8 = 1;
pub const MAX_RETRY_COUNT: u8 = 99;

/// Upload-time parameters validated once and carried on `SecureFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpecs {
    pub expiry_date: Timestamp,
    pub retry_count: u8,
}

impl FileSpecs {
    /// Constructs `FileSpecs`, rejecting a `retry_count` outside
    /// `[1, 99]` as a first-class `SizeError` rather than an assertion.
    pub fn new(expiry_date: Timestamp, retry_count: u8) -> CinderResult<Self> {
        if !(MIN_RETRY_COUNT..=MAX_RETRY_COUNT).contains(&retry_count) {
            return Err(CinderError::SizeError(format!(
                "retryCount must be in [{MIN_RETRY_COUNT}, {MAX_RETRY_COUNT}], got {retry_count}"
            )));
        }
        Ok(Self {
            expiry_date,
            retry_count,
        })
    }
}

/// A persisted, burn-after-read file record.
///
/// Holds no pointer to its limit record — the redesigned ownership
/// breaks the cyclic `SecureFile`/access-link reference from the
/// original model; cross-reads go through the repository by `link_id`.
/// Immutable after `save`; the attempt counter and gate material live
/// on [`DownloadLimit`] instead, mutated only through
/// [`crate::ports::DownloadLimitStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureFile {
    pub file_id: FileId,
    pub link_id: LinkId,
    pub user_id: UserId,
    pub blob_path: PathReference,
    pub sealed_envelope: SealedBlob,
    pub sealed_salt: SealedBlob,
    pub specs: FileSpecs,
    pub created_at: Timestamp,
}

impl SecureFile {
    /// `true` iff `now` is strictly after `specs.expiry_date`.
    pub fn is_expired(&self, now: &Timestamp) -> bool {
        now.is_after(&self.specs.expiry_date)
    }
}

/// The current download-attempt counter, expiry witness, and gate
/// material for a link — the access-link record, the foreign-keyed
/// counterpart to a `SecureFile`. `expiry_date` is denormalized from
/// the `FileSpecs` supplied to `initialize` so `is_expired` never needs
/// a cross-table read. The authoritative state `decrementAttempts`
/// mutates atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLimit {
    pub link_id: LinkId,
    pub remaining_attempts: u8,
    pub expiry_date: Timestamp,
    pub last_attempt_at: Option<Timestamp>,
    pub gate_box: Vec<u8>,
    pub gate_context: Option<Vec<u8>>,
}

impl DownloadLimit {
    /// `true` iff `t` is strictly after `expiry_date`.
    pub fn is_expired(&self, t: &Timestamp) -> bool {
        t.is_after(&self.expiry_date)
    }
}

/// Which side of the protocol a cached session was opened for. A
/// verify-and-download call against a session opened in the wrong mode
/// is treated the same as a missing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    Upload,
    Download,
}

/// A cached, single-purpose session. `session_secret`, when present, is
/// sensitive and is masked out of `Debug` rendering; it is held as plain
/// bytes here (rather than a single-use `SafeBlob`) because a cached
/// session is read repeatedly while active, unlike the secrets consumed
/// in one step by the crypto provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub session_secret: Option<Vec<u8>>,
    pub link_id: Option<LinkId>,
    pub mode: SessionMode,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Session {
    /// `true` iff `t` is strictly after `expires_at`.
    pub fn is_expired(&self, t: &Timestamp) -> bool {
        t.is_after(&self.expires_at)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field(
                "session_secret",
                &self.session_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("link_id", &self.link_id)
            .field("mode", &self.mode)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_blob_round_trips_through_bytes() {
        let sealed = SealedBlob::build(7, vec![1, 2, 3], vec![9, 9, 9, 9]).unwrap();
        let bytes = sealed.to_bytes();
        let parsed = SealedBlob::parse(&bytes).unwrap();
        assert_eq!(parsed.pepper_version(), 7);
        assert_eq!(parsed.nonce(), vec![1, 2, 3]);
        assert_eq!(parsed.ciphertext(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn sealed_blob_rejects_short_input() {
        assert!(matches!(
            SealedBlob::parse(&[0, 1, 0, 1, 2]),
            Err(CinderError::FormatError(_))
        ));
    }

    #[test]
    fn sealed_blob_rejects_inconsistent_nonce_length() {
        // Claims a nonce of length 10 but the buffer is far too short.
        let bytes = vec![0, 1, 0, 10, 1, 2, 3];
        assert!(matches!(
            SealedBlob::parse(&bytes),
            Err(CinderError::FormatError(_))
        ));
    }

    #[test]
    fn sealed_blob_rejects_empty_nonce_or_ciphertext() {
        assert!(matches!(
            SealedBlob::build(1, vec![], vec![1]),
            Err(CinderError::FormatError(_))
        ));
        assert!(matches!(
            SealedBlob::build(1, vec![1], vec![]),
            Err(CinderError::FormatError(_))
        ));
    }

    #[test]
    fn gate_round_trips_through_encode_decode() {
        let gate = Gate::Quiz {
            gate_hash: vec![1, 2, 3, 4],
            encrypted_questions: Some(vec![5, 6]),
        };
        let (gate_box, gate_context) = gate.encode();
        let decoded = Gate::decode(&gate_box, gate_context.as_deref()).unwrap();
        assert_eq!(decoded, gate);
    }

    #[test]
    fn gate_decode_rejects_unknown_discriminator() {
        assert!(matches!(
            Gate::decode(&[99, 1, 2, 3], None),
            Err(CinderError::FormatError(_))
        ));
    }

    #[test]
    fn retry_count_boundaries() {
        let expiry = Timestamp::now();
        for bad in [0, 100] {
            assert!(matches!(
                FileSpecs::new(expiry, bad),
                Err(CinderError::SizeError(_))
            ));
        }
        for good in [1, 99] {
            assert!(FileSpecs::new(expiry, good).is_ok());
        }
    }

    #[test]
    fn is_expired_boundary_is_strict() {
        let expiry = Timestamp::now();
        let limit = DownloadLimit {
            link_id: LinkId::generate(),
            remaining_attempts: 1,
            expiry_date: expiry,
            last_attempt_at: None,
            gate_box: vec![1, 2, 3],
            gate_context: None,
        };
        assert!(!limit.is_expired(&expiry));
        let one_ms_later = Timestamp::from_chrono(expiry.inner() + chrono::Duration::milliseconds(1));
        assert!(limit.is_expired(&one_ms_later));
    }

    #[test]
    fn session_debug_masks_secret() {
        let session = Session {
            id: SessionId::generate(),
            session_secret: Some(vec![1, 2, 3]),
            link_id: None,
            mode: SessionMode::Download,
            created_at: Timestamp::now(),
            expires_at: Timestamp::now(),
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains('1'));
        assert!(rendered.contains("redacted"));
    }
}

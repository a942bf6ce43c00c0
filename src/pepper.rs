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

//! The pepper service (C3): versioned AEAD-style seal/unseal of
//! server-resident metadata (envelopes, salts) under a server-held key
//! the client never sees.

use std::collections::HashMap;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};

use crate::crypto::CryptoProvider;
use crate::error::{CinderError, CinderResult};
use crate::model::SealedBlob;

/// Length in bytes of a pepper key.
pub const PEPPER_KEY_LEN: usize = 32;
/// Length in bytes of an XChaCha20-Poly1305 nonce.
const NONCE_LEN: usize = 24;

/// A versioned pepper key map plus a designated active version.
///
/// Read-mostly: the map may be swapped wholesale on rotation. `seal`
/// always uses the active version; `unseal` looks the key up by the
/// version embedded in the `SealedBlob`, so historical blobs stay
/// decryptable for as long as their version remains in the map.
pub struct PepperService {
    keys: HashMap<u16, [u8; PEPPER_KEY_LEN]>,
    active_version: u16,
}

impl PepperService {
    /// Builds a service from a version-to-key map and an active version,
    /// which must already be present in `keys`.
    pub fn new(keys: HashMap<u16, [u8; PEPPER_KEY_LEN]>, active_version: u16) -> CinderResult<Self> {
        if !keys.contains_key(&active_version) {
            return Err(CinderError::CryptoError(format!(
                "active pepper version {active_version} has no configured key"
            )));
        }
        Ok(Self {
            keys,
            active_version,
        })
    }

    /// Adds or replaces the key for `version`, without changing which
    /// version is active.
    pub fn add_key(&mut self, version: u16, key: [u8; PEPPER_KEY_LEN]) {
        self.keys.insert(version, key);
    }

    /// Removes `version` from the map. If it was the active version, the
    /// active pointer is left untouched — callers must rotate to a new
    /// active version first, since `seal` would otherwise have no key.
    pub fn remove_key(&mut self, version: u16) {
        self.keys.remove(&version);
    }

    /// Flips the active version. Fails if no key is configured for it.
    pub fn set_active_version(&mut self, version: u16) -> CinderResult<()> {
        if !self.keys.contains_key(&version) {
            return Err(CinderError::CryptoError(format!(
                "pepper version {version} has no configured key"
            )));
        }
        self.active_version = version;
        Ok(())
    }

    pub fn active_version(&self) -> u16 {
        self.active_version
    }

    /// Seals `plain` under the active pepper key with a fresh nonce,
    /// producing a self-describing `SealedBlob`.
    pub fn seal(&self, plain: &[u8]) -> CinderResult<SealedBlob> {
        let key = self.keys.get(&self.active_version).ok_or_else(|| {
            CinderError::CryptoError(format!(
                "active pepper version {} has no configured key",
                self.active_version
            ))
        })?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
        let nonce_bytes = CryptoProvider::random_bytes(NONCE_LEN)?;
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, plain)?;

        SealedBlob::build(self.active_version, nonce_bytes, ciphertext)
    }

    /// Parses and decrypts `sealed`. An unrecognized `pepperVersion`
    /// fails with `CryptoError`, the same as a failed authentication tag
    /// or a nonce whose length does not match this cipher's.
    pub fn unseal(&self, sealed: &SealedBlob) -> CinderResult<Vec<u8>> {
        let key = self.keys.get(&sealed.pepper_version()).ok_or_else(|| {
            CinderError::CryptoError(format!(
                "unknown pepper version {}",
                sealed.pepper_version()
            ))
        })?;

        let nonce_bytes = sealed.nonce();
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CinderError::CryptoError(format!(
                "sealed blob nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            )));
        }

        let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = sealed.ciphertext();

        Ok(cipher.decrypt(nonce, ciphertext.as_ref())?)
    }
}

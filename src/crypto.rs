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

//! The crypto provider (C2): a secure random-byte source, HMAC-SHA256
//! compute/verify, and the branch-free gate comparison that
//! [`crate::secret::AccessHash::can_unlock`] is built on.

use hmac::{Hmac as HmacAlg, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CinderError, CinderResult};
use crate::secret::{Hmac, SessionSecret};

type HmacSha256 = HmacAlg<Sha256>;

/// Smallest and largest number of random bytes a single
/// [`CryptoProvider::random_bytes`] call will produce.
pub const MIN_RANDOM_BYTES: usize = 1;
pub const MAX_RANDOM_BYTES: usize = 1_048_576;

/// The crypto provider. Stateless: every method allocates what it needs
/// per call, so there is no shared MAC instance to race on (see the
/// "Global MAC instance" redesign note).
pub struct CryptoProvider;

impl CryptoProvider {
    /// Returns `n` cryptographically secure random bytes, `1 <= n <=
    /// 1_048_576`. Uses the thread-local generator of the `rand` crate,
    /// the same source the teacher used for challenge and nonce material.
    pub fn random_bytes(n: usize) -> CinderResult<Vec<u8>> {
        if !(MIN_RANDOM_BYTES..=MAX_RANDOM_BYTES).contains(&n) {
            return Err(CinderError::SizeError(format!(
                "random_bytes length must be between {MIN_RANDOM_BYTES} and {MAX_RANDOM_BYTES}, got {n}"
            )));
        }

        Ok(rand::thread_rng()
            .sample_iter(&rand::distributions::Standard)
            .take(n)
            .collect())
    }

    /// Computes `HMAC-SHA256(secret, data)`. Requires `|secret| == 32`.
    /// Consumes `secret` on every return, success or failure, so a MAC
    /// key is never reused across calls by accident.
    pub fn hmac(secret: &mut SessionSecret, data: &[u8]) -> CinderResult<Hmac> {
        let outcome = (|| -> CinderResult<Vec<u8>> {
            let key = secret.view()?;
            if key.len() != 32 {
                return Err(CinderError::CryptoError(format!(
                    "HMAC secret must be exactly 32 bytes, got {}",
                    key.len()
                )));
            }

            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| CinderError::CryptoError(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        })();

        secret.close();

        let mut digest = outcome?;
        Hmac::new(&mut digest)
    }

    /// Computes `actual = hmac(secret, data)` and compares it against
    /// `expected` in constant time. Consumes both `secret` and `expected`
    /// on every return.
    pub fn verify_hmac(
        secret: &mut SessionSecret,
        data: &[u8],
        expected: &mut Hmac,
    ) -> CinderResult<bool> {
        let actual = Self::hmac(secret, data);

        let verdict = match &actual {
            Ok(actual_hmac) => expected.ct_eq(actual_hmac),
            Err(_) => Ok(false),
        };
        expected.close();

        actual?;
        verdict
    }

    /// Branch-free, length-dependent-only constant-time byte comparison.
    /// This is the primitive [`crate::secret::AccessHash::can_unlock`]
    /// and [`crate::secret::SafeBlob::ct_eq`] are built on: every byte
    /// pair is XOR-accumulated so the number of operations depends only
    /// on `a.len()`, never on where the inputs first differ.
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }

        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff.ct_eq(&0u8).into()
    }
}

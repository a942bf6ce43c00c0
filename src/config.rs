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

//! The recognized configuration surface (spec.md §6): storage, scheduler,
//! session, and pepper key options. Reading the TOML document off disk,
//! watching it for changes, and wiring it into a running server are
//! dependency-wiring concerns (spec.md §1 out of scope); this module
//! defines the shape `serde`/`toml` deserialize into, the same field
//! style as the teacher's `NodeConfig`, plus the one piece of domain
//! logic a loaded config enables directly: turning `pepper.*` into a
//! ready-to-use [`PepperService`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CinderError, CinderResult};
use crate::pepper::{PepperService, PEPPER_KEY_LEN};

/// `storage.local.directory` — root for local blob storage. Out-of-scope
/// storage backends (a relational table, an object store) read their own
/// connection settings through whatever mechanism they provide; this is
/// the one a filesystem-backed [`crate::ports::FileStore`] would need.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    pub directory: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub local: LocalStorageConfig,
}

/// `scheduler.cleanupCron` / `scheduler.enabled` — the expiry sweeper's
/// (C11) schedule and master switch. The cron expression itself is
/// opaque to this crate; the out-of-scope scheduler wiring parses it and
/// drives [`crate::sweeper::ExpirySweeper::sweep`] on the resulting timer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "cleanupCron")]
    pub cleanup_cron: String,
    pub enabled: bool,
}

/// `session.timeoutSeconds` / `session.maxAttempts` — the TTL applied to
/// new download sessions and the default `retryCount` cap enforced on
/// uploads.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: i64,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u8,
}

/// `pepper.version` / `pepper.hex.<version>` — the active pepper version
/// for new seals, plus a hex-encoded 32-byte key per configured version.
/// Keyed by the version's decimal string form, since TOML table keys are
/// strings; [`PepperConfig::build_service`] parses them into the `u16`
/// map [`PepperService`] actually indexes by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PepperConfig {
    pub version: u16,
    pub hex: HashMap<String, String>,
}

impl PepperConfig {
    /// Decodes every configured hex key and builds a [`PepperService`]
    /// with `version` as the active pointer. Fails with `CryptoError` if
    /// a key is not valid hex, is not exactly 32 bytes once decoded, or
    /// the table has no key for `version` itself.
    pub fn build_service(&self) -> CinderResult<PepperService> {
        let mut keys = HashMap::with_capacity(self.hex.len());
        for (version_str, hex_key) in &self.hex {
            let version: u16 = version_str.parse().map_err(|_| {
                CinderError::CryptoError(format!("pepper version '{version_str}' is not a u16"))
            })?;
            let decoded = hex::decode(hex_key)?;
            let key: [u8; PEPPER_KEY_LEN] = decoded.try_into().map_err(|bytes: Vec<u8>| {
                CinderError::CryptoError(format!(
                    "pepper key for version {version} must be {PEPPER_KEY_LEN} bytes, got {}",
                    bytes.len()
                ))
            })?;
            keys.insert(version, key);
        }
        PepperService::new(keys, self.version)
    }
}

/// The full recognized configuration surface (spec.md §6). Dependency
/// wiring, CLI entry points, file-path conventions, and logging
/// configuration are out of scope (spec.md §1) and are not represented
/// here; a transport crate that embeds this one reads its own TOML
/// document into this struct (`toml::from_str`) and extends it, or
/// composes its own, for anything beyond the core's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CinderConfig {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
    pub pepper: PepperConfig,
}

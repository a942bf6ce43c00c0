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

//! External port contracts (C5–C8). The upload and download state
//! machines are written only against these traits; [`crate::adapters`]
//! supplies the in-memory reference implementations, and a production
//! deployment supplies its own against a real database and object
//! store without the core changing at all.

use crate::clock::Timestamp;
use crate::error::CinderResult;
use crate::ids::{FileId, LinkId, PathReference, SessionId};
use crate::model::{DownloadLimit, FileSpecs, SecureFile, Session};

/// C5: persisted `SecureFile` records. Records are immutable except
/// through [`DownloadLimitStore`]'s mutating operations; any other
/// updater is undefined behavior.
pub trait SecureFileRepository: Send + Sync {
    fn save(&self, file: SecureFile) -> CinderResult<()>;
    fn find_by_link_id(&self, link_id: &LinkId) -> CinderResult<Option<SecureFile>>;
    fn delete_by_id(&self, file_id: &FileId) -> CinderResult<()>;
    fn delete_by_link_id(&self, link_id: &LinkId) -> CinderResult<()>;
    fn find_expired_before(&self, t: &Timestamp) -> CinderResult<Vec<SecureFile>>;
}

/// C6: key-value session cache with lazy TTL. `save` rejects an
/// already-expired session; `get` evicts and reports not-found for an
/// expired one; `delete` is idempotent. Implementations must be safe
/// for concurrent readers and writers, and must not let a per-key race
/// evict a session that was just saved valid.
pub trait SessionCache: Send + Sync {
    fn save(&self, session: Session, now: Timestamp) -> CinderResult<()>;
    fn get(&self, session_id: &SessionId, now: Timestamp) -> CinderResult<Option<Session>>;
    fn delete(&self, session_id: &SessionId) -> CinderResult<()>;
}

/// C7: the per-link download-attempt counter. `decrement_attempts` must
/// be atomic: a conditional update `remaining_attempts -= 1 where
/// remaining_attempts > 0`, so two concurrent downloaders racing on the
/// last attempt result in at most one success.
pub trait DownloadLimitStore: Send + Sync {
    /// Creates or replaces the limit record for `link_id`. Pre-requires
    /// a matching `SecureFile` to already exist (else `InvalidLink`).
    /// `remaining_attempts` is seeded from `specs.retry_count`.
    fn initialize(
        &self,
        link_id: &LinkId,
        specs: FileSpecs,
        gate_box: Vec<u8>,
        gate_context: Option<Vec<u8>>,
    ) -> CinderResult<()>;

    fn get(&self, link_id: &LinkId) -> CinderResult<DownloadLimit>;

    /// Atomically decrements `remaining_attempts` if it is greater than
    /// zero, updates `last_attempt_at`, and returns the new snapshot.
    /// Fails with `MaxAttemptsExceeded` if zero rows changed.
    fn decrement_attempts(&self, link_id: &LinkId, now: Timestamp) -> CinderResult<DownloadLimit>;

    fn delete(&self, link_id: &LinkId) -> CinderResult<()>;
}

/// C8: an opaque blob store addressed by server-chosen
/// [`PathReference`]s, never by anything derived from user input.
pub trait FileStore: Send + Sync {
    fn save(&self, blob: Vec<u8>) -> CinderResult<PathReference>;
    fn load(&self, path: &PathReference) -> CinderResult<Vec<u8>>;
    fn delete(&self, path: &PathReference) -> CinderResult<()>;
    fn exists(&self, path: &PathReference) -> CinderResult<bool>;
}

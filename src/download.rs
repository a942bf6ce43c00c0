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

//! The two-phase download state machine (C10):
//! `init_session` issues a challenge, `verify_and_download` debits an
//! attempt, checks the answer, and burns the link on success.

use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::error::{CinderError, CinderResult};
use crate::ids::{LinkId, SessionId};
use crate::model::{Gate, Session, SessionMode};
use crate::pepper::PepperService;
use crate::ports::{DownloadLimitStore, FileStore, SecureFileRepository, SessionCache};
use crate::secret::{AccessHash, GateHash};

/// Drives the download protocol against the C5–C8 ports and the pepper
/// service.
pub struct DownloadUseCase {
    file_store: Arc<dyn FileStore>,
    repository: Arc<dyn SecureFileRepository>,
    download_limit: Arc<dyn DownloadLimitStore>,
    session_cache: Arc<dyn SessionCache>,
    pepper: Arc<PepperService>,
    clock: Arc<dyn Clock>,
    session_timeout_seconds: i64,
}

impl DownloadUseCase {
    pub fn new(
        file_store: Arc<dyn FileStore>,
        repository: Arc<dyn SecureFileRepository>,
        download_limit: Arc<dyn DownloadLimitStore>,
        session_cache: Arc<dyn SessionCache>,
        pepper: Arc<PepperService>,
        clock: Arc<dyn Clock>,
        session_timeout_seconds: i64,
    ) -> Self {
        Self {
            file_store,
            repository,
            download_limit,
            session_cache,
            pepper,
            clock,
            session_timeout_seconds,
        }
    }

    /// Opens a challenge session for `link_id`, returning the new
    /// session id and the server-opaque encrypted question text.
    pub fn init_session(&self, link_id: &LinkId) -> CinderResult<(SessionId, Option<Vec<u8>>)> {
        let now = self.clock.now();

        let file = self
            .repository
            .find_by_link_id(link_id)?
            .ok_or(CinderError::FileNotFound)?;
        if file.is_expired(&now) {
            return Err(CinderError::FileExpired);
        }

        let limit = self.download_limit.get(link_id)?;
        if limit.remaining_attempts == 0 {
            return Err(CinderError::MaxAttemptsExceeded);
        }

        let session_id = SessionId::generate();
        let session = Session {
            id: session_id.clone(),
            session_secret: None,
            link_id: Some(link_id.clone()),
            mode: SessionMode::Download,
            created_at: now,
            expires_at: now.plus_seconds(self.session_timeout_seconds),
        };
        self.session_cache.save(session, now)?;

        let gate = Gate::decode(&limit.gate_box, limit.gate_context.as_deref())?;
        Ok((session_id, gate.encrypted_questions().map(|q| q.to_vec())))
    }

    /// Debits one attempt, verifies `access_hash` against the link's
    /// gate, and on success burns the link: blob, repository record,
    /// limit record, and session are all deleted, best-effort, in that
    /// order. Returns `(blob, envelope_plain, salt_plain)` — the caller
    /// is responsible for transmitting and then zeroizing the returned
    /// plaintext.
    pub fn verify_and_download(
        &self,
        session_id: &SessionId,
        access_hash: AccessHash,
    ) -> CinderResult<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let now = self.clock.now();

        let session = self
            .session_cache
            .get(session_id, now)?
            .ok_or(CinderError::InvalidSession)?;
        if session.mode != SessionMode::Download {
            return Err(CinderError::InvalidSession);
        }
        let link_id = session.link_id.ok_or(CinderError::InvalidSession)?;

        let file = self
            .repository
            .find_by_link_id(&link_id)?
            .ok_or(CinderError::FileNotFound)?;
        if file.is_expired(&now) {
            return Err(CinderError::FileExpired);
        }

        // Decrement before verifying: every attempt, successful or not,
        // must be debited regardless of how the caller behaves afterward.
        let limit = self.download_limit.decrement_attempts(&link_id, now)?;

        let gate = Gate::decode(&limit.gate_box, limit.gate_context.as_deref())?;
        let mut gate_hash_bytes = gate.gate_hash_bytes().to_vec();
        let gate_hash = GateHash::new(&mut gate_hash_bytes)?;
        if !access_hash.can_unlock(&gate_hash)? {
            return Err(CinderError::AccessVerification);
        }

        let envelope_plain = self.pepper.unseal(&file.sealed_envelope)?;
        let salt_plain = self.pepper.unseal(&file.sealed_salt)?;
        let blob = self.file_store.load(&file.blob_path)?;

        // Burn cascade: the authoritative evidence goes first, so a
        // crash partway through leaves an unreachable but tidy record
        // for the sweeper to collect.
        let _ = self.file_store.delete(&file.blob_path);
        let _ = self.repository.delete_by_link_id(&link_id);
        let _ = self.download_limit.delete(&link_id);
        let _ = self.session_cache.delete(session_id);

        Ok((blob, envelope_plain, salt_plain))
    }
}

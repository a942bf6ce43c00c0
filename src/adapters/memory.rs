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

//! In-memory reference adapters for C5–C8, built on `dashmap` for safe
//! concurrent access without a single coarse-grained mutex.

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Timestamp;
use crate::error::{CinderError, CinderResult};
use crate::ids::{FileId, LinkId, PathReference, SessionId};
use crate::model::{DownloadLimit, FileSpecs, SecureFile, Session};
use crate::ports::{DownloadLimitStore, FileStore, SecureFileRepository, SessionCache};

/// C5: `SecureFile` records keyed by `link_id`, with a secondary index
/// from `file_id` so `delete_by_id` does not need a linear scan.
#[derive(Default)]
pub struct MemorySecureFileRepository {
    pub(crate) by_link: DashMap<LinkId, SecureFile>,
    pub(crate) link_by_file: DashMap<FileId, LinkId>,
}

impl MemorySecureFileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureFileRepository for MemorySecureFileRepository {
    fn save(&self, file: SecureFile) -> CinderResult<()> {
        self.link_by_file
            .insert(file.file_id.clone(), file.link_id.clone());
        self.by_link.insert(file.link_id.clone(), file);
        Ok(())
    }

    fn find_by_link_id(&self, link_id: &LinkId) -> CinderResult<Option<SecureFile>> {
        Ok(self.by_link.get(link_id).map(|entry| entry.value().clone()))
    }

    fn delete_by_id(&self, file_id: &FileId) -> CinderResult<()> {
        if let Some((_, link_id)) = self.link_by_file.remove(file_id) {
            self.by_link.remove(&link_id);
        }
        Ok(())
    }

    fn delete_by_link_id(&self, link_id: &LinkId) -> CinderResult<()> {
        if let Some((_, file)) = self.by_link.remove(link_id) {
            self.link_by_file.remove(&file.file_id);
        }
        Ok(())
    }

    fn find_expired_before(&self, t: &Timestamp) -> CinderResult<Vec<SecureFile>> {
        Ok(self
            .by_link
            .iter()
            .filter(|entry| entry.value().is_expired(t))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// C6: session cache with lazy TTL. Eviction of an expired entry is a
/// single atomic `remove_if`, so a concurrent `save` landing between the
/// expiry check and the removal can never be the one evicted.
#[derive(Default)]
pub struct MemorySessionCache {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCache for MemorySessionCache {
    fn save(&self, session: Session, now: Timestamp) -> CinderResult<()> {
        if session.is_expired(&now) {
            return Err(CinderError::InvalidSession);
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, session_id: &SessionId, now: Timestamp) -> CinderResult<Option<Session>> {
        self.sessions.remove_if(session_id, |_, s| s.is_expired(&now));
        Ok(self.sessions.get(session_id).map(|entry| entry.value().clone()))
    }

    fn delete(&self, session_id: &SessionId) -> CinderResult<()> {
        self.sessions.remove(session_id);
        Ok(())
    }
}

/// C7: the per-link download-attempt counter. `decrement_attempts` holds
/// `dashmap`'s per-shard write guard for the whole check-then-mutate
/// section, which is the "per-link mutex" the atomicity requirement
/// allows.
pub struct MemoryDownloadLimitStore {
    limits: DashMap<LinkId, DownloadLimit>,
    repository: Arc<dyn SecureFileRepository>,
}

impl MemoryDownloadLimitStore {
    /// `repository` backs the foreign-key precondition on `initialize`:
    /// a limit record may only be created for a link that already has a
    /// matching `SecureFile`.
    pub fn new(repository: Arc<dyn SecureFileRepository>) -> Self {
        Self {
            limits: DashMap::new(),
            repository,
        }
    }
}

impl DownloadLimitStore for MemoryDownloadLimitStore {
    fn initialize(
        &self,
        link_id: &LinkId,
        specs: FileSpecs,
        gate_box: Vec<u8>,
        gate_context: Option<Vec<u8>>,
    ) -> CinderResult<()> {
        if self.repository.find_by_link_id(link_id)?.is_none() {
            return Err(CinderError::InvalidLink);
        }

        self.limits.insert(
            link_id.clone(),
            DownloadLimit {
                link_id: link_id.clone(),
                remaining_attempts: specs.retry_count,
                expiry_date: specs.expiry_date,
                last_attempt_at: None,
                gate_box,
                gate_context,
            },
        );
        Ok(())
    }

    fn get(&self, link_id: &LinkId) -> CinderResult<DownloadLimit> {
        self.limits
            .get(link_id)
            .map(|entry| entry.value().clone())
            .ok_or(CinderError::InvalidLink)
    }

    fn decrement_attempts(&self, link_id: &LinkId, now: Timestamp) -> CinderResult<DownloadLimit> {
        let mut entry = match self.limits.get_mut(link_id) {
            Some(entry) => entry,
            // No limit record for this link. A winning racer's burn
            // cascade may have deleted it between this caller's own
            // `find_by_link_id` check and this call; the repository is
            // the authoritative record of that, so a missing file here
            // means we lost the race (`MaxAttemptsExceeded`), while a
            // file that's still present means the link was never
            // initialized (`InvalidLink`).
            None => {
                return if self.repository.find_by_link_id(link_id)?.is_some() {
                    Err(CinderError::InvalidLink)
                } else {
                    Err(CinderError::MaxAttemptsExceeded)
                };
            }
        };
        if entry.remaining_attempts == 0 {
            return Err(CinderError::MaxAttemptsExceeded);
        }
        entry.remaining_attempts -= 1;
        entry.last_attempt_at = Some(now);
        Ok(entry.clone())
    }

    fn delete(&self, link_id: &LinkId) -> CinderResult<()> {
        self.limits.remove(link_id);
        Ok(())
    }
}

/// C8: an opaque blob store keyed by server-chosen [`PathReference`]s.
#[derive(Default)]
pub struct MemoryFileStore {
    pub(crate) blobs: DashMap<PathReference, Vec<u8>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryFileStore {
    fn save(&self, blob: Vec<u8>) -> CinderResult<PathReference> {
        let path = PathReference::generate();
        self.blobs.insert(path.clone(), blob);
        Ok(path)
    }

    fn load(&self, path: &PathReference) -> CinderResult<Vec<u8>> {
        self.blobs
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or(CinderError::FileNotFound)
    }

    fn delete(&self, path: &PathReference) -> CinderResult<()> {
        self.blobs.remove(path);
        Ok(())
    }

    fn exists(&self, path: &PathReference) -> CinderResult<bool> {
        Ok(self.blobs.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::model::SealedBlob;
    use std::thread;

    fn sample_file(link_id: LinkId, expiry_date: Timestamp) -> SecureFile {
        SecureFile {
            file_id: FileId::generate(),
            link_id,
            user_id: UserId::generate(),
            blob_path: PathReference::generate(),
            sealed_envelope: SealedBlob::build(1, vec![0; 24], vec![1, 2, 3]).unwrap(),
            sealed_salt: SealedBlob::build(1, vec![0; 24], vec![4, 5, 6]).unwrap(),
            specs: FileSpecs::new(expiry_date, 1).unwrap(),
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn repository_round_trips_by_link_id() {
        let repo = MemorySecureFileRepository::new();
        let link_id = LinkId::generate();
        let file = sample_file(link_id.clone(), Timestamp::now().plus_seconds(60));
        repo.save(file.clone()).unwrap();

        let found = repo.find_by_link_id(&link_id).unwrap().unwrap();
        assert_eq!(found.file_id, file.file_id);

        repo.delete_by_link_id(&link_id).unwrap();
        assert!(repo.find_by_link_id(&link_id).unwrap().is_none());
    }

    #[test]
    fn repository_delete_by_id_also_clears_link_index() {
        let repo = MemorySecureFileRepository::new();
        let link_id = LinkId::generate();
        let file = sample_file(link_id.clone(), Timestamp::now().plus_seconds(60));
        let file_id = file.file_id.clone();
        repo.save(file).unwrap();

        repo.delete_by_id(&file_id).unwrap();
        assert!(repo.find_by_link_id(&link_id).unwrap().is_none());
    }

    #[test]
    fn find_expired_before_returns_only_expired_records() {
        let repo = MemorySecureFileRepository::new();
        let now = Timestamp::now();
        let expired_link = LinkId::generate();
        let live_link = LinkId::generate();
        repo.save(sample_file(expired_link.clone(), now.plus_seconds(-5)))
            .unwrap();
        repo.save(sample_file(live_link, now.plus_seconds(600))).unwrap();

        let expired = repo.find_expired_before(&now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].link_id, expired_link);
    }

    #[test]
    fn limit_store_requires_existing_file_to_initialize() {
        let repo = Arc::new(MemorySecureFileRepository::new());
        let limits = MemoryDownloadLimitStore::new(repo);
        let link_id = LinkId::generate();
        let specs = FileSpecs::new(Timestamp::now().plus_seconds(60), 3).unwrap();
        assert!(matches!(
            limits.initialize(&link_id, specs, vec![1], None),
            Err(CinderError::InvalidLink)
        ));
    }

    #[test]
    fn decrement_attempts_is_atomic_under_contention() {
        let repo = Arc::new(MemorySecureFileRepository::new());
        let link_id = LinkId::generate();
        repo.save(sample_file(link_id.clone(), Timestamp::now().plus_seconds(60)))
            .unwrap();

        let limits = Arc::new(MemoryDownloadLimitStore::new(repo));
        let specs = FileSpecs::new(Timestamp::now().plus_seconds(60), 1).unwrap();
        limits.initialize(&link_id, specs, vec![1], None).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limits = Arc::clone(&limits);
            let link_id = link_id.clone();
            handles.push(thread::spawn(move || {
                limits.decrement_attempts(&link_id, Timestamp::now())
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let failures = results
            .iter()
            .filter(|r| matches!(r, Err(CinderError::MaxAttemptsExceeded)))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(failures, 3);
        assert_eq!(limits.get(&link_id).unwrap().remaining_attempts, 0);
    }

    #[test]
    fn decrement_attempts_after_limit_deleted_reports_max_attempts_not_invalid_link() {
        // Simulates a losing racer reaching decrement_attempts after a
        // winning racer's burn cascade already ran download_limit.delete,
        // with the repository record also gone (spec.md §8 scenario 6).
        let repo = Arc::new(MemorySecureFileRepository::new());
        let link_id = LinkId::generate();
        repo.save(sample_file(link_id.clone(), Timestamp::now().plus_seconds(60)))
            .unwrap();

        let limits = MemoryDownloadLimitStore::new(repo.clone());
        let specs = FileSpecs::new(Timestamp::now().plus_seconds(60), 1).unwrap();
        limits.initialize(&link_id, specs, vec![1], None).unwrap();

        repo.delete_by_link_id(&link_id).unwrap();
        limits.delete(&link_id).unwrap();

        assert!(matches!(
            limits.decrement_attempts(&link_id, Timestamp::now()),
            Err(CinderError::MaxAttemptsExceeded)
        ));
    }

    #[test]
    fn decrement_attempts_never_initialized_reports_invalid_link() {
        let repo = Arc::new(MemorySecureFileRepository::new());
        let link_id = LinkId::generate();
        repo.save(sample_file(link_id.clone(), Timestamp::now().plus_seconds(60)))
            .unwrap();

        let limits = MemoryDownloadLimitStore::new(repo);
        assert!(matches!(
            limits.decrement_attempts(&link_id, Timestamp::now()),
            Err(CinderError::InvalidLink)
        ));
    }

    #[test]
    fn session_cache_evicts_expired_entries_on_get() {
        let cache = MemorySessionCache::new();
        let now = Timestamp::now();
        let session = Session {
            id: SessionId::generate(),
            session_secret: None,
            link_id: None,
            mode: crate::model::SessionMode::Download,
            created_at: now,
            expires_at: now.plus_seconds(1),
        };
        let session_id = session.id.clone();
        cache.save(session, now).unwrap();

        assert!(cache.get(&session_id, now).unwrap().is_some());

        let later = now.plus_seconds(5);
        assert!(cache.get(&session_id, later).unwrap().is_none());
        assert!(cache.get(&session_id, later).unwrap().is_none());
    }

    #[test]
    fn session_cache_rejects_saving_already_expired_session() {
        let cache = MemorySessionCache::new();
        let now = Timestamp::now();
        let session = Session {
            id: SessionId::generate(),
            session_secret: None,
            link_id: None,
            mode: crate::model::SessionMode::Upload,
            created_at: now.plus_seconds(-10),
            expires_at: now.plus_seconds(-5),
        };
        assert!(matches!(
            cache.save(session, now),
            Err(CinderError::InvalidSession)
        ));
    }

    #[test]
    fn file_store_round_trip_and_delete() {
        let store = MemoryFileStore::new();
        let path = store.save(vec![1, 2, 3]).unwrap();
        assert!(store.exists(&path).unwrap());
        assert_eq!(store.load(&path).unwrap(), vec![1, 2, 3]);

        store.delete(&path).unwrap();
        assert!(!store.exists(&path).unwrap());
        assert!(matches!(store.load(&path), Err(CinderError::FileNotFound)));
    }
}

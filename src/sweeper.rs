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

//! The expiry sweeper (C11): a scheduled tick that finds expired
//! `SecureFile` records and burns their remaining state, best-effort,
//! continuing past any single record's failure.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CinderResult;
use crate::ports::{DownloadLimitStore, FileStore, SecureFileRepository};

/// Aggregate outcome of one sweep tick. Returned rather than logged, so
/// the caller (the scheduler, out of scope here) decides how to surface
/// it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records returned by `findExpiredBefore`.
    pub expired_found: usize,
    /// Records for which blob, repository, and limit deletion all
    /// succeeded.
    pub fully_cleaned: usize,
    /// Records for which at least one of the three deletions failed.
    /// The record is still considered swept; a later tick will retry it
    /// if it still satisfies `findExpiredBefore`.
    pub failures: usize,
}

/// Drives a single expiry-sweep tick against the C5/C7/C8 ports. The
/// cron-like schedule itself lives outside this crate's scope; callers
/// invoke [`ExpirySweeper::sweep`] on whatever timer they run.
pub struct ExpirySweeper {
    repository: Arc<dyn SecureFileRepository>,
    file_store: Arc<dyn FileStore>,
    download_limit: Arc<dyn DownloadLimitStore>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(
        repository: Arc<dyn SecureFileRepository>,
        file_store: Arc<dyn FileStore>,
        download_limit: Arc<dyn DownloadLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            file_store,
            download_limit,
            clock,
        }
    }

    /// Runs one tick: finds every record expired as of now, and for each
    /// deletes the blob, the repository record, and the limit record.
    /// A failure on any one of the three does not stop the others, nor
    /// does it stop the sweep from moving on to the next record.
    pub fn sweep(&self) -> CinderResult<SweepReport> {
        let now = self.clock.now();
        let expired = self.repository.find_expired_before(&now)?;

        let mut report = SweepReport {
            expired_found: expired.len(),
            ..Default::default()
        };

        for file in expired {
            let blob_ok = self.file_store.delete(&file.blob_path).is_ok();
            let record_ok = self.repository.delete_by_id(&file.file_id).is_ok();
            let limit_ok = self.download_limit.delete(&file.link_id).is_ok();

            if blob_ok && record_ok && limit_ok {
                report.fully_cleaned += 1;
            } else {
                report.failures += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        MemoryDownloadLimitStore, MemoryFileStore, MemorySecureFileRepository,
    };
    use crate::clock::Timestamp;
    use crate::ids::{FileId, LinkId, PathReference, UserId};
    use crate::model::{FileSpecs, SealedBlob, SecureFile};

    fn file_with_expiry(
        file_store: &MemoryFileStore,
        expiry_date: Timestamp,
        blob: Vec<u8>,
    ) -> SecureFile {
        let blob_path = file_store.save(blob).unwrap();
        SecureFile {
            file_id: FileId::generate(),
            link_id: LinkId::generate(),
            user_id: UserId::generate(),
            blob_path,
            sealed_envelope: SealedBlob::build(1, vec![0; 4], vec![1, 2]).unwrap(),
            sealed_salt: SealedBlob::build(1, vec![0; 4], vec![3, 4]).unwrap(),
            specs: FileSpecs::new(expiry_date, 1).unwrap(),
            created_at: Timestamp::now(),
        }
    }

    #[derive(Clone, Copy)]
    struct FixedClock(Timestamp);
    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn sweep_cleans_only_expired_records() {
        let repository = Arc::new(MemorySecureFileRepository::new());
        let file_store = Arc::new(MemoryFileStore::new());
        let download_limit = Arc::new(MemoryDownloadLimitStore::new(repository.clone()));
        let now = Timestamp::now();
        let clock = Arc::new(FixedClock(now));

        let expired = file_with_expiry(&file_store, now.plus_seconds(-10), vec![1, 2, 3]);
        let live = file_with_expiry(&file_store, now.plus_seconds(600), vec![4, 5, 6]);
        let expired_path = expired.blob_path.clone();
        let live_path = live.blob_path.clone();

        repository.save(expired.clone()).unwrap();
        repository.save(live.clone()).unwrap();

        let sweeper = ExpirySweeper::new(
            repository.clone() as Arc<dyn SecureFileRepository>,
            file_store.clone() as Arc<dyn FileStore>,
            download_limit as Arc<dyn DownloadLimitStore>,
            clock,
        );

        let report = sweeper.sweep().unwrap();
        assert_eq!(report.expired_found, 1);
        assert_eq!(report.fully_cleaned, 1);
        assert_eq!(report.failures, 0);

        assert!(repository.find_by_link_id(&expired.link_id).unwrap().is_none());
        assert!(!file_store.exists(&expired_path).unwrap());
        assert!(repository.find_by_link_id(&live.link_id).unwrap().is_some());
        assert!(file_store.exists(&live_path).unwrap());
    }

    #[test]
    fn second_sweep_is_idempotent() {
        let repository = Arc::new(MemorySecureFileRepository::new());
        let file_store = Arc::new(MemoryFileStore::new());
        let download_limit = Arc::new(MemoryDownloadLimitStore::new(repository.clone()));
        let now = Timestamp::now();
        let clock = Arc::new(FixedClock(now));

        let expired = file_with_expiry(&file_store, now.plus_seconds(-1), vec![1]);
        repository.save(expired).unwrap();

        let sweeper = ExpirySweeper::new(
            repository as Arc<dyn SecureFileRepository>,
            file_store as Arc<dyn FileStore>,
            download_limit as Arc<dyn DownloadLimitStore>,
            clock,
        );

        let first = sweeper.sweep().unwrap();
        assert_eq!(first.fully_cleaned, 1);

        let second = sweeper.sweep().unwrap();
        assert_eq!(second.expired_found, 0);
        assert_eq!(second.fully_cleaned, 0);
    }
}

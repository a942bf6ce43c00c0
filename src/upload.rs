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

//! The upload state machine (C9):
//! `VALIDATING -> STORING -> SEALING -> PERSISTING -> GATE_INIT -> DONE`,
//! with best-effort compensating cleanup on every failure path.

use std::sync::Arc;

use zeroize::Zeroize;

use crate::clock::{Clock, Timestamp};
use crate::error::{CinderError, CinderResult};
use crate::ids::{FileId, LinkId, PathReference, UserId};
use crate::model::{FileSpecs, Gate, SecureFile};
use crate::pepper::PepperService;
use crate::ports::{DownloadLimitStore, FileStore, SecureFileRepository};
use crate::secret::{Envelope, GateHash, Salt};

/// The caller-assembled request for a single upload. `envelope`, `salt`,
/// and `gate_hash` are safe-secret containers: constructing one already
/// moved and zeroized the caller's source buffer, and each is consumed
/// exactly once during the state machine below.
pub struct UploadRequest {
    pub user_id: UserId,
    pub blob: Vec<u8>,
    pub envelope: Envelope,
    pub salt: Salt,
    pub gate_hash: GateHash,
    pub encrypted_questions: Option<Vec<u8>>,
    pub expiry_date: Timestamp,
    pub retry_count: u8,
}

/// Drives the upload protocol against the C5/C7/C8 ports and the pepper
/// service.
pub struct UploadUseCase {
    file_store: Arc<dyn FileStore>,
    repository: Arc<dyn SecureFileRepository>,
    download_limit: Arc<dyn DownloadLimitStore>,
    pepper: Arc<PepperService>,
    clock: Arc<dyn Clock>,
}

impl UploadUseCase {
    pub fn new(
        file_store: Arc<dyn FileStore>,
        repository: Arc<dyn SecureFileRepository>,
        download_limit: Arc<dyn DownloadLimitStore>,
        pepper: Arc<PepperService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            file_store,
            repository,
            download_limit,
            pepper,
            clock,
        }
    }

    /// Runs the full state machine, returning the new link's identifier
    /// on success.
    pub fn upload(&self, mut request: UploadRequest) -> CinderResult<LinkId> {
        // VALIDATING
        if request.blob.is_empty() {
            return Err(CinderError::NullOrEmpty);
        }
        let specs = FileSpecs::new(request.expiry_date, request.retry_count)?;

        // STORING: the path is server-chosen, never derived from user input.
        let blob_path = self.file_store.save(std::mem::take(&mut request.blob))?;

        let outcome = self.seal_and_persist(&mut request, specs, &blob_path);
        if outcome.is_err() {
            let _ = self.file_store.delete(&blob_path);
        }
        outcome
    }

    fn seal_and_persist(
        &self,
        request: &mut UploadRequest,
        specs: FileSpecs,
        blob_path: &PathReference,
    ) -> CinderResult<LinkId> {
        // SEALING
        let mut envelope_plain = request.envelope.resolve()?;
        let sealed_envelope = self.pepper.seal(&envelope_plain);
        envelope_plain.zeroize();
        let sealed_envelope = sealed_envelope?;

        let mut salt_plain = request.salt.resolve()?;
        let sealed_salt = self.pepper.seal(&salt_plain);
        salt_plain.zeroize();
        let sealed_salt = sealed_salt?;

        // PERSISTING
        let file_id = FileId::generate();
        let link_id = LinkId::generate();
        let file = SecureFile {
            file_id,
            link_id: link_id.clone(),
            user_id: request.user_id.clone(),
            blob_path: blob_path.clone(),
            sealed_envelope,
            sealed_salt,
            specs,
            created_at: self.clock.now(),
        };
        self.repository.save(file)?;

        if let Err(err) = self.finish_gate_init(request, &link_id, specs) {
            let _ = self.repository.delete_by_link_id(&link_id);
            return Err(err);
        }

        Ok(link_id)
    }

    fn finish_gate_init(
        &self,
        request: &mut UploadRequest,
        link_id: &LinkId,
        specs: FileSpecs,
    ) -> CinderResult<()> {
        // GATE_INIT
        let gate_hash_bytes = request.gate_hash.resolve()?;
        let gate = Gate::Quiz {
            gate_hash: gate_hash_bytes,
            encrypted_questions: request.encrypted_questions.take(),
        };
        let (gate_box, gate_context) = gate.encode();
        self.download_limit
            .initialize(link_id, specs, gate_box, gate_context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        MemoryDownloadLimitStore, MemoryFileStore, MemorySecureFileRepository,
    };
    use crate::clock::SystemClock;
    use std::collections::HashMap;

    fn use_case() -> (
        UploadUseCase,
        Arc<MemorySecureFileRepository>,
        Arc<MemoryFileStore>,
        Arc<MemoryDownloadLimitStore>,
    ) {
        let repository = Arc::new(MemorySecureFileRepository::new());
        let file_store = Arc::new(MemoryFileStore::new());
        let download_limit = Arc::new(MemoryDownloadLimitStore::new(repository.clone()));
        let mut keys = HashMap::new();
        keys.insert(1u16, [7u8; 32]);
        let pepper = Arc::new(PepperService::new(keys, 1).unwrap());
        let clock = Arc::new(SystemClock);

        let use_case = UploadUseCase::new(
            file_store.clone() as Arc<dyn FileStore>,
            repository.clone() as Arc<dyn SecureFileRepository>,
            download_limit.clone() as Arc<dyn DownloadLimitStore>,
            pepper,
            clock,
        );
        (use_case, repository, file_store, download_limit)
    }

    fn request(retry_count: u8, expiry_date: Timestamp) -> UploadRequest {
        UploadRequest {
            user_id: UserId::generate(),
            blob: vec![1, 2, 3, 4],
            envelope: Envelope::new(&mut vec![9u8; 12]).unwrap(),
            salt: Salt::new(&mut vec![3u8; 16]).unwrap(),
            gate_hash: GateHash::new(&mut vec![5u8; 32]).unwrap(),
            encrypted_questions: Some(vec![1, 1, 1]),
            expiry_date,
            retry_count,
        }
    }

    #[test]
    fn successful_upload_persists_file_and_limit() {
        let (use_case, repository, file_store, download_limit) = use_case();
        let expiry = Timestamp::now().plus_seconds(60);
        let link_id = use_case.upload(request(3, expiry)).unwrap();

        let file = repository.find_by_link_id(&link_id).unwrap().unwrap();
        assert!(file_store.exists(&file.blob_path).unwrap());

        let limit = download_limit.get(&link_id).unwrap();
        assert_eq!(limit.remaining_attempts, 3);
    }

    #[test]
    fn empty_blob_is_rejected_before_storing() {
        let (use_case, _repository, file_store, _download_limit) = use_case();
        let mut req = request(1, Timestamp::now().plus_seconds(60));
        req.blob = Vec::new();
        assert!(matches!(
            use_case.upload(req),
            Err(CinderError::NullOrEmpty)
        ));
        // Nothing should have touched the file store.
        assert!(file_store.blobs.is_empty());
    }

    #[test]
    fn retry_count_out_of_range_is_rejected_before_storing() {
        let (use_case, _repository, file_store, _download_limit) = use_case();
        let req = request(0, Timestamp::now().plus_seconds(60));
        assert!(matches!(
            use_case.upload(req),
            Err(CinderError::SizeError(_))
        ));
        assert!(file_store.blobs.is_empty());
    }

    #[test]
    fn failed_gate_init_rolls_back_blob_and_repository_record() {
        // A download-limit store wired to a *different* repository will
        // never see the just-saved file, so initialize() always fails
        // with InvalidLink, exercising the post-PERSISTING rollback path.
        let repository = Arc::new(MemorySecureFileRepository::new());
        let other_repository = Arc::new(MemorySecureFileRepository::new());
        let file_store = Arc::new(MemoryFileStore::new());
        let download_limit = Arc::new(MemoryDownloadLimitStore::new(other_repository));
        let mut keys = HashMap::new();
        keys.insert(1u16, [7u8; 32]);
        let pepper = Arc::new(PepperService::new(keys, 1).unwrap());
        let use_case = UploadUseCase::new(
            file_store.clone() as Arc<dyn FileStore>,
            repository.clone() as Arc<dyn SecureFileRepository>,
            download_limit as Arc<dyn DownloadLimitStore>,
            pepper,
            Arc::new(SystemClock),
        );

        let result = use_case.upload(request(2, Timestamp::now().plus_seconds(60)));
        assert!(matches!(result, Err(CinderError::InvalidLink)));
        assert!(file_store.blobs.is_empty());
        assert_eq!(repository.by_link.len(), 0);
    }
}

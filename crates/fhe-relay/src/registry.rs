//! Request storage and identifier assignment.
//!
//! Ids are derived from a strictly increasing counter, the requester
//! address, and the service instance seed, all bound under a domain
//! separator, so no two accepted requests ever share an id. Stored records
//! are immutable; resolution only moves their status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{
    Address, CapsulatedValue, ComputeRequest, Operation, ReencryptRequest, RequestId,
    SaveCiphertextRequest,
};

const REQUEST_ID_DOMAIN: &[u8] = b"FHE_RELAY_REQUEST_V1";

/// Lifecycle of a stored request. `Dispatching` marks a callback in flight
/// so a concurrent resolution of the same id is rejected; a failed callback
/// returns the request to `Pending`, a successful one ends it at `Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Dispatching,
    Resolved,
}

/// An admitted batch request with its assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCompute {
    pub id: RequestId,
    pub requester: Address,
    pub callback_target: Address,
    pub callback_selector: String,
    pub ops_cursor: usize,
    pub payload: Vec<u8>,
    pub ops: Vec<Operation>,
}

/// An admitted re-encryption request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReencrypt {
    pub id: RequestId,
    pub requester: Address,
    pub target: CapsulatedValue,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub callback_target: Address,
    pub callback_selector: String,
}

/// An admitted save-ciphertext request. The ciphertext itself is gone by the
/// time this record exists; only its digest and length remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSaveCiphertext {
    pub id: RequestId,
    pub requester: Address,
    pub ciphertext_digest: [u8; 32],
    pub ciphertext_len: usize,
    pub callback_target: Address,
    pub callback_selector: String,
}

/// Any stored request, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRequest {
    Compute(StoredCompute),
    Reencrypt(StoredReencrypt),
    SaveCiphertext(StoredSaveCiphertext),
}

impl StoredRequest {
    pub fn id(&self) -> RequestId {
        match self {
            Self::Compute(r) => r.id,
            Self::Reencrypt(r) => r.id,
            Self::SaveCiphertext(r) => r.id,
        }
    }

    pub fn requester(&self) -> Address {
        match self {
            Self::Compute(r) => r.requester,
            Self::Reencrypt(r) => r.requester,
            Self::SaveCiphertext(r) => r.requester,
        }
    }

    pub fn callback_target(&self) -> Address {
        match self {
            Self::Compute(r) => r.callback_target,
            Self::Reencrypt(r) => r.callback_target,
            Self::SaveCiphertext(r) => r.callback_target,
        }
    }

    pub fn callback_selector(&self) -> &str {
        match self {
            Self::Compute(r) => &r.callback_selector,
            Self::Reencrypt(r) => &r.callback_selector,
            Self::SaveCiphertext(r) => &r.callback_selector,
        }
    }
}

/// A stored request together with its resolution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub request: StoredRequest,
    pub status: RequestStatus,
}

/// Registry of accepted requests, keyed by id. Entries are never deleted;
/// resolved ones stay visible but can never be claimed for dispatch again.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    seed: [u8; 32],
    counter: u64,
    entries: HashMap<RequestId, RegistryEntry>,
}

impl RequestRegistry {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: 0,
            entries: HashMap::new(),
        }
    }

    fn next_id(&mut self, requester: Address) -> RequestId {
        let id = derive_request_id(&self.seed, self.counter, requester);
        self.counter += 1;
        id
    }

    fn insert(&mut self, request: StoredRequest) -> RequestId {
        let id = request.id();
        self.entries.insert(
            id,
            RegistryEntry {
                request,
                status: RequestStatus::Pending,
            },
        );
        id
    }

    /// Store a batch request. The operation list is copied element by
    /// element into the stored record; later mutation of the caller's copy
    /// cannot affect it.
    pub fn insert_compute(&mut self, requester: Address, request: &ComputeRequest) -> RequestId {
        let id = self.next_id(requester);
        self.insert(StoredRequest::Compute(StoredCompute {
            id,
            requester,
            callback_target: request.callback_target,
            callback_selector: request.callback_selector.clone(),
            ops_cursor: request.ops_cursor,
            payload: request.payload.clone(),
            ops: request.ops.to_vec(),
        }))
    }

    pub fn insert_reencrypt(&mut self, requester: Address, request: &ReencryptRequest) -> RequestId {
        let id = self.next_id(requester);
        self.insert(StoredRequest::Reencrypt(StoredReencrypt {
            id,
            requester,
            target: request.target.clone(),
            public_key: request.public_key.clone(),
            signature: request.signature.clone(),
            callback_target: request.callback_target,
            callback_selector: request.callback_selector.clone(),
        }))
    }

    /// Store a save-ciphertext request, digesting the ciphertext and
    /// dropping the bytes themselves.
    pub fn insert_save_ciphertext(
        &mut self,
        requester: Address,
        request: &SaveCiphertextRequest,
    ) -> RequestId {
        let id = self.next_id(requester);
        self.insert(StoredRequest::SaveCiphertext(StoredSaveCiphertext {
            id,
            requester,
            ciphertext_digest: Sha256::digest(&request.ciphertext).into(),
            ciphertext_len: request.ciphertext.len(),
            callback_target: request.callback_target,
            callback_selector: request.callback_selector.clone(),
        }))
    }

    pub fn lookup(&self, id: RequestId) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    /// Claim a pending request for dispatch. Returns the stored record and
    /// moves the entry to `Dispatching`; anything not pending (unknown,
    /// already resolved, or mid-dispatch) yields `None`.
    pub fn begin_dispatch(&mut self, id: RequestId) -> Option<StoredRequest> {
        let entry = self.entries.get_mut(&id)?;
        if entry.status != RequestStatus::Pending {
            return None;
        }
        entry.status = RequestStatus::Dispatching;
        Some(entry.request.clone())
    }

    /// Return a dispatching request to `Pending` after a failed callback.
    pub fn abort_dispatch(&mut self, id: RequestId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.status == RequestStatus::Dispatching {
                entry.status = RequestStatus::Pending;
            }
        }
    }

    /// Mark a dispatching request resolved.
    pub fn finish_dispatch(&mut self, id: RequestId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.status == RequestStatus::Dispatching {
                entry.status = RequestStatus::Resolved;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status == RequestStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn derive_request_id(seed: &[u8; 32], counter: u64, requester: Address) -> RequestId {
    let mut hasher = Sha256::new();
    hasher.update(REQUEST_ID_DOMAIN);
    hasher.update(seed);
    hasher.update(counter.to_be_bytes());
    hasher.update(requester.as_bytes());
    RequestId(hasher.finalize().into())
}

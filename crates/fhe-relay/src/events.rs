use serde::{Deserialize, Serialize};

use crate::types::{Address, CapsulatedValue, Operation, RequestId};

/// Signals broadcast to trusted workers and monitors. Request signals carry
/// everything a worker needs to pick the job up; resolution signals report
/// the outcome per request kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    ComputeRequested {
        id: RequestId,
        requester: Address,
        callback_target: Address,
        ops_cursor: usize,
        ops: Vec<Operation>,
    },
    ReencryptRequested {
        id: RequestId,
        requester: Address,
        target: CapsulatedValue,
        public_key: Vec<u8>,
    },
    /// Carries the raw ciphertext for the workers; the relay itself keeps
    /// only a digest of it.
    SaveCiphertextRequested {
        id: RequestId,
        requester: Address,
        ciphertext: Vec<u8>,
    },
    ComputeResolved {
        id: RequestId,
        success: bool,
    },
    ReencryptResolved {
        id: RequestId,
        success: bool,
    },
    SaveCiphertextResolved {
        id: RequestId,
        success: bool,
    },
}

impl RelayEvent {
    pub fn id(&self) -> RequestId {
        match self {
            Self::ComputeRequested { id, .. }
            | Self::ReencryptRequested { id, .. }
            | Self::SaveCiphertextRequested { id, .. }
            | Self::ComputeResolved { id, .. }
            | Self::ReencryptResolved { id, .. }
            | Self::SaveCiphertextResolved { id, .. } => *id,
        }
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CapsulatedValue, RequestId};

/// Result payload delivered to a requester's completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackResult {
    /// Output values of a batch request, one per producing operation.
    Compute { values: Vec<CapsulatedValue> },
    /// The target value re-encrypted under the requested public key.
    Reencrypt { data: Vec<u8> },
    /// The handle assigned to a persisted ciphertext.
    SaveCiphertext { value: CapsulatedValue },
}

impl CallbackResult {
    /// Values that carry capability grants once the callback succeeds.
    /// Re-encrypted data is plaintext for the key holder and never grants.
    pub fn encrypted_values(&self) -> Vec<&CapsulatedValue> {
        match self {
            Self::Compute { values } => values
                .iter()
                .filter(|value| value.value_type.is_encrypted())
                .collect(),
            Self::Reencrypt { .. } => Vec::new(),
            Self::SaveCiphertext { value } => {
                if value.value_type.is_encrypted() {
                    vec![value]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Reject results whose encrypted entries do not resolve to a handle;
    /// granting access to a malformed handle must never happen.
    pub fn check_handles(&self) -> Result<(), String> {
        for value in self.encrypted_values() {
            if value.handle().is_none() {
                return Err(format!(
                    "{} result carries a malformed {} handle",
                    self.kind_name(),
                    value.value_type
                ));
            }
        }
        Ok(())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Compute { .. } => "compute",
            Self::Reencrypt { .. } => "reencrypt",
            Self::SaveCiphertext { .. } => "save_ciphertext",
        }
    }
}

/// Failure payload surfaced by a completion handler. The reason is decoded
/// from the requester's own code and propagated verbatim to the resolving
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct CallbackFailure {
    pub reason: String,
}

impl CallbackFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Completion hook registered per callback-target address. Invoked by the
/// dispatcher with the request's declared selector once a trusted caller
/// submits a result; returning an error rolls the whole resolution back.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn complete(
        &self,
        selector: &str,
        id: RequestId,
        result: &CallbackResult,
    ) -> Result<(), CallbackFailure>;
}

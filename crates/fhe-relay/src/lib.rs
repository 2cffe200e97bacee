//! # FHE Relay
//!
//! Capability-gated request/callback relay for confidential compute
//! workers. Clients submit batches of operations over encrypted values;
//! trusted workers observe the emitted signals, perform the computation off
//! to the side, and deliver results back through the relay, which invokes
//! the requester's completion handler and records the new capability grants
//! transactionally.
//!
//! ## Features
//! - Per-opcode admission checks against the capability ledger
//! - Recoverable-signature proofs for re-encryption requests
//! - Collision-resistant request identifiers from a monotonic counter
//! - All-or-nothing callback delivery: a failed completion handler rolls
//!   the resolution back with zero ledger writes

pub mod callback;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod service;
pub mod signature;
pub mod types;
pub mod validate;

pub use callback::{CallbackFailure, CallbackHandler, CallbackResult};
pub use events::RelayEvent;
pub use ledger::{CapabilityLedger, InMemoryLedger};
pub use registry::{
    RegistryEntry, RequestRegistry, RequestStatus, StoredCompute, StoredReencrypt,
    StoredRequest, StoredSaveCiphertext,
};
pub use service::{RelayConfig, RelayService};
pub use types::{
    Address, CapsulatedValue, ComputeRequest, Handle, Opcode, Operation, ReencryptRequest,
    RequestId, SaveCiphertextRequest, ValueType,
};

use thiserror::Error;

/// Errors surfaced by the relay's submit and resolve entry points. Each one
/// fails the enclosing operation entirely; no partial writes survive.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An operand handle is not accessible to the designated callback target.
    #[error("callback target lacks access to handle 0x{}", hex::encode(.handle))]
    CapabilityDenied { handle: Handle },

    /// A re-encryption proof did not recover to the submitting account.
    #[error("reencryption signature does not recover to the submitting account")]
    SignatureMismatch,

    /// The callback target is neither the requester nor a delegated address.
    #[error("callback target {delegate} is not delegated by {requester}")]
    NotDelegated {
        requester: Address,
        delegate: Address,
    },

    /// The acting address is not allowed to perform this operation.
    #[error("{caller} is not authorized for this operation")]
    Unauthorized { caller: Address },

    /// The id names no pending request: it never existed, was already
    /// handled, or is mid-dispatch.
    #[error("no pending request with id {id}")]
    UnknownId { id: RequestId },

    /// The requester's completion code failed; its reason is carried
    /// through verbatim.
    #[error("callback reverted: {reason}")]
    CallbackReverted { reason: String },

    /// The submission or result is structurally invalid.
    #[error("malformed request: {detail}")]
    MalformedRequest { detail: String },
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

//! The relay's command surface: request admission, trusted-caller
//! resolution, and atomic callback delivery with capability grants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::callback::{CallbackFailure, CallbackHandler, CallbackResult};
use crate::events::RelayEvent;
use crate::ledger::CapabilityLedger;
use crate::registry::{RegistryEntry, RequestRegistry, StoredRequest};
use crate::types::{
    Address, CapsulatedValue, ComputeRequest, ReencryptRequest, RequestId, SaveCiphertextRequest,
};
use crate::validate::{check_delegation, validate_operations, validate_reencrypt};
use crate::RelayError;

/// Configuration for the relay service.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Administrative owner allowed to manage the trusted caller set.
    pub owner: Address,
    /// Seed mixed into request id derivation so independent instances never
    /// produce colliding ids.
    pub instance_seed: [u8; 32],
    /// Capacity of the broadcast channel carrying relay events.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            owner: Address::ZERO,
            instance_seed: [0u8; 32],
            event_capacity: 256,
        }
    }
}

struct RelayState {
    registry: RequestRegistry,
    callers: HashSet<Address>,
    handlers: HashMap<Address, Arc<dyn CallbackHandler>>,
}

/// Relay service admitting requests from clients, exposing them to trusted
/// workers through the event stream, and delivering results back to the
/// requester's callback target. All mutable state sits behind one lock;
/// admission and resolution each commit fully or not at all.
pub struct RelayService {
    owner: Address,
    ledger: Arc<dyn CapabilityLedger>,
    state: Arc<Mutex<RelayState>>,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayService {
    pub fn new(config: RelayConfig, ledger: Arc<dyn CapabilityLedger>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        info!(owner = %config.owner, "starting relay service");
        Self {
            owner: config.owner,
            ledger,
            state: Arc::new(Mutex::new(RelayState {
                registry: RequestRegistry::new(config.instance_seed),
                callers: HashSet::new(),
                handlers: HashMap::new(),
            })),
            events,
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Subscribe to the relay's event stream. Workers watch this to pick up
    /// pending requests; a subscriber lagging past the channel capacity
    /// misses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Register the completion handler invoked when results arrive for
    /// `target`. Replaces any previous handler for that address.
    pub async fn register_callback(&self, target: Address, handler: Arc<dyn CallbackHandler>) {
        self.state.lock().await.handlers.insert(target, handler);
    }

    /// Owner-only management of the trusted caller set. Adding a present
    /// address or removing an absent one is a no-op.
    pub async fn manage_callers(
        &self,
        origin: Address,
        add: &[Address],
        remove: &[Address],
    ) -> Result<(), RelayError> {
        if origin != self.owner {
            return Err(RelayError::Unauthorized { caller: origin });
        }
        let mut state = self.state.lock().await;
        for address in add {
            if state.callers.insert(*address) {
                info!(caller = %address, "caller authorized");
            }
        }
        for address in remove {
            if state.callers.remove(address) {
                info!(caller = %address, "caller removed");
            }
        }
        Ok(())
    }

    pub async fn is_caller(&self, address: Address) -> bool {
        self.state.lock().await.callers.contains(&address)
    }

    pub async fn lookup(&self, id: RequestId) -> Option<RegistryEntry> {
        self.state.lock().await.registry.lookup(id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.registry.pending_count()
    }

    /// Admit a batch-operation request and expose it to the workers.
    pub async fn submit_compute(
        &self,
        origin: Address,
        request: ComputeRequest,
    ) -> Result<RequestId, RelayError> {
        check_delegation(self.ledger.as_ref(), origin, request.callback_target).await?;
        validate_operations(
            self.ledger.as_ref(),
            &request.ops,
            request.callback_target,
            origin,
        )
        .await?;

        let mut state = self.state.lock().await;
        let id = state.registry.insert_compute(origin, &request);
        drop(state);

        debug!(%id, requester = %origin, ops = request.ops.len(), "compute request admitted");
        let _ = self.events.send(RelayEvent::ComputeRequested {
            id,
            requester: origin,
            callback_target: request.callback_target,
            ops_cursor: request.ops_cursor,
            ops: request.ops,
        });
        Ok(id)
    }

    /// Admit a single-value re-encryption request. Requires proof that
    /// `origin` signed the supplied public key.
    pub async fn submit_reencrypt(
        &self,
        origin: Address,
        request: ReencryptRequest,
    ) -> Result<RequestId, RelayError> {
        check_delegation(self.ledger.as_ref(), origin, request.callback_target).await?;
        validate_reencrypt(self.ledger.as_ref(), &request, origin).await?;

        let mut state = self.state.lock().await;
        let id = state.registry.insert_reencrypt(origin, &request);
        drop(state);

        debug!(%id, requester = %origin, "reencrypt request admitted");
        let _ = self.events.send(RelayEvent::ReencryptRequested {
            id,
            requester: origin,
            target: request.target,
            public_key: request.public_key,
        });
        Ok(id)
    }

    /// Admit a ciphertext-persistence request. The ciphertext bytes go out
    /// with the emitted signal and are dropped by this layer; storage is the
    /// workers' concern.
    pub async fn submit_save_ciphertext(
        &self,
        origin: Address,
        request: SaveCiphertextRequest,
    ) -> Result<RequestId, RelayError> {
        check_delegation(self.ledger.as_ref(), origin, request.callback_target).await?;
        if request.ciphertext.is_empty() {
            return Err(RelayError::MalformedRequest {
                detail: "save_ciphertext requires a non-empty ciphertext".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let id = state.registry.insert_save_ciphertext(origin, &request);
        drop(state);

        debug!(%id, requester = %origin, len = request.ciphertext.len(), "save_ciphertext request admitted");
        let _ = self.events.send(RelayEvent::SaveCiphertextRequested {
            id,
            requester: origin,
            ciphertext: request.ciphertext,
        });
        Ok(id)
    }

    /// Deliver the results of a batch request.
    pub async fn resolve_compute(
        &self,
        caller: Address,
        id: RequestId,
        values: Vec<CapsulatedValue>,
    ) -> Result<(), RelayError> {
        self.resolve(caller, id, CallbackResult::Compute { values })
            .await
    }

    /// Deliver a re-encrypted value.
    pub async fn resolve_reencrypt(
        &self,
        caller: Address,
        id: RequestId,
        data: Vec<u8>,
    ) -> Result<(), RelayError> {
        self.resolve(caller, id, CallbackResult::Reencrypt { data })
            .await
    }

    /// Deliver the handle assigned to a persisted ciphertext.
    pub async fn resolve_save_ciphertext(
        &self,
        caller: Address,
        id: RequestId,
        value: CapsulatedValue,
    ) -> Result<(), RelayError> {
        self.resolve(caller, id, CallbackResult::SaveCiphertext { value })
            .await
    }

    async fn resolve(
        &self,
        caller: Address,
        id: RequestId,
        result: CallbackResult,
    ) -> Result<(), RelayError> {
        // Claim the request under the state lock; the callback itself runs
        // unlocked, with the Dispatching status keeping the claim exclusive.
        let (request, handler) = {
            let mut state = self.state.lock().await;
            if !state.callers.contains(&caller) {
                return Err(RelayError::Unauthorized { caller });
            }
            let Some(request) = state.registry.begin_dispatch(id) else {
                return Err(RelayError::UnknownId { id });
            };
            if !result_matches(&result, &request) {
                state.registry.abort_dispatch(id);
                return Err(RelayError::MalformedRequest {
                    detail: format!(
                        "{} result does not match the request kind of {}",
                        result.kind_name(),
                        id
                    ),
                });
            }
            if let Err(detail) = result.check_handles() {
                state.registry.abort_dispatch(id);
                return Err(RelayError::MalformedRequest { detail });
            }
            let handler = state.handlers.get(&request.callback_target()).cloned();
            (request, handler)
        };

        let target = request.callback_target();
        let outcome = match handler {
            Some(handler) => {
                handler
                    .complete(request.callback_selector(), id, &result)
                    .await
            }
            None => Err(CallbackFailure::new(format!(
                "no callback handler registered for {}",
                target
            ))),
        };

        if let Err(failure) = outcome {
            // Roll the whole resolution back: the request returns to pending
            // and the ledger is untouched.
            self.state.lock().await.registry.abort_dispatch(id);
            warn!(%id, reason = %failure.reason, "callback reverted, resolution rolled back");
            self.emit_resolved(&request, false);
            return Err(RelayError::CallbackReverted {
                reason: failure.reason,
            });
        }

        // Grants are written only after the requester's completion code
        // succeeded, and strictly before the success signal.
        for value in result.encrypted_values() {
            if let Some(handle) = value.handle() {
                self.ledger.set_accessible(target, handle, true).await;
                self.ledger.set_data_type(handle, value.value_type).await;
            }
        }

        self.state.lock().await.registry.finish_dispatch(id);
        info!(%id, caller = %caller, "request resolved");
        self.emit_resolved(&request, true);
        Ok(())
    }

    fn emit_resolved(&self, request: &StoredRequest, success: bool) {
        let event = match request {
            StoredRequest::Compute(r) => RelayEvent::ComputeResolved { id: r.id, success },
            StoredRequest::Reencrypt(r) => RelayEvent::ReencryptResolved { id: r.id, success },
            StoredRequest::SaveCiphertext(r) => RelayEvent::SaveCiphertextResolved {
                id: r.id,
                success,
            },
        };
        let _ = self.events.send(event);
    }
}

fn result_matches(result: &CallbackResult, request: &StoredRequest) -> bool {
    matches!(
        (result, request),
        (CallbackResult::Compute { .. }, StoredRequest::Compute(_))
            | (CallbackResult::Reencrypt { .. }, StoredRequest::Reencrypt(_))
            | (
                CallbackResult::SaveCiphertext { .. },
                StoredRequest::SaveCiphertext(_)
            )
    )
}

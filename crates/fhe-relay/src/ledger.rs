use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{Address, Handle, ValueType};

/// Interface to the capability ledger: the authoritative record of which
/// addresses may access which handles, and who may receive callbacks on
/// whose behalf. The relay consumes this interface; the backing store is an
/// external collaborator. Only the callback dispatcher writes to it.
#[async_trait]
pub trait CapabilityLedger: Send + Sync {
    async fn is_accessible(&self, address: Address, handle: Handle) -> bool;

    async fn set_accessible(&self, address: Address, handle: Handle, allowed: bool);

    async fn set_data_type(&self, handle: Handle, value_type: ValueType);

    /// Whether `owner` has delegated callback authority to `delegate`.
    async fn allowed_callback_addr(&self, owner: Address, delegate: Address) -> bool;
}

#[derive(Debug, Default)]
struct LedgerState {
    access: HashSet<(Address, Handle)>,
    data_types: HashMap<Handle, ValueType>,
    delegations: HashSet<(Address, Address)>,
}

/// In-memory capability ledger backing `relayd` and the test suite.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `address` access to an existing handle and record its type.
    /// Bootstrapping helper for inputs produced outside the callback path.
    pub async fn grant(&self, address: Address, handle: Handle, value_type: ValueType) {
        let mut state = self.state.lock().await;
        state.access.insert((address, handle));
        state.data_types.insert(handle, value_type);
    }

    /// Record that `owner` allows `delegate` to act as its callback target.
    pub async fn delegate(&self, owner: Address, delegate: Address) {
        self.state.lock().await.delegations.insert((owner, delegate));
    }

    pub async fn data_type(&self, handle: Handle) -> Option<ValueType> {
        self.state.lock().await.data_types.get(&handle).copied()
    }

    pub async fn access_count(&self) -> usize {
        self.state.lock().await.access.len()
    }
}

#[async_trait]
impl CapabilityLedger for InMemoryLedger {
    async fn is_accessible(&self, address: Address, handle: Handle) -> bool {
        self.state.lock().await.access.contains(&(address, handle))
    }

    async fn set_accessible(&self, address: Address, handle: Handle, allowed: bool) {
        let mut state = self.state.lock().await;
        if allowed {
            state.access.insert((address, handle));
        } else {
            state.access.remove(&(address, handle));
        }
    }

    async fn set_data_type(&self, handle: Handle, value_type: ValueType) {
        self.state.lock().await.data_types.insert(handle, value_type);
    }

    async fn allowed_callback_addr(&self, owner: Address, delegate: Address) -> bool {
        self.state.lock().await.delegations.contains(&(owner, delegate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_access_grant_and_revoke() {
        let ledger = InMemoryLedger::new();
        let alice = Address([1; 20]);
        let handle = [9u8; 32];

        assert!(!ledger.is_accessible(alice, handle).await);

        ledger.set_accessible(alice, handle, true).await;
        ledger.set_data_type(handle, ValueType::Euint64).await;
        assert!(ledger.is_accessible(alice, handle).await);
        assert_eq!(ledger.data_type(handle).await, Some(ValueType::Euint64));

        ledger.set_accessible(alice, handle, false).await;
        assert!(!ledger.is_accessible(alice, handle).await);
    }

    #[tokio::test]
    async fn test_delegation_is_directed() {
        let ledger = InMemoryLedger::new();
        let alice = Address([1; 20]);
        let bob = Address([2; 20]);

        ledger.delegate(alice, bob).await;
        assert!(ledger.allowed_callback_addr(alice, bob).await);
        assert!(!ledger.allowed_callback_addr(bob, alice).await);
    }
}

//! Shared helpers for the relay integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use libsecp256k1::SecretKey;
use tokio::sync::Mutex;

use fhe_relay::{
    Address, CallbackFailure, CallbackHandler, CallbackResult, ComputeRequest, Handle,
    InMemoryLedger, Operation, RelayConfig, RelayService, RequestId,
};

pub fn address(tag: u8) -> Address {
    Address([tag; 20])
}

pub fn handle(tag: u8) -> Handle {
    [tag; 32]
}

pub fn secret(tag: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[31] = 1;
    SecretKey::parse(&bytes).unwrap()
}

pub fn compute_request(target: Address, ops: Vec<Operation>) -> ComputeRequest {
    ComputeRequest {
        callback_target: target,
        callback_selector: "on_compute".to_string(),
        ops_cursor: 0,
        payload: Vec::new(),
        ops,
    }
}

/// Completion handler that records deliveries and can be switched into a
/// failure mode to exercise rollback.
#[derive(Default)]
pub struct RecordingHandler {
    deliveries: Mutex<Vec<(String, RequestId, CallbackResult)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail_with(&self, reason: &str) {
        *self.failure.lock().await = Some(reason.to_string());
    }

    pub async fn succeed(&self) {
        *self.failure.lock().await = None;
    }

    pub async fn deliveries(&self) -> Vec<(String, RequestId, CallbackResult)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl CallbackHandler for RecordingHandler {
    async fn complete(
        &self,
        selector: &str,
        id: RequestId,
        result: &CallbackResult,
    ) -> Result<(), CallbackFailure> {
        if let Some(reason) = self.failure.lock().await.clone() {
            return Err(CallbackFailure::new(reason));
        }
        self.deliveries
            .lock()
            .await
            .push((selector.to_string(), id, result.clone()));
        Ok(())
    }
}

pub struct TestRelay {
    pub ledger: Arc<InMemoryLedger>,
    pub service: RelayService,
    pub owner: Address,
    pub worker: Address,
}

/// A relay backed by a fresh in-memory ledger, with one authorized worker.
pub async fn setup() -> TestRelay {
    let _ = env_logger::try_init();

    let owner = address(0xaa);
    let worker = address(0xbb);
    let ledger = Arc::new(InMemoryLedger::new());
    let service = RelayService::new(
        RelayConfig {
            owner,
            ..Default::default()
        },
        ledger.clone(),
    );
    service
        .manage_callers(owner, &[worker], &[])
        .await
        .unwrap();

    TestRelay {
        ledger,
        service,
        owner,
        worker,
    }
}

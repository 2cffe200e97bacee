//! Relay daemon hosting the capability-gated request/callback service.
//!
//! This binary wires the relay core to an in-memory capability ledger and
//! logs every signal the service emits. The `demo` subcommand drives a full
//! request/callback round trip against an in-process worker.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use libsecp256k1::SecretKey;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use fhe_relay::signature::{address_of_secret, reencrypt_digest, sign_digest};
use fhe_relay::{
    Address, CallbackFailure, CallbackHandler, CallbackResult, CapabilityLedger, CapsulatedValue,
    ComputeRequest, InMemoryLedger, Opcode, Operation, ReencryptRequest, RelayConfig, RelayEvent,
    RelayService, RequestId, ValueType,
};

/// Command-line arguments for the relay daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Administrative owner address (0x-prefixed hex; a dev address is
    /// derived when omitted)
    #[arg(long)]
    owner: Option<String>,

    /// Hex seed mixed into request id derivation (32 bytes)
    #[arg(long)]
    seed: Option<String>,

    /// Capacity of the event broadcast channel
    #[arg(long, default_value_t = 256)]
    event_capacity: usize,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands for the relay daemon
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted request/callback round trip with an in-process worker
    Demo,
}

/// Completion handler that logs deliveries and always succeeds.
struct LogHandler;

#[async_trait]
impl CallbackHandler for LogHandler {
    async fn complete(
        &self,
        selector: &str,
        id: RequestId,
        result: &CallbackResult,
    ) -> Result<(), CallbackFailure> {
        tracing::info!(%id, selector, kind = result.kind_name(), "callback delivered");
        Ok(())
    }
}

fn parse_seed(seed: &str) -> anyhow::Result<[u8; 32]> {
    let stripped = seed.strip_prefix("0x").unwrap_or(seed);
    let bytes = hex::decode(stripped)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed must be 32 bytes, got {}", bytes.len()))
}

/// Deterministic dev key, one per tag.
fn dev_secret(tag: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[31] = 1;
    SecretKey::parse(&bytes).expect("dev key bytes are a valid secp256k1 scalar")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug,fhe_relay=debug")
    } else {
        EnvFilter::new("info,fhe_relay=info")
    };
    fmt().with_env_filter(filter).init();

    let owner = match &args.owner {
        Some(owner) => Address::from_str(owner)?,
        None => address_of_secret(&dev_secret(1)),
    };
    let instance_seed = match &args.seed {
        Some(seed) => parse_seed(seed)?,
        None => [0u8; 32],
    };

    let config = RelayConfig {
        owner,
        instance_seed,
        event_capacity: args.event_capacity,
    };
    let ledger = Arc::new(InMemoryLedger::new());
    let service = RelayService::new(config, ledger.clone());
    let mut events = service.subscribe();

    match args.command {
        Some(Commands::Demo) => run_demo(&service, &ledger, owner, &mut events).await?,
        None => {
            tracing::info!("relay daemon running. Press Ctrl+C to exit.");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => tracing::info!(?event, "relay event"),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "event subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Scripted round trip: a client submits a compute and a reencrypt request,
/// an in-process worker resolves both, and the resulting grants are shown.
async fn run_demo(
    service: &RelayService,
    ledger: &Arc<InMemoryLedger>,
    owner: Address,
    events: &mut broadcast::Receiver<RelayEvent>,
) -> anyhow::Result<()> {
    let client_key = dev_secret(2);
    let client = address_of_secret(&client_key);
    let worker = address_of_secret(&dev_secret(3));

    service.manage_callers(owner, &[worker], &[]).await?;
    service.register_callback(client, Arc::new(LogHandler)).await;

    // Seed the ledger with an input handle the client already owns.
    let input_handle = [7u8; 32];
    ledger.grant(client, input_handle, ValueType::Euint64).await;

    let compute_id = service
        .submit_compute(
            client,
            ComputeRequest {
                callback_target: client,
                callback_selector: "on_compute".to_string(),
                ops_cursor: 0,
                payload: Vec::new(),
                ops: vec![
                    Operation::new(
                        Opcode::GetEuint64,
                        vec![CapsulatedValue::encrypted(ValueType::Euint64, input_handle)],
                    ),
                    Operation::new(
                        Opcode::Add,
                        vec![
                            CapsulatedValue::encrypted(ValueType::Euint64, input_handle),
                            CapsulatedValue::encrypted(ValueType::Euint64, input_handle),
                        ],
                    ),
                ],
            },
        )
        .await?;
    tracing::info!(%compute_id, "compute request submitted");

    // The worker observes the signal and resolves with a fresh handle.
    let output_handle = [8u8; 32];
    while let Ok(event) = events.recv().await {
        tracing::info!(?event, "relay event");
        if matches!(event, RelayEvent::ComputeRequested { id, .. } if id == compute_id) {
            break;
        }
    }
    service
        .resolve_compute(
            worker,
            compute_id,
            vec![CapsulatedValue::encrypted(ValueType::Euint64, output_handle)],
        )
        .await?;
    tracing::info!(
        granted = ledger.is_accessible(client, output_handle).await,
        "output handle accessible to client"
    );

    // Re-encryption: the client proves it signed the public key.
    let public_key = b"demo reencryption key".to_vec();
    let signature = sign_digest(&reencrypt_digest(&public_key), &client_key).to_vec();
    let reencrypt_id = service
        .submit_reencrypt(
            client,
            ReencryptRequest {
                target: CapsulatedValue::encrypted(ValueType::Euint64, output_handle),
                public_key,
                signature,
                callback_target: client,
                callback_selector: "on_reencrypted".to_string(),
            },
        )
        .await?;
    tracing::info!(%reencrypt_id, "reencrypt request submitted");

    service
        .resolve_reencrypt(worker, reencrypt_id, vec![0xde, 0xad, 0xbe, 0xef])
        .await?;

    while let Ok(event) = events.try_recv() {
        tracing::info!(?event, "relay event");
    }
    tracing::info!("demo complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_defaults() {
        let args = Args::try_parse_from(["relayd"]).unwrap();
        assert!(args.owner.is_none());
        assert_eq!(args.event_capacity, 256);
        assert!(!args.debug);
    }

    #[test]
    fn test_parse_seed() {
        let seed = parse_seed(&format!("0x{}", hex::encode([9u8; 32]))).unwrap();
        assert_eq!(seed, [9u8; 32]);
        assert!(parse_seed("0x1234").is_err());
    }
}

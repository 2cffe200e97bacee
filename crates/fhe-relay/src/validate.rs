//! Admission-time checks: the delegation gate and the per-opcode rules
//! applied before a request is accepted. Every check here is read-only; the
//! first failure rejects the whole request with nothing persisted.

use crate::ledger::CapabilityLedger;
use crate::signature::{recover_signer, reencrypt_digest};
use crate::types::{Address, CapsulatedValue, Opcode, Operation, ReencryptRequest};
use crate::RelayError;

/// Gate applied on every submit entry point, before any capability checks:
/// the callback target must be the requester itself or an address the
/// requester has delegated in the ledger.
pub async fn check_delegation(
    ledger: &dyn CapabilityLedger,
    requester: Address,
    callback_target: Address,
) -> Result<(), RelayError> {
    if requester == callback_target {
        return Ok(());
    }
    if ledger.allowed_callback_addr(requester, callback_target).await {
        return Ok(());
    }
    Err(RelayError::NotDelegated {
        requester,
        delegate: callback_target,
    })
}

/// Per-opcode admission rules for a batch request.
///
/// `get_*` reads resolve pre-existing handles, so the callback target must
/// already hold access to them. `reencrypt` carries a signature over the
/// supplied public key that must recover to the submitting account. Every
/// other opcode is validated later by the workers.
pub async fn validate_operations(
    ledger: &dyn CapabilityLedger,
    ops: &[Operation],
    callback_target: Address,
    origin: Address,
) -> Result<(), RelayError> {
    for op in ops {
        match op.opcode {
            Opcode::GetEbool | Opcode::GetEuint64 | Opcode::GetEaddress => {
                let handle = operand(op, 0)?.handle().ok_or_else(|| {
                    RelayError::MalformedRequest {
                        detail: format!("{} expects an encrypted handle operand", op.opcode),
                    }
                })?;
                if !ledger.is_accessible(callback_target, handle).await {
                    return Err(RelayError::CapabilityDenied { handle });
                }
            }
            Opcode::Reencrypt => {
                let public_key = operand(op, 1)?.payload.clone();
                let signature = operand(op, 2)?.payload.clone();
                let digest = reencrypt_digest(&public_key);
                if recover_signer(&digest, &signature)? != origin {
                    return Err(RelayError::SignatureMismatch);
                }
            }
            // Worker-validated opcodes carry no admission-time checks.
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Not
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Min
            | Opcode::Max
            | Opcode::Select
            | Opcode::Rand
            | Opcode::EncryptBool
            | Opcode::EncryptUint32
            | Opcode::EncryptUint64
            | Opcode::EncryptAddress => {}
        }
    }
    Ok(())
}

/// Admission rules for a single-value re-encryption request: the callback
/// target must hold access to the target handle, and the signature over the
/// public key must recover to the submitting account.
pub async fn validate_reencrypt(
    ledger: &dyn CapabilityLedger,
    request: &ReencryptRequest,
    origin: Address,
) -> Result<(), RelayError> {
    let handle = request
        .target
        .handle()
        .ok_or_else(|| RelayError::MalformedRequest {
            detail: "reencryption target must be an encrypted value".to_string(),
        })?;
    if !ledger.is_accessible(request.callback_target, handle).await {
        return Err(RelayError::CapabilityDenied { handle });
    }
    let digest = reencrypt_digest(&request.public_key);
    if recover_signer(&digest, &request.signature)? != origin {
        return Err(RelayError::SignatureMismatch);
    }
    Ok(())
}

fn operand(op: &Operation, index: usize) -> Result<&CapsulatedValue, RelayError> {
    op.operands
        .get(index)
        .ok_or_else(|| RelayError::MalformedRequest {
            detail: format!("{} is missing operand {}", op.opcode, index),
        })
}

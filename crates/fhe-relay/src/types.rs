use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Opaque reference to an encrypted value held by the workers. Handles are
/// keys into the capability ledger, never the plaintext itself.
pub type Handle = [u8; 32];

/// Account identifier derived from a secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| anyhow!("invalid address hex: {}", e))?;
        let bytes: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("address must be 20 bytes, got {}", stripped.len() / 2))?;
        Ok(Address(bytes))
    }
}

/// Declared type of a capsulated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Ebool,
    Euint32,
    Euint64,
    Eaddress,
    Plain,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ebool => "ebool",
            Self::Euint32 => "euint32",
            Self::Euint64 => "euint64",
            Self::Eaddress => "eaddress",
            Self::Plain => "plain",
        }
    }

    /// True for every kind whose payload doubles as a ledger handle.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed, capability-bearing value. When `value_type` is one of the
/// encrypted kinds the payload is the handle under which the value is
/// tracked in the capability ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsulatedValue {
    pub value_type: ValueType,
    pub payload: Vec<u8>,
}

impl CapsulatedValue {
    pub fn new(value_type: ValueType, payload: Vec<u8>) -> Self {
        Self {
            value_type,
            payload,
        }
    }

    /// Wrap a ledger handle as an encrypted value of the given type.
    pub fn encrypted(value_type: ValueType, handle: Handle) -> Self {
        Self {
            value_type,
            payload: handle.to_vec(),
        }
    }

    pub fn plain(payload: Vec<u8>) -> Self {
        Self {
            value_type: ValueType::Plain,
            payload,
        }
    }

    /// The ledger handle this value resolves to, if it is an encrypted kind
    /// with a well-formed 32-byte payload.
    pub fn handle(&self) -> Option<Handle> {
        if !self.value_type.is_encrypted() {
            return None;
        }
        self.payload.as_slice().try_into().ok()
    }
}

/// Operations the relay accepts. Admission dispatch matches exhaustively on
/// this enum, so a new opcode fails to compile until every site handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    // Arithmetic and logic, executed by the workers
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Not,
    // Comparison and selection
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Min,
    Max,
    Select,
    Rand,
    // Trivial encryption of plaintext operands
    EncryptBool,
    EncryptUint32,
    EncryptUint64,
    EncryptAddress,
    // Capability-gated reads of existing handles
    GetEbool,
    GetEuint64,
    GetEaddress,
    // Re-encryption under a caller-supplied public key
    Reencrypt,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Min => "min",
            Self::Max => "max",
            Self::Select => "select",
            Self::Rand => "rand",
            Self::EncryptBool => "encrypt_bool",
            Self::EncryptUint32 => "encrypt_uint32",
            Self::EncryptUint64 => "encrypt_uint64",
            Self::EncryptAddress => "encrypt_address",
            Self::GetEbool => "get_ebool",
            Self::GetEuint64 => "get_euint64",
            Self::GetEaddress => "get_eaddress",
            Self::Reencrypt => "reencrypt",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a batch request: an opcode with its ordered operands. The
/// opcode decides which operands are handles, plain data, or signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub opcode: Opcode,
    pub operands: Vec<CapsulatedValue>,
}

impl Operation {
    pub fn new(opcode: Opcode, operands: Vec<CapsulatedValue>) -> Self {
        Self { opcode, operands }
    }
}

/// Collision-resistant identifier assigned to every accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A batch-operation request as submitted by a client. The registry fills in
/// the id and the requester address on admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    /// Address whose completion handler receives the result. Either the
    /// requester itself or an address the requester has delegated.
    pub callback_target: Address,
    /// Selector passed through to the completion handler.
    pub callback_selector: String,
    /// Index of the next operation the workers should execute.
    pub ops_cursor: usize,
    /// Opaque requester context echoed back with the stored request.
    pub payload: Vec<u8>,
    pub ops: Vec<Operation>,
}

/// Request to re-encrypt a single value under a caller-supplied public key.
/// The signature proves the submitting account produced it over the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencryptRequest {
    pub target: CapsulatedValue,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub callback_target: Address,
    pub callback_selector: String,
}

/// Request to persist a raw ciphertext on the worker side. The bytes are
/// forwarded to the workers through the emitted signal and then dropped;
/// only a digest and the length persist in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCiphertextRequest {
    pub ciphertext: Vec<u8>,
    pub callback_target: Address,
    pub callback_selector: String,
}

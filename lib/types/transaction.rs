use crate::crypto::{Address, Hash, PrivateKey, PublicKey, Signature};
use crate::util::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Reference to a previous output plus the authorization to spend it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransactionInput {
    pub prev_tx_id: Hash,
    pub prev_output_index: u32,
    pub signature: Signature,
    pub pubkey: PublicKey,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransactionOutput {
    pub amount: Amount,
    pub recipient_address: Address,
}

/// A transfer of value between addresses. Identity is the double-SHA-256
/// of the canonical JSON serialization, so equal transactions hash to the
/// same `tx_id` on every node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Transaction {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        Transaction {
            inputs,
            outputs,
            timestamp: Utc::now(),
        }
    }

    /// The block-subsidy transaction: no inputs, a single output paying the
    /// miner `reward + fees`.
    pub fn coinbase(recipient: Address, amount: Amount, timestamp: DateTime<Utc>) -> Self {
        Transaction {
            inputs: vec![],
            outputs: vec![TransactionOutput {
                amount,
                recipient_address: recipient,
            }],
            timestamp,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Canonical wire form: JSON with sorted keys over
    /// `{inputs: [{output_index, pubkey, signature, tx_id}], outputs:
    /// [{amount, recipient_address}], timestamp}`.
    pub fn canonical_json(&self) -> String {
        json!({
            "inputs": self
                .inputs
                .iter()
                .map(|input| {
                    json!({
                        "tx_id": input.prev_tx_id,
                        "output_index": input.prev_output_index,
                        "signature": input.signature,
                        "pubkey": input.pubkey,
                    })
                })
                .collect::<Vec<_>>(),
            "outputs": self.canonical_outputs(),
            "timestamp": self.timestamp.timestamp(),
        })
        .to_string()
    }

    /// Content hash over the canonical serialization.
    pub fn id(&self) -> Hash {
        Hash::double_sha256(self.canonical_json().as_bytes())
    }

    /// What each input signs: the transaction with signatures and pubkeys
    /// stripped, so the signature cannot cover itself.
    pub fn signing_hash(&self) -> Hash {
        let outpoints: Vec<(Hash, u32)> = self
            .inputs
            .iter()
            .map(|input| (input.prev_tx_id, input.prev_output_index))
            .collect();
        signing_payload_hash(&outpoints, &self.outputs, self.timestamp)
    }

    /// Wire size used for fee-per-byte prioritization.
    pub fn byte_size(&self) -> usize {
        self.canonical_json().len()
    }

    pub fn total_output(&self) -> Option<Amount> {
        Amount::checked_sum(self.outputs.iter().map(|o| o.amount))
    }

    /// True if any output pays `address`.
    pub fn pays(&self, address: &Address) -> bool {
        self.outputs.iter().any(|o| &o.recipient_address == address)
    }

    fn canonical_outputs(&self) -> Vec<serde_json::Value> {
        self.outputs
            .iter()
            .map(|output| {
                json!({
                    "amount": output.amount,
                    "recipient_address": output.recipient_address,
                })
            })
            .collect()
    }
}

fn signing_payload_hash(
    outpoints: &[(Hash, u32)],
    outputs: &[TransactionOutput],
    timestamp: DateTime<Utc>,
) -> Hash {
    let stripped = json!({
        "inputs": outpoints
            .iter()
            .map(|(tx_id, output_index)| {
                json!({
                    "tx_id": tx_id,
                    "output_index": output_index,
                })
            })
            .collect::<Vec<_>>(),
        "outputs": outputs
            .iter()
            .map(|output| {
                json!({
                    "amount": output.amount,
                    "recipient_address": output.recipient_address,
                })
            })
            .collect::<Vec<_>>(),
        "timestamp": timestamp.timestamp(),
    });
    Hash::double_sha256(stripped.to_string().as_bytes())
}

/// Build a fully signed transaction spending the given outpoints with one
/// key. Each input's signature covers the stripped transaction payload
/// (outpoints, outputs, timestamp), so the signature cannot cover itself.
pub fn create_signed(
    outpoints: &[(Hash, u32)],
    outputs: Vec<TransactionOutput>,
    key: &PrivateKey,
) -> Transaction {
    let timestamp = Utc::now();
    let message = signing_payload_hash(outpoints, &outputs, timestamp);
    let inputs = outpoints
        .iter()
        .map(|(tx_id, output_index)| TransactionInput {
            prev_tx_id: *tx_id,
            prev_output_index: *output_index,
            signature: key.sign(&message),
            pubkey: key.public_key(),
        })
        .collect();
    Transaction {
        inputs,
        outputs,
        timestamp,
    }
}

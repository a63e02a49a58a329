use crate::core::types::{Hash256, Transaction};
use super::double_sha256;

/// Marker and flag bytes that precede the witness section in the full encoding.
const WITNESS_MARKER: [u8; 2] = [0x00, 0x01];

/// Canonical encoding WITHOUT witness data.
///
/// version || inputs(outpoint + script_sig + sequence) || outputs(amount + pubkey_hash) || lock_time
pub fn encode_base(tx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + tx.inputs.len() * 48 + tx.outputs.len() * 40);
    buf.extend_from_slice(&tx.version.to_le_bytes());

    buf.extend_from_slice(&(tx.inputs.len() as u32).to_le_bytes());
    for i in &tx.inputs {
        buf.extend_from_slice(&i.previous_output.txid);
        buf.extend_from_slice(&i.previous_output.vout.to_le_bytes());
        buf.extend_from_slice(&(i.script_sig.len() as u32).to_le_bytes());
        buf.extend_from_slice(&i.script_sig);
        buf.extend_from_slice(&i.sequence.to_le_bytes());
    }

    buf.extend_from_slice(&(tx.outputs.len() as u32).to_le_bytes());
    for o in &tx.outputs {
        buf.extend_from_slice(&o.amount.to_le_bytes());
        buf.extend_from_slice(&o.pubkey_hash);
    }

    buf.extend_from_slice(&tx.lock_time.to_le_bytes());
    buf
}

/// Canonical encoding WITH witness data. Identical to [`encode_base`] when no
/// input carries a witness.
pub fn encode_full(tx: &Transaction) -> Vec<u8> {
    let mut buf = encode_base(tx);
    if !tx.has_witness() {
        return buf;
    }

    buf.extend_from_slice(&WITNESS_MARKER);
    for i in &tx.inputs {
        buf.extend_from_slice(&(i.witness.len() as u32).to_le_bytes());
        for item in &i.witness {
            buf.extend_from_slice(&(item.len() as u32).to_le_bytes());
            buf.extend_from_slice(item);
        }
    }
    buf
}

/// Transaction id: excludes witness data so it is stable under witness changes.
pub fn txid(tx: &Transaction) -> Hash256 {
    double_sha256(&encode_base(tx))
}

/// Witness transaction id: commits to the witness as well.
pub fn wtxid(tx: &Transaction) -> Hash256 {
    double_sha256(&encode_full(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OutPoint, TxInput, TxOutput};

    fn spend(witness: Vec<Vec<u8>>) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: [9u8; 32], vout: 1 },
                script_sig: vec![],
                witness,
                sequence: 0xFFFF_FFFE,
            }],
            outputs: vec![TxOutput { amount: 1_000, pubkey_hash: [3u8; 32] }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_txid_ignores_witness() {
        let a = spend(vec![vec![1u8; 72]]);
        let b = spend(vec![vec![2u8; 64], vec![3u8; 33]]);
        assert_eq!(txid(&a), txid(&b));
        assert_ne!(wtxid(&a), wtxid(&b));
    }

    #[test]
    fn test_full_equals_base_without_witness() {
        let tx = spend(vec![]);
        assert_eq!(encode_base(&tx), encode_full(&tx));
        assert_eq!(txid(&tx), wtxid(&tx));
    }

    #[test]
    fn test_full_encoding_length() {
        let tx = spend(vec![vec![0u8; 10]]);
        // marker(2) + item count(4) + item len(4) + item(10)
        assert_eq!(encode_full(&tx).len(), encode_base(&tx).len() + 2 + 4 + 4 + 10);
    }
}

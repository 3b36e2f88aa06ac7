// UTXO transaction model. A transaction consumes previously created outputs
// and creates new ones; every input is signed against a per-input message
// that binds it to the one prior output it spends.

use crate::error::{LedgerError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{decode_pub_key_hash, hash_pub_key, validate_address, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Amount minted by every coinbase transaction.
pub const SUBSIDY: u64 = 100;

/// Output index carried by the coinbase input; it references nothing.
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// A reference to one prior output being spent, plus the signature and
/// public key that unlock it.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// The referenced output index as a usable array index. Errors on the
    /// coinbase sentinel and any other negative value.
    pub fn output_index(&self) -> Result<usize> {
        usize::try_from(self.vout).map_err(|_| {
            LedgerError::Transaction(format!("Invalid output index: {}", self.vout))
        })
    }
}

/// Value locked to a recipient's public-key hash; spendable only by an input
/// whose public key hashes to the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(LedgerError::Transaction(
                "Output value must be positive".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: decode_pub_key_hash(address)?,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A transfer of value: inputs spending prior outputs, outputs locking the
/// value to new recipients. Immutable once signed.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// The mint transaction for a newly produced block. The memo rides in the
    /// input's pub_key field and is never checked as a signature; an empty
    /// memo defaults to a note naming the recipient.
    pub fn new_coinbase_tx(to: &str, memo: &str) -> Result<Transaction> {
        let memo = if memo.is_empty() {
            format!("Coins to {to}")
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_OUTPUT_INDEX,
            signature: vec![],
            pub_key: memo.into_bytes(),
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build and sign a spend of `amount` from `wallet` to `to`, selecting
    /// inputs greedily from the UTXO index and returning any change to the
    /// sender.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(to) {
            return Err(LedgerError::InvalidAddress(to.to_string()));
        }

        let from = wallet.get_address();
        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(pub_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| LedgerError::Transaction(format!("Invalid transaction id: {e}")))?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out as i64,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// True iff this is a mint: exactly one input, empty prior id, and the
    /// reserved output index.
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1
            && self.vin[0].txid.is_empty()
            && self.vin[0].vout == COINBASE_OUTPUT_INDEX
    }

    /// The canonical "what gets signed" view: every input's signature and
    /// public key cleared.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();

        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Sign every input against its own per-input message. Each message is
    /// the trimmed copy's id with that input's pub_key field temporarily set
    /// to the referenced output's pub_key_hash, so the signature binds the
    /// input to exactly that prior output.
    pub fn sign(
        &mut self,
        pkcs8: &[u8],
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.vin {
            let txid_hex = HEXLOWER.encode(input.get_txid());
            if !prev_txs.contains_key(txid_hex.as_str()) {
                return Err(LedgerError::MissingPriorTransaction(txid_hex));
            }
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            let prev_tx = prev_txs
                .get(txid_hex.as_str())
                .ok_or(LedgerError::MissingPriorTransaction(txid_hex))?;
            let prev_out = prev_tx
                .vout
                .get(vin.output_index()?)
                .ok_or_else(|| {
                    LedgerError::Transaction(format!("Invalid output index: {}", vin.vout))
                })?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            // Clear again so the next input's message is not contaminated.
            tx_copy.vin[idx].pub_key = vec![];

            vin.signature = ecdsa_p256_sha256_sign_digest(pkcs8, tx_copy.id.as_slice())?;
        }
        Ok(())
    }

    /// Check every input's signature against the same per-input message used
    /// by `sign`. Coinbase transactions verify unconditionally. A missing
    /// prior transaction is an error; a failed signature is `Ok(false)`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            let prev_tx = prev_txs
                .get(txid_hex.as_str())
                .ok_or(LedgerError::MissingPriorTransaction(txid_hex))?;
            let prev_out = prev_tx
                .vout
                .get(vin.output_index()?)
                .ok_or_else(|| {
                    LedgerError::Transaction(format!("Invalid output index: {}", vin.vout))
                })?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_out.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                tx_copy.id.as_slice(),
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Hash of the transaction with the id field zeroed during hashing, so
    /// the id never hashes itself.
    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Corrupt one input's stored bytes. Test-only hook for signature
    /// tamper checks.
    #[cfg(test)]
    pub(crate) fn flip_signature_bit(&mut self, input_index: usize) {
        self.vin[input_index].signature[0] ^= 0x01;
    }

    #[cfg(test)]
    pub(crate) fn flip_pub_key_bit(&mut self, input_index: usize) {
        self.vin[input_index].pub_key[0] ^= 0x01;
    }

    /// Replace the inputs with a single bare reference to `txid:vout`.
    /// Test-only hook for exercising spend-conflict detection.
    #[cfg(test)]
    pub(crate) fn set_test_input(&mut self, txid: Vec<u8>, vout: i64) {
        self.vin = vec![TXInput::new(txid.as_slice(), vout)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> String {
        Wallet::new().unwrap().get_address()
    }

    #[test]
    fn test_coinbase_structure() {
        let tx = Transaction::new_coinbase_tx(&test_address(), "genesis memo").unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin().len(), 1);
        assert_eq!(tx.get_vin()[0].get_vout(), COINBASE_OUTPUT_INDEX);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(tx.get_vout().len(), 1);
        assert_eq!(tx.get_vout()[0].get_value(), SUBSIDY);
        assert_eq!(tx.get_vin()[0].get_pub_key(), b"genesis memo");
    }

    #[test]
    fn test_coinbase_default_memo() {
        let address = test_address();
        let tx = Transaction::new_coinbase_tx(&address, "").unwrap();
        let expected = format!("Coins to {address}");
        assert_eq!(tx.get_vin()[0].get_pub_key(), expected.as_bytes());
    }

    #[test]
    fn test_coinbase_always_verifies() {
        let tx = Transaction::new_coinbase_tx(&test_address(), "").unwrap();
        assert!(tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_id_excludes_itself() {
        let tx = Transaction::new_coinbase_tx(&test_address(), "memo").unwrap();
        // Recomputing the hash over the id-cleared view reproduces the id.
        assert_eq!(tx.hash().unwrap(), tx.get_id());
    }

    #[test]
    fn test_trimmed_copy_clears_unlock_fields() {
        let mut tx = Transaction::new_coinbase_tx(&test_address(), "memo").unwrap();
        tx.vin[0].signature = vec![1, 2, 3];

        let trimmed = tx.trimmed_copy();
        assert!(trimmed.vin[0].get_signature().is_empty());
        assert!(trimmed.vin[0].get_pub_key().is_empty());
        assert_eq!(trimmed.get_id(), tx.get_id());
        assert_eq!(trimmed.vout.len(), tx.vout.len());
    }

    #[test]
    fn test_verify_missing_prior_tx() {
        let address = test_address();
        let mut tx = Transaction::new_coinbase_tx(&address, "").unwrap();
        // Turn the coinbase into a fake spend referencing an unknown tx.
        tx.vin[0].txid = vec![0xAB; 32];
        tx.vin[0].vout = 0;

        let result = tx.verify(&HashMap::new());
        assert!(matches!(
            result,
            Err(LedgerError::MissingPriorTransaction(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let tx = Transaction::new_coinbase_tx(&test_address(), "round trip").unwrap();
        let bytes = tx.serialize().unwrap();
        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(decoded.get_id(), tx.get_id());
        assert_eq!(decoded.get_vout()[0].get_value(), SUBSIDY);
    }
}

use crate::error::{LedgerError, Result};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// An in-memory ECDSA P-256 key pair.
///
/// Address derivation: public key -> SHA-256 -> RIPEMD-160 -> version byte +
/// hash + 4-byte checksum -> base58 text.
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| {
                    LedgerError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
                })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(hash_pub_key(self.public_key.as_slice()).as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// SHA-256 then RIPEMD-160 over the raw public key bytes; 20-byte result.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = crate::utils::sha256_digest(pub_key);
    crate::utils::ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = crate::utils::sha256_digest(payload);
    let second_sha = crate::utils::sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Render a public-key hash as checksummed base58 address text.
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let check = checksum(payload.as_slice());
    payload.extend(check.as_slice());
    crate::utils::base58_encode(payload.as_slice())
}

pub fn validate_address(address: &str) -> bool {
    let payload = match crate::utils::base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let actual_checksum = &payload[payload.len() - ADDRESS_CHECK_SUM_LEN..];
    let target_checksum = checksum(&payload[..payload.len() - ADDRESS_CHECK_SUM_LEN]);
    actual_checksum.eq(target_checksum.as_slice())
}

/// Extract the public-key hash from checksummed address text. Fails when the
/// checksum does not match or the payload is too short.
pub fn decode_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(LedgerError::InvalidAddress(address.to_string()));
    }
    let payload = crate::utils::base58_decode(address)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));

        let decoded = decode_pub_key_hash(&address).unwrap();
        assert_eq!(decoded, hash_pub_key(wallet.get_public_key()));
        assert_eq!(decoded.len(), 20);
    }

    #[test]
    fn test_tampered_address_fails_checksum() {
        let wallet = Wallet::new().unwrap();
        let mut address = wallet.get_address();
        // Swap the first character for a different base58 digit.
        let replacement = if address.starts_with('2') { '3' } else { '2' };
        address.replace_range(0..1, &replacement.to_string());
        assert!(!validate_address(&address));
        assert!(decode_pub_key_hash(&address).is_err());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("abc"));
    }
}

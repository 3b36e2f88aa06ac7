use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree committing to an ordered list of byte strings.
///
/// Leaves are the SHA-256 digests of the input entries; each parent is the
/// SHA-256 of its children's digests concatenated left-to-right. A level with
/// an odd node count duplicates its last node, so a single-entry tree is the
/// duplicated pair of that entry's digest. The commitment is order-sensitive:
/// permuting the inputs changes the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root_hash: Vec<u8>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build the tree over the ordered entries (one per transaction
    /// serialization). Empty input is rejected; blocks always carry at least
    /// one transaction.
    pub fn new(items: &[Vec<u8>]) -> Result<MerkleTree> {
        if items.is_empty() {
            return Err(LedgerError::InvalidBlock(
                "Cannot build a Merkle tree from an empty list".to_string(),
            ));
        }

        let mut level: Vec<Vec<u8>> = items.iter().map(|item| sha256_digest(item)).collect();

        while level.len() > 1 {
            if level.len() % 2 != 0 {
                let last = level
                    .last()
                    .cloned()
                    .expect("non-empty level always has a last node");
                level.push(last);
            }

            let mut next_level = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                next_level.push(hash_pair(&pair[0], &pair[1]));
            }
            level = next_level;
        }

        let root_hash = if items.len() == 1 {
            // A single entry still forms a duplicated pair.
            hash_pair(&level[0], &level[0])
        } else {
            level.into_iter().next().expect("fold leaves one root")
        };

        Ok(MerkleTree {
            root_hash,
            leaf_count: items.len(),
        })
    }

    /// The 32-byte root digest.
    pub fn get_root_hash(&self) -> &[u8] {
        self.root_hash.as_slice()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }
}

/// Convenience for callers that only need the root.
pub fn calculate_merkle_root(items: &[Vec<u8>]) -> Result<Vec<u8>> {
    Ok(MerkleTree::new(items)?.root_hash)
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(left.len() + right.len());
    combined.extend_from_slice(left);
    combined.extend_from_slice(right);
    sha256_digest(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_is_rejected() {
        let items: Vec<Vec<u8>> = vec![];
        assert!(MerkleTree::new(&items).is_err());
    }

    #[test]
    fn test_root_is_deterministic() {
        let items = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
        let a = calculate_merkle_root(&items).unwrap();
        let b = calculate_merkle_root(&items).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_root_is_order_sensitive() {
        let items = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let swapped = vec![vec![4, 5, 6], vec![1, 2, 3]];
        assert_ne!(
            calculate_merkle_root(&items).unwrap(),
            calculate_merkle_root(&swapped).unwrap()
        );
    }

    #[test]
    fn test_single_entry_is_duplicated_pair() {
        let entry = vec![9u8; 64];
        let root = calculate_merkle_root(&[entry.clone()]).unwrap();

        let leaf = sha256_digest(&entry);
        let expected = hash_pair(&leaf, &leaf);
        assert_eq!(root, expected);
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        // Three entries behave like four with the last entry repeated.
        let items = vec![vec![1u8], vec![2u8], vec![3u8]];
        let padded = vec![vec![1u8], vec![2u8], vec![3u8], vec![3u8]];
        assert_eq!(
            calculate_merkle_root(&items).unwrap(),
            calculate_merkle_root(&padded).unwrap()
        );
    }

    #[test]
    fn test_leaf_count() {
        let items = vec![vec![1u8], vec![2u8], vec![3u8]];
        let tree = MerkleTree::new(&items).unwrap();
        assert_eq!(tree.leaf_count(), 3);
    }
}

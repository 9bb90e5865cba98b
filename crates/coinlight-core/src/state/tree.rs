use crate::state::proof::{inner_hash, leaf_hash};
use crate::types::state::{InclusionPath, Proof};
use std::collections::BTreeMap;

/// Hash used for padding leaves and for the root of an empty tree.
pub const EMPTY_LEAF: [u8; 32] = [0u8; 32];

/// A binary Merkle tree over key-ordered (key, value) pairs.
///
/// Leaves are sorted by key and padded with [`EMPTY_LEAF`] up to the next
/// power of two. This is the tree proof producers build; the light client
/// itself only ever folds paths (see [`crate::state::proof::compute_root`]).
#[derive(Clone, Debug, Default)]
pub struct StateTree {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> [u8; 32] {
        let layers = self.layers();
        layers[layers.len() - 1][0]
    }

    /// Build an inclusion proof for `key`, labelled with `height`.
    /// Returns None if the key is not in the tree.
    pub fn prove(&self, key: &[u8], height: u64) -> Option<Proof> {
        let (position, (key, value)) = self
            .entries
            .iter()
            .enumerate()
            .find(|(_, (k, _))| k.as_slice() == key)?;

        let layers = self.layers();
        let mut index = position;
        let mut siblings = Vec::with_capacity(layers.len() - 1);
        for layer in &layers[..layers.len() - 1] {
            siblings.push(layer[index ^ 1]);
            index >>= 1;
        }

        Some(Proof {
            key: key.clone(),
            value: value.clone(),
            height,
            path: InclusionPath {
                leaf_index: position as u64,
                siblings,
            },
        })
    }

    /// All layers from the leaves (first) to the root (last, one element).
    fn layers(&self) -> Vec<Vec<[u8; 32]>> {
        let mut level: Vec<[u8; 32]> = self
            .entries
            .iter()
            .map(|(k, v)| leaf_hash(k, v))
            .collect();

        if level.is_empty() {
            return vec![vec![EMPTY_LEAF]];
        }

        let width = level.len().next_power_of_two();
        level.resize(width, EMPTY_LEAF);

        let mut layers = vec![level];
        while layers[layers.len() - 1].len() > 1 {
            let next = layers[layers.len() - 1]
                .chunks(2)
                .map(|pair| inner_hash(&pair[0], &pair[1]))
                .collect();
            layers.push(next);
        }
        layers
    }
}

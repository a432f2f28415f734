use crate::engine_api::{Hash256, PayloadId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

pub type Slot = u64;

/// Payload ids of builds started by forkchoice updates, keyed by `(slot, parent_block_root)`.
///
/// Slots are kept in order so that everything below a watermark can be dropped in one call.
#[derive(Default)]
pub struct PayloadIdCache {
    slots: RwLock<BTreeMap<Slot, HashMap<Hash256, PayloadId>>>,
}

impl PayloadIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `payload_id`, replacing any id already stored under the same key.
    pub fn set(&self, slot: Slot, parent_block_root: Hash256, payload_id: PayloadId) {
        self.slots
            .write()
            .entry(slot)
            .or_default()
            .insert(parent_block_root, payload_id);
    }

    pub fn get(&self, slot: Slot, parent_block_root: &Hash256) -> Option<PayloadId> {
        self.slots
            .read()
            .get(&slot)
            .and_then(|roots| roots.get(parent_block_root))
            .copied()
    }

    /// Remove every entry whose slot is strictly below `slot`.
    pub fn prune_prior(&self, slot: Slot) {
        let mut slots = self.slots.write();
        let retained = slots.split_off(&slot);
        *slots = retained;
    }

    pub fn len(&self) -> usize {
        self.slots.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

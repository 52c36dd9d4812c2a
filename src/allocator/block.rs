//! Block bookkeeping for the caching allocator
//!
//! A [`Block`] describes one contiguous region of device memory: its owning
//! device and stream, byte size and address, whether it is currently handed
//! out, and its physically adjacent siblings from earlier splits. Blocks
//! live in a [`BlockStore`] arena and refer to each other by [`BlockId`]
//! instead of raw pointers, so sibling links stay valid however the arena
//! grows.

use crate::backend::{DeviceId, StreamId};

/// Index of a block within the [`BlockStore`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(usize);

/// One contiguous region of device memory
///
/// `prev`/`next` describe physical adjacency: if `a.next == Some(b)` then
/// block `b` starts exactly where `a` ends, both share the same device and
/// stream, and both descend from the same primitive allocation. A block
/// with neither link is a root: the exact region once returned by the
/// primitive allocator, and the only kind that may be handed back to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    /// Owning GPU
    pub device: DeviceId,
    /// Stream this block was first used on
    pub stream: StreamId,
    /// Block size in bytes
    pub size: usize,
    /// Byte address of the region start
    pub addr: usize,
    /// In-use flag
    pub allocated: bool,
    /// Previous block if split from a larger allocation
    pub prev: Option<BlockId>,
    /// Next block if split from a larger allocation
    pub next: Option<BlockId>,
}

impl Block {
    pub fn new(device: DeviceId, stream: StreamId, size: usize, addr: usize) -> Self {
        Block {
            device,
            stream,
            size,
            addr,
            allocated: false,
            prev: None,
            next: None,
        }
    }

    /// Whether this block is the exact region returned by the primitive
    /// allocator (no live siblings on either side).
    pub fn is_root(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }

    /// The free-pool ordering key for this block
    pub fn key(&self) -> BlockKey {
        BlockKey {
            device: self.device,
            stream: self.stream,
            size: self.size,
            addr: self.addr,
        }
    }
}

/// Composite free-pool ordering key
///
/// Derived `Ord` compares fields in declaration order, so pool iteration
/// runs device-major, then stream, then size, then address. A lower-bound
/// probe at `(device, stream, wanted_size, 0)` therefore lands on the
/// smallest block of at least `wanted_size` owned by that exact
/// (device, stream) pair, or on an entry for some other pair, which the
/// caller rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BlockKey {
    pub device: DeviceId,
    pub stream: StreamId,
    pub size: usize,
    pub addr: usize,
}

impl BlockKey {
    /// Smallest key for `device`: the lower bound of its pool range
    pub fn device_floor(device: DeviceId) -> Self {
        BlockKey {
            device,
            stream: StreamId::DEFAULT,
            size: 0,
            addr: 0,
        }
    }

    /// Lower-bound probe for a (device, stream, size) request
    pub fn search(device: DeviceId, stream: StreamId, size: usize) -> Self {
        BlockKey {
            device,
            stream,
            size,
            addr: 0,
        }
    }
}

/// Arena of blocks addressed by [`BlockId`]
///
/// Removed slots are recycled through a free list. Ids are purely internal:
/// the engine only ever holds ids it received from `insert` and drops them
/// on `remove`, so a slot's stale content is never observed.
#[derive(Debug, Default)]
pub(crate) struct BlockStore {
    slots: Vec<Block>,
    free_ids: Vec<BlockId>,
}

impl BlockStore {
    pub fn insert(&mut self, block: Block) -> BlockId {
        match self.free_ids.pop() {
            Some(id) => {
                self.slots[id.0] = block;
                id
            }
            None => {
                self.slots.push(block);
                BlockId(self.slots.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, id: BlockId) -> Block {
        self.free_ids.push(id);
        self.slots[id.0]
    }

    pub fn get(&self, id: BlockId) -> &Block {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.slots[id.0]
    }

    /// Number of live blocks
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(device: DeviceId, stream: usize, size: usize, addr: usize) -> BlockKey {
        BlockKey {
            device,
            stream: StreamId::from_raw(stream as *mut std::ffi::c_void),
            size,
            addr,
        }
    }

    #[test]
    fn test_key_orders_device_major() {
        assert!(key(0, 9, 4096, 0x9000) < key(1, 1, 512, 0x1000));
    }

    #[test]
    fn test_key_orders_stream_before_size() {
        assert!(key(0, 1, 4096, 0x9000) < key(0, 2, 512, 0x1000));
    }

    #[test]
    fn test_key_orders_size_before_address() {
        assert!(key(0, 1, 512, 0x9000) < key(0, 1, 1024, 0x1000));
    }

    #[test]
    fn test_key_ties_break_by_address() {
        assert!(key(0, 1, 512, 0x1000) < key(0, 1, 512, 0x2000));
    }

    #[test]
    fn test_search_key_is_floor_of_matching_entries() {
        let probe = BlockKey::search(0, StreamId::DEFAULT, 512);
        // Any real entry for the same (device, stream, size) sorts at or
        // after the probe; smaller sizes sort before it.
        assert!(probe <= key(0, 0, 512, 0x1000));
        assert!(key(0, 0, 511, 0xffff_ffff) < probe);
    }

    #[test]
    fn test_device_floor_bounds_device_range() {
        let floor = BlockKey::device_floor(1);
        assert!(key(0, usize::MAX, usize::MAX, usize::MAX) < floor);
        assert!(floor <= key(1, 0, 0, 0));
        assert!(key(1, 3, 512, 0x1000) < BlockKey::device_floor(2));
    }

    #[test]
    fn test_store_insert_remove_recycles_slots() {
        let mut store = BlockStore::default();
        let a = store.insert(Block::new(0, StreamId::DEFAULT, 512, 0x1000));
        let b = store.insert(Block::new(0, StreamId::DEFAULT, 1024, 0x2000));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).size, 512);

        let removed = store.remove(a);
        assert_eq!(removed.addr, 0x1000);
        assert_eq!(store.len(), 1);

        // The freed slot is reused for the next insert.
        let c = store.insert(Block::new(0, StreamId::DEFAULT, 2048, 0x3000));
        assert_eq!(c, a);
        assert_eq!(store.get(c).size, 2048);
        assert_eq!(store.get(b).size, 1024);
    }

    #[test]
    fn test_new_block_is_free_root() {
        let block = Block::new(0, StreamId::DEFAULT, 512, 0x1000);
        assert!(!block.allocated);
        assert!(block.is_root());
    }
}

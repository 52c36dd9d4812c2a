//! Stream-aware caching allocator engine
//!
//! Allocations are associated with a stream. Once freed, blocks can be
//! re-allocated on the same stream, but not on any other stream. The engine
//! finds the smallest cached block that fits the request; a larger block
//! may be split, and a miss delegates to the primitive runtime allocator.
//! If the primitive allocation runs out of memory, every cached block that
//! is not split is returned to the runtime and the allocation is retried
//! once.
//!
//! Large (>1 MiB) and small requests are handled separately. A large
//! request can be filled by a primitive allocation of the exact rounded
//! size; a small request allocates and splits a 1 MiB region, so later
//! small requests on the same (device, stream) are served from the
//! leftover.
//!
//! Allocations and frees are "usages" of a memory region on its stream,
//! just like kernel launches: the stream's own ordering makes same-stream
//! reuse safe without host-side synchronization, and the engine never
//! reissues a region on a different stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::allocator::block::{Block, BlockId, BlockKey, BlockStore};
use crate::backend::{DeviceId, DevicePtr, DeviceRuntime, HipError, HipResult, StreamId};

/// Round up small allocations to 512 bytes
pub const ROUND_SMALL: usize = 512;

/// Round up large allocations to 128 KiB
pub const ROUND_LARGE: usize = 131072;

/// Largest "small" allocation is 1 MiB; also the primitive allocation size
/// backing every small-class miss
pub const SMALL_ALLOC: usize = 1048576;

/// Point-in-time view of the engine's bookkeeping
///
/// Computed by walking the pools on request; the engine keeps no running
/// usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached free blocks in the small pool
    pub small_blocks: usize,
    /// Cached free blocks in the large pool
    pub large_blocks: usize,
    /// Total bytes held in both free pools
    pub cached_bytes: usize,
    /// Blocks currently handed out to clients
    pub allocated_blocks: usize,
}

/// Caching allocator over a primitive device runtime
///
/// One instance serves every device and stream in the process. All three
/// operations serialize on a single internal mutex held for the full call;
/// the only blocking points inside are the primitive runtime calls.
pub struct CachingAllocator<R> {
    runtime: R,
    state: Mutex<AllocatorState>,
}

#[derive(Default)]
struct AllocatorState {
    blocks: BlockStore,
    /// Cached free blocks 1 MiB or smaller, ordered by (device, stream, size, addr)
    small_blocks: BTreeMap<BlockKey, BlockId>,
    /// Cached free blocks larger than 1 MiB, same order
    large_blocks: BTreeMap<BlockKey, BlockId>,
    /// Live client blocks by device address
    allocated_blocks: HashMap<usize, BlockId>,
}

fn round_size(size: usize) -> usize {
    if size < ROUND_SMALL {
        ROUND_SMALL
    } else if size < SMALL_ALLOC {
        size + ROUND_SMALL - 1 - (size - 1) % ROUND_SMALL
    } else {
        size + ROUND_LARGE - 1 - (size - 1) % ROUND_LARGE
    }
}

impl<R: DeviceRuntime> CachingAllocator<R> {
    pub fn new(runtime: R) -> Self {
        CachingAllocator {
            runtime,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// The underlying device runtime
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Allocate a block which is safe to use from the provided stream.
    ///
    /// A zero-byte request succeeds with the null pointer and touches
    /// neither the pools nor the runtime. All runtime failures (device
    /// query, primitive allocation after the out-of-memory retry) are
    /// returned unchanged.
    pub fn allocate(&self, nbytes: usize, stream: StreamId) -> HipResult<DevicePtr> {
        let mut state = self.state.lock()?;
        if nbytes == 0 {
            return Ok(DevicePtr::NULL);
        }

        let device = self.runtime.current_device()?;
        let size = round_size(nbytes);
        let small = size <= SMALL_ALLOC;

        let block_id = match state.take_best_fit(device, stream, size, small) {
            Some(id) => {
                tracing::trace!(
                    "cache hit: {} bytes (rounded {}) on device {} stream {:?}",
                    nbytes,
                    size,
                    device,
                    stream
                );
                id
            }
            None => {
                let alloc_size = if small { SMALL_ALLOC } else { size };
                let ptr = self.alloc_with_retry(&mut state, device, alloc_size)?;
                tracing::debug!(
                    "cache miss: allocated {} bytes at {:#x} on device {} stream {:?}",
                    alloc_size,
                    ptr.addr(),
                    device,
                    stream
                );
                state
                    .blocks
                    .insert(Block::new(device, stream, alloc_size, ptr.addr()))
            }
        };

        // Split off the tail when the leftover is worth caching. The large
        // class keeps leftovers up to a full small allocation attached to
        // the block instead of splitting them away.
        let remainder_floor = if small { ROUND_SMALL } else { SMALL_ALLOC + 1 };
        let block_id = if state.blocks.get(block_id).size - size >= remainder_floor {
            state.split_front(block_id, size, small)
        } else {
            block_id
        };

        let block = state.blocks.get_mut(block_id);
        block.allocated = true;
        let addr = block.addr;
        state.allocated_blocks.insert(addr, block_id);

        Ok(DevicePtr::from_addr(addr))
    }

    /// Return a block to the cache.
    ///
    /// The block is merged with any free physically-adjacent sibling and
    /// the survivor is inserted into the pool matching its merged size.
    /// Freeing the null pointer is a no-op; freeing an address that is not
    /// currently allocated (including a second free of the same address)
    /// reports an invalid device pointer and changes nothing.
    pub fn deallocate(&self, ptr: DevicePtr) -> HipResult<()> {
        let mut state = self.state.lock()?;
        if ptr.is_null() {
            return Ok(());
        }

        let block_id = state
            .allocated_blocks
            .remove(&ptr.addr())
            .ok_or(HipError::InvalidDevicePointer { addr: ptr.addr() })?;

        let prev = state.blocks.get(block_id).prev;
        state.try_merge(block_id, prev);
        let next = state.blocks.get(block_id).next;
        state.try_merge(block_id, next);

        let block = state.blocks.get_mut(block_id);
        block.allocated = false;
        let key = block.key();
        let small = block.size <= SMALL_ALLOC;
        tracing::trace!(
            "cached {} bytes at {:#x} on device {} stream {:?}",
            key.size,
            key.addr,
            key.device,
            key.stream
        );
        state.pool_mut(small).insert(key, block_id);

        Ok(())
    }

    /// Return every cached root block to the runtime, on every device.
    ///
    /// Blocks with a live sibling (allocated or not) stay cached; they
    /// become returnable once coalescing rejoins them into a root. On a
    /// runtime free failure the error is returned and blocks already freed
    /// stay freed.
    pub fn empty_cache(&self) -> HipResult<()> {
        let mut state = self.state.lock()?;
        self.release_cached(&mut state, false, None)?;
        self.release_cached(&mut state, true, None)?;
        Ok(())
    }

    /// Snapshot of pool and allocation counts
    pub fn cache_stats(&self) -> HipResult<CacheStats> {
        let state = self.state.lock()?;
        let cached_bytes = state
            .small_blocks
            .keys()
            .chain(state.large_blocks.keys())
            .map(|key| key.size)
            .sum();
        Ok(CacheStats {
            small_blocks: state.small_blocks.len(),
            large_blocks: state.large_blocks.len(),
            cached_bytes,
            allocated_blocks: state.allocated_blocks.len(),
        })
    }

    /// Primitive allocation with a single out-of-memory retry.
    ///
    /// On an out-of-memory failure the runtime's sticky error state is
    /// cleared, every cached root block on the device is returned to the
    /// runtime, and the allocation is retried once.
    fn alloc_with_retry(
        &self,
        state: &mut AllocatorState,
        device: DeviceId,
        nbytes: usize,
    ) -> HipResult<DevicePtr> {
        match self.runtime.alloc(device, nbytes) {
            Ok(ptr) => Ok(ptr),
            Err(err) if err.is_out_of_memory() => {
                tracing::debug!(
                    "allocation of {} bytes on device {} failed, freeing cached blocks and retrying",
                    nbytes,
                    device
                );
                self.runtime.clear_last_error();
                self.free_cached_blocks(state, device)?;
                self.runtime.alloc(device, nbytes)
            }
            Err(err) => Err(err),
        }
    }

    /// Return all cached root blocks on one device to the runtime
    fn free_cached_blocks(&self, state: &mut AllocatorState, device: DeviceId) -> HipResult<()> {
        self.release_cached(state, false, Some(device))?;
        self.release_cached(state, true, Some(device))
    }

    /// Free the root blocks of one pool, optionally restricted to a device
    fn release_cached(
        &self,
        state: &mut AllocatorState,
        small: bool,
        device: Option<DeviceId>,
    ) -> HipResult<()> {
        let roots: Vec<(BlockKey, BlockId)> = {
            let pool = state.pool(small);
            let iter = match device {
                Some(d) => pool.range(BlockKey::device_floor(d)..BlockKey::device_floor(d + 1)),
                None => pool.range(..),
            };
            iter.filter(|(_, id)| state.blocks.get(**id).is_root())
                .map(|(key, id)| (*key, *id))
                .collect()
        };

        for (key, block_id) in roots {
            self.runtime.free(DevicePtr::from_addr(key.addr))?;
            tracing::trace!(
                "released {} bytes at {:#x} on device {} to the runtime",
                key.size,
                key.addr,
                key.device
            );
            state.pool_mut(small).remove(&key);
            state.blocks.remove(block_id);
        }
        Ok(())
    }
}

impl AllocatorState {
    fn pool(&self, small: bool) -> &BTreeMap<BlockKey, BlockId> {
        if small {
            &self.small_blocks
        } else {
            &self.large_blocks
        }
    }

    fn pool_mut(&mut self, small: bool) -> &mut BTreeMap<BlockKey, BlockId> {
        if small {
            &mut self.small_blocks
        } else {
            &mut self.large_blocks
        }
    }

    /// Remove and return the smallest cached block of at least `size`
    /// bytes owned by exactly (`device`, `stream`), if one is cached.
    fn take_best_fit(
        &mut self,
        device: DeviceId,
        stream: StreamId,
        size: usize,
        small: bool,
    ) -> Option<BlockId> {
        let found = self
            .pool(small)
            .range(BlockKey::search(device, stream, size)..)
            .next()
            .filter(|(key, _)| key.device == device && key.stream == stream)
            .map(|(key, id)| (*key, *id));
        let (key, block_id) = found?;
        self.pool_mut(small).remove(&key);
        Some(block_id)
    }

    /// Split `size` bytes off the front of `rest_id`.
    ///
    /// The new head takes over the original's place in the sibling chain;
    /// the remainder keeps its identity, moves up by `size` bytes, and goes
    /// back into the pool that served the request.
    fn split_front(&mut self, rest_id: BlockId, size: usize, small: bool) -> BlockId {
        let rest = *self.blocks.get(rest_id);

        let mut head = Block::new(rest.device, rest.stream, size, rest.addr);
        head.prev = rest.prev;
        head.next = Some(rest_id);
        let head_id = self.blocks.insert(head);
        if let Some(prev_id) = rest.prev {
            self.blocks.get_mut(prev_id).next = Some(head_id);
        }

        let rest_mut = self.blocks.get_mut(rest_id);
        rest_mut.prev = Some(head_id);
        rest_mut.addr += size;
        rest_mut.size -= size;
        let rest_key = rest_mut.key();
        self.pool_mut(small).insert(rest_key, rest_id);

        head_id
    }

    /// Fold a free sibling into `dst_id`.
    ///
    /// No-op unless `src_id` names a sibling that is currently free. The
    /// sibling leaves its pool and the arena; its range and far sibling
    /// link transfer to the survivor.
    fn try_merge(&mut self, dst_id: BlockId, src_id: Option<BlockId>) {
        let Some(src_id) = src_id else {
            return;
        };
        if self.blocks.get(src_id).allocated {
            return;
        }

        let src_key = self.blocks.get(src_id).key();
        self.pool_mut(src_key.size <= SMALL_ALLOC).remove(&src_key);

        let merging_prev = self.blocks.get(dst_id).prev == Some(src_id);
        let src = self.blocks.remove(src_id);
        let dst = self.blocks.get_mut(dst_id);
        if merging_prev {
            dst.addr = src.addr;
            dst.prev = src.prev;
        } else {
            dst.next = src.next;
        }
        dst.size += src.size;

        let far = if merging_prev { src.prev } else { src.next };
        if let Some(far_id) = far {
            if merging_prev {
                self.blocks.get_mut(far_id).next = Some(dst_id);
            } else {
                self.blocks.get_mut(far_id).prev = Some(dst_id);
            }
        }
    }
}

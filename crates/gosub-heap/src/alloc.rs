//! Binary buddy allocator over a flat word pool.
//!
//! The pool is split into power-of-two blocks. Bucket 0 is the whole pool,
//! bucket `b` holds blocks of `2^(max_log2 - b)` words. Every bucket keeps an
//! intrusive doubly linked free list whose links live in the first two words of
//! each free block.
//!
//! Blocks are also nodes of a 1-indexed binary tree (root 1, children `2i` and
//! `2i + 1`). For every split node one bit records whether exactly one of its
//! children is free; putting a node on a free list or taking it off toggles the
//! parent's bit. On release a block merges with its buddy while that bit says
//! the buddy is free.
//!
//! The first word of an allocated block stores its bucket; callers get the
//! address right after it.

use crate::error::HeapError;

/// Smallest block is `2^MIN_ALLOC_LOG2` words (header plus one payload word,
/// or the two free-list links).
pub const MIN_ALLOC_LOG2: u32 = 1;

const HEADER_WORDS: usize = 1;

/// Encoded "no link" in a free-list slot. Links are stored as `ptr + 1`.
const NO_LINK: u64 = 0;

#[derive(Debug)]
pub struct BuddyAllocator {
    memory: Vec<u64>,
    max_log2: u32,
    bucket_count: usize,
    free_lists: Vec<Option<usize>>,
    split_bits: Vec<u64>,
    free_words: usize,
}

impl BuddyAllocator {
    /// Creates a pool of the largest power of two not exceeding `words`.
    pub fn new(words: usize) -> Result<Self, HeapError> {
        let min_words = 1usize << (MIN_ALLOC_LOG2 + 1);
        if words < min_words || words > u32::MAX as usize {
            return Err(HeapError::PoolSize(words));
        }
        let max_log2 = usize::BITS - 1 - words.leading_zeros();
        let bucket_count = (max_log2 - MIN_ALLOC_LOG2 + 1) as usize;
        let internal_nodes = 1usize << (bucket_count - 1);

        let mut alloc = Self {
            memory: vec![0; 1usize << max_log2],
            max_log2,
            bucket_count,
            free_lists: vec![None; bucket_count],
            split_bits: vec![0; internal_nodes / 64 + 1],
            free_words: 0,
        };
        alloc.insert_free(0, 1);
        Ok(alloc)
    }

    /// Total words managed by the pool.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Words currently sitting on free lists.
    #[inline]
    pub fn free_words(&self) -> usize {
        self.free_words
    }

    /// Largest request `allocate` can ever satisfy.
    #[inline]
    pub fn max_request(&self) -> usize {
        self.capacity() - HEADER_WORDS
    }

    #[inline]
    pub fn word(&self, address: usize) -> u64 {
        self.memory[address]
    }

    #[inline]
    pub fn set_word(&mut self, address: usize, value: u64) {
        self.memory[address] = value;
    }

    /// Returns the address of a block with room for `words` payload words.
    ///
    /// `None` when the request is zero, larger than the pool, or when no free
    /// block of sufficient size exists.
    pub fn allocate(&mut self, words: usize) -> Option<usize> {
        if words == 0 {
            return None;
        }
        let target = self.bucket_for_request(words.checked_add(HEADER_WORDS)?)?;

        let mut bucket = target;
        let mut node = loop {
            if let Some(node) = self.pop_free(bucket) {
                break node;
            }
            if bucket == 0 {
                return None;
            }
            bucket -= 1;
        };

        while bucket < target {
            self.insert_free(bucket + 1, node * 2 + 1);
            node *= 2;
            bucket += 1;
        }

        let ptr = self.ptr_for_node(node, target);
        self.memory[ptr] = target as u64;
        Some(ptr + HEADER_WORDS)
    }

    /// Returns a block obtained from `allocate` to the pool.
    pub fn deallocate(&mut self, address: usize) -> Result<(), HeapError> {
        if address < HEADER_WORDS || address >= self.memory.len() {
            return Err(HeapError::InvalidBlock(address));
        }
        let ptr = address - HEADER_WORDS;
        let mut bucket = self.memory[ptr] as usize;
        if bucket >= self.bucket_count || ptr % self.block_words(bucket) != 0 {
            return Err(HeapError::InvalidBlock(address));
        }

        let mut node = self.node_for_ptr(ptr, bucket);
        while node > 1 && self.parent_bit(node) {
            self.remove_free(bucket, node ^ 1);
            node /= 2;
            bucket -= 1;
        }
        self.insert_free(bucket, node);
        Ok(())
    }

    /// Payload words available at an allocated address.
    pub fn block_capacity(&self, address: usize) -> usize {
        let bucket = self.memory[address - HEADER_WORDS] as usize;
        self.block_words(bucket) - HEADER_WORDS
    }

    #[inline]
    fn block_words(&self, bucket: usize) -> usize {
        1usize << (self.max_log2 as usize - bucket)
    }

    fn bucket_for_request(&self, words: usize) -> Option<usize> {
        let log2 = if words <= 1 {
            0
        } else {
            usize::BITS - (words - 1).leading_zeros()
        };
        let log2 = log2.max(MIN_ALLOC_LOG2);
        if log2 > self.max_log2 {
            return None;
        }
        Some((self.max_log2 - log2) as usize)
    }

    #[inline]
    fn node_for_ptr(&self, ptr: usize, bucket: usize) -> usize {
        (ptr >> (self.max_log2 as usize - bucket)) + (1usize << bucket)
    }

    #[inline]
    fn ptr_for_node(&self, node: usize, bucket: usize) -> usize {
        (node - (1usize << bucket)) << (self.max_log2 as usize - bucket)
    }

    #[inline]
    fn parent_bit(&self, node: usize) -> bool {
        let parent = node / 2;
        self.split_bits[parent / 64] & (1u64 << (parent % 64)) != 0
    }

    #[inline]
    fn toggle_parent_bit(&mut self, node: usize) {
        if node > 1 {
            let parent = node / 2;
            self.split_bits[parent / 64] ^= 1u64 << (parent % 64);
        }
    }

    fn insert_free(&mut self, bucket: usize, node: usize) {
        let ptr = self.ptr_for_node(node, bucket);
        let head = self.free_lists[bucket];
        self.memory[ptr] = NO_LINK;
        self.memory[ptr + 1] = encode_link(head);
        if let Some(head) = head {
            self.memory[head] = encode_link(Some(ptr));
        }
        self.free_lists[bucket] = Some(ptr);
        self.toggle_parent_bit(node);
        self.free_words += self.block_words(bucket);
    }

    fn remove_free(&mut self, bucket: usize, node: usize) {
        let ptr = self.ptr_for_node(node, bucket);
        let prev = decode_link(self.memory[ptr]);
        let next = decode_link(self.memory[ptr + 1]);
        match prev {
            Some(prev) => self.memory[prev + 1] = encode_link(next),
            None => self.free_lists[bucket] = next,
        }
        if let Some(next) = next {
            self.memory[next] = encode_link(prev);
        }
        self.toggle_parent_bit(node);
        self.free_words -= self.block_words(bucket);
    }

    fn pop_free(&mut self, bucket: usize) -> Option<usize> {
        let ptr = self.free_lists[bucket]?;
        let node = self.node_for_ptr(ptr, bucket);
        self.remove_free(bucket, node);
        Some(node)
    }
}

#[inline]
fn encode_link(ptr: Option<usize>) -> u64 {
    ptr.map_or(NO_LINK, |p| p as u64 + 1)
}

#[inline]
fn decode_link(word: u64) -> Option<usize> {
    if word == NO_LINK {
        None
    } else {
        Some(word as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn saturate(alloc: &mut BuddyAllocator, words: usize) -> Vec<usize> {
        let mut blocks = Vec::new();
        while let Some(addr) = alloc.allocate(words) {
            blocks.push(addr);
        }
        blocks
    }

    #[test]
    fn test_pool_rounds_down_to_power_of_two() {
        let alloc = BuddyAllocator::new(1000).unwrap();
        assert_eq!(alloc.capacity(), 512);
        assert_eq!(alloc.free_words(), 512);
        assert!(BuddyAllocator::new(3).is_err());
    }

    #[test]
    fn test_invalid_sizes_return_none() {
        let mut alloc = BuddyAllocator::new(64).unwrap();
        assert_eq!(alloc.allocate(0), None);
        assert_eq!(alloc.allocate(64), None);
        assert_eq!(alloc.allocate(usize::MAX), None);
        assert_eq!(alloc.free_words(), 64);
        assert!(alloc.allocate(63).is_some());
        assert_eq!(alloc.free_words(), 0);
    }

    #[test]
    fn test_split_and_merge() {
        let mut alloc = BuddyAllocator::new(64).unwrap();
        let a = alloc.allocate(1).unwrap();
        let b = alloc.allocate(1).unwrap();
        assert_eq!(alloc.free_words(), 60);
        assert_eq!(alloc.block_capacity(a), 1);
        alloc.deallocate(a).unwrap();
        alloc.deallocate(b).unwrap();
        assert_eq!(alloc.free_words(), 64);
        assert_eq!(alloc.allocate(63), Some(1));
    }

    #[test]
    fn test_live_blocks_never_overlap() {
        let mut alloc = BuddyAllocator::new(1 << 12).unwrap();
        let sizes = [1usize, 7, 3, 30, 2, 15, 64, 5, 9, 120, 1, 33];
        let mut live: Vec<(usize, usize)> = Vec::new();
        for round in 0..6 {
            for (i, &size) in sizes.iter().enumerate() {
                if let Some(addr) = alloc.allocate(size) {
                    live.push((addr, size));
                }
                if (i + round) % 3 == 0 && !live.is_empty() {
                    let (addr, _) = live.remove((i * 7 + round) % live.len());
                    alloc.deallocate(addr).unwrap();
                }
            }
            let mut spans: Vec<(usize, usize)> = live
                .iter()
                .map(|&(addr, _)| (addr - 1, addr - 1 + alloc.block_capacity(addr) + 1))
                .collect();
            spans.sort();
            for pair in spans.windows(2) {
                assert!(pair[0].1 <= pair[1].0, "blocks overlap: {:?}", pair);
            }
            for &(addr, size) in &live {
                assert!(alloc.block_capacity(addr) >= size);
            }
        }
        for (addr, _) in live.drain(..) {
            alloc.deallocate(addr).unwrap();
        }
        assert_eq!(alloc.free_words(), alloc.capacity());
    }

    #[test]
    fn test_capacity_restored_after_release_cycle() {
        let mut alloc = BuddyAllocator::new(256).unwrap();
        let first = saturate(&mut alloc, 1);
        assert_eq!(first.len(), 128);
        assert_eq!(alloc.free_words(), 0);
        for addr in &first {
            alloc.deallocate(*addr).unwrap();
        }
        assert_eq!(alloc.free_words(), 256);

        let mixed: Vec<usize> = [3usize, 1, 12, 5, 1, 30]
            .iter()
            .filter_map(|&w| alloc.allocate(w))
            .collect();
        for addr in mixed.into_iter().rev() {
            alloc.deallocate(addr).unwrap();
        }

        let second = saturate(&mut alloc, 1);
        assert_eq!(second.len(), first.len());
        for addr in second {
            alloc.deallocate(addr).unwrap();
        }
        assert!(alloc.allocate(alloc.max_request()).is_some());
    }

    #[test]
    fn test_deallocate_rejects_garbage_addresses() {
        let mut alloc = BuddyAllocator::new(64).unwrap();
        assert!(alloc.deallocate(0).is_err());
        assert!(alloc.deallocate(64).is_err());
        let a = alloc.allocate(2).unwrap();
        assert!(alloc.deallocate(a + 1).is_err());
    }
}

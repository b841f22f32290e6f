use crate::{
    blocks::{Block, HeapArena},
    provider::HeapProvider,
    HEADER_SIZE, USIZE_SIZE,
};

/// Offsets of the link fields inside a free block, right after its header.
const NEXT_LINK_OFFSET: usize = HEADER_SIZE;
const PREV_LINK_OFFSET: usize = HEADER_SIZE + USIZE_SIZE;

/// The word stored in a link field that points at the sentinel. Block offsets
/// are always word aligned, so this can never be mistaken for a block.
const SENTINEL_LINK: usize = usize::MAX;

/// A node of the free registry: either the sentinel or a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Sentinel,
    Block(Block),
}

impl Link {
    fn encode(self) -> usize {
        match self {
            Link::Sentinel => SENTINEL_LINK,
            Link::Block(block) => block.offset(),
        }
    }

    fn decode(word: usize) -> Self {
        if word == SENTINEL_LINK {
            Link::Sentinel
        } else {
            Link::Block(Block::at_offset(word))
        }
    }
}

/// The sentinel node of the registry. It lives inside the allocator rather
/// than in the heap, so it never has to be found by address.
#[derive(Debug)]
struct Sentinel {
    next: Link,
    prev: Link,
}

/// A circular doubly linked list of all the free blocks in the heap.
///
/// The links of each free block are stored inside the block itself, in the
/// space that would hold the payload of an allocated block.
#[derive(Debug)]
pub struct FreeRegistry {
    sentinel: Sentinel,
    len: usize,
}

impl FreeRegistry {
    /// Creates an empty registry, in which the sentinel points to itself.
    pub const fn new() -> Self {
        Self {
            sentinel: Sentinel {
                next: Link::Sentinel,
                prev: Link::Sentinel,
            },
            len: 0,
        }
    }

    /// The amount of free blocks in the registry.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn next_of<P: HeapProvider>(&self, arena: &HeapArena<P>, node: Link) -> Link {
        match node {
            Link::Sentinel => self.sentinel.next,
            Link::Block(block) => Link::decode(arena.read_word(block.offset() + NEXT_LINK_OFFSET)),
        }
    }

    fn prev_of<P: HeapProvider>(&self, arena: &HeapArena<P>, node: Link) -> Link {
        match node {
            Link::Sentinel => self.sentinel.prev,
            Link::Block(block) => Link::decode(arena.read_word(block.offset() + PREV_LINK_OFFSET)),
        }
    }

    fn set_next<P: HeapProvider>(&mut self, arena: &mut HeapArena<P>, node: Link, next: Link) {
        match node {
            Link::Sentinel => self.sentinel.next = next,
            Link::Block(block) => {
                arena.write_word(block.offset() + NEXT_LINK_OFFSET, next.encode())
            }
        }
    }

    fn set_prev<P: HeapProvider>(&mut self, arena: &mut HeapArena<P>, node: Link, prev: Link) {
        match node {
            Link::Sentinel => self.sentinel.prev = prev,
            Link::Block(block) => {
                arena.write_word(block.offset() + PREV_LINK_OFFSET, prev.encode())
            }
        }
    }

    /// Inserts the given free block right after the sentinel, so that the most
    /// recently freed block is the first one to be found.
    pub fn insert<P: HeapProvider>(&mut self, arena: &mut HeapArena<P>, block: Block) {
        let first = self.sentinel.next;

        self.set_next(arena, Link::Block(block), first);
        self.set_prev(arena, Link::Block(block), Link::Sentinel);
        self.set_prev(arena, first, Link::Block(block));
        self.sentinel.next = Link::Block(block);

        self.len += 1;
    }

    /// Unlinks the given block from the registry.
    pub fn remove<P: HeapProvider>(&mut self, arena: &mut HeapArena<P>, block: Block) {
        debug_assert!(!self.is_empty(), "removing from an empty free registry");

        // change `prev <-> block <-> next` into `prev <-> next`.
        let next = self.next_of(arena, Link::Block(block));
        let prev = self.prev_of(arena, Link::Block(block));
        self.set_next(arena, prev, next);
        self.set_prev(arena, next, prev);

        self.len -= 1;
    }

    /// Puts `new` in the exact position of `old`, which leaves the registry.
    pub fn replace<P: HeapProvider>(&mut self, arena: &mut HeapArena<P>, old: Block, new: Block) {
        let next = self.next_of(arena, Link::Block(old));
        let prev = self.prev_of(arena, Link::Block(old));

        self.set_next(arena, Link::Block(new), next);
        self.set_prev(arena, Link::Block(new), prev);
        self.set_next(arena, prev, Link::Block(new));
        self.set_prev(arena, next, Link::Block(new));
    }

    /// Returns an iterator over the free blocks, starting with the most
    /// recently inserted one.
    pub fn iter<'a, P: HeapProvider>(&'a self, arena: &'a HeapArena<P>) -> FreeBlocks<'a, P> {
        FreeBlocks {
            registry: self,
            arena,
            last_yielded: Link::Sentinel,
            finished: false,
        }
    }

    /// First fit: returns the first free block, in registry order, which is at
    /// least `required_size` bytes large.
    pub fn find_first_fit<P: HeapProvider>(
        &self,
        arena: &HeapArena<P>,
        required_size: usize,
    ) -> Option<Block> {
        self.iter(arena).find(|&block| {
            let tag = arena.tag(block);
            debug_assert!(tag.is_free(), "allocated block found in the free registry");
            tag.size() >= required_size
        })
    }
}

/// An iterator over the blocks of a [`FreeRegistry`].
///
/// The links of a block are only read when advancing past it, so a caller
/// may inspect each yielded block before the iterator touches its contents.
pub struct FreeBlocks<'a, P> {
    registry: &'a FreeRegistry,
    arena: &'a HeapArena<P>,
    last_yielded: Link,
    finished: bool,
}

impl<'a, P: HeapProvider> Iterator for FreeBlocks<'a, P> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.finished {
            return None;
        }

        match self.registry.next_of(self.arena, self.last_yielded) {
            Link::Sentinel => {
                self.finished = true;
                None
            }
            Link::Block(block) => {
                self.last_yielded = Link::Block(block);
                Some(block)
            }
        }
    }
}

impl<'a, P: HeapProvider> core::iter::FusedIterator for FreeBlocks<'a, P> {}

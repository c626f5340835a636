//! The segregated free list: `K` doubly-linked list heads, one per size
//! class, with nodes living inside the payload of free blocks.
//!
//! A block's class is never stored anywhere; it is always recomputed from
//! the block's own size via [`super::size_class::class`]. Keeping a single
//! source of truth for "which list is this block in" is what the design
//! notes call out as the principal bug risk of this design.

use super::block::WORD;
use super::buffer::Buffer;

/// Sentinel used in place of `Option<usize>` for list links and heads.
///
/// Offset `0` is inside the prologue and can therefore never be the header
/// offset of a free block, so it doubles as a null value without needing a
/// byte of storage for a discriminant.
const NULL: usize = 0;

/// `K` doubly-linked list heads. List nodes are the first two words of a
/// free block's payload: `prev` at payload offset `0`, `next` at payload
/// offset `WORD`.
pub struct FreeLists<const K: usize> {
    heads: [usize; K],
}
impl<const K: usize> FreeLists<K> {
    /// An empty set of free lists.
    pub const fn new() -> Self {
        Self { heads: [NULL; K] }
    }

    /// Set a list head directly, bypassing node linking.
    ///
    /// Only meant for const-time heap construction, where the block being
    /// seeded is the only block the allocator has ever seen and therefore
    /// has no neighbors to link; its node words must already be zeroed by
    /// the caller.
    pub const fn seed_head_const(&mut self, class: usize, header_offset: usize) {
        self.heads[class] = header_offset;
    }

    /// The head of `class`'s list, if non-empty.
    pub fn head(&self, class: usize) -> Option<usize> {
        let head = self.heads[class];
        (head != NULL).then_some(head)
    }

    /// The block following `header_offset` in whatever list it is linked
    /// into.
    pub fn next_in_list<const N: usize>(&self, buffer: &Buffer<N>, header_offset: usize) -> Option<usize> {
        let next = buffer.read_word(header_offset + WORD + WORD);
        (next != NULL).then_some(next)
    }

    /// Prepend a free block to `class`'s list in O(1).
    pub fn insert<const N: usize>(&mut self, buffer: &mut Buffer<N>, header_offset: usize, class: usize) {
        let old_head = self.heads[class];
        write_prev(buffer, header_offset, NULL);
        write_next(buffer, header_offset, old_head);
        if old_head != NULL {
            write_prev(buffer, old_head, header_offset);
        }
        self.heads[class] = header_offset;
    }

    /// Unlink a free block from `class`'s list in O(1).
    ///
    /// The caller must pass the class the block is actually linked into
    /// (recomputed from the block's current size), otherwise the wrong
    /// list's head is updated.
    pub fn remove<const N: usize>(&mut self, buffer: &mut Buffer<N>, header_offset: usize, class: usize) {
        let prev = read_prev(buffer, header_offset);
        let next = read_next(buffer, header_offset);

        match (prev, next) {
            (NULL, NULL) => self.heads[class] = NULL,
            (NULL, _) => {
                self.heads[class] = next;
                write_prev(buffer, next, NULL);
            }
            (_, NULL) => write_next(buffer, prev, NULL),
            (_, _) => {
                write_next(buffer, prev, next);
                write_prev(buffer, next, prev);
            }
        }
    }
}

fn read_prev<const N: usize>(buffer: &Buffer<N>, header_offset: usize) -> usize {
    buffer.read_word(header_offset + WORD)
}
fn read_next<const N: usize>(buffer: &Buffer<N>, header_offset: usize) -> usize {
    buffer.read_word(header_offset + WORD + WORD)
}
fn write_prev<const N: usize>(buffer: &mut Buffer<N>, header_offset: usize, value: usize) {
    buffer.write_word(header_offset + WORD, value);
}
fn write_next<const N: usize>(buffer: &mut Buffer<N>, header_offset: usize, value: usize) {
    buffer.write_word(header_offset + WORD + WORD, value);
}

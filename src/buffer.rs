//! A pooled, growable byte buffer used as scratch space by the frame codec's
//! payload reads, so repeated frames don't churn the allocator on every
//! message.

use bytes::BytesMut;
use std::sync::{Arc, Mutex};

const MAX_BACKING_CAPACITY: usize = 16 << 20;

/// A shared pool of `BytesMut` backing stores, bucketed by a rough size
/// class. Cheap to clone (it's just an `Arc` around the free lists).
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<Mutex<Vec<BytesMut>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn rent(&self, min_capacity: usize) -> BytesMut {
        let mut free = self.inner.lock().unwrap();
        if let Some(pos) = free.iter().position(|b| b.capacity() >= min_capacity) {
            let mut buf = free.swap_remove(pos);
            buf.clear();
            return buf;
        }
        BytesMut::with_capacity(next_capacity(min_capacity))
    }

    fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.inner.lock().unwrap();
        // Cap the free list so a burst of oversized connections doesn't pin
        // memory in the pool forever.
        if free.len() < 64 {
            free.push(buf);
        }
    }
}

fn next_capacity(min: usize) -> usize {
    min.next_power_of_two().min(MAX_BACKING_CAPACITY).max(64)
}

/// A growable byte buffer whose backing store is rented from a `BufferPool`
/// and returned to it on drop. Growth is geometric; shrinking is not
/// supported, matching how the frame codec uses this buffer (rent once per
/// connection, grow to the largest message seen, reuse).
pub struct PooledBuffer {
    pool: BufferPool,
    backing: BytesMut,
    length: usize,
}

impl PooledBuffer {
    pub fn new(pool: BufferPool, initial_capacity: usize) -> Self {
        let backing = pool.rent(initial_capacity);
        Self {
            pool,
            backing,
            length: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.length
    }

    pub fn committed_slice(&self) -> &[u8] {
        &self.backing[..self.length]
    }

    pub fn committed_slice_mut(&mut self) -> &mut [u8] {
        &mut self.backing[..self.length]
    }

    pub fn write(&mut self, bytes: &[u8]) {
        let dst = self.reserve(bytes.len());
        dst[..bytes.len()].copy_from_slice(bytes);
        self.consume(bytes.len());
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    /// Ensures at least `min_free` bytes are writable past `position()`,
    /// growing the backing store (to the next power of two) if needed, and
    /// returns the writable tail.
    pub fn reserve(&mut self, min_free: usize) -> &mut [u8] {
        let required = self.length + min_free;
        if required > self.backing.capacity() {
            let mut grown = self.pool.rent(next_capacity(required));
            grown.resize(self.backing.capacity().max(required), 0);
            grown[..self.length].copy_from_slice(&self.backing[..self.length]);
            let old = std::mem::replace(&mut self.backing, grown);
            self.pool.give_back(old);
        }
        if self.backing.len() < required {
            self.backing.resize(required, 0);
        }
        &mut self.backing[self.length..required]
    }

    /// Marks `n` bytes, previously written via the slice from `reserve`, as
    /// committed.
    pub fn consume(&mut self, n: usize) {
        self.length += n;
    }

    pub fn set_length(&mut self, n: usize) {
        self.length = n;
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let backing = std::mem::take(&mut self.backing);
        self.pool.give_back(backing);
    }
}

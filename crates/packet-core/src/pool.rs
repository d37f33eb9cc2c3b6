//! Memory pool for efficient buffer reuse
//!
//! Packet buffers on the realtime path come from fixed-size pools sized at
//! startup, so the steady state performs no heap allocation. The free list
//! is a bounded lock-free ring, safe to use from the network threads and
//! the pipeline thread simultaneously.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use tracing::warn;

/// A pool of reusable byte buffers
///
/// Buffers are pre-allocated up front and recycled through a lock-free
/// free list. When the free list underflows, acquisition fails and the
/// caller drops the packet; the pool never blocks and never grows past
/// its configured capacity.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    /// Free list of recycled buffers.
    free: ArrayQueue<BytesMut>,

    /// Size of each buffer.
    buffer_size: usize,

    /// Total buffers ever handed out minus returned.
    in_use: AtomicUsize,

    /// Acquisitions that failed because the pool was empty.
    exhausted_count: AtomicUsize,
}

impl BufferPool {
    /// Create a new pool with `capacity` buffers of `buffer_size` bytes each.
    ///
    /// All buffers are allocated here; the realtime path only recycles them.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            // Queue was sized for exactly this many, push cannot fail.
            let _ = free.push(BytesMut::with_capacity(buffer_size));
        }

        Self {
            inner: Arc::new(BufferPoolInner {
                free,
                buffer_size,
                in_use: AtomicUsize::new(0),
                exhausted_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a buffer without blocking.
    ///
    /// Returns `None` when the pool is exhausted; the caller is expected to
    /// drop the packet and continue.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        match self.inner.free.pop() {
            Some(mut buffer) => {
                buffer.clear();
                self.inner.in_use.fetch_add(1, Ordering::Relaxed);
                Some(PooledBuffer {
                    buffer: Some(buffer),
                    pool: self.clone(),
                })
            }
            None => {
                let n = self.inner.exhausted_count.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 1000 == 0 {
                    warn!(exhausted = n, "buffer pool exhausted, dropping");
                }
                None
            }
        }
    }

    /// Size of each buffer in this pool.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Get current pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            capacity: self.inner.free.capacity(),
            available: self.inner.free.len(),
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            exhausted_count: self.inner.exhausted_count.load(Ordering::Relaxed),
            buffer_size: self.inner.buffer_size,
        }
    }

    fn release(&self, buffer: BytesMut) {
        self.inner.in_use.fetch_sub(1, Ordering::Relaxed);
        // A buffer that somehow lost capacity is dropped instead of
        // poisoning the pool with undersized entries.
        if buffer.capacity() >= self.inner.buffer_size {
            let _ = self.inner.free.push(buffer);
        }
    }
}

/// Buffer pool statistics
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total buffers the pool was created with
    pub capacity: usize,

    /// Buffers currently on the free list
    pub available: usize,

    /// Buffers currently held by packets
    pub in_use: usize,

    /// Failed acquisitions due to an empty free list
    pub exhausted_count: usize,

    /// Size of each buffer
    pub buffer_size: usize,
}

/// A buffer acquired from the pool
///
/// Returned to the pool when dropped.
pub struct PooledBuffer {
    buffer: Option<BytesMut>,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Copy `data` into the buffer, replacing its contents.
    pub fn fill(&mut self, data: &[u8]) {
        let buffer = self.buffer.as_mut().unwrap();
        buffer.clear();
        buffer.extend_from_slice(data);
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buffer.as_ref().unwrap()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buffer.as_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.as_ref().map(|b| b.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let pool = BufferPool::new(1024, 4);

        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.available, 4);

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire().expect("pool should have buffers"));
        }
        assert_eq!(pool.stats().available, 0);
        assert_eq!(pool.stats().in_use, 4);

        // Fifth acquisition fails instead of blocking or allocating.
        assert!(pool.acquire().is_none());
        assert_eq!(pool.stats().exhausted_count, 1);

        held.clear();
        assert_eq!(pool.stats().available, 4);
        assert_eq!(pool.stats().in_use, 0);

        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_fill_and_reuse() {
        let pool = BufferPool::new(64, 1);

        let mut buf = pool.acquire().unwrap();
        buf.fill(&[1, 2, 3]);
        assert_eq!(&buf[..], &[1, 2, 3]);
        drop(buf);

        // Recycled buffer comes back empty.
        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty());
    }
}

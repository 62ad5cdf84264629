//! Lock-free pool of chunked buffers
//!
//! Provides pre-allocated `ChunkedBuffer`s so that encoding a batch does not
//! allocate in the hot path. Uses a lock-free queue for O(1) get/put.
//!
//! # Example
//!
//! ```ignore
//! let pool = BufferPool::new(16, 256 * 1024);
//!
//! let mut buf = pool.acquire();
//! builder.build(&mut buf)?;
//! sender.send(&ctx, &buf).await?;
//! // buffer goes back to the pool when `buf` drops
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chbulk_config::BufferPoolConfig;
use crossbeam::queue::ArrayQueue;

use crate::buffer::ChunkedBuffer;

/// Default number of pooled buffers
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Default capacity of each pooled buffer (256KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024;

static GLOBAL: OnceLock<BufferPool> = OnceLock::new();

/// Lock-free pool of reusable `ChunkedBuffer`s
///
/// When the pool is exhausted, new buffers are allocated on demand (and can
/// be returned to the pool later).
pub struct BufferPool {
    /// Lock-free queue of available buffers
    queue: ArrayQueue<ChunkedBuffer>,

    /// Capacity for each buffer
    buffer_capacity: usize,

    /// Metrics
    metrics: BufferPoolMetrics,
}

/// Metrics for buffer pool monitoring
#[derive(Debug, Default)]
pub struct BufferPoolMetrics {
    /// Number of successful pool hits (buffer reused)
    pub hits: AtomicU64,

    /// Number of pool misses (new allocation required)
    pub misses: AtomicU64,

    /// Number of buffers returned to pool
    pub returns: AtomicU64,

    /// Number of buffers dropped (pool was full)
    pub drops: AtomicU64,
}

impl BufferPoolMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of buffer pool metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl MetricsSnapshot {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl BufferPool {
    /// Create a new buffer pool with pre-allocated buffers
    ///
    /// # Arguments
    ///
    /// * `pool_size` - Number of buffers to pre-allocate
    /// * `buffer_capacity` - Initial byte capacity of each buffer
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let queue = ArrayQueue::new(pool_size.max(1));

        for _ in 0..pool_size {
            // Cannot fail: the queue is empty and sized for pool_size
            let _ = queue.push(ChunkedBuffer::with_capacity(buffer_capacity));
        }

        Self {
            queue,
            buffer_capacity,
            metrics: BufferPoolMetrics::new(),
        }
    }

    /// Process-wide pool, created with default sizing on first use unless
    /// `init_global` ran first
    pub fn global() -> &'static BufferPool {
        GLOBAL.get_or_init(|| BufferPool::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY))
    }

    /// Install the process-wide pool; returns false if it already exists
    pub fn init_global(pool: BufferPool) -> bool {
        GLOBAL.set(pool).is_ok()
    }

    /// Get a reset buffer from the pool
    ///
    /// Returns a pooled buffer if available, otherwise allocates a new one.
    #[inline]
    pub fn get(&self) -> ChunkedBuffer {
        match self.queue.pop() {
            Some(buf) => {
                BufferPoolMetrics::record(&self.metrics.hits);
                buf
            }
            None => {
                BufferPoolMetrics::record(&self.metrics.misses);
                ChunkedBuffer::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Return a buffer to the pool
    ///
    /// Resets the buffer and returns it to the pool if space is available.
    /// If the pool is full, or the buffer is smaller than the pool's
    /// buffers, it is dropped.
    #[inline]
    pub fn put(&self, mut buf: ChunkedBuffer) {
        buf.reset();

        if buf.capacity() >= self.buffer_capacity {
            match self.queue.push(buf) {
                Ok(()) => BufferPoolMetrics::record(&self.metrics.returns),
                Err(_) => BufferPoolMetrics::record(&self.metrics.drops),
            }
        } else {
            BufferPoolMetrics::record(&self.metrics.drops);
        }
    }

    /// Get a buffer that returns itself to the pool on drop
    pub fn acquire(&self) -> PooledBuffer<'_> {
        PooledBuffer {
            pool: self,
            buf: Some(self.get()),
        }
    }

    /// Get the number of buffers currently available in the pool
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Check if the pool has no buffers ready
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if the pool holds its maximum number of buffers
    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Get the pool capacity (maximum number of buffers)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get the buffer capacity (size of each buffer)
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Get reference to metrics
    #[inline]
    pub fn metrics(&self) -> &BufferPoolMetrics {
        &self.metrics
    }
}

impl From<&BufferPoolConfig> for BufferPool {
    fn from(config: &BufferPoolConfig) -> Self {
        Self::new(config.pool_size, config.buffer_capacity)
    }
}

/// Scoped buffer from a `BufferPool`
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<ChunkedBuffer>,
}

impl PooledBuffer<'_> {
    /// Keep the buffer instead of returning it to the pool
    pub fn detach(mut self) -> ChunkedBuffer {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = ChunkedBuffer;

    fn deref(&self) -> &ChunkedBuffer {
        // Only `detach` and `drop` take the buffer, and both consume the guard
        self.buf.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut ChunkedBuffer {
        self.buf.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

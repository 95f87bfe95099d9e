//! Buffer pool for reusing SQL buffers across queued requests.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

const POOL_CAPACITY: usize = 128;

/// Global pool for reusing SQL buffers across clients.
pub static GLOBAL_SQL_POOL: LazyLock<Arc<SqlBufferPool>> =
    LazyLock::new(|| Arc::new(SqlBufferPool::default()));

/// A pooled SQL buffer that returns itself to the pool on drop.
pub struct PooledSql {
    pool: Arc<SqlBufferPool>,
    inner: ManuallyDrop<Vec<u8>>,
}

impl PooledSql {
    fn new(pool: Arc<SqlBufferPool>, buffer: Vec<u8>) -> Self {
        Self {
            pool,
            inner: ManuallyDrop::new(buffer),
        }
    }
}

impl Deref for PooledSql {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Drop for PooledSql {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this
        let buffer = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.return_buffer(buffer);
    }
}

/// Pool of SQL byte buffers.
#[derive(Debug)]
pub struct SqlBufferPool {
    buffers: ArrayQueue<Vec<u8>>,
}

impl SqlBufferPool {
    /// Create a new pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
        }
    }

    /// Get a buffer holding a copy of `sql`, reusing a pooled allocation if
    /// one is available.
    pub fn get(self: &Arc<Self>, sql: &[u8]) -> PooledSql {
        let mut buffer = self.buffers.pop().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(sql);
        PooledSql::new(Arc::clone(self), buffer)
    }

    /// Return a buffer to the pool.
    pub fn return_buffer(&self, mut buffer: Vec<u8>) {
        buffer.clear();

        // Ignore if pool is full
        let _ = self.buffers.push(buffer);
    }
}

impl Default for SqlBufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}

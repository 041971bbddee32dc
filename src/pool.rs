// Process-wide pool of byte buffers.
//
// Streaming readers and the UTF-16 transcode path acquire their backing
// buffers here at construction and return them on drop, so steady-state
// iteration does not churn the allocator. The pool holds at most a
// handful of buffers; oversized ones are dropped rather than retained.

use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Buffers kept around at most.
const MAX_POOLED: usize = 8;

/// Largest capacity worth retaining (4 MiB).
const MAX_RETAIN_CAPACITY: usize = 4 * 1024 * 1024;

static POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn lock_pool() -> std::sync::MutexGuard<'static, Vec<Vec<u8>>> {
    match POOL.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A pooled byte buffer; returns to the pool on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
}

impl PooledBuf {
    /// Take a buffer from the pool (or allocate) with at least
    /// `min_capacity` bytes of capacity. The buffer starts empty.
    pub fn acquire(min_capacity: usize) -> PooledBuf {
        let mut buf = lock_pool().pop().unwrap_or_default();
        buf.clear();
        if buf.capacity() < min_capacity {
            buf.reserve(min_capacity - buf.len());
        }
        PooledBuf { buf }
    }

    #[inline]
    pub fn as_vec(&self) -> &Vec<u8> {
        &self.buf
    }

    #[inline]
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if self.buf.capacity() == 0 || self.buf.capacity() > MAX_RETAIN_CAPACITY {
            return;
        }
        let mut pool = lock_pool();
        if pool.len() < MAX_POOLED {
            pool.push(std::mem::take(&mut self.buf));
        }
    }
}

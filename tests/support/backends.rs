//! Backends with controllable failure behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vaultenv::core::storage::{Backend, MemoryBackend};
use vaultenv::error::{Result, StoreError};

/// Non-atomic backend whose writes start failing after a fixed number of
/// successful `set` calls.
///
/// Reads go to the shared `MemoryBackend`, so the test can inspect exactly
/// what was written before the failure.
pub struct FlakyBackend {
    inner: MemoryBackend,
    remaining: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: MemoryBackend, successful_writes: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(successful_writes),
        }
    }

    /// Allow `n` more writes.
    pub fn allow(&self, n: usize) {
        self.remaining.store(n, Ordering::SeqCst);
    }
}

impl Backend for FlakyBackend {
    fn set(&self, key: &str, value: &str, encrypt: bool) -> Result<()> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
            return Err(StoreError::WriteFailed(cause).into());
        }
        self.inner.set(key, value, encrypt)
    }

    fn get(&self, key: &str) -> Result<String> {
        self.inner.get(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.inner.list()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

/// Non-atomic backend that stalls writes of one key, widening the window
/// between a caller sealing a value and the value reaching storage.
pub struct SlowBackend {
    inner: MemoryBackend,
    slow_key: String,
    delay: Duration,
}

impl SlowBackend {
    pub fn new(inner: MemoryBackend, slow_key: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner,
            slow_key: slow_key.into(),
            delay,
        }
    }
}

impl Backend for SlowBackend {
    fn set(&self, key: &str, value: &str, encrypt: bool) -> Result<()> {
        if key == self.slow_key {
            std::thread::sleep(self.delay);
        }
        self.inner.set(key, value, encrypt)
    }

    fn get(&self, key: &str) -> Result<String> {
        self.inner.get(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.inner.list()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

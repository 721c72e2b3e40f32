//! Pool of exclusive decoder handles.
//!
//! The pool holds exactly one handle per worker. A handle is borrowed through
//! [`ReaderPool::acquire`], which waits until one is free, and is returned to
//! the pool when the [`PooledReader`] guard is dropped, on every exit path.
//!
//! Switching the current series is a pool-wide barrier: [`ReaderPool::switch_series`]
//! takes every handle out of circulation, updates them all, then releases
//! them. Workers never switch series themselves.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error};

use crate::error::{ConvertError, SourceError};

use super::reader::{ImageReader, ImageSource};

// =============================================================================
// Reader Pool
// =============================================================================

/// Fixed-size pool of decoder handles.
pub struct ReaderPool<R> {
    /// Handles not currently borrowed
    readers: Mutex<Vec<R>>,

    /// One permit per idle handle
    permits: Semaphore,

    /// Total number of handles owned by the pool
    size: usize,
}

impl<R: ImageReader> ReaderPool<R> {
    /// Build a pool from already-open handles.
    pub fn new(readers: Vec<R>) -> Self {
        let size = readers.len();
        Self {
            readers: Mutex::new(readers),
            permits: Semaphore::new(size),
            size,
        }
    }

    /// Open `count` handles from `source`.
    ///
    /// Each handle is initialized exactly once here and reused for the rest
    /// of the conversion.
    pub fn open<S>(source: &S, path: &Path, count: usize) -> Result<Self, SourceError>
    where
        S: ImageSource<Reader = R>,
    {
        let mut readers = Vec::with_capacity(count);
        for i in 0..count {
            readers.push(source.open(path)?);
            debug!("Opened reader {}/{} for {}", i + 1, count, path.display());
        }
        Ok(Self::new(readers))
    }

    /// Total number of handles owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of handles currently idle.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Borrow a handle, waiting until one is free.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Interrupted`] if the pool was closed.
    pub async fn acquire(&self) -> Result<PooledReader<'_, R>, ConvertError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ConvertError::Interrupted("a reader handle"))?;

        let reader = self
            .lock()
            .pop()
            .ok_or(ConvertError::Interrupted("a reader handle"))?;

        Ok(PooledReader {
            pool: self,
            reader: Some(reader),
            _permit: permit,
        })
    }

    /// Point every handle at `series`.
    ///
    /// Waits until all handles are idle, so no tile task can observe a
    /// partially switched pool.
    pub async fn switch_series(&self, series: usize) -> Result<(), ConvertError> {
        let _all = self
            .permits
            .acquire_many(self.size as u32)
            .await
            .map_err(|_| ConvertError::Interrupted("the reader pool"))?;

        run_blocking(|| {
            for reader in self.lock().iter_mut() {
                reader.set_series(series)?;
            }
            Ok::<(), SourceError>(())
        })?;
        debug!("Switched {} readers to series {}", self.size, series);
        Ok(())
    }

    /// Close every handle and refuse further acquisitions.
    ///
    /// Waits for borrowed handles to be returned first.
    pub async fn close(&self) {
        if let Ok(all) = self.permits.acquire_many(self.size as u32).await {
            all.forget();
        }
        self.permits.close();

        let readers: Vec<R> = self.lock().drain(..).collect();
        for mut reader in readers {
            if let Err(e) = reader.close() {
                error!("Exception while closing reader: {}", e);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<R>> {
        self.readers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Blocking Reader Calls
// =============================================================================

/// Run a synchronous reader call from async code.
///
/// On a multi-thread runtime the worker thread hands its other tasks off
/// while `f` runs. Elsewhere `f` runs inline.
pub fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

// =============================================================================
// Pooled Reader Guard
// =============================================================================

/// A handle borrowed from a [`ReaderPool`].
///
/// Dereferences to the underlying reader. The handle goes back to the pool
/// when the guard is dropped.
pub struct PooledReader<'a, R: ImageReader> {
    pool: &'a ReaderPool<R>,
    reader: Option<R>,
    _permit: SemaphorePermit<'a>,
}

impl<R: ImageReader> Deref for PooledReader<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        // Only `drop` takes the reader out
        self.reader.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<R: ImageReader> DerefMut for PooledReader<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.reader.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<R: ImageReader> Drop for PooledReader<'_, R> {
    fn drop(&mut self) {
        // The handle must be back on the stack before the permit is released
        if let Some(reader) = self.reader.take() {
            self.pool.lock().push(reader);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Smart pointer to [`tokio::sync::RwLock`].

use std::time::Duration;

use crate::sync::{Error, Result, DEFAULT_TIMEOUT_DURATION};
use tokio::time::timeout;

/// Smart pointer to [`tokio::sync::RwLock`].
///
/// Wraps acquiring the lock in [`timeout`], returning an error rather than
/// blocking forever if a handler invocation deadlocks on bot state.
#[derive(Debug)]
pub struct RwLock<T> {
    inner: tokio::sync::RwLock<T>,
    timeout: Duration,
}

impl<T> RwLock<T> {
    /// Create a new `RwLock` with the default timeout.
    pub fn new(value: T) -> Self {
        Self {
            inner: tokio::sync::RwLock::new(value),
            timeout: DEFAULT_TIMEOUT_DURATION,
        }
    }

    /// Create a new `RwLock` with a given timeout.
    pub fn new_with_timeout(value: T, timeout: Duration) -> Self {
        Self {
            inner: tokio::sync::RwLock::new(value),
            timeout,
        }
    }

    /// Acquire the read lock, failing with [`Error::ReadLockTimeout`] if it
    /// can't be acquired in time.
    pub async fn read_err(&self) -> Result<tokio::sync::RwLockReadGuard<'_, T>> {
        timeout(self.timeout, self.inner.read())
            .await
            .map_err(|_| Error::ReadLockTimeout(self.timeout.as_millis()))
    }

    /// Acquire the write lock, failing with [`Error::WriteLockTimeout`] if it
    /// can't be acquired in time.
    pub async fn write_err(&self) -> Result<tokio::sync::RwLockWriteGuard<'_, T>> {
        timeout(self.timeout, self.inner.write())
            .await
            .map_err(|_| Error::WriteLockTimeout(self.timeout.as_millis()))
    }
}

impl<T> std::ops::Deref for RwLock<T> {
    type Target = tokio::sync::RwLock<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> From<T> for RwLock<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

//! Execution contexts for the native rich-text facility.
//!
//! A context is not reentrant: it must only ever be driven by one caller at
//! a time. [`ContextPool`] owns a fixed set of contexts and hands each one
//! out to a single [`ContextLease`] holder; dropping the lease returns the
//! context. A pool of one is a plain mutex around a shared context.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::DecodeError;

/// One native execution context able to unarchive attributed strings.
pub trait NativeContext: Send {
    /// Unarchive a base64-encoded blob.
    ///
    /// Returns the JSON text `{"content": .., "attributes": [..]}` on success
    /// and a human-readable diagnostic otherwise.
    fn decode_attributed_string(&mut self, encoded: &str) -> String;
}

/// Placeholder left inside a lease while its context is being returned.
struct Released;

impl NativeContext for Released {
    fn decode_attributed_string(&mut self, _encoded: &str) -> String {
        "native context already released".to_string()
    }
}

pub struct ContextPool {
    idle: Mutex<Vec<Box<dyn NativeContext>>>,
    available: Condvar,
    size: usize,
}

impl ContextPool {
    pub fn new(contexts: Vec<Box<dyn NativeContext>>) -> Self {
        let size = contexts.len();
        Self {
            idle: Mutex::new(contexts),
            available: Condvar::new(),
            size,
        }
    }

    /// A pool serializing every caller onto one context.
    pub fn single(context: impl NativeContext + 'static) -> Self {
        Self::new(vec![Box::new(context)])
    }

    /// Total number of contexts owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts not currently leased.
    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    /// Take a context, blocking until one is free.
    pub fn acquire(&self) -> Result<ContextLease<'_>, DecodeError> {
        if self.size == 0 {
            return Err(DecodeError::EmptyPool);
        }

        let mut idle = self.lock_idle();
        loop {
            if let Some(context) = idle.pop() {
                return Ok(ContextLease {
                    pool: self,
                    context,
                });
            }
            idle = self
                .available
                .wait(idle)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self, context: Box<dyn NativeContext>) {
        self.lock_idle().push(context);
        self.available.notify_one();
    }

    // A panic while holding the lock cannot corrupt a Vec push/pop, so a
    // poisoned lock is still safe to use.
    fn lock_idle(&self) -> MutexGuard<'_, Vec<Box<dyn NativeContext>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one pooled context, returned to the pool on drop.
pub struct ContextLease<'a> {
    pool: &'a ContextPool,
    context: Box<dyn NativeContext>,
}

impl Deref for ContextLease<'_> {
    type Target = dyn NativeContext;

    fn deref(&self) -> &Self::Target {
        self.context.as_ref()
    }
}

impl DerefMut for ContextLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_mut()
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        let context = std::mem::replace(&mut self.context, Box::new(Released));
        self.pool.release(context);
    }
}

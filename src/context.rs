//! Cancellation and deadline signal threaded through every statement execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::errors::{is_interrupt, DbError, Result};

/// Default number of SQLite VM instructions between cancellation checks.
pub const DEFAULT_PROGRESS_OPS: i32 = 1_000;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// A cheaply cloneable cancellation handle.
///
/// Clones share the same flag: cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that is never done unless cancelled explicitly.
    pub fn background() -> Self {
        Self::build(None)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The reason this context is done, if it is.
    pub fn err(&self) -> Option<DbError> {
        self.inner.state()
    }

    /// Fails if the context fired. Called before every statement execution.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Installs a progress handler on `conn` that interrupts the running
    /// statement once this context is done. The handler is removed when the
    /// returned guard drops.
    pub(crate) fn interruptible<'c>(&self, conn: &'c Connection, ops: i32) -> Interruptible<'c> {
        let inner = Arc::clone(&self.inner);
        conn.progress_handler(ops, Some(move || inner.state().is_some()));
        Interruptible { conn }
    }

    /// Wraps a storage failure, translating interrupts caused by this
    /// context into `Cancelled`/`DeadlineExceeded`.
    pub(crate) fn storage_error(
        &self,
        op: &'static str,
        entity: &'static str,
        err: rusqlite::Error,
    ) -> DbError {
        if is_interrupt(&err) {
            if let Some(reason) = self.err() {
                return reason;
            }
        }
        DbError::storage(op, entity, err)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Inner {
    fn state(&self) -> Option<DbError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Some(DbError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DbError::DeadlineExceeded),
            _ => None,
        }
    }
}

pub(crate) struct Interruptible<'c> {
    conn: &'c Connection,
}

impl Drop for Interruptible<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

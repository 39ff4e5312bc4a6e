//! One-shot latches guarding the boundary.
//!
//! The initialization gate keeps the inbound entry point parked until the
//! router and registry are constructed; the termination gate keeps the
//! process main thread parked until a `Terminate` host command arrives.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Single-use latch. Starts closed; `open` is idempotent and reports whether
/// the call was the one that opened it.
pub struct Gate {
    opened: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub const fn new() -> Self {
        Self {
            opened: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Open the gate, releasing all current and future waiters. Returns
    /// `true` only for the first call.
    pub fn open(&self) -> bool {
        let mut opened = self.opened.lock();
        if *opened {
            return false;
        }
        *opened = true;
        self.cond.notify_all();
        true
    }

    /// Block until the gate is open. Returns immediately if it already is.
    pub fn wait(&self) {
        let mut opened = self.opened.lock();
        while !*opened {
            self.cond.wait(&mut opened);
        }
    }

    /// Block until the gate is open or the timeout elapses. Returns whether
    /// the gate is open.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut opened = self.opened.lock();
        while !*opened {
            if self.cond.wait_until(&mut opened, deadline).timed_out() {
                return *opened;
            }
        }
        true
    }

    pub fn is_open(&self) -> bool {
        *self.opened.lock()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A one way flag that sleeping threads can wait on.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch and wakes every waiter.
    pub fn set(&self) {
        *self.set.lock() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Sleeps until the latch is set or `timeout` elapses.
    ///
    /// # Returns
    /// Whether the latch is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            self.cond.wait_while_for(&mut set, |set| !*set, timeout);
        }
        *set
    }
}

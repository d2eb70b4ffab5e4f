use std::sync::{Condvar, Mutex, PoisonError};
#[cfg(test)]
use std::time::Duration;

/// Single-slot wakeup flag. Any number of `set` calls before a wait
/// collapse into one wakeup.
#[derive(Debug, Default)]
pub struct Semaphore {
    attention: Mutex<bool>,
    signal: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-clear without blocking.
    pub fn is_set(&self) -> bool {
        let mut attention = self.attention.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *attention, false)
    }

    pub fn set(&self) {
        let mut attention = self.attention.lock().unwrap_or_else(PoisonError::into_inner);
        *attention = true;
        self.signal.notify_all();
    }

    /// Block until set, then clear.
    pub fn wait_for_set(&self) {
        let mut attention = self.attention.lock().unwrap_or_else(PoisonError::into_inner);
        while !*attention {
            attention = self.signal.wait(attention).unwrap_or_else(PoisonError::into_inner);
        }
        *attention = false;
    }

    /// Like [`wait_for_set`](Self::wait_for_set) but gives up after `timeout`.
    /// Returns whether the flag was observed (and cleared).
    #[cfg(test)]
    fn wait_for_set_timeout(&self, timeout: Duration) -> bool {
        let attention = self.attention.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut attention, _) = self
            .signal
            .wait_timeout_while(attention, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *attention, false)
    }
}

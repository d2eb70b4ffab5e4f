use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

/// Initial ring capacity. The ring grows on demand and never drops entries.
pub const INITIAL_CAPACITY: usize = 32;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    running: bool,
}

/// Blocking FIFO shared by producers (client threads) and consumers
/// (pool workers). Duplicate entries are allowed.
#[derive(Debug)]
pub struct PendingQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(INITIAL_CAPACITY),
                running: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append and wake every waiting consumer.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.items.push_back(item);
        self.available.notify_all();
    }

    /// Block until an item is available or the queue stops running.
    /// Returns `None` once stopped, even if items remain.
    pub fn next(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !state.running {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            state = self.available.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn start(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).running = true;
    }

    /// Flip the running flag off and wake every consumer so it can exit.
    #[cfg(test)]
    fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        self.available.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).running
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }
}

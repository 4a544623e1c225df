use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::SensorSnapshot;

/// Five minutes of samples at 1 Hz.
pub const HISTORY_CAPACITY: usize = 300;

/// Bounded, time-ordered window of snapshots, oldest first.
///
/// Writers take the lock for append + evict. Readers only hold it long
/// enough to clone an `Arc` to the current contents, so a reader never
/// waits behind a slow hardware pass; the next append copies the buffer
/// if a reader still holds the old one.
#[derive(Clone)]
pub struct ThermalHistory {
    capacity: usize,
    inner: Arc<Mutex<Arc<VecDeque<SensorSnapshot>>>>,
}

impl Default for ThermalHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Arc::new(Mutex::new(Arc::new(VecDeque::with_capacity(capacity)))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<VecDeque<SensorSnapshot>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds to the tail, evicting from the head once over capacity.
    pub fn append(&self, snapshot: SensorSnapshot) {
        let mut guard = self.lock();
        let buf = Arc::make_mut(&mut guard);
        buf.push_back(snapshot);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// The current contents, shared with the buffer until the next append.
    pub fn snapshot(&self) -> Arc<VecDeque<SensorSnapshot>> {
        Arc::clone(&self.lock())
    }

    /// The last `n` entries, oldest first (fewer if the history is shorter).
    pub fn recent(&self, n: usize) -> Vec<SensorSnapshot> {
        let buf = self.snapshot();
        let skip = buf.len().saturating_sub(n);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<SensorSnapshot> {
        self.snapshot().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

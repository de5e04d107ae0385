use std::collections::{HashMap, VecDeque};

/// Per-directory FIFO queues with an "active worker" marker per key.
///
/// A key is present while a worker owns it. [`PathLock::enqueue`] reports
/// when a new worker must be started; [`PathLock::next`] retires the key
/// once its queue is empty. All calls happen under the scheduler's mutex,
/// so the retire decision and a concurrent enqueue can never interleave.
#[derive(Debug)]
pub struct PathLock<T> {
    queues: HashMap<String, VecDeque<T>>,
}

impl<T> Default for PathLock<T> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }
}

impl<T: PartialEq> PathLock<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an item. Returns `true` if no worker owns `key` yet.
    pub fn enqueue(&mut self, key: &str, item: T) -> bool {
        match self.queues.get_mut(key) {
            Some(queue) => {
                queue.push_back(item);
                false
            }
            None => {
                self.queues.insert(key.to_string(), VecDeque::from([item]));
                true
            }
        }
    }

    /// Pop the next item for `key`. `None` retires the key.
    pub fn next(&mut self, key: &str) -> Option<T> {
        let queue = self.queues.get_mut(key)?;
        match queue.pop_front() {
            Some(item) => Some(item),
            None => {
                self.queues.remove(key);
                None
            }
        }
    }

    /// Remove a still-queued item. The key stays owned by its worker.
    pub fn remove(&mut self, key: &str, item: &T) -> Option<T> {
        let queue = self.queues.get_mut(key)?;
        let index = queue.iter().position(|queued| queued == item)?;
        queue.remove(index)
    }

    /// Take every queued item, leaving workers to retire on their next pop.
    pub fn drain_queued(&mut self) -> Vec<T> {
        self.queues
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }

    /// Number of keys currently owned by a worker.
    pub fn active_keys(&self) -> usize {
        self.queues.len()
    }

    /// Number of items waiting behind `key`'s worker.
    pub fn queued_len(&self, key: &str) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }
}

// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;

use crate::job_engine::job::AffinityKey;

/// Bounded, insertion-ordered set of keys watched by one worker.
///
/// Eviction is FIFO: the key inserted first leaves first, regardless of how
/// often it was used since.
#[derive(Debug, Clone)]
pub struct AffinitySet {
    keys: VecDeque<AffinityKey>,
    capacity: usize,
}

impl AffinitySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &AffinityKey) -> bool {
        self.keys.contains(key)
    }

    /// Starts watching `key` and returns the key that had to make room, if any.
    /// Watching a key that is already present changes nothing.
    pub fn watch(&mut self, key: AffinityKey) -> Option<AffinityKey> {
        if self.capacity == 0 || self.keys.contains(&key) {
            return None;
        }
        self.keys.push_back(key);
        if self.keys.len() > self.capacity {
            self.keys.pop_front()
        } else {
            None
        }
    }

    /// Keys from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &AffinityKey> {
        self.keys.iter()
    }
}

//! Sliding-window traffic counters.
//!
//! A [`SlidingWindow`] keeps a fixed-length ring of [`CounterSet`] buckets,
//! one per rotation period, together with a running cumulative sum over all
//! live buckets. Mutations land in both the cumulative sum and the current
//! bucket, so expiring the oldest bucket is a single subtraction from the sum
//! instead of a re-sum over the whole window.

use std::{collections::HashMap, num::NonZeroUsize, sync::Mutex};

use thiserror::Error;

/// Errors raised by window operations.
///
/// Both variants indicate an internal defect rather than a recoverable runtime
/// condition: neither can occur when `mutate` and `rotate` are the only
/// writers. Callers are expected to treat them as fatal for the affected
/// window.
#[derive(Debug, Error)]
pub enum StatsError {
    /// An expiring bucket held a key that was absent from the cumulative sum.
    /// Every key in a bucket was added to the sum by the same mutation, so
    /// this means the sum and buckets have diverged.
    #[error("consistency violation: key '{0}' missing from cumulative sum")]
    MissingKey(String),

    /// A writer panicked while holding the window lock, leaving the counters
    /// in an unknown state.
    #[error("window lock poisoned by a panicked writer")]
    Poisoned,
}

/// A set of named counters for one slice of traffic.
///
/// Keys with a net count of zero are pruned immediately, so the live key set
/// is exactly the categories with nonzero activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterSet {
    counts: HashMap<String, i64>,
}

impl CounterSet {
    /// Creates an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the count for `key`, creating the entry if absent and
    /// removing it if the result is zero.
    pub fn add(&mut self, key: &str, delta: i64) {
        let total = self.get(key) + delta;
        if total == 0 {
            self.counts.remove(key);
        } else {
            self.counts.insert(key.to_string(), total);
        }
    }

    /// Returns the count for `key`, or zero if absent.
    pub fn get(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Returns true when no key has a nonzero count.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterates over the live keys and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counts.iter().map(|(key, count)| (key.as_str(), *count))
    }

    /// Subtracts every count in `expired` from this set, pruning keys whose
    /// count reaches zero.
    ///
    /// Every key in `expired` must already be present here; an absent key is a
    /// broken bookkeeping invariant and is reported as
    /// [`StatsError::MissingKey`].
    pub fn subtract(&mut self, expired: &CounterSet) -> Result<(), StatsError> {
        for (key, &value) in &expired.counts {
            match self.counts.get(key) {
                Some(&current) => {
                    let difference = current - value;
                    if difference == 0 {
                        self.counts.remove(key);
                    } else {
                        self.counts.insert(key.clone(), difference);
                    }
                }
                None => return Err(StatsError::MissingKey(key.clone())),
            }
        }
        Ok(())
    }
}

/// State behind the window lock: the bucket ring, the cursor marking the
/// current bucket, and the running sum over all buckets.
#[derive(Debug)]
struct Ring {
    buckets: Vec<CounterSet>,
    cursor: usize,
    sum: CounterSet,
}

/// A fixed-capacity ring of counter buckets with a cumulative sum.
///
/// One instance is one unit of mutual exclusion: `mutate`, `rotate`, and the
/// locked reads all serialize on the same internal mutex, held only for the
/// duration of the operation and never across an await point.
#[derive(Debug)]
pub struct SlidingWindow {
    inner: Mutex<Ring>,
}

impl SlidingWindow {
    /// Creates a window of `capacity` empty buckets with an empty sum.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                buckets: vec![CounterSet::new(); capacity.get()],
                cursor: 0,
                sum: CounterSet::new(),
            }),
        }
    }

    /// Applies `f` to both the cumulative sum and the current bucket, under
    /// the window lock.
    ///
    /// This is the only write path into the window; callers express mutations
    /// as closures over a [`CounterSet`].
    pub fn mutate(&self, f: impl Fn(&mut CounterSet)) -> Result<(), StatsError> {
        let mut ring = self.inner.lock().map_err(|_| StatsError::Poisoned)?;
        f(&mut ring.sum);
        let cursor = ring.cursor;
        f(&mut ring.buckets[cursor]);
        Ok(())
    }

    /// Expires the oldest bucket and makes it the new current bucket.
    ///
    /// The next bucket in circular order is the oldest one. Its contents are
    /// subtracted from the cumulative sum and replaced with a fresh empty set,
    /// keeping the sum correct over the window at O(1) amortized cost.
    pub fn rotate(&self) -> Result<(), StatsError> {
        let mut ring = self.inner.lock().map_err(|_| StatsError::Poisoned)?;
        let next = (ring.cursor + 1) % ring.buckets.len();
        let expired = std::mem::take(&mut ring.buckets[next]);
        ring.sum.subtract(&expired)?;
        ring.cursor = next;
        Ok(())
    }

    /// Locked read of a single cumulative count.
    pub fn get(&self, key: &str) -> Result<i64, StatsError> {
        let ring = self.inner.lock().map_err(|_| StatsError::Poisoned)?;
        Ok(ring.sum.get(key))
    }

    /// Locked copy of the full cumulative sum.
    pub fn snapshot(&self) -> Result<CounterSet, StatsError> {
        let ring = self.inner.lock().map_err(|_| StatsError::Poisoned)?;
        Ok(ring.sum.clone())
    }
}

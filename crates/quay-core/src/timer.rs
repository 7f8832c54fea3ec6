//! Timers that fire on an event-loop context.
//!
//! Provides one-shot and periodic timers. The owning event loop asks the
//! manager how long it may sleep, then collects expired timers and runs
//! their callbacks on the loop thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a timer.
    pub struct TimerId;
}

/// Callback invoked when a timer fires. Receives the id of the timer.
pub type TimerCallback = Box<dyn FnMut(TimerId) + Send + 'static>;

/// The type of timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once after the specified duration.
    OneShot,
    /// Fires repeatedly at the specified interval.
    Periodic,
}

struct TimerData {
    next_fire: Instant,
    interval: Duration,
    kind: TimerKind,
    /// Taken out while the callback runs, put back for periodic timers.
    callback: Option<TimerCallback>,
}

/// An entry in the timer queue (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

/// A timer whose deadline has passed, ready to be run by the event loop.
pub(crate) struct ExpiredTimer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub callback: TimerCallback,
}

/// Manages the timers of one event loop.
pub struct TimerManager {
    timers: SlotMap<TimerId, TimerData>,
    queue: BinaryHeap<TimerQueueEntry>,
}

impl TimerManager {
    /// Create a new timer manager.
    pub fn new() -> Self {
        Self {
            timers: SlotMap::with_key(),
            queue: BinaryHeap::new(),
        }
    }

    /// Start a one-shot timer that fires after `delay`.
    pub fn start_one_shot(&mut self, delay: Duration, callback: TimerCallback) -> TimerId {
        self.insert(delay, TimerKind::OneShot, callback)
    }

    /// Start a periodic timer. The first fire occurs after `interval`.
    pub fn start_periodic(&mut self, interval: Duration, callback: TimerCallback) -> TimerId {
        self.insert(interval, TimerKind::Periodic, callback)
    }

    fn insert(&mut self, interval: Duration, kind: TimerKind, callback: TimerCallback) -> TimerId {
        let next_fire = Instant::now() + interval;
        let id = self.timers.insert(TimerData {
            next_fire,
            interval,
            kind,
            callback: Some(callback),
        });
        self.queue.push(TimerQueueEntry {
            id,
            fire_time: next_fire,
        });
        tracing::trace!(target: targets::TIMER, ?id, ?kind, ?interval, "timer armed");
        id
    }

    /// Cancel a timer. Returns `true` if the timer existed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(id).is_some()
    }

    /// Check if a timer is still armed.
    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(id)
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Get the duration until the next timer fires, if any.
    pub fn time_until_next(&mut self) -> Option<Duration> {
        // Drop cancelled timers from the front of the queue.
        while let Some(entry) = self.queue.peek() {
            if self.timers.contains_key(entry.id) {
                break;
            }
            self.queue.pop();
        }

        self.queue
            .peek()
            .map(|entry| entry.fire_time.saturating_duration_since(Instant::now()))
    }

    /// Collect every timer whose deadline has passed.
    ///
    /// One-shot timers are removed. Periodic timers are re-armed, but their
    /// callback is handed out and must come back through [`Self::restore`].
    pub(crate) fn take_expired(&mut self) -> Vec<ExpiredTimer> {
        let now = Instant::now();
        let mut expired = Vec::new();

        while let Some(entry) = self.queue.peek().copied() {
            if entry.fire_time > now {
                break;
            }
            self.queue.pop();

            let Some(timer) = self.timers.get_mut(entry.id) else {
                continue;
            };
            // Stale entry left behind by an earlier re-arm.
            if timer.next_fire != entry.fire_time {
                continue;
            }
            let Some(callback) = timer.callback.take() else {
                continue;
            };

            tracing::trace!(target: targets::TIMER, id = ?entry.id, "timer fired");
            let kind = timer.kind;
            match kind {
                TimerKind::OneShot => {
                    self.timers.remove(entry.id);
                }
                TimerKind::Periodic => {
                    timer.next_fire = now + timer.interval;
                    self.queue.push(TimerQueueEntry {
                        id: entry.id,
                        fire_time: timer.next_fire,
                    });
                }
            }

            expired.push(ExpiredTimer {
                id: entry.id,
                kind,
                callback,
            });
        }

        expired
    }

    /// Hand a periodic timer's callback back after it ran.
    ///
    /// Does nothing if the timer was cancelled in the meantime.
    pub(crate) fn restore(&mut self, id: TimerId, callback: TimerCallback) {
        if let Some(timer) = self.timers.get_mut(id) {
            timer.callback = Some(callback);
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("active", &self.timers.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// A thread-safe wrapper around `TimerManager`, shared by a loop and its contexts.
#[derive(Default)]
pub(crate) struct SharedTimerManager {
    inner: Mutex<TimerManager>,
}

impl SharedTimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_one_shot(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        self.inner.lock().start_one_shot(delay, callback)
    }

    pub fn start_periodic(&self, interval: Duration, callback: TimerCallback) -> TimerId {
        self.inner.lock().start_periodic(interval, callback)
    }

    pub fn cancel(&self, id: TimerId) -> bool {
        self.inner.lock().cancel(id)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.inner.lock().is_active(id)
    }

    pub fn time_until_next(&self) -> Option<Duration> {
        self.inner.lock().time_until_next()
    }

    pub fn take_expired(&self) -> Vec<ExpiredTimer> {
        self.inner.lock().take_expired()
    }

    pub fn restore(&self, id: TimerId, callback: TimerCallback) {
        self.inner.lock().restore(id, callback)
    }
}

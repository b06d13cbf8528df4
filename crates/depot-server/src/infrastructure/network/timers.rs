//! Interval timers that enqueue `Event::Timer` instead of calling nodes.
//!
//! The event core runs on a plain OS thread, so timers are spawned through
//! a captured tokio [`Handle`] rather than the ambient runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::application::events::{Event, EventSender, NodeId, TimerId};
use crate::application::ports::TimerScheduler;

/// Shortest interval accepted; zero would spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct TimerService {
    runtime: Handle,
    events: EventSender,
    // 0 is TimerId::WAKE
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl TimerService {
    pub fn new(runtime: Handle, events: EventSender) -> Self {
        Self {
            runtime,
            events,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TimerScheduler for TimerService {
    fn schedule_interval(&self, node: NodeId, period: Duration) -> TimerId {
        let timer = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let events = self.events.clone();
        let period = period.max(MIN_INTERVAL);

        let task = self.runtime.spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if events.send(Event::Timer { node, timer }).is_err() {
                    break;
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(timer, task);
        debug!("timer {timer:?} every {period:?} for {node:?}");
        timer
    }

    fn cancel(&self, timer: TimerId) {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&timer);
        if let Some(task) = removed {
            task.abort();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use std::sync::Mutex;
use std::time::{Duration, Instant};

use porter_common::protocol::{Notification, ProgressNotification};

use crate::rpc::Conn;

/// Turns byte counts into throttled `Operation.Progress` notifications.
pub struct ProgressTracker<'a> {
    conn: &'a dyn Conn,
    interval: Duration,
    started: Instant,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(conn: &'a dyn Conn, interval: Duration) -> Self {
        Self {
            conn,
            interval,
            started: Instant::now(),
            last_emit: Mutex::new(None),
        }
    }

    /// Reports `done` out of `total` bytes, unless the previous report is
    /// more recent than the interval. Completion is always reported.
    pub fn update(&self, done: u64, total: Option<u64>) {
        let now = Instant::now();
        let complete = total.is_some_and(|t| done >= t);
        {
            let mut last = match self.last_emit.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(prev) = *last {
                if !complete && now.duration_since(prev) < self.interval {
                    return;
                }
            }
            *last = Some(now);
        }
        self.conn.notify(Notification::Progress(estimate(
            done,
            total,
            now.duration_since(self.started),
        )));
    }

    pub fn finish(&self) {
        self.conn.notify(Notification::Progress(ProgressNotification {
            progress: 1.0,
            eta: 0.0,
            bps: 0.0,
        }));
    }
}

pub fn estimate(done: u64, total: Option<u64>, elapsed: Duration) -> ProgressNotification {
    let secs = elapsed.as_secs_f64();
    let bps = if secs > 0.0 { done as f64 / secs } else { 0.0 };
    let (progress, eta) = match total {
        Some(total) if total > 0 => {
            let progress = (done as f64 / total as f64).clamp(0.0, 1.0);
            let remaining = total.saturating_sub(done) as f64;
            let eta = if bps > 0.0 { remaining / bps } else { 0.0 };
            (progress, eta)
        }
        _ => (0.0, 0.0),
    };
    ProgressNotification { progress, eta, bps }
}

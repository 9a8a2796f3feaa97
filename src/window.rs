use crate::prelude::*;

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Flushing,
    Closed,
}

/// One upload interval worth of telemetry, reduced to its latest sample.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub latest_sample: TelemetryFrame,
    pub sample_count: u64,
    state: WindowState,
}

impl UploadWindow {
    fn open(window_start: DateTime<Utc>, interval: TimeDelta, sample: TelemetryFrame) -> Self {
        Self {
            window_start,
            window_end: window_start + interval,
            latest_sample: sample,
            sample_count: 1,
            state: WindowState::Open,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn close(&mut self) {
        self.state = WindowState::Closed;
    }

    fn push(&mut self, sample: TelemetryFrame) {
        self.latest_sample.merge(sample);
        self.sample_count += 1;
    }

    fn flushing(mut self) -> Self {
        self.state = WindowState::Flushing;
        self
    }
}

/// Buckets telemetry into epoch-aligned windows of a fixed length.
#[derive(Debug)]
pub struct WindowAggregator {
    interval: TimeDelta,
    current: Option<UploadWindow>,
}

impl WindowAggregator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: to_delta(interval),
            current: None,
        }
    }

    pub fn current(&self) -> Option<&UploadWindow> {
        self.current.as_ref()
    }

    /// Adds a sample received at `at`. If the open window ended before `at`
    /// and its flush has not happened yet, that window is closed and
    /// returned so the caller can hand it on.
    pub fn ingest(&mut self, sample: TelemetryFrame, at: DateTime<Utc>) -> Option<UploadWindow> {
        let stale = if self.current.as_ref().is_some_and(|w| w.window_end <= at) {
            self.current.take().map(UploadWindow::flushing)
        } else {
            None
        };

        match self.current.as_mut() {
            Some(window) => window.push(sample),
            None => {
                let start = align_down(at, self.interval);
                trace!("opening window at {}", start);
                self.current = Some(UploadWindow::open(start, self.interval, sample));
            }
        }

        stale
    }

    /// Closes the open window if it ends at or before `boundary`.
    pub fn flush(&mut self, boundary: DateTime<Utc>) -> Option<UploadWindow> {
        if !self.current.as_ref().is_some_and(|w| w.window_end <= boundary) {
            return None;
        }

        self.current
            .take()
            .filter(|w| !w.is_empty())
            .map(UploadWindow::flushing)
    }
}

/// Wall-clock flush timer. Boundaries are multiples of the interval since
/// the Unix epoch, so they never drift with how late a tick is handled.
#[derive(Debug)]
pub struct FlushSchedule {
    interval: TimeDelta,
    next: DateTime<Utc>,
}

impl FlushSchedule {
    pub fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        let interval = to_delta(interval);

        Self {
            interval,
            next: align_down(now, interval) + interval,
        }
    }

    pub fn next(&self) -> DateTime<Utc> {
        self.next
    }

    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns the boundary that is due and moves on to the following one.
    /// Boundaries missed entirely (suspend, clock jump) are skipped.
    pub fn advance(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let due = self.next;
        self.next = due + self.interval;

        if self.next <= now {
            let next = align_down(now, self.interval) + self.interval;
            let missed = (next - self.next).num_seconds() / self.interval.num_seconds().max(1);
            warn!("flush timer fell behind, skipping {} boundaries", missed);
            self.next = next;
        }

        due
    }
}

fn to_delta(interval: Duration) -> TimeDelta {
    TimeDelta::seconds(interval.as_secs().max(1) as i64)
}

pub fn align_down(at: DateTime<Utc>, interval: TimeDelta) -> DateTime<Utc> {
    let secs = interval.num_seconds().max(1);
    let aligned = at.timestamp().div_euclid(secs) * secs;

    DateTime::from_timestamp(aligned, 0).unwrap_or(at)
}

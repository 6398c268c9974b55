//! Status snapshot of a supervised process

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Lifecycle of a supervisor: `NotStarted -> Started -> (Stopping) -> Done`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    NotStarted,
    Started,
    Stopping,
    Done,
}

/// Which stop request terminated the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit `stop()` call
    Requested,
    /// Deadline elapsed
    Deadline,
}

/// Bounded line buffer; the oldest line is dropped when full
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    #[serde(skip)]
    capacity: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Point-in-time view of one supervised process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Registry key
    pub name: String,
    /// 0 until the process has been spawned
    pub pid: u32,
    pub lifecycle: Lifecycle,
    /// True only when the process exited on its own
    pub complete: bool,
    /// -1 until the process has exited, and for signal-terminated processes
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stop_reason: Option<StopReason>,
    pub failure: Option<Failure>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the process has been reaped
    pub stopped_at: Option<DateTime<Utc>>,
    pub runtime_seconds: f64,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
}

impl Status {
    pub fn new(name: impl Into<String>, buffer_lines: usize) -> Self {
        Self {
            name: name.into(),
            pid: 0,
            lifecycle: Lifecycle::NotStarted,
            complete: false,
            exit_code: -1,
            signal: None,
            stop_reason: None,
            failure: None,
            started_at: None,
            stopped_at: None,
            runtime_seconds: 0.0,
            stdout: OutputBuffer::with_capacity(buffer_lines),
            stderr: OutputBuffer::with_capacity(buffer_lines),
        }
    }

    /// Whether the status is terminal
    pub fn is_final(&self) -> bool {
        self.lifecycle == Lifecycle::Done
    }

    /// Finalized without a failure: exit code 0 or an intentional stop
    pub fn is_success(&self) -> bool {
        self.is_final() && self.failure.is_none()
    }

    /// Stamp `stopped_at` and derive the runtime from the two timestamps
    pub(crate) fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.stopped_at = Some(at);
        self.runtime_seconds = match self.started_at {
            Some(started) => seconds_between(started, at),
            None => 0.0,
        };
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end - start;
    match elapsed.num_microseconds() {
        Some(us) => us.max(0) as f64 / 1_000_000.0,
        None => elapsed.num_milliseconds().max(0) as f64 / 1000.0,
    }
}

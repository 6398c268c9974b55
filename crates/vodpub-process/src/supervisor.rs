//! Lifecycle driver for one supervised process
//!
//! A started supervisor runs three tasks: the waiter, which owns the
//! [`ProcessHandle`] and reaps the child, and one drain per output stream.
//! Every path that can end the process (natural exit, `stop()`, deadline,
//! start failure) goes through the same per-process lock and checks
//! [`Lifecycle::Done`] before touching the status, so the first one wins and
//! the rest are no-ops.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;
use crate::config::SupervisorConfig;
use crate::error::{Failure, Result, SupervisorError};
use crate::exit::ExitReason;
use crate::handle::ProcessHandle;
use crate::status::{Lifecycle, Status, StopReason};

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct State {
    status: Status,
    /// Monotonic start instant, the origin of the deadline
    started: Option<Instant>,
}

#[derive(Debug)]
struct Shared {
    name: String,
    config: SupervisorConfig,
    state: Mutex<State>,
    stop: CancellationToken,
    done: watch::Sender<bool>,
}

/// Supervisor for a single named process
///
/// Cloning is cheap; clones drive the same process.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        let name = name.into();
        let status = Status::new(name.clone(), config.output_buffer_lines);
        let (done, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                name,
                config,
                state: Mutex::new(State {
                    status,
                    started: None,
                }),
                stop: CancellationToken::new(),
                done,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the process and begin supervising it
    ///
    /// Returns the pid. A launch error finalizes the status with a
    /// [`FailureKind::StartFailure`](crate::FailureKind::StartFailure) and is
    /// also returned here. Must be called within a tokio runtime.
    pub async fn start(&self, spec: CommandSpec) -> Result<u32> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if state.status.lifecycle != Lifecycle::NotStarted {
            return Err(SupervisorError::AlreadyStarted {
                name: shared.name.clone(),
            });
        }

        let mut handle = match ProcessHandle::spawn(&spec) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(name = %shared.name, command = %spec, error = %err, "Failed to start process");
                state.status.failure = Some(Failure::from(&err));
                state.status.lifecycle = Lifecycle::Done;
                drop(state);
                shared.done.send_replace(true);
                return Err(err);
            }
        };

        let pid = handle.pid();
        state.status.pid = pid;
        state.status.started_at = Some(Utc::now());
        state.status.lifecycle = Lifecycle::Started;
        state.started = Some(Instant::now());
        drop(state);

        info!(name = %shared.name, pid = %pid, command = %spec, "Process started");

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = handle.take_stdout() {
            drains.push(tokio::spawn(drain(shared.clone(), stdout, OutputStream::Stdout)));
        }
        if let Some(stderr) = handle.take_stderr() {
            drains.push(tokio::spawn(drain(shared.clone(), stderr, OutputStream::Stderr)));
        }

        tokio::spawn(supervise(shared.clone(), handle, drains));

        Ok(pid)
    }

    /// Wait until the process has been reaped and its output drained
    ///
    /// A non-zero `deadline`, measured from the start, stops the process when
    /// it elapses. The deadline timer lives only as long as this call. On a
    /// supervisor that was never started the current snapshot is returned
    /// right away.
    pub async fn run_until(&self, deadline: Option<Duration>) -> Status {
        let mut done = self.shared.done.subscribe();

        let started = {
            let state = self.shared.state.lock();
            if state.status.lifecycle == Lifecycle::NotStarted {
                return state.status.clone();
            }
            state.started
        };

        let deadline = deadline
            .filter(|d| !d.is_zero())
            .zip(started)
            .map(|(d, started)| started + d);

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = wait_done(&mut done) => {}
                    _ = tokio::time::sleep_until(at) => {
                        if self.shared.request_stop(StopReason::Deadline) {
                            info!(name = %self.shared.name, "Deadline reached, stopping process");
                        }
                        wait_done(&mut done).await;
                    }
                }
            }
            None => wait_done(&mut done).await,
        }

        self.status()
    }

    /// Wait for the process without a deadline
    pub async fn wait(&self) -> Status {
        self.run_until(None).await
    }

    /// Request a forced stop
    ///
    /// Returns immediately; the waiter delivers the signal and reaps the
    /// child. Returns `true` only for the call that made the request; later
    /// calls, or calls after the process exited, do nothing. `true` means the
    /// stop was requested, not that it ended the process: if the process
    /// exits on its own before the signal lands, the natural exit is what the
    /// final status records (`stop_reason = None`).
    pub fn stop(&self) -> bool {
        self.shared.request_stop(StopReason::Requested)
    }

    /// Consistent snapshot of the current status
    pub fn status(&self) -> Status {
        self.shared.state.lock().status.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.lock().status.lifecycle
    }
}

impl Shared {
    fn request_stop(&self, reason: StopReason) -> bool {
        let mut state = self.state.lock();

        match state.status.lifecycle {
            Lifecycle::NotStarted => {
                state.status.stop_reason = Some(reason);
                state.status.lifecycle = Lifecycle::Done;
                drop(state);
                self.done.send_replace(true);
                debug!(name = %self.name, "Stopped before start");
                true
            }
            Lifecycle::Started => {
                state.status.stop_reason = Some(reason);
                state.status.lifecycle = Lifecycle::Stopping;
                drop(state);
                self.stop.cancel();
                debug!(name = %self.name, reason = ?reason, "Stop requested");
                true
            }
            Lifecycle::Stopping | Lifecycle::Done => false,
        }
    }

    /// Freeze the status; a no-op if another path already finalized it
    fn finalize(&self, exit: io::Result<ExitStatus>, own_stop: bool, stopped_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.status.lifecycle == Lifecycle::Done {
            return;
        }

        let status = &mut state.status;
        match exit {
            Ok(exit) => {
                let reason = ExitReason::from_status(exit);
                status.exit_code = reason.exit_code();
                status.signal = reason.signal();

                if own_stop {
                    status.complete = false;
                    if status.stop_reason.is_none() {
                        status.stop_reason = Some(StopReason::Requested);
                    }
                } else {
                    // Exited before any stop signal landed; natural exit wins
                    status.stop_reason = None;
                    status.complete = matches!(reason, ExitReason::Exited(_));
                    status.failure = match reason {
                        ExitReason::Exited(0) => None,
                        ExitReason::Exited(code) => runtime_failure(format!("exited with code {}", code)),
                        ExitReason::Signaled(signal) => {
                            runtime_failure(format!("terminated by signal {}", signal))
                        }
                        ExitReason::Unknown => runtime_failure("exited without a code or signal".into()),
                    };
                }
            }
            Err(e) => {
                status.stop_reason = None;
                status.failure = runtime_failure(format!("failed to wait for process: {}", e));
            }
        }

        status.mark_stopped(stopped_at);
        status.lifecycle = Lifecycle::Done;

        if let Some(failure) = &status.failure {
            warn!(name = %self.name, pid = %status.pid, error = %failure, "Process failed");
        }
        info!(
            name = %self.name,
            pid = %status.pid,
            complete = status.complete,
            exit_code = status.exit_code,
            runtime_seconds = status.runtime_seconds,
            "Process finalized"
        );

        drop(state);
        self.done.send_replace(true);
    }

    fn push_line(&self, stream: OutputStream, line: String) {
        let mut state = self.state.lock();
        match stream {
            OutputStream::Stdout => state.status.stdout.push(line),
            OutputStream::Stderr => state.status.stderr.push(line),
        }
    }
}

/// Waiter task: owns the handle until the child is reaped
async fn supervise(shared: Arc<Shared>, mut handle: ProcessHandle, drains: Vec<JoinHandle<()>>) {
    let exit = tokio::select! {
        result = handle.wait() => result,
        _ = shared.stop.cancelled() => {
            handle
                .stop(shared.config.stop_signal, shared.config.kill_grace())
                .await
        }
    };
    let stopped_at = Utc::now();

    let own_stop = match &exit {
        Ok(status) => handle.terminated_by_stop(ExitReason::from_status(*status)),
        Err(_) => false,
    };

    let drain_deadline = Instant::now() + shared.config.drain_timeout();
    for mut drain in drains {
        if tokio::time::timeout_at(drain_deadline, &mut drain).await.is_err() {
            warn!(name = %shared.name, "Output still open after exit, abandoning drain");
            drain.abort();
        }
    }

    shared.finalize(exit, own_stop, stopped_at);
}

/// Drain task: append each line of `reader` to the status as it arrives
async fn drain<R>(shared: Arc<Shared>, reader: R, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                shared.push_line(stream, String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                warn!(name = %shared.name, stream = ?stream, error = %e, "Failed to read process output");
                break;
            }
        }
    }

    debug!(name = %shared.name, stream = ?stream, "Output drained");
}

fn runtime_failure(reason: String) -> Option<Failure> {
    Some(Failure::from(&SupervisorError::RuntimeFailure { reason }))
}

async fn wait_done(done: &mut watch::Receiver<bool>) {
    let _ = done.wait_for(|done| *done).await;
}

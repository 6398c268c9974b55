//! Wrapper around one live OS process

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::config::StopSignal;
use crate::error::{Result, SupervisorError};
use crate::exit::ExitReason;

/// One spawned child process and the output pipes it has not handed out yet
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    /// Signals delivered by [`ProcessHandle::stop`]
    sent_signals: Vec<i32>,
    killed: bool,
}

impl ProcessHandle {
    /// Launch the process described by `spec`
    ///
    /// stdin is closed; stdout and stderr are piped. On unix the child leads
    /// its own process group so a stop reaches everything it forked.
    pub fn spawn(spec: &CommandSpec) -> Result<Self> {
        debug!(command = %spec, "Spawning process");

        let mut cmd = Command::new(spec.program());
        cmd.args(spec.args())
            .envs(spec.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = spec.working_dir() {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let start_failure = |source: io::Error| SupervisorError::StartFailure {
            program: spec.program().to_string(),
            source,
        };

        let mut child = cmd.spawn().map_err(start_failure)?;
        let pid = child
            .id()
            .ok_or_else(|| start_failure(io::Error::other("process exited before reporting a pid")))?;

        Ok(Self {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            pid,
            sent_signals: Vec::new(),
            killed: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take stdout handle
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take stderr handle
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to exit and reap it
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcibly terminate the process and reap it
    ///
    /// With [`StopSignal::Terminate`] the process gets SIGTERM and `grace` to
    /// exit before SIGKILL. Nothing is signalled once the child is reaped.
    pub async fn stop(&mut self, policy: StopSignal, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            debug!(pid = %self.pid, "Process already exited, nothing to stop");
            return Ok(status);
        }

        if policy == StopSignal::Terminate {
            self.terminate();
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(result) => return result,
                Err(_) => debug!(pid = %self.pid, "Grace period elapsed, escalating to SIGKILL"),
            }
        }

        self.kill()?;
        self.child.wait().await
    }

    /// Whether the exit followed a stop signal this handle delivered
    ///
    /// A process that catches SIGTERM and exits with a code (ffmpeg exits
    /// 255) still counts as stopped. Death by any signal we did not send
    /// does not.
    pub fn terminated_by_stop(&self, reason: ExitReason) -> bool {
        if !self.killed {
            return false;
        }

        #[cfg(unix)]
        let own_signal = match reason {
            ExitReason::Signaled(signal) => self.sent_signals.contains(&signal),
            ExitReason::Exited(_) | ExitReason::Unknown => true,
        };

        // Windows reports a killed process as an ordinary exit code
        #[cfg(not(unix))]
        let own_signal = {
            let _ = reason;
            true
        };

        own_signal
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {}

    #[cfg(unix)]
    fn kill(&mut self) -> io::Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        Ok(())
    }

    #[cfg(not(unix))]
    fn kill(&mut self) -> io::Result<()> {
        self.killed = true;
        self.child.start_kill()
    }

    /// Signal the process group, falling back to the process alone
    #[cfg(unix)]
    fn signal_group(&mut self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.pid as i32);
        self.sent_signals.push(signal as i32);
        self.killed = true;

        match killpg(pid, signal) {
            Ok(()) => debug!(pid = %self.pid, signal = %signal, "Signalled process group"),
            Err(e) => {
                warn!(pid = %self.pid, signal = %signal, error = %e, "Failed to signal process group, trying process only");
                if let Err(e) = kill(pid, signal) {
                    warn!(pid = %self.pid, signal = %signal, error = %e, "Failed to signal process");
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec::new(program, args.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_reports_pid_and_pipes() {
        let mut handle = ProcessHandle::spawn(&spec("echo", &["hello"])).unwrap();
        assert!(handle.pid() > 0);

        // Held until after wait so echo never writes into a closed pipe
        let stdout = handle.take_stdout();
        let stderr = handle.take_stderr();
        assert!(stdout.is_some());
        assert!(stderr.is_some());
        assert!(handle.take_stdout().is_none());
        assert!(handle.take_stderr().is_none());

        let status = handle.wait().await.unwrap();
        drop((stdout, stderr));
        assert_eq!(ExitReason::from_status(status), ExitReason::Exited(0));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = ProcessHandle::spawn(&spec("/nonexistent/vodpub-encoder", &[])).unwrap_err();
        assert!(matches!(err, SupervisorError::StartFailure { .. }));
    }

    #[tokio::test]
    async fn test_kill_is_recognised_as_own_stop() {
        let mut handle = ProcessHandle::spawn(&spec("sleep", &["10"])).unwrap();
        let status = handle.stop(StopSignal::Kill, Duration::ZERO).await.unwrap();
        let reason = ExitReason::from_status(status);

        assert_eq!(reason, ExitReason::Signaled(9));
        assert!(handle.terminated_by_stop(reason));
    }

    #[tokio::test]
    async fn test_terminate_exits_within_grace() {
        let mut handle = ProcessHandle::spawn(&spec("sleep", &["10"])).unwrap();
        let status = handle
            .stop(StopSignal::Terminate, Duration::from_secs(5))
            .await
            .unwrap();
        let reason = ExitReason::from_status(status);

        assert_eq!(reason, ExitReason::Signaled(15));
        assert!(handle.terminated_by_stop(reason));
    }

    #[tokio::test]
    async fn test_exit_code_after_sigterm_is_own_stop() {
        let mut handle =
            ProcessHandle::spawn(&spec("sh", &["-c", "trap 'exit 255' TERM; while true; do sleep 0.05; done"]))
                .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = handle
            .stop(StopSignal::Terminate, Duration::from_secs(2))
            .await
            .unwrap();
        let reason = ExitReason::from_status(status);

        assert_eq!(reason, ExitReason::Exited(255));
        assert!(handle.terminated_by_stop(reason));
    }

    #[tokio::test]
    async fn test_stop_after_exit_sends_nothing() {
        let mut handle = ProcessHandle::spawn(&spec("true", &[])).unwrap();
        handle.wait().await.unwrap();

        let status = handle.stop(StopSignal::Kill, Duration::ZERO).await.unwrap();
        let reason = ExitReason::from_status(status);
        assert_eq!(reason, ExitReason::Exited(0));
        assert!(!handle.terminated_by_stop(reason));
    }

    #[tokio::test]
    async fn test_external_signal_is_not_own_stop() {
        let mut handle = ProcessHandle::spawn(&spec("sleep", &["10"])).unwrap();
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(handle.pid() as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();

        let reason = ExitReason::from_status(handle.wait().await.unwrap());
        assert_eq!(reason, ExitReason::Signaled(9));
        assert!(!handle.terminated_by_stop(reason));
    }
}

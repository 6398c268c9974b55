//! Classification of OS exit statuses

use std::process::ExitStatus;

/// How a reaped process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Exited on its own with a code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// Platform reported neither a code nor a signal
    Unknown,
}

impl ExitReason {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;

            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }

        Self::Unknown
    }

    /// Exit code to publish: the real code, or -1 when killed
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(_) | Self::Unknown => -1,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled(signal) => Some(*signal),
            _ => None,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code() {
        let reason = ExitReason::from_status(ExitStatus::from_raw(3 << 8));
        assert_eq!(reason, ExitReason::Exited(3));
        assert_eq!(reason.exit_code(), 3);
        assert_eq!(reason.signal(), None);
    }

    #[test]
    fn test_killed_by_signal() {
        let reason = ExitReason::from_status(ExitStatus::from_raw(Signal::SIGKILL as i32));
        assert_eq!(reason, ExitReason::Signaled(9));
        assert_eq!(reason.exit_code(), -1);
        assert_eq!(reason.signal(), Some(9));
    }
}

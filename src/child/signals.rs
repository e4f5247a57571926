//! Exit analysis for captive children.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Exit code reported for a child that did not exit normally.
///
/// Deliberately outside 0..=255 so it cannot be confused with a real status.
pub const ABNORMAL_EXIT_CODE: i32 = 256;

/// Reason why a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled { signal: Signal, core_dumped: bool },
    /// Wait returned a status that is not a termination.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// The integer status: 0..=255 for a normal exit, [`ABNORMAL_EXIT_CODE`] otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            _ => ABNORMAL_EXIT_CODE,
        }
    }

    /// Status for a wrapping process to exit with, following the shell's
    /// `128 + signal` convention for signal deaths.
    pub fn shell_exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled { signal, .. } => 128 + *signal as i32,
            Self::Unknown => 1,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled {
                signal,
                core_dumped: true,
            } => format!("terminated abnormally by signal {} (core dumped)", signal),
            Self::Signaled { signal, .. } => {
                format!("terminated abnormally by signal {}", signal)
            }
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
///
/// Returns `None` for statuses that do not mean the process is gone
/// (stopped, continued, still alive).
pub fn analyze_wait_status(status: WaitStatus) -> Option<TerminationReason> {
    match status {
        WaitStatus::Exited(_, code) => Some(TerminationReason::Exited(code)),
        WaitStatus::Signaled(_, signal, core_dumped) => Some(TerminationReason::Signaled {
            signal,
            core_dumped,
        }),
        _ => None,
    }
}

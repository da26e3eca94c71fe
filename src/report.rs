use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// How a stage terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(ExitCode),
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitStatus {
    /// Decode a wait status. Returns `None` for stop/continue notifications,
    /// which do not end a process.
    pub fn from_wait(status: WaitStatus) -> Option<(Pid, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ExitStatus::Exited(code))),
            WaitStatus::Signaled(pid, signal, core_dumped) => Some((
                pid,
                ExitStatus::Signaled {
                    signal: signal as i32,
                    core_dumped,
                },
            )),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Exit code the way a shell reports it: the code itself, or 128 plus the
    /// signal number.
    pub fn code(&self) -> ExitCode {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled { signal, .. } => 128 + signal,
        }
    }

    /// The status word as `wait(2)` stores it.
    pub fn raw(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => (code & 0xff) << 8,
            ExitStatus::Signaled {
                signal,
                core_dumped,
            } => signal | if core_dumped { 0x80 } else { 0 },
        }
    }
}

/// `exits with <code>` shows the decoded exit code; [`ExitStatus::raw`] has the wait word.
impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exits with {}", code),
            ExitStatus::Signaled {
                signal,
                core_dumped: false,
            } => write!(f, "killed by signal {}", signal),
            ExitStatus::Signaled {
                signal,
                core_dumped: true,
            } => write!(f, "killed by signal {} (core dumped)", signal),
        }
    }
}

/// Completion of one stage, as observed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    /// Position of the stage in its pipeline.
    pub stage: usize,
    pub pid: Pid,
    pub status: ExitStatus,
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {} {}", self.pid, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    #[test]
    fn decodes_exit_and_signal() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            ExitStatus::from_wait(WaitStatus::Exited(pid, 3)),
            Some((pid, ExitStatus::Exited(3)))
        );
        assert_eq!(
            ExitStatus::from_wait(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some((
                pid,
                ExitStatus::Signaled {
                    signal: 9,
                    core_dumped: false
                }
            ))
        );
        assert_eq!(ExitStatus::from_wait(WaitStatus::Continued(pid)), None);
        assert_eq!(ExitStatus::from_wait(WaitStatus::StillAlive), None);
    }

    #[test]
    fn shell_codes_and_raw_words() {
        assert_eq!(ExitStatus::Exited(0).code(), 0);
        assert_eq!(ExitStatus::Exited(1).raw(), 256);
        let killed = ExitStatus::Signaled {
            signal: 15,
            core_dumped: false,
        };
        assert_eq!(killed.code(), 143);
        assert_eq!(killed.raw(), 15);
        let dumped = ExitStatus::Signaled {
            signal: 11,
            core_dumped: true,
        };
        assert_eq!(dumped.raw(), 0x8b);
        assert!(!dumped.success());
        assert!(ExitStatus::Exited(0).success());
    }

    #[test]
    fn status_line_names_pid_and_status() {
        let report = StageReport {
            stage: 0,
            pid: Pid::from_raw(1234),
            status: ExitStatus::Exited(0),
        };
        assert_eq!(report.to_string(), "process 1234 exits with 0");

        let report = StageReport {
            stage: 2,
            pid: Pid::from_raw(77),
            status: ExitStatus::Signaled {
                signal: 13,
                core_dumped: false,
            },
        };
        assert_eq!(report.to_string(), "process 77 killed by signal 13");
    }

    #[test]
    fn status_line_shows_exit_code_not_wait_word() {
        let status = ExitStatus::Exited(1);
        assert_eq!(status.raw(), 256);
        assert_eq!(status.to_string(), "exits with 1");
    }
}

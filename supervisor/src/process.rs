use nix::unistd::Pid;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    /// Exit code, or 128 + signal number when killed by a signal.
    Exited(i32),
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::NotStarted => write!(f, "not started"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited(code) => write!(f, "exited ({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapStatus {
    Unchanged,
    Exited(i32),
}

/// Handle to the guest container process. Once `Exited` the handle is
/// terminal and is never waited on again, so a recycled pid cannot be reaped
/// by mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: Option<Pid>,
    state: ProcessState,
}

impl ProcessHandle {
    pub fn not_started() -> Self {
        Self {
            pid: None,
            state: ProcessState::NotStarted,
        }
    }

    pub(crate) fn running(pid: Pid) -> Self {
        Self {
            pid: Some(pid),
            state: ProcessState::Running,
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub(crate) fn running_pid(&self) -> Option<Pid> {
        if self.is_running() { self.pid } else { None }
    }

    pub(crate) fn mark_exited(&mut self, code: i32) {
        self.state = ProcessState::Exited(code);
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::not_started()
    }
}

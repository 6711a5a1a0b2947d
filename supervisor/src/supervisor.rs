//! Guest process supervision: launch, reap, signal.

use crate::error::SupervisorError;
use crate::plan::{LaunchPlan, LaunchRequest};
use crate::process::{ProcessHandle, ProcessState, ReapStatus};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, kill, sigprocmask};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use std::thread;
use std::time::{Duration, Instant};

/// Child exit status when changing into the base directory fails.
pub const CHDIR_FAILED_STATUS: i32 = 126;

/// Child exit status when the shell could not be executed.
pub const EXEC_FAILED_STATUS: i32 = 127;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait ProcessSupervisor: Send + Sync {
    /// Start the guest. Returns as soon as the child exists.
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, SupervisorError>;

    /// Non-blocking check for exit. Safe to call repeatedly.
    fn try_reap(&self, handle: &mut ProcessHandle) -> Result<ReapStatus, SupervisorError>;

    fn forward(&self, handle: &ProcessHandle, signal: Signal) -> Result<(), SupervisorError>;

    /// Deliver `signal` and wait up to `timeout` for the guest to exit. A guest
    /// still alive at the deadline is abandoned and stays `Running`.
    fn terminate(
        &self,
        handle: &mut ProcessHandle,
        signal: Signal,
        timeout: Duration,
    ) -> ProcessState {
        if !handle.is_running() {
            return handle.state();
        }

        if let Err(e) = self.forward(handle, signal) {
            tracing::warn!("Failed to signal guest: {}", e);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.try_reap(handle) {
                Ok(ReapStatus::Exited(_)) => break,
                Ok(ReapStatus::Unchanged) => {}
                Err(e) => {
                    tracing::warn!("Failed to reap guest: {}", e);
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    pid = ?handle.pid(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Guest did not exit in time, abandoning it"
                );
                break;
            }
            thread::sleep(REAP_POLL_INTERVAL.min(deadline - now));
        }

        handle.state()
    }
}

/// Supervisor backed by `fork` + `execve`.
#[derive(Debug, Default)]
pub struct ForkExecSupervisor;

impl ForkExecSupervisor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSupervisor for ForkExecSupervisor {
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, SupervisorError> {
        let plan = LaunchPlan::prepare(request)?;

        tracing::info!(
            script = %request.startup_script.display(),
            loader = %plan.loader_path().display(),
            tmp_dir = %plan.temp_dir().display(),
            "Launching guest container"
        );

        // SAFETY: the child only calls async-signal-safe functions on data
        // prepared above, then execs or exits.
        match unsafe { fork() } {
            Err(e) => Err(SupervisorError::Fork(e)),
            Ok(ForkResult::Child) => run_child(&plan),
            Ok(ForkResult::Parent { child }) => {
                tracing::info!(pid = %child, "Guest container started");
                Ok(ProcessHandle::running(child))
            }
        }
    }

    fn try_reap(&self, handle: &mut ProcessHandle) -> Result<ReapStatus, SupervisorError> {
        let Some(pid) = handle.running_pid() else {
            return Ok(ReapStatus::Unchanged);
        };

        let code = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => code,
            Ok(WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
            Ok(_) | Err(Errno::EINTR) => return Ok(ReapStatus::Unchanged),
            Err(Errno::ECHILD) => {
                tracing::warn!(pid = %pid, "Guest was reaped elsewhere, exit code unknown");
                -1
            }
            Err(e) => return Err(SupervisorError::Wait(e)),
        };

        handle.mark_exited(code);
        tracing::info!(pid = %pid, exit_code = code, "Guest container exited");
        Ok(ReapStatus::Exited(code))
    }

    fn forward(&self, handle: &ProcessHandle, signal: Signal) -> Result<(), SupervisorError> {
        let pid = handle.running_pid().ok_or(SupervisorError::NotRunning)?;
        kill(pid, signal).map_err(SupervisorError::Signal)?;
        tracing::debug!(pid = %pid, signal = %signal, "Signal forwarded to guest");
        Ok(())
    }
}

fn run_child(plan: &LaunchPlan) -> ! {
    // The parent may block signals on its threads; the guest must be able
    // to receive termination requests.
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None);
    unsafe {
        // Rust ignores SIGPIPE at startup and exec keeps ignored dispositions.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if libc::chdir(plan.workdir.as_ptr()) != 0 {
            libc::_exit(CHDIR_FAILED_STATUS);
        }
    }

    unsafe {
        libc::execve(
            plan.shell.as_ptr(),
            plan.argv_ptrs.as_ptr(),
            plan.envp_ptrs.as_ptr(),
        );
        libc::_exit(EXEC_FAILED_STATUS)
    }
}

mod error;
mod escalation;
mod plan;
mod process;
mod supervisor;

pub use error::SupervisorError;
pub use escalation::StopEscalation;
pub use nix::sys::signal::Signal;
pub use plan::*;
pub use process::{ProcessHandle, ProcessState, ReapStatus};
pub use supervisor::{ForkExecSupervisor, ProcessSupervisor};

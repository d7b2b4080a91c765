mod error;
pub use error::{ExecError, ExecResult};

pub mod env;
pub use env::{CompilerCache, EnvBuilder, WorkerEnv};

pub mod proc;
pub use proc::{
    LaunchContext, ShutdownReport, Supervisor, SupervisorState, WaitOptions, WorkerInfo,
};

mod signal;
pub use signal::TerminationListener;

mod util;

#[cfg(test)]
pub(crate) mod testutil;

//! Process helpers shared across the workspace.
//!
//! - [`NoWindowExt`] / [`tokio_command`]: spawn tools without flashing a console window on Windows.
//! - [`ProcessRunner`]: run an external executable under a cancellation token, either buffering
//!   its output or streaming raw chunks to an [`OutputSink`].

#[cfg(feature = "tokio")]
mod runner;

#[cfg(feature = "tokio")]
pub use runner::{
    BufferedOutput, DEFAULT_FORCE_KILL_DELAY, DEFAULT_MAX_BUFFER, OutputSink, ProcessRunner,
    RunOutcome, RunStatus, StreamKind,
};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

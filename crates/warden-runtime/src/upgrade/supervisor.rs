use std::path::{Path, PathBuf};

use super::UpgradeError;

/// Replaces the running process with another program.
///
/// Returns only if the replacement could not be started.
pub trait ProcessSupervisor: Send + Sync {
    fn exec_replace(&self, program: &Path, args: &[String]) -> Result<(), UpgradeError>;
}

/// Process replacement through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecSupervisor;

impl ExecSupervisor {
    /// The running binary and the arguments it was started with.
    pub fn current_invocation() -> Result<(PathBuf, Vec<String>), UpgradeError> {
        let program = std::env::current_exe()?;
        Ok((program, std::env::args().skip(1).collect()))
    }
}

impl ProcessSupervisor for ExecSupervisor {
    #[cfg(unix)]
    fn exec_replace(&self, program: &Path, args: &[String]) -> Result<(), UpgradeError> {
        use std::os::unix::process::CommandExt;

        tracing::info!(program = %program.display(), "Replacing process");
        let err = std::process::Command::new(program).args(args).exec();
        Err(UpgradeError::Supervisor(format!(
            "exec {} failed: {}",
            program.display(),
            err
        )))
    }

    #[cfg(not(unix))]
    fn exec_replace(&self, program: &Path, args: &[String]) -> Result<(), UpgradeError> {
        tracing::info!(program = %program.display(), "Replacing process");
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| {
                UpgradeError::Supervisor(format!("spawn {} failed: {}", program.display(), e))
            })?;
        std::process::exit(0)
    }
}

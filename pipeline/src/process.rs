use std::ffi::OsStr;
use log::info;
use tokio::process::Command;
use crate::error::{PipelineError, Result};

/// Runs an external program to completion, failing on a non-zero exit.
pub(crate) async fn run_program<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    info!("Running {command:?}");

    let status = command.status().await.map_err(|source| PipelineError::Spawn {
        program: program.to_owned(),
        source,
    })?;
    if !status.success() {
        return Err(PipelineError::ProgramFailed {
            program: program.to_owned(),
            status,
        });
    }
    Ok(())
}

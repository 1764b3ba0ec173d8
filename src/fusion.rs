use std::path::Path;

use snafu::ResultExt;
use tracing::{info, warn};

use crate::errors::{Error, FusionSpawnSnafu};
use crate::invoke::ToolCommand;
use crate::registration::DeformedAtlas;

/// Abort unless at least half of the original atlas count registered
/// successfully. This is a data-quality threshold, not a soft warning: a
/// consensus over too few atlases is worse than no output at all.
pub fn check_quorum(survived: usize, total: usize) -> Result<(), Error> {
    if survived * 2 < total {
        Err(Error::TooFewRegistered { survived, total })
    } else {
        Ok(())
    }
}

/// Build the single label-fusion invocation over every surviving atlas.
/// The voting method string is passed through to the tool verbatim.
pub fn fusion_command(
    tool: &Path,
    subject: &Path,
    mask: Option<&Path>,
    voting_method: &str,
    deformed: &[DeformedAtlas],
    output: &Path,
    timer: Option<&Path>,
) -> ToolCommand {
    let mut cmd = ToolCommand::new(tool)
        .arg("3")
        .arg("-g")
        .args(deformed.iter().map(|d| d.gray.as_os_str()))
        .arg("-l")
        .args(deformed.iter().map(|d| d.labels.as_os_str()))
        .arg("-m")
        .arg(voting_method);
    if let Some(mask) = mask {
        cmd = cmd.arg("-x").path(mask);
    }
    cmd = cmd.path(subject).path(output);
    match timer {
        Some(timer) => cmd.timed(timer),
        None => cmd,
    }
}

/// Invoke the fusion tool. The tool's own exit behavior is authoritative for
/// the quality of the result; the wrapper only fails if the process cannot
/// be launched, and warns when the expected output file is absent afterwards.
pub fn run_fusion(cmd: &ToolCommand, output: &Path) -> Result<(), Error> {
    info!("fusing labels: {}", cmd.display_line());
    let status = cmd.status().context(FusionSpawnSnafu {
        tool: cmd.program().display().to_string(),
    })?;
    if !status.success() {
        warn!("fusion tool exited with status {}", status);
    }
    if !output.is_file() {
        warn!(
            "fusion tool did not produce expected output {}",
            output.display()
        );
    }
    Ok(())
}

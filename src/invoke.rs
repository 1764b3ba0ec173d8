use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use tracing::{debug, warn};

use crate::errors::Error;

/// A command for an external tool, built from typed parts rather than an
/// interpolated shell string. Arguments are passed to the process verbatim,
/// so paths with spaces or shell metacharacters are safe.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().as_os_str())
    }

    /// Wrap this command in a wall-clock timing utility, i.e.
    /// `timer <program> <args...>`.
    pub fn timed<P: AsRef<Path>>(self, timer: P) -> Self {
        let mut wrapped = ToolCommand::new(timer.as_ref());
        wrapped.args.push(self.program.into_os_string());
        wrapped.args.extend(self.args);
        wrapped
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Render the command for log messages. Display only; never executed
    /// through a shell.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command to completion, inheriting stdout/stderr so the
    /// external tool's own output remains visible.
    pub fn status(&self) -> std::io::Result<ExitStatus> {
        debug!("running: {}", self.display_line());
        Command::new(&self.program).args(&self.args).status()
    }
}

/// Outcome of one external invocation: whether the process could be spawned,
/// how it exited, and whether every expected output file exists afterwards.
/// Exit status alone is not trusted as a success signal; the tools are only
/// considered to have succeeded when their promised outputs are on disk.
#[derive(Debug)]
pub struct StageOutcome {
    pub status: Option<ExitStatus>,
    pub outputs_present: bool,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false) && self.outputs_present
    }
}

/// Run one pipeline stage and check for its expected outputs. A spawn error
/// or nonzero exit is downgraded to a failed outcome; the caller decides
/// whether that is fatal.
pub fn run_stage(cmd: &ToolCommand, expected: &[&Path]) -> StageOutcome {
    let status = match cmd.status() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("failed to launch {}: {}", cmd.program().display(), e);
            None
        }
    };
    let outputs_present = expected.iter().all(|p| p.is_file());
    StageOutcome {
        status,
        outputs_present,
    }
}

fn is_executable(path: &Path) -> bool {
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// Resolve a tool name to an executable path. Names containing a path
/// separator are checked directly; bare names are searched on PATH.
pub fn resolve_tool(name: &str) -> Result<PathBuf, Error> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(Error::ToolNotFound {
                tool: name.to_string(),
            })
        };
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|p| is_executable(p))
        })
        .unwrap_or(None)
        .ok_or_else(|| Error::ToolNotFound {
            tool: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_display_line() {
        let cmd = ToolCommand::new("greedy")
            .arg("-d")
            .arg("3")
            .path("/tmp/subject.nii.gz");
        assert_eq!(cmd.display_line(), "greedy -d 3 /tmp/subject.nii.gz");
    }

    #[test]
    fn test_timed_prepends_wrapper() {
        let cmd = ToolCommand::new("greedy").arg("-d").arg("3").timed("time");
        assert_eq!(cmd.display_line(), "time greedy -d 3");
    }

    #[rstest]
    #[case("exit 0", true)]
    #[case("exit 1", false)]
    fn test_run_stage_exit_status(#[case] body: &str, #[case] expect_success: bool) {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("out.mat");
        let script = write_script(
            dir.path(),
            "tool",
            &format!("touch {}\n{}", expected.display(), body),
        );

        let outcome = run_stage(&ToolCommand::new(&script), &[&expected]);
        assert_eq!(outcome.success(), expect_success);
    }

    #[test]
    fn test_run_stage_missing_output() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("never-written.mat");
        let script = write_script(dir.path(), "tool", "exit 0");

        let outcome = run_stage(&ToolCommand::new(&script), &[&expected]);
        assert!(outcome.status.is_some());
        assert!(!outcome.success());
    }

    #[test]
    fn test_run_stage_spawn_failure() {
        let outcome = run_stage(
            &ToolCommand::new("/nonexistent/tool/binary"),
            &[Path::new("/nonexistent/out")],
        );
        assert!(outcome.status.is_none());
        assert!(!outcome.success());
    }

    #[test]
    fn test_resolve_tool_explicit_path() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "greedy", "exit 0");
        assert_eq!(resolve_tool(script.to_str().unwrap()).unwrap(), script);
    }

    #[test]
    fn test_resolve_tool_missing() {
        let result = resolve_tool("definitely-not-a-real-tool-name");
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
    }

    #[test]
    fn test_resolve_tool_rejects_non_executable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "not a tool").unwrap();
        let result = resolve_tool(path.to_str().unwrap());
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
    }
}

//! Shell scripts standing in for the streaming helper.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::HelperConfig;

/// A fake helper executable written into a scratch directory.
///
/// Every invocation appends its pid to `<name>.pids` and its arguments to
/// `<name>.calls` before running the script body. `--version` exits 0
/// right after being recorded.
#[derive(Debug, Clone)]
pub struct FakeHelper {
    path: PathBuf,
    pids_path: PathBuf,
    calls_path: PathBuf,
}

impl FakeHelper {
    /// Writes an executable `sh` script with the given body.
    pub fn script(dir: &Path, name: &str, body: &str) -> io::Result<Self> {
        let helper = Self::at(dir, name);
        fs::write(&helper.path, helper.render(body))?;
        fs::set_permissions(&helper.path, fs::Permissions::from_mode(0o755))?;
        Ok(helper)
    }

    /// Writes `payload` to stdout and exits 0.
    pub fn emitting(dir: &Path, name: &str, payload: &[u8]) -> io::Result<Self> {
        let payload_path = dir.join(format!("{}.payload", name));
        fs::write(&payload_path, payload)?;
        Self::script(
            dir,
            name,
            &format!("exec cat '{}'", payload_path.display()),
        )
    }

    /// Writes `payload`, prints `stderr_line` to stderr, then exits with `code`.
    pub fn emitting_then_failing(
        dir: &Path,
        name: &str,
        payload: &[u8],
        code: i32,
        stderr_line: &str,
    ) -> io::Result<Self> {
        let payload_path = dir.join(format!("{}.payload", name));
        fs::write(&payload_path, payload)?;
        Self::script(
            dir,
            name,
            &format!(
                "cat '{}'\necho '{}' >&2\nexit {}",
                payload_path.display(),
                stderr_line,
                code
            ),
        )
    }

    /// Writes `first-chunk` then stays alive for 10 seconds without output.
    pub fn streaming_forever(dir: &Path, name: &str) -> io::Result<Self> {
        Self::script(dir, name, "printf 'first-chunk'\nexec sleep 10")
    }

    /// Stays alive for 10 seconds without output.
    pub fn silent(dir: &Path, name: &str) -> io::Result<Self> {
        Self::script(dir, name, "exec sleep 10")
    }

    /// A script file without the execute bit.
    pub fn not_executable(dir: &Path, name: &str) -> io::Result<Self> {
        let helper = Self::at(dir, name);
        fs::write(&helper.path, helper.render("exit 0"))?;
        fs::set_permissions(&helper.path, fs::Permissions::from_mode(0o644))?;
        Ok(helper)
    }

    fn at(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            pids_path: dir.join(format!("{}.pids", name)),
            calls_path: dir.join(format!("{}.calls", name)),
        }
    }

    fn render(&self, body: &str) -> String {
        format!(
            "#!/bin/sh\necho \"$$\" >> '{}'\necho \"$*\" >> '{}'\n[ \"$1\" = \"--version\" ] && exit 0\n{}\n",
            self.pids_path.display(),
            self.calls_path.display(),
            body
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Helper configuration pointing at this script.
    pub fn helper_config(&self) -> HelperConfig {
        HelperConfig {
            program: self.path.clone(),
            extra_args: Vec::new(),
        }
    }

    /// Argument lines of every invocation so far.
    pub fn invocations(&self) -> Vec<String> {
        read_lines(&self.calls_path)
    }

    /// Pids of every invocation so far.
    pub fn pids(&self) -> Vec<u32> {
        read_lines(&self.pids_path)
            .iter()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

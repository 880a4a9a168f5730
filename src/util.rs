//! Small process and path helpers shared by toolchain detection, program
//! lookup, and the backend.

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use crate::Result;

/// Run a command and capture its exit code and output. Spawn failures (e.g. a
/// candidate binary that does not exist) are reported as a nonzero exit code
/// rather than an error, since probing absent binaries is routine.
pub fn process(args: &[String]) -> Result<(i32, String, String)> {
    let Some((cmd, rest)) = args.split_first() else {
        return Err(crate::Error::Internal("empty command line".into()));
    };

    match Command::new(cmd).args(rest).output() {
        Ok(output) => Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )),
        Err(_) => Ok((127, String::new(), String::new())),
    }
}

/// Find the first executable with the given name on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let trial = dir.join(name);
        if trial.is_file() {
            return Some(trial);
        }
    }
    None
}

/// Lexically compute `target` relative to `base`, walking up with `..` where
/// the paths diverge. Both paths must be either absolute or both relative.
pub fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = base.components().collect();

    let mut common = 0;
    while common < target.len() && common < base.len() && target[common] == base[common] {
        common += 1;
    }

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component);
    }
    out
}

//! Transcoder binary discovery

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolve `program` to an executable path.
///
/// Anything containing a path separator is checked as-is; a bare name is
/// searched for on `PATH`.
pub fn locate(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        if is_executable(program) {
            return Ok(program.to_path_buf());
        }
        return Err(EngineError::BinaryNotFound(program.display().to_string()));
    }

    let search = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| EngineError::BinaryNotFound(program.display().to_string()))
}

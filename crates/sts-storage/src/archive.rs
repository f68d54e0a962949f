//! Keeps files that are about to be overwritten.

use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use sts_core::{StsError, StsResult};

/// Prefix given to archived files, `YYYYmmdd_HHMMSS_`.
pub const ARCHIVE_PREFIX_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Move `path` into `archive_dir` under a timestamped name.
///
/// Returns the new location, or `None` when there was nothing to move.
pub fn archive_existing(
    path: &Path,
    archive_dir: &Path,
    now: NaiveDateTime,
) -> StsResult<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let name = path
        .file_name()
        .ok_or_else(|| StsError::Persistence(format!("{} has no file name", path.display())))?;
    fs::create_dir_all(archive_dir)?;
    let target = archive_dir.join(format!(
        "{}_{}",
        now.format(ARCHIVE_PREFIX_FORMAT),
        name.to_string_lossy()
    ));
    fs::rename(path, &target).map_err(|e| {
        StsError::Persistence(format!(
            "failed to move {} to {}: {e}",
            path.display(),
            target.display()
        ))
    })?;
    tracing::info!(from = %path.display(), to = %target.display(), "Archived previous file");
    Ok(Some(target))
}

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Replaces `path` with `content` via a synced sibling temp file and a rename.
///
/// A reader sees either the previous file or the new one. The temp file is
/// removed when the write or rename fails.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("state path '{}' has no file name", path.display());
    };
    if path.is_dir() {
        bail!("state path '{}' is a directory", path.display());
    }

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;

    let staged = dir.join(format!(
        ".{file_name}.{}.{}.partial",
        std::process::id(),
        current_unix_timestamp_ms()
    ));
    let result = stage_and_swap(&staged, path, content);
    if result.is_err() {
        let _ = std::fs::remove_file(&staged);
    }
    result
}

fn stage_and_swap(staged: &PathBuf, target: &Path, content: &str) -> Result<()> {
    let mut file = File::create(staged)
        .with_context(|| format!("failed to create {}", staged.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", staged.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", staged.display()))?;
    drop(file);
    std::fs::rename(staged, target).with_context(|| {
        format!("failed to move {} over {}", staged.display(), target.display())
    })
}

//! Write a rendered tutorial to disk.
//!
//! Produces `<output_dir>/<project>/index.md` plus one `<slug>.md` per
//! chapter. Chapter files left over from an earlier run with more
//! chapters are removed so links in the index never dangle.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use repo_tutor_core::chapter::{chapter_number, safe_file_stem};
use repo_tutor_core::render::Tutorial;

/// Write every file of `tutorial` and return the directory written to.
pub fn write_tutorial(tutorial: &Tutorial, output_dir: &Path, project_name: &str) -> Result<PathBuf> {
    let dir = output_dir.join(safe_file_stem(project_name));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let mut written = HashSet::new();
    for file in tutorial.files() {
        let path = dir.join(&file.file_name);
        std::fs::write(&path, &file.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.insert(file.file_name.clone());
    }

    let removed = remove_stale_chapters(&dir, &written)?;
    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "removed stale chapter files");
    }
    Ok(dir)
}

fn remove_stale_chapters(dir: &Path, keep: &HashSet<String>) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(".md") else {
            continue;
        };
        if keep.contains(&name) || chapter_number(stem).is_none() {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}

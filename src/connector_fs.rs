//! Local directory crawler.
//!
//! Walks a checkout on disk and produces the ordered [`SourceFile`]
//! snapshot the pipeline runs on. Paths are relative to the root and use
//! `/` separators; the list is sorted so file indices are stable between
//! runs over the same tree.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use repo_tutor_core::models::SourceFile;

use crate::config::CrawlConfig;

pub fn scan_directory(root: &Path, config: &CrawlConfig) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("Source directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let mut skipped_large = 0usize;
    let mut skipped_binary = 0usize;

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        if entry.metadata()?.len() > config.max_file_size {
            skipped_large += 1;
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => files.push(SourceFile::new(rel_str, content)),
            Err(_) => skipped_binary += 1,
        }
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    tracing::info!(
        root = %root.display(),
        files = files.len(),
        skipped_large,
        skipped_binary,
        "scanned source directory"
    );
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

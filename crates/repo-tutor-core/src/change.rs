//! Change detection against the cached file manifest.
//!
//! Hashes every current file, classifies paths as added / modified /
//! deleted, and propagates the change through the cached analysis:
//!
//! ```text
//! changed files ──▶ abstractions whose files changed
//!               ──▶ chapters covering those abstractions
//!               ──▶ + chapters depending on them (transitive closure)
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::hash::content_hash;
use crate::models::{CachedAbstraction, CachedFile, ChangeAnalysis, Chapter, RepositoryCache, SourceFile};

/// Build the manifest for `files`, carrying `last_modified` forward from
/// `previous` for files whose hash did not change.
pub fn build_manifest(files: &[SourceFile], previous: &[CachedFile], now: DateTime<Utc>) -> Vec<CachedFile> {
    let previous: HashMap<&str, &CachedFile> = previous.iter().map(|f| (f.path.as_str(), f)).collect();
    let mut seen = HashSet::new();
    files
        .iter()
        .filter(|f| seen.insert(f.path.as_str()))
        .map(|f| {
            let content_hash = content_hash(f.content.as_bytes());
            let last_modified = match previous.get(f.path.as_str()) {
                Some(prev) if prev.content_hash == content_hash => prev.last_modified,
                _ => now,
            };
            CachedFile {
                path: f.path.clone(),
                content_hash,
                last_modified,
            }
        })
        .collect()
}

/// Indices of cached abstractions that reference any changed path.
pub fn affected_abstractions(changed: &HashSet<&str>, abstractions: &[CachedAbstraction]) -> Vec<usize> {
    abstractions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.files.iter().any(|p| changed.contains(p.as_str())))
        .map(|(i, _)| i)
        .collect()
}

/// Slugs of chapters covering any of `names`.
pub fn chapters_covering<'a>(
    names: &HashSet<&str>,
    chapters: impl IntoIterator<Item = &'a Chapter>,
) -> BTreeSet<String> {
    chapters
        .into_iter()
        .filter(|c| c.abstractions_covered.iter().any(|n| names.contains(n.as_str())))
        .map(|c| c.slug.clone())
        .collect()
}

/// Expand `seed` with every chapter that depends on a member, directly
/// or indirectly.
pub fn dependency_closure<'a>(
    seed: BTreeSet<String>,
    chapters: impl IntoIterator<Item = &'a Chapter> + Clone,
) -> BTreeSet<String> {
    let mut affected = seed;
    loop {
        let before = affected.len();
        for chapter in chapters.clone() {
            if !affected.contains(&chapter.slug)
                && chapter.dependencies.iter().any(|d| affected.contains(d))
            {
                affected.insert(chapter.slug.clone());
            }
        }
        if affected.len() == before {
            return affected;
        }
    }
}

/// Diff `files` against `cache` and derive affected abstractions and chapters.
pub fn detect_changes(files: &[SourceFile], cache: &RepositoryCache) -> ChangeAnalysis {
    let cached: HashMap<&str, &str> = cache
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.content_hash.as_str()))
        .collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut current = HashSet::new();
    for file in files {
        if !current.insert(file.path.as_str()) {
            continue;
        }
        match cached.get(file.path.as_str()) {
            None => added.push(file.path.clone()),
            Some(&hash) if hash != content_hash(file.content.as_bytes()) => {
                modified.push(file.path.clone())
            }
            Some(_) => {}
        }
    }
    let mut deleted: Vec<String> = cache
        .files
        .iter()
        .filter(|f| !current.contains(f.path.as_str()))
        .map(|f| f.path.clone())
        .collect();
    deleted.sort();

    let changed: HashSet<&str> = added
        .iter()
        .chain(modified.iter())
        .chain(deleted.iter())
        .map(String::as_str)
        .collect();

    let cached_abstractions = cache.abstractions.as_deref().unwrap_or(&[]);
    let affected = affected_abstractions(&changed, cached_abstractions);
    let affected_names: HashSet<&str> = affected
        .iter()
        .filter_map(|&i| cached_abstractions.get(i).map(|a| a.name.as_str()))
        .collect();

    let seed = chapters_covering(&affected_names, cache.chapters.values());
    let regenerate = dependency_closure(seed, cache.chapters.values());

    let ordered = cache.ordered_slugs();
    let (chapters_to_regenerate, chapters_to_keep): (Vec<String>, Vec<String>) =
        ordered.into_iter().partition(|s| regenerate.contains(s));

    let total_files = current.len() + deleted.len();
    let changed_count = added.len() + modified.len() + deleted.len();
    let change_percentage = if total_files == 0 {
        0.0
    } else {
        changed_count as f64 * 100.0 / total_files as f64
    };

    tracing::info!(
        added = added.len(),
        modified = modified.len(),
        deleted = deleted.len(),
        affected_abstractions = affected.len(),
        chapters_to_regenerate = chapters_to_regenerate.len(),
        change_pct = %format!("{:.1}", change_percentage),
        "change analysis"
    );

    ChangeAnalysis {
        added_files: added,
        modified_files: modified,
        deleted_files: deleted,
        affected_abstractions: affected,
        chapters_to_regenerate,
        chapters_to_keep,
        total_files,
        change_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelationshipSet;

    fn chapter(slug: &str, covers: &str, deps: &[&str]) -> Chapter {
        Chapter {
            slug: slug.to_string(),
            title: covers.to_string(),
            content: format!("content of {}", slug),
            abstractions_covered: vec![covers.to_string()],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            generated_at: Utc::now(),
            prompt_hash: String::new(),
        }
    }

    fn snapshot(n: usize) -> Vec<SourceFile> {
        (0..n)
            .map(|i| SourceFile::new(format!("src/f{}.rs", i), format!("fn f{}() {{}}", i)))
            .collect()
    }

    fn cache_for(files: &[SourceFile]) -> RepositoryCache {
        let mut cache = RepositoryCache::new("https://example.com/r");
        cache.files = build_manifest(files, &[], Utc::now());
        cache.abstractions = Some(vec![
            CachedAbstraction {
                name: "A".into(),
                description: "a".into(),
                files: vec!["src/f0.rs".into(), "src/f1.rs".into()],
            },
            CachedAbstraction {
                name: "B".into(),
                description: "b".into(),
                files: vec!["src/f2.rs".into()],
            },
            CachedAbstraction {
                name: "C".into(),
                description: "c".into(),
                files: vec!["src/f3.rs".into()],
            },
        ]);
        cache.relationships = Some(RelationshipSet::default());
        cache.chapter_order = Some(vec![0, 2, 1]);
        for c in [
            chapter("01_a", "A", &[]),
            chapter("02_c", "C", &[]),
            chapter("03_b", "B", &["01_a"]),
        ] {
            cache.chapters.insert(c.slug.clone(), c);
        }
        cache
    }

    #[test]
    fn unchanged_snapshot_has_no_changes() {
        let files = snapshot(10);
        let analysis = detect_changes(&files, &cache_for(&files));
        assert_eq!(analysis.changed_count(), 0);
        assert_eq!(analysis.change_percentage, 0.0);
        assert!(analysis.chapters_to_regenerate.is_empty());
        assert_eq!(analysis.chapters_to_keep, vec!["01_a", "02_c", "03_b"]);
    }

    #[test]
    fn modification_propagates_through_dependencies() {
        let files = snapshot(10);
        let cache = cache_for(&files);
        let mut current = files.clone();
        current[0].content.push_str("// edited");
        current[1].content.push_str("// edited");

        let analysis = detect_changes(&current, &cache);
        assert_eq!(analysis.modified_files, vec!["src/f0.rs", "src/f1.rs"]);
        assert_eq!(analysis.change_percentage, 20.0);
        assert_eq!(analysis.affected_abstractions, vec![0]);
        assert_eq!(analysis.chapters_to_regenerate, vec!["01_a", "03_b"]);
        assert_eq!(analysis.chapters_to_keep, vec!["02_c"]);
    }

    #[test]
    fn added_and_deleted_files_are_classified() {
        let files = snapshot(4);
        let cache = cache_for(&files);
        let mut current: Vec<SourceFile> = files[..3].to_vec();
        current.push(SourceFile::new("src/new.rs", "fn new() {}"));

        let analysis = detect_changes(&current, &cache);
        assert_eq!(analysis.added_files, vec!["src/new.rs"]);
        assert_eq!(analysis.deleted_files, vec!["src/f3.rs"]);
        assert_eq!(analysis.total_files, 5);
        assert_eq!(analysis.change_percentage, 40.0);
        // f3 belonged to C
        assert_eq!(analysis.chapters_to_regenerate, vec!["02_c"]);
    }

    #[test]
    fn closure_is_transitive() {
        let chapters = vec![
            chapter("01_a", "A", &[]),
            chapter("02_b", "B", &["01_a"]),
            chapter("03_c", "C", &["02_b"]),
            chapter("04_d", "D", &[]),
        ];
        let seed: BTreeSet<String> = ["01_a".to_string()].into();
        let closed = dependency_closure(seed, chapters.iter());
        assert_eq!(closed.into_iter().collect::<Vec<_>>(), vec!["01_a", "02_b", "03_c"]);
    }

    #[test]
    fn manifest_keeps_timestamp_for_unchanged_files() {
        let files = snapshot(2);
        let earlier = Utc::now() - chrono::Duration::days(3);
        let first = build_manifest(&files, &[], earlier);

        let mut edited = files.clone();
        edited[1].content = "changed".into();
        let second = build_manifest(&edited, &first, Utc::now());
        assert_eq!(second[0].last_modified, earlier);
        assert!(second[1].last_modified > earlier);
    }
}

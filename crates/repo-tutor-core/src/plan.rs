//! Regeneration planning.
//!
//! Turns a [`ChangeAnalysis`] into a [`RegenerationPlan`]. The mode is
//! chosen from the change percentage:
//!
//! | Change | Mode | Analysis stages | Chapters |
//! |--------|------|-----------------|----------|
//! | 0% | `skip` | reused | all cached |
//! | below `partial_threshold` | `partial` | reused | affected only |
//! | up to `full_threshold` | `partial_reidentify` | rerun | decided after rerun |
//! | above `full_threshold` | `full` | rerun | all |
//!
//! A cache that cannot back reuse (absent, incomplete, or produced for a
//! different project name, language or documentation mode) always yields
//! `full`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chapter::ChapterSlot;
use crate::models::{
    Abstraction, ChangeAnalysis, DocumentationMode, GenerationMetadata, RegenerationMode, RegenerationPlan,
    RepositoryCache, SourceFile,
};

pub const DEFAULT_PARTIAL_THRESHOLD: f64 = 30.0;
pub const DEFAULT_FULL_THRESHOLD: f64 = 60.0;

/// Percentage thresholds separating the regeneration modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegenerationPolicy {
    pub partial_threshold: f64,
    pub full_threshold: f64,
}

impl Default for RegenerationPolicy {
    fn default() -> Self {
        Self {
            partial_threshold: DEFAULT_PARTIAL_THRESHOLD,
            full_threshold: DEFAULT_FULL_THRESHOLD,
        }
    }
}

impl RegenerationPolicy {
    pub fn classify(&self, change_percentage: f64) -> RegenerationMode {
        if change_percentage <= 0.0 {
            RegenerationMode::Skip
        } else if change_percentage < self.partial_threshold {
            RegenerationMode::Partial
        } else if change_percentage <= self.full_threshold {
            RegenerationMode::PartialReidentify
        } else {
            RegenerationMode::Full
        }
    }
}

/// Request settings that shape every prompt of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTarget<'a> {
    pub project_name: &'a str,
    pub language: &'a str,
    pub documentation_mode: DocumentationMode,
}

impl GenerationTarget<'_> {
    /// Names of the settings that differ from those `metadata` was written with.
    pub fn differences(&self, metadata: &GenerationMetadata) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.project_name != metadata.project_name {
            changed.push("project_name");
        }
        if !self.language.trim().eq_ignore_ascii_case(metadata.language.trim()) {
            changed.push("language");
        }
        if self.documentation_mode != metadata.documentation_mode {
            changed.push("documentation_mode");
        }
        changed
    }
}

/// Caller preference on top of the computed plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenerationPreference {
    #[default]
    Auto,
    Full,
}

impl FromStr for RegenerationPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(RegenerationPreference::Auto),
            "full" => Ok(RegenerationPreference::Full),
            other => Err(format!("unknown regeneration preference '{}': expected auto or full", other)),
        }
    }
}

fn savings(kept: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        kept as f64 * 100.0 / total as f64
    }
}

/// Decide how much of the pipeline to rerun.
pub fn plan_regeneration(
    analysis: &ChangeAnalysis,
    cache: Option<&RepositoryCache>,
    target: &GenerationTarget<'_>,
    policy: &RegenerationPolicy,
    preference: RegenerationPreference,
) -> RegenerationPlan {
    let all_slugs = cache.map(|c| c.ordered_slugs()).unwrap_or_default();

    if preference == RegenerationPreference::Full {
        return RegenerationPlan::full("full regeneration requested", all_slugs);
    }
    let Some(cache) = cache else {
        return RegenerationPlan::full("no cached generation for this repository", all_slugs);
    };
    let changed = target.differences(&cache.metadata);
    if !changed.is_empty() {
        tracing::info!(settings = ?changed, "generation settings changed since the cached run");
        return RegenerationPlan::full(
            format!("generation settings changed: {}", changed.join(", ")),
            all_slugs,
        );
    }
    if !cache.is_complete() {
        return RegenerationPlan::full("cached generation is incomplete", all_slugs);
    }

    let pct = analysis.change_percentage;
    let mode = policy.classify(pct);
    let plan = match mode {
        RegenerationMode::Skip => RegenerationPlan {
            mode,
            reason: "no files changed".to_string(),
            chapters_to_regenerate: Vec::new(),
            rerun_abstraction_identification: false,
            estimated_savings: 100.0,
        },
        RegenerationMode::Partial => RegenerationPlan {
            mode,
            reason: format!(
                "{:.1}% of files changed; regenerating {} of {} chapters",
                pct,
                analysis.chapters_to_regenerate.len(),
                all_slugs.len()
            ),
            chapters_to_regenerate: analysis.chapters_to_regenerate.clone(),
            rerun_abstraction_identification: false,
            estimated_savings: savings(analysis.chapters_to_keep.len(), all_slugs.len()),
        },
        RegenerationMode::PartialReidentify => RegenerationPlan {
            mode,
            reason: format!(
                "{:.1}% of files changed; re-identifying abstractions before choosing chapters",
                pct
            ),
            chapters_to_regenerate: Vec::new(),
            rerun_abstraction_identification: true,
            estimated_savings: 0.0,
        },
        RegenerationMode::Full => {
            RegenerationPlan::full(format!("{:.1}% of files changed", pct), all_slugs)
        }
    };

    tracing::info!(
        mode = plan.mode.as_str(),
        chapters = plan.chapters_to_regenerate.len(),
        savings_pct = %format!("{:.1}", plan.estimated_savings),
        "regeneration plan"
    );
    plan
}

/// Resolve a deferred `partial_reidentify` plan once abstractions and the
/// chapter order have been recomputed.
///
/// A cached chapter stays valid only if the slot at the same slug still
/// covers the same single abstraction, with the same description and file
/// set, none of those files changed, and its dependencies are unchanged.
/// Invalid chapters are then expanded to every later chapter that depends
/// on them.
pub fn refine_after_reidentify(
    plan: &RegenerationPlan,
    cache: &RepositoryCache,
    files: &[SourceFile],
    analysis: &ChangeAnalysis,
    abstractions: &[Abstraction],
    slots: &[ChapterSlot],
) -> RegenerationPlan {
    if plan.mode != RegenerationMode::PartialReidentify {
        return plan.clone();
    }

    let changed: HashSet<&str> = analysis.changed_paths().map(String::as_str).collect();
    let cached_abstractions: HashMap<&str, _> = cache
        .abstractions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|a| (a.name.as_str(), a))
        .collect();

    let still_valid = |slot: &ChapterSlot| -> bool {
        let Some(chapter) = cache.chapters.get(&slot.slug) else {
            return false;
        };
        let Some(current) = abstractions.get(slot.abstraction_index) else {
            return false;
        };
        let Some(previous) = cached_abstractions.get(current.name.as_str()) else {
            return false;
        };
        let mut current_paths: Vec<&str> = current
            .file_indices
            .iter()
            .filter_map(|&i| files.get(i).map(|f| f.path.as_str()))
            .collect();
        current_paths.sort_unstable();
        let mut previous_paths: Vec<&str> = previous.files.iter().map(String::as_str).collect();
        previous_paths.sort_unstable();

        chapter.abstractions_covered == [current.name.clone()]
            && previous.description == current.description
            && previous_paths == current_paths
            && !current_paths.iter().any(|p| changed.contains(p))
            && chapter.dependencies == slot.dependencies
    };

    // Dependencies always point at earlier slots, so one forward pass closes the set.
    let mut regenerate: BTreeSet<&str> = BTreeSet::new();
    for slot in slots {
        if !still_valid(slot) || slot.dependencies.iter().any(|d| regenerate.contains(d.as_str())) {
            regenerate.insert(slot.slug.as_str());
        }
    }

    let chapters_to_regenerate: Vec<String> = slots
        .iter()
        .filter(|s| regenerate.contains(s.slug.as_str()))
        .map(|s| s.slug.clone())
        .collect();
    let kept = slots.len() - chapters_to_regenerate.len();

    tracing::info!(
        regenerate = chapters_to_regenerate.len(),
        kept,
        "re-identification refined chapter plan"
    );

    RegenerationPlan {
        mode: plan.mode,
        reason: format!(
            "{}; {} of {} chapters still valid",
            plan.reason,
            kept,
            slots.len()
        ),
        chapters_to_regenerate,
        rerun_abstraction_identification: true,
        estimated_savings: savings(kept, slots.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{build_manifest, detect_changes};
    use crate::chapter::{plan_chapters, DependencyPolicy};
    use crate::models::{CachedAbstraction, Chapter, RelationshipSet};
    use chrono::Utc;

    fn chapter(slug: &str, covers: &str, deps: &[&str]) -> Chapter {
        Chapter {
            slug: slug.to_string(),
            title: covers.to_string(),
            content: format!("# {}", covers),
            abstractions_covered: vec![covers.to_string()],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            generated_at: Utc::now(),
            prompt_hash: String::new(),
        }
    }

    fn snapshot() -> Vec<SourceFile> {
        (0..10)
            .map(|i| SourceFile::new(format!("src/f{}.rs", i), format!("fn f{}() {{}}", i)))
            .collect()
    }

    fn abstraction(name: &str, files: &[usize]) -> CachedAbstraction {
        CachedAbstraction {
            name: name.to_string(),
            description: format!("{} description", name),
            files: files.iter().map(|i| format!("src/f{}.rs", i)).collect(),
        }
    }

    fn target() -> GenerationTarget<'static> {
        GenerationTarget {
            project_name: "widget",
            language: "english",
            documentation_mode: DocumentationMode::Tutorial,
        }
    }

    /// Chapters 01_a (A), 02_c (C), 03_b (B, depends on 01_a).
    fn cached(files: &[SourceFile]) -> RepositoryCache {
        let mut cache = RepositoryCache::new("https://github.com/acme/widget");
        cache.metadata.project_name = "widget".to_string();
        cache.metadata.language = "english".to_string();
        cache.files = build_manifest(files, &[], Utc::now());
        cache.abstractions = Some(vec![
            abstraction("A", &[0, 1]),
            abstraction("B", &[2, 3]),
            abstraction("C", &[4, 5]),
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

    fn modify(files: &mut [SourceFile], indices: &[usize]) {
        for &i in indices {
            files[i].content.push_str("\n// changed");
        }
    }

    fn plan_for(files: &[SourceFile], cache: &RepositoryCache) -> RegenerationPlan {
        let analysis = detect_changes(files, cache);
        plan_regeneration(
            &analysis,
            Some(cache),
            &target(),
            &RegenerationPolicy::default(),
            RegenerationPreference::Auto,
        )
    }

    #[test]
    fn unchanged_files_skip() {
        let files = snapshot();
        let plan = plan_for(&files, &cached(&files));
        assert_eq!(plan.mode, RegenerationMode::Skip);
        assert!(plan.chapters_to_regenerate.is_empty());
        assert!(!plan.rerun_abstraction_identification);
    }

    #[test]
    fn small_change_regenerates_affected_closure() {
        let files = snapshot();
        let cache = cached(&files);
        let mut current = files.clone();
        modify(&mut current, &[0, 1]);

        let plan = plan_for(&current, &cache);
        assert_eq!(plan.mode, RegenerationMode::Partial);
        assert_eq!(plan.chapters_to_regenerate, vec!["01_a", "03_b"]);
        assert!((plan.estimated_savings - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn large_change_is_full() {
        let files = snapshot();
        let cache = cached(&files);
        let mut current = files.clone();
        modify(&mut current, &[0, 1, 2, 3, 4, 5, 6]);

        let plan = plan_for(&current, &cache);
        assert_eq!(plan.mode, RegenerationMode::Full);
        assert_eq!(plan.chapters_to_regenerate, vec!["01_a", "02_c", "03_b"]);
        assert_eq!(plan.estimated_savings, 0.0);
    }

    #[test]
    fn middle_band_defers_chapter_choice() {
        let files = snapshot();
        let cache = cached(&files);
        let mut current = files.clone();
        modify(&mut current, &[0, 6, 7, 8]);

        let plan = plan_for(&current, &cache);
        assert_eq!(plan.mode, RegenerationMode::PartialReidentify);
        assert!(plan.rerun_abstraction_identification);
        assert!(plan.chapters_to_regenerate.is_empty());
    }

    #[test]
    fn thresholds_are_inclusive_in_the_middle() {
        let policy = RegenerationPolicy::default();
        assert_eq!(policy.classify(0.0), RegenerationMode::Skip);
        assert_eq!(policy.classify(29.9), RegenerationMode::Partial);
        assert_eq!(policy.classify(30.0), RegenerationMode::PartialReidentify);
        assert_eq!(policy.classify(60.0), RegenerationMode::PartialReidentify);
        assert_eq!(policy.classify(60.1), RegenerationMode::Full);
    }

    #[test]
    fn missing_or_incomplete_cache_is_full() {
        let files = snapshot();
        let analysis = ChangeAnalysis::default();
        let policy = RegenerationPolicy::default();

        let plan = plan_regeneration(&analysis, None, &target(), &policy, RegenerationPreference::Auto);
        assert_eq!(plan.mode, RegenerationMode::Full);

        let mut cache = cached(&files);
        cache.chapters.remove("02_c");
        let plan = plan_regeneration(&analysis, Some(&cache), &target(), &policy, RegenerationPreference::Auto);
        assert_eq!(plan.mode, RegenerationMode::Full);
    }

    #[test]
    fn changed_language_or_mode_is_full_even_without_file_changes() {
        let files = snapshot();
        let cache = cached(&files);
        let analysis = detect_changes(&files, &cache);
        let policy = RegenerationPolicy::default();

        let same = GenerationTarget {
            language: " English ",
            ..target()
        };
        let plan = plan_regeneration(&analysis, Some(&cache), &same, &policy, RegenerationPreference::Auto);
        assert_eq!(plan.mode, RegenerationMode::Skip);

        let spanish_architecture = GenerationTarget {
            language: "spanish",
            documentation_mode: DocumentationMode::Architecture,
            ..target()
        };
        let plan = plan_regeneration(
            &analysis,
            Some(&cache),
            &spanish_architecture,
            &policy,
            RegenerationPreference::Auto,
        );
        assert_eq!(plan.mode, RegenerationMode::Full);
        assert_eq!(plan.reason, "generation settings changed: language, documentation_mode");
        assert_eq!(plan.chapters_to_regenerate, vec!["01_a", "02_c", "03_b"]);

        let renamed = GenerationTarget {
            project_name: "gadget",
            ..target()
        };
        let plan = plan_regeneration(&analysis, Some(&cache), &renamed, &policy, RegenerationPreference::Auto);
        assert_eq!(plan.mode, RegenerationMode::Full);
    }

    #[test]
    fn forced_full_overrides_skip() {
        let files = snapshot();
        let cache = cached(&files);
        let analysis = detect_changes(&files, &cache);
        let plan = plan_regeneration(
            &analysis,
            Some(&cache),
            &target(),
            &RegenerationPolicy::default(),
            RegenerationPreference::Full,
        );
        assert_eq!(plan.mode, RegenerationMode::Full);
        assert_eq!(plan.chapters_to_regenerate.len(), 3);
    }

    #[test]
    fn refinement_keeps_untouched_chapters() {
        let files = snapshot();
        let cache = cached(&files);
        let mut current = files.clone();
        // C's files and unrelated files change; A and B untouched
        modify(&mut current, &[4, 6, 7, 8]);

        let analysis = detect_changes(&current, &cache);
        let plan = plan_regeneration(
            &analysis,
            Some(&cache),
            &target(),
            &RegenerationPolicy::default(),
            RegenerationPreference::Auto,
        );
        assert_eq!(plan.mode, RegenerationMode::PartialReidentify);

        let abstractions: Vec<Abstraction> = cache
            .abstractions
            .as_ref()
            .unwrap()
            .iter()
            .map(|a| a.to_abstraction(&current))
            .collect();
        let slots = plan_chapters(&[0, 2, 1], &abstractions, None, DependencyPolicy::Previous);
        // The previous-chapter policy makes 03_b depend on 02_c.
        let refined = refine_after_reidentify(&plan, &cache, &current, &analysis, &abstractions, &slots);
        assert_eq!(refined.chapters_to_regenerate, vec!["02_c", "03_b"]);
        assert!((refined.estimated_savings - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn refinement_regenerates_renamed_abstraction() {
        let files = snapshot();
        let cache = cached(&files);
        let analysis = ChangeAnalysis::default();
        let plan = RegenerationPlan {
            mode: RegenerationMode::PartialReidentify,
            reason: "test".into(),
            chapters_to_regenerate: vec![],
            rerun_abstraction_identification: true,
            estimated_savings: 0.0,
        };
        let abstractions = vec![
            Abstraction {
                name: "A".into(),
                description: "A description".into(),
                file_indices: vec![0, 1],
            },
            Abstraction {
                name: "Renamed".into(),
                description: "C description".into(),
                file_indices: vec![4, 5],
            },
        ];
        let mut slots = plan_chapters(&[0, 1], &abstractions, None, DependencyPolicy::Previous);
        slots[1].dependencies.clear();
        let refined = refine_after_reidentify(&plan, &cache, &files, &analysis, &abstractions, &slots);
        assert_eq!(refined.chapters_to_regenerate, vec!["02_renamed"]);
    }
}

//! Chapter naming, linking and narrative helpers.
//!
//! Pure pieces of the chapter writer: everything that decides *what* a
//! chapter is called, which earlier chapters it depends on, and what
//! narrative context it receives. The async loop that calls the model
//! lives in the app crate.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Abstraction, Chapter, RelationshipSet};

/// Lowercase, with every non-alphanumeric character replaced by `_`.
pub fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `NN_<safe name>` for 1-indexed chapter `number`.
pub fn chapter_slug(number: usize, name: &str) -> String {
    format!("{:02}_{}", number, safe_file_stem(name))
}

/// Leading chapter number of a slug.
pub fn chapter_number(slug: &str) -> Option<usize> {
    slug.split('_').next()?.parse().ok()
}

pub fn chapter_file_name(slug: &str) -> String {
    format!("{}.md", slug)
}

/// `# Chapter N: Name`
pub fn chapter_heading(number: usize, name: &str) -> String {
    format!("# Chapter {}: {}", number, name)
}

/// Prepend the expected heading if the model left it out.
pub fn ensure_heading(content: &str, number: usize, name: &str) -> String {
    let trimmed = content.trim_start();
    let has_heading = trimmed
        .strip_prefix(&format!("# Chapter {}", number))
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()));
    if has_heading {
        trimmed.to_string()
    } else {
        format!("{}\n\n{}", chapter_heading(number, name), trimmed)
    }
}

/// Which earlier chapters a chapter records as its dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// The immediately preceding chapter.
    #[default]
    Previous,
    /// Earlier chapters whose abstraction shares a relationship edge.
    Related,
}

impl FromStr for DependencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "previous" => Ok(DependencyPolicy::Previous),
            "related" => Ok(DependencyPolicy::Related),
            other => Err(format!(
                "unknown dependency policy '{}': expected previous or related",
                other
            )),
        }
    }
}

/// One position in the chapter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSlot {
    /// 1-indexed.
    pub number: usize,
    pub abstraction_index: usize,
    pub name: String,
    pub slug: String,
    pub dependencies: Vec<String>,
}

/// Lay out chapter slots for `order`. Indices in `order` that are out of
/// range for `abstractions` are skipped.
pub fn plan_chapters(
    order: &[usize],
    abstractions: &[Abstraction],
    relationships: Option<&RelationshipSet>,
    policy: DependencyPolicy,
) -> Vec<ChapterSlot> {
    let mut slots: Vec<ChapterSlot> = Vec::with_capacity(order.len());
    for &abstraction_index in order {
        let Some(abstraction) = abstractions.get(abstraction_index) else {
            continue;
        };
        let number = slots.len() + 1;
        let dependencies = match policy {
            DependencyPolicy::Previous => slots.last().map(|s| vec![s.slug.clone()]).unwrap_or_default(),
            DependencyPolicy::Related => {
                let neighbours: HashSet<usize> = relationships
                    .map(|set| {
                        set.details
                            .iter()
                            .filter_map(|r| {
                                if r.from == abstraction_index {
                                    Some(r.to)
                                } else if r.to == abstraction_index {
                                    Some(r.from)
                                } else {
                                    None
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                slots
                    .iter()
                    .filter(|s| neighbours.contains(&s.abstraction_index))
                    .map(|s| s.slug.clone())
                    .collect()
            }
        };
        slots.push(ChapterSlot {
            number,
            abstraction_index,
            name: abstraction.name.clone(),
            slug: chapter_slug(number, &abstraction.name),
            dependencies,
        });
    }
    slots
}

/// Numbered markdown list linking every chapter.
pub fn chapter_listing(slots: &[ChapterSlot]) -> String {
    slots
        .iter()
        .map(|s| format!("{}. [{}]({})", s.number, s.name, chapter_file_name(&s.slug)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rolling narrative summary: the content of every completed chapter, in
/// chapter order. `narrative_i = narrative_summary(&chapters[..i])`.
pub fn narrative_summary(completed: &[Chapter]) -> String {
    completed
        .iter()
        .map(|c| c.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relationship;
    use chrono::Utc;

    fn abstractions(names: &[&str]) -> Vec<Abstraction> {
        names
            .iter()
            .map(|n| Abstraction {
                name: n.to_string(),
                description: String::new(),
                file_indices: vec![],
            })
            .collect()
    }

    #[test]
    fn slugs_and_numbers() {
        assert_eq!(chapter_slug(1, "Query Engine"), "01_query_engine");
        assert_eq!(chapter_slug(12, "C++/FFI"), "12_c___ffi");
        assert_eq!(chapter_number("03_b"), Some(3));
        assert_eq!(chapter_number("x"), None);
    }

    #[test]
    fn heading_added_only_when_missing() {
        assert_eq!(
            ensure_heading("Body text", 2, "Parser"),
            "# Chapter 2: Parser\n\nBody text"
        );
        let already = "# Chapter 2: Parser Internals\n\nBody";
        assert_eq!(ensure_heading(already, 2, "Parser"), already);
    }

    #[test]
    fn heading_for_a_different_number_is_not_accepted() {
        let wrong = "# Chapter 12: Storage

Body";
        assert_eq!(
            ensure_heading(wrong, 1, "Cli"),
            "# Chapter 1: Cli

# Chapter 12: Storage

Body"
        );
        assert_eq!(ensure_heading("# Chapter 1\nBody", 1, "Cli"), "# Chapter 1\nBody");
    }

    #[test]
    fn previous_policy_links_to_prior_chapter() {
        let slots = plan_chapters(&[2, 0, 1], &abstractions(&["A", "B", "C"]), None, DependencyPolicy::Previous);
        assert_eq!(slots[0].slug, "01_c");
        assert!(slots[0].dependencies.is_empty());
        assert_eq!(slots[1].dependencies, vec!["01_c"]);
        assert_eq!(slots[2].dependencies, vec!["02_a"]);
    }

    #[test]
    fn related_policy_uses_relationship_edges() {
        let rels = RelationshipSet {
            summary: String::new(),
            details: vec![Relationship {
                from: 1,
                to: 0,
                label: "uses".into(),
            }],
        };
        let slots = plan_chapters(&[0, 2, 1], &abstractions(&["A", "B", "C"]), Some(&rels), DependencyPolicy::Related);
        assert!(slots[1].dependencies.is_empty());
        assert_eq!(slots[2].dependencies, vec!["01_a"]);
    }

    #[test]
    fn listing_links_files() {
        let slots = plan_chapters(&[0, 1], &abstractions(&["A", "B"]), None, DependencyPolicy::Previous);
        assert_eq!(chapter_listing(&slots), "1. [A](01_a.md)\n2. [B](02_b.md)");
    }

    #[test]
    fn narrative_is_fold_over_completed() {
        let ch = |c: &str| Chapter {
            slug: "s".into(),
            title: "t".into(),
            content: c.into(),
            abstractions_covered: vec![],
            dependencies: vec![],
            generated_at: Utc::now(),
            prompt_hash: String::new(),
        };
        assert_eq!(narrative_summary(&[]), "");
        assert_eq!(narrative_summary(&[ch("one\n"), ch("two")]), "one\n\n---\n\ntwo");
    }
}

//! Final artifact rendering: index page, relationship diagram and
//! per-chapter files with navigation links.

use crate::chapter::chapter_file_name;
use crate::models::{Abstraction, Chapter, RelationshipSet};

pub const ATTRIBUTION_FOOTER: &str = "---\n\nGenerated by Repo Tutor from the repository source.";

/// One output file, relative to the tutorial directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub file_name: String,
    pub content: String,
}

/// The complete rendered document set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tutorial {
    pub index: RenderedFile,
    pub chapters: Vec<RenderedFile>,
}

impl Tutorial {
    /// Index first, then chapters in order.
    pub fn files(&self) -> impl Iterator<Item = &RenderedFile> {
        std::iter::once(&self.index).chain(self.chapters.iter())
    }
}

fn diagram_label(text: &str) -> String {
    text.replace('"', "'").replace('\n', " ")
}

/// Mermaid flowchart of the abstraction graph. Edges pointing at unknown
/// abstractions are left out.
pub fn relationship_diagram(abstractions: &[Abstraction], relationships: &RelationshipSet) -> String {
    let mut lines = vec!["```mermaid".to_string(), "flowchart TD".to_string()];
    for (i, a) in abstractions.iter().enumerate() {
        lines.push(format!("    A{}[\"{}\"]", i, diagram_label(&a.name)));
    }
    for r in &relationships.details {
        if r.from < abstractions.len() && r.to < abstractions.len() {
            lines.push(format!(
                "    A{} -- \"{}\" --> A{}",
                r.from,
                diagram_label(&r.label),
                r.to
            ));
        }
    }
    lines.push("```".to_string());
    lines.join("\n")
}

/// Render the index page and every chapter file.
pub fn render_tutorial(
    project_name: &str,
    repo_url: Option<&str>,
    abstractions: &[Abstraction],
    relationships: &RelationshipSet,
    chapters: &[Chapter],
) -> Tutorial {
    let mut index = format!("# Tutorial: {}\n\n", project_name);
    if !relationships.summary.trim().is_empty() {
        index.push_str(relationships.summary.trim());
        index.push_str("\n\n");
    }
    if let Some(url) = repo_url.filter(|u| u.starts_with("http")) {
        index.push_str(&format!("**Source Repository:** [{}]({})\n\n", url, url));
    }
    index.push_str(&relationship_diagram(abstractions, relationships));
    index.push_str("\n\n## Chapters\n\n");
    for (i, chapter) in chapters.iter().enumerate() {
        index.push_str(&format!(
            "{}. [{}]({})\n",
            i + 1,
            chapter.title,
            chapter_file_name(&chapter.slug)
        ));
    }
    index.push('\n');
    index.push_str(ATTRIBUTION_FOOTER);
    index.push('\n');

    let rendered = chapters
        .iter()
        .enumerate()
        .map(|(i, chapter)| {
            let mut content = chapter.content.trim_end().to_string();
            content.push_str("\n\n");
            let mut nav = Vec::new();
            if let Some(prev) = i.checked_sub(1).and_then(|p| chapters.get(p)) {
                nav.push(format!("Previous: [{}]({})", prev.title, chapter_file_name(&prev.slug)));
            }
            nav.push("[Index](index.md)".to_string());
            if let Some(next) = chapters.get(i + 1) {
                nav.push(format!("Next: [{}]({})", next.title, chapter_file_name(&next.slug)));
            }
            content.push_str(&nav.join(" | "));
            content.push_str("\n\n");
            content.push_str(ATTRIBUTION_FOOTER);
            content.push('\n');
            RenderedFile {
                file_name: chapter_file_name(&chapter.slug),
                content,
            }
        })
        .collect();

    Tutorial {
        index: RenderedFile {
            file_name: "index.md".to_string(),
            content: index,
        },
        chapters: rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relationship;
    use chrono::Utc;

    fn chapter(slug: &str, title: &str) -> Chapter {
        Chapter {
            slug: slug.into(),
            title: title.into(),
            content: format!("# {}\n\nBody\n", title),
            abstractions_covered: vec![title.into()],
            dependencies: vec![],
            generated_at: Utc::now(),
            prompt_hash: String::new(),
        }
    }

    fn abstraction(name: &str) -> Abstraction {
        Abstraction {
            name: name.into(),
            description: String::new(),
            file_indices: vec![],
        }
    }

    #[test]
    fn diagram_escapes_quotes_and_skips_dangling_edges() {
        let rels = RelationshipSet {
            summary: String::new(),
            details: vec![
                Relationship {
                    from: 0,
                    to: 1,
                    label: "calls \"run\"".into(),
                },
                Relationship {
                    from: 0,
                    to: 9,
                    label: "ghost".into(),
                },
            ],
        };
        let diagram = relationship_diagram(&[abstraction("Cli"), abstraction("Engine")], &rels);
        assert!(diagram.contains("A0[\"Cli\"]"));
        assert!(diagram.contains("A0 -- \"calls 'run'\" --> A1"));
        assert!(!diagram.contains("ghost"));
    }

    #[test]
    fn tutorial_links_and_footer() {
        let chapters = vec![chapter("01_cli", "Cli"), chapter("02_engine", "Engine")];
        let rels = RelationshipSet {
            summary: "A small tool.".into(),
            details: vec![],
        };
        let tutorial = render_tutorial(
            "widget",
            Some("https://github.com/acme/widget"),
            &[abstraction("Cli"), abstraction("Engine")],
            &rels,
            &chapters,
        );

        assert!(tutorial.index.content.starts_with("# Tutorial: widget\n\nA small tool."));
        assert!(tutorial.index.content.contains("1. [Cli](01_cli.md)"));
        assert!(tutorial.index.content.contains("https://github.com/acme/widget"));
        assert_eq!(tutorial.files().count(), 3);

        let first = &tutorial.chapters[0].content;
        assert!(first.contains("Next: [Engine](02_engine.md)"));
        assert!(!first.contains("Previous:"));
        assert!(tutorial.chapters[1].content.contains("Previous: [Cli](01_cli.md)"));
        assert!(first.trim_end().ends_with(ATTRIBUTION_FOOTER.trim_end()));
    }
}

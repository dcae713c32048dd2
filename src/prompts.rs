//! Prompt templates for the model-backed stages.
//!
//! Each builder returns the full prompt text. The structured stages ask
//! for exactly one fenced YAML block matching the corresponding schema in
//! `repo_tutor_core::validate`.

use repo_tutor_core::chapter::ChapterSlot;
use repo_tutor_core::models::{Abstraction, DocumentationMode, RelationshipSet, SourceFile};
use repo_tutor_core::pack::PackedContext;

/// Instruction appended when output must be in a language other than English.
pub fn language_instruction(language: &str) -> Option<String> {
    let language = language.trim();
    if language.is_empty() || language.eq_ignore_ascii_case("english") {
        return None;
    }
    let mut chars = language.chars();
    let display = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return None,
    };
    Some(format!(
        "IMPORTANT: Write every name, description, label and all prose in **{}**. \
         Do not translate code identifiers, file paths or code snippets.",
        display
    ))
}

fn with_language(mut prompt: String, language: &str) -> String {
    if let Some(instruction) = language_instruction(language) {
        prompt.push_str("\n\n");
        prompt.push_str(&instruction);
    }
    prompt
}

fn audience(mode: DocumentationMode) -> &'static str {
    match mode {
        DocumentationMode::Tutorial => "a beginner-friendly tutorial for developers new to the codebase",
        DocumentationMode::Architecture => "an architecture reference for experienced engineers",
    }
}

fn abstraction_listing(abstractions: &[Abstraction]) -> String {
    abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| format!("- {} # {}", i, a.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn identify_abstractions(
    project_name: &str,
    files: &[SourceFile],
    packed: &PackedContext,
    max_abstractions: usize,
    mode: DocumentationMode,
    language: &str,
) -> String {
    let prompt = format!(
        r#"For the project `{project}`, you are preparing {audience}.

Codebase context:
{context}
Identify the top 5-{max} core abstractions a reader needs to understand the codebase.

For each abstraction provide:
1. A concise `name`.
2. A short `description` explaining what it is, with a simple analogy.
3. A list of relevant `file_indices` (integers), chosen from:
{listing}

Format the output as a YAML list inside a single ```yaml fenced block:

```yaml
- name: |
    Query Processing
  description: |
    Explains what the abstraction does.
  file_indices:
    - 0 # path/to/file1.py
    - 3 # path/to/related.py
```"#,
        project = project_name,
        audience = audience(mode),
        context = packed.context,
        max = max_abstractions,
        listing = packed.file_listing(files),
    );
    with_language(prompt, language)
}

pub fn analyze_relationships(
    project_name: &str,
    abstractions: &[Abstraction],
    packed: &PackedContext,
    language: &str,
) -> String {
    let details = abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let files = a
                .file_indices
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("- Index {} # {}\n  {}\n  Files: [{}]", i, a.name, a.description.trim(), files)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        r#"Based on the following abstractions and relevant code snippets from the project `{project}`:

Abstractions (index # name):
{listing}

Details:
{details}

Relevant code:
{context}
Provide:
1. A high-level `summary` of the project's purpose (a few sentences, markdown allowed).
2. A list `relationships` describing how the abstractions interact. For each give
   `from_abstraction` (source index), `to_abstraction` (target index) and a short `label`.

Every abstraction must appear in at least one relationship, as source or target.

Format the output as YAML inside a single ```yaml fenced block:

```yaml
summary: |
  A brief summary of the project.
relationships:
  - from_abstraction: 0 # Abstraction A
    to_abstraction: 1 # Abstraction B
    label: "Manages"
```"#,
        project = project_name,
        listing = abstraction_listing(abstractions),
        details = details,
        context = packed.context,
    );
    with_language(prompt, language)
}

pub fn order_chapters(
    project_name: &str,
    abstractions: &[Abstraction],
    relationships: &RelationshipSet,
    language: &str,
) -> String {
    let edges = relationships
        .details
        .iter()
        .map(|r| format!("- From {} to {}: {}", r.from, r.to, r.label))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        r#"Given the following project abstractions and their relationships for the project `{project}`:

Abstractions (index # name):
{listing}

Project summary:
{summary}

Relationships:
{edges}

What is the best order to explain these abstractions, from first to last?
Start with the most foundational or user-facing concepts, then move to lower-level
implementation details. Include every abstraction index exactly once.

Output the ordered list of indices inside a single ```yaml fenced block:

```yaml
- 2 # FoundationalConcept
- 0 # CoreClassA
- 1 # CoreClassB
```"#,
        project = project_name,
        listing = abstraction_listing(abstractions),
        summary = relationships.summary.trim(),
        edges = edges,
    );
    with_language(prompt, language)
}

/// Inputs for one chapter prompt.
pub struct ChapterPrompt<'a> {
    pub project_name: &'a str,
    pub slot: &'a ChapterSlot,
    pub abstraction: &'a Abstraction,
    pub total_chapters: usize,
    pub chapter_listing: &'a str,
    pub narrative: &'a str,
    pub packed: &'a PackedContext,
    pub mode: DocumentationMode,
    pub language: &'a str,
}

pub fn write_chapter(input: &ChapterPrompt<'_>) -> String {
    let narrative = if input.narrative.trim().is_empty() {
        "This is the first chapter.".to_string()
    } else {
        input.narrative.to_string()
    };

    let prompt = format!(
        r#"Write chapter {number} of {total} of {audience} for the project `{project}`.

Concept: {name}
Description:
{description}

Complete tutorial structure:
{listing}

Context from previous chapters:
{narrative}

Relevant code:
{context}
Instructions:
- Start with the heading `# Chapter {number}: {name}`.
- If this is not the first chapter, begin with a short transition from the previous chapter.
- Explain the problem this abstraction solves, its key ideas, and how it is used.
- Keep code blocks short; explain them right after.
- Link to other chapters using the markdown links from the structure above.
- End with a brief conclusion leading into the next chapter, if there is one.

Output only the markdown content of the chapter."#,
        number = input.slot.number,
        total = input.total_chapters,
        audience = audience(input.mode),
        project = input.project_name,
        name = input.slot.name,
        description = input.abstraction.description.trim(),
        listing = input.chapter_listing,
        narrative = narrative,
        context = input.packed.context,
    );
    with_language(prompt, input.language)
}

//! Token-budget-aware content packer.
//!
//! Reduces a file set to a context string that fits a model's context
//! window. Each file is first reduced with a [`PackStrategy`], then files
//! are added greedily in [`FilePriority`] order until the next one would
//! overflow the budget; the remainder is dropped.
//!
//! # Algorithm
//!
//! 1. Reduce every candidate file: keep head + tail lines ([`truncate_lines`])
//!    or keep only declarations ([`extract_signatures`]).
//! 2. Wrap it in a `--- File Index N: path ---` section.
//! 3. Estimate tokens as `ceil(chars / chars_per_token)`.
//! 4. Stable-sort candidates by priority (entry points first).
//! 5. Append sections until the next section would exceed the budget.
//!
//! ```rust
//! use repo_tutor_core::models::SourceFile;
//! use repo_tutor_core::pack::{pack_files, PackOptions, PackStrategy};
//!
//! let files = vec![
//!     SourceFile::new("src/util/strings.rs", "pub fn shout(s: &str) -> String { s.to_uppercase() }"),
//!     SourceFile::new("src/main.rs", "fn main() {}"),
//! ];
//! let opts = PackOptions::new(PackStrategy::Truncate { max_lines: 100 }, 10_000);
//! let packed = pack_files(&files, &[0, 1], &opts);
//! assert_eq!(packed.included, vec![1, 0]); // main.rs outranks util
//! ```

use std::sync::OnceLock;

use regex::RegexSet;

use crate::models::{DocumentationMode, SourceFile};

/// Default characters-per-token ratio for budget estimates.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default share of a truncation line budget kept from the top of a file.
pub const DEFAULT_HEAD_RATIO: f64 = 0.8;

/// Default share of the context window reserved for prompt scaffolding
/// and model output.
pub const DEFAULT_CONTEXT_RESERVE: f64 = 0.3;

/// How each file's content is reduced before packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackStrategy {
    /// Keep the head and tail of the file within `max_lines` lines.
    Truncate { max_lines: usize },
    /// Keep imports, exports, type declarations and signatures only.
    Signatures,
}

impl PackStrategy {
    /// Tutorials read real code, architecture docs read structure.
    pub fn for_mode(mode: DocumentationMode, max_lines: usize) -> Self {
        match mode {
            DocumentationMode::Tutorial => PackStrategy::Truncate { max_lines },
            DocumentationMode::Architecture => PackStrategy::Signatures,
        }
    }
}

/// Packing parameters.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub strategy: PackStrategy,
    /// Maximum estimated tokens for the whole context string.
    pub token_budget: usize,
    pub chars_per_token: f64,
    pub head_ratio: f64,
}

impl PackOptions {
    pub fn new(strategy: PackStrategy, token_budget: usize) -> Self {
        Self {
            strategy,
            token_budget,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            head_ratio: DEFAULT_HEAD_RATIO,
        }
    }
}

/// Token budget left for file context after reserving `reserve` of the
/// context window.
pub fn token_budget(context_window: usize, reserve: f64) -> usize {
    let reserve = reserve.clamp(0.0, 1.0);
    (context_window as f64 * (1.0 - reserve)).floor() as usize
}

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    if text.is_empty() {
        return 0;
    }
    let ratio = if chars_per_token > 0.0 {
        chars_per_token
    } else {
        DEFAULT_CHARS_PER_TOKEN
    };
    (text.chars().count() as f64 / ratio).ceil() as usize
}

/// Keep the first `head_ratio` and the last `1 - head_ratio` of
/// `max_lines` lines, with an omission marker in between.
pub fn truncate_lines(content: &str, max_lines: usize, head_ratio: f64) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return content.to_string();
    }
    let head = ((max_lines as f64) * head_ratio.clamp(0.0, 1.0)).floor() as usize;
    let tail = max_lines.saturating_sub(head);
    let omitted = lines.len() - head - tail;

    let mut out = String::with_capacity(content.len().min(max_lines * 80));
    for line in &lines[..head] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("\n... ({} lines omitted) ...\n\n", omitted));
    for line in &lines[lines.len() - tail..] {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn signature_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            // imports / exports / module wiring
            r"^(import|export|from\s+\S+\s+import|use|extern\s+crate|package|require|#include|mod)\b",
            r"^(const|let|var)\s+[\w{}\s,]+=\s*require\(",
            // Rust items
            r"^(pub(\([^)]*\))?\s+)?(async\s+)?(unsafe\s+)?(const\s+)?(fn|struct|enum|trait|type|impl|union|macro_rules!)\b",
            r"^#\[derive",
            // JS / TS
            r"^(export\s+)?(default\s+)?(declare\s+)?(abstract\s+)?(async\s+)?(function\*?|class|interface|type|enum|namespace)\b",
            r"^(export\s+)?(const|let)\s+[A-Za-z_$][\w$]*\s*(:[^=]+)?=\s*(async\s+)?(\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>",
            // Python
            r"^(async\s+)?def\s+\w+",
            r"^class\s+\w+",
            r"^@\w+",
            // Go
            r"^func\s",
            r"^type\s+\w+\s+(struct|interface)",
            // JVM / C# style members
            r"^((public|private|protected|internal|static|final|abstract|override|open|sealed|data|suspend)\s+)+[\w<>\[\],\s]*\(",
            r"^((public|private|protected|internal|static|final|abstract|open|sealed|data)\s+)*(class|interface|enum|record|object|struct)\s+\w+",
        ])
        .expect("Invalid regex")
    })
}

/// Keep only import/export lines, type declarations and function/class
/// signatures. Bodies are discarded; indentation is preserved.
pub fn extract_signatures(content: &str) -> String {
    let patterns = signature_patterns();
    let mut out = String::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        let is_comment = trimmed.starts_with("//")
            || (trimmed.starts_with('#')
                && !trimmed.starts_with("#[")
                && !trimmed.starts_with("#include"));
        if trimmed.is_empty() || is_comment {
            continue;
        }
        if patterns.is_match(trimmed) {
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out
}

/// Architectural significance of a file, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilePriority {
    EntryPoint,
    IndexFile,
    RouteOrLayout,
    Library,
    Other,
}

const ENTRY_STEMS: &[&str] = &["main", "app", "server", "cli", "program", "__main__"];
const INDEX_STEMS: &[&str] = &["index", "mod", "lib", "__init__"];
const ROUTE_MARKERS: &[&str] = &["route", "router", "layout", "page", "controller", "handler"];
const LIBRARY_DIRS: &[&str] = &["lib", "libs", "utils", "util", "components", "core", "common", "shared"];

/// Classify `path` into a [`FilePriority`] tier.
pub fn file_priority(path: &str) -> FilePriority {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let stem = file_name.split('.').next().unwrap_or(file_name);

    if ENTRY_STEMS.contains(&stem) {
        return FilePriority::EntryPoint;
    }
    if INDEX_STEMS.contains(&stem) {
        return FilePriority::IndexFile;
    }
    if ROUTE_MARKERS.iter().any(|m| file_name.contains(m))
        || normalized.split('/').any(|seg| seg == "routes" || seg == "pages" || seg == "app")
    {
        return FilePriority::RouteOrLayout;
    }
    if normalized
        .split('/')
        .rev()
        .skip(1)
        .any(|seg| LIBRARY_DIRS.contains(&seg))
    {
        return FilePriority::Library;
    }
    FilePriority::Other
}

/// Reduce one file's content according to `opts.strategy`.
pub fn reduce_content(content: &str, opts: &PackOptions) -> String {
    match opts.strategy {
        PackStrategy::Truncate { max_lines } => truncate_lines(content, max_lines, opts.head_ratio),
        PackStrategy::Signatures => extract_signatures(content),
    }
}

/// The packed context and what went into it.
#[derive(Debug, Clone, Default)]
pub struct PackedContext {
    pub context: String,
    /// File indices included, in packing (priority) order.
    pub included: Vec<usize>,
    /// Candidate indices dropped because the budget ran out.
    pub skipped: Vec<usize>,
    /// Token estimate of the untouched candidate contents.
    pub original_tokens: usize,
    /// Token estimate of `context`.
    pub packed_tokens: usize,
}

impl PackedContext {
    /// Percentage by which packing shrank the candidate content.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_tokens == 0 {
            return 0.0;
        }
        let saved = self.original_tokens.saturating_sub(self.packed_tokens);
        saved as f64 * 100.0 / self.original_tokens as f64
    }

    /// `- idx # path` lines for the included files, in index order.
    pub fn file_listing(&self, files: &[SourceFile]) -> String {
        let mut indices = self.included.clone();
        indices.sort_unstable();
        indices
            .iter()
            .filter_map(|&i| files.get(i).map(|f| format!("- {} # {}", i, f.path)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn section(index: usize, path: &str, body: &str) -> String {
    format!("--- File Index {}: {} ---\n{}\n\n", index, path, body)
}

/// Pack the `candidates` subset of `files` into a budget-bounded context.
///
/// Out-of-range candidate indices are ignored. Never fails: when the budget
/// is exhausted the lowest-priority files are dropped.
pub fn pack_files(files: &[SourceFile], candidates: &[usize], opts: &PackOptions) -> PackedContext {
    let mut order: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| i < files.len())
        .collect();
    order.sort_unstable();
    order.dedup();
    order.sort_by_key(|&i| (file_priority(&files[i].path), i));

    let mut packed = PackedContext::default();
    let mut remaining = opts.token_budget;
    let mut exhausted = false;

    for idx in order {
        let file = &files[idx];
        packed.original_tokens += estimate_tokens(&file.content, opts.chars_per_token);
        if exhausted {
            packed.skipped.push(idx);
            continue;
        }
        let body = reduce_content(&file.content, opts);
        let text = section(idx, &file.path, &body);
        let cost = estimate_tokens(&text, opts.chars_per_token);
        if cost > remaining {
            exhausted = true;
            packed.skipped.push(idx);
            continue;
        }
        remaining -= cost;
        packed.packed_tokens += cost;
        packed.context.push_str(&text);
        packed.included.push(idx);
    }

    tracing::info!(
        included = packed.included.len(),
        skipped = packed.skipped.len(),
        original_tokens = packed.original_tokens,
        packed_tokens = packed.packed_tokens,
        reduction_pct = %format!("{:.1}", packed.reduction_percent()),
        "packed file context"
    );

    packed
}

/// Pack every file in `files`.
pub fn pack_all(files: &[SourceFile], opts: &PackOptions) -> PackedContext {
    let all: Vec<usize> = (0..files.len()).collect();
    pack_files(files, &all, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, lines: usize) -> SourceFile {
        let content = (0..lines)
            .map(|i| format!("line number {} of {}", i, path))
            .collect::<Vec<_>>()
            .join("\n");
        SourceFile::new(path, content)
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 3.5), 0);
        assert_eq!(estimate_tokens("abc", 3.5), 1);
        assert_eq!(estimate_tokens("abcdefg", 3.5), 2);
        assert_eq!(estimate_tokens("abcdefgh", 3.5), 3);
    }

    #[test]
    fn budget_reserves_share_of_window() {
        assert_eq!(token_budget(100_000, 0.3), 70_000);
        assert_eq!(token_budget(1000, 1.5), 0);
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let content = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let out = truncate_lines(&content, 10, 0.8);
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], "0");
        assert_eq!(lines[7], "7");
        assert!(lines[8].contains("90 lines omitted"));
        assert_eq!(lines[9], "98");
        assert_eq!(lines[10], "99");
    }

    #[test]
    fn truncation_leaves_short_files_alone() {
        assert_eq!(truncate_lines("a\nb", 10, 0.8), "a\nb");
    }

    #[test]
    fn signatures_drop_bodies() {
        let src = r#"use std::fmt;
import os

pub struct Config {
    pub name: String,
}

pub fn load(path: &str) -> Config {
    let x = 1;
    Config { name: path.to_string() }
}

export function render(props) {
    return null;
}

def helper(a, b):
    return a + b
"#;
        let out = extract_signatures(src);
        assert!(out.contains("use std::fmt;"));
        assert!(out.contains("import os"));
        assert!(out.contains("pub struct Config {"));
        assert!(out.contains("pub fn load(path: &str) -> Config {"));
        assert!(out.contains("export function render(props) {"));
        assert!(out.contains("def helper(a, b):"));
        assert!(!out.contains("let x = 1;"));
        assert!(!out.contains("return a + b"));
    }

    #[test]
    fn priority_tiers() {
        assert_eq!(file_priority("src/main.rs"), FilePriority::EntryPoint);
        assert_eq!(file_priority("src/index.ts"), FilePriority::IndexFile);
        assert_eq!(file_priority("web/routes/users.ts"), FilePriority::RouteOrLayout);
        assert_eq!(file_priority("app/layout.tsx"), FilePriority::RouteOrLayout);
        assert_eq!(file_priority("src/utils/strings.ts"), FilePriority::Library);
        assert_eq!(file_priority("src/components/Button.tsx"), FilePriority::Library);
        assert_eq!(file_priority("docs/notes.md"), FilePriority::Other);
    }

    #[test]
    fn never_exceeds_budget() {
        let files: Vec<SourceFile> = (0..20).map(|i| file(&format!("src/f{}.rs", i), 40)).collect();
        for budget in [0usize, 10, 100, 500, 1000, 5000] {
            let opts = PackOptions::new(PackStrategy::Truncate { max_lines: 30 }, budget);
            let packed = pack_all(&files, &opts);
            assert!(packed.packed_tokens <= budget, "budget {} exceeded", budget);
            assert!(estimate_tokens(&packed.context, opts.chars_per_token) <= budget);
            assert_eq!(packed.included.len() + packed.skipped.len(), files.len());
        }
    }

    #[test]
    fn stops_at_first_file_that_does_not_fit() {
        let files = vec![
            file("src/main.rs", 5),
            file("src/huge.rs", 500),
            file("src/tiny.rs", 1),
        ];
        let opts = PackOptions::new(PackStrategy::Truncate { max_lines: 1000 }, 200);
        let packed = pack_all(&files, &opts);
        assert_eq!(packed.included, vec![0]);
        assert_eq!(packed.skipped, vec![1, 2]);
    }

    #[test]
    fn keeps_high_priority_files_under_pressure() {
        let files = vec![
            file("docs/a.md", 10),
            file("src/utils/b.rs", 10),
            file("src/main.rs", 10),
        ];
        let one_file = estimate_tokens(&section(2, "src/main.rs", &files[2].content), 3.5);
        let opts = PackOptions::new(PackStrategy::Truncate { max_lines: 100 }, one_file);
        let packed = pack_all(&files, &opts);
        assert_eq!(packed.included, vec![2]);
        assert!(packed.context.contains("--- File Index 2: src/main.rs ---"));
    }

    #[test]
    fn listing_uses_index_order() {
        let files = vec![file("src/a.rs", 1), file("src/main.rs", 1)];
        let packed = pack_all(&files, &PackOptions::new(PackStrategy::Signatures, 10_000));
        assert_eq!(packed.file_listing(&files), "- 0 # src/a.rs\n- 1 # src/main.rs");
    }
}

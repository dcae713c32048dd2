//! Structured output validation for model responses.
//!
//! Each analysis stage asks the model for one fenced YAML block. This
//! module extracts that block, parses it, and checks it against a
//! per-stage [`OutputSchema`] in a single pass:
//!
//! | Schema | Top level | Produces |
//! |--------|-----------|----------|
//! | [`AbstractionListSchema`] | list of `{name, description, file_indices}` | `Vec<Abstraction>` |
//! | [`RelationshipSchema`] | `{summary, relationships: [{from_abstraction, to_abstraction, label}]}` | [`RelationshipSet`] |
//! | [`ChapterOrderSchema`] | list of abstraction indices | `Vec<usize>` (a permutation) |
//!
//! Index references may be bare integers or strings like `"3 # parser.rs"`;
//! only the leading integer counts.

use serde_yaml::{Mapping, Value};

use crate::error::PipelineError;
use crate::models::{Abstraction, Relationship, RelationshipSet, StageName};

/// A stage-specific shape for parsed model output.
pub trait OutputSchema {
    type Output;

    /// Stage that errors are attributed to.
    fn stage(&self) -> StageName;

    /// Validate an already-parsed document.
    fn validate(&self, value: &Value) -> Result<Self::Output, PipelineError>;
}

/// Return the body of the first fenced block in `text`.
///
/// `yaml`/`yml` fences are preferred; otherwise the first fence of any
/// language is used. An unterminated fence counts as no block.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let (open, marker_len) = ["```yaml", "```yml", "```"]
        .iter()
        .find_map(|m| text.find(m).map(|pos| (pos, m.len())))?;
    let after_marker = &text[open + marker_len..];
    let body_start = after_marker.find('\n')? + 1;
    let body = &after_marker[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Extract, parse and validate `text` against `schema`.
pub fn parse_structured<S: OutputSchema>(
    schema: &S,
    text: &str,
) -> Result<S::Output, PipelineError> {
    let stage = schema.stage();
    let block = extract_fenced_block(text)
        .ok_or_else(|| PipelineError::malformed(stage, "no fenced ```yaml block found"))?;
    let value: Value = serde_yaml::from_str(block)
        .map_err(|e| PipelineError::malformed(stage, format!("YAML parse error: {}", e)))?;
    schema.validate(&value)
}

/// Parse an index reference and check `0 <= idx < bound`.
pub fn parse_index(
    stage: StageName,
    value: &Value,
    bound: usize,
    what: &str,
) -> Result<usize, PipelineError> {
    let idx = match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize).ok_or_else(|| {
            PipelineError::invalid_reference(
                stage,
                format!("{} index {} is not a non-negative integer", what, n),
            )
        })?,
        Value::String(s) => {
            let head = s.split('#').next().unwrap_or("").trim();
            head.parse::<usize>().map_err(|_| {
                PipelineError::invalid_reference(
                    stage,
                    format!("could not parse {} index from '{}'", what, s),
                )
            })?
        }
        other => {
            return Err(PipelineError::invalid_reference(
                stage,
                format!("{} index has unsupported type: {:?}", what, other),
            ))
        }
    };
    if idx >= bound {
        return Err(PipelineError::invalid_reference(
            stage,
            format!("{} index {} out of range (0..{})", what, idx, bound),
        ));
    }
    Ok(idx)
}

fn field<'a>(stage: StageName, map: &'a Mapping, key: &str, item: usize) -> Result<&'a Value, PipelineError> {
    map.get(key).ok_or_else(|| {
        PipelineError::malformed(stage, format!("item {} is missing '{}'", item, key))
    })
}

fn text_field(stage: StageName, map: &Mapping, key: &str, item: usize) -> Result<String, PipelineError> {
    match field(stage, map, key, item)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(PipelineError::malformed(
            stage,
            format!("item {}: '{}' must be text", item, key),
        )),
    }
}

fn as_sequence<'a>(stage: StageName, value: &'a Value, what: &str) -> Result<&'a Vec<Value>, PipelineError> {
    value
        .as_sequence()
        .ok_or_else(|| PipelineError::malformed(stage, format!("{} must be a list", what)))
}

/// Schema for the IdentifyAbstractions response.
#[derive(Debug, Clone, Copy)]
pub struct AbstractionListSchema {
    pub file_count: usize,
}

impl OutputSchema for AbstractionListSchema {
    type Output = Vec<Abstraction>;

    fn stage(&self) -> StageName {
        StageName::IdentifyAbstractions
    }

    fn validate(&self, value: &Value) -> Result<Vec<Abstraction>, PipelineError> {
        let stage = self.stage();
        let items = as_sequence(stage, value, "top-level abstraction output")?;
        let mut abstractions = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            let map = item
                .as_mapping()
                .ok_or_else(|| PipelineError::malformed(stage, format!("item {} is not a mapping", i)))?;
            let name = text_field(stage, map, "name", i)?;
            let description = text_field(stage, map, "description", i)?;
            let raw_indices = as_sequence(stage, field(stage, map, "file_indices", i)?, "file_indices")?;

            let mut file_indices = Vec::with_capacity(raw_indices.len());
            for raw in raw_indices {
                file_indices.push(parse_index(stage, raw, self.file_count, "file")?);
            }
            file_indices.sort_unstable();
            file_indices.dedup();

            abstractions.push(Abstraction {
                name,
                description,
                file_indices,
            });
        }

        if abstractions.is_empty() {
            return Err(PipelineError::malformed(stage, "no abstractions returned"));
        }
        Ok(abstractions)
    }
}

/// Schema for the AnalyzeRelationships response.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipSchema {
    pub abstraction_count: usize,
}

impl OutputSchema for RelationshipSchema {
    type Output = RelationshipSet;

    fn stage(&self) -> StageName {
        StageName::AnalyzeRelationships
    }

    fn validate(&self, value: &Value) -> Result<RelationshipSet, PipelineError> {
        let stage = self.stage();
        let map = value.as_mapping().ok_or_else(|| {
            PipelineError::malformed(stage, "top level must be a mapping with 'summary' and 'relationships'")
        })?;
        let summary = match map.get("summary") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(_) => return Err(PipelineError::malformed(stage, "'summary' must be text")),
            None => return Err(PipelineError::malformed(stage, "missing 'summary'")),
        };
        let items = match map.get("relationships") {
            Some(v) => as_sequence(stage, v, "'relationships'")?,
            None => return Err(PipelineError::malformed(stage, "missing 'relationships'")),
        };

        let mut details = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let rel = item
                .as_mapping()
                .ok_or_else(|| PipelineError::malformed(stage, format!("relationship {} is not a mapping", i)))?;
            let from = parse_index(
                stage,
                field(stage, rel, "from_abstraction", i)?,
                self.abstraction_count,
                "from_abstraction",
            )?;
            let to = parse_index(
                stage,
                field(stage, rel, "to_abstraction", i)?,
                self.abstraction_count,
                "to_abstraction",
            )?;
            let label = text_field(stage, rel, "label", i)?;
            details.push(Relationship { from, to, label });
        }

        Ok(RelationshipSet { summary, details })
    }
}

/// Abstraction indices that appear in no relationship, ascending.
pub fn uncovered_abstractions(set: &RelationshipSet, abstraction_count: usize) -> Vec<usize> {
    let mut covered = vec![false; abstraction_count];
    for rel in &set.details {
        if let Some(slot) = covered.get_mut(rel.from) {
            *slot = true;
        }
        if let Some(slot) = covered.get_mut(rel.to) {
            *slot = true;
        }
    }
    covered
        .iter()
        .enumerate()
        .filter(|(_, c)| !**c)
        .map(|(i, _)| i)
        .collect()
}

/// Schema for the OrderChapters response.
#[derive(Debug, Clone, Copy)]
pub struct ChapterOrderSchema {
    pub abstraction_count: usize,
}

impl OutputSchema for ChapterOrderSchema {
    type Output = Vec<usize>;

    fn stage(&self) -> StageName {
        StageName::OrderChapters
    }

    fn validate(&self, value: &Value) -> Result<Vec<usize>, PipelineError> {
        let stage = self.stage();
        let items = as_sequence(stage, value, "chapter order")?;
        let mut seen = vec![false; self.abstraction_count];
        let mut order = Vec::with_capacity(items.len());

        for item in items {
            let idx = parse_index(stage, item, self.abstraction_count, "abstraction")?;
            if seen[idx] {
                return Err(PipelineError::IncompleteOrder {
                    expected: self.abstraction_count,
                    reason: format!("abstraction {} appears more than once", idx),
                });
            }
            seen[idx] = true;
            order.push(idx);
        }

        let missing: Vec<usize> = seen
            .iter()
            .enumerate()
            .filter(|(_, s)| !**s)
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::IncompleteOrder {
                expected: self.abstraction_count,
                reason: format!("missing abstractions {:?}", missing),
            });
        }
        Ok(order)
    }
}

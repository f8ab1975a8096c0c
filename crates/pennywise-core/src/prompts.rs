//! Prompt library for the AI backends
//!
//! Prompts are markdown files with YAML frontmatter and `# System` / `# User`
//! sections. They are loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/pennywise/prompts/overrides/)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Templates use `{{var}}` placeholders and `{{#if var}}...{{/if}}` blocks
//! that are dropped when `var` is missing or empty.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

mod defaults {
    pub const CLASSIFY_EXTRACT: &str = include_str!("../../../prompts/classify_extract.md");
    pub const RESOLVE_DIRECTION: &str = include_str!("../../../prompts/resolve_direction.md");
}

/// Known prompt IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Combined transactional judgment + field extraction for free text
    ClassifyExtract,
    /// Debit/credit decision for an ambiguous statement row
    ResolveDirection,
}

impl PromptId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassifyExtract => "classify_extract",
            Self::ResolveDirection => "resolve_direction",
        }
    }

    pub fn all() -> &'static [PromptId] {
        &[Self::ClassifyExtract, Self::ResolveDirection]
    }

    fn embedded(&self) -> &'static str {
        match self {
            Self::ClassifyExtract => defaults::CLASSIFY_EXTRACT,
            Self::ResolveDirection => defaults::RESOLVE_DIRECTION,
        }
    }

    fn file_name(&self) -> String {
        format!("{}.md", self.as_str())
    }
}

/// Prompt frontmatter metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    pub id: String,
    pub version: u32,
    /// Kind of work the prompt asks for (structured_extraction, fast_classification)
    pub task_type: String,
}

/// A loaded prompt
#[derive(Debug, Clone)]
pub struct Prompt {
    pub metadata: PromptMetadata,
    /// Body after the frontmatter
    pub content: String,
    /// Where the override came from, if one was used
    pub override_path: Option<PathBuf>,
}

impl Prompt {
    pub fn system_section(&self) -> Option<&str> {
        extract_section(&self.content, "# System")
    }

    pub fn user_section(&self) -> Option<&str> {
        extract_section(&self.content, "# User")
    }

    /// Render the user section (or the whole body if it has none)
    pub fn render_user(&self, vars: &HashMap<&str, &str>) -> String {
        let template = self.user_section().unwrap_or(&self.content);
        render_template(template, vars)
    }
}

/// Caching prompt loader
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
    cache: HashMap<PromptId, Prompt>,
}

impl PromptLibrary {
    /// Library that honours overrides in the platform data directory
    pub fn new() -> Self {
        Self {
            override_dir: default_prompts_dir(),
            cache: HashMap::new(),
        }
    }

    pub fn with_override_dir(path: PathBuf) -> Self {
        Self {
            override_dir: Some(path),
            cache: HashMap::new(),
        }
    }

    /// Library that ignores overrides
    pub fn embedded_only() -> Self {
        Self {
            override_dir: None,
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, id: PromptId) -> Result<&Prompt> {
        match self.cache.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let prompt = load(self.override_dir.as_deref(), id)?;
                Ok(entry.insert(prompt))
            }
        }
    }

    pub fn render_user(&mut self, id: PromptId, vars: &HashMap<&str, &str>) -> Result<String> {
        Ok(self.get(id)?.render_user(vars))
    }

    pub fn has_override(&self, id: PromptId) -> bool {
        self.override_dir
            .as_ref()
            .is_some_and(|dir| dir.join(id.file_name()).exists())
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Default prompts override directory
pub fn default_prompts_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("pennywise").join("prompts").join("overrides"))
}

fn load(override_dir: Option<&Path>, id: PromptId) -> Result<Prompt> {
    if let Some(dir) = override_dir {
        let path = dir.join(id.file_name());
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read prompt override: {}", e)))?;
            let (metadata, content) = parse_prompt(&content)?;
            return Ok(Prompt {
                metadata,
                content,
                override_path: Some(path),
            });
        }
    }

    let (metadata, content) = parse_prompt(id.embedded())?;
    Ok(Prompt {
        metadata,
        content,
        override_path: None,
    })
}

/// Split a prompt file into frontmatter metadata and body
fn parse_prompt(content: &str) -> Result<(PromptMetadata, String)> {
    let content = content.trim();
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| Error::Config("Prompt must start with YAML frontmatter (---)".into()))?;

    let end = rest
        .find("---")
        .ok_or_else(|| Error::Config("Prompt frontmatter not closed (missing second ---)".into()))?;

    let metadata: PromptMetadata = serde_yaml::from_str(rest[..end].trim())
        .map_err(|e| Error::Config(format!("Invalid prompt frontmatter: {}", e)))?;

    Ok((metadata, rest[end + 3..].trim().to_string()))
}

fn extract_section<'a>(content: &'a str, header: &str) -> Option<&'a str> {
    let start = content.find(header)?;
    let after = &content[start + header.len()..];
    let end = after.find("\n# ").unwrap_or(after.len());
    Some(after[..end].trim())
}

fn render_template(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut out = resolve_conditionals(template, vars);
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

/// Keep or drop `{{#if var}}...{{/if}}` blocks
fn resolve_conditionals(content: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = content.to_string();

    while let Some(if_start) = result.find("{{#if ") {
        let name_start = if_start + 6;
        let Some(name_len) = result[name_start..].find("}}") else {
            break;
        };
        let block_start = name_start + name_len + 2;
        let Some(block_len) = result[block_start..].find("{{/if}}") else {
            break;
        };

        let name = &result[name_start..name_start + name_len];
        let block_end = block_start + block_len;
        let keep = vars.get(name).is_some_and(|v| !v.is_empty());

        result = if keep {
            format!(
                "{}{}{}",
                &result[..if_start],
                &result[block_start..block_end],
                &result[block_end + 7..]
            )
        } else {
            format!("{}{}", &result[..if_start], &result[block_end + 7..])
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt() {
        let content = r#"---
id: test_prompt
version: 2
task_type: fast_classification
---

# System
Be terse.

# User
Classify {{message}}.
"#;

        let (metadata, body) = parse_prompt(content).unwrap();
        assert_eq!(metadata.id, "test_prompt");
        assert_eq!(metadata.version, 2);
        assert_eq!(extract_section(&body, "# System"), Some("Be terse."));
        assert_eq!(extract_section(&body, "# User"), Some("Classify {{message}}."));
    }

    #[test]
    fn test_parse_prompt_requires_frontmatter() {
        assert!(parse_prompt("# User\nhello").is_err());
        assert!(parse_prompt("---\nid: x\n# User\nhello").is_err());
    }

    #[test]
    fn test_conditionals() {
        let template = "A{{#if note}}\nNote: {{note}}{{/if}}\nB";

        let mut vars = HashMap::new();
        vars.insert("note", "hi");
        assert_eq!(render_template(template, &vars), "A\nNote: hi\nB");

        let empty: HashMap<&str, &str> = HashMap::new();
        assert_eq!(render_template(template, &empty), "A\nB");
    }

    #[test]
    fn test_embedded_prompts_parse_with_matching_ids() {
        let mut lib = PromptLibrary::embedded_only();
        for id in PromptId::all() {
            let prompt = lib.get(*id).unwrap();
            assert_eq!(prompt.metadata.id, id.as_str());
            assert!(prompt.override_path.is_none());
            assert!(prompt.user_section().is_some());
        }
    }

    #[test]
    fn test_classify_extract_renders_sender_conditionally() {
        let mut lib = PromptLibrary::embedded_only();

        let mut vars = HashMap::new();
        vars.insert("message", "Rs.250 debited from A/c XX1234");
        vars.insert("sender", "AX-HDFCBK");
        let rendered = lib.render_user(PromptId::ClassifyExtract, &vars).unwrap();
        assert!(rendered.contains("Sender: AX-HDFCBK"));
        assert!(rendered.contains("Message: Rs.250 debited"));
        assert!(!rendered.contains("{{"));

        vars.insert("sender", "");
        let rendered = lib.render_user(PromptId::ClassifyExtract, &vars).unwrap();
        assert!(!rendered.contains("Sender:"));
    }

    #[test]
    fn test_override_dir_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("resolve_direction.md"),
            "---\nid: resolve_direction\nversion: 9\ntask_type: x\n---\n# User\nCustom {{description}}",
        )
        .unwrap();

        let mut lib = PromptLibrary::with_override_dir(dir.path().to_path_buf());
        assert!(lib.has_override(PromptId::ResolveDirection));
        assert!(!lib.has_override(PromptId::ClassifyExtract));

        let prompt = lib.get(PromptId::ResolveDirection).unwrap();
        assert_eq!(prompt.metadata.version, 9);
        assert!(prompt.override_path.is_some());
    }
}

//! YAML-backed prompt library
//!
//! Prompts are addressed by dot-path (`system_prompts.intake_agent`).
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces,
//! which keeps JSON examples inside templates readable.

use crate::contracts::PromptRenderer;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const DEFAULT_PROMPTS: &str = include_str!("default_prompts.yaml");

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt not found: {0}")]
    NotFound(String),

    #[error("'{0}' does not point to a string prompt")]
    NotAString(String),

    #[error("missing template variables for '{template}': {}", .missing.join(", "))]
    MissingVariables {
        template: String,
        missing: Vec<String>,
    },

    #[error("malformed template '{template}': stray brace at byte {offset}")]
    Malformed { template: String, offset: usize },

    #[error("failed to read prompts from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid prompts YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Problems found by [`PromptLibrary::validate`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub empty: Vec<String>,
    pub malformed: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.empty.is_empty() && self.malformed.is_empty()
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Literal(String),
    Placeholder(&'a str),
}

/// Splits a template into literal text and placeholders.
/// Returns the byte offset of the first stray brace on failure.
fn tokenize(template: &str) -> Result<Vec<Token<'_>>, usize> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let rest = &template[offset + 1..];
                let end = rest.find('}').ok_or(offset)?;
                let name = &rest[..end];
                let valid = !name.is_empty()
                    && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
                if !valid {
                    return Err(offset);
                }
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Placeholder(name));
                // name is ASCII, so one char per byte plus the closing brace
                for _ in 0..=name.len() {
                    chars.next();
                }
            }
            '}' => return Err(offset),
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Prompt collection loaded from a YAML document
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    root: Value,
}

impl PromptLibrary {
    /// Library with the prompts shipped in this crate
    pub fn builtin() -> Result<Self, PromptError> {
        Self::from_yaml_str(DEFAULT_PROMPTS)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, PromptError> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Ok(Self { root })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded prompt library");
        Self::from_yaml_str(&yaml)
    }

    /// Prompt text at `path`, trimmed
    pub fn get(&self, path: &str) -> Result<&str, PromptError> {
        let mut node = &self.root;
        for part in path.split('.') {
            node = node
                .get(part)
                .ok_or_else(|| PromptError::NotFound(path.to_string()))?;
        }
        node.as_str()
            .map(str::trim)
            .ok_or_else(|| PromptError::NotAString(path.to_string()))
    }

    pub fn system_prompt(&self, agent_name: &str) -> Result<&str, PromptError> {
        self.get(&format!("system_prompts.{agent_name}"))
    }

    /// Substitutes every `{name}` placeholder of the template at `path`.
    ///
    /// All missing variables are reported together. Extra variables are ignored.
    pub fn render(
        &self,
        path: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, PromptError> {
        let template = self.get(path)?;
        let tokens = tokenize(template).map_err(|offset| PromptError::Malformed {
            template: path.to_string(),
            offset,
        })?;

        let mut missing: Vec<String> = Vec::new();
        let mut rendered = String::with_capacity(template.len());
        for token in &tokens {
            match token {
                Token::Literal(text) => rendered.push_str(text),
                Token::Placeholder(name) => match variables.get(*name) {
                    Some(value) => rendered.push_str(value),
                    None => {
                        if !missing.iter().any(|m| m == name) {
                            missing.push((*name).to_string());
                        }
                    }
                },
            }
        }

        if !missing.is_empty() {
            return Err(PromptError::MissingVariables {
                template: path.to_string(),
                missing,
            });
        }
        Ok(rendered)
    }

    /// Placeholder names used by the template at `path`, in order of first use
    pub fn placeholders(&self, path: &str) -> Result<Vec<String>, PromptError> {
        let template = self.get(path)?;
        let tokens = tokenize(template).map_err(|offset| PromptError::Malformed {
            template: path.to_string(),
            offset,
        })?;

        let mut names: Vec<String> = Vec::new();
        for token in tokens {
            if let Token::Placeholder(name) = token {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Dot-paths of all string prompts, optionally filtered by prefix
    pub fn list(&self, prefix: Option<&str>) -> Vec<String> {
        fn flatten(node: &Value, parent: &str, out: &mut Vec<String>) {
            if let Value::Mapping(map) = node {
                for (key, value) in map {
                    let Some(key) = key.as_str() else { continue };
                    let path = if parent.is_empty() {
                        key.to_string()
                    } else {
                        format!("{parent}.{key}")
                    };
                    match value {
                        Value::String(_) => out.push(path),
                        Value::Mapping(_) => flatten(value, &path, out),
                        _ => {}
                    }
                }
            }
        }

        let mut paths = Vec::new();
        flatten(&self.root, "", &mut paths);
        match prefix {
            Some(prefix) => paths.into_iter().filter(|p| p.starts_with(prefix)).collect(),
            None => paths,
        }
    }

    /// Checks every prompt for empty text and stray braces
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for path in self.list(None) {
            let Ok(text) = self.get(&path) else { continue };
            if text.is_empty() {
                report.empty.push(path);
            } else if tokenize(text).is_err() {
                report.malformed.push(path);
            }
        }
        report
    }
}

impl PromptRenderer for PromptLibrary {
    fn render(
        &self,
        template_key: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, PromptError> {
        PromptLibrary::render(self, template_key, variables)
    }
}

//! Reply templates — parsed from a markdown-ish document.
//!
//! Each `## name` heading introduces a template. The body is either the
//! first fenced code block under the heading or, absent a fence, the
//! plain text up to the next heading.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// Named reply templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: HashMap<String, String>,
}

impl TemplateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a template document.
    pub fn parse(doc: &str) -> Self {
        let mut templates = HashMap::new();
        let mut name: Option<String> = None;
        let mut body: Vec<String> = Vec::new();
        let mut in_fence = false;
        let mut saw_fence = false;

        let mut flush = |name: &mut Option<String>, body: &mut Vec<String>| {
            if let Some(n) = name.take() {
                let text = body.join("\n").trim().to_string();
                if !text.is_empty() {
                    templates.insert(n, text);
                }
            }
            body.clear();
        };

        for line in doc.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                flush(&mut name, &mut body);
                name = Some(heading.trim().to_lowercase());
                in_fence = false;
                saw_fence = false;
                continue;
            }
            if name.is_none() {
                continue;
            }
            if line.trim_start().starts_with("```") {
                if in_fence {
                    // Closing fence ends the template body.
                    flush(&mut name, &mut body);
                    in_fence = false;
                } else if !saw_fence {
                    in_fence = true;
                    saw_fence = true;
                    body.clear();
                }
                continue;
            }
            body.push(line.to_string());
        }
        flush(&mut name, &mut body);

        Self { templates }
    }

    /// Load from a file. A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    /// Lookup is case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(&name.trim().to_lowercase()).map(String::as_str)
    }

    /// Sorted template names, for prompt assembly.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

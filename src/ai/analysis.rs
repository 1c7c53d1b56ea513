//! Lenient parsing of model output — metadata lines and template markers.
//!
//! Models are asked to end their reply with `CATEGORY:` / `SENTIMENT:` /
//! `PRIORITY:` lines and, when appropriate, a `USE_TEMPLATE:` marker.
//! They don't always comply; anything missing or unrecognized falls back
//! to defaults, and parsing never fails.

use std::sync::LazyLock;

use regex::Regex;

use crate::mail::types::{Category, MessageAnalysis, Priority, Sentiment};

static CATEGORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*category:\s*(\S+)\s*$").unwrap());
static SENTIMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*sentiment:\s*(\S+)\s*$").unwrap());
static PRIORITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*priority:\s*(\S+)\s*$").unwrap());
static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*use_template:\s*(\S+)\s*$").unwrap());
static META_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(category|sentiment|priority|use_template):.*$").unwrap()
});

/// Parsed model output: cleaned reply text plus extracted metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub text: String,
    pub analysis: MessageAnalysis,
    /// Template the model selected, if any.
    pub template: Option<String>,
}

/// Extract metadata and strip the marker lines from a raw completion.
pub fn parse_output(raw: &str) -> ParsedOutput {
    let analysis = MessageAnalysis {
        category: first_capture(&CATEGORY_RE, raw).map_or_else(Category::default, |s| Category::parse(&s)),
        sentiment: first_capture(&SENTIMENT_RE, raw).map_or_else(Sentiment::default, |s| Sentiment::parse(&s)),
        priority: first_capture(&PRIORITY_RE, raw).map_or_else(Priority::default, |s| Priority::parse(&s)),
    };
    let template = first_capture(&TEMPLATE_RE, raw).filter(|t| !t.is_empty());
    let text = clean(raw);
    ParsedOutput { text, analysis, template }
}

fn first_capture(re: &Regex, raw: &str) -> Option<String> {
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Remove all metadata/marker lines and trim surrounding blank lines.
fn clean(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().filter(|l| !META_LINE_RE.is_match(l)).collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    lines.join("\n").trim().to_string()
}

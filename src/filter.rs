//! Admission filter — decides which messages get an automated reply.
//!
//! Evaluation order, first match wins:
//! 1. allow rule match → admit (skips every later check)
//! 2. deny rule match → reject
//! 3. outside business hours → reject
//! 4. older than the age cutoff → reject
//! 5. otherwise admit

use std::path::Path;

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::debug;

use crate::config::FilterConfig;
use crate::error::ConfigError;
use crate::mail::types::NormalizedMessage;

// ── Rules ───────────────────────────────────────────────────────────

/// A single filter rule. All matching is case-insensitive; patterns are
/// stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    /// Exact sender address equality.
    Address(String),
    /// Sender domain suffix match (`@example.com`).
    Domain(String),
    /// Substring of the sender address.
    SenderKeyword(String),
    /// Substring of the subject.
    Subject(String),
}

impl FilterRule {
    /// Parse one rule-file line. Returns `None` for blanks and comments.
    ///
    /// Syntax: `# comment`, `@domain`, `*keyword*`, `subject:text`,
    /// anything else is an exact address.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let lower = line.to_lowercase();
        if let Some(rest) = lower.strip_prefix("subject:") {
            return Some(FilterRule::Subject(rest.trim().to_string()));
        }
        if lower.starts_with('@') {
            return Some(FilterRule::Domain(lower));
        }
        if lower.len() > 2 && lower.starts_with('*') && lower.ends_with('*') {
            return Some(FilterRule::SenderKeyword(lower[1..lower.len() - 1].to_string()));
        }
        Some(FilterRule::Address(lower))
    }

    /// Whether this rule matches the message.
    pub fn matches(&self, msg: &NormalizedMessage) -> bool {
        let sender = msg.sender.to_lowercase();
        match self {
            FilterRule::Address(addr) => sender == *addr,
            FilterRule::Domain(domain) => sender.ends_with(domain),
            FilterRule::SenderKeyword(kw) => sender.contains(kw),
            FilterRule::Subject(text) => msg.subject.to_lowercase().contains(text),
        }
    }
}

/// Load rules from a line-oriented file. A missing file is an empty set.
pub fn load_rules(path: &Path) -> Result<Vec<FilterRule>, ConfigError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(raw.lines().filter_map(FilterRule::parse).collect())
}

/// Deny rules used when no deny file is configured: automated senders
/// and obvious bulk mail.
pub fn default_deny_rules() -> Vec<FilterRule> {
    vec![
        FilterRule::SenderKeyword("noreply".to_string()),
        FilterRule::SenderKeyword("no-reply".to_string()),
        FilterRule::SenderKeyword("mailer-daemon".to_string()),
        FilterRule::SenderKeyword("postmaster".to_string()),
        FilterRule::Subject("unsubscribe".to_string()),
    ]
}

// ── Business hours ──────────────────────────────────────────────────

/// Reply window: a set of weekdays and an `[start, end)` hour range.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    /// 0 = Monday .. 6 = Sunday.
    pub days: Vec<u8>,
    pub start_hour: u8,
    pub end_hour: u8,
}

impl BusinessHours {
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let day = now.weekday().num_days_from_monday() as u8;
        let hour = now.hour() as u8;
        self.days.contains(&day) && hour >= self.start_hour && hour < self.end_hour
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Why a message was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Denied(FilterRule),
    OutsideBusinessHours,
    TooOld,
}

/// Admission decision with its cause, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

/// Immutable filter engine, built once at startup.
pub struct FilterEngine {
    allow: Vec<FilterRule>,
    deny: Vec<FilterRule>,
    hours: BusinessHours,
    max_age_hours: i64,
}

impl FilterEngine {
    pub fn new(
        allow: Vec<FilterRule>,
        deny: Vec<FilterRule>,
        hours: BusinessHours,
        max_age_hours: u32,
    ) -> Self {
        Self { allow, deny, hours, max_age_hours: i64::from(max_age_hours) }
    }

    /// Build from config: load rule files, fall back to the default deny
    /// set when no deny file is configured.
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let allow = match &config.allow_rules_path {
            Some(path) => load_rules(Path::new(path))?,
            None => Vec::new(),
        };
        let deny = match &config.deny_rules_path {
            Some(path) => load_rules(Path::new(path))?,
            None => default_deny_rules(),
        };
        Ok(Self::new(
            allow,
            deny,
            BusinessHours {
                days: config.business_days.clone(),
                start_hour: config.business_start_hour,
                end_hour: config.business_end_hour,
            },
            config.max_age_hours,
        ))
    }

    /// Full evaluation with the rejection cause.
    pub fn evaluate(&self, msg: &NormalizedMessage, now: NaiveDateTime) -> Verdict {
        if let Some(rule) = self.allow.iter().find(|r| r.matches(msg)) {
            debug!(id = %msg.message_id, rule = ?rule, "allow rule matched");
            return Verdict::Admit;
        }
        if let Some(rule) = self.deny.iter().find(|r| r.matches(msg)) {
            debug!(id = %msg.message_id, rule = ?rule, "deny rule matched");
            return Verdict::Reject(RejectReason::Denied(rule.clone()));
        }
        if !self.hours.contains(now) {
            return Verdict::Reject(RejectReason::OutsideBusinessHours);
        }
        let age = now - msg.timestamp;
        if age > chrono::Duration::hours(self.max_age_hours) {
            return Verdict::Reject(RejectReason::TooOld);
        }
        Verdict::Admit
    }

    /// Convenience boolean form of `evaluate`.
    pub fn admit(&self, msg: &NormalizedMessage, now: NaiveDateTime) -> bool {
        matches!(self.evaluate(msg, now), Verdict::Admit)
    }
}

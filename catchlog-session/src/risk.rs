//! Sensitivity classification for persistence artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Risk::Low => write!(f, "low"),
            Risk::Medium => write!(f, "medium"),
            Risk::High => write!(f, "high"),
            Risk::Critical => write!(f, "critical"),
        }
    }
}

/// A case-insensitive substring rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    pub pattern: String,
    pub risk: Risk,
}

impl RiskRule {
    pub fn new(pattern: &str, risk: Risk) -> Self {
        Self {
            pattern: pattern.to_ascii_lowercase(),
            risk,
        }
    }

    fn matches(&self, key: &str) -> bool {
        key.contains(&self.pattern)
    }
}

/// Ordered pattern table. The first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTable {
    rules: Vec<RiskRule>,
    fallback: Risk,
}

impl Default for RiskTable {
    fn default() -> Self {
        // Own bookkeeping namespaces come first so "keyflag" is not read as key material.
        let rules = [
            ("catchlog.migration.", Risk::Low),
            ("catchlog.keyflag.", Risk::Low),
            ("key", Risk::Critical),
            ("secret", Risk::Critical),
            ("token", Risk::Critical),
            ("salt", Risk::Critical),
            ("trip", Risk::High),
            ("fish", Risk::High),
            ("photo", Risk::High),
            ("location", Risk::High),
            ("weather", Risk::High),
            ("cache", Risk::Medium),
            ("draft", Risk::Medium),
            ("pending", Risk::Medium),
            ("queue", Risk::Medium),
            ("progress", Risk::Low),
            ("pref", Risk::Low),
            ("flag", Risk::Low),
        ]
        .into_iter()
        .map(|(p, r)| RiskRule::new(p, r))
        .collect();

        Self {
            rules,
            fallback: Risk::Medium,
        }
    }
}

impl RiskTable {
    pub fn new(rules: Vec<RiskRule>, fallback: Risk) -> Self {
        Self { rules, fallback }
    }

    /// Adds a rule ahead of the existing ones.
    pub fn with_rule(mut self, pattern: &str, risk: Risk) -> Self {
        self.rules.insert(0, RiskRule::new(pattern, risk));
        self
    }

    pub fn classify(&self, key: &str) -> Risk {
        let key = key.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| r.matches(&key))
            .map(|r| r.risk)
            .unwrap_or(self.fallback)
    }

    pub fn rules(&self) -> &[RiskRule] {
        &self.rules
    }
}

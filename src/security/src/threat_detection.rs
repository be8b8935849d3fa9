//! Threat Detection Module
//!
//! Best-effort pattern scan over the request target and body. Findings are reported
//! for logging only; nothing here ever rejects a request.

use crate::errors::{SecurityError, SecurityResult};
use http::Uri;
use regex::{RegexSet, RegexSetBuilder};
use serde::Serialize;

/// Classification of a matched pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ScriptInjection,
    SqlInjection,
    Other,
}

/// One matched pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyFinding {
    pub pattern: String,
    pub kind: AnomalyKind,
}

#[derive(Debug)]
pub struct AnomalyScanner {
    patterns: Vec<String>,
    set: RegexSet,
}

impl AnomalyScanner {
    /// Compile case-insensitive patterns
    pub fn new(patterns: &[String]) -> SecurityResult<Self> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                SecurityError::Configuration(format!("Invalid anomaly pattern: {}", e))
            })?;

        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    /// Scan the decoded request target and the body
    pub fn scan(&self, uri: &Uri, body: &[u8]) -> Vec<AnomalyFinding> {
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let target = target.replace('+', " ");
        let decoded = urlencoding::decode(&target)
            .map(|d| d.into_owned())
            .unwrap_or(target);

        let mut findings = self.scan_text(&decoded);
        if !body.is_empty() {
            for finding in self.scan_text(&String::from_utf8_lossy(body)) {
                if !findings.contains(&finding) {
                    findings.push(finding);
                }
            }
        }
        findings
    }

    pub fn scan_text(&self, input: &str) -> Vec<AnomalyFinding> {
        self.set
            .matches(input)
            .into_iter()
            .map(|index| {
                let pattern = &self.patterns[index];
                AnomalyFinding {
                    pattern: pattern.clone(),
                    kind: classify(pattern),
                }
            })
            .collect()
    }
}

fn classify(pattern: &str) -> AnomalyKind {
    let pattern = pattern.to_ascii_lowercase();
    if pattern.contains("script") || pattern.starts_with("on") {
        AnomalyKind::ScriptInjection
    } else if ["select", "drop", "insert", "delete", "update"]
        .iter()
        .any(|keyword| pattern.contains(keyword))
    {
        AnomalyKind::SqlInjection
    } else {
        AnomalyKind::Other
    }
}

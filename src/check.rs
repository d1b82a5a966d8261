//! Per-call pass/fail checks.
//!
//! Every check in an operation's set is evaluated independently — one failure
//! does not short-circuit the rest, so a single report lists every violation.
//! Ambiguous GraphQL responses (unparseable bodies) count as failures, never
//! as passes.

use std::time::Duration;

use serde_json::Value;

use crate::config::{OperationDefinition, OperationKind};
use crate::transport::HttpResponse;

/// One declarative assertion against a completed call.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    StatusEquals(u16),
    BodyPathExists(String),
    HeaderPresent(String),
    MaxDurationMs(u64),
    BodyContains(String),
    NoGraphQlErrors,
    HasGraphQlData,
}

impl Check {
    /// Lower an operation's wire-form check object into the effective check
    /// set. Unspecified: status 200; GraphQL operations additionally get
    /// `NoGraphQlErrors` and `HasGraphQlData` unless explicitly disabled.
    pub fn for_operation(op: &OperationDefinition) -> Vec<Check> {
        let cfg = op.checks.clone().unwrap_or_default();
        let mut checks = vec![Check::StatusEquals(cfg.status.unwrap_or(200))];
        if matches!(op.kind, OperationKind::Graphql { .. }) {
            if cfg.no_graphql_errors != Some(false) {
                checks.push(Check::NoGraphQlErrors);
            }
            if cfg.has_data != Some(false) {
                checks.push(Check::HasGraphQlData);
            }
        }
        if let Some(path) = cfg.body_path {
            checks.push(Check::BodyPathExists(path));
        }
        if let Some(name) = cfg.header_present {
            checks.push(Check::HeaderPresent(name));
        }
        if let Some(needle) = cfg.body_contains {
            checks.push(Check::BodyContains(needle));
        }
        if let Some(ms) = cfg.max_duration_ms {
            checks.push(Check::MaxDurationMs(ms));
        }
        checks
    }

    fn label(&self) -> String {
        match self {
            Check::StatusEquals(code) => format!("status is {code}"),
            Check::BodyPathExists(path) => format!("body path `{path}` exists"),
            Check::HeaderPresent(name) => format!("header `{name}` present"),
            Check::MaxDurationMs(ms) => format!("duration <= {ms}ms"),
            Check::BodyContains(needle) => format!("body contains `{needle}`"),
            Check::NoGraphQlErrors => "no graphql errors".to_string(),
            Check::HasGraphQlData => "graphql data present".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Labels of every check that failed.
    pub failures: Vec<String>,
}

/// Evaluate every check against one completed call. `duration` is the
/// wall-clock time of the recorded attempt only, excluding any 401 retry.
pub fn evaluate(response: &HttpResponse, duration: Duration, checks: &[Check]) -> CheckOutcome {
    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    let mut failures = Vec::new();

    for check in checks {
        let ok = match check {
            Check::StatusEquals(code) => response.status == *code,
            Check::BodyPathExists(path) => parsed
                .as_ref()
                .and_then(|body| json_path(body, path))
                .is_some_and(|v| !v.is_null()),
            Check::HeaderPresent(name) => {
                response.headers.contains_key(&name.to_ascii_lowercase())
            }
            Check::MaxDurationMs(ms) => duration.as_millis() as u64 <= *ms,
            Check::BodyContains(needle) => response.body.contains(needle.as_str()),
            Check::NoGraphQlErrors => match parsed.as_ref() {
                Some(body) => match body.get("errors") {
                    None => true,
                    Some(errors) => errors.as_array().is_some_and(|a| a.is_empty()),
                },
                None => false,
            },
            Check::HasGraphQlData => parsed
                .as_ref()
                .and_then(|body| body.get("data"))
                .is_some_and(|data| !data.is_null()),
        };
        if !ok {
            failures.push(check.label());
        }
    }

    CheckOutcome {
        passed: failures.is_empty(),
        failures,
    }
}

/// Walk a dot-separated key path through a JSON value. `None` on any missing
/// key or when descending into a non-object; the empty path returns the value
/// itself. Shared with setup result capture.
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |v, key| v.get(key))
}

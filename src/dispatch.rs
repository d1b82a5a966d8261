//! Building, sending and scoring one call at a time.
//!
//! The dispatcher owns everything a single virtual user needs to turn an
//! [`OperationDefinition`] into a scored request: the auth manager (with its
//! per-VU token cache), the shared transport, the shared metrics registry and
//! the preloaded data tables. One dispatcher per VU; the registry and tables
//! behind `Arc`s are the only state shared between VUs.
//!
//! A call that cannot run (missing required result keys) is `Skipped` with
//! zero side effects. A call that runs always produces a `CallReport` and a
//! metric sample — transport failures included, scored as failed checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::auth::{AuthHeaders, AuthManager};
use crate::check::{self, json_path, Check};
use crate::config::{OperationDefinition, OperationKind};
use crate::data::{DataTable, Row};
use crate::metrics::MetricsRegistry;
use crate::transport::{HttpRequest, Transport};

/// Values captured by setup operations and consumed by later calls. Owned by
/// one run: populated before iterations start, read-only while they run.
pub type RunResultMap = HashMap<String, Value>;

/// What happened to one dispatched operation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(CallReport),
    /// No request was sent and no metric was recorded.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct CallReport {
    pub name: String,
    /// 0 when the transport failed before producing a status.
    pub status: u16,
    /// Wall-clock time of the recorded attempt, excluding any 401 retry.
    pub duration: Duration,
    pub passed: bool,
    pub failures: Vec<String>,
    pub retried: bool,
    pub body: String,
}

#[derive(TypedBuilder)]
pub struct Dispatcher {
    #[builder(setter(into))]
    base_url: String,
    transport: Arc<dyn Transport>,
    auth: AuthManager,
    metrics: Arc<MetricsRegistry>,
    #[builder(default)]
    tables: HashMap<String, Arc<DataTable>>,
}

impl Dispatcher {
    /// Execute one operation. `vu_id` and `iteration` drive deterministic
    /// data-row selection.
    pub async fn execute(
        &mut self,
        op: &OperationDefinition,
        vu_id: u64,
        iteration: u64,
        results: &RunResultMap,
    ) -> Outcome {
        for key in &op.requires {
            if !results.contains_key(key) {
                tracing::debug!(operation = %op.name, key = %key, "required result key missing");
                return Outcome::Skipped(format!("missing required result key `{key}`"));
            }
        }

        let row = op
            .data_file
            .as_deref()
            .and_then(|name| self.tables.get(name))
            .map(|table| table.pick_row(vu_id, iteration))
            .unwrap_or_default();

        let auth_headers = self.auth.headers().await;
        let request = self.build_request(op, &row, results, &auth_headers);

        let started = Instant::now();
        let mut attempt = self.transport.send(request.clone()).await;
        let mut duration = started.elapsed();
        let mut retried = false;

        // One reactive retry on 401, never more, whatever the second status.
        if matches!(&attempt, Ok(res) if res.status == 401) {
            retried = true;
            tracing::debug!(operation = %op.name, "got 401, refreshing credentials for one retry");
            let refreshed = self.auth.force_refresh().await;
            let mut retry = request;
            retry.headers = self.merge_headers(op, &refreshed, retry.body.is_some());
            let restarted = Instant::now();
            attempt = self.transport.send(retry).await;
            duration = restarted.elapsed();
        }

        let duration_ms = duration.as_millis() as u64;
        match attempt {
            Ok(res) => {
                let outcome = check::evaluate(&res, duration, &Check::for_operation(op));
                self.metrics.record_op(&op.name, duration_ms, !outcome.passed);
                self.metrics
                    .record_aggregate(res.status, duration_ms, res.connect_ms);
                if !outcome.passed {
                    tracing::debug!(
                        operation = %op.name,
                        status = res.status,
                        failures = ?outcome.failures,
                        "checks failed"
                    );
                }
                Outcome::Completed(CallReport {
                    name: op.name.clone(),
                    status: res.status,
                    duration,
                    passed: outcome.passed,
                    failures: outcome.failures,
                    retried,
                    body: res.body,
                })
            }
            Err(err) => {
                tracing::warn!(operation = %op.name, error = %err, "transport failure");
                self.metrics.record_op(&op.name, duration_ms, true);
                Outcome::Completed(CallReport {
                    name: op.name.clone(),
                    status: 0,
                    duration,
                    passed: false,
                    failures: vec![format!("transport: {err}")],
                    retried,
                    body: String::new(),
                })
            }
        }
    }

    /// Run the setup chain in declared order, capturing `result_key` values
    /// into a fresh result map.
    pub async fn run_setup(&mut self, ops: &[OperationDefinition]) -> RunResultMap {
        let mut results = RunResultMap::new();
        for op in ops {
            match self.execute(op, 0, 0, &results).await {
                Outcome::Completed(report) => {
                    if let Some(key) = &op.result_key {
                        let path = op.result_path.as_deref().unwrap_or("");
                        let captured = serde_json::from_str::<Value>(&report.body)
                            .ok()
                            .and_then(|body| json_path(&body, path).cloned());
                        match captured {
                            Some(value) => {
                                tracing::debug!(operation = %op.name, key = %key, "captured setup result");
                                results.insert(key.clone(), value);
                            }
                            None => {
                                tracing::warn!(
                                    operation = %op.name,
                                    key = %key,
                                    path = %path,
                                    "setup result path not found in response"
                                );
                            }
                        }
                    }
                }
                Outcome::Skipped(reason) => {
                    tracing::warn!(operation = %op.name, %reason, "setup operation skipped");
                }
            }
        }
        results
    }

    /// Run the teardown chain in declared order against the run's result map.
    /// Steps whose `requires` went uncaptured are skipped, not failed.
    pub async fn run_teardown(&mut self, ops: &[OperationDefinition], results: &RunResultMap) {
        for op in ops {
            if let Outcome::Skipped(reason) = self.execute(op, 0, 0, results).await {
                tracing::info!(operation = %op.name, %reason, "teardown operation skipped");
            }
        }
    }

    fn build_request(
        &self,
        op: &OperationDefinition,
        row: &Row,
        results: &RunResultMap,
        auth_headers: &AuthHeaders,
    ) -> HttpRequest {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), op.path);
        match &op.kind {
            OperationKind::Graphql { query, variables } => {
                let variables = resolve_variables(op, variables, row, results);
                let body = serde_json::json!({ "query": query, "variables": variables });
                HttpRequest {
                    method: "POST".to_string(),
                    url,
                    headers: self.merge_headers(op, auth_headers, true),
                    body: Some(body.to_string()),
                }
            }
            OperationKind::Rest { method, body } => {
                let body = body
                    .as_ref()
                    .map(|b| substitute_data_tokens(&b.to_string(), results));
                HttpRequest {
                    method: method.to_ascii_uppercase(),
                    url,
                    headers: self.merge_headers(op, auth_headers, body.is_some()),
                    body,
                }
            }
        }
    }

    /// Auth headers first, then content-type, then the operation's own
    /// headers. Later entries win.
    fn merge_headers(
        &self,
        op: &OperationDefinition,
        auth_headers: &AuthHeaders,
        has_body: bool,
    ) -> HashMap<String, String> {
        let mut headers = auth_headers.clone();
        if has_body {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        for (name, value) in &op.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
        headers
    }
}

/// Effective GraphQL variables: statics, overlaid by data-row columns,
/// overlaid by captured results, overlaid by templates.
fn resolve_variables(
    op: &OperationDefinition,
    statics: &serde_json::Map<String, Value>,
    row: &Row,
    results: &RunResultMap,
) -> serde_json::Map<String, Value> {
    let mut variables = statics.clone();
    for (name, column) in &op.variable_column_map {
        if let Some(value) = row.get(column) {
            variables.insert(name.clone(), Value::String(value.clone()));
        }
    }
    for (name, key) in &op.variables_from_result {
        if let Some(value) = results.get(key) {
            variables.insert(name.clone(), value.clone());
        }
    }
    for (name, template) in &op.variable_template {
        variables.insert(name.clone(), Value::String(expand_template(template)));
    }
    variables
}

fn expand_template(template: &str) -> String {
    template.replace("${timestamp}", &epoch_millis().to_string())
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Replace `${data.KEY}` tokens in a serialized REST body with values from
/// the run result map. A missing key becomes the literal `null`.
fn substitute_data_tokens(body: &str, results: &RunResultMap) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"\$\{data\.([A-Za-z0-9_]+)\}").expect("data token pattern")
    });
    token
        .replace_all(body, |caps: &regex::Captures<'_>| {
            match results.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "null".to_string(),
            }
        })
        .into_owned()
}

//! End-to-end engine tests through the public API only: a scripted transport
//! stands in for the network, everything else is the real pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stampede::transport::{HttpRequest, HttpResponse};
use stampede::{
    AuthConfig, AuthManager, Dispatcher, MetricsRegistry, Outcome, RunResultMap, Selector,
    TestPlan, Transport, TransportError, VuContext,
};

/// Replays queued responses in order and records every request it sees.
#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn push(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: Default::default(),
            body: body.to_string(),
            connect_ms: 0.0,
        }));
    }

    fn sent(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(req);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())))
    }
}

fn dispatcher(
    transport: &Arc<ScriptedTransport>,
    auth: AuthConfig,
    plan: &TestPlan,
) -> (Dispatcher, Arc<MetricsRegistry>) {
    let metrics = Arc::new(MetricsRegistry::new(plan.operation_names(), 500));
    let d = Dispatcher::builder()
        .base_url("http://svc.local")
        .transport(transport.clone() as Arc<dyn Transport>)
        .auth(AuthManager::new(
            auth,
            Duration::from_secs(3300),
            transport.clone() as Arc<dyn Transport>,
        ))
        .metrics(metrics.clone())
        .build();
    (d, metrics)
}

#[tokio::test]
async fn weighted_run_produces_proportional_traffic_and_metrics() {
    let transport = Arc::new(ScriptedTransport::default());
    for _ in 0..6 {
        transport.push(200, "{}");
    }
    let plan = TestPlan::from_json(
        r#"{
            "endpoints": [
                { "name": "list",   "group": "reads",  "type": "rest", "method": "GET",  "path": "/items", "weight": 2 },
                { "name": "create", "group": "writes", "type": "rest", "method": "POST", "path": "/items", "weight": 1,
                  "body": { "n": 1 } }
            ]
        }"#,
    )
    .unwrap();
    let (mut d, metrics) = dispatcher(&transport, AuthConfig::None, &plan);
    let selector = Selector::new(&plan, Duration::ZERO);
    let mut vu = VuContext::seeded(1, 42);

    for _ in 0..2 {
        let outcomes = selector
            .run_iteration(&mut d, &mut vu, &RunResultMap::new())
            .await;
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Outcome::Completed(r) if r.passed)));
        vu.advance();
    }

    let snap = metrics.snapshot();
    assert_eq!(snap.operations["list"].requests, 4);
    assert_eq!(snap.operations["create"].requests, 2);
    assert_eq!(snap.status_2xx, 6);
    assert_eq!(snap.apdex_satisfied, 6);
    assert!((snap.apdex_score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn setup_results_flow_into_iterations_and_teardown() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(201, r#"{"project": {"id": "p-1"}}"#); // setup
    transport.push(200, r#"{"data": {"project": {"name": "x"}}}"#); // iteration
    transport.push(204, "{}"); // teardown
    let plan = TestPlan::from_json(
        r#"{
            "setup": [
                { "name": "create_project", "type": "rest", "method": "POST", "path": "/projects",
                  "checks": { "status": 201 },
                  "result_key": "project_id", "result_path": "project.id" }
            ],
            "endpoints": [
                { "name": "project_query", "type": "graphql", "path": "/graphql",
                  "query": "query($id: ID!) { project(id: $id) { name } }",
                  "requires": ["project_id"],
                  "variables_from_result": { "id": "project_id" } }
            ],
            "teardown": [
                { "name": "delete_project", "type": "rest", "method": "DELETE", "path": "/projects",
                  "checks": { "status": 204 },
                  "requires": ["project_id"],
                  "body": { "id": "${data.project_id}" } }
            ]
        }"#,
    )
    .unwrap();
    let (mut d, metrics) = dispatcher(&transport, AuthConfig::None, &plan);

    let results = d.run_setup(&plan.setup).await;
    assert_eq!(results["project_id"], "p-1");

    let selector = Selector::new(&plan, Duration::ZERO);
    let mut vu = VuContext::seeded(0, 7);
    let outcomes = selector.run_iteration(&mut d, &mut vu, &results).await;
    assert!(matches!(&outcomes[0], Outcome::Completed(r) if r.passed));

    d.run_teardown(&plan.teardown, &results).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    let graphql_body: Value = serde_json::from_str(sent[1].body.as_ref().unwrap()).unwrap();
    assert_eq!(graphql_body["variables"]["id"], "p-1");
    assert!(sent[2].body.as_ref().unwrap().contains("p-1"));

    let snap = metrics.snapshot();
    assert_eq!(snap.operations["create_project"].errors, 0);
    assert_eq!(snap.operations["delete_project"].requests, 1);
}

#[tokio::test]
async fn a_401_triggers_one_token_refresh_and_retry() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(200, r#"{"access_token": "t1"}"#); // initial fetch
    transport.push(401, "{}"); // first attempt
    transport.push(200, r#"{"access_token": "t2"}"#); // forced refresh
    transport.push(200, "{}"); // retry
    let plan = TestPlan::from_json(
        r#"{ "endpoints": [ { "name": "ping", "type": "rest", "method": "GET", "path": "/ping" } ] }"#,
    )
    .unwrap();
    let keycloak = AuthConfig::Keycloak {
        host: "https://id.example.com".to_string(),
        realm: "load".to_string(),
        client_id: "perf".to_string(),
        client_secret: "s".to_string(),
    };
    let (mut d, metrics) = dispatcher(&transport, keycloak, &plan);

    let outcome = d
        .execute(&plan.endpoints[0], 0, 0, &RunResultMap::new())
        .await;
    let Outcome::Completed(report) = outcome else {
        panic!("expected completion");
    };
    assert!(report.retried);
    assert!(report.passed);

    let sent = transport.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[1].headers["authorization"], "Bearer t1");
    assert_eq!(sent[3].headers["authorization"], "Bearer t2");
    // Only the final attempt is scored.
    let snap = metrics.snapshot();
    assert_eq!(snap.operations["ping"].requests, 1);
    assert_eq!(snap.status_2xx, 1);
    assert_eq!(snap.status_4xx, 0);
}

#[tokio::test]
async fn failing_checks_show_up_in_the_snapshot() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(500, r#"{"error": "boom"}"#);
    let plan = TestPlan::from_json(
        r#"{ "endpoints": [ { "name": "flaky", "type": "rest", "method": "GET", "path": "/flaky" } ] }"#,
    )
    .unwrap();
    let (mut d, metrics) = dispatcher(&transport, AuthConfig::None, &plan);

    let outcome = d
        .execute(&plan.endpoints[0], 0, 0, &RunResultMap::new())
        .await;
    let Outcome::Completed(report) = outcome else {
        panic!("expected completion");
    };
    assert!(!report.passed);
    assert_eq!(report.status, 500);

    let snap = metrics.snapshot();
    assert_eq!(snap.operations["flaky"].errors, 1);
    assert_eq!(snap.status_5xx, 1);
}

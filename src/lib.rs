//! Stampede — a declarative request engine for load tests.
//!
//! Stampede turns a JSON test plan into checked, metered HTTP traffic. The
//! plan declares named REST and GraphQL operations with per-call checks; the
//! engine handles authentication, data injection, scheduling weights and
//! metric collection. The load shape itself (how many virtual users, for how
//! long) is owned by whatever drives the engine — this crate is the part that
//! decides what each virtual user does and how each call is built and scored.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`TestPlan`]: the parsed configuration document — operations, scenarios,
//!   setup and teardown chains, all validated before any traffic is sent.
//! - [`Transport`]: the HTTP seam. Everything above it works with plain
//!   request/response values, so the whole engine can be exercised against a
//!   scripted transport in tests. [`ReqwestTransport`] is the real one.
//! - [`AuthManager`]: per-VU credential state for the five auth strategies,
//!   with proactive refresh on an interval and reactive refresh on a 401.
//! - [`Dispatcher`]: builds, sends and scores a single call — variable
//!   resolution, header merging, the one-shot 401 retry, check evaluation
//!   and metric recording.
//! - [`Selector`]: decides what one iteration looks like — weighted group
//!   sweeps, or a weight-proportional scenario draw with think times.
//! - [`MetricsRegistry`]: shared atomic instruments, snapshotted into plain
//!   serializable values for an external sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stampede::{
//!     auth::{AuthConfig, AuthManager},
//!     config::TestPlan,
//!     dispatch::Dispatcher,
//!     metrics::MetricsRegistry,
//!     select::{Selector, VuContext},
//!     transport::{ReqwestTransport, Transport},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plan = TestPlan::load("plans/orders.json")?;
//!
//!     // One client for the whole run — per-request clients defeat
//!     // connection pooling and distort latency numbers.
//!     let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::default());
//!     let metrics = Arc::new(MetricsRegistry::new(plan.operation_names(), 500));
//!
//!     let mut dispatcher = Dispatcher::builder()
//!         .base_url("http://localhost:8080")
//!         .transport(transport.clone())
//!         .auth(AuthManager::new(
//!             AuthConfig::Bearer { token: "tok".into() },
//!             Duration::from_secs(3300),
//!             transport,
//!         ))
//!         .metrics(metrics.clone())
//!         .build();
//!
//!     let results = dispatcher.run_setup(&plan.setup).await;
//!
//!     let selector = Selector::new(&plan, Duration::from_millis(500));
//!     let mut vu = VuContext::new(0);
//!     for _ in 0..10 {
//!         selector.run_iteration(&mut dispatcher, &mut vu, &results).await;
//!         vu.advance();
//!     }
//!
//!     dispatcher.run_teardown(&plan.teardown, &results).await;
//!     println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
//!     Ok(())
//! }
//! ```
//!
//! For full load tests, spawn one [`Dispatcher`] + [`VuContext`] pair per
//! virtual user; the transport, metrics registry and data tables are shared
//! behind `Arc`s and everything else is per-VU by design.
//!
//! # Where to start
//!
//! - [`TestPlan`] documents the configuration format.
//! - [`Dispatcher`] documents the per-call pipeline, including the 401 retry
//!   and the setup/teardown result capture.
//! - [`Selector`] documents the two execution modes and the weight semantics.

/// Authentication strategies and per-VU token caching
pub mod auth;
/// Per-call pass/fail checks
pub mod check;
/// Test plan document and environment settings
pub mod config;
/// CSV data tables shared read-only across VUs
pub mod data;
/// Building, sending and scoring individual calls
pub mod dispatch;
/// Error types
pub mod error;
/// Metric instruments and snapshots
pub mod metrics;
/// Weighted and scenario-based execution selection
pub mod select;
/// The HTTP seam
pub mod transport;

pub use auth::{AuthConfig, AuthManager};
pub use config::{LoadProfile, Settings, TestPlan};
pub use dispatch::{CallReport, Dispatcher, Outcome, RunResultMap};
pub use error::{ConfigError, TransportError};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use select::{Selector, VuContext};
pub use transport::{ReqwestTransport, Transport};

//! Test plan document and environment settings.
//!
//! A test plan is a JSON document describing the operations to drive against
//! a target service, optionally organized into scenarios, plus setup and
//! teardown call chains:
//!
//! ```json
//! {
//!   "service": "orders",
//!   "endpoints": [
//!     { "name": "list_orders", "group": "orders", "type": "rest",
//!       "method": "GET", "path": "/api/orders", "weight": 3 },
//!     { "name": "order_stats", "group": "orders", "type": "graphql",
//!       "path": "/graphql", "query": "{ orderStats { total } }" }
//!   ],
//!   "setup": [], "teardown": []
//! }
//! ```
//!
//! Everything that can fail here fails before any traffic is sent.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthConfig;
use crate::error::ConfigError;

/// The request payload of an operation. The tag decides the whole execution
/// path, so the dispatcher matches on this exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    Rest {
        method: String,
        #[serde(default)]
        body: Option<Value>,
    },
    Graphql {
        query: String,
        #[serde(default)]
        variables: serde_json::Map<String, Value>,
    },
}

/// One named, checkable REST or GraphQL call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// Unique across setup/endpoints/teardown; keys this operation's metrics.
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub path: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Extra headers merged over the auth headers (these win on conflict).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Name of a CSV data table to draw per-call variables from.
    #[serde(default)]
    pub data_file: Option<String>,
    /// variable name -> column name in the data table row.
    #[serde(default)]
    pub variable_column_map: HashMap<String, String>,
    /// variable name -> key captured into the run result map by setup.
    #[serde(default)]
    pub variables_from_result: HashMap<String, String>,
    /// variable name -> template string; `${timestamp}` expands to epoch ms.
    #[serde(default)]
    pub variable_template: HashMap<String, String>,
    /// Result-map keys that must exist or the operation is skipped.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub checks: Option<ChecksConfig>,
    /// Setup only: store a value extracted from the response under this key.
    #[serde(default)]
    pub result_key: Option<String>,
    /// Dot-path into the response body for `result_key` (empty = whole body).
    #[serde(default)]
    pub result_path: Option<String>,
}

/// Wire form of the per-operation check set, mirroring the dashboard's
/// config object. Lowered to a `Vec<Check>` by the check module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body_path: Option<String>,
    #[serde(default)]
    pub header_present: Option<String>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub no_graphql_errors: Option<bool>,
    #[serde(default)]
    pub has_data: Option<bool>,
}

/// An ordered, weighted user journey over named operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Default pause between steps, in seconds.
    #[serde(default = "default_think_time")]
    pub think_time: f64,
    pub steps: Vec<StepRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRef {
    pub operation: String,
    /// Overrides the scenario's default think time for this step.
    #[serde(default)]
    pub think_time: Option<f64>,
}

/// The whole configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub service: String,
    /// SLO definitions are carried for external consumers, not interpreted.
    #[serde(default)]
    pub slos: Option<Value>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
    pub endpoints: Vec<OperationDefinition>,
    #[serde(default)]
    pub setup: Vec<OperationDefinition>,
    #[serde(default)]
    pub teardown: Vec<OperationDefinition>,
}

impl TestPlan {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let plan: Self = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Every operation name across setup, endpoints and teardown, in declared
    /// order. This is the name set the metrics registry is built from.
    pub fn operation_names(&self) -> Vec<String> {
        self.all_operations().map(|op| op.name.clone()).collect()
    }

    pub fn all_operations(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.setup
            .iter()
            .chain(self.endpoints.iter())
            .chain(self.teardown.iter())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for op in self.all_operations() {
            if !seen.insert(op.name.as_str()) {
                return Err(ConfigError::DuplicateOperation(op.name.clone()));
            }
            if op.weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    name: op.name.clone(),
                    weight: op.weight,
                });
            }
        }
        for scenario in &self.scenarios {
            if scenario.weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    name: scenario.name.clone(),
                    weight: scenario.weight,
                });
            }
        }
        Ok(())
    }
}

fn default_group() -> String {
    "default".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_think_time() -> f64 {
    1.0
}

/// Named load shapes. The stage/ramp math behind each profile is owned by
/// the external scheduler; this crate only validates the name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadProfile {
    #[default]
    Smoke,
    Ramp,
    Soak,
    Stress,
    Spike,
}

impl FromStr for LoadProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smoke" => Ok(Self::Smoke),
            "ramp" => Ok(Self::Ramp),
            "soak" => Ok(Self::Soak),
            "stress" => Ok(Self::Stress),
            "spike" => Ok(Self::Spike),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

/// Environment-driven knobs, resolved once at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub auth: AuthConfig,
    pub profile: LoadProfile,
    /// Proactive token refresh interval for Bearer/Keycloak auth.
    pub token_refresh: Duration,
    /// Apdex satisfaction threshold T, in milliseconds.
    pub apdex_threshold_ms: u64,
    /// Pause between endpoint groups in weighted mode.
    pub group_sleep: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth = AuthConfig::from_env()?;
        let profile = match env_var("LOAD_PROFILE") {
            Some(raw) => raw.parse()?,
            None => LoadProfile::default(),
        };
        Ok(Self {
            base_url: env_var("BASE_URL").unwrap_or_else(default_base_url),
            auth,
            profile,
            token_refresh: Duration::from_secs(parse_env(
                "TOKEN_REFRESH_SECONDS",
                default_token_refresh_secs(),
            )?),
            apdex_threshold_ms: parse_env("APDEX_THRESHOLD_MS", default_apdex_threshold_ms())?,
            group_sleep: Duration::from_secs_f64(parse_env(
                "GROUP_SLEEP_SECONDS",
                default_group_sleep_secs(),
            )?),
        })
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_token_refresh_secs() -> u64 {
    3300
}

fn default_apdex_threshold_ms() -> u64 {
    500
}

fn default_group_sleep_secs() -> f64 {
    0.5
}

/// Non-empty, trimmed environment lookup.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

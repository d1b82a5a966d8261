//! Authentication strategies and per-VU credential caching.
//!
//! One strategy is resolved from the environment at startup and never changes
//! for the lifetime of the process. Each virtual user owns its own
//! [`AuthManager`], including its own cached token — redundant token fetches
//! across VUs are accepted in exchange for zero cross-VU locking.
//!
//! Two refresh paths exist for Bearer/Keycloak:
//! - proactive: [`AuthManager::headers`] re-resolves the token once the
//!   configured interval has elapsed since the last fetch;
//! - reactive: [`AuthManager::force_refresh`] is called by the dispatcher on
//!   an HTTP 401 and re-resolves unconditionally.
//!
//! A failing Keycloak token endpoint degrades to the last good cached token
//! instead of aborting the run; the resulting 401 check failures are the
//! intended observable signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::env_var;
use crate::error::ConfigError;
use crate::transport::{HttpRequest, Transport};

/// Request headers produced by an auth strategy.
pub type AuthHeaders = HashMap<String, String>;

/// Exactly one strategy per process. When several are configured the
/// precedence is Keycloak > Bearer > Basic > ApiKey > explicit none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    None,
    Bearer {
        token: String,
    },
    Basic {
        user: String,
        pass: String,
    },
    ApiKey {
        header: String,
        value: String,
    },
    Keycloak {
        host: String,
        realm: String,
        client_id: String,
        client_secret: String,
    },
}

impl AuthConfig {
    /// Resolve the strategy from the environment. Configuring nothing at all
    /// is fatal; unauthenticated runs must opt in with `AUTH_NONE=true`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let (Some(host), Some(realm), Some(client_id), Some(client_secret)) = (
            env_var("KEYCLOAK_HOST"),
            env_var("KEYCLOAK_REALM"),
            env_var("KEYCLOAK_CLIENT_ID"),
            env_var("KEYCLOAK_CLIENT_SECRET"),
        ) {
            return Ok(Self::Keycloak {
                host,
                realm,
                client_id,
                client_secret,
            });
        }
        if let Some(token) = env_var("AUTH_TOKEN") {
            return Ok(Self::Bearer { token });
        }
        if let (Some(user), Some(pass)) = (env_var("BASIC_AUTH_USER"), env_var("BASIC_AUTH_PASS")) {
            return Ok(Self::Basic { user, pass });
        }
        if let (Some(header), Some(value)) = (env_var("API_KEY_HEADER"), env_var("API_KEY_VALUE")) {
            return Ok(Self::ApiKey { header, value });
        }
        if env_var("AUTH_NONE").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Ok(Self::None);
        }
        Err(ConfigError::NoAuthMode)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    fetched_at: Instant,
}

/// Per-VU auth state. See the module docs for the refresh model.
pub struct AuthManager {
    config: AuthConfig,
    refresh_interval: Duration,
    transport: Arc<dyn Transport>,
    cached: Option<CachedToken>,
}

impl AuthManager {
    pub fn new(config: AuthConfig, refresh_interval: Duration, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            refresh_interval,
            transport,
            cached: None,
        }
    }

    /// Headers for the next request, refreshing the cached token first if it
    /// has gone stale.
    pub async fn headers(&mut self) -> AuthHeaders {
        match &self.config {
            AuthConfig::None => AuthHeaders::new(),
            AuthConfig::Basic { user, pass } => {
                let encoded = STANDARD.encode(format!("{user}:{pass}"));
                HashMap::from([("authorization".to_string(), format!("Basic {encoded}"))])
            }
            AuthConfig::ApiKey { header, value } => {
                HashMap::from([(header.to_ascii_lowercase(), value.clone())])
            }
            AuthConfig::Bearer { .. } | AuthConfig::Keycloak { .. } => {
                let stale = match &self.cached {
                    Some(cached) => cached.fetched_at.elapsed() > self.refresh_interval,
                    None => true,
                };
                if stale {
                    self.refresh().await;
                }
                self.bearer_headers()
            }
        }
    }

    /// Reactive refresh after an HTTP 401: re-resolve credentials regardless
    /// of how fresh the cache is, then return the rebuilt headers.
    pub async fn force_refresh(&mut self) -> AuthHeaders {
        match &self.config {
            AuthConfig::Bearer { .. } | AuthConfig::Keycloak { .. } => {
                self.refresh().await;
                self.bearer_headers()
            }
            // No cached state to invalidate for the other modes.
            _ => self.headers().await,
        }
    }

    fn bearer_headers(&self) -> AuthHeaders {
        match &self.cached {
            Some(cached) => HashMap::from([(
                "authorization".to_string(),
                format!("Bearer {}", cached.token),
            )]),
            None => AuthHeaders::new(),
        }
    }

    async fn refresh(&mut self) {
        let resolved = match &self.config {
            AuthConfig::Bearer { token } => Some(token.clone()),
            AuthConfig::Keycloak {
                host,
                realm,
                client_id,
                client_secret,
            } => {
                fetch_keycloak_token(
                    self.transport.as_ref(),
                    host,
                    realm,
                    client_id,
                    client_secret,
                )
                .await
            }
            _ => None,
        };
        match resolved {
            Some(token) => {
                self.cached = Some(CachedToken {
                    token,
                    fetched_at: Instant::now(),
                });
            }
            // Keep serving the stale token; downstream 401s are the signal.
            None => {
                tracing::warn!("token refresh failed, keeping previous credentials");
            }
        }
    }
}

async fn fetch_keycloak_token(
    transport: &dyn Transport,
    host: &str,
    realm: &str,
    client_id: &str,
    client_secret: &str,
) -> Option<String> {
    let url = format!(
        "{}/realms/{realm}/protocol/openid-connect/token",
        host.trim_end_matches('/')
    );
    let body = format!(
        "grant_type=client_credentials&client_id={client_id}&client_secret={client_secret}"
    );
    let request = HttpRequest {
        method: "POST".to_string(),
        url,
        headers: HashMap::from([(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )]),
        body: Some(body),
    };

    match transport.send(request).await {
        Ok(res) if res.status == 200 => serde_json::from_str::<serde_json::Value>(&res.body)
            .ok()
            .and_then(|v| v.get("access_token")?.as_str().map(str::to_string))
            .or_else(|| {
                tracing::warn!("token endpoint returned 200 without an access_token");
                None
            }),
        Ok(res) => {
            tracing::warn!(status = res.status, "token endpoint rejected the request");
            None
        }
        Err(err) => {
            tracing::warn!(error = %err, "token endpoint unreachable");
            None
        }
    }
}

//! HashiCorp Vault backend (KV v2 over HTTP)
//!
//! Token lifecycle:
//!
//! ```text
//! Unauthenticated ──login──► Valid ──lease ends / 403──► Expired
//!                              ▲                            │
//!                              └────── AppRole re-login ────┘
//! ```
//!
//! A static `VAULT_TOKEN` starts out `Valid` with no known expiry. With
//! AppRole credentials an expired or rejected token is replaced by logging
//! in again and the request is retried once. Without them an invalid token
//! fails fast with [`SecretsError::BackendUnavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{BackendStatus, SecretBackend};
use crate::error::{Result, SecretsError, validate_key};
use crate::types::{SecretMetadata, SecretSource};

/// Tokens this close to the end of their lease are treated as expired
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Field a single secret value is stored under inside the KV data map
const VALUE_FIELD: &str = "value";

fn default_mount() -> String {
    "secret".to_string()
}

/// Vault connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub secret_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// KV v2 mount path
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("role_id", &self.role_id)
            .field("secret_id", &self.secret_id.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("mount", &self.mount)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VaultConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            role_id: None,
            secret_id: None,
            namespace: None,
            mount: default_mount(),
            timeout: default_timeout(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_approle(mut self, role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        self.role_id = Some(role_id.into());
        self.secret_id = Some(secret_id.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn has_approle(&self) -> bool {
        matches!((&self.role_id, &self.secret_id), (Some(r), Some(s)) if !r.is_empty() && !s.is_empty())
    }
}

#[derive(Debug, Clone)]
enum TokenState {
    Unauthenticated,
    Valid {
        token: String,
        expires_at: Option<Instant>,
        renewable: bool,
    },
    Expired,
}

impl TokenState {
    fn from_auth(auth: AuthInfo) -> Self {
        let expires_at =
            (auth.lease_duration > 0).then(|| Instant::now() + Duration::from_secs(auth.lease_duration));
        Self::Valid {
            token: auth.client_token,
            expires_at,
            renewable: auth.renewable,
        }
    }
}

/// Token state as reported by status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TokenStatus {
    Unauthenticated,
    Valid {
        /// `None` for tokens without a known lease
        expires_in_secs: Option<u64>,
        renewable: bool,
    },
    Expired,
}

/// Response of `/v1/sys/health`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultHealth {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: Option<String>,
}

impl VaultHealth {
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.sealed
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: AuthInfo,
}

#[derive(Debug, Deserialize)]
struct AuthInfo {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct KvMetadataResponse {
    data: KvMetadata,
}

#[derive(Debug, Deserialize)]
struct KvMetadata {
    #[serde(default)]
    current_version: u64,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    updated_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

/// Vault KV v2 client
pub struct VaultBackend {
    config: VaultConfig,
    http: reqwest::Client,
    token: Mutex<TokenState>,
}

impl fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VaultBackend {
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(SecretsError::backend_unavailable("vault", "address is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SecretsError::from)?;

        let state = match config.token.as_deref() {
            Some(token) if !token.is_empty() => TokenState::Valid {
                token: token.to_string(),
                expires_at: None,
                renewable: false,
            },
            _ => TokenState::Unauthenticated,
        };

        Ok(Self {
            config,
            http,
            token: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path)
    }

    fn kv_url(&self, section: &str, key: &str) -> String {
        self.url(&format!("{}/{section}/{key}", self.config.mount.trim_matches('/')))
    }

    fn request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(token) = token {
            builder = builder.header("X-Vault-Token", token);
        }
        if let Some(namespace) = &self.config.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        builder
    }

    /// Current token state
    pub async fn token_status(&self) -> TokenStatus {
        match &*self.token.lock().await {
            TokenState::Unauthenticated => TokenStatus::Unauthenticated,
            TokenState::Expired => TokenStatus::Expired,
            TokenState::Valid {
                expires_at,
                renewable,
                ..
            } => match expires_at {
                Some(at) if *at <= Instant::now() + TOKEN_EXPIRY_MARGIN => TokenStatus::Expired,
                _ => TokenStatus::Valid {
                    expires_in_secs: expires_at
                        .map(|at| at.saturating_duration_since(Instant::now()).as_secs()),
                    renewable: *renewable,
                },
            },
        }
    }

    /// Whether a request could be made right now without logging in
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.token_status().await, TokenStatus::Valid { .. })
    }

    /// Log in with AppRole and store the new token
    pub async fn login(&self) -> Result<()> {
        let mut state = self.token.lock().await;
        let auth = self.approle_login().await?;
        *state = TokenState::from_auth(auth);
        Ok(())
    }

    async fn approle_login(&self) -> Result<AuthInfo> {
        let (Some(role_id), Some(secret_id)) = (&self.config.role_id, &self.config.secret_id) else {
            return Err(SecretsError::backend_unavailable(
                "vault",
                "AppRole credentials are not configured",
            ));
        };

        let response = self
            .request(Method::POST, &self.url("auth/approle/login"), None)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SecretsError::authentication(format!(
                "AppRole login rejected ({status}): {}",
                error_text(response).await
            )));
        }

        let body: AuthResponse = response.json().await?;
        info!(
            lease_secs = body.auth.lease_duration,
            renewable = body.auth.renewable,
            "Authenticated to Vault with AppRole"
        );
        Ok(body.auth)
    }

    /// Return a usable token, logging in again when the current one is gone
    async fn ensure_token(&self) -> Result<String> {
        let mut state = self.token.lock().await;

        if let TokenState::Valid {
            token, expires_at, ..
        } = &*state
        {
            if expires_at.is_none_or(|at| Instant::now() + TOKEN_EXPIRY_MARGIN < at) {
                return Ok(token.clone());
            }
            debug!("Vault token lease ended");
            *state = TokenState::Expired;
        }

        if !self.config.has_approle() {
            let reason = match *state {
                TokenState::Unauthenticated => "no token or AppRole credentials configured",
                _ => "token expired and no AppRole credentials are configured",
            };
            return Err(SecretsError::backend_unavailable("vault", reason));
        }

        let auth = self.approle_login().await?;
        let token = auth.client_token.clone();
        *state = TokenState::from_auth(auth);
        Ok(token)
    }

    /// Forget `token` if it is still the current one
    async fn invalidate(&self, token: &str) {
        let mut state = self.token.lock().await;
        if matches!(&*state, TokenState::Valid { token: current, .. } if current == token) {
            *state = TokenState::Expired;
        }
    }

    /// Send an authenticated request, re-authenticating once on 403
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        let build = |token: &str| {
            let builder = self.request(method.clone(), url, Some(token));
            match body {
                Some(body) => builder.json(body),
                None => builder,
            }
        };

        let token = self.ensure_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        self.invalidate(&token).await;
        if !self.config.has_approle() {
            return Err(SecretsError::authentication("Vault rejected the token"));
        }

        warn!("Vault rejected token; re-authenticating and retrying");
        let token = self.ensure_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Renew the current token, falling back to a fresh AppRole login
    pub async fn renew_token(&self) -> Result<()> {
        let mut state = self.token.lock().await;

        if let TokenState::Valid {
            token,
            renewable: true,
            ..
        } = &*state
        {
            let token = token.clone();
            match self.renew_self(&token).await {
                Ok(auth) => {
                    *state = TokenState::from_auth(auth);
                    info!("Vault token renewed");
                    return Ok(());
                }
                Err(e) => warn!("Vault token renewal failed: {e}"),
            }
        }

        if !self.config.has_approle() {
            return Err(SecretsError::authentication(
                "token is not renewable and no AppRole credentials are configured",
            ));
        }
        let auth = self.approle_login().await?;
        *state = TokenState::from_auth(auth);
        Ok(())
    }

    async fn renew_self(&self, token: &str) -> Result<AuthInfo> {
        let response = self
            .request(Method::POST, &self.url("auth/token/renew-self"), Some(token))
            .json(&json!({}))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: AuthResponse = response.json().await?;
        Ok(body.auth)
    }

    /// Query `/v1/sys/health`. Sealed and standby nodes answer with non-2xx
    /// codes but still return a health document.
    pub async fn health_check(&self) -> Result<VaultHealth> {
        let response = self
            .request(Method::GET, &self.url("sys/health"), None)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str::<VaultHealth>(&text) {
            Ok(health) => Ok(health),
            Err(_) => Err(SecretsError::http(
                Some(status.as_u16()),
                format!("unexpected health response ({status})"),
            )),
        }
    }

    /// Read the full KV data map of a secret
    pub async fn read_data(&self, key: &str) -> Result<Option<Map<String, Value>>> {
        validate_key(key)?;
        let response = self.send(Method::GET, &self.kv_url("data", key), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let body: KvReadResponse = response.json().await?;
        // A soft-deleted version comes back with `data: null`.
        Ok(body.data.data)
    }

    /// Write the full KV data map of a secret, creating a new version
    pub async fn write_data(&self, key: &str, data: Map<String, Value>) -> Result<()> {
        validate_key(key)?;
        let body = json!({ "data": data });
        let response = self
            .send(Method::POST, &self.kv_url("data", key), Some(&body))
            .await?;
        check_status(response).await?;
        debug!(key, "Secret written to Vault");
        Ok(())
    }

    /// Delete all versions and metadata of a secret
    pub async fn delete_all_versions(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let response = self
            .send(Method::DELETE, &self.kv_url("metadata", key), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        debug!(key, "Secret deleted from Vault");
        Ok(true)
    }

    /// List keys under `prefix`. Folders end with `/`.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let url = self.kv_url("metadata", prefix);
        let url = url.trim_end_matches('/').to_string();
        let token = self.ensure_token().await?;

        let mut response = self
            .request(Method::GET, &url, Some(&token))
            .query(&[("list", "true")])
            .send()
            .await?;
        if response.status() == StatusCode::FORBIDDEN && self.config.has_approle() {
            self.invalidate(&token).await;
            let token = self.ensure_token().await?;
            response = self
                .request(Method::GET, &url, Some(&token))
                .query(&[("list", "true")])
                .send()
                .await?;
        }

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check_status(response).await?;
        let body: ListResponse = response.json().await?;

        let mut keys: Vec<String> = if prefix.is_empty() {
            body.data.keys
        } else {
            body.data.keys.into_iter().map(|k| format!("{prefix}/{k}")).collect()
        };
        keys.sort();
        Ok(keys)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_text(response).await;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SecretsError::authentication(format!("Vault returned {status}: {message}")))
        }
        _ => Err(SecretsError::http(
            Some(status.as_u16()),
            format!("Vault returned {status}: {message}"),
        )),
    }
}

/// Joined `errors` array of a Vault error response
async fn error_text(response: Response) -> String {
    #[derive(Deserialize)]
    struct VaultErrors {
        #[serde(default)]
        errors: Vec<String>,
    }

    match response.json::<VaultErrors>().await {
        Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
        _ => "no error detail".to_string(),
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl SecretBackend for VaultBackend {
    fn kind(&self) -> SecretSource {
        SecretSource::Vault
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(mut data) = self.read_data(key).await? else {
            return Ok(None);
        };
        match data.remove(VALUE_FIELD) {
            Some(Value::String(value)) => Ok(Some(value)),
            Some(other) => Ok(Some(other.to_string())),
            // Secret written by another tool with its own field layout
            None => Ok(Some(Value::Object(data).to_string())),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut data = Map::new();
        data.insert(VALUE_FIELD.to_string(), Value::String(value.to_string()));
        self.write_data(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.delete_all_versions(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.list_keys(prefix).await
    }

    async fn metadata(&self, key: &str) -> Result<Option<SecretMetadata>> {
        validate_key(key)?;
        let response = self
            .send(Method::GET, &self.kv_url("metadata", key), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let body: KvMetadataResponse = response.json().await?;

        let mut meta = SecretMetadata::new(key, SecretSource::Vault);
        meta.version = body.data.current_version.max(1);
        meta.encrypted = true;
        if let Some(created) = parse_time(body.data.created_time.as_deref()) {
            meta.created_at = created;
        }
        if let Some(updated) = parse_time(body.data.updated_time.as_deref()) {
            meta.updated_at = updated;
        }
        Ok(Some(meta))
    }

    async fn status(&self) -> BackendStatus {
        let token = self.token_status().await;
        let (available, detail) = match self.health_check().await {
            Ok(health) => (
                health.is_ready(),
                format!(
                    "{} initialized={} sealed={} token={token:?}",
                    self.config.address, health.initialized, health.sealed
                ),
            ),
            Err(e) => (false, format!("{}: {e}", self.config.address)),
        };
        BackendStatus {
            backend: SecretSource::Vault,
            available,
            writable: available,
            detail: Some(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kv_response(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "data": { "data": { "value": value }, "metadata": { "version": 1 } }
        }))
    }

    fn login_response(token: &str, lease: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": token, "lease_duration": lease, "renewable": true }
        }))
    }

    #[tokio::test]
    async fn test_read_with_static_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/database/password"))
            .and(header("X-Vault-Token", "static-token"))
            .respond_with(kv_response("s3cret"))
            .expect(1)
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("static-token")).unwrap();
        assert_eq!(
            vault.get("database/password").await.unwrap().as_deref(),
            Some("s3cret")
        );
    }

    #[tokio::test]
    async fn test_missing_secret_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("t")).unwrap();
        assert_eq!(vault.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_approle_login_on_first_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({ "role_id": "role", "secret_id": "secret" })))
            .respond_with(login_response("approle-token", 3600))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .and(header("X-Vault-Token", "approle-token"))
            .respond_with(kv_response("k"))
            .expect(2)
            .mount(&server)
            .await;

        let vault =
            VaultBackend::new(VaultConfig::new(server.uri()).with_approle("role", "secret")).unwrap();
        assert_eq!(vault.token_status().await, TokenStatus::Unauthenticated);

        vault.get("api_key").await.unwrap();
        vault.get("api_key").await.unwrap();
        assert!(vault.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_expired_lease_triggers_relogin() {
        let server = MockServer::start().await;
        // Lease shorter than the expiry margin: every use needs a new login
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(login_response("short-token", 1))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .respond_with(kv_response("k"))
            .mount(&server)
            .await;

        let vault =
            VaultBackend::new(VaultConfig::new(server.uri()).with_approle("role", "secret")).unwrap();
        vault.get("api_key").await.unwrap();
        assert_eq!(vault.token_status().await, TokenStatus::Expired);
        vault.get("api_key").await.unwrap();
    }

    #[tokio::test]
    async fn test_forbidden_reauthenticates_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .and(header("X-Vault-Token", "revoked-token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(login_response("fresh-token", 3600))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .and(header("X-Vault-Token", "fresh-token"))
            .respond_with(kv_response("k"))
            .expect(1)
            .mount(&server)
            .await;

        let vault = VaultBackend::new(
            VaultConfig::new(server.uri())
                .with_token("revoked-token")
                .with_approle("role", "secret"),
        )
        .unwrap();
        assert_eq!(vault.get("api_key").await.unwrap().as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_forbidden_without_approle_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("bad")).unwrap();
        assert!(matches!(
            vault.get("api_key").await,
            Err(SecretsError::Authentication { .. })
        ));
        assert_eq!(vault.token_status().await, TokenStatus::Expired);

        // Expired token and no AppRole: fail fast without a request
        assert!(matches!(
            vault.get("api_key").await,
            Err(SecretsError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_credentials_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(kv_response("never"))
            .expect(0)
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri())).unwrap();
        assert!(matches!(
            vault.get("api_key").await,
            Err(SecretsError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_wraps_value_and_sends_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/kv/data/smtp/password"))
            .and(header("X-Vault-Namespace", "team-a"))
            .and(body_json(json!({ "data": { "value": "mail-pass" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "version": 2 } })))
            .expect(1)
            .mount(&server)
            .await;

        let vault = VaultBackend::new(
            VaultConfig::new(server.uri())
                .with_token("t")
                .with_namespace("team-a")
                .with_mount("kv"),
        )
        .unwrap();
        vault.put("smtp/password", "mail-pass").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/secret/metadata/old"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/db"))
            .and(query_param("list", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "keys": ["user", "password"] }
            })))
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("t")).unwrap();
        assert!(vault.delete("old").await.unwrap());
        assert_eq!(
            vault.list("db/").await.unwrap(),
            vec!["db/password", "db/user"]
        );
    }

    #[tokio::test]
    async fn test_server_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/api_key"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "errors": ["internal"] })))
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("t")).unwrap();
        let err = vault.get("api_key").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("internal"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        // Nothing listens on port 9 locally
        let vault = VaultBackend::new(VaultConfig::new("http://127.0.0.1:9").with_token("t")).unwrap();
        assert!(matches!(
            vault.get("api_key").await,
            Err(SecretsError::Http { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_check_sealed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "initialized": true, "sealed": true, "standby": false, "version": "1.15.0"
            })))
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri())).unwrap();
        let health = vault.health_check().await.unwrap();
        assert!(health.sealed);
        assert!(!health.is_ready());
        assert!(!vault.status().await.available);
    }

    #[tokio::test]
    async fn test_renew_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(login_response("t1", 3600))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/renew-self"))
            .and(header("X-Vault-Token", "t1"))
            .respond_with(login_response("t1", 7200))
            .expect(1)
            .mount(&server)
            .await;

        let vault =
            VaultBackend::new(VaultConfig::new(server.uri()).with_approle("role", "secret")).unwrap();
        vault.login().await.unwrap();
        vault.renew_token().await.unwrap();

        match vault.token_status().await {
            TokenStatus::Valid { expires_in_secs, renewable } => {
                assert!(renewable);
                assert!(expires_in_secs.unwrap() > 3600);
            }
            other => panic!("unexpected token status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "current_version": 3,
                    "created_time": "2024-01-01T00:00:00Z",
                    "updated_time": "2024-02-01T00:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let vault = VaultBackend::new(VaultConfig::new(server.uri()).with_token("t")).unwrap();
        let meta = vault.metadata("api_key").await.unwrap().unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(meta.source, SecretSource::Vault);
        assert_eq!(meta.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_config_debug_redacts_credentials() {
        let config = VaultConfig::new("http://vault:8200")
            .with_token("root-token")
            .with_approle("role", "approle-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("root-token"));
        assert!(!debug.contains("approle-secret"));
        assert!(debug.contains("role"));
    }
}

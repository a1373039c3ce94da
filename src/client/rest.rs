//! Bounded REST Call Layer
//!
//! Every request goes through the backend's connection permits, carries the
//! session token, and comes back as a decoded `{error:{code,description},
//! data}` envelope. Session expiry and transport failures trigger one
//! re-login and one retry; every other code is the facade's business.

use crate::client::codes;
use crate::client::pool::BackendConnectionPool;
use crate::client::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::domain::object::StorageObject;
use crate::error::{Error, Result};
use crate::metrics;
use crate::qos::ProductFamily;
use backoff::ExponentialBackoffBuilder;
use parking_lot::RwLock;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page size for batch queries
pub const PAGE_SIZE: usize = 100;

/// Default interval between busy retries
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of attempts for busy/timeout codes
pub const DEFAULT_RETRY_TIMES: u32 = 10;

// =============================================================================
// Envelope
// =============================================================================

/// Decoded response envelope
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub code: i64,
    pub description: String,
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS
    }

    /// Turn a non-zero code into [`Error::Backend`]
    pub fn check(self, operation: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::backend(operation, self.code, self.description))
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    error: Option<RawError>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct RawError {
    code: Value,
    #[serde(default)]
    description: Option<String>,
}

fn decode_envelope(response: &HttpResponse) -> Result<ResponseEnvelope> {
    if response.status == 401 {
        return Ok(ResponseEnvelope {
            code: codes::UNAUTHORIZED,
            description: "unauthorized".into(),
            data: Value::Null,
        });
    }

    let raw: RawEnvelope = serde_json::from_slice(&response.body).map_err(|e| {
        Error::Protocol(format!(
            "HTTP status {}: response is not a valid envelope: {}",
            response.status, e
        ))
    })?;
    let error = raw.error.ok_or_else(|| {
        Error::Protocol(format!("HTTP status {}: response has no error field", response.status))
    })?;

    let code = match &error.code {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Protocol(format!("error code {} is not an integer", error.code)))?;

    Ok(ResponseEnvelope {
        code,
        description: error.description.unwrap_or_default(),
        data: raw.data,
    })
}

// =============================================================================
// Client
// =============================================================================

/// Busy/timeout retry policy applied by the facades
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub times: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            times: DEFAULT_RETRY_TIMES,
        }
    }
}

/// Connection settings for one backend
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Backend identity, also the connection pool key
    pub backend: String,
    /// Candidate management URLs, tried in order
    pub urls: Vec<String>,
    pub user: String,
    pub password: String,
    /// Log in as a vstore user
    pub vstore_name: Option<String>,
    pub product: ProductFamily,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default)]
struct Session {
    /// `{url}/deviceManager/rest/{device_id}`
    base_url: String,
    token: Option<String>,
}

/// Bounded, re-authenticating REST client for one storage array
pub struct RestClient {
    config: RestClientConfig,
    urls: RwLock<Vec<String>>,
    session: RwLock<Session>,
    transport: Arc<dyn HttpTransport>,
    pool: Arc<BackendConnectionPool>,
}

enum Idempotence {
    Strict,
    AlreadyExists,
    NotFound,
}

impl RestClient {
    /// Create a client; the backend must already be registered in `pool`
    pub fn new(
        config: RestClientConfig,
        transport: Arc<dyn HttpTransport>,
        pool: Arc<BackendConnectionPool>,
    ) -> Self {
        Self {
            urls: RwLock::new(config.urls.clone()),
            config,
            session: RwLock::new(Session::default()),
            transport,
            pool,
        }
    }

    pub fn backend(&self) -> &str {
        &self.config.backend
    }

    pub fn product(&self) -> ProductFamily {
        self.config.product
    }

    /// Candidate URLs in their current preference order
    pub fn urls(&self) -> Vec<String> {
        self.urls.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.read().token.is_some()
    }

    /// Send one request under the backend's permits and decode the envelope
    async fn dispatch(&self, request: HttpRequest) -> Result<ResponseEnvelope> {
        let permit = self.pool.acquire(&self.config.backend).await?;
        let result = self.transport.send(request).await;
        drop(permit);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_call(&self.config.backend, "transport_error");
                return Err(e);
            }
        };

        let envelope = decode_envelope(&response).map_err(|e| {
            metrics::record_call(&self.config.backend, "protocol_error");
            e
        })?;
        let outcome = if envelope.is_success() { "success" } else { "error_code" };
        metrics::record_call(&self.config.backend, outcome);
        Ok(envelope)
    }

    /// One HTTP exchange against the current session, no retries
    pub async fn base_call(&self, method: Method, path: &str, body: Option<Value>) -> Result<ResponseEnvelope> {
        let (base_url, token) = {
            let session = self.session.read();
            (session.base_url.clone(), session.token.clone())
        };
        if base_url.is_empty() {
            return Err(Error::Authentication(format!(
                "backend {} is not logged in",
                self.config.backend
            )));
        }

        let url = format!("{}{}", base_url, path);
        debug!(backend = %self.config.backend, %method, %url, "Calling backend");
        self.dispatch(HttpRequest {
            method,
            url,
            body,
            token,
        })
        .await
    }

    /// [`base_call`](Self::base_call) with one re-login and retry on session
    /// expiry or transport failure
    pub async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<ResponseEnvelope> {
        if !self.is_logged_in() {
            self.login().await?;
        }

        match self.base_call(method.clone(), path, body.clone()).await {
            Ok(envelope) if codes::is_auth_failure(envelope.code) => {
                warn!(
                    backend = %self.config.backend,
                    code = envelope.code,
                    "Session is no longer valid, logging in again"
                );
                self.relogin().await?;
                self.base_call(method, path, body).await
            }
            Err(e @ Error::Transport { .. }) => {
                warn!(backend = %self.config.backend, error = %e, "Transport failure, logging in again");
                self.relogin().await?;
                self.base_call(method, path, body).await
            }
            other => other,
        }
    }

    /// Authenticate against the candidate URLs in order.
    ///
    /// The URL that succeeds moves to the front; URLs that could not be
    /// reached move to the back.
    pub async fn login(&self) -> Result<()> {
        let candidates = self.urls();
        let mut unreachable = Vec::new();

        let mut body = json!({
            "username": self.config.user,
            "password": self.config.password,
            "scope": "0",
        });
        if let Some(vstore) = self.config.vstore_name.as_deref() {
            body["vstorename"] = json!(vstore);
        }

        for url in &candidates {
            let request = HttpRequest {
                method: Method::POST,
                url: format!("{}/deviceManager/rest/xxxxx/sessions", url),
                body: Some(body.clone()),
                token: None,
            };

            let envelope = match self.dispatch(request).await {
                Ok(envelope) => envelope,
                Err(e @ (Error::Transport { .. } | Error::Protocol(_))) => {
                    warn!(backend = %self.config.backend, %url, error = %e, "Login candidate unreachable");
                    unreachable.push(url.clone());
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !envelope.is_success() {
                return Err(Error::Authentication(format!(
                    "login to {} failed, error code: {}, description: {}",
                    url, envelope.code, envelope.description
                )));
            }

            let device_id = envelope.data.get("deviceid").and_then(Value::as_str);
            let token = envelope.data.get("iBaseToken").and_then(Value::as_str);
            let (Some(device_id), Some(token)) = (device_id, token) else {
                return Err(Error::Protocol(format!(
                    "login response from {} lacks deviceid or iBaseToken",
                    url
                )));
            };

            {
                let mut session = self.session.write();
                session.base_url = format!("{}/deviceManager/rest/{}", url, device_id);
                session.token = Some(token.to_string());
            }
            self.rotate_urls(url, &unreachable);
            info!(backend = %self.config.backend, %url, "Logged in");
            return Ok(());
        }

        Err(Error::Authentication(format!(
            "all urls of backend {} are unreachable: {:?}",
            self.config.backend, candidates
        )))
    }

    /// Drop the current session and log in again. Concurrent relogins are
    /// last-writer-wins; every writer stores a freshly validated token.
    pub async fn relogin(&self) -> Result<()> {
        {
            let mut session = self.session.write();
            session.token = None;
        }
        self.login().await
    }

    /// Best-effort session teardown
    pub async fn logout(&self) {
        if !self.is_logged_in() {
            return;
        }
        if let Err(e) = self.base_call(Method::DELETE, "/sessions", None).await {
            debug!(backend = %self.config.backend, error = %e, "Logout failed");
        }
        *self.session.write() = Session::default();
    }

    fn rotate_urls(&self, good: &str, unreachable: &[String]) {
        let mut urls = self.urls.write();
        let mut reordered = Vec::with_capacity(urls.len());
        reordered.push(good.to_string());
        reordered.extend(
            urls.iter()
                .filter(|u| u.as_str() != good && !unreachable.contains(u))
                .cloned(),
        );
        reordered.extend(
            urls.iter()
                .filter(|u| u.as_str() != good && unreachable.contains(u))
                .cloned(),
        );
        *urls = reordered;
    }

    // =========================================================================
    // Facade helpers
    // =========================================================================

    /// [`call`](Self::call), retrying busy/timeout codes at a fixed interval
    pub async fn call_with_retry(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ResponseEnvelope> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry.interval)
            .with_max_interval(self.config.retry.interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let max_attempts = self.config.retry.times.max(1);
        let body = &body;

        backoff::future::retry(policy, || {
            let method = method.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let envelope = self
                    .call(method, path, body.clone())
                    .await
                    .map_err(backoff::Error::permanent)?;

                if codes::is_retryable(envelope.code) && attempt < max_attempts {
                    warn!(
                        backend = %self.config.backend,
                        operation,
                        code = envelope.code,
                        attempt,
                        "Backend busy, retrying"
                    );
                    return Err(backoff::Error::transient(Error::backend(
                        operation,
                        envelope.code,
                        envelope.description,
                    )));
                }
                Ok(envelope)
            }
        })
        .await
    }

    async fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        idempotence: Idempotence,
    ) -> Result<Option<ResponseEnvelope>> {
        let envelope = self.call_with_retry(operation, method, path, body).await?;
        if envelope.is_success() {
            return Ok(Some(envelope));
        }
        match idempotence {
            Idempotence::AlreadyExists if codes::is_already_exists(envelope.code) => {
                info!(operation, code = envelope.code, "Object already exists");
                Ok(None)
            }
            Idempotence::NotFound if codes::is_not_found(envelope.code) => {
                info!(operation, code = envelope.code, "Object does not exist");
                Ok(None)
            }
            _ => Err(Error::backend(operation, envelope.code, envelope.description)),
        }
    }

    /// GET one object; "does not exist" codes yield `None`
    pub(crate) async fn get_object(&self, operation: &str, path: &str) -> Result<Option<StorageObject>> {
        match self
            .request(operation, Method::GET, path, None, Idempotence::NotFound)
            .await?
        {
            Some(envelope) => StorageObject::from_value(envelope.data),
            None => Ok(None),
        }
    }

    /// GET a (non-paged) list
    pub(crate) async fn get_list(&self, operation: &str, path: &str) -> Result<Vec<StorageObject>> {
        match self
            .request(operation, Method::GET, path, None, Idempotence::NotFound)
            .await?
        {
            Some(envelope) => StorageObject::list_from_value(envelope.data),
            None => Ok(Vec::new()),
        }
    }

    /// GET a filtered list and keep the entry whose `field` equals `value`
    pub(crate) async fn get_first_matching(
        &self,
        operation: &str,
        path: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<StorageObject>> {
        let objects = self.get_list(operation, path).await?;
        for obj in objects {
            if obj.get_string_or_default(field)? == value {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    /// Exact-name lookup in a collection (`/lun`, `/host`, ...)
    pub(crate) async fn get_by_name(
        &self,
        operation: &str,
        collection: &str,
        name: &str,
        vstore_id: &str,
    ) -> Result<Option<StorageObject>> {
        let path = vstore_param(
            &format!("{}?{}&range=[0-{}]", collection, filter("NAME", name), PAGE_SIZE),
            vstore_id,
        );
        self.get_first_matching(operation, &path, "NAME", name).await
    }

    /// Page through a collection in windows of [`PAGE_SIZE`]
    pub async fn get_batch_objs(&self, operation: &str, path: &str) -> Result<Vec<StorageObject>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut objects = Vec::new();
        let mut start = 0;

        loop {
            let page_path = format!("{}{}range=[{}-{}]", path, separator, start, start + PAGE_SIZE);
            let Some(envelope) = self
                .request(operation, Method::GET, &page_path, None, Idempotence::NotFound)
                .await?
            else {
                break;
            };

            let page_len = envelope.data.as_array().map_or(0, Vec::len);
            objects.extend(StorageObject::list_from_value(envelope.data)?);
            if page_len < PAGE_SIZE {
                break;
            }
            start += PAGE_SIZE;
        }
        Ok(objects)
    }

    /// POST a new object. `None` means the array reported it already exists.
    pub(crate) async fn create_object(
        &self,
        operation: &str,
        path: &str,
        body: Value,
    ) -> Result<Option<StorageObject>> {
        match self
            .request(operation, Method::POST, path, Some(body), Idempotence::AlreadyExists)
            .await?
        {
            Some(envelope) => match StorageObject::from_value(envelope.data)? {
                Some(obj) => Ok(Some(obj)),
                None => Err(Error::Protocol(format!("{} returned no object ID", operation))),
            },
            None => Ok(None),
        }
    }

    /// Mutation whose "already exists" codes count as success
    pub(crate) async fn associate(&self, operation: &str, method: Method, path: &str, body: Value) -> Result<()> {
        self.request(operation, method, path, Some(body), Idempotence::AlreadyExists)
            .await
            .map(|_| ())
    }

    /// Plain mutation; every non-zero code is an error
    pub(crate) async fn update(&self, operation: &str, method: Method, path: &str, body: Value) -> Result<()> {
        self.request(operation, method, path, Some(body), Idempotence::Strict)
            .await
            .map(|_| ())
    }

    /// DELETE whose "not found" codes count as success
    pub(crate) async fn delete(&self, operation: &str, path: &str, body: Option<Value>) -> Result<()> {
        self.request(operation, Method::DELETE, path, body, Idempotence::NotFound)
            .await
            .map(|_| ())
    }
}

/// `filter=FIELD::value` with the value URL-encoded
pub(crate) fn filter(field: &str, value: &str) -> String {
    format!("filter={}::{}", field, urlencoding::encode(value))
}

/// Append a `vstoreId` query parameter unless addressing the system vstore
pub(crate) fn vstore_param(path: &str, vstore_id: &str) -> String {
    if vstore_id.is_empty() {
        path.to_string()
    } else if path.contains('?') {
        format!("{}&vstoreId={}", path, vstore_id)
    } else {
        format!("{}?vstoreId={}", path, vstore_id)
    }
}

/// Insert `vstoreId` into a request body when set
pub(crate) fn with_vstore(mut body: Value, vstore_id: &str) -> Value {
    if !vstore_id.is_empty() {
        body["vstoreId"] = json!(vstore_id);
    }
    body
}

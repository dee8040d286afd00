//! HTTP client for the Checkbox fiscal API.
//!
//! Holds the only mutable state of the fiscal layer: the cached cashier
//! token. Reads go through a bounded retry loop with a per-attempt timeout;
//! writes are sent once.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

use crate::checkbox::error::{error_from_body, CheckboxError, CheckboxResult, ErrorKind};
use crate::checkbox::models::{Cashier, TokenResponse};
use crate::core::config::{self, CheckboxSettings, Settings};
use crate::core::retry::RetryPolicy;

const API_PREFIX: &str = "api/v1/";

/// How the cashier signs in.
#[derive(Debug, Clone)]
pub enum Credentials {
    Pin(String),
    Login { login: String, password: String },
}

impl Credentials {
    pub fn from_settings(settings: &CheckboxSettings) -> Option<Self> {
        if let Some(pin) = settings.pin.as_ref().filter(|p| !p.is_empty()) {
            return Some(Credentials::Pin(pin.clone()));
        }
        match (&settings.login, &settings.password) {
            (Some(login), Some(password)) => Some(Credentials::Login {
                login: login.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// How a signed receipt is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactKind {
    /// QR code image plus text rendering
    #[default]
    QrWithText,
    /// Whole receipt as a PNG
    Png,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root, e.g. `https://api.checkbox.ua/`
    pub api_url: Url,
    pub credentials: Credentials,
    pub license: Option<String>,
    pub token_ttl: Duration,
    pub retry: RetryPolicy,
    pub artifact: ArtifactKind,
    /// Characters per line of the text rendering
    pub receipt_width: Option<u32>,
}

impl ClientConfig {
    pub fn new(api_url: &str, credentials: Credentials) -> CheckboxResult<Self> {
        let mut api_url = api_url.to_string();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        let api_url = Url::parse(&api_url).map_err(|e| CheckboxError::Config(format!("api_url: {}", e)))?;

        Ok(Self {
            api_url,
            credentials,
            license: None,
            token_ttl: Duration::from_secs(24 * 60 * 60),
            retry: RetryPolicy::default(),
            artifact: ArtifactKind::default(),
            receipt_width: None,
        })
    }

    pub fn from_settings(settings: &Settings) -> CheckboxResult<Self> {
        let checkbox = &settings.checkbox;
        let credentials = Credentials::from_settings(checkbox)
            .ok_or_else(|| CheckboxError::Config("checkbox: pin or login/password required".to_string()))?;

        let mut config = Self::new(&checkbox.api_url, credentials)?;
        config.license = checkbox.license.clone();
        config.token_ttl = Duration::from_secs(checkbox.token_ttl_hours * 60 * 60);
        config.receipt_width = settings.print.width;
        config.artifact = if settings.receipt_as_image {
            ArtifactKind::Png
        } else {
            ArtifactKind::QrWithText
        };
        Ok(config)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    authorization: String,
    expires_at: Instant,
}

/// Fiscal API client. Cheap to clone; clones share the token cache.
#[derive(Clone)]
pub struct CheckboxClient {
    http: reqwest::Client,
    base: Url,
    config: Arc<ClientConfig>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl CheckboxClient {
    pub fn new(config: ClientConfig) -> CheckboxResult<Self> {
        let http = reqwest::Client::builder().timeout(config::network::timeout()).build()?;
        let base = config
            .api_url
            .join(API_PREFIX)
            .map_err(|e| CheckboxError::Config(format!("api_url: {}", e)))?;

        log::info!("Fiscal API: {}", base);

        Ok(Self {
            http,
            base,
            config: Arc::new(config),
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> CheckboxResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| CheckboxError::Config(format!("{}: {}", path, e)))
    }

    fn base_headers(&self, license: bool) -> CheckboxResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Client-Name", HeaderValue::from_static(config::CLIENT_NAME));
        headers.insert("X-Client-Version", HeaderValue::from_static(config::CLIENT_VERSION));

        if license {
            let key = self
                .config
                .license
                .as_deref()
                .ok_or_else(|| CheckboxError::Config("checkbox: license key required".to_string()))?;
            let value =
                HeaderValue::from_str(key).map_err(|_| CheckboxError::Config("checkbox: invalid license key".to_string()))?;
            headers.insert("X-License-Key", value);
        }
        Ok(headers)
    }

    async fn request(&self, method: Method, path: &str, license: bool) -> CheckboxResult<RequestBuilder> {
        let authorization = self.authorization().await?;
        let mut headers = self.base_headers(license)?;
        let value = HeaderValue::from_str(&authorization)
            .map_err(|_| CheckboxError::Decode("authorization token".to_string()))?;
        headers.insert(AUTHORIZATION, value);

        Ok(self.http.request(method, self.endpoint(path)?).headers(headers))
    }

    /// Returns the `Authorization` header value, signing in when the cache is empty or stale.
    pub async fn authorization(&self) -> CheckboxResult<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.authorization.clone());
            }
        }

        let authorization = self.sign_in().await?;
        *cached = Some(CachedToken {
            authorization: authorization.clone(),
            expires_at: Instant::now() + self.config.token_ttl,
        });
        Ok(authorization)
    }

    /// Drops the cached token; the next call signs in again.
    pub async fn sign_out(&self) {
        if self.token.lock().await.take().is_some() {
            log::info!("Cashier signed out");
        }
    }

    async fn sign_in(&self) -> CheckboxResult<String> {
        let request = match &self.config.credentials {
            Credentials::Pin(pin_code) => self
                .http
                .post(self.endpoint("/cashier/signinPinCode")?)
                .headers(self.base_headers(true)?)
                .json(&serde_json::json!({ "pin_code": pin_code })),
            Credentials::Login { login, password } => self
                .http
                .post(self.endpoint("/cashier/signin")?)
                .headers(self.base_headers(false)?)
                .json(&serde_json::json!({ "login": login, "password": password })),
        };

        let body = read_success(request.send().await?, ErrorKind::Sign).await?;
        let token: TokenResponse = decode(&body)?;
        let authorization = format!("{} {}", token.token_type, token.access_token);

        let me = self
            .http
            .get(self.endpoint("/cashier/me")?)
            .headers(self.base_headers(false)?)
            .header(AUTHORIZATION, &authorization)
            .send()
            .await?;
        let cashier: Cashier = decode(&read_success(me, ErrorKind::Sign).await?)?;

        log::info!(
            "Signed in: {} ({})",
            cashier.full_name,
            cashier.signature_type.as_deref().unwrap_or("-")
        );
        Ok(authorization)
    }

    /// GET with retries. Returns the raw body of the first non-5xx success.
    ///
    /// Each attempt is bounded by `RetryPolicy::timeout_for_attempt`. Transport
    /// errors and 5xx responses are retried; a 4xx response fails immediately.
    pub async fn get_bytes(&self, path: &str, query: &[(&str, String)], kind: ErrorKind) -> CheckboxResult<Vec<u8>> {
        let policy = &self.config.retry;
        let mut last_response: Option<(StatusCode, Vec<u8>)> = None;
        let mut last_error: Option<CheckboxError> = None;

        for attempt in 0..policy.max_attempts {
            let timeout = policy.timeout_for_attempt(attempt);
            let request = self.request(Method::GET, path, false).await?.query(query).timeout(timeout);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    match response.bytes().await {
                        Ok(body) if status.is_server_error() => last_response = Some((status, body.to_vec())),
                        Ok(body) if status.is_success() => return Ok(body.to_vec()),
                        Ok(body) => return Err(error_from_body(status, &body, kind)),
                        Err(e) => last_error = Some(transport_error(e, path)),
                    }
                }
                Err(e) => last_error = Some(transport_error(e, path)),
            }

            log::warn!("retry attempt: {} ({})", attempt + 1, path);
            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.pause).await;
            }
        }

        if let Some((status, body)) = last_response {
            return Err(error_from_body(status, &body, kind));
        }
        Err(last_error.unwrap_or_else(|| kind.error("Невідома помилка")))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        kind: ErrorKind,
    ) -> CheckboxResult<T> {
        let body = self.get_bytes(path, query, kind).await?;
        decode(&body)
    }

    pub async fn get_text(&self, path: &str, query: &[(&str, String)], kind: ErrorKind) -> CheckboxResult<String> {
        let body = self.get_bytes(path, query, kind).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// POST sent exactly once.
    pub async fn post_json<B, T>(&self, path: &str, body: &B, license: bool, kind: ErrorKind) -> CheckboxResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(Method::POST, path, license).await?.json(body).send().await?;
        decode(&read_success(response, kind).await?)
    }

    /// Fails with `CheckboxError::Sign` unless the signature service reports online.
    pub async fn ensure_signature(&self) -> CheckboxResult<()> {
        let online = match self
            .get_json::<serde_json::Value>("/cashier/check-signature", &[], ErrorKind::Sign)
            .await
        {
            Ok(value) => value.get("online").and_then(|v| v.as_bool()).unwrap_or(false),
            Err(CheckboxError::Decode(_)) => false,
            Err(e) => return Err(e),
        };

        if online {
            Ok(())
        } else {
            Err(CheckboxError::Sign("Підпис недоступний".to_string()))
        }
    }
}

async fn read_success(response: reqwest::Response, kind: ErrorKind) -> CheckboxResult<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await?;
    if status.is_success() {
        Ok(body.to_vec())
    } else {
        Err(error_from_body(status, &body, kind))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> CheckboxResult<T> {
    serde_json::from_slice(body).map_err(|e| CheckboxError::Decode(e.to_string()))
}

fn transport_error(error: reqwest::Error, path: &str) -> CheckboxError {
    if error.is_timeout() {
        CheckboxError::Timeout(path.to_string())
    } else {
        CheckboxError::Transport(error)
    }
}

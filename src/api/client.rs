//! HTTP fetcher for the account and rate-limit endpoints.

use chrono::Utc;
use reqwest::header::{HeaderValue, ACCEPT, COOKIE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

use super::error::FetchError;
use super::identity::extract_organization_id;
use crate::usage::{normalize, UsageSnapshot};

pub const DEFAULT_BASE_URL: &str = "https://claude.ai/api";

const SESSION_COOKIE_PREFIX: &str = "sessionKey=";
const CLIENT_USER_AGENT: &str = concat!("usage-panel/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cookie header value for a credential.
///
/// Accepts either a raw token or a cookie string that already carries the
/// `sessionKey=` prefix.
pub fn session_cookie(credential: &str) -> String {
    let credential = credential.trim();
    if credential.starts_with(SESSION_COOKIE_PREFIX) {
        credential.to_string()
    } else {
        format!("{}{}", SESSION_COOKIE_PREFIX, credential)
    }
}

/// Client for the usage service. Cheap to clone; clones share one
/// connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    referer: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let parsed =
            Url::parse(&base_url).map_err(|e| format!("Invalid base URL {:?}: {}", base_url, e))?;
        let referer = format!("{}/", parsed.origin().ascii_serialization());

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url,
            referer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn account_url(&self) -> String {
        format!("{}/auth/current_account", self.base_url)
    }

    pub fn usage_url(&self, organization_id: &str) -> String {
        format!(
            "{}/organizations/{}/rate_limit_status",
            self.base_url, organization_id
        )
    }

    /// GET `url` with the credential and decode the body as JSON.
    ///
    /// An empty credential fails with `NoCredential` before any request is
    /// made. No retries happen here.
    pub async fn fetch_json(&self, url: &str, credential: &str) -> Result<Value, FetchError> {
        if credential.trim().is_empty() {
            return Err(FetchError::NoCredential);
        }

        let cookie = HeaderValue::from_str(&session_cookie(credential)).map_err(|_| {
            log::warn!("Api: credential contains characters not allowed in a header");
            FetchError::AuthFailed
        })?;

        log::debug!("Api: GET {}", url);
        let response = self
            .http
            .get(url)
            .header(COOKIE, cookie)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/json")
            .header(REFERER, self.referer.as_str())
            .send()
            .await
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AuthFailed);
        }
        if !status.is_success() {
            return Err(FetchError::HttpError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
    }

    /// Look up the organization the credential belongs to.
    pub async fn resolve_organization(&self, credential: &str) -> Result<String, FetchError> {
        let account = self.fetch_json(&self.account_url(), credential).await?;
        extract_organization_id(&account).ok_or(FetchError::OrganizationNotFound)
    }

    /// Fetch and normalize the rate-limit status for an organization.
    pub async fn fetch_usage(
        &self,
        credential: &str,
        organization_id: &str,
    ) -> Result<UsageSnapshot, FetchError> {
        let payload = self
            .fetch_json(&self.usage_url(organization_id), credential)
            .await?;

        if !payload.is_object() {
            return Err(FetchError::ParseError(format!(
                "expected a JSON object, got {}",
                json_kind(&payload)
            )));
        }

        Ok(normalize(&payload, Utc::now()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! forge::transport
//!
//! Thin REST transport shared by the HTTP backends.
//!
//! # Design
//!
//! [`ProviderClient`] owns nothing mutable: the `reqwest::Client`, the
//! provider name, the API root and the caller's [`Session`]. Every request
//!
//! - asks the session's credential provider for a token, so a refreshed
//!   credential is used by the very next call,
//! - races the session's cancel token and timeout,
//! - retries 429 (and GitHub's exhausted-quota 403) with bounded exponential
//!   backoff, honouring `Retry-After`,
//! - maps any other non-success status to a classified [`ForgeError`].
//!
//! Network errors are returned as-is; whether to retry them is the caller's
//! decision.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::traits::{ApiError, ForgeError};
use crate::auth::AuthScheme;
use crate::core::session::Session;

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = concat!("contentforge/", env!("CARGO_PKG_VERSION"));

/// Upper bound on followed pages, against providers that loop.
const MAX_PAGES: usize = 1000;

/// Method, body, query parameters and extra headers of one request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::with_method(Method::GET)
    }

    pub fn delete() -> Self {
        Self::with_method(Method::DELETE)
    }

    pub fn post(body: Value) -> Self {
        Self::with_method(Method::POST).body(body)
    }

    pub fn put(body: Value) -> Self {
        Self::with_method(Method::PUT).body(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::with_method(Method::PATCH).body(body)
    }

    fn with_method(method: Method) -> Self {
        Self {
            method,
            body: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    fn set_param(&mut self, key: &str, value: String) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value));
    }
}

/// A successful response, fully read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Parse the body as JSON; an empty body parses as `null`.
    pub fn json<T: DeserializeOwned>(&self, api: &str) -> Result<T, ForgeError> {
        let parsed = if self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        };
        parsed.map_err(|e| ForgeError::Validation {
            api: api.to_string(),
            message: format!("failed to parse response: {}", e),
        })
    }
}

/// Where the next page of a listing lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextPage {
    Url(String),
    Page(String),
}

/// REST client for one provider.
#[derive(Clone)]
pub struct ProviderClient {
    http: Client,
    api: &'static str,
    api_root: String,
    scheme: AuthScheme,
    session: Session,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("api", &self.api)
            .field("api_root", &self.api_root)
            .field("scheme", &self.scheme)
            .field("session", &self.session)
            .finish()
    }
}

impl ProviderClient {
    pub fn new(
        api: &'static str,
        api_root: impl Into<String>,
        scheme: AuthScheme,
        session: Session,
    ) -> Self {
        Self {
            http: Client::new(),
            api,
            api_root: api_root.into().trim_end_matches('/').to_string(),
            scheme,
            session,
        }
    }

    pub fn api(&self) -> &'static str {
        self.api
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Absolute URL for an API path. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_root, path.trim_start_matches('/'))
        }
    }

    /// Issue a request and parse the JSON response.
    ///
    /// # Errors
    ///
    /// Any non-success status is classified with [`ForgeError::from_api`];
    /// an unparseable body yields [`ForgeError::Validation`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ForgeError> {
        self.request_raw(path, options).await?.json(self.api)
    }

    /// Issue a request and return the raw successful response.
    pub async fn request_raw(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<RawResponse, ForgeError> {
        self.send(&self.url(path), &options).await
    }

    /// Issue a GET for a JSON array, following pagination and accumulating
    /// every page.
    pub async fn request_all<T: DeserializeOwned>(
        &self,
        path: &str,
        mut options: RequestOptions,
    ) -> Result<Vec<T>, ForgeError> {
        let mut url = self.url(path);
        let mut items = Vec::new();

        for _ in 0..MAX_PAGES {
            let response = self.send(&url, &options).await?;
            let page: Vec<T> = response.json(self.api)?;
            items.extend(page);

            match next_page(&response.headers) {
                Some(NextPage::Url(next)) => {
                    // The link already carries every query parameter.
                    url = next;
                    options.params.clear();
                }
                Some(NextPage::Page(page)) => options.set_param("page", page),
                None => return Ok(items),
            }
        }

        tracing::warn!(api = self.api, url = %url, "stopped following pagination");
        Ok(items)
    }

    async fn send(&self, url: &str, options: &RequestOptions) -> Result<RawResponse, ForgeError> {
        let retry = self.session.retry();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.session.cancel_token().is_cancelled() {
                return Err(ForgeError::Cancelled);
            }

            let token = self.session.credentials().bearer_token().await?;
            let mut builder = self
                .http
                .request(options.method.clone(), url)
                .header(USER_AGENT, USER_AGENT_VALUE);
            if !options.has_header("accept") {
                builder = builder.header(ACCEPT, "application/json");
            }
            if !token.is_empty() {
                builder = builder.header(AUTHORIZATION, self.scheme.header_value(&token));
            }
            if !options.params.is_empty() {
                builder = builder.query(&options.params);
            }
            for (key, value) in &options.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(body) = &options.body {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.to_string());
            }

            tracing::debug!(api = self.api, method = %options.method, url, attempt, "dispatching request");
            let response = self.guard(builder.send()).await?;
            let status = response.status();
            let headers = response.headers().clone();

            if is_rate_limited(status, &headers) {
                if attempt >= retry.max_attempts {
                    return Err(ForgeError::RateLimited {
                        api: self.api.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = retry_after(&headers)
                    .map(|d| d.min(retry.max_delay))
                    .unwrap_or_else(|| retry.delay_for(attempt));
                tracing::warn!(api = self.api, url, attempt, ?delay, "rate limited, backing off");
                tokio::select! {
                    biased;
                    _ = self.session.cancel_token().cancelled() => return Err(ForgeError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            let body = self.guard(response.bytes()).await?.to_vec();
            if !status.is_success() {
                let error = ApiError::new(self.api, status.as_u16(), extract_message(status, &body))
                    .with_path(url.strip_prefix(self.api_root.as_str()).unwrap_or(url));
                tracing::debug!(api = self.api, status = status.as_u16(), message = %error.message, "request failed");
                return Err(ForgeError::from_api(error));
            }

            return Ok(RawResponse {
                status,
                headers,
                body,
            });
        }
    }

    /// Race a transport future against cancellation and the session timeout.
    async fn guard<T, F>(&self, future: F) -> Result<T, ForgeError>
    where
        F: Future<Output = Result<T, reqwest::Error>>,
    {
        let timeout = self.session.timeout();
        tokio::select! {
            biased;
            _ = self.session.cancel_token().cancelled() => Err(ForgeError::Cancelled),
            result = tokio::time::timeout(timeout, future) => match result {
                Err(_) => Err(ForgeError::Timeout(timeout)),
                Ok(Err(e)) if e.is_timeout() => Err(ForgeError::Timeout(timeout)),
                Ok(Err(e)) => Err(ForgeError::Network(e.to_string())),
                Ok(Ok(value)) => Ok(value),
            },
        }
    }
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && header_str(headers, "x-ratelimit-remaining") == Some("0"))
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, "retry-after")?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn next_page(headers: &HeaderMap) -> Option<NextPage> {
    if let Some(link) = header_str(headers, "link") {
        if let Some(url) = parse_link_next(link) {
            return Some(NextPage::Url(url));
        }
    }
    header_str(headers, "x-next-page")
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .map(|page| NextPage::Page(page.to_string()))
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
///
/// ```
/// use contentforge::forge::transport::parse_link_next;
///
/// let link = r#"<https://api/x?page=2>; rel="next", <https://api/x?page=9>; rel="last""#;
/// assert_eq!(parse_link_next(link).as_deref(), Some("https://api/x?page=2"));
/// assert_eq!(parse_link_next(r#"<https://api/x?page=1>; rel="prev""#), None);
/// ```
pub fn parse_link_next(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if is_next {
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        } else {
            None
        }
    })
}

/// Pull a human message out of an error body.
///
/// Understands `{"message": "..."}` (GitHub, Gitea), GitLab's
/// `{"message": {"field": ["..."]}}` and `{"error": "..."}`, and falls back to
/// the raw body, then to the status reason.
///
/// ```
/// use contentforge::forge::transport::extract_message;
/// use reqwest::StatusCode;
///
/// assert_eq!(extract_message(StatusCode::NOT_FOUND, br#"{"message":"some error"}"#), "some error");
/// assert_eq!(extract_message(StatusCode::BAD_REQUEST, br#"{"error":"bad ref"}"#), "bad ref");
/// assert_eq!(extract_message(StatusCode::BAD_GATEWAY, b""), "Bad Gateway");
/// ```
pub fn extract_message(status: StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }

    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            let field = value.get("message").or_else(|| value.get("error"))?;
            render_message(field)
        })
        .unwrap_or_else(|| text.to_string())
}

fn render_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_message).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .filter_map(|(key, v)| render_message(v).map(|m| format!("{key}: {m}")))
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    mod messages {
        use super::*;

        #[test]
        fn gitlab_object_message() {
            let body = br#"{"message":{"base":["branch is protected"]}}"#;
            assert_eq!(
                extract_message(StatusCode::BAD_REQUEST, body),
                "base: branch is protected"
            );
        }

        #[test]
        fn gitlab_array_message() {
            let body = br#"{"message":["a","b"]}"#;
            assert_eq!(extract_message(StatusCode::BAD_REQUEST, body), "a, b");
        }

        #[test]
        fn plain_text_body() {
            assert_eq!(
                extract_message(StatusCode::INTERNAL_SERVER_ERROR, b"  upstream died \n"),
                "upstream died"
            );
        }

        #[test]
        fn json_without_message_falls_back_to_body() {
            assert_eq!(
                extract_message(StatusCode::BAD_REQUEST, br#"{"code":1}"#),
                r#"{"code":1}"#
            );
        }
    }

    mod pagination {
        use super::*;

        #[test]
        fn link_header_wins() {
            let h = headers(&[
                ("link", r#"<https://x/api?page=2>; rel="next""#),
                ("x-next-page", "7"),
            ]);
            assert_eq!(
                next_page(&h),
                Some(NextPage::Url("https://x/api?page=2".into()))
            );
        }

        #[test]
        fn gitlab_next_page() {
            let h = headers(&[("x-next-page", "3")]);
            assert_eq!(next_page(&h), Some(NextPage::Page("3".into())));
        }

        #[test]
        fn empty_next_page_ends() {
            let h = headers(&[("x-next-page", "")]);
            assert_eq!(next_page(&h), None);
        }

        #[test]
        fn set_param_replaces() {
            let mut options = RequestOptions::get().param("page", 1).param("per_page", 100);
            options.set_param("page", "2".into());
            assert_eq!(
                options.params,
                vec![
                    ("per_page".to_string(), "100".to_string()),
                    ("page".to_string(), "2".to_string())
                ]
            );
        }
    }

    mod rate_limits {
        use super::*;

        #[test]
        fn status_429() {
            assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()));
        }

        #[test]
        fn github_quota_403() {
            let h = headers(&[("x-ratelimit-remaining", "0")]);
            assert!(is_rate_limited(StatusCode::FORBIDDEN, &h));
            assert!(!is_rate_limited(StatusCode::FORBIDDEN, &HeaderMap::new()));
        }

        #[test]
        fn retry_after_seconds() {
            let h = headers(&[("retry-after", "3")]);
            assert_eq!(retry_after(&h), Some(Duration::from_secs(3)));
            let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")]);
            assert_eq!(retry_after(&h), None);
        }
    }

    #[test]
    fn url_joins_and_passes_absolute() {
        let client = ProviderClient::new(
            "gitea",
            "https://git.example.com/api/v1/",
            AuthScheme::Token,
            Session::new(std::sync::Arc::new(crate::auth::Anonymous)),
        );
        assert_eq!(
            client.url("/repos/o/r"),
            "https://git.example.com/api/v1/repos/o/r"
        );
        assert_eq!(client.url("https://other/x"), "https://other/x");
    }

    #[test]
    fn empty_body_parses_as_null() {
        let response = RawResponse {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        let value: Option<Value> = response.json("gitea").unwrap();
        assert!(value.is_none());
        let unit: () = response.json("gitea").unwrap();
        let _ = unit;
    }
}

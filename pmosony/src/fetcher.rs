//! Blocking HTTP access to the device descriptors and control endpoints.
//!
//! Every request carries the device's [`AuthSession`] headers and cookies
//! unless the caller opts out through [`RequestOptions`].

use std::fmt;
use std::time::Duration;

use tracing::{debug, error};
use ureq::Agent;

use crate::auth::{AuthSession, CookieScope};
use crate::config::DriverConfig;
use crate::errors::{FetchError, SonyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Per-call adjustments of a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub body: Option<String>,
    /// Headers added on top of the session headers (same name replaces).
    pub headers: Vec<(String, String)>,
    /// Send only `headers`, not the session headers.
    pub skip_session_headers: bool,
    pub cookies: CookieScope,
}

impl RequestOptions {
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn without_session_headers(mut self) -> Self {
        self.skip_session_headers = true;
        self
    }

    pub fn with_cookies(mut self, cookies: CookieScope) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn json(body: &serde_json::Value) -> Self {
        Self::default()
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }
}

/// Successful (2xx) HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `(name, value)` pairs taken from the `Set-Cookie` headers.
    pub cookies: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn json(&self) -> Result<serde_json::Value, SonyError> {
        serde_json::from_str(&self.body)
            .map_err(|e| SonyError::parse(format!("invalid JSON body: {}", e)))
    }
}

pub struct Fetcher {
    agent: Agent,
    timeout: Duration,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Fetcher::new(&DriverConfig::default())
    }
}

impl Fetcher {
    pub fn new(config: &DriverConfig) -> Self {
        let timeout = config.http_timeout();
        // 4xx/5xx are inspected here, not turned into ureq errors.
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self { agent, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request. Network and HTTP failures come back as a
    /// [`FetchError`]; nothing is logged, the caller decides.
    pub fn fetch(
        &self,
        method: HttpMethod,
        url: Option<&str>,
        session: &AuthSession,
        options: RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let url = match url {
            Some(u) if !u.trim().is_empty() => u,
            _ => return Err(FetchError::MalformedRequest),
        };

        debug!(url, method = method.as_str(), "Calling http url");

        let mut headers: Vec<(String, String)> = Vec::new();
        if !options.skip_session_headers {
            headers.extend(
                session
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        for (name, value) in options.headers {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
            headers.push((name, value));
        }
        if let Some(cookie) = session.cookie_header(options.cookies) {
            headers.push(("Cookie".to_string(), cookie));
        }

        let result = match method {
            HttpMethod::Get => {
                let mut request = self.agent.get(url);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request.call()
            }
            HttpMethod::Post => {
                let mut request = self.agent.post(url);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                match options.body {
                    Some(body) => request.send(body),
                    None => request.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| FetchError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| FetchError::Connection {
                url: url.to_string(),
                reason: format!("failed to read body: {}", e),
            })?;

        Ok(HttpResponse {
            status,
            body,
            cookies,
        })
    }

    /// Same as [`fetch`](Self::fetch) for resources whose absence is
    /// tolerated: the failure is logged and `None` returned.
    pub fn fetch_optional(
        &self,
        method: HttpMethod,
        url: Option<&str>,
        session: &AuthSession,
        options: RequestOptions,
    ) -> Option<HttpResponse> {
        match self.fetch(method, url, session, options) {
            Ok(response) => Some(response),
            Err(err) => {
                error!("HTTPError: {}", err);
                None
            }
        }
    }
}

/// `auth=abc; Path=/sony; Max-Age=1209600` → `("auth", "abc")`
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

//! Authentication state shared by every request sent to a device.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationResult {
    Success,
    Error,
    PinNeeded,
}

/// Which cookies accompany a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CookieScope {
    #[default]
    All,
    /// Only the `auth` cookie, re-scoped to the root path (DIAL calls).
    AuthOnly,
}

pub const AUTH_COOKIE: &str = "auth";

/// PIN, active header set and cookie jar of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub pin: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// Set once a registration succeeded (the no-PIN dialects never get a PIN).
    #[serde(default)]
    pub registered: bool,
}

impl AuthSession {
    pub fn is_authorized(&self) -> bool {
        self.registered || self.pin.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Keep the cookies handed out by the device. A later cookie of the
    /// same name replaces the earlier one.
    pub fn store_cookies<'a, I>(&mut self, cookies: I)
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        for (name, value) in cookies {
            debug!(cookie = name.as_str(), "Storing session cookie");
            self.cookies.insert(name.clone(), value.clone());
        }
    }

    /// Value of the `Cookie` request header for the given scope.
    pub fn cookie_header(&self, scope: CookieScope) -> Option<String> {
        let pairs: Vec<String> = match scope {
            CookieScope::All => self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            CookieScope::AuthOnly => self
                .cookies
                .get(AUTH_COOKIE)
                .map(|v| vec![format!("{}={}", AUTH_COOKIE, v)])
                .unwrap_or_default(),
        };
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// `Basic` credentials with an empty user name and the PIN as password.
pub fn basic_authorization(pin: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{}", pin)))
}

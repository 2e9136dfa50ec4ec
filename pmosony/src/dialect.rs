//! One driver per protocol generation.
//!
//! [`driver`] maps a [`ProtocolVersion`] to the object implementing its
//! discovery, command listing, registration and application calls. The
//! device never branches on the version itself.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::auth::{AuthenticationResult, CookieScope, basic_authorization};
use crate::descriptors::{
    DmrDescriptor, parse_action_list, parse_app_list, parse_command_list, parse_command_list_v4,
    parse_ircc, parse_supported_functions, parse_system_information, rpc_error,
    scalar_control_url, synthesize_scalar_capabilities,
};
use crate::device::{DeviceIdentity, SonyDevice};
use crate::errors::{FetchError, SonyError};
use crate::fetcher::{HttpMethod, RequestOptions};
use crate::ircc_codes::builtin_commands;
use crate::registry::CapabilityRecord;
use crate::version::ProtocolVersion;

pub const HEADER_DEVICE_ID: &str = "X-CERS-DEVICE-ID";
pub const HEADER_DEVICE_INFO: &str = "X-CERS-DEVICE-INFO";

pub trait DialectDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `authenticate` needs a PIN. Without one the device is
    /// authorized as soon as it is reachable.
    fn requires_pin(&self) -> bool;

    /// Fill the action table and the service URLs from the descriptors.
    /// Legacy drivers pin `device.api_version` from the `register` mode.
    fn build_capabilities(
        &self,
        device: &mut SonyDevice,
        dmr: &DmrDescriptor,
    ) -> Result<(), SonyError>;

    fn fetch_commands(&self, device: &mut SonyDevice) -> Result<(), SonyError>;

    /// Headers sent with every request once authentication is set up.
    fn authentication_headers(&self, device: &SonyDevice) -> BTreeMap<String, String>;

    fn register(
        &self,
        device: &mut SonyDevice,
        registration: &CapabilityRecord,
    ) -> AuthenticationResult;

    fn fetch_apps(&self, device: &mut SonyDevice) -> Result<(), SonyError>;

    fn start_app(&self, device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError>;

    fn power_status(&self, device: &SonyDevice) -> bool;
}

/// Built-in IRCC table, no registration.
pub struct CodeOnlyDriver;
/// Modes 1 and 2: action list, registration is a reachability check.
/// Mode 2 devices still take a PIN before registering.
pub struct ActionListDriver {
    pin: bool,
}

impl ActionListDriver {
    pub const PINLESS: ActionListDriver = ActionListDriver { pin: false };
    pub const WITH_PIN: ActionListDriver = ActionListDriver { pin: true };
}

/// Mode 3: CERS registration, PIN through Basic auth.
pub struct CersDriver;
/// Mode 4: ScalarWebAPI JSON-RPC, DIAL applications.
pub struct ScalarDriver;

pub fn driver(version: ProtocolVersion) -> &'static dyn DialectDriver {
    match version {
        ProtocolVersion::CodeOnly => &CodeOnlyDriver,
        ProtocolVersion::Legacy1 => &ActionListDriver::PINLESS,
        ProtocolVersion::Legacy2 => &ActionListDriver::WITH_PIN,
        ProtocolVersion::Cers => &CersDriver,
        ProtocolVersion::ScalarWebApi => &ScalarDriver,
    }
}

/// JSON-RPC body of the ScalarWebAPI. Every call carries the client
/// identity and the WOL capability flag.
pub fn rpc_request(identity: &DeviceIdentity, method: &str) -> Value {
    json!({
        "method": method,
        "params": [
            {
                "clientid": identity.client_id,
                "nickname": identity.nickname,
            },
            [{
                "clientid": identity.client_id,
                "nickname": identity.nickname,
                "value": "yes",
                "function": "WOL",
            }]
        ],
        "id": 1,
        "version": "1.0",
    })
}

// ---------------------------------------------------------------------------
// Legacy discovery (versions 0 to 3)
// ---------------------------------------------------------------------------

fn build_legacy_capabilities(device: &mut SonyDevice) -> Result<(), SonyError> {
    let ircc_url = device.ircc_url();
    let response = device.fetcher.fetch(
        HttpMethod::Get,
        Some(&ircc_url),
        &device.session,
        RequestOptions::default(),
    )?;
    let ircc = parse_ircc(&response.body, &ircc_url)?;

    if ircc.control_url.is_some() {
        device.urls.control_url = ircc.control_url;
    }
    device.ircc_categories = ircc.categories;
    device.info = ircc.info;

    match ircc.action_list_url {
        Some(url) => {
            device.urls.action_list_url = Some(url.clone());
            load_action_list(device, &url)?;
        }
        None if !device.ircc_categories.is_empty() => {
            debug!(url = %ircc_url, "No action list advertised, using IR categories only");
        }
        None => {
            return Err(SonyError::missing_capability("X_CERS_ActionList_URL"));
        }
    }

    load_system_information(device);
    Ok(())
}

fn load_action_list(device: &mut SonyDevice, url: &str) -> Result<(), SonyError> {
    let Some(response) =
        device
            .fetcher
            .fetch_optional(HttpMethod::Get, Some(url), &device.session, RequestOptions::default())
    else {
        return Ok(());
    };

    let actions = match parse_action_list(
        &response.body,
        url,
        &device.identity.nickname,
        &device.identity.client_id,
    ) {
        Ok(actions) => actions,
        Err(err) => {
            warn!(url, "Invalid action list: {}", err);
            return Ok(());
        }
    };

    for action in actions {
        device.registry.register(action);
    }

    // the register mode is the protocol version of legacy devices
    if let Some(mode) = device.registry.register_mode() {
        device.api_version = ProtocolVersion::from_mode(mode)?;
        debug!(version = %device.api_version, "Protocol version pinned by action list");
    }
    Ok(())
}

fn load_system_information(device: &mut SonyDevice) {
    let Ok(url) = device
        .registry
        .get("getSystemInformation")
        .map(|action| action.url.clone())
    else {
        return;
    };

    let Some(response) = device.fetcher.fetch_optional(
        HttpMethod::Get,
        url.as_deref(),
        &device.session,
        RequestOptions::default(),
    ) else {
        return;
    };

    match parse_system_information(&response.body) {
        Ok(Some(mac)) => device.mac = Some(mac),
        Ok(None) => debug!("System information carries no WOL MAC address"),
        Err(err) => warn!("Invalid system information: {}", err),
    }
}

fn fetch_legacy_commands(device: &mut SonyDevice) -> Result<(), SonyError> {
    let Ok(url) = device
        .registry
        .get("getRemoteCommandList")
        .map(|action| action.url.clone())
    else {
        debug!("Action list not set in device, no command list to read");
        return Ok(());
    };

    let Some(response) = device.fetcher.fetch_optional(
        HttpMethod::Get,
        url.as_deref(),
        &device.session,
        RequestOptions::default(),
    ) else {
        debug!("Failed to get response for command list, device might be off");
        return Ok(());
    };

    match parse_command_list(&response.body) {
        Ok(commands) => {
            for command in commands {
                device.registry.insert_command(command);
            }
        }
        Err(err) => warn!("Invalid command list: {}", err),
    }
    Ok(())
}

fn load_app_list(device: &mut SonyDevice, url: &str, options: RequestOptions) {
    let Some(response) =
        device
            .fetcher
            .fetch_optional(HttpMethod::Get, Some(url), &device.session, options)
    else {
        return;
    };

    match parse_app_list(&response.body) {
        Ok(apps) => {
            for app in apps {
                device.registry.insert_app(app);
            }
        }
        Err(err) => warn!(url, "Invalid application list: {}", err),
    }
}

fn app_identifier(app: &CapabilityRecord) -> Result<&str, SonyError> {
    app.identifier
        .as_deref()
        .ok_or_else(|| SonyError::missing_capability(&app.name))
}

fn fetch_legacy_apps(device: &mut SonyDevice) -> Result<(), SonyError> {
    let url = format!("{}/appslist", device.app_url());
    load_app_list(device, &url, RequestOptions::default());
    Ok(())
}

fn start_legacy_app(device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError> {
    let url = format!("{}/apps/{}", device.app_url(), app_identifier(app)?);
    let options = RequestOptions::default().with_body(format!("LOCATION: {}/run", url));
    device
        .fetcher
        .fetch(HttpMethod::Post, Some(&url), &device.session, options)?;
    Ok(())
}

/// A legacy device is on when its descriptor answers.
fn is_reachable(device: &SonyDevice, url: Option<&str>) -> bool {
    match device
        .fetcher
        .fetch(HttpMethod::Get, url, &device.session, RequestOptions::default())
    {
        Ok(_) => true,
        Err(err) => {
            debug!("Power check failed: {}", err);
            false
        }
    }
}

fn cers_headers(device: &SonyDevice) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(
        HEADER_DEVICE_ID.to_string(),
        device.identity.nickname.clone(),
    );
    headers.insert(
        HEADER_DEVICE_INFO.to_string(),
        device.identity.nickname.clone(),
    );
    headers
}

fn pin_authorization(device: &SonyDevice) -> String {
    basic_authorization(device.session.pin.as_deref().unwrap_or_default())
}

impl DialectDriver for CodeOnlyDriver {
    fn name(&self) -> &'static str {
        "code-only"
    }

    fn requires_pin(&self) -> bool {
        false
    }

    fn build_capabilities(
        &self,
        device: &mut SonyDevice,
        _dmr: &DmrDescriptor,
    ) -> Result<(), SonyError> {
        build_legacy_capabilities(device)
    }

    fn fetch_commands(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        for command in builtin_commands(&device.ircc_categories) {
            device.registry.insert_command(command);
        }
        Ok(())
    }

    fn authentication_headers(&self, device: &SonyDevice) -> BTreeMap<String, String> {
        cers_headers(device)
    }

    fn register(
        &self,
        device: &mut SonyDevice,
        registration: &CapabilityRecord,
    ) -> AuthenticationResult {
        ActionListDriver::PINLESS.register(device, registration)
    }

    fn fetch_apps(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        fetch_legacy_apps(device)
    }

    fn start_app(&self, device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError> {
        start_legacy_app(device, app)
    }

    fn power_status(&self, device: &SonyDevice) -> bool {
        let url = device
            .urls
            .action_list_url
            .clone()
            .unwrap_or_else(|| device.ircc_url());
        is_reachable(device, Some(&url))
    }
}

impl DialectDriver for ActionListDriver {
    fn name(&self) -> &'static str {
        if self.pin { "action-list-pin" } else { "action-list" }
    }

    fn requires_pin(&self) -> bool {
        self.pin
    }

    fn build_capabilities(
        &self,
        device: &mut SonyDevice,
        _dmr: &DmrDescriptor,
    ) -> Result<(), SonyError> {
        build_legacy_capabilities(device)
    }

    fn fetch_commands(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        fetch_legacy_commands(device)
    }

    fn authentication_headers(&self, device: &SonyDevice) -> BTreeMap<String, String> {
        cers_headers(device)
    }

    /// Registration only checks that the device answers.
    fn register(
        &self,
        device: &mut SonyDevice,
        registration: &CapabilityRecord,
    ) -> AuthenticationResult {
        match device.fetcher.fetch(
            HttpMethod::Get,
            registration.url.as_deref(),
            &device.session,
            RequestOptions::default(),
        ) {
            Ok(_) => {
                device.session.registered = true;
                AuthenticationResult::Success
            }
            Err(err) => {
                error!("Registration failed: {}", err);
                AuthenticationResult::Error
            }
        }
    }

    fn fetch_apps(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        fetch_legacy_apps(device)
    }

    fn start_app(&self, device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError> {
        start_legacy_app(device, app)
    }

    fn power_status(&self, device: &SonyDevice) -> bool {
        is_reachable(device, device.urls.action_list_url.as_deref())
    }
}

fn registration_outcome(err: &FetchError) -> AuthenticationResult {
    match err.status() {
        Some(401) => AuthenticationResult::PinNeeded,
        _ => {
            error!("Registration failed: {}", err);
            AuthenticationResult::Error
        }
    }
}

impl DialectDriver for CersDriver {
    fn name(&self) -> &'static str {
        "cers"
    }

    fn requires_pin(&self) -> bool {
        true
    }

    fn build_capabilities(
        &self,
        device: &mut SonyDevice,
        _dmr: &DmrDescriptor,
    ) -> Result<(), SonyError> {
        build_legacy_capabilities(device)
    }

    fn fetch_commands(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        fetch_legacy_commands(device)
    }

    fn authentication_headers(&self, device: &SonyDevice) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), pin_authorization(device));
        headers.insert(
            HEADER_DEVICE_ID.to_string(),
            device.identity.client_id.clone(),
        );
        headers
    }

    fn register(
        &self,
        device: &mut SonyDevice,
        registration: &CapabilityRecord,
    ) -> AuthenticationResult {
        match device.fetcher.fetch(
            HttpMethod::Get,
            registration.url.as_deref(),
            &device.session,
            RequestOptions::default(),
        ) {
            Ok(_) => {
                device.session.registered = true;
                AuthenticationResult::Success
            }
            Err(err) => registration_outcome(&err),
        }
    }

    fn fetch_apps(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        fetch_legacy_apps(device)
    }

    fn start_app(&self, device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError> {
        start_legacy_app(device, app)
    }

    fn power_status(&self, device: &SonyDevice) -> bool {
        is_reachable(device, device.urls.action_list_url.as_deref())
    }
}

impl ScalarDriver {
    fn system_url(device: &SonyDevice) -> String {
        format!("{}system", device.base_url())
    }
}

impl DialectDriver for ScalarDriver {
    fn name(&self) -> &'static str {
        "scalar-web-api"
    }

    fn requires_pin(&self) -> bool {
        true
    }

    fn build_capabilities(
        &self,
        device: &mut SonyDevice,
        dmr: &DmrDescriptor,
    ) -> Result<(), SonyError> {
        let base = dmr
            .scalar_base_url
            .clone()
            .unwrap_or_else(|| device.base_url());
        device.urls.base_url = Some(base.clone());
        for action in synthesize_scalar_capabilities(&base) {
            device.registry.register(action);
        }
        device.urls.control_url = Some(scalar_control_url(&base));

        let request = rpc_request(&device.identity, "getSystemSupportedFunction");
        let Some(response) = device.fetcher.fetch_optional(
            HttpMethod::Post,
            Some(&Self::system_url(device)),
            &device.session,
            RequestOptions::json(&request),
        ) else {
            debug!("no response received, device might be off");
            return Ok(());
        };

        match response.json().and_then(|v| parse_supported_functions(&v)) {
            Ok(Some(mac)) => device.mac = Some(mac),
            Ok(None) => debug!("Supported functions carry no WOL MAC address"),
            Err(err) => warn!("Invalid supported functions answer: {}", err),
        }
        Ok(())
    }

    fn fetch_commands(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        if !device.session.is_authorized() {
            debug!("Registration necessary to read command list.");
            return Ok(());
        }
        let Ok(action) = device.registry.get("getRemoteCommandList").cloned() else {
            return Ok(());
        };

        let method = action.value.as_deref().unwrap_or("getRemoteControllerInfo");
        let options =
            RequestOptions::json(&rpc_request(&device.identity, method)).without_session_headers();
        let Some(response) = device.fetcher.fetch_optional(
            HttpMethod::Post,
            action.url.as_deref(),
            &device.session,
            options,
        ) else {
            debug!("no response received, device might be off");
            return Ok(());
        };

        match response.json().and_then(|v| parse_command_list_v4(&v)) {
            Ok(commands) => {
                for command in commands {
                    device.registry.insert_command(command);
                }
            }
            Err(err) => error!("{}", err),
        }
        Ok(())
    }

    fn authentication_headers(&self, device: &SonyDevice) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), pin_authorization(device));
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers
    }

    fn register(
        &self,
        device: &mut SonyDevice,
        registration: &CapabilityRecord,
    ) -> AuthenticationResult {
        let request = rpc_request(&device.identity, "actRegister");
        let options =
            RequestOptions::json(&request).with_header("Authorization", pin_authorization(device));

        let response = match device.fetcher.fetch(
            HttpMethod::Post,
            registration.url.as_deref(),
            &device.session,
            options,
        ) {
            Ok(response) => response,
            Err(err) => return registration_outcome(&err),
        };

        let body = match response.json() {
            Ok(body) => body,
            Err(err) => {
                error!("Registration answer is not JSON: {}", err);
                return AuthenticationResult::Error;
            }
        };
        if let Some(err) = rpc_error(&body) {
            error!("Registration refused by device: {}", err);
            return AuthenticationResult::Error;
        }

        device.session.store_cookies(&response.cookies);
        device.session.registered = true;
        AuthenticationResult::Success
    }

    fn fetch_apps(&self, device: &mut SonyDevice) -> Result<(), SonyError> {
        let url = format!("{}/DIAL/sony/applist", device.dial_origin());
        load_app_list(
            device,
            &url,
            RequestOptions::default().with_cookies(CookieScope::AuthOnly),
        );
        Ok(())
    }

    fn start_app(&self, device: &SonyDevice, app: &CapabilityRecord) -> Result<(), SonyError> {
        let url = format!("{}/DIAL/apps/{}", device.dial_origin(), app_identifier(app)?);
        device.fetcher.fetch(
            HttpMethod::Post,
            Some(&url),
            &device.session,
            RequestOptions::default().with_cookies(CookieScope::AuthOnly),
        )?;
        Ok(())
    }

    fn power_status(&self, device: &SonyDevice) -> bool {
        let request = rpc_request(&device.identity, "getPowerStatus");
        let response = match device.fetcher.fetch(
            HttpMethod::Post,
            Some(&Self::system_url(device)),
            &device.session,
            RequestOptions::json(&request),
        ) {
            Ok(response) => response,
            Err(err) => {
                debug!("Power status request failed: {}", err);
                return false;
            }
        };

        let Ok(body) = response.json() else {
            return false;
        };
        if rpc_error(&body).is_some() {
            return false;
        }
        body.get("result")
            .and_then(|r| r.get(0))
            .and_then(|power| power.get("status"))
            .and_then(Value::as_str)
            .is_some_and(|status| status != "off")
    }
}

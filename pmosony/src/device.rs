//! A Sony TV or Blu-ray player and everything learned about it.
//!
//! [`SonyDevice`] owns its identity, the capability tables and the
//! authentication session. Network I/O happens only in the operations:
//! [`initialize`](SonyDevice::initialize), [`register`](SonyDevice::register),
//! [`authenticate`](SonyDevice::authenticate), [`dispatch`](SonyDevice::dispatch)
//! and the status/power helpers. Accessors never touch the network.
//!
//! A device is not meant to be shared between threads without external
//! locking: every operation takes `&mut self` or performs blocking calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthSession, AuthenticationResult};
use crate::config::DriverConfig;
use crate::descriptors::{DeviceInfo, parse_dmr};
use crate::dialect::driver;
use crate::errors::SonyError;
use crate::fetcher::{Fetcher, HttpMethod, RequestOptions};
use crate::registry::{CapabilityRecord, CapabilityRegistry, CommandRecord};
use crate::soap::{
    AV_TRANSPORT_SERVICE, RENDERING_CONTROL_SERVICE, build_soap_request, ircc_request,
    response_value, soap_action, IRCC_SERVICE,
};
use crate::version::ProtocolVersion;
use crate::wol;

/// Who the device is and who we are for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    /// Name shown on the device for this client.
    pub nickname: String,
    pub client_id: String,
    pub psk: Option<String>,
    pub ircc_port: u16,
    pub dmr_port: u16,
    pub app_port: u16,
}

/// Endpoints found in the descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    pub action_list_url: Option<String>,
    /// IRCC SOAP endpoint.
    pub control_url: Option<String>,
    pub av_transport_url: Option<String>,
    pub rendering_control_url: Option<String>,
    /// ScalarWebAPI base URL (with trailing `/`).
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SonyDevice {
    pub(crate) identity: DeviceIdentity,
    pub(crate) urls: ServiceUrls,
    pub(crate) info: DeviceInfo,
    pub(crate) mac: Option<String>,
    pub(crate) api_version: ProtocolVersion,
    pub(crate) ircc_categories: Vec<String>,
    pub(crate) registry: CapabilityRegistry,
    pub(crate) session: AuthSession,
    #[serde(default)]
    pub(crate) discovery_passes: u32,
    #[serde(skip)]
    pub(crate) config: DriverConfig,
    #[serde(skip)]
    pub(crate) fetcher: Fetcher,
}

impl SonyDevice {
    /// A device with the default configuration. The nickname doubles as
    /// client id.
    pub fn new(host: &str, nickname: &str) -> Self {
        Self::with_config(host, nickname, &DriverConfig::default())
    }

    pub fn with_config(host: &str, nickname: &str, config: &DriverConfig) -> Self {
        Self {
            identity: DeviceIdentity {
                host: host.to_string(),
                nickname: nickname.to_string(),
                client_id: nickname.to_string(),
                psk: None,
                ircc_port: config.ports.ircc,
                dmr_port: config.ports.dmr,
                app_port: config.ports.app,
            },
            urls: ServiceUrls::default(),
            info: DeviceInfo::default(),
            mac: None,
            api_version: ProtocolVersion::default(),
            ircc_categories: Vec::new(),
            registry: CapabilityRegistry::new(),
            session: AuthSession::default(),
            discovery_passes: 0,
            config: config.clone(),
            fetcher: Fetcher::new(config),
        }
    }

    pub fn with_psk(mut self, psk: &str) -> Self {
        self.identity.psk = Some(psk.to_string());
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.identity.client_id = client_id.to_string();
        self
    }

    pub fn with_ports(mut self, ircc: u16, dmr: u16, app: u16) -> Self {
        self.identity.ircc_port = ircc;
        self.identity.dmr_port = dmr;
        self.identity.app_port = app;
        self
    }

    // ------------------------------------------------------------------
    // Derived URLs
    // ------------------------------------------------------------------

    pub fn ircc_url(&self) -> String {
        format!(
            "http://{}:{}/Ircc.xml",
            self.identity.host, self.identity.ircc_port
        )
    }

    pub fn dmr_url(&self) -> String {
        format!(
            "http://{}:{}/dmr.xml",
            self.identity.host, self.identity.dmr_port
        )
    }

    pub fn app_url(&self) -> String {
        format!("http://{}:{}", self.identity.host, self.identity.app_port)
    }

    /// ScalarWebAPI base URL, `http://<host>/sony/` until the DMR says otherwise.
    pub fn base_url(&self) -> String {
        self.urls
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/sony/", self.identity.host))
    }

    /// `scheme://host[:port]` of the ScalarWebAPI, where DIAL lives.
    pub(crate) fn dial_origin(&self) -> String {
        Url::parse(&self.base_url())
            .ok()
            .map(|url| url.origin().ascii_serialization())
            .filter(|origin| origin != "null")
            .unwrap_or_else(|| format!("http://{}", self.identity.host))
    }

    // ------------------------------------------------------------------
    // Discovery pipeline
    // ------------------------------------------------------------------

    /// Runs one full discovery pass: DMR, version classification, dialect
    /// capabilities, command list and, once authorized, the application list.
    ///
    /// Running it again on unchanged descriptors yields the same tables.
    pub fn initialize(&mut self) -> Result<(), SonyError> {
        self.discovery_passes += 1;
        info!(
            host = %self.identity.host,
            pass = self.discovery_passes,
            "Starting discovery pass"
        );

        let dmr_url = self.dmr_url();
        let response = self.fetcher.fetch(
            HttpMethod::Get,
            Some(&dmr_url),
            &self.session,
            RequestOptions::default(),
        )?;
        let dmr = parse_dmr(&response.body, &dmr_url)?;

        if dmr.av_transport_url.is_some() {
            self.urls.av_transport_url = dmr.av_transport_url.clone();
        }
        if dmr.rendering_control_url.is_some() {
            self.urls.rendering_control_url = dmr.rendering_control_url.clone();
        }

        // tentative: legacy drivers pin the version from the action list
        self.api_version = dmr.version;
        if dmr.version.is_legacy() {
            // a register mode learned earlier holds even if the action list
            // is unreachable this time
            if let Some(mode) = self.registry.register_mode() {
                self.api_version = self.api_version.max(ProtocolVersion::from_mode(mode)?);
            }
        }
        driver(self.api_version).build_capabilities(self, &dmr)?;

        let dialect = driver(self.api_version);
        debug!(version = %self.api_version, dialect = dialect.name(), "Device classified");
        dialect.fetch_commands(self)?;

        if self.session.is_authorized() {
            self.recreate_authentication()?;
            dialect.fetch_apps(self)?;
        }

        info!(
            host = %self.identity.host,
            actions = self.registry.actions().len(),
            commands = self.registry.commands().len(),
            "Discovery pass done"
        );
        Ok(())
    }

    /// Action lookup for the operations: an empty action table triggers
    /// one discovery pass, never more.
    fn ensure_action(&mut self, name: &str) -> Result<CapabilityRecord, SonyError> {
        if !self.registry.has_actions() {
            debug!(action = name, "Action table empty, discovering device");
            self.initialize()?;
        }
        self.registry.get(name).cloned()
    }

    /// Recompute the session headers for the registration mode.
    pub fn recreate_authentication(&mut self) -> Result<(), SonyError> {
        let Some(mode) = self.registry.register_mode() else {
            return Ok(());
        };
        let mut headers = driver(ProtocolVersion::from_mode(mode)?).authentication_headers(self);
        if let Some(psk) = &self.identity.psk {
            headers.insert("X-Auth-PSK".to_string(), psk.clone());
        }
        self.session.headers = headers;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Registers this client. A success triggers a new discovery pass, as
    /// an authorized client may see more capabilities.
    ///
    /// A `register` mode outside 0..=4 is a [`SonyError::UnsupportedDialect`].
    pub fn register(&mut self) -> Result<AuthenticationResult, SonyError> {
        let registration = self.ensure_action("register")?;
        let version = ProtocolVersion::from_mode(registration.mode.unwrap_or(0))?;

        let result = driver(version).register(self, &registration);
        info!(host = %self.identity.host, version = %version, result = ?result, "Registration");

        if result == AuthenticationResult::Success {
            if let Err(err) = self.initialize() {
                warn!("Discovery after registration failed: {}", err);
            }
        }
        Ok(result)
    }

    /// Registers with the PIN shown by the device. An empty PIN is refused.
    ///
    /// Dialects without PIN (modes 0 and 1) succeed immediately.
    pub fn authenticate(&mut self, pin: &str) -> Result<bool, SonyError> {
        let registration = self.ensure_action("register")?;
        let version = ProtocolVersion::from_mode(registration.mode.unwrap_or(0))?;
        if !driver(version).requires_pin() {
            return Ok(true);
        }
        if pin.is_empty() {
            return Ok(false);
        }

        self.session.pin = Some(pin.to_string());
        self.recreate_authentication()?;
        Ok(self.register()? == AuthenticationResult::Success)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Sends a remote-control button. An empty command table triggers one
    /// discovery pass first; an unknown name is an error without any
    /// network call.
    pub fn dispatch(&mut self, name: &str) -> Result<(), SonyError> {
        if !self.registry.has_commands() {
            debug!(command = name, "Command table empty, discovering device");
            self.initialize()?;
            if !self.registry.has_commands() {
                return Err(SonyError::NotInitialized(
                    "failed to read command list from device".to_string(),
                ));
            }
        }

        let command = self.registry.command(name)?;
        let code = command
            .value
            .clone()
            .ok_or_else(|| SonyError::unknown_command(name))?;
        debug!(command = name, "Sending IRCC code");
        self.send_ircc(&code)
    }

    fn send_ircc(&self, code: &str) -> Result<(), SonyError> {
        self.post_soap(
            self.urls.control_url.as_deref(),
            IRCC_SERVICE,
            "X_SendIRCC",
            ircc_request(code)?,
        )?;
        Ok(())
    }

    fn post_soap(
        &self,
        url: Option<&str>,
        service: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, SonyError> {
        let options = RequestOptions::default()
            .with_header("SOAPACTION", soap_action(service, action))
            .with_header("Content-Type", "text/xml")
            .with_body(envelope);
        let response = self
            .fetcher
            .fetch(HttpMethod::Post, url, &self.session, options)?;
        Ok(response.body)
    }

    fn upnp_call(
        &self,
        url: Option<&str>,
        service: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<String, SonyError> {
        let envelope = build_soap_request(service, action, args)?;
        self.post_soap(url, service, action, envelope)
    }

    // ------------------------------------------------------------------
    // Status, volume, power, applications
    // ------------------------------------------------------------------

    /// `CurrentTransportState` of the renderer, `"OFF"` when unreachable.
    pub fn playing_status(&self) -> String {
        self.upnp_call(
            self.urls.av_transport_url.as_deref(),
            AV_TRANSPORT_SERVICE,
            "GetTransportInfo",
            &[("InstanceID", "0")],
        )
        .and_then(|body| response_value(&body, "CurrentTransportState"))
        .unwrap_or_else(|err| {
            debug!("GetTransportInfo failed: {}", err);
            None
        })
        .unwrap_or_else(|| "OFF".to_string())
    }

    /// Master volume, -1 when unavailable.
    pub fn volume(&self) -> i32 {
        self.upnp_call(
            self.urls.rendering_control_url.as_deref(),
            RENDERING_CONTROL_SERVICE,
            "GetVolume",
            &[("InstanceID", "0"), ("Channel", "Master")],
        )
        .and_then(|body| response_value(&body, "CurrentVolume"))
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(-1)
    }

    pub fn set_volume(&self, volume: u8) -> bool {
        let desired = volume.to_string();
        match self.upnp_call(
            self.urls.rendering_control_url.as_deref(),
            RENDERING_CONTROL_SERVICE,
            "SetVolume",
            &[
                ("InstanceID", "0"),
                ("Channel", "Master"),
                ("DesiredVolume", desired.as_str()),
            ],
        ) {
            Ok(_) => true,
            Err(err) => {
                debug!("SetVolume failed: {}", err);
                false
            }
        }
    }

    pub fn power_status(&self) -> bool {
        driver(self.api_version).power_status(self)
    }

    /// Magic packet to the configured broadcast address, when the MAC is known.
    pub fn wake_on_lan(&self) -> Result<(), SonyError> {
        match &self.mac {
            Some(mac) => wol::send_magic_packet(mac, &self.config.wol),
            None => {
                debug!("No MAC address known, skipping wake-on-lan");
                Ok(())
            }
        }
    }

    pub fn power(&mut self, on: bool) -> Result<(), SonyError> {
        if on {
            self.wake_on_lan()?;
            // the IR power button covers devices ignoring WOL
            if !self.power_status() {
                self.dispatch("Power")?;
            }
            Ok(())
        } else {
            self.dispatch("Power")
        }
    }

    /// Launches an application of the app list. `Home` is pressed first,
    /// some devices ignore a launch while another app runs.
    pub fn start_app(&mut self, name: &str) -> Result<(), SonyError> {
        let app = self.registry.app(name)?.clone();
        self.dispatch("Home")?;
        driver(self.api_version).start_app(self, &app)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn host(&self) -> &str {
        &self.identity.host
    }

    pub fn nickname(&self) -> &str {
        &self.identity.nickname
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    pub fn api_version(&self) -> ProtocolVersion {
        self.api_version
    }

    pub fn ircc_categories(&self) -> &[String] {
        &self.ircc_categories
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Direct access to the tables, for callers restoring or seeding them.
    pub fn registry_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.registry
    }

    /// An action of the table. Fails with [`SonyError::NotInitialized`]
    /// before any discovery instead of fetching.
    pub fn capability(&self, name: &str) -> Result<&CapabilityRecord, SonyError> {
        if !self.registry.has_actions() {
            return Err(SonyError::NotInitialized(format!(
                "no action known yet, call initialize() before looking up '{}'",
                name
            )));
        }
        self.registry.get(name)
    }

    pub fn actions(&self) -> &BTreeMap<String, CapabilityRecord> {
        self.registry.actions()
    }

    pub fn commands(&self) -> &BTreeMap<String, CommandRecord> {
        self.registry.commands()
    }

    pub fn apps(&self) -> Vec<String> {
        self.registry.apps().keys().cloned().collect()
    }

    /// Number of discovery passes started on this device.
    pub fn discovery_passes(&self) -> u32 {
        self.discovery_passes
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.has_actions() || self.registry.has_commands()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn save_to_json(&self) -> Result<String, SonyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_from_json(data: &str) -> Result<Self, SonyError> {
        Self::load_from_json_with_config(data, &DriverConfig::default())
    }

    /// Restores a saved device; the HTTP agent is rebuilt from `config`.
    pub fn load_from_json_with_config(data: &str, config: &DriverConfig) -> Result<Self, SonyError> {
        let mut device: SonyDevice = serde_json::from_str(data)?;
        device.config = config.clone();
        device.fetcher = Fetcher::new(config);
        Ok(device)
    }
}

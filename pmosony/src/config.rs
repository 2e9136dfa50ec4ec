//! # Driver configuration
//!
//! The driver carries no global state: a [`DriverConfig`] is built once
//! (embedded defaults, optional user YAML file, `PMOSONY_CONFIG__*`
//! environment overrides) and handed to the [`Fetcher`](crate::Fetcher) and
//! to the SSDP discovery at construction time.
//!
//! ```no_run
//! use pmosony::DriverConfig;
//!
//! let config = DriverConfig::load("sony.yaml")?.with_env_overrides()?;
//! assert!(config.http.timeout_secs > 0);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosony.yaml");

const ENV_PREFIX: &str = "PMOSONY_CONFIG__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

/// Default service ports of a Sony device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub ircc: u16,
    pub dmr: u16,
    pub app: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            ircc: 50001,
            dmr: 52323,
            app: 50202,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub search_target: String,
    pub read_timeout_ms: u64,
    pub retries: u32,
    pub mx: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_target: "urn:schemas-sony-com:service:IRCC:1".to_string(),
            read_timeout_ms: 1000,
            retries: 5,
            mx: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WolConfig {
    pub broadcast: String,
    pub port: u16,
}

impl Default for WolConfig {
    fn default() -> Self {
        Self {
            broadcast: "255.255.255.255".to_string(),
            port: 9,
        }
    }
}

/// Complete driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub http: HttpConfig,
    pub ports: PortConfig,
    pub discovery: DiscoveryConfig,
    pub wol: WolConfig,
}

impl DriverConfig {
    /// Embedded defaults only.
    pub fn embedded() -> Result<Self> {
        Self::from_value(Self::default_value()?)
    }

    /// Parse a YAML document and merge it over the embedded defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value = Self::default_value()?;
        let external: Value =
            serde_yaml::from_str(yaml).context("Failed to parse driver configuration")?;
        merge_yaml(&mut value, &lower_keys_value(external));
        Self::from_value(value)
    }

    /// Load a YAML file and merge it over the embedded defaults.
    ///
    /// A missing file is not an error: the embedded defaults are used.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(yaml) => {
                info!(config_file = %path.display(), "Loaded config file");
                Self::from_yaml_str(&yaml)
            }
            Err(_) => {
                info!(
                    config_file = %path.display(),
                    "Config file not found, using default embedded config"
                );
                Self::embedded()
            }
        }
    }

    /// Apply `PMOSONY_CONFIG__SECTION__KEY=value` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(env::vars())
    }

    pub(crate) fn with_overrides<I>(self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = serde_yaml::to_value(&self)?;
        for (key, raw) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let path = stripped
                    .split("__")
                    .map(|k| k.to_lowercase())
                    .collect::<Vec<_>>();
                set_value(&mut value, &path, convert_env_value(&raw))?;
            }
        }
        Self::from_value(value)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs.max(1))
    }

    fn default_value() -> Result<Value> {
        let value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        Ok(lower_keys_value(value))
    }

    fn from_value(value: Value) -> Result<Self> {
        serde_yaml::from_value(value).context("Invalid driver configuration")
    }
}

fn set_value(data: &mut Value, path: &[String], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key = Value::String(path[0].clone());
        if path.len() == 1 {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                match k {
                    Value::String(s) => {
                        new_map.insert(Value::String(s.to_lowercase()), lower_keys_value(v));
                    }
                    other => {
                        new_map.insert(other, lower_keys_value(v));
                    }
                }
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        // scalaires et séquences : on remplace
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_struct_defaults() {
        let config = DriverConfig::embedded().unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.ports.dmr, 52323);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn user_yaml_is_merged_over_defaults() {
        let config = DriverConfig::from_yaml_str("HTTP:\n  timeout_secs: 12\nports:\n  ircc: 8080\n")
            .unwrap();
        assert_eq!(config.http.timeout_secs, 12);
        assert_eq!(config.ports.ircc, 8080);
        assert_eq!(config.ports.dmr, 52323);
        assert_eq!(config.discovery.retries, 5);
    }

    #[test]
    fn env_overrides_are_applied() {
        let vars = vec![
            ("PMOSONY_CONFIG__HTTP__TIMEOUT_SECS".to_string(), "9".to_string()),
            ("PMOSONY_CONFIG__WOL__BROADCAST".to_string(), "192.168.1.255".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ];
        let config = DriverConfig::default().with_overrides(vars).unwrap();
        assert_eq!(config.http.timeout_secs, 9);
        assert_eq!(config.wol.broadcast, "192.168.1.255");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = DriverConfig::load("/nonexistent/pmosony.yaml").unwrap();
        assert_eq!(config, DriverConfig::default());
    }
}

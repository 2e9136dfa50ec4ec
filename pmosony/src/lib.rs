//! # pmosony
//!
//! Client-side driver for Sony TVs and Blu-ray players.
//!
//! Sony devices speak one of five protocol generations: a code-only IRCC
//! fallback, two PIN-less action-list variants, the CERS variant with PIN
//! registration, and the ScalarWebAPI JSON-RPC variant with DIAL
//! applications. [`SonyDevice::initialize`] fetches the descriptors,
//! classifies the device and fills its capability tables;
//! [`SonyDevice::register`] and [`SonyDevice::authenticate`] drive the
//! registration handshake; [`SonyDevice::dispatch`] sends remote-control
//! buttons.
//!
//! ```no_run
//! use pmosony::{AuthenticationResult, DriverConfig, SonyDevice};
//!
//! let config = DriverConfig::load("sony.yaml")?;
//! let mut device = SonyDevice::with_config("192.168.1.20", "pmosony", &config);
//! device.initialize()?;
//! if device.register()? == AuthenticationResult::PinNeeded {
//!     device.authenticate("1234")?;
//! }
//! device.dispatch("Play")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod auth;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod dialect;
pub mod errors;
pub mod fetcher;
pub mod ircc_codes;
pub mod registry;
pub mod soap;
pub mod ssdp;
pub mod version;
pub mod wol;
pub mod xml_path;

pub use auth::{AuthSession, AuthenticationResult};
pub use config::DriverConfig;
pub use descriptors::DeviceInfo;
pub use device::{DeviceIdentity, ServiceUrls, SonyDevice};
pub use dialect::{DialectDriver, driver};
pub use errors::{FetchError, SonyError};
pub use fetcher::{Fetcher, HttpMethod, HttpResponse, RequestOptions};
pub use registry::{CapabilityRecord, CapabilityRegistry, CommandRecord};
pub use ssdp::discover;
pub use version::ProtocolVersion;

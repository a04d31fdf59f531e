//! # iotcomm Core
//!
//! Service descriptors, configuration and error handling shared by the iotcomm crates.
//!
//! - **Types**: [`ServiceSpec`] / [`ServiceQuery`] and their parts ([`ServiceType`],
//!   [`Properties`], [`ServiceStatus`], [`Advertise`]), parsed from JSON descriptors.
//! - **Configuration**: [`CommConfig`], the plugin search paths and file-suffix conventions,
//!   and [`DiscoveryConfig`], the discovery loop settings.
//! - **Errors**: [`CoreError`] with its [`ConfigError`] and [`ParseError`] families.
//!
//! ## Example
//!
//! ```
//! use iotcomm_core::ServiceSpec;
//!
//! let query = ServiceSpec::parse_query(
//!     r#"{ "name": "the.*", "type": { "name": "zmqpubsub", "protocol": "tcp" }, "port": 5563 }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(query.record_type(), "_zmqpubsub._tcp");
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{CommConfig, SearchPath};
pub use discovery_config::{DiscoveryConfig, WaitMode};
pub use error::{ConfigError, CoreError, ParseError, Result};
pub use types::{
    Advertise, Properties, Property, ServiceQuery, ServiceSpec, ServiceStatus, ServiceType,
    MAX_ENTRIES,
};

//! mDNS advertise and discovery for iotcomm services
//!
//! This crate connects service descriptors to the network:
//! - Advertise a service via mDNS and hand back a service-side transport handle
//! - Browse for services, filter them by name, port and TXT properties
//! - Deduplicate announcements seen on several interfaces
//! - Resolve the matching client transport for each accepted service
//!
//! # Architecture
//!
//! Each advertise or discover call runs a loop on the calling task:
//! 1. Register or browse through an [`MdnsBackend`]
//! 2. Wait for the next event with a bounded timeout, re-entering the wait on timeout
//! 3. Filter and deduplicate resolved records through the [`ServiceCache`]
//! 4. Resolve a transport with the [`PluginResolver`](iotcomm_plugin_api::PluginResolver)
//!    and pass it to the caller's callback
//!
//! The loop ends when its cancellation token fires or a non-transient error occurs.
//!
//! # Example
//!
//! ```no_run
//! use iotcomm_core::{ServiceSpec, ServiceType};
//! use iotcomm_discovery::{DiscoveryEngine, MdnsSdBackend};
//! use iotcomm_plugin_api::{PluginResolver, TransportRegistry};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MdnsSdBackend::new()?);
//!     let resolver = Arc::new(PluginResolver::with_global_config(Arc::new(TransportRegistry::new())));
//!     let engine = DiscoveryEngine::new(backend, resolver)?;
//!
//!     let query = ServiceSpec::new("therm", ServiceType::new("zmqpubsub", "tcp"), 0);
//!     engine
//!         .discover(query, CancellationToken::new(), |delivered| match delivered {
//!             Ok(delivered) => println!("found {}", delivered.spec.service_name),
//!             Err(e) => eprintln!("discovery error {}: {}", e.code(), e),
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod backend;
pub mod cache;
pub mod engine;
pub mod error;
pub mod filter;
pub mod mock;

pub use address::{AddressResolver, InterfaceSource, LocalAddresses, StaticInterfaces, SystemInterfaces};
pub use backend::{Browse, MdnsBackend, MdnsEvent, MdnsSdBackend, Registration, ResolvedRecord};
pub use cache::{CacheEntry, CacheOutcome, ServiceCache};
pub use engine::{Delivered, DiscoveryEngine, DiscoveryEngineBuilder, QueryPredicate};
pub use error::{DiscoveryError, Result};
pub use filter::{short_name, QueryFilter};
pub use mock::MockBackend;

//! Transport registry - maps a protocol name and role to a transport constructor

use crate::transport::{ClientModule, ClientTransport, Role, ServiceModule, ServiceTransport, TransportModule};
use dashmap::DashMap;
use std::sync::Arc;

/// Builds a fresh module for every resolve, so handles never share transport state.
pub type TransportConstructor = Arc<dyn Fn() -> Box<dyn TransportModule> + Send + Sync>;

/// Compiled-in transports, keyed by `(protocol, role)`.
#[derive(Default)]
pub struct TransportRegistry {
    constructors: DashMap<(String, Role), TransportConstructor>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw module constructor, replacing any previous one.
    pub fn register<F>(&self, protocol: impl Into<String>, role: Role, constructor: F)
    where
        F: Fn() -> Box<dyn TransportModule> + Send + Sync + 'static,
    {
        let protocol = protocol.into();
        tracing::debug!("Registering {} transport for protocol {}", role, protocol);
        self.constructors
            .insert((protocol, role), Arc::new(constructor));
    }

    /// Registers a typed client transport.
    pub fn register_client<T, F>(&self, protocol: impl Into<String>, make: F)
    where
        T: ClientTransport,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(protocol, Role::Client, move || {
            Box::new(ClientModule::new(make())) as Box<dyn TransportModule>
        });
    }

    /// Registers a typed service transport.
    pub fn register_service<T, F>(&self, protocol: impl Into<String>, make: F)
    where
        T: ServiceTransport,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(protocol, Role::Service, move || {
            Box::new(ServiceModule::new(make())) as Box<dyn TransportModule>
        });
    }

    /// Removes a constructor. Returns true if one was registered.
    pub fn unregister(&self, protocol: &str, role: Role) -> bool {
        self.constructors
            .remove(&(protocol.to_string(), role))
            .is_some()
    }

    pub fn get(&self, protocol: &str, role: Role) -> Option<TransportConstructor> {
        self.constructors
            .get(&(protocol.to_string(), role))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, protocol: &str, role: Role) -> bool {
        self.constructors.contains_key(&(protocol.to_string(), role))
    }

    /// Registered `(protocol, role)` pairs, sorted.
    pub fn entries(&self) -> Vec<(String, Role)> {
        let mut entries: Vec<(String, Role)> = self
            .constructors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.as_str().cmp(b.1.as_str())));
        entries
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

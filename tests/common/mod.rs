//! Common test utilities and helpers for integration tests
//!
//! A [`Network`] is one in-memory mDNS responder shared by any number of engines, plus a
//! message bus that stands in for the wire: client transports push onto the queue of the
//! port they connected to and service transports drain the queue of the port they serve.

#![allow(dead_code)]

use iotcomm_core::{CommConfig, DiscoveryConfig, Properties, SearchPath, ServiceSpec, ServiceType};
use iotcomm_discovery::{DiscoveryEngine, MockBackend, ResolvedRecord, StaticInterfaces};
use iotcomm_plugin_api::{
    module_file_name, ClientTransport, Context, Message, PluginResolver, PluginResult,
    ServiceTransport, TransportRegistry,
};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const PROTOCOL: &str = "zmqpubsub";
pub const SERVICE_TYPE: &str = "_zmqpubsub._tcp.local.";

/// Directory holding the shipped interface descriptors.
pub fn interfaces_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("plugin-interfaces")
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap_or_else(|_| panic!("bad address in test: {}", s))
}

pub fn spec(name: &str, port: u16) -> ServiceSpec {
    ServiceSpec::new(name, ServiceType::new(PROTOCOL, "tcp"), port)
}

/// A record as another host on the network would announce it.
pub fn remote_record(name: &str, port: u16, addresses: &[&str], txt: &[(&str, &str)]) -> ResolvedRecord {
    ResolvedRecord {
        fullname: format!("{}.{}", name, SERVICE_TYPE),
        hostname: "remote.local.".to_string(),
        port,
        addresses: addresses.iter().map(|a| ip(a)).collect(),
        txt: txt.iter().copied().collect::<Properties>(),
    }
}

/// Cancels `cancel` after `millis` of (possibly paused) time.
pub fn cancel_after(cancel: &CancellationToken, millis: u64) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        cancel.cancel();
    });
}

/// Per-port message queues.
#[derive(Clone, Default)]
pub struct Bus(Arc<Mutex<HashMap<u16, VecDeque<Message>>>>);

impl Bus {
    fn push(&self, port: u16, message: Message) {
        self.0
            .lock()
            .unwrap()
            .entry(port)
            .or_default()
            .push_back(message);
    }

    fn pop(&self, port: u16) -> Option<Message> {
        self.0.lock().unwrap().get_mut(&port).and_then(VecDeque::pop_front)
    }

    pub fn pending(&self, port: u16) -> usize {
        self.0.lock().unwrap().get(&port).map_or(0, VecDeque::len)
    }
}

pub struct BusClient {
    bus: Bus,
    port: u16,
    name: String,
}

impl ClientTransport for BusClient {
    fn init(&mut self, query: &ServiceSpec) -> PluginResult<()> {
        self.port = query.port;
        self.name = format!("client-of-{}", query.service_name);
        Ok(())
    }

    fn send(&mut self, message: &str, context: Option<&Context>) -> PluginResult<()> {
        self.bus.push(
            self.port,
            Message {
                client: Some(self.name.clone()),
                text: message.to_string(),
                context: context.cloned(),
            },
        );
        Ok(())
    }

    fn subscribe(&mut self, _: &str) -> PluginResult<()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _: &str) -> PluginResult<()> {
        Ok(())
    }

    fn receive(&mut self) -> PluginResult<Option<Message>> {
        Ok(None)
    }

    fn done(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

pub struct BusService {
    bus: Bus,
    port: u16,
}

impl ServiceTransport for BusService {
    fn init(&mut self, spec: &ServiceSpec) -> PluginResult<()> {
        self.port = spec.port;
        Ok(())
    }

    fn send_to(&mut self, _: &str, _: &str, _: Option<&Context>) -> PluginResult<()> {
        Ok(())
    }

    fn publish(&mut self, _: &str, _: Option<&Context>) -> PluginResult<()> {
        Ok(())
    }

    fn manage_client(&mut self, _: &str, _: Option<&Context>) -> PluginResult<()> {
        Ok(())
    }

    fn receive(&mut self) -> PluginResult<Option<Message>> {
        Ok(self.bus.pop(self.port))
    }

    fn done(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Shared responder, transports and plugin directories.
pub struct Network {
    pub backend: Arc<MockBackend>,
    pub bus: Bus,
    pub registry: Arc<TransportRegistry>,
    plugins: TempDir,
}

impl Network {
    /// A network whose own registrations resolve to `addresses`.
    pub fn new(addresses: &[&str]) -> Self {
        let plugins = tempfile::tempdir().expect("Failed to create plugin dir");
        for suffix in ["client", "service"] {
            std::fs::write(plugins.path().join(module_file_name(PROTOCOL, suffix)), b"module")
                .expect("Failed to write module file");
        }

        let bus = Bus::default();
        let registry = Arc::new(TransportRegistry::new());
        {
            let bus = bus.clone();
            registry.register_client(PROTOCOL, move || BusClient {
                bus: bus.clone(),
                port: 0,
                name: String::new(),
            });
        }
        {
            let bus = bus.clone();
            registry.register_service(PROTOCOL, move || BusService {
                bus: bus.clone(),
                port: 0,
            });
        }

        Self {
            backend: Arc::new(MockBackend::new(
                "host.local.",
                addresses.iter().map(|a| ip(a)),
            )),
            bus,
            registry,
            plugins,
        }
    }

    pub fn resolver(&self) -> Arc<PluginResolver> {
        let config = CommConfig {
            plugin_dirs: SearchPath::parse(&self.plugins.path().to_string_lossy()),
            plugin_interface_dirs: SearchPath::parse(&interfaces_dir().to_string_lossy()),
            ..CommConfig::default()
        };
        Arc::new(PluginResolver::new(Arc::new(config), self.registry.clone()))
    }

    /// An engine on a host whose interfaces carry `local` addresses.
    pub fn engine(&self, local: &[&str]) -> DiscoveryEngine {
        DiscoveryEngine::builder(self.backend.clone(), self.resolver())
            .config(DiscoveryConfig::short())
            .interfaces(Arc::new(StaticInterfaces::new(local.iter().map(|a| ip(a)))))
            .build()
            .expect("Failed to build engine")
    }
}

//! mDNS backends.
//!
//! The engine talks to the responder through [`MdnsBackend`]: every browse and every
//! registration yields a `flume` channel of [`MdnsEvent`]s, which the engine's loop
//! waits on. Each browse is its own [`Browse`], so stopping one never closes another
//! engine's channel for the same service type. [`MdnsSdBackend`] drives a real `mdns-sd`
//! daemon; the in-memory [`MockBackend`](crate::mock::MockBackend) serves tests.

use crate::error::{DiscoveryError, Result};
use dashmap::DashMap;
use iotcomm_core::{Properties, ServiceSpec};
use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A resolved service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    /// Full instance name, `<instance>.<type>.local.`
    pub fullname: String,
    pub hostname: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    pub txt: Properties,
}

/// Events delivered on a browse or registration channel.
#[derive(Debug, Clone)]
pub enum MdnsEvent {
    /// A browser saw a new instance name
    ServiceFound { service_type: String, fullname: String },
    /// Host, port, addresses and TXT data of an instance
    ServiceResolved(ResolvedRecord),
    /// An instance went away
    ServiceRemoved { service_type: String, fullname: String },
    /// A registration was accepted
    Registered { fullname: String, hostname: String },
    /// A registration collided with an existing instance name
    NameConflict { name: String },
    /// The responder reported an error
    Error(DiscoveryError),
}

/// A service to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub instance_name: String,
    /// Fully qualified service type, `_<name>._<protocol>.local.`
    pub service_type: String,
    pub port: u16,
    pub properties: Properties,
}

impl Registration {
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        Self {
            instance_name: spec.service_name.clone(),
            service_type: spec.service_string(),
            port: spec.port,
            properties: spec.properties.clone(),
        }
    }

    /// Full instance name the responder registers.
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.instance_name, self.service_type)
    }
}

/// One open browse of a service type.
///
/// Hand it back to [`MdnsBackend::stop_browse`] when done. Other browses of the same
/// type keep their channels.
#[derive(Debug)]
pub struct Browse {
    pub id: u64,
    pub service_type: String,
    pub events: flume::Receiver<MdnsEvent>,
}

/// Advertise/browse primitives of an mDNS responder.
pub trait MdnsBackend: Send + Sync {
    /// Starts browsing a service type.
    fn browse(&self, service_type: &str) -> Result<Browse>;

    /// Stops one browse. The responder keeps browsing the type while others are open.
    fn stop_browse(&self, browse: &Browse) -> Result<()>;

    /// Registers a service. The outcome arrives on the returned channel as
    /// [`MdnsEvent::Registered`] or [`MdnsEvent::NameConflict`].
    fn register(&self, registration: Registration) -> Result<flume::Receiver<MdnsEvent>>;

    fn unregister(&self, fullname: &str) -> Result<()>;

    fn shutdown(&self) -> Result<()>;
}

/// Browses of one service type sharing a single daemon browse.
#[derive(Default)]
struct BrowseGroup {
    /// Id of the browse that started the daemon browse
    origin: u64,
    subscribers: Vec<(u64, flume::Sender<MdnsEvent>)>,
    /// Records resolved so far, replayed to late subscribers
    resolved: BTreeMap<String, ResolvedRecord>,
}

impl BrowseGroup {
    fn new(origin: u64) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    fn subscribe(&mut self, id: u64, service_type: &str) -> flume::Receiver<MdnsEvent> {
        let (tx, rx) = flume::unbounded();
        for record in self.resolved.values() {
            let _ = tx.send(MdnsEvent::ServiceFound {
                service_type: service_type.to_string(),
                fullname: record.fullname.clone(),
            });
            let _ = tx.send(MdnsEvent::ServiceResolved(record.clone()));
        }
        self.subscribers.push((id, tx));
        rx
    }

    /// Returns true when no subscriber is left.
    fn unsubscribe(&mut self, id: u64) -> bool {
        self.subscribers.retain(|(subscriber, _)| *subscriber != id);
        self.subscribers.is_empty()
    }

    fn dispatch(&mut self, event: MdnsEvent) {
        match &event {
            MdnsEvent::ServiceResolved(record) => {
                self.resolved.insert(record.fullname.clone(), record.clone());
            }
            MdnsEvent::ServiceRemoved { fullname, .. } => {
                self.resolved.remove(fullname);
            }
            _ => {}
        }
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

type BrowseGroups = Arc<Mutex<HashMap<String, BrowseGroup>>>;

/// Open registration channels keyed by full instance name.
#[derive(Default)]
struct Registrations(DashMap<String, (String, flume::Sender<MdnsEvent>)>);

impl Registrations {
    fn insert(&self, fullname: String, instance_name: String, tx: flume::Sender<MdnsEvent>) {
        self.0.insert(fullname, (instance_name, tx));
    }

    fn remove(&self, fullname: &str) {
        self.0.remove(fullname);
    }

    fn clear(&self) {
        self.0.clear();
    }

    fn broadcast(&self, event: &MdnsEvent) {
        self.0.retain(|_, (_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Reports a conflict when the daemon renamed one of our registrations.
    /// Returns false for names this backend did not register.
    fn renamed(&self, original: &str) -> bool {
        let Some(entry) = self.0.get(original) else {
            return false;
        };
        let (instance_name, tx) = entry.value();
        let _ = tx.send(MdnsEvent::NameConflict {
            name: instance_name.clone(),
        });
        true
    }
}

/// Backend driving an `mdns-sd` daemon.
pub struct MdnsSdBackend {
    daemon: ServiceDaemon,
    hostname: String,
    browsers: BrowseGroups,
    /// Registration channels stay open until the service is unregistered
    registrations: Arc<Registrations>,
    next_browse: AtomicU64,
    monitoring: AtomicBool,
    stopped: AtomicBool,
}

impl MdnsSdBackend {
    /// Starts an mDNS daemon.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());

        info!(hostname = %hostname, "mDNS backend created");

        Ok(Self {
            daemon,
            hostname,
            browsers: Arc::new(Mutex::new(HashMap::new())),
            registrations: Arc::new(Registrations::default()),
            next_browse: AtomicU64::new(1),
            monitoring: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Forwards daemon-level events once a runtime is available.
    fn watch_daemon(&self) {
        if self.monitoring.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }

        let events = match self.daemon.monitor() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Cannot monitor mDNS daemon");
                return;
            }
        };
        let browsers = self.browsers.clone();
        let registrations = self.registrations.clone();
        runtime.spawn(async move {
            while let Ok(event) = events.recv_async().await {
                Self::handle_daemon_event(event, &browsers, &registrations);
            }
            debug!("mDNS daemon monitor stopped");
        });
    }

    fn handle_daemon_event(event: DaemonEvent, browsers: &BrowseGroups, registrations: &Registrations) {
        match event {
            DaemonEvent::Error(e) => {
                warn!(error = %e, "mDNS daemon error");
                let event = MdnsEvent::Error(DiscoveryError::Protocol(e.to_string()));
                for group in browsers.lock().values_mut() {
                    group.dispatch(event.clone());
                }
                registrations.broadcast(&event);
            }
            DaemonEvent::NameChange(change) => {
                if registrations.renamed(&change.original) {
                    warn!(
                        original = %change.original,
                        new_name = %change.new_name,
                        "Registered name is taken on the network"
                    );
                } else {
                    debug!(original = %change.original, new_name = %change.new_name, "mDNS name changed");
                }
            }
            other => debug!(event = ?other, "mDNS daemon event"),
        }
    }

    fn convert_event(event: ServiceEvent) -> Option<MdnsEvent> {
        match event {
            ServiceEvent::ServiceFound(service_type, fullname) => Some(MdnsEvent::ServiceFound {
                service_type,
                fullname,
            }),
            ServiceEvent::ServiceResolved(info) => {
                debug!(
                    service = info.get_fullname(),
                    hostname = info.get_hostname(),
                    port = info.get_port(),
                    "Service resolved"
                );
                Some(MdnsEvent::ServiceResolved(Self::convert_service_info(&info)))
            }
            ServiceEvent::ServiceRemoved(service_type, fullname) => {
                Some(MdnsEvent::ServiceRemoved {
                    service_type,
                    fullname,
                })
            }
            other => {
                debug!(event = ?other, "Ignoring mDNS event");
                None
            }
        }
    }

    /// Converts ServiceInfo from mdns-sd to a resolved record
    fn convert_service_info(info: &ServiceInfo) -> ResolvedRecord {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();

        let txt = info
            .get_properties()
            .iter()
            .map(|property| (property.key().to_string(), property.val_str().to_string()))
            .collect();

        ResolvedRecord {
            fullname: info.get_fullname().to_string(),
            hostname: info.get_hostname().to_string(),
            port: info.get_port(),
            addresses,
            txt,
        }
    }
}

impl MdnsBackend for MdnsSdBackend {
    fn browse(&self, service_type: &str) -> Result<Browse> {
        self.watch_daemon();
        let id = self.next_browse.fetch_add(1, Ordering::SeqCst);

        let mut browsers = self.browsers.lock();
        if let Some(group) = browsers.get_mut(service_type) {
            debug!(service_type = %service_type, id, "Joining running browse");
            return Ok(Browse {
                id,
                service_type: service_type.to_string(),
                events: group.subscribe(id, service_type),
            });
        }

        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;
        let mut group = BrowseGroup::new(id);
        let events = group.subscribe(id, service_type);
        browsers.insert(service_type.to_string(), group);
        drop(browsers);

        let groups = self.browsers.clone();
        let forwarded_type = service_type.to_string();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let Some(event) = Self::convert_event(event) else {
                    continue;
                };
                match groups.lock().get_mut(&forwarded_type) {
                    Some(group) if group.origin == id => group.dispatch(event),
                    _ => break,
                }
            }
            debug!("Browser forwarder for {} stopped", forwarded_type);
        });

        Ok(Browse {
            id,
            service_type: service_type.to_string(),
            events,
        })
    }

    fn stop_browse(&self, browse: &Browse) -> Result<()> {
        let mut browsers = self.browsers.lock();
        let Some(group) = browsers.get_mut(&browse.service_type) else {
            return Ok(());
        };
        if !group.unsubscribe(browse.id) {
            debug!(
                service_type = %browse.service_type,
                remaining = group.subscribers.len(),
                "Browse stopped, others still running"
            );
            return Ok(());
        }
        browsers.remove(&browse.service_type);
        drop(browsers);

        self.daemon
            .stop_browse(&browse.service_type)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: browse.service_type.clone(),
                reason: e.to_string(),
            })
    }

    fn register(&self, registration: Registration) -> Result<flume::Receiver<MdnsEvent>> {
        self.watch_daemon();
        let host_name = format!("{}.local.", self.hostname);
        let properties: Vec<(&str, &str)> = registration
            .properties
            .iter()
            .map(|p| (p.key.as_str(), p.value.as_str()))
            .collect();

        let service_info = ServiceInfo::new(
            &registration.service_type,
            &registration.instance_name,
            &host_name,
            "",
            registration.port,
            &properties[..],
        )
        .map_err(|e| DiscoveryError::RegisterFailed {
            service_name: registration.instance_name.clone(),
            reason: e.to_string(),
        })?
        .enable_addr_auto();

        let fullname = service_info.get_fullname().to_string();
        self.daemon
            .register(service_info)
            .map_err(|e| DiscoveryError::RegisterFailed {
                service_name: registration.instance_name.clone(),
                reason: e.to_string(),
            })?;

        info!(service = %fullname, port = registration.port, "Service registered");

        let (tx, rx) = flume::unbounded();
        let _ = tx.send(MdnsEvent::Registered {
            fullname: fullname.clone(),
            hostname: host_name,
        });
        self.registrations
            .insert(fullname, registration.instance_name, tx);
        Ok(rx)
    }

    fn unregister(&self, fullname: &str) -> Result<()> {
        self.registrations.remove(fullname);
        self.daemon
            .unregister(fullname)
            .map(|_| ())
            .map_err(|e| DiscoveryError::RegisterFailed {
                service_name: fullname.to_string(),
                reason: e.to_string(),
            })
    }

    fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.registrations.clear();
        self.browsers.lock().clear();
        self.daemon.shutdown().map(|_| ()).map_err(|e| {
            DiscoveryError::Protocol(format!("Failed to shutdown mDNS daemon: {}", e))
        })
    }
}

impl Drop for MdnsSdBackend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "mDNS daemon did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotcomm_core::ServiceType;

    #[test]
    fn test_registration_from_spec() {
        let spec = ServiceSpec::new("therm", ServiceType::new("zmqpubsub", "tcp"), 5563)
            .with_property("unit", "C");
        let registration = Registration::from_spec(&spec);
        assert_eq!(registration.service_type, "_zmqpubsub._tcp.local.");
        assert_eq!(registration.fullname(), "therm._zmqpubsub._tcp.local.");
        assert_eq!(registration.properties.get("unit"), Some("C"));
    }

    fn record(name: &str) -> ResolvedRecord {
        ResolvedRecord {
            fullname: format!("{}.{}", name, TYPE),
            hostname: "remote.local.".to_string(),
            port: 5563,
            addresses: vec!["192.168.1.20".parse().unwrap()],
            txt: Properties::new(),
        }
    }

    const TYPE: &str = "_zmqpubsub._tcp.local.";

    #[test]
    fn test_browse_group_fans_out_and_replays() {
        let mut group = BrowseGroup::new(1);
        let first = group.subscribe(1, TYPE);
        group.dispatch(MdnsEvent::ServiceResolved(record("therm")));
        assert_eq!(first.drain().count(), 1);

        // A late subscriber sees what was already resolved
        let second = group.subscribe(2, TYPE);
        let replayed: Vec<MdnsEvent> = second.drain().collect();
        assert!(matches!(replayed[0], MdnsEvent::ServiceFound { .. }));
        assert!(matches!(replayed[1], MdnsEvent::ServiceResolved(ref r) if r.port == 5563));

        group.dispatch(MdnsEvent::ServiceResolved(record("humid")));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_browse_group_unsubscribe_keeps_others() {
        let mut group = BrowseGroup::new(1);
        let first = group.subscribe(1, TYPE);
        let second = group.subscribe(2, TYPE);

        assert!(!group.unsubscribe(1));
        drop(first);
        group.dispatch(MdnsEvent::ServiceResolved(record("therm")));
        assert!(!second.is_disconnected());
        assert_eq!(second.drain().count(), 1);

        assert!(group.unsubscribe(2));
    }

    #[test]
    fn test_removed_record_is_not_replayed() {
        let mut group = BrowseGroup::new(1);
        let _first = group.subscribe(1, TYPE);
        group.dispatch(MdnsEvent::ServiceResolved(record("therm")));
        group.dispatch(MdnsEvent::ServiceRemoved {
            service_type: TYPE.to_string(),
            fullname: record("therm").fullname,
        });

        let late = group.subscribe(2, TYPE);
        assert!(late.is_empty());
    }

    #[test]
    fn test_rename_of_registered_name_is_a_conflict() {
        let registrations = Registrations::default();
        let (tx, rx) = flume::unbounded();
        registrations.insert(record("therm").fullname, "therm".to_string(), tx);

        assert!(!registrations.renamed("other._zmqpubsub._tcp.local."));
        assert!(rx.is_empty());

        assert!(registrations.renamed("therm._zmqpubsub._tcp.local."));
        assert!(matches!(
            rx.try_recv(),
            Ok(MdnsEvent::NameConflict { ref name }) if name == "therm"
        ));
    }

    #[test]
    fn test_daemon_error_reaches_browses_and_registrations() {
        let browsers: BrowseGroups = Arc::new(Mutex::new(HashMap::new()));
        let mut group = BrowseGroup::new(1);
        let browse = group.subscribe(1, TYPE);
        browsers.lock().insert(TYPE.to_string(), group);

        let registrations = Registrations::default();
        let (tx, registration) = flume::unbounded();
        registrations.insert(record("therm").fullname, "therm".to_string(), tx);

        MdnsSdBackend::handle_daemon_event(
            DaemonEvent::Error(mdns_sd::Error::Msg("socket closed".to_string())),
            &browsers,
            &registrations,
        );

        for rx in [&browse, &registration] {
            match rx.try_recv() {
                Ok(MdnsEvent::Error(e @ DiscoveryError::Protocol(_))) => {
                    assert!(e.to_string().contains("socket closed"));
                    assert!(!e.is_transient());
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}

//! In-memory mDNS responder.
//!
//! Behaves like a responder shared by every engine that holds it: registrations are
//! announced to all browsers of the same type, live and on replay, once per configured
//! host address, the way a multi-homed host shows up on a real network.

use crate::backend::{Browse, MdnsBackend, MdnsEvent, Registration, ResolvedRecord};
use crate::error::{DiscoveryError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

struct Published {
    service_type: String,
    record: ResolvedRecord,
}

struct Browser {
    id: u64,
    service_type: String,
    tx: flume::Sender<MdnsEvent>,
}

#[derive(Default)]
struct MockState {
    records: Vec<Published>,
    browsers: Vec<Browser>,
    next_browse: u64,
    registrations: HashMap<String, flume::Sender<MdnsEvent>>,
    shut_down: bool,
}

/// In-memory [`MdnsBackend`].
pub struct MockBackend {
    hostname: String,
    addresses: Vec<IpAddr>,
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Creates a responder whose own registrations resolve to `hostname` on `addresses`.
    pub fn new(hostname: impl Into<String>, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            hostname: hostname.into(),
            addresses: addresses.into_iter().collect(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Publishes a record registered elsewhere on the network.
    pub fn announce(&self, service_type: &str, record: ResolvedRecord) {
        let mut state = self.state.lock();
        Self::notify_added(&mut state, service_type, &record);
        state.records.push(Published {
            service_type: service_type.to_string(),
            record,
        });
    }

    /// Withdraws a record and notifies browsers of its type.
    pub fn remove(&self, fullname: &str) {
        let mut state = self.state.lock();
        Self::withdraw(&mut state, fullname);
    }

    /// Sends an error to every browser of a service type.
    pub fn inject_error(&self, service_type: &str, error: DiscoveryError) {
        let mut state = self.state.lock();
        state.browsers.retain(|b| {
            b.service_type != service_type || b.tx.send(MdnsEvent::Error(error.clone())).is_ok()
        });
    }

    /// Reports a name conflict on an accepted registration, the way a responder does
    /// when another host claims the name after the fact.
    pub fn conflict(&self, fullname: &str) {
        let state = self.state.lock();
        if let Some(tx) = state.registrations.get(fullname) {
            let _ = tx.send(MdnsEvent::NameConflict {
                name: crate::filter::short_name(fullname).to_string(),
            });
        }
    }

    /// Full names currently registered through this backend.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().registrations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of open browse channels for a service type.
    pub fn browser_count(&self, service_type: &str) -> usize {
        self.state
            .lock()
            .browsers
            .iter()
            .filter(|b| b.service_type == service_type && !b.tx.is_disconnected())
            .count()
    }

    fn notify_added(state: &mut MockState, service_type: &str, record: &ResolvedRecord) {
        state.browsers.retain(|b| {
            b.service_type != service_type || Self::send_record(&b.tx, service_type, record)
        });
    }

    /// One found event, then one resolved event per address.
    fn send_record(tx: &flume::Sender<MdnsEvent>, service_type: &str, record: &ResolvedRecord) -> bool {
        let found = MdnsEvent::ServiceFound {
            service_type: service_type.to_string(),
            fullname: record.fullname.clone(),
        };
        if tx.send(found).is_err() {
            return false;
        }

        if record.addresses.is_empty() {
            return tx.send(MdnsEvent::ServiceResolved(record.clone())).is_ok();
        }
        record.addresses.iter().all(|address| {
            let resolved = ResolvedRecord {
                addresses: vec![*address],
                ..record.clone()
            };
            tx.send(MdnsEvent::ServiceResolved(resolved)).is_ok()
        })
    }

    fn withdraw(state: &mut MockState, fullname: &str) {
        let Some(index) = state.records.iter().position(|p| p.record.fullname == fullname) else {
            return;
        };
        let published = state.records.remove(index);
        state.browsers.retain(|b| {
            b.service_type != published.service_type
                || b.tx
                    .send(MdnsEvent::ServiceRemoved {
                        service_type: published.service_type.clone(),
                        fullname: fullname.to_string(),
                    })
                    .is_ok()
        });
    }
}

impl MdnsBackend for MockBackend {
    fn browse(&self, service_type: &str) -> Result<Browse> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(DiscoveryError::BrowseFailed {
                service_type: service_type.to_string(),
                reason: "responder is shut down".to_string(),
            });
        }

        let (tx, rx) = flume::unbounded();
        for published in state.records.iter().filter(|p| p.service_type == service_type) {
            Self::send_record(&tx, service_type, &published.record);
        }
        state.next_browse += 1;
        let id = state.next_browse;
        state.browsers.push(Browser {
            id,
            service_type: service_type.to_string(),
            tx,
        });
        debug!(service_type = %service_type, id, "Mock browse started");
        Ok(Browse {
            id,
            service_type: service_type.to_string(),
            events: rx,
        })
    }

    fn stop_browse(&self, browse: &Browse) -> Result<()> {
        self.state.lock().browsers.retain(|b| b.id != browse.id);
        Ok(())
    }

    fn register(&self, registration: Registration) -> Result<flume::Receiver<MdnsEvent>> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(DiscoveryError::RegisterFailed {
                service_name: registration.instance_name,
                reason: "responder is shut down".to_string(),
            });
        }

        let fullname = registration.fullname();
        let (tx, rx) = flume::unbounded();

        let taken = state.records.iter().any(|p| p.record.fullname == fullname);
        if taken {
            let _ = tx.send(MdnsEvent::NameConflict {
                name: registration.instance_name,
            });
            return Ok(rx);
        }

        let record = ResolvedRecord {
            fullname: fullname.clone(),
            hostname: self.hostname.clone(),
            port: registration.port,
            addresses: self.addresses.clone(),
            txt: registration.properties,
        };
        Self::notify_added(&mut state, &registration.service_type, &record);
        state.records.push(Published {
            service_type: registration.service_type,
            record,
        });

        let _ = tx.send(MdnsEvent::Registered {
            fullname: fullname.clone(),
            hostname: self.hostname.clone(),
        });
        state.registrations.insert(fullname, tx);
        Ok(rx)
    }

    fn unregister(&self, fullname: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.registrations.remove(fullname);
        Self::withdraw(&mut state, fullname);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.browsers.clear();
        state.registrations.clear();
        state.records.clear();
        Ok(())
    }
}

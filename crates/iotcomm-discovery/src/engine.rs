//! Discovery engine.
//!
//! Drives advertise and discover operations. Each operation owns the calling task for
//! its whole loop: it waits on a single mDNS event channel with a bounded timeout, handles
//! one event at a time and stops when its cancellation token fires or a non-transient
//! error occurs. Accepted services are turned into [`CommHandle`]s by the
//! [`PluginResolver`] and handed to the caller's callback.
//!
//! The engine is the context object for everything that used to be process-wide: the
//! service cache, the local address set and the last error all live here, behind short
//! critical sections that are never held across an `.await`.

use crate::address::{
    ipv4_first, prefer_ipv4, AddressResolver, InterfaceSource, LocalAddresses, SystemInterfaces,
};
use crate::backend::{MdnsBackend, MdnsEvent, Registration, ResolvedRecord};
use crate::cache::{CacheOutcome, ServiceCache};
use crate::error::{DiscoveryError, Result};
use crate::filter::{short_name, QueryFilter};
use iotcomm_core::{DiscoveryConfig, ServiceQuery, ServiceSpec, ServiceStatus};
use iotcomm_plugin_api::{CommHandle, PluginResolver, Role};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Caller-supplied veto over a candidate that passed the query filters.
pub type QueryPredicate = Box<dyn Fn(&ServiceQuery) -> bool + Send + Sync>;

/// A service handed to the caller, with the transport resolved for it.
#[derive(Debug)]
pub struct Delivered {
    /// The advertised spec, or the discovered service described as a spec
    pub spec: ServiceSpec,
    pub handle: CommHandle,
}

enum Wait {
    Event(MdnsEvent),
    Cancelled,
}

/// Orchestrates advertise/browse/resolve and hands accepted services to the caller.
pub struct DiscoveryEngine {
    backend: Arc<dyn MdnsBackend>,
    resolver: Arc<PluginResolver>,
    interfaces: Arc<dyn InterfaceSource>,
    config: DiscoveryConfig,
    cache: Mutex<ServiceCache>,
    local: Mutex<LocalAddresses>,
    last_error: Mutex<Option<String>>,
}

/// Builder for [`DiscoveryEngine`].
pub struct DiscoveryEngineBuilder {
    backend: Arc<dyn MdnsBackend>,
    resolver: Arc<PluginResolver>,
    interfaces: Arc<dyn InterfaceSource>,
    config: DiscoveryConfig,
}

impl DiscoveryEngineBuilder {
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interfaces(mut self, interfaces: Arc<dyn InterfaceSource>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> Result<DiscoveryEngine> {
        self.config
            .validate()
            .map_err(DiscoveryError::InvalidConfig)?;

        info!(
            wait = ?self.config.wait(),
            local_address = %self.config.local_address,
            "Discovery engine created"
        );

        Ok(DiscoveryEngine {
            backend: self.backend,
            resolver: self.resolver,
            interfaces: self.interfaces,
            config: self.config,
            cache: Mutex::new(ServiceCache::new()),
            local: Mutex::new(LocalAddresses::default()),
            last_error: Mutex::new(None),
        })
    }
}

impl DiscoveryEngine {
    /// Starts building an engine over a backend and a plugin resolver. Defaults to the
    /// long wait and the host's real interfaces.
    pub fn builder(backend: Arc<dyn MdnsBackend>, resolver: Arc<PluginResolver>) -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder {
            backend,
            resolver,
            interfaces: Arc::new(SystemInterfaces),
            config: DiscoveryConfig::default(),
        }
    }

    /// Creates an engine with the default configuration.
    pub fn new(backend: Arc<dyn MdnsBackend>, resolver: Arc<PluginResolver>) -> Result<Self> {
        Self::builder(backend, resolver).build()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Human-readable description of the most recent error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Addresses recorded in the service cache for a name.
    pub fn known_addresses(&self, service_name: &str) -> Vec<IpAddr> {
        self.cache.lock().addresses_of(service_name)
    }

    /// Local addresses from the most recent enumeration.
    pub fn local_addresses(&self) -> LocalAddresses {
        self.local.lock().clone()
    }

    /// Advertises a service and delivers a service-side handle once it is registered.
    ///
    /// Runs until `cancel` fires or a terminal error occurs. A name conflict delivers
    /// [`DiscoveryError::NameConflict`] and stops; there is no retry under another name.
    ///
    /// # Errors
    ///
    /// Returns the terminal error, which has already been passed to `callback`.
    pub async fn advertise<F>(&self, spec: ServiceSpec, cancel: CancellationToken, mut callback: F) -> Result<()>
    where
        F: FnMut(Result<Delivered>) + Send,
    {
        let mut spec = spec;
        if let Err(e) = self.refresh_local_addresses() {
            return self.fail(e, &mut callback);
        }

        let registration = Registration::from_spec(&spec);
        let fullname = registration.fullname();
        info!(
            service = %spec.service_name,
            service_type = %spec.record_type(),
            port = spec.port,
            "Advertising service"
        );

        let events = match self.backend.register(registration) {
            Ok(events) => events,
            Err(e) => return self.fail(e, &mut callback),
        };

        // The responder may rename a service it already accepted
        let mut registered = false;
        let outcome = loop {
            let event = match self.next_event(&events, &cancel).await {
                Ok(Wait::Event(event)) => event,
                Ok(Wait::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            };

            match event {
                MdnsEvent::Registered { fullname, hostname } => {
                    registered = true;
                    spec.status = ServiceStatus::Registered;
                    info!(service = %fullname, hostname = %hostname, "Service registered");
                    match self.serve(&spec).await {
                        Ok(delivered) => callback(Ok(delivered)),
                        Err(e) => break Err(e),
                    }
                }
                MdnsEvent::NameConflict { name } => {
                    spec.status = ServiceStatus::NameInUse;
                    warn!(service = %name, "Service name already in use");
                    break Err(DiscoveryError::NameConflict(name));
                }
                MdnsEvent::Error(e) if e.is_transient() => self.report(e, &mut callback),
                MdnsEvent::Error(e) => break Err(e),
                other => trace!(event = ?other, "Ignoring event while advertising"),
            }
        };

        if self.config.unregister_on_exit && registered {
            if let Err(e) = self.backend.unregister(&fullname) {
                warn!(service = %fullname, error = %e, "Failed to unregister service");
            }
        }

        match outcome {
            Ok(()) => {
                info!(service = %spec.service_name, "Advertise stopped");
                Ok(())
            }
            Err(e) => self.fail(e, &mut callback),
        }
    }

    /// Registers a service without waiting for the outcome. Returns the full instance name.
    pub fn register_service(&self, spec: &ServiceSpec) -> Result<String> {
        let registration = Registration::from_spec(spec);
        let fullname = registration.fullname();
        self.backend
            .register(registration)
            .map_err(|e| self.record_error(e))?;
        info!(service = %fullname, "Service registered without advertise loop");
        Ok(fullname)
    }

    /// Discovers services matching `query` and delivers a client-side handle for each.
    pub async fn discover<F>(&self, query: ServiceQuery, cancel: CancellationToken, callback: F) -> Result<()>
    where
        F: FnMut(Result<Delivered>) + Send,
    {
        self.discover_filtered(query, None, cancel, callback).await
    }

    /// Discovers services matching `query`, giving `filter` a final veto over each
    /// candidate before a client is created for it.
    ///
    /// Runs until `cancel` fires or a terminal error occurs. A transport that fails to
    /// resolve for one candidate is reported through `callback` and browsing continues.
    ///
    /// # Errors
    ///
    /// Returns the terminal error, which has already been passed to `callback`.
    pub async fn discover_filtered<F>(
        &self,
        query: ServiceQuery,
        filter: Option<QueryPredicate>,
        cancel: CancellationToken,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(Result<Delivered>) + Send,
    {
        let query_filter = match QueryFilter::new(&query) {
            Ok(query_filter) => query_filter,
            Err(e) => return self.fail(e, &mut callback),
        };
        if let Err(e) = self.refresh_local_addresses() {
            return self.fail(e, &mut callback);
        }

        let service_type = query.service_string();
        info!(
            query = %query.service_name,
            service_type = %service_type,
            port = query.port,
            "Discovering services"
        );

        let browse = match self.backend.browse(&service_type) {
            Ok(browse) => browse,
            Err(e) => return self.fail(e, &mut callback),
        };

        let outcome = loop {
            let event = match self.next_event(&browse.events, &cancel).await {
                Ok(Wait::Event(event)) => event,
                Ok(Wait::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            };

            match event {
                MdnsEvent::ServiceFound { fullname, .. } => {
                    debug!(service = %fullname, status = %ServiceStatus::Added, "Service found");
                }
                MdnsEvent::ServiceResolved(record) => {
                    let candidate = match self
                        .accept_candidate(&query, &query_filter, filter.as_ref(), record)
                        .await
                    {
                        Ok(Some(candidate)) => candidate,
                        Ok(None) => continue,
                        Err(e) => break Err(e),
                    };

                    match self.resolver.resolve(&candidate, Role::Client) {
                        Ok(handle) => {
                            info!(
                                service = %candidate.service_name,
                                address = candidate.address.as_deref().unwrap_or_default(),
                                port = candidate.port,
                                "Delivering client"
                            );
                            callback(Ok(Delivered {
                                spec: candidate,
                                handle,
                            }));
                        }
                        Err(e) => self.report(e.into(), &mut callback),
                    }
                }
                MdnsEvent::ServiceRemoved { fullname, .. } => {
                    info!(service = %fullname, status = %ServiceStatus::Removed, "Service removed");
                }
                MdnsEvent::Error(e) if e.is_transient() => self.report(e, &mut callback),
                MdnsEvent::Error(e) => break Err(e),
                other => trace!(event = ?other, "Ignoring event while browsing"),
            }
        };

        if let Err(e) = self.backend.stop_browse(&browse) {
            warn!(service_type = %service_type, error = %e, "Failed to stop browsing");
        }

        match outcome {
            Ok(()) => {
                info!(query = %query.service_name, "Discovery stopped");
                Ok(())
            }
            Err(e) => self.fail(e, &mut callback),
        }
    }

    /// Creates a client for a known endpoint without browsing.
    ///
    /// A missing address means this host; a zero port is rejected.
    pub fn create_client_for_service(&self, query: &ServiceQuery) -> Result<CommHandle> {
        if query.port == 0 {
            return Err(self.record_error(DiscoveryError::InvalidQuery(format!(
                "service '{}' has no port",
                query.service_name
            ))));
        }

        let mut spec = query.clone();
        if spec.address.is_none() {
            spec.address = Some(self.config.local_address.clone());
        }

        self.resolver
            .resolve(&spec, Role::Client)
            .map_err(|e| self.record_error(e.into()))
    }

    /// Resolves the service-side transport for a registered spec.
    async fn serve(&self, spec: &ServiceSpec) -> Result<Delivered> {
        let mut spec = spec.clone();
        let address = match spec.address.clone() {
            Some(host) => {
                let ip = AddressResolver::resolve_host(&host, spec.port).await?;
                debug!(host = %host, ip = %ip, "Resolved advertise address override");
                ip.to_string()
            }
            None => self.visible_address(),
        };
        spec.address = Some(address);

        let handle = self.resolver.resolve(&spec, Role::Service)?;
        info!(service = %spec.service_name, handle = %handle.id(), "Delivering service");
        Ok(Delivered { spec, handle })
    }

    /// Runs one resolved record through the query filters, the service cache and the
    /// caller's predicate. Returns the candidate to deliver, if any.
    async fn accept_candidate(
        &self,
        query: &ServiceQuery,
        query_filter: &QueryFilter,
        filter: Option<&QueryPredicate>,
        record: ResolvedRecord,
    ) -> Result<Option<ServiceSpec>> {
        let name = short_name(&record.fullname).to_string();

        if !query_filter.matches_name(&name) {
            debug!(service = %name, "Rejected by name filter");
            return Ok(None);
        }
        if !query_filter.matches_port(record.port) {
            debug!(service = %name, port = record.port, "Rejected by port filter");
            return Ok(None);
        }
        if !query_filter.matches_properties(&record.txt) {
            debug!(service = %name, "Rejected by property filter");
            return Ok(None);
        }

        let addresses = if record.addresses.is_empty() {
            vec![AddressResolver::resolve_host(&record.hostname, record.port).await?]
        } else {
            ipv4_first(&record.addresses)
        };

        let mut accepted = None;
        {
            let mut cache = self.cache.lock();
            for address in addresses {
                match cache.accept(&name, address) {
                    CacheOutcome::New => accepted = accepted.or(Some(address)),
                    CacheOutcome::SeenOnNewAddress => {
                        debug!(service = %name, address = %address, "Already delivered on another address")
                    }
                    CacheOutcome::Duplicate => {
                        debug!(service = %name, address = %address, "Duplicate notification")
                    }
                }
            }
        }
        let Some(address) = accepted else {
            return Ok(None);
        };

        let address = if self.local.lock().is_local(&address) {
            self.config.local_address.clone()
        } else {
            address.to_string()
        };

        let candidate = ServiceSpec {
            service_name: name,
            service_type: query.service_type.clone(),
            address: Some(address),
            port: record.port,
            properties: record.txt,
            comm_params: query.comm_params.clone(),
            advertise: Default::default(),
            status: ServiceStatus::Added,
        };

        if let Some(filter) = filter {
            if !filter(&candidate) {
                debug!(service = %candidate.service_name, "Rejected by caller filter");
                return Ok(None);
            }
        }

        Ok(Some(candidate))
    }

    /// Waits for the next event, re-entering the wait on timeout.
    async fn next_event(
        &self,
        events: &flume::Receiver<MdnsEvent>,
        cancel: &CancellationToken,
    ) -> Result<Wait> {
        let wait = self.config.wait();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Wait::Cancelled),
                received = tokio::time::timeout(wait, events.recv_async()) => match received {
                    Ok(Ok(event)) => return Ok(Wait::Event(event)),
                    Ok(Err(_)) => return Err(DiscoveryError::ChannelClosed),
                    Err(_) => trace!("No mDNS events within {:?}", wait),
                },
            }
        }
    }

    /// The address peers reach this host on: the lowest non-loopback interface address,
    /// IPv4 preferred, or the local sentinel when there is none.
    fn visible_address(&self) -> String {
        let mut addresses: Vec<IpAddr> = self
            .local
            .lock()
            .iter()
            .filter(|ip| !ip.is_loopback())
            .copied()
            .collect();
        addresses.sort();
        prefer_ipv4(&addresses)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| self.config.local_address.clone())
    }

    fn refresh_local_addresses(&self) -> Result<()> {
        let local = LocalAddresses::enumerate(self.interfaces.as_ref())?;
        *self.local.lock() = local;
        Ok(())
    }

    fn record_error(&self, e: DiscoveryError) -> DiscoveryError {
        *self.last_error.lock() = Some(e.to_string());
        e
    }

    /// Records a non-terminal error and passes it to the callback.
    fn report<F>(&self, e: DiscoveryError, callback: &mut F)
    where
        F: FnMut(Result<Delivered>),
    {
        warn!(code = e.code(), error = %e, "Discovery error");
        callback(Err(self.record_error(e)));
    }

    /// Records a terminal error, passes it to the callback and returns it.
    fn fail<F>(&self, e: DiscoveryError, callback: &mut F) -> Result<()>
    where
        F: FnMut(Result<Delivered>),
    {
        error!(code = e.code(), error = %e, "Discovery operation failed");
        callback(Err(self.record_error(e.clone())));
        Err(e)
    }
}

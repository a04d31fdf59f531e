//! Plugin resolver - turns a protocol name and role into a ready [`CommHandle`].
//!
//! Resolution follows the on-disk conventions of the communication configuration:
//!
//! 1. Find `lib<protocol>-<suffix>.<ext>` in the plugin search path. The first directory
//!    holding the file wins.
//! 2. Open the module file and instantiate the transport registered for the pair.
//! 3. Read the interface identifier the module exports and find `<interface>.json` in the
//!    interface search path, again first match wins.
//! 4. Resolve every function the descriptor lists. A single missing symbol fails the whole
//!    load and nothing of the partial table survives.
//! 5. Call the module's init hook, if any, exactly once with the service spec or query.

use crate::error::{PluginError, PluginResult};
use crate::handle::CommHandle;
use crate::interface::InterfaceDescriptor;
use crate::registry::TransportRegistry;
use crate::transport::{InitHook, Operation, Role};
use iotcomm_core::{CommConfig, ServiceSpec};
use std::path::PathBuf;
use std::sync::Arc;

/// Locates, loads and validates transport plugins.
#[derive(Clone)]
pub struct PluginResolver {
    config: Arc<CommConfig>,
    registry: Arc<TransportRegistry>,
}

impl PluginResolver {
    pub fn new(config: Arc<CommConfig>, registry: Arc<TransportRegistry>) -> Self {
        Self { config, registry }
    }

    /// Creates a resolver over the process-wide configuration.
    pub fn with_global_config(registry: Arc<TransportRegistry>) -> Self {
        Self::new(CommConfig::global(), registry)
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Module file name for a protocol and role, e.g. `libzmqpubsub-client.so`.
    pub fn module_file_name(&self, protocol: &str, role: Role) -> String {
        let suffix = match role {
            Role::Client => &self.config.client_file_suffix,
            Role::Service => &self.config.service_file_suffix,
        };
        module_file_name(protocol, suffix)
    }

    /// Finds the module file the resolver would load.
    pub fn locate_module(&self, protocol: &str, role: Role) -> PluginResult<PathBuf> {
        let file_name = self.module_file_name(protocol, role);
        first_match(&self.config.plugin_search_dirs(), &file_name).map_err(|searched| {
            PluginError::NotFound {
                module: file_name,
                searched,
            }
        })
    }

    /// Finds the descriptor file for an interface identifier.
    pub fn locate_interface(&self, interface: &str) -> PluginResult<PathBuf> {
        let file_name = format!("{interface}.json");
        first_match(&self.config.interface_search_dirs(), &file_name).map_err(|searched| {
            PluginError::InterfaceNotFound {
                interface: interface.to_string(),
                searched,
            }
        })
    }

    /// Loads a transport and builds its operation table without initializing it.
    pub fn load(&self, protocol: &str, role: Role) -> PluginResult<CommHandle> {
        self.load_module(protocol, role).map(|(handle, _)| handle)
    }

    /// Loads a transport for the protocol of `spec` and initializes it with `spec`.
    ///
    /// # Errors
    ///
    /// Any failure is terminal and returns no handle: the module is not found or cannot be
    /// loaded, it exports no interface identifier, the interface descriptor is missing or
    /// malformed, a declared symbol is not exported, or the init hook fails.
    pub fn resolve(&self, spec: &ServiceSpec, role: Role) -> PluginResult<CommHandle> {
        let protocol = spec.service_type.name.as_str();
        let (handle, init) = self.load_module(protocol, role)?;

        if let Some(init) = init {
            init(spec).map_err(|e| {
                tracing::warn!(
                    "Initialization of {} transport {} failed: {}",
                    role,
                    protocol,
                    e
                );
                PluginError::InitFailed(e.to_string())
            })?;
        }

        tracing::info!(
            "Resolved {} transport {} for service {} ({})",
            role,
            protocol,
            spec.service_name,
            handle.module_path().display()
        );
        Ok(handle)
    }

    fn load_module(&self, protocol: &str, role: Role) -> PluginResult<(CommHandle, Option<InitHook>)> {
        let module_path = self.locate_module(protocol, role)?;
        tracing::debug!("Loading {} plugin {}", role, module_path.display());

        let file = std::fs::File::open(&module_path)
            .map_err(|e| PluginError::LoadError(format!("{}: {}", module_path.display(), e)))?;
        drop(file);

        let constructor = self.registry.get(protocol, role).ok_or_else(|| {
            PluginError::LoadError(format!(
                "{}: no {} transport registered for protocol {}",
                module_path.display(),
                role,
                protocol
            ))
        })?;
        let module = constructor();

        let interface = module
            .interface()
            .map(String::from)
            .ok_or_else(|| PluginError::MissingInterface(module_path.display().to_string()))?;

        let descriptor = InterfaceDescriptor::from_file(self.locate_interface(&interface)?)?;

        let operations = descriptor
            .functions()
            .iter()
            .map(|name| {
                module
                    .symbol(name)
                    .map(|operation| (name.clone(), operation))
                    .ok_or_else(|| PluginError::UnresolvedSymbol {
                        module: module_path.display().to_string(),
                        symbol: name.clone(),
                    })
            })
            .collect::<PluginResult<Vec<(String, Operation)>>>()?;

        let init = module.init();
        let handle = CommHandle::new(
            protocol.to_string(),
            role,
            interface,
            module_path,
            operations,
            module,
        );
        Ok((handle, init))
    }
}

/// Returns the first `dir/file_name` that exists, or the list of searched candidates.
fn first_match(dirs: &[PathBuf], file_name: &str) -> Result<PathBuf, String> {
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            dirs.iter()
                .map(|dir| dir.join(file_name).display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
}

/// Platform file name of a module, exposed for fixtures and diagnostics.
pub fn module_file_name(protocol: &str, suffix: &str) -> String {
    format!("lib{}-{}.{}", protocol, suffix, std::env::consts::DLL_EXTENSION)
}

impl std::fmt::Debug for PluginResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginResolver")
            .field("config", &self.config)
            .field("transports", &self.registry.entries())
            .finish()
    }
}

use crate::error::{PluginError, PluginResult};
use crate::transport::{Operation, Role, TransportModule};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A resolved transport, ready to call.
///
/// Owns the loaded module and its operation table. Each resolve produces a new handle
/// with its own table; handles are never shared between discovery operations. Releasing
/// (or dropping) the handle tears the transport down, after which every lookup fails with
/// [`PluginError::HandleReleased`].
pub struct CommHandle {
    id: Uuid,
    protocol: String,
    role: Role,
    interface: String,
    module_path: PathBuf,
    operations: Vec<(String, Operation)>,
    module: Option<Box<dyn TransportModule>>,
}

impl CommHandle {
    pub(crate) fn new(
        protocol: String,
        role: Role,
        interface: String,
        module_path: PathBuf,
        operations: Vec<(String, Operation)>,
        module: Box<dyn TransportModule>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol,
            role,
            interface,
            module_path,
            operations,
            module: Some(module),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Interface identifier exported by the module.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The module file the transport was loaded from.
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// Operation names in table order. Empty once released.
    pub fn operation_names(&self) -> Vec<&str> {
        self.operations.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Looks up an operation by name. The first matching entry wins.
    pub fn lookup(&self, name: &str) -> PluginResult<Operation> {
        if self.module.is_none() {
            return Err(PluginError::HandleReleased);
        }
        self.operations
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, operation)| operation.clone())
            .ok_or_else(|| PluginError::OperationNotFound(name.to_string()))
    }

    /// Looks up and calls an operation.
    pub fn call(&self, name: &str, args: &[Value]) -> PluginResult<Value> {
        let operation = self.lookup(name)?;
        operation(args)
    }

    pub fn is_released(&self) -> bool {
        self.module.is_none()
    }

    /// Drops the operation table and the loaded module.
    pub fn release(&mut self) {
        if self.module.take().is_some() {
            self.operations.clear();
            tracing::debug!(
                "Released {} handle {} for protocol {}",
                self.role,
                self.id,
                self.protocol
            );
        }
    }
}

impl Drop for CommHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CommHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommHandle")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("role", &self.role)
            .field("interface", &self.interface)
            .field("module_path", &self.module_path)
            .field("operations", &self.operation_names())
            .field("released", &self.is_released())
            .finish()
    }
}

// iotcomm Plugin API
// Transport plugins resolved by protocol name and exposed through name-indexed handles

pub mod error;
pub mod handle;
pub mod interface;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use error::{PluginError, PluginResult};
pub use handle::CommHandle;
pub use interface::{InterfaceDescriptor, MAX_FUNCTIONS};
pub use registry::{TransportConstructor, TransportRegistry};
pub use resolver::{module_file_name, PluginResolver};
pub use transport::{
    ClientModule, ClientTransport, Context, InitHook, Message, Operation, Role, ServiceModule,
    ServiceTransport, TransportModule, CLIENT_INTERFACE, SERVICE_INTERFACE,
};

/// Plugin API version
pub const PLUGIN_API_VERSION: &str = "0.1.0";

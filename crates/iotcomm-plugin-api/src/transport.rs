//! Transport contract.
//!
//! A transport is reached through a name-indexed operation table, the same way for every
//! protocol: the resolver asks a [`TransportModule`] for each operation its interface
//! descriptor declares and stores the returned [`Operation`]s in a
//! [`CommHandle`](crate::CommHandle). Arguments and results are JSON values.
//!
//! Transport authors normally implement one of the typed traits, [`ClientTransport`] or
//! [`ServiceTransport`], and wrap it in [`ClientModule`] / [`ServiceModule`], which export
//! the standard operation names:
//!
//! | Interface | Operation | Arguments | Result |
//! |-----------|-----------|-----------|--------|
//! | `client-interface` | `send` | message, context? | null |
//! | | `subscribe` | topic | null |
//! | | `unsubscribe` | topic | null |
//! | | `receive` | | [`Message`] or null |
//! | | `done` | | null |
//! | `service-interface` | `sendTo` | client, message, context? | null |
//! | | `publish` | message, context? | null |
//! | | `manageClient` | client, context? | null |
//! | | `receive` | | [`Message`] or null |
//! | | `done` | | null |

use crate::error::{PluginError, PluginResult};
use iotcomm_core::ServiceSpec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Interface identifier exported by client transports.
pub const CLIENT_INTERFACE: &str = "client-interface";

/// Interface identifier exported by service transports.
pub const SERVICE_INTERFACE: &str = "service-interface";

/// Callable entry of an operation table.
pub type Operation = Arc<dyn Fn(&[Value]) -> PluginResult<Value> + Send + Sync>;

/// One-shot initialization entry point, called with the service spec or query being served.
pub type InitHook = Box<dyn FnOnce(&ServiceSpec) -> PluginResult<()> + Send>;

/// Which side of a service a transport implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connects to a discovered service
    Client,
    /// Serves an advertised service
    Service,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Service => "service",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded transport, seen through its exported symbols.
pub trait TransportModule: Send + Sync {
    /// The interface identifier this module implements, if it exports one.
    fn interface(&self) -> Option<&str>;

    /// Looks up an exported operation by name.
    fn symbol(&self, name: &str) -> Option<Operation>;

    /// Optional initialization entry point.
    fn init(&self) -> Option<InitHook> {
        None
    }
}

/// Context attached to a message, such as the topic it was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    pub value: String,
}

impl Context {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending client, for messages received by a service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            client: None,
            text: text.into(),
            context: None,
        }
    }
}

/// Client side of a transport.
pub trait ClientTransport: Send + 'static {
    /// Connects to the service described by `query`.
    fn init(&mut self, _query: &ServiceSpec) -> PluginResult<()> {
        Ok(())
    }

    fn send(&mut self, message: &str, context: Option<&Context>) -> PluginResult<()>;

    fn subscribe(&mut self, topic: &str) -> PluginResult<()>;

    fn unsubscribe(&mut self, topic: &str) -> PluginResult<()>;

    /// Returns the next pending message, if any.
    fn receive(&mut self) -> PluginResult<Option<Message>>;

    fn done(&mut self) -> PluginResult<()>;
}

/// Service side of a transport.
pub trait ServiceTransport: Send + 'static {
    /// Starts serving the service described by `spec`.
    fn init(&mut self, _spec: &ServiceSpec) -> PluginResult<()> {
        Ok(())
    }

    fn send_to(&mut self, client: &str, message: &str, context: Option<&Context>) -> PluginResult<()>;

    fn publish(&mut self, message: &str, context: Option<&Context>) -> PluginResult<()>;

    fn manage_client(&mut self, client: &str, context: Option<&Context>) -> PluginResult<()>;

    /// Returns the next pending message, if any.
    fn receive(&mut self) -> PluginResult<Option<Message>>;

    fn done(&mut self) -> PluginResult<()>;
}

/// Exports a [`ClientTransport`] under the `client-interface` operation names.
pub struct ClientModule<T> {
    transport: Arc<Mutex<T>>,
    interface: Option<String>,
}

impl<T: ClientTransport> ClientModule<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            interface: Some(CLIENT_INTERFACE.to_string()),
        }
    }

    /// Exports a different interface identifier, or none at all.
    pub fn with_interface(mut self, interface: Option<&str>) -> Self {
        self.interface = interface.map(String::from);
        self
    }

    /// Shared access to the wrapped transport.
    pub fn transport(&self) -> Arc<Mutex<T>> {
        self.transport.clone()
    }
}

impl<T: ClientTransport> TransportModule for ClientModule<T> {
    fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn symbol(&self, name: &str) -> Option<Operation> {
        let transport = self.transport.clone();
        let operation: Operation = match name {
            "send" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let message = arg_str(args, 0, "send")?;
                let context = arg_context(args, 1, "send")?;
                transport.lock().send(message, context.as_ref())?;
                Ok(Value::Null)
            }),
            "subscribe" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let topic = arg_str(args, 0, "subscribe")?;
                transport.lock().subscribe(topic)?;
                Ok(Value::Null)
            }),
            "unsubscribe" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let topic = arg_str(args, 0, "unsubscribe")?;
                transport.lock().unsubscribe(topic)?;
                Ok(Value::Null)
            }),
            "receive" => Arc::new(move |_: &[Value]| -> PluginResult<Value> {
                let message = transport.lock().receive()?;
                Ok(serde_json::to_value(message)?)
            }),
            "done" => Arc::new(move |_: &[Value]| -> PluginResult<Value> {
                transport.lock().done()?;
                Ok(Value::Null)
            }),
            _ => return None,
        };
        Some(operation)
    }

    fn init(&self) -> Option<InitHook> {
        let transport = self.transport.clone();
        Some(Box::new(move |query: &ServiceSpec| transport.lock().init(query)))
    }
}

/// Exports a [`ServiceTransport`] under the `service-interface` operation names.
pub struct ServiceModule<T> {
    transport: Arc<Mutex<T>>,
    interface: Option<String>,
}

impl<T: ServiceTransport> ServiceModule<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            interface: Some(SERVICE_INTERFACE.to_string()),
        }
    }

    /// Exports a different interface identifier, or none at all.
    pub fn with_interface(mut self, interface: Option<&str>) -> Self {
        self.interface = interface.map(String::from);
        self
    }

    /// Shared access to the wrapped transport.
    pub fn transport(&self) -> Arc<Mutex<T>> {
        self.transport.clone()
    }
}

impl<T: ServiceTransport> TransportModule for ServiceModule<T> {
    fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn symbol(&self, name: &str) -> Option<Operation> {
        let transport = self.transport.clone();
        let operation: Operation = match name {
            "sendTo" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let client = arg_str(args, 0, "sendTo")?;
                let message = arg_str(args, 1, "sendTo")?;
                let context = arg_context(args, 2, "sendTo")?;
                transport.lock().send_to(client, message, context.as_ref())?;
                Ok(Value::Null)
            }),
            "publish" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let message = arg_str(args, 0, "publish")?;
                let context = arg_context(args, 1, "publish")?;
                transport.lock().publish(message, context.as_ref())?;
                Ok(Value::Null)
            }),
            "manageClient" => Arc::new(move |args: &[Value]| -> PluginResult<Value> {
                let client = arg_str(args, 0, "manageClient")?;
                let context = arg_context(args, 1, "manageClient")?;
                transport.lock().manage_client(client, context.as_ref())?;
                Ok(Value::Null)
            }),
            "receive" => Arc::new(move |_: &[Value]| -> PluginResult<Value> {
                let message = transport.lock().receive()?;
                Ok(serde_json::to_value(message)?)
            }),
            "done" => Arc::new(move |_: &[Value]| -> PluginResult<Value> {
                transport.lock().done()?;
                Ok(Value::Null)
            }),
            _ => return None,
        };
        Some(operation)
    }

    fn init(&self) -> Option<InitHook> {
        let transport = self.transport.clone();
        Some(Box::new(move |spec: &ServiceSpec| transport.lock().init(spec)))
    }
}

fn arg_str<'a>(args: &'a [Value], index: usize, operation: &str) -> PluginResult<&'a str> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(PluginError::invalid_arguments(
            operation,
            format!("argument {index} must be a string, got {other}"),
        )),
        None => Err(PluginError::invalid_arguments(
            operation,
            format!("missing argument {index}"),
        )),
    }
}

fn arg_context(args: &[Value], index: usize, operation: &str) -> PluginResult<Option<Context>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| PluginError::invalid_arguments(operation, format!("bad context: {e}"))),
    }
}

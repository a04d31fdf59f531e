//! Service descriptor types.
//!
//! A single [`ServiceSpec`] shape serves both sides of discovery: advertising a service
//! (where `name` is the exact instance name) and querying for one (where `name` is a
//! regular expression and a zero port means "any port"). [`ServiceQuery`] is an alias that
//! makes call sites read naturally.
//!
//! Descriptors are parsed from JSON documents such as:
//!
//! ```json
//! {
//!     "name": "therm",
//!     "type": { "name": "zmqpubsub", "protocol": "tcp" },
//!     "port": 5563,
//!     "properties": { "dataType": "float", "unit": "C" },
//!     "comm_params": { "ssl": true }
//! }
//! ```

use crate::error::{ParseError, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;

/// Upper bound on the number of `properties` and `comm_params` entries.
pub const MAX_ENTRIES: usize = 128;

/// Transport selector of a service: the transport plugin name plus the IP protocol.
///
/// `{"name": "zmqpubsub", "protocol": "tcp"}` maps to the mDNS record type
/// `_zmqpubsub._tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceType {
    /// Transport plugin name, also the first label of the record type
    pub name: String,
    /// Transport protocol label (`tcp`, `udp`)
    pub protocol: String,
}

impl ServiceType {
    /// Creates a new service type.
    pub fn new(name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
        }
    }

    /// Returns the DNS record type, `_<name>._<protocol>`.
    pub fn record_type(&self) -> String {
        format!("_{}._{}", self.name, self.protocol)
    }

    /// Returns the fully qualified mDNS service type, `_<name>._<protocol>.local.`.
    pub fn service_string(&self) -> String {
        format!("{}.local.", self.record_type())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.record_type())
    }
}

/// Lifecycle status of a service, updated while advertising or browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Seen by a browser
    Added,
    /// Withdrawn from the network
    Removed,
    /// Registration confirmed by the responder
    Registered,
    /// Another host already owns the instance name
    NameInUse,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Added => write!(f, "added"),
            ServiceStatus::Removed => write!(f, "removed"),
            ServiceStatus::Registered => write!(f, "registered"),
            ServiceStatus::NameInUse => write!(f, "name in use"),
        }
    }
}

/// A single key/value entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered key/value set.
///
/// Serialized as a JSON object; entries keep document order on both parse and
/// serialize, which keeps TXT records stable across advertise runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Existing keys are not replaced.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Property::new(key, value));
    }

    /// Returns the value of the first entry with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Returns true if an entry with exactly this key and value exists.
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|p| p.key == key && p.value == value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| Property::new(k, v))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for property in &self.0 {
            map.serialize_entry(&property.key, &property.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(PropertiesVisitor { scalars: false })
    }
}

/// Builds [`Properties`] from a JSON object, optionally stringifying bool and number values.
struct PropertiesVisitor {
    scalars: bool,
}

impl<'de> Visitor<'de> for PropertiesVisitor {
    type Value = Properties;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scalars {
            f.write_str("an object of string, bool or number values")
        } else {
            f.write_str("an object of string values")
        }
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Properties, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0).min(MAX_ENTRIES));
        while let Some(key) = access.next_key::<String>()? {
            let value = if self.scalars {
                access.next_value::<Scalar>()?.0
            } else {
                access.next_value::<String>()?
            };
            entries.push(Property { key, value });
        }
        Ok(Properties(entries))
    }
}

/// A JSON string, bool or number rendered as a string.
struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, bool or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

fn deserialize_properties<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Properties>, D::Error> {
    deserializer
        .deserialize_map(PropertiesVisitor { scalars: false })
        .map(Some)
}

fn deserialize_comm_params<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Properties>, D::Error> {
    deserializer
        .deserialize_map(PropertiesVisitor { scalars: true })
        .map(Some)
}

fn deserialize_scalar<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Scalar::deserialize(deserializer).map(|s| Some(s.0))
}

/// Where a service should be advertised. Carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertise {
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub locally: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub cloud: Option<String>,
}

impl Advertise {
    pub fn is_empty(&self) -> bool {
        self.locally.is_none() && self.cloud.is_none()
    }
}

/// Description of a service to advertise, or a query for services to discover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    /// Exact instance name when advertising, regular expression when querying
    #[serde(rename = "name")]
    pub service_name: String,

    /// Transport selector and mDNS record type
    #[serde(rename = "type")]
    pub service_type: ServiceType,

    /// Host override; `None` resolves automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Service port; 0 in a query means any port
    pub port: u16,

    /// TXT record entries
    pub properties: Properties,

    /// Transport configuration handed to the plugin
    #[serde(skip_serializing_if = "Properties::is_empty")]
    pub comm_params: Properties,

    #[serde(skip_serializing_if = "Advertise::is_empty")]
    pub advertise: Advertise,

    /// Lifecycle status, never serialized
    #[serde(skip)]
    pub status: ServiceStatus,
}

/// A query is a [`ServiceSpec`] read with query rules.
pub type ServiceQuery = ServiceSpec;

#[derive(Deserialize)]
struct RawServiceType {
    name: Option<String>,
    protocol: Option<String>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    #[serde(rename = "type")]
    service_type: Option<RawServiceType>,
    address: Option<String>,
    port: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_properties")]
    properties: Option<Properties>,
    #[serde(default, deserialize_with = "deserialize_comm_params")]
    comm_params: Option<Properties>,
    #[serde(default)]
    advertise: Option<Advertise>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DescriptorKind {
    Spec,
    Query,
}

impl ServiceSpec {
    /// Creates a descriptor with empty properties and comm params.
    pub fn new(service_name: impl Into<String>, service_type: ServiceType, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            service_type,
            address: None,
            port,
            properties: Properties::new(),
            comm_params: Properties::new(),
            advertise: Advertise::default(),
            status: ServiceStatus::Unknown,
        }
    }

    /// Sets the host override.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Appends a TXT property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(key, value);
        self
    }

    /// Appends a transport parameter.
    pub fn with_comm_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.comm_params.push(key, value);
        self
    }

    /// Parses a service specification (the advertise side).
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the document is not valid JSON, a required field is
    /// missing or empty, the port is outside `1..=65535`, or an object exceeds
    /// [`MAX_ENTRIES`] entries.
    pub fn parse_spec(json: &str) -> Result<Self> {
        Self::parse(json, DescriptorKind::Spec)
    }

    /// Parses a service query (the discover side).
    ///
    /// Unlike a specification, `port` and `properties` are optional and a zero port is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] under the same conditions as [`ServiceSpec::parse_spec`].
    pub fn parse_query(json: &str) -> Result<ServiceQuery> {
        Self::parse(json, DescriptorKind::Query)
    }

    /// Reads and parses a service specification file.
    pub fn spec_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse_spec(&contents)
    }

    /// Reads and parses a service query file.
    pub fn query_from_file<P: AsRef<Path>>(path: P) -> Result<ServiceQuery> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse_query(&contents)
    }

    fn parse(json: &str, kind: DescriptorKind) -> Result<Self> {
        let raw: RawDescriptor = serde_json::from_str(json).map_err(ParseError::from)?;

        let service_name = non_empty(raw.name, "name")?;
        let raw_type = raw
            .service_type
            .ok_or_else(|| ParseError::missing_field("type"))?;
        let service_type = ServiceType {
            name: non_empty(raw_type.name, "type.name")?,
            protocol: non_empty(raw_type.protocol, "type.protocol")?,
        };

        let port = match (raw.port, kind) {
            (None, DescriptorKind::Spec) => return Err(ParseError::missing_field("port").into()),
            (None, DescriptorKind::Query) => 0,
            (Some(port), DescriptorKind::Spec) if !(1..=65535).contains(&port) => {
                return Err(ParseError::invalid_field("port", format!("{port} is not in 1..=65535")).into())
            }
            (Some(port), DescriptorKind::Query) if !(0..=65535).contains(&port) => {
                return Err(ParseError::invalid_field("port", format!("{port} is not in 0..=65535")).into())
            }
            (Some(port), _) => port as u16,
        };

        let properties = match (raw.properties, kind) {
            (Some(properties), _) => properties,
            (None, DescriptorKind::Spec) => {
                return Err(ParseError::missing_field("properties").into())
            }
            (None, DescriptorKind::Query) => Properties::new(),
        };
        check_bound(&properties, "properties")?;

        let comm_params = raw.comm_params.unwrap_or_default();
        check_bound(&comm_params, "comm_params")?;

        Ok(Self {
            service_name,
            service_type,
            address: raw.address.filter(|a| !a.is_empty()),
            port,
            properties,
            comm_params,
            advertise: raw.advertise.unwrap_or_default(),
            status: ServiceStatus::Unknown,
        })
    }

    /// Serializes the descriptor to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes the descriptor to indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns a transport parameter by key.
    pub fn comm_param(&self, key: &str) -> Option<&str> {
        self.comm_params.get(key)
    }

    /// Returns true if the transport parameter is present.
    pub fn has_comm_param(&self, key: &str) -> bool {
        self.comm_params.get(key).is_some()
    }

    /// Returns a TXT property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    /// Returns the DNS record type, `_<name>._<protocol>`.
    pub fn record_type(&self) -> String {
        self.service_type.record_type()
    }

    /// Returns the fully qualified mDNS service type.
    pub fn service_string(&self) -> String {
        self.service_type.service_string()
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String> {
    match value {
        None => Err(ParseError::missing_field(field).into()),
        Some(v) if v.is_empty() => Err(ParseError::invalid_field(field, "must not be empty").into()),
        Some(v) => Ok(v),
    }
}

fn check_bound(entries: &Properties, field: &str) -> Result<()> {
    if entries.len() > MAX_ENTRIES {
        return Err(ParseError::TooManyEntries {
            field: field.to_string(),
            count: entries.len(),
            max: MAX_ENTRIES,
        }
        .into());
    }
    Ok(())
}

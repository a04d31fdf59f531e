//! Query filters applied to every resolved candidate.
//!
//! A candidate must pass all three:
//! - **name**: the short service name matches the query name as an unanchored regular
//!   expression;
//! - **port**: a zero query port accepts any port, otherwise the ports must be equal;
//! - **properties**: an empty query property list accepts anything, otherwise at least one
//!   query property must appear with the same key and value in the candidate's TXT record.

use crate::error::{DiscoveryError, Result};
use iotcomm_core::{Properties, ServiceQuery};
use regex::Regex;

/// Returns the instance part of a full service name (`therm._zmqpubsub._tcp.local.` →
/// `therm`).
pub fn short_name(fullname: &str) -> &str {
    match fullname.find("._") {
        Some(index) => &fullname[..index],
        None => fullname.trim_end_matches('.'),
    }
}

/// Compiled filters for one query.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    name: Regex,
    port: u16,
    properties: Properties,
}

impl QueryFilter {
    /// Compiles the filters of a query.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidQuery`] if the name is not a valid regular expression.
    pub fn new(query: &ServiceQuery) -> Result<Self> {
        let name = Regex::new(&query.service_name).map_err(|e| {
            DiscoveryError::InvalidQuery(format!(
                "name '{}' is not a valid pattern: {}",
                query.service_name, e
            ))
        })?;

        Ok(Self {
            name,
            port: query.port,
            properties: query.properties.clone(),
        })
    }

    pub fn matches_name(&self, short_name: &str) -> bool {
        self.name.is_match(short_name)
    }

    pub fn matches_port(&self, port: u16) -> bool {
        self.port == 0 || self.port == port
    }

    pub fn matches_properties(&self, txt: &Properties) -> bool {
        self.properties.is_empty()
            || self
                .properties
                .iter()
                .any(|wanted| txt.contains(&wanted.key, &wanted.value))
    }

    /// Applies all three filters.
    pub fn matches(&self, short_name: &str, port: u16, txt: &Properties) -> bool {
        self.matches_name(short_name) && self.matches_port(port) && self.matches_properties(txt)
    }
}

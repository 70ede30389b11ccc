//! State shared by every adapter

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dialer::DialOption;
use crate::error::Error;

use super::AdapterType;

/// Fields every proxy entry in the configuration may carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicOption {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub routing_mark: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[derive(Debug, Clone)]
pub struct BaseOption {
    pub name: String,
    pub addr: String,
    pub adapter_type: AdapterType,
    pub udp: bool,
    pub disable_dns_resolve: bool,
    pub interface: String,
    pub routing_mark: u32,
}

impl BaseOption {
    pub fn new(name: impl Into<String>, adapter_type: AdapterType) -> Self {
        Self {
            name: name.into(),
            addr: String::new(),
            adapter_type,
            udp: false,
            disable_dns_resolve: false,
            interface: String::new(),
            routing_mark: 0,
        }
    }

    pub fn with_basic(mut self, basic: &BasicOption) -> Self {
        self.interface = basic.interface_name.clone();
        self.routing_mark = basic.routing_mark;
        self
    }
}

/// Identity and dial settings, fixed at construction
#[derive(Debug, Clone)]
pub struct AdapterBase {
    name: String,
    addr: String,
    interface: String,
    adapter_type: AdapterType,
    udp: bool,
    disable_dns_resolve: bool,
    routing_mark: u32,
}

impl AdapterBase {
    pub fn new(opt: BaseOption) -> Self {
        Self {
            name: opt.name,
            addr: opt.addr,
            interface: opt.interface,
            adapter_type: opt.adapter_type,
            udp: opt.udp,
            disable_dns_resolve: opt.disable_dns_resolve,
            routing_mark: opt.routing_mark,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn adapter_type(&self) -> AdapterType {
        self.adapter_type
    }

    pub fn support_udp(&self) -> bool {
        self.udp
    }

    pub fn disable_dns_resolve(&self) -> bool {
        self.disable_dns_resolve
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn routing_mark(&self) -> u32 {
        self.routing_mark
    }

    /// Append this adapter's socket settings to `opts`.
    ///
    /// The interface option always precedes the routing mark.
    pub fn dial_options(&self, mut opts: Vec<DialOption>) -> Vec<DialOption> {
        if !self.interface.is_empty() {
            opts.push(DialOption::Interface(self.interface.clone()));
        }

        if self.routing_mark != 0 {
            opts.push(DialOption::RoutingMark(self.routing_mark));
        }

        opts
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ "type": self.adapter_type.to_string() })
    }

    pub(crate) fn unsupported(&self, capability: &'static str) -> Error {
        Error::CapabilityUnsupported {
            adapter: self.name.clone(),
            capability,
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Proxy;

/// Where a provider's proxies come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    File,
    Http,
    /// Proxies declared inline in the main configuration
    #[default]
    Compatible,
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleType::File => write!(f, "File"),
            VehicleType::Http => write!(f, "HTTP"),
            VehicleType::Compatible => write!(f, "Compatible"),
        }
    }
}

/// A named set of adapters
pub struct ProxyProvider {
    name: String,
    vehicle: VehicleType,
    proxies: Vec<Proxy>,
}

impl ProxyProvider {
    pub fn new(name: impl Into<String>, vehicle: VehicleType, proxies: Vec<Proxy>) -> Self {
        Self {
            name: name.into(),
            vehicle,
            proxies,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vehicle(&self) -> VehicleType {
        self.vehicle
    }

    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "type": "Proxy",
            "vehicleType": self.vehicle.to_string(),
            "proxies": self.proxies.iter().map(|p| p.to_json()).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Debug for ProxyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyProvider")
            .field("name", &self.name)
            .field("vehicle", &self.vehicle)
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

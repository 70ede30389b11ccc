//! User-selectable proxy group

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::info;

use crate::common::{Metadata, Result};
use crate::dialer::{DialOption, Dialer};
use crate::error::Error;

use super::{
    AdapterBase, AdapterType, BaseOption, BasicOption, ChainedPacketConn, Conn, Connection,
    Proxy, ProxyAdapter, Selectable,
};

pub struct Selector {
    base: AdapterBase,
    proxies: Vec<Proxy>,
    selected: RwLock<String>,
}

impl Selector {
    pub fn new(name: impl Into<String>, proxies: Vec<Proxy>) -> Self {
        Self::with_options(name, &BasicOption::default(), proxies)
    }

    pub fn with_options(name: impl Into<String>, basic: &BasicOption, proxies: Vec<Proxy>) -> Self {
        let mut opt = BaseOption::new(name, AdapterType::Selector).with_basic(basic);
        opt.udp = true;
        let selected = proxies
            .first()
            .map(|p| p.name().to_string())
            .unwrap_or_default();

        Self {
            base: AdapterBase::new(opt),
            proxies,
            selected: RwLock::new(selected),
        }
    }

    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }

    fn selected_proxy(&self) -> Result<Proxy> {
        let selected = self.selected.read();
        self.proxies
            .iter()
            .find(|p| p.name() == selected.as_str())
            .or_else(|| self.proxies.first())
            .cloned()
            .ok_or_else(|| Error::Proxy(format!("group {} has no members", self.name())))
    }
}

#[async_trait]
impl ProxyAdapter for Selector {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn support_udp(&self) -> bool {
        self.selected_proxy().map(|p| p.support_udp()).unwrap_or(false)
    }

    fn supports_udp_association(&self) -> bool {
        self.selected_proxy()
            .map(|p| p.supports_udp_association())
            .unwrap_or(false)
    }

    async fn dial_context(
        &self,
        dialer: &Dialer,
        metadata: &Metadata,
        opts: &[DialOption],
    ) -> Result<Conn> {
        let proxy = self.selected_proxy()?;
        let opts = self.base.dial_options(opts.to_vec());
        let mut conn = proxy.dial_context(dialer, metadata, &opts).await?;
        conn.append_to_chains(self);
        Ok(conn)
    }

    async fn listen_packet_context(
        &self,
        dialer: &Dialer,
        metadata: &Metadata,
        opts: &[DialOption],
    ) -> Result<ChainedPacketConn> {
        let proxy = self.selected_proxy()?;
        let opts = self.base.dial_options(opts.to_vec());
        let mut packet = proxy.listen_packet_context(dialer, metadata, &opts).await?;
        packet.append_to_chains(self);
        Ok(packet)
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "type": self.adapter_type().to_string(),
            "now": self.now(),
            "all": self.members(),
        })
    }

    fn unwrap_proxy(&self, _metadata: &Metadata) -> Option<Proxy> {
        self.selected_proxy().ok()
    }

    fn as_selectable(&self) -> Option<&dyn Selectable> {
        Some(self)
    }
}

impl Selectable for Selector {
    fn now(&self) -> String {
        self.selected.read().clone()
    }

    fn members(&self) -> Vec<String> {
        self.proxies.iter().map(|p| p.name().to_string()).collect()
    }

    fn select(&self, name: &str) -> Result<()> {
        if !self.proxies.iter().any(|p| p.name() == name) {
            return Err(Error::Proxy(format!(
                "{} is not a member of {}",
                name,
                self.name()
            )));
        }

        *self.selected.write() = name.to_string();
        info!("[{}] selected {}", self.name(), name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Direct, Reject};
    use crate::common::Address;
    use crate::iface::{InterfaceCache, StaticInterfaces};
    use std::sync::Arc;

    fn group() -> Selector {
        Selector::new(
            "Proxy",
            vec![Arc::new(Direct::new()) as Proxy, Arc::new(Reject::new())],
        )
    }

    #[test]
    fn test_selector_defaults_to_first() {
        let group = group();
        assert_eq!(group.now(), "DIRECT");
        assert_eq!(group.members(), vec!["DIRECT", "REJECT"]);
        assert_eq!(
            group.unwrap_proxy(&Metadata::default()).unwrap().name(),
            "DIRECT"
        );
    }

    #[test]
    fn test_selector_select() {
        let group = group();
        group.select("REJECT").unwrap();
        assert_eq!(group.now(), "REJECT");

        assert!(group.select("missing").is_err());
        assert_eq!(group.now(), "REJECT");
    }

    #[test]
    fn test_selector_is_selectable() {
        let group = group();
        let proxy: &dyn ProxyAdapter = &group;
        assert!(proxy.as_selectable().is_some());
        assert!(Direct::new().as_selectable().is_none());
    }

    #[test]
    fn test_selector_json() {
        let group = group();
        let value = group.to_json();
        assert_eq!(value["type"], "Selector");
        assert_eq!(value["now"], "DIRECT");
        assert_eq!(value["all"][1], "REJECT");
    }

    #[tokio::test]
    async fn test_selector_appends_itself() {
        let dialer = Dialer::new(Arc::new(InterfaceCache::new(Arc::new(
            StaticInterfaces::default(),
        ))));
        let group = group();
        group.select("REJECT").unwrap();

        let metadata = Metadata::new(Address::from(("example.com", 80)));
        let conn = group.dial_context(&dialer, &metadata, &[]).await.unwrap();
        assert_eq!(conn.chains().as_slice(), &["REJECT", "Proxy"]);
        assert_eq!(conn.chains().to_string(), "Proxy[REJECT]");
    }

    #[tokio::test]
    async fn test_empty_group_dial_fails() {
        let dialer = Dialer::default();
        let group = Selector::new("Empty", Vec::new());
        assert!(group
            .dial_context(&dialer, &Metadata::default(), &[])
            .await
            .is_err());
    }
}

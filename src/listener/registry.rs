use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{EBpf, Inbound, InboundHandles, ListenerManager, Ports, Tun, TunnelSpec};

#[derive(Debug, Clone, Default)]
struct Desired {
    allow_lan: bool,
    bind_address: String,
    ports: Ports,
    inbounds: Vec<Inbound>,
    tun: Tun,
    ebpf: EBpf,
    tunnels: Vec<TunnelSpec>,
    handles: Option<InboundHandles>,
}

/// Records the listener set the reconciler asked for
///
/// Accept loops read the desired state from here. Recreation counters make
/// the reconciler's gating observable.
#[derive(Debug)]
pub struct ListenerRegistry {
    desired: Mutex<Desired>,
    listener_recreations: AtomicUsize,
    port_recreations: AtomicUsize,
    tun_recreations: AtomicUsize,
    auto_redir_recreations: AtomicUsize,
    redir_to_tun_recreations: AtomicUsize,
    tunnel_patches: AtomicUsize,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            desired: Mutex::new(Desired {
                bind_address: "*".to_string(),
                ..Default::default()
            }),
            listener_recreations: AtomicUsize::new(0),
            port_recreations: AtomicUsize::new(0),
            tun_recreations: AtomicUsize::new(0),
            auto_redir_recreations: AtomicUsize::new(0),
            redir_to_tun_recreations: AtomicUsize::new(0),
            tunnel_patches: AtomicUsize::new(0),
        }
    }

    pub fn inbounds(&self) -> Vec<Inbound> {
        self.desired.lock().inbounds.clone()
    }

    pub fn tun(&self) -> Tun {
        self.desired.lock().tun.clone()
    }

    pub fn ebpf(&self) -> EBpf {
        self.desired.lock().ebpf.clone()
    }

    pub fn tunnels(&self) -> Vec<TunnelSpec> {
        self.desired.lock().tunnels.clone()
    }

    pub fn handles(&self) -> Option<InboundHandles> {
        self.desired.lock().handles.clone()
    }

    pub fn listener_recreations(&self) -> usize {
        self.listener_recreations.load(Ordering::Relaxed)
    }

    pub fn port_recreations(&self) -> usize {
        self.port_recreations.load(Ordering::Relaxed)
    }

    pub fn tun_recreations(&self) -> usize {
        self.tun_recreations.load(Ordering::Relaxed)
    }

    pub fn auto_redir_recreations(&self) -> usize {
        self.auto_redir_recreations.load(Ordering::Relaxed)
    }

    pub fn redir_to_tun_recreations(&self) -> usize {
        self.redir_to_tun_recreations.load(Ordering::Relaxed)
    }

    pub fn tunnel_patches(&self) -> usize {
        self.tunnel_patches.load(Ordering::Relaxed)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerManager for ListenerRegistry {
    fn allow_lan(&self) -> bool {
        self.desired.lock().allow_lan
    }

    fn set_allow_lan(&self, allow: bool) {
        self.desired.lock().allow_lan = allow;
    }

    fn bind_address(&self) -> String {
        self.desired.lock().bind_address.clone()
    }

    fn set_bind_address(&self, address: &str) {
        self.desired.lock().bind_address = address.to_string();
    }

    fn ports(&self) -> Ports {
        self.desired.lock().ports
    }

    fn recreate_listeners(&self, inbounds: &[Inbound], handles: &InboundHandles) {
        let mut desired = self.desired.lock();
        desired.inbounds = inbounds.to_vec();
        desired.handles = Some(handles.clone());
        self.listener_recreations.fetch_add(1, Ordering::Relaxed);

        for inbound in inbounds {
            info!("[Inbound] {} listening", inbound);
        }
    }

    fn recreate_ports(&self, ports: &Ports, handles: &InboundHandles) {
        let mut desired = self.desired.lock();
        desired.ports = *ports;
        desired.handles = Some(handles.clone());
        self.port_recreations.fetch_add(1, Ordering::Relaxed);
        debug!("[Inbound] ports {:?}", ports);
    }

    fn recreate_auto_redir(&self, interfaces: &[String], default_interface: &str, handles: &InboundHandles) {
        let mut desired = self.desired.lock();
        desired.ebpf.auto_redir = interfaces.to_vec();
        desired.handles = Some(handles.clone());
        self.auto_redir_recreations.fetch_add(1, Ordering::Relaxed);
        if !interfaces.is_empty() {
            info!(
                "[Inbound] auto-redir on {:?} (default interface {:?})",
                interfaces, default_interface
            );
        }
    }

    fn recreate_tun(&self, tun: &Tun, handles: &InboundHandles) {
        let mut desired = self.desired.lock();
        desired.tun = tun.clone();
        desired.handles = Some(handles.clone());
        self.tun_recreations.fetch_add(1, Ordering::Relaxed);
        if tun.enable {
            info!("[Inbound] tun device {:?} stack {:?}", tun.device, tun.stack);
        }
    }

    fn recreate_redir_to_tun(&self, interfaces: &[String]) {
        self.desired.lock().ebpf.redirect_to_tun = interfaces.to_vec();
        self.redir_to_tun_recreations.fetch_add(1, Ordering::Relaxed);
    }

    fn patch_tunnels(&self, tunnels: &[TunnelSpec], handles: &InboundHandles) {
        let mut desired = self.desired.lock();
        desired.tunnels = tunnels.to_vec();
        desired.handles = Some(handles.clone());
        self.tunnel_patches.fetch_add(1, Ordering::Relaxed);
    }

    fn cleanup(&self) {
        let mut desired = self.desired.lock();
        desired.inbounds.clear();
        desired.ports = Ports::default();
        desired.tun.enable = false;
        desired.ebpf = EBpf::default();
        desired.tunnels.clear();
        desired.handles = None;
        info!("[Inbound] all listeners closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handles() -> InboundHandles {
        let (tcp, _) = mpsc::channel(1);
        let (udp, _) = mpsc::channel(1);
        InboundHandles { tcp, udp }
    }

    #[test]
    fn test_registry_records_and_cleans_up() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.bind_address(), "*");

        let ports = Ports {
            mixed_port: 7890,
            ..Default::default()
        };
        registry.recreate_ports(&ports, &handles());
        registry.recreate_tun(
            &Tun {
                enable: true,
                ..Default::default()
            },
            &handles(),
        );
        assert_eq!(registry.ports().mixed_port, 7890);
        assert_eq!(registry.port_recreations(), 1);
        assert!(registry.tun().enable);
        assert!(registry.handles().is_some());

        registry.cleanup();
        assert_eq!(registry.ports(), Ports::default());
        assert!(!registry.tun().enable);
        assert!(registry.handles().is_none());
    }
}

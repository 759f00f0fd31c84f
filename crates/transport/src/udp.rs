//! UDP multicast backend.

use crate::clock::{Clock, SystemClock};
use crate::config::{MulticastConfig, TransportConfig};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::traits::Transport;
use framelock_types::NodeId;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolve an adapter name to the IPv4 address to send and join on.
///
/// Accepts either a literal IPv4 address or an interface name.
pub fn resolve_adapter(adapter: &str) -> Result<Ipv4Addr, TransportError> {
    if let Ok(ip) = adapter.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let interfaces = if_addrs::get_if_addrs().map_err(TransportError::Socket)?;
    interfaces
        .into_iter()
        .filter(|iface| iface.name == adapter)
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| TransportError::AdapterNotFound(adapter.to_string()))
}

fn open_socket(config: &MulticastConfig) -> Result<UdpSocket, TransportError> {
    let interface = match &config.adapter {
        Some(adapter) => resolve_adapter(adapter)?,
        None => Ipv4Addr::UNSPECIFIED,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(TransportError::Socket)?;
    socket
        .set_reuse_address(true)
        .map_err(TransportError::Socket)?;
    // Cluster traffic never leaves the local segment.
    socket
        .set_multicast_ttl_v4(1)
        .map_err(TransportError::Socket)?;
    // Several nodes may share a host.
    socket
        .set_multicast_loop_v4(true)
        .map_err(TransportError::Socket)?;
    if !interface.is_unspecified() {
        socket
            .set_multicast_if_v4(&interface)
            .map_err(TransportError::Socket)?;
    }

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.rx_port);
    socket
        .bind(&bind_addr.into())
        .map_err(|source| TransportError::Bind {
            port: config.rx_port,
            source,
        })?;
    socket
        .join_multicast_v4(&config.group, &interface)
        .map_err(|source| TransportError::JoinGroup {
            group: config.group,
            source,
        })?;
    socket
        .set_read_timeout(Some(config.poll_interval))
        .map_err(TransportError::Socket)?;

    Ok(socket.into())
}

/// Reliable transport over a UDP multicast group.
///
/// Runs three named threads: `framelock-rx` feeds received datagrams to the
/// endpoint, `framelock-tx` puts queued datagrams on the wire and
/// `framelock-resend` scans pending acknowledgments at a fixed interval.
pub struct UdpTransport {
    endpoint: Arc<Endpoint>,
    cancel: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl UdpTransport {
    /// Join the multicast group and start the background loops.
    ///
    /// Bind and join failures are returned, never retried.
    pub fn start(
        local: NodeId,
        multicast: MulticastConfig,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        Self::start_with_clock(local, multicast, config, Arc::new(SystemClock::new()))
    }

    pub fn start_with_clock(
        local: NodeId,
        multicast: MulticastConfig,
        config: TransportConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        let socket = open_socket(&multicast)?;
        let tx_socket = socket.try_clone().map_err(TransportError::Socket)?;

        let resend_interval = config.resend_interval;
        let max_datagram_size = config.max_datagram_size;
        let endpoint = Arc::new(Endpoint::new(local, config, clock));
        let mut transport = Self {
            endpoint: endpoint.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(3),
            stopped: false,
        };

        let target = SocketAddr::V4(SocketAddrV4::new(multicast.group, multicast.tx_port));
        let poll = multicast.poll_interval;

        {
            let endpoint = endpoint.clone();
            let cancel = transport.cancel.clone();
            transport.spawn("framelock-rx", move || {
                receive_loop(socket, &endpoint, &cancel, max_datagram_size, poll)
            })?;
        }
        {
            let endpoint = endpoint.clone();
            let cancel = transport.cancel.clone();
            transport.spawn("framelock-tx", move || {
                send_loop(tx_socket, &endpoint, &cancel, target, poll)
            })?;
        }
        {
            let cancel = transport.cancel.clone();
            transport.spawn("framelock-resend", move || {
                while !cancel.load(Ordering::Acquire) {
                    endpoint.resend_due();
                    thread::sleep(resend_interval);
                }
            })?;
        }

        info!(
            local = %local,
            group = %multicast.group,
            rx_port = multicast.rx_port,
            tx_port = multicast.tx_port,
            adapter = ?multicast.adapter,
            "Multicast transport started"
        );
        Ok(transport)
    }

    fn spawn<F>(&mut self, name: &'static str, f: F) -> Result<(), TransportError>
    where
        F: FnOnce() + Send + 'static,
    {
        // On failure `self` is dropped by the caller, which stops the
        // threads already running.
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|source| TransportError::Spawn { name, source })?;
        self.workers.push(handle);
        Ok(())
    }
}

fn receive_loop(
    socket: UdpSocket,
    endpoint: &Endpoint,
    cancel: &AtomicBool,
    max_datagram_size: usize,
    poll: Duration,
) {
    let mut buf = vec![0u8; max_datagram_size];
    while !cancel.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, _from)) => {
                endpoint.handle_datagram(&buf[..len]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!(error = %e, "Multicast receive failed");
                thread::sleep(poll);
            }
        }
    }
    debug!("Receive loop stopped");
}

fn send_loop(
    socket: UdpSocket,
    endpoint: &Endpoint,
    cancel: &AtomicBool,
    target: SocketAddr,
    poll: Duration,
) {
    while !cancel.load(Ordering::Acquire) {
        if let Some(datagram) = endpoint.recv_outbound_timeout(poll) {
            if let Err(e) = socket.send_to(&datagram, target) {
                warn!(error = %e, %target, "Multicast send failed");
            }
        }
    }
    debug!("Send loop stopped");
}

impl Transport for UdpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancel.store(true, Ordering::Release);
        // Each loop checks the flag at least once per poll interval.
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Transport worker panicked");
            }
        }
        self.endpoint.drain();
        info!(local = %self.endpoint.local_id(), "Multicast transport stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_as_literal_address() {
        assert_eq!(
            resolve_adapter("192.168.10.4").unwrap(),
            Ipv4Addr::new(192, 168, 10, 4)
        );
    }

    #[test]
    fn test_unknown_adapter_is_start_error() {
        let err = resolve_adapter("no-such-adapter-0").unwrap_err();
        assert!(matches!(err, TransportError::AdapterNotFound(ref name) if name == "no-such-adapter-0"));
        assert!(err.is_start_error());
    }

    #[test]
    fn test_start_fails_on_unknown_adapter() {
        let multicast = MulticastConfig::default()
            .with_ports(0, 0)
            .with_adapter("no-such-adapter-0");
        let result = UdpTransport::start(
            NodeId::new(0).unwrap(),
            multicast,
            TransportConfig::default(),
        );
        assert!(matches!(result, Err(TransportError::AdapterNotFound(_))));
    }
}

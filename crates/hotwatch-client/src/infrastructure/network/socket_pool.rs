//! DiscoverySocketPool: one UDP socket per usable interface address.
//!
//! Each socket is bound to `(interface address, ephemeral port)` with address
//! reuse, broadcast and multicast loopback enabled and its outbound multicast
//! interface pinned to that address.  A reader task per socket forwards every
//! datagram to the event loop as a [`Datagram`]; the reader never touches
//! session state.
//!
//! # Rebuild
//!
//! [`ProbeSocketPool::rebuild`] drops every binding (which aborts its reader
//! and closes its socket), re-enumerates interfaces and binds afresh.  A
//! failed bind is logged and that address skipped.  When nothing could be
//! bound the pool falls back to a single wildcard socket; if even that fails
//! the pool stays empty and the next broadcast reports zero sends.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::interfaces::{self, InterfaceAddress};
use crate::application::session_manager::ProbeSocketPool;

/// Largest datagram the reader accepts.  Advertisements are far smaller.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// A socket failed to bind during pool setup.
#[derive(Debug, Error)]
#[error("failed to bind discovery socket on {addr}: {source}")]
pub struct BindError {
    pub addr: SocketAddrV4,
    #[source]
    pub source: io::Error,
}

/// A datagram received on one of the pooled sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

/// Produces the addresses to bind on each rebuild.
pub type Enumerator = Box<dyn Fn() -> Vec<InterfaceAddress> + Send>;

/// One bound socket and its reader task.
struct NetworkInterfaceBinding {
    name: String,
    local: SocketAddr,
    broadcast: Option<Ipv4Addr>,
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

impl NetworkInterfaceBinding {
    /// Destinations for one probe: the directed broadcast (when known and
    /// distinct) then the limited broadcast.
    fn targets(&self, port: u16) -> Vec<SocketAddr> {
        let mut targets = Vec::with_capacity(2);
        if let Some(directed) = self.broadcast.filter(|b| *b != Ipv4Addr::BROADCAST) {
            targets.push(SocketAddr::from((directed, port)));
        }
        targets.push(SocketAddr::from((Ipv4Addr::BROADCAST, port)));
        targets
    }
}

impl Drop for NetworkInterfaceBinding {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// The pool of discovery sockets.
pub struct DiscoverySocketPool {
    bindings: Vec<NetworkInterfaceBinding>,
    enumerate: Enumerator,
    datagrams: mpsc::UnboundedSender<Datagram>,
}

impl DiscoverySocketPool {
    /// Creates an empty pool that enumerates the host's interfaces.
    ///
    /// Nothing is bound until the first [`ProbeSocketPool::rebuild`].
    pub fn new(datagrams: mpsc::UnboundedSender<Datagram>) -> Self {
        Self::with_enumerator(datagrams, Box::new(interfaces::enumerate))
    }

    /// Creates an empty pool with a custom address source.
    pub fn with_enumerator(datagrams: mpsc::UnboundedSender<Datagram>, enumerate: Enumerator) -> Self {
        Self {
            bindings: Vec::new(),
            enumerate,
            datagrams,
        }
    }

    /// Local addresses of the bound sockets.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bindings.iter().map(|b| b.local).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn add_binding(&mut self, name: &str, address: Ipv4Addr, broadcast: Option<Ipv4Addr>) -> Result<(), BindError> {
        let std_socket = bind_probe_socket(address)?;
        let addr = SocketAddrV4::new(address, 0);
        let socket = UdpSocket::from_std(std_socket).map_err(|source| BindError { addr, source })?;
        let local = socket.local_addr().map_err(|source| BindError { addr, source })?;
        let socket = Arc::new(socket);

        let reader = tokio::spawn(read_loop(Arc::clone(&socket), self.datagrams.clone()));
        debug!("discovery socket bound on {local} ({name})");

        self.bindings.push(NetworkInterfaceBinding {
            name: name.to_string(),
            local,
            broadcast,
            socket,
            reader,
        });
        Ok(())
    }
}

impl ProbeSocketPool for DiscoverySocketPool {
    fn rebuild(&mut self) -> usize {
        self.bindings.clear();

        for iface in (self.enumerate)() {
            if let Err(e) = self.add_binding(&iface.name, iface.address, iface.broadcast) {
                warn!("skipping interface {}: {e}", iface.name);
            }
        }

        if self.bindings.is_empty() {
            info!("no interface socket could be bound; falling back to the wildcard address");
            if let Err(e) = self.add_binding("*", Ipv4Addr::UNSPECIFIED, None) {
                warn!("{e}");
            }
        }
        self.bindings.len()
    }

    fn broadcast(&mut self, payload: &[u8], port: u16) -> usize {
        let mut sent = 0;
        for binding in &self.bindings {
            for target in binding.targets(port) {
                match binding.socket.try_send_to(payload, target) {
                    Ok(_) => sent += 1,
                    Err(e) => debug!("probe from {} ({}) to {target} failed: {e}", binding.local, binding.name),
                }
            }
        }
        sent
    }
}

/// Creates a non-blocking UDP socket bound to `(address, 0)`.
fn bind_probe_socket(address: Ipv4Addr) -> Result<std::net::UdpSocket, BindError> {
    let addr = SocketAddrV4::new(address, 0);
    let configure = || -> io::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_multicast_loop_v4(true)?;
        if !address.is_unspecified() {
            socket.set_multicast_if_v4(&address)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::V4(addr).into())?;
        Ok(socket)
    };
    configure()
        .map(std::net::UdpSocket::from)
        .map_err(|source| BindError { addr, source })
}

/// Forwards datagrams until the socket is closed or the receiver is gone.
async fn read_loop(socket: Arc<UdpSocket>, tx: mpsc::UnboundedSender<Datagram>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let datagram = Datagram {
                    from,
                    payload: buf[..len].to_vec(),
                };
                if tx.send(datagram).is_err() {
                    return;
                }
            }
            // ICMP unreachable replies to earlier probes surface here on some
            // platforms; the socket is still usable.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                ) =>
            {
                debug!("ignoring discovery socket error: {e}");
            }
            Err(e) => {
                warn!("discovery socket read failed: {e}");
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

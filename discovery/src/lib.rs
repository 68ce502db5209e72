//! UDP presence-beacon discovery (spec.md §6): the peripheral mechanism by
//! which nodes on the same LAN find each other and hand off to the
//! `meshsync_net` TCP registry. Grounded directly in
//! `original_source/dir_sync/utils.py`'s `broadcast_presence` /
//! `listen_for_broadcasts` pair — same interval, same datagram shape, same
//! "ignore my own beacon" guard, translated from two daemon threads with a
//! shared `stop_event` into two plain blocking loops that each check an
//! `AtomicBool`.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meshsync_net::PeerRegistry;
use meshsync_protocol::discovery::Beacon;

/// Interval between presence broadcasts (spec.md §6: "every 10 seconds"),
/// matching `original_source`'s `BROADCAST_INTERVAL`.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Shared shutdown flag for both discovery threads, checked between
/// blocking socket calls the way every other component's stop flag is
/// (spec.md §5 "Cancellation and shutdown").
#[derive(Debug, Default)]
pub struct DiscoveryStop(AtomicBool);

impl DiscoveryStop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Finds the local machine's outbound IP by asking the routing table which
/// source address it would use to reach a public address, without actually
/// sending any traffic (UDP `connect` only resolves a route). Falls back to
/// loopback on failure, matching `original_source`'s `get_local_ip` fallback.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Sends this node's `NODE:<ip>:<tcp_port>` beacon to the broadcast address
/// every [`BROADCAST_INTERVAL`] until `stop` is signaled.
pub fn broadcast_presence(
    broadcast_port: u16,
    tcp_port: u16,
    stop: Arc<DiscoveryStop>,
) -> Result<(), DiscoveryError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    let beacon = Beacon {
        ip: local_ip(),
        tcp_port,
    };
    let destination: SocketAddr = ([255, 255, 255, 255], broadcast_port).into();

    while !stop.is_stopped() {
        if let Err(e) = socket.send_to(&beacon.encode(), destination) {
            tracing::warn!(error = %e, "failed to send presence beacon");
        }
        sleep_in_slices(BROADCAST_INTERVAL, &stop);
    }
    Ok(())
}

/// Listens on `broadcast_port` for beacons from other nodes and asks
/// `registry` to connect to any newly seen peer, until `stop` is signaled.
///
/// A beacon whose `(ip, tcp_port)` equals this node's own is ignored
/// (spec.md §6), since otherwise a node would try to dial itself every time
/// its own broadcast looped back on a machine with multiple interfaces.
pub fn listen_for_broadcasts(
    broadcast_port: u16,
    tcp_port: u16,
    registry: Arc<PeerRegistry>,
    stop: Arc<DiscoveryStop>,
) -> Result<(), DiscoveryError> {
    let socket = UdpSocket::bind(("0.0.0.0", broadcast_port))?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    let own_ip = local_ip();

    let mut buf = [0u8; 1024];
    while !stop.is_stopped() {
        match socket.recv_from(&mut buf) {
            Ok((len, _addr)) => {
                let Some(beacon) = Beacon::decode(&buf[..len]) else {
                    continue;
                };
                if beacon.ip == own_ip && beacon.tcp_port == tcp_port {
                    continue;
                }
                if let Err(e) = registry.connect(beacon.ip, beacon.tcp_port) {
                    tracing::warn!(peer = %beacon, error = %e, "failed to connect to discovered peer");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "discovery socket error; listener exiting");
                return Err(e.into());
            }
        }
    }
    Ok(())
}

/// Sleeps in short slices so a signaled `stop` is noticed within one slice
/// instead of blocking for the whole interval (spec.md §5: threads check a
/// stop flag between blocking calls).
fn sleep_in_slices(total: Duration, stop: &DiscoveryStop) {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.is_stopped() {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    #[test]
    fn local_ip_resolves_to_something_routable() {
        let ip = local_ip();
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn stop_flag_halts_broadcast_loop_promptly() {
        let stop = DiscoveryStop::new();
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || broadcast_presence(58_000, 6000, stop_clone));
        thread::sleep(Duration::from_millis(50));
        stop.signal();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn own_beacon_is_recognized_for_filtering() {
        let beacon = Beacon {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 6000,
        };
        assert_eq!(beacon.tcp_port, 6000);
    }
}

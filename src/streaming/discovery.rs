//! UDP discovery broadcast
//!
//! Lets the wearable find the service without typing an IP. Every
//! `interval` a JSON announcement is sent to the broadcast addresses:
//!
//! ```json
//! {"service":"bio_signal_server","ip":"192.168.1.20","tcp_port":8000,
//!  "timestamp":1738045825.1,"status":"online"}
//! ```
//!
//! Broadcasting is best-effort: send errors are logged and the loop carries
//! on. The wait between announcements is cut into `tick` sleeps so stop is
//! observed within one tick.

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Service name carried in every announcement
pub const SERVICE_NAME: &str = "bio_signal_server";

/// Discovery announcement payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub service: String,
    pub ip: String,
    pub tcp_port: u16,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub status: String,
}

impl Announcement {
    pub fn online(ip: IpAddr, tcp_port: u16) -> Self {
        let now = chrono::Utc::now();
        Self {
            service: SERVICE_NAME.to_string(),
            ip: ip.to_string(),
            tcp_port,
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            status: "online".to_string(),
        }
    }

    /// Address the client should connect to
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.ip.parse()?;
        Ok(SocketAddr::new(ip, self.tcp_port))
    }
}

/// IP of the interface used for outbound traffic
///
/// Connecting a UDP socket sends nothing; it only selects a route. Falls
/// back to loopback when there is no route (offline host).
pub fn local_ip() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            log::debug!("Local IP detection failed ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// `a.b.c.255` for an IPv4 address
pub fn subnet_broadcast(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) if !v4.is_unspecified() => {
            let [a, b, c, _] = v4.octets();
            Some(Ipv4Addr::new(a, b, c, 255))
        }
        _ => None,
    }
}

/// Periodic announcement sender
pub struct DiscoveryBroadcaster {
    config: DiscoveryConfig,
    tcp_port: u16,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryBroadcaster {
    pub fn new(config: DiscoveryConfig, tcp_port: u16) -> Self {
        Self {
            config,
            tcp_port,
            active: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start broadcasting; a no-op if already running
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let targets = self.resolve_targets()?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;

        self.active.store(true, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let interval = self.config.interval();
        let tick = self.config.tick();
        let port = self.config.port;
        let tcp_port = self.tcp_port;
        let fixed_targets = !self.config.targets.is_empty();

        let handle = thread::Builder::new()
            .name("discovery".to_string())
            .spawn(move || {
                log::info!("Discovery broadcast started on UDP port {}", port);
                let mut sent = 0u64;
                while active.load(Ordering::Relaxed) {
                    let ip = local_ip();
                    let destinations = if fixed_targets {
                        targets.clone()
                    } else {
                        default_destinations(ip)
                    };
                    if broadcast_once(&socket, ip, tcp_port, port, &destinations) {
                        sent += 1;
                        if sent == 1 {
                            log::info!("Announcing service at {}:{}", ip, tcp_port);
                        }
                    }

                    let mut waited = Duration::ZERO;
                    while waited < interval && active.load(Ordering::Relaxed) {
                        thread::sleep(tick);
                        waited += tick;
                    }
                }
                log::info!("Discovery broadcast stopped ({} announcements)", sent);
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop broadcasting and wait for the thread; a no-op if not running
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("Discovery thread panicked");
        }
    }

    pub fn is_broadcasting(&self) -> bool {
        self.active.load(Ordering::Relaxed) && self.handle.is_some()
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    fn resolve_targets(&self) -> Result<Vec<IpAddr>> {
        self.config
            .targets
            .iter()
            .map(|t| t.trim().parse::<IpAddr>().map_err(Error::from))
            .collect()
    }
}

impl Drop for DiscoveryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn default_destinations(ip: IpAddr) -> Vec<IpAddr> {
    let mut destinations = vec![IpAddr::V4(Ipv4Addr::BROADCAST)];
    if let Some(subnet) = subnet_broadcast(ip) {
        destinations.push(IpAddr::V4(subnet));
    }
    destinations
}

/// Send one announcement to every destination; true if any send succeeded
fn broadcast_once(
    socket: &UdpSocket,
    ip: IpAddr,
    tcp_port: u16,
    port: u16,
    destinations: &[IpAddr],
) -> bool {
    let payload = match serde_json::to_vec(&Announcement::online(ip, tcp_port)) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("Failed to encode announcement: {}", e);
            return false;
        }
    };

    let mut any = false;
    for dest in destinations {
        match socket.send_to(&payload, SocketAddr::new(*dest, port)) {
            Ok(_) => any = true,
            Err(e) => log::warn!("Discovery send to {}:{} failed: {}", dest, port, e),
        }
    }
    any
}

/// Wait for an announcement on `port`
///
/// Returns `Ok(None)` if nothing valid arrives before `timeout`. Datagrams
/// that are not `bio_signal_server` announcements are ignored.
pub fn discover_service(port: u16, timeout: Duration) -> Result<Option<Announcement>> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket.set_read_timeout(Some(remaining))?;

        match socket.recv_from(&mut buf) {
            Ok((n, from)) => match serde_json::from_slice::<Announcement>(&buf[..n]) {
                Ok(announcement) if announcement.service == SERVICE_NAME => {
                    log::debug!("Discovered {:?} from {}", announcement, from);
                    return Ok(Some(announcement));
                }
                Ok(_) => {}
                Err(e) => log::debug!("Ignoring datagram from {}: {}", from, e),
            },
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_udp_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_subnet_broadcast() {
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(subnet_broadcast(ip), Some(Ipv4Addr::new(192, 168, 1, 255)));
        assert_eq!(subnet_broadcast("::1".parse().unwrap()), None);
        assert_eq!(subnet_broadcast(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), None);
    }

    #[test]
    fn test_announcement_payload() {
        let announcement = Announcement::online("10.0.0.5".parse().unwrap(), 8000);
        let json: serde_json::Value = serde_json::to_value(&announcement).unwrap();
        assert_eq!(json["service"], "bio_signal_server");
        assert_eq!(json["ip"], "10.0.0.5");
        assert_eq!(json["tcp_port"], 8000);
        assert_eq!(json["status"], "online");
        assert!(json["timestamp"].as_f64().unwrap() > 1.0e9);
        assert_eq!(
            announcement.tcp_addr().unwrap(),
            "10.0.0.5:8000".parse().unwrap()
        );
    }

    #[test]
    fn test_local_ip_never_unspecified() {
        assert!(!local_ip().is_unspecified());
    }

    #[test]
    fn test_broadcast_to_loopback_target() {
        let port = free_udp_port();
        let config = DiscoveryConfig {
            enabled: true,
            port,
            interval_ms: 50,
            tick_ms: 10,
            targets: vec!["127.0.0.1".to_string()],
        };
        let listener = thread::spawn(move || discover_service(port, Duration::from_secs(3)));
        thread::sleep(Duration::from_millis(50));

        let mut broadcaster = DiscoveryBroadcaster::new(config, 8123);
        broadcaster.start().unwrap();
        // Second start is a no-op
        broadcaster.start().unwrap();
        assert!(broadcaster.is_broadcasting());

        let found = listener.join().unwrap().unwrap().expect("announcement");
        assert_eq!(found.service, SERVICE_NAME);
        assert_eq!(found.tcp_port, 8123);

        broadcaster.stop();
        broadcaster.stop();
        assert!(!broadcaster.is_broadcasting());
    }

    #[test]
    fn test_invalid_target_rejected() {
        let config = DiscoveryConfig {
            targets: vec!["not-an-ip".to_string()],
            ..DiscoveryConfig::default()
        };
        let mut broadcaster = DiscoveryBroadcaster::new(config, 8000);
        assert!(matches!(broadcaster.start(), Err(Error::AddrParse(_))));
        assert!(!broadcaster.is_broadcasting());
    }

    #[test]
    fn test_discover_times_out() {
        let port = free_udp_port();
        let found = discover_service(port, Duration::from_millis(50)).unwrap();
        assert!(found.is_none());
    }
}

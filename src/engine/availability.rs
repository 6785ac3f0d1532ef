//! Reachability gate run before the collector is spawned.
//!
//! A device counts as available when it answers one ICMP echo and, for a
//! positive port, accepts a TCP connection. Every failure is reported as
//! `false`; nothing here returns an error to the caller.

use async_trait::async_trait;
use rand::random;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn probe(&self, ip: &str, port: i32) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

pub struct AvailabilityProber {
    config: ProbeConfig,
    // `None` when the process may not open ICMP sockets; the system `ping`
    // binary is used instead.
    icmp_v4: Option<surge_ping::Client>,
    icmp_v6: Option<surge_ping::Client>,
    // Replies are matched by host and sequence, so concurrent probes of one
    // host must not reuse a sequence number.
    sequence: AtomicU16,
}

impl AvailabilityProber {
    pub fn new(config: ProbeConfig) -> Self {
        let icmp_v4 = match surge_ping::Client::new(&surge_ping::Config::default()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Cannot open ICMPv4 socket, falling back to system ping.");
                None
            }
        };
        let v6_config = surge_ping::Config::builder()
            .kind(surge_ping::ICMP::V6)
            .build();
        let icmp_v6 = match surge_ping::Client::new(&v6_config) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!(error = %e, "Cannot open ICMPv6 socket, falling back to system ping.");
                None
            }
        };

        Self {
            config,
            icmp_v4,
            icmp_v6,
            sequence: AtomicU16::new(0),
        }
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    async fn ping(&self, addr: IpAddr) -> bool {
        let client = match addr {
            IpAddr::V4(_) => self.icmp_v4.as_ref(),
            IpAddr::V6(_) => self.icmp_v6.as_ref(),
        };
        match client {
            Some(client) => {
                let mut pinger = client
                    .pinger(addr, surge_ping::PingIdentifier(random()))
                    .await;
                pinger.timeout(self.config.ping_timeout);
                let sequence = self.next_sequence();
                match pinger.ping(surge_ping::PingSequence(sequence), &[]).await {
                    Ok((_reply, rtt)) => {
                        debug!(%addr, rtt_ms = rtt.as_millis() as u64, "ICMP echo answered.");
                        true
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "ICMP echo failed.");
                        false
                    }
                }
            }
            None => system_ping(addr, self.config.ping_timeout).await,
        }
    }
}

#[async_trait]
impl AvailabilityProbe for AvailabilityProber {
    async fn probe(&self, ip: &str, port: i32) -> bool {
        let Some(addr) = resolve(ip).await else {
            warn!(ip = %ip, "Invalid or unresolvable address.");
            return false;
        };

        if !self.ping(addr).await {
            warn!(ip = %ip, "Ping failed.");
            return false;
        }

        if port > 0 && !check_port(addr, port, self.config.connect_timeout).await {
            warn!(ip = %ip, port = port, "Port is not open.");
            return false;
        }

        info!(ip = %ip, port = port, "Device is available.");
        true
    }
}

async fn resolve(ip: &str) -> Option<IpAddr> {
    let ip = ip.trim();
    if ip.is_empty() {
        return None;
    }
    if let Ok(addr) = ip.parse::<IpAddr>() {
        return Some(addr);
    }
    match tokio::net::lookup_host(format!("{ip}:0")).await {
        Ok(mut addrs) => addrs.next().map(|a| a.ip()),
        Err(e) => {
            debug!(host = %ip, error = %e, "DNS resolution failed.");
            None
        }
    }
}

/// Runs `ping -c 1` with the wait bound in whole seconds. The child is
/// killed if it outlives twice that bound.
async fn system_ping(addr: IpAddr, wait: Duration) -> bool {
    let wait_secs = wait.as_secs().max(1);
    let mut command = Command::new("ping");
    command
        .args(["-c", "1", "-W", &wait_secs.to_string(), &addr.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(%addr, error = %e, "Failed to spawn ping.");
            return false;
        }
    };

    match timeout(wait * 2, child.wait()).await {
        Ok(Ok(status)) if status.success() => true,
        Ok(Ok(status)) => {
            debug!(%addr, ?status, "Ping exited unsuccessfully.");
            false
        }
        Ok(Err(e)) => {
            warn!(%addr, error = %e, "Failed to wait for ping.");
            false
        }
        Err(_) => {
            warn!(%addr, "Ping process timed out.");
            if let Err(e) = child.kill().await {
                warn!(%addr, error = %e, "Failed to kill ping process.");
            }
            false
        }
    }
}

async fn check_port(addr: IpAddr, port: i32, connect_timeout: Duration) -> bool {
    let Ok(port) = u16::try_from(port) else {
        return false;
    };
    match timeout(connect_timeout, TcpStream::connect((addr, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!(%addr, port = port, error = %e, "TCP connect failed.");
            false
        }
        Err(_) => {
            debug!(%addr, port = port, "TCP connect timed out.");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_check_port_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(check_port(localhost, open_port as i32, Duration::from_secs(2)).await);

        drop(listener);
        assert!(!check_port(localhost, open_port as i32, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_check_port_rejects_out_of_range() {
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(!check_port(localhost, 70_000, Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_resolve() {
        assert_eq!(resolve("10.0.0.5").await, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(resolve("  ").await, None);
        assert_eq!(resolve("::1").await, Some("::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_probe_skips_port_check_for_non_positive_port() {
        let prober = AvailabilityProber::new(ProbeConfig::default());
        assert!(prober.probe("127.0.0.1", 0).await);
        assert!(prober.probe("127.0.0.1", -1).await);
    }

    #[tokio::test]
    async fn test_probe_checks_positive_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as i32;
        let prober = AvailabilityProber::new(ProbeConfig::default());

        assert!(prober.probe("127.0.0.1", port).await);

        drop(listener);
        assert!(!prober.probe("127.0.0.1", port).await);
    }

    #[test]
    fn test_sequence_numbers_advance_and_wrap() {
        let prober = AvailabilityProber {
            config: ProbeConfig::default(),
            icmp_v4: None,
            icmp_v6: None,
            sequence: AtomicU16::new(u16::MAX),
        };
        assert_eq!(prober.next_sequence(), u16::MAX);
        assert_eq!(prober.next_sequence(), 0);
        assert_eq!(prober.next_sequence(), 1);
    }

    #[tokio::test]
    async fn test_probe_empty_address_is_unavailable() {
        let prober = AvailabilityProber::new(ProbeConfig::default());
        assert!(!prober.probe("", 22).await);
    }
}

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use spinup_virt::{Hypervisor, VirtError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument};

use crate::registry::LookupError;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Virt(#[from] VirtError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("timed out waiting for {what} of domain '{domain}'")]
    Timeout { domain: String, what: &'static str },

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Shortest time one connect attempt is given before it counts as a miss.
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Optional end point for a wait loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|timeout| Instant::now() + timeout))
    }

    pub(crate) fn passed(&self) -> bool {
        self.0.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Waits for a started domain to become reachable.
pub struct Prober<'a> {
    hypervisor: &'a dyn Hypervisor,
    network: &'a str,
    port: u16,
    interval: Duration,
    timeout: Option<Duration>,
}

impl<'a> Prober<'a> {
    pub fn new(
        hypervisor: &'a dyn Hypervisor,
        network: &'a str,
        port: u16,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            hypervisor,
            network,
            port,
            interval,
            timeout,
        }
    }

    /// Dropped SYNs would otherwise stall an attempt for the kernel's connect timeout.
    fn connect_timeout(&self) -> Duration {
        self.interval.max(MIN_CONNECT_TIMEOUT)
    }

    /// Wait for an address lease, then for the administrative port to accept.
    #[instrument(skip(self))]
    pub async fn wait_ready(&self, domain: &str) -> Result<SocketAddr, ProbeError> {
        let ip = self.wait_for_address(domain).await?;
        info!("{domain} has address {ip}");
        let addr = self.wait_for_port(domain, ip).await?;
        info!("{domain} is accepting connections on {addr}");
        Ok(addr)
    }

    pub async fn wait_for_address(&self, domain: &str) -> Result<IpAddr, ProbeError> {
        let deadline = Deadline::after(self.timeout);
        loop {
            if let Some(ip) = current_address(self.hypervisor, self.network, domain).await? {
                return Ok(ip);
            }
            if deadline.passed() {
                return Err(ProbeError::Timeout {
                    domain: domain.to_owned(),
                    what: "an address lease",
                });
            }
            debug!("no lease for {domain} yet");
            sleep(self.interval).await;
        }
    }

    pub async fn wait_for_port(&self, domain: &str, ip: IpAddr) -> Result<SocketAddr, ProbeError> {
        let addr = SocketAddr::new(ip, self.port);
        let deadline = Deadline::after(self.timeout);
        loop {
            match timeout(self.connect_timeout(), TcpStream::connect(addr)).await {
                Err(_) => debug!("{addr} did not answer in time"),
                Ok(Ok(stream)) => {
                    drop(stream);
                    return Ok(addr);
                }
                Ok(Err(ref error))
                    if matches!(
                        error.kind(),
                        ErrorKind::ConnectionRefused
                            | ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::TimedOut
                    ) =>
                {
                    debug!("{addr} not open yet: {error}");
                }
                Ok(Err(source)) => return Err(ProbeError::Connect { addr, source }),
            }
            if deadline.passed() {
                return Err(ProbeError::Timeout {
                    domain: domain.to_owned(),
                    what: "the ssh port",
                });
            }
            sleep(self.interval).await;
        }
    }
}

/// The address currently leased to `domain`'s first interface, if any.
pub async fn current_address(
    hypervisor: &dyn Hypervisor,
    network: &str,
    domain: &str,
) -> Result<Option<IpAddr>, ProbeError> {
    let descriptor = hypervisor.descriptor(domain).await?;
    let mac = descriptor
        .primary_mac()
        .ok_or_else(|| LookupError::NoInterface {
            domain: domain.to_owned(),
        })?;
    let leases = hypervisor.leases(network).await?;
    Ok(leases
        .iter()
        .find(|lease| lease.matches_mac(mac))
        .map(|lease| lease.ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::render_domain;
    use crate::testing::{FakeHypervisor, machine};
    use std::path::Path;
    use tokio::net::TcpListener;

    async fn started(hypervisor: &FakeHypervisor) -> String {
        let spec = machine("lab", "web");
        let xml = render_domain(&spec, Path::new("/srv/lab"), "default").unwrap();
        let domain = spec.domain_name();
        hypervisor.define(&domain, &xml).await.unwrap();
        hypervisor.start(&domain).await.unwrap();
        domain
    }

    #[tokio::test]
    async fn finds_leased_address_and_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hypervisor = FakeHypervisor::with_loopback_leases("default");
        let domain = started(&hypervisor).await;

        let prober = Prober::new(
            &hypervisor,
            "default",
            port,
            Duration::from_millis(10),
            Some(Duration::from_secs(5)),
        );
        let addr = prober.wait_ready(&domain).await.unwrap();
        assert_eq!(addr, listener.local_addr().unwrap());
    }

    #[tokio::test]
    async fn lease_wait_honours_deadline() {
        let hypervisor = FakeHypervisor::new();
        let domain = started(&hypervisor).await;

        let prober = Prober::new(
            &hypervisor,
            "default",
            22,
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        );
        let err = prober.wait_for_address(&domain).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { what: "an address lease", .. }));
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let hypervisor = FakeHypervisor::new();
        let prober = Prober::new(
            &hypervisor,
            "default",
            addr.port(),
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        );
        let err = prober.wait_for_port("lab-web", addr.ip()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { what: "the ssh port", .. }));
    }

    #[test]
    fn connect_attempts_are_bounded() {
        let hypervisor = FakeHypervisor::new();
        let fast = Prober::new(&hypervisor, "default", 22, Duration::from_millis(5), None);
        assert_eq!(fast.connect_timeout(), MIN_CONNECT_TIMEOUT);
        let slow = Prober::new(&hypervisor, "default", 22, Duration::from_secs(3), None);
        assert_eq!(slow.connect_timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn missing_interface_is_a_lookup_error() {
        let hypervisor = FakeHypervisor::new();
        hypervisor
            .define("bare", "<domain><name>bare</name></domain>")
            .await
            .unwrap();
        let err = current_address(&hypervisor, "default", "bare").await.unwrap_err();
        assert!(matches!(err, ProbeError::Lookup(LookupError::NoInterface { .. })));
    }
}

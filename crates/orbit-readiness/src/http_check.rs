//! HTTP readiness check.
//!
//! Used for resources whose readiness is only observable from the outside,
//! e.g. an ingress that is ready once its address starts answering.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::poller::{ProbeStatus, ReadinessCheck};

/// Probes `http://{address}{path}` and reports READY on a 2xx response.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    address: String,
    path: String,
    timeout: Duration,
}

impl HttpCheck {
    /// `address` is `host`, `host:port`, a bare IPv4/IPv6 address, or
    /// `[v6]:port`; port 80 is assumed when absent.
    pub fn new(address: &str, path: &str, timeout: Duration) -> Self {
        let address = with_port(address, 80);
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            address,
            path,
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ReadinessCheck for HttpCheck {
    async fn check(&self) -> ProbeStatus {
        http_probe(&self.address, &self.path, self.timeout).await
    }
}

/// Normalize `address` to `host:port`, bracketing bare IPv6 addresses.
fn with_port(address: &str, default_port: u16) -> String {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return addr.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{default_port}"),
    }
}

/// Perform a single HTTP GET against an endpoint.
///
/// Returns `Ready` for a 2xx response. Anything else, including connection
/// failures and timeouts, is `Pending`: a fresh address is expected to
/// refuse connections for a while before it starts serving.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeStatus {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe connection failed");
                return ProbeStatus::Pending;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe handshake failed");
                return ProbeStatus::Pending;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "orbit-readiness/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => return ProbeStatus::Error(format!("invalid probe request {uri}: {e}")),
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeStatus::Ready,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "readiness probe non-2xx");
                ProbeStatus::Pending
            }
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe request failed");
                ProbeStatus::Pending
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "readiness probe timed out");
        ProbeStatus::Pending
    })
}

//! HTTP stats endpoint.
//!
//! Serves `GET /stats` with the counters of every registered link:
//!
//! ```json
//! {
//!   "uptime_secs": 12,
//!   "links": [
//!     { "node_id": 1, "frames_sent": 14, "frames_received": 9, ... }
//!   ]
//! }
//! ```

use super::LinkStats;
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Poll period of the accept loop; bounds shutdown latency.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Background HTTP server for [`LinkStats`].
///
/// Drop it to stop the server.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_port: u16,
}

impl StatsServer {
    /// Start serving on `bind_addr:port` (`None` binds 0.0.0.0; port 0 picks
    /// a free port).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        links: Vec<Arc<LinkStats>>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let local_port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .unwrap_or(port);

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || {
            Self::run_server(server, links, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_port,
        })
    }

    /// Port actually bound.
    pub fn port(&self) -> u16 {
        self.local_port
    }

    fn run_server(server: Server, links: Vec<Arc<LinkStats>>, shutdown: Arc<AtomicBool>) {
        let started = Instant::now();
        let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok();
        let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok();

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            let request = match server.recv_timeout(RECV_TIMEOUT) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server error: {}", e);
                    break;
                }
            };

            if request.method() != &Method::Get {
                let mut response = Response::from_string("Method Not Allowed").with_status_code(405);
                if let Some(h) = allow_get.clone() {
                    response = response.with_header(h);
                }
                let _ = request.respond(response);
                continue;
            }

            let path = request.url().to_string();
            let result = match path.as_str() {
                "/stats" | "/stats/" => {
                    let body = render(started, &links);
                    let mut response = Response::from_string(body).with_status_code(200);
                    if let Some(h) = content_type.clone() {
                        response = response.with_header(h);
                    }
                    request.respond(response)
                }
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
            if let Err(e) = result {
                warn!("Failed to send stats response: {}", e);
            }
        }
    }

    /// Stop the server. May take up to one accept poll period.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render(started: Instant, links: &[Arc<LinkStats>]) -> String {
    let snapshots: Vec<_> = links.iter().map(|s| s.snapshot()).collect();
    serde_json::json!({
        "uptime_secs": started.elapsed().as_secs(),
        "links": snapshots,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        )
        .unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn test_render_lists_links() {
        let a = Arc::new(LinkStats::new());
        let b = Arc::new(LinkStats::new());
        a.set_node_id(1);
        b.set_node_id(2);
        LinkStats::bump(&b.frames_sent);

        let body = render(Instant::now(), &[a, b]);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["links"][0]["node_id"], 1);
        assert_eq!(value["links"][1]["frames_sent"], 1);
    }

    #[test]
    fn test_serves_stats_and_404() {
        let stats = Arc::new(LinkStats::new());
        stats.set_node_id(9);
        let mut server =
            StatsServer::start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0, vec![stats]).unwrap();
        let port = server.port();

        let ok = get(port, "/stats");
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(ok.contains("\"node_id\":9"));

        let missing = get(port, "/nope");
        assert!(missing.starts_with("HTTP/1.1 404"));

        server.stop();
    }
}

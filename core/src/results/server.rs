//! TCP server answering volume-result lookups from the presentation-side
//! client. One client at a time, one request per connection: a 4-digit
//! zero-padded volume index in, a length-prefixed JSON mapping out.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;

use crate::prelude::{AnalysisResult, ScanError, ScanResult};
use crate::results::store::{ResultsStore, FOUND_RESULTS_KEY};
use crate::telemetry::{LogManager, MetricsSnapshot, SessionMetrics};

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_LEN: usize = 4;

/// Settings for the client-facing results socket.
#[derive(Debug, Clone)]
pub struct ResultsSettings {
    pub bind_host: String,
    pub bind_port: u16,
    /// Advisory accept-queue depth; the OS listen backlog applies.
    pub max_pending_clients: usize,
}

struct ResultsShared {
    store: ResultsStore,
    alive: AtomicBool,
    metrics: SessionMetrics,
}

pub struct ResultsServer {
    shared: Arc<ResultsShared>,
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl ResultsServer {
    /// Bind the results socket and spawn the accept loop. A bind failure
    /// surfaces immediately.
    pub fn start(settings: ResultsSettings) -> ScanResult<Self> {
        let listener = TcpListener::bind((settings.bind_host.as_str(), settings.bind_port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ResultsShared {
            store: ResultsStore::new(),
            alive: AtomicBool::new(true),
            metrics: SessionMetrics::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("results-server".into())
            .spawn(move || serve(listener, loop_shared))?;

        let logger = LogManager::new("results-server");
        logger.record(&format!(
            "listening on {} (up to {} queued clients)",
            local_addr, settings.max_pending_clients
        ));

        Ok(Self {
            shared,
            local_addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Insert or overwrite the stored result for a volume. Safe to call
    /// while a lookup for another index is in flight.
    pub fn update_results(&self, vol_idx: usize, result: AnalysisResult) {
        LogManager::new("results-server")
            .record_debug(&format!("volIdx {} added to results store", vol_idx));
        self.shared.store.insert(vol_idx, result);
    }

    /// In-process lookup with the same semantics as the wire protocol.
    pub fn request_lookup(&self, vol_idx: usize) -> AnalysisResult {
        self.shared.store.lookup(vol_idx)
    }

    pub fn num_results(&self) -> usize {
        self.shared.store.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Serialize the whole mapping to a JSON file.
    pub fn save_results(&self, path: &Path) -> ScanResult<()> {
        self.shared.store.save(path)
    }

    /// Stop accepting and release the socket. Idempotent.
    pub fn shutdown(&mut self) {
        let was_alive = self.shared.alive.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if was_alive {
            LogManager::new("results-server").record("shut down");
        }
    }
}

impl Drop for ResultsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: TcpListener, shared: Arc<ResultsShared>) {
    let logger = LogManager::new("results-server");
    while shared.alive.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                logger.record_debug(&format!("client connected from {}", peer_addr));
                let _ = stream.set_nonblocking(false);
                // a malformed or stalled client costs one connection, never
                // the accept loop
                if let Err(err) = handle_client(stream, &shared, &logger) {
                    shared.metrics.record_error();
                    logger.record_warn(&format!("client request failed: {}", err));
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                if shared.alive.load(Ordering::SeqCst) {
                    logger.record_warn(&format!("accept failed: {}", err));
                }
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_client(
    mut stream: TcpStream,
    shared: &ResultsShared,
    logger: &LogManager,
) -> ScanResult<()> {
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;

    let mut request = [0u8; REQUEST_LEN];
    stream.read_exact(&mut request)?;
    let text = std::str::from_utf8(&request)
        .map_err(|_| ScanError::Protocol("request is not valid UTF-8".into()))?;
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ScanError::Protocol(format!(
            "malformed volume request {:?}",
            text
        )));
    }
    let vol_idx: usize = text
        .parse()
        .map_err(|_| ScanError::Protocol(format!("unparsable volume request {:?}", text)))?;

    let response = shared.store.lookup(vol_idx);
    let body = serde_json::to_vec(&response)?;
    stream.write_all(format!("{}\n", body.len()).as_bytes())?;
    stream.write_all(&body)?;
    let _ = stream.shutdown(Shutdown::Both);

    shared.metrics.record_result_served();
    let found = response.get(FOUND_RESULTS_KEY) == Some(&Value::Bool(true));
    logger.record(&format!("served volIdx {} (found: {})", vol_idx, found));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::BufRead;

    fn start_server() -> ResultsServer {
        ResultsServer::start(ResultsSettings {
            bind_host: "127.0.0.1".into(),
            bind_port: 0,
            max_pending_clients: 5,
        })
        .unwrap()
    }

    fn result_with(key: &str, value: f64) -> AnalysisResult {
        let mut result = AnalysisResult::new();
        result.insert(key.into(), json!(value));
        result
    }

    /// Client helper speaking the documented wire protocol: 4 request
    /// bytes out, `<len>\n` + body back.
    fn request(addr: SocketAddr, request_bytes: &[u8]) -> std::io::Result<serde_json::Value> {
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(request_bytes)?;

        let mut reader = std::io::BufReader::new(stream);
        let mut length_line = String::new();
        reader.read_line(&mut length_line)?;
        let length: usize = length_line.trim().parse().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad length header")
        })?;

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body)?;
        serde_json::from_slice(&body)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    #[test]
    fn lookup_round_trip_over_the_wire() {
        let mut server = start_server();
        server.update_results(0, result_with("average", 1000.1));
        server.update_results(1, result_with("average", 1000.2));

        let response = request(server.local_addr(), b"0000").unwrap();
        assert_eq!(response["foundResults"], json!(true));
        assert_eq!(response["average"], json!(1000.1));

        let response = request(server.local_addr(), b"0001").unwrap();
        assert_eq!(response["average"], json!(1000.2));

        let response = request(server.local_addr(), b"0002").unwrap();
        assert_eq!(response, json!({ "foundResults": false }));

        server.shutdown();
    }

    #[test]
    fn zero_padded_indices_resolve_to_the_same_slot() {
        let mut server = start_server();
        server.update_results(4, result_with("median", 12.5));

        let response = request(server.local_addr(), b"0004").unwrap();
        assert_eq!(response["foundResults"], json!(true));
        assert_eq!(response["median"], json!(12.5));
        server.shutdown();
    }

    #[test]
    fn malformed_request_does_not_kill_the_accept_loop() {
        let mut server = start_server();
        server.update_results(1, result_with("average", 2432.0));

        // non-numeric request: the server drops the connection
        {
            let mut stream = TcpStream::connect(server.local_addr()).unwrap();
            stream.write_all(b"abcd").unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink);
        }

        // a subsequent well-formed request still succeeds
        let response = request(server.local_addr(), b"0001").unwrap();
        assert_eq!(response["foundResults"], json!(true));
        assert_eq!(server.metrics().connection_errors, 1);
        server.shutdown();
    }

    #[test]
    fn in_process_lookup_matches_wire_semantics() {
        let mut server = start_server();
        server.update_results(2, result_with("average", 7.25));

        let found = server.request_lookup(2);
        assert_eq!(found["foundResults"], json!(true));
        let missing = server.request_lookup(3);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["foundResults"], json!(false));
        server.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_releases_the_port() {
        let mut server = start_server();
        let addr = server.local_addr();
        server.shutdown();
        server.shutdown();
        assert!(TcpListener::bind(addr).is_ok());
    }
}

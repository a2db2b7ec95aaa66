//! Socket server that owns the scanner connection: performs the echo
//! handshake, decodes each header/payload pair into the 4D series buffer,
//! marks arrival, and confirms every volume back to the sender.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ndarray::Array3;

use crate::prelude::{ScanError, ScanResult};
use crate::receiver::buffer::SeriesBuffer;
use crate::receiver::completion::CompletionTable;
use crate::series::{SeriesFormat, VolumeHeader};
use crate::telemetry::{LogManager, MetricsSnapshot, SessionMetrics};
use crate::transport::{FrameReader, FrameWriter};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Settings for the scanner-facing socket server.
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub bind_host: String,
    pub bind_port: u16,
    pub num_timepts: usize,
}

struct ReceiverShared {
    num_timepts: usize,
    completion: CompletionTable,
    series: RwLock<Option<SeriesBuffer>>,
    alive: AtomicBool,
    peer: Mutex<Option<TcpStream>>,
    metrics: SessionMetrics,
}

pub struct ScanReceiver {
    shared: Arc<ReceiverShared>,
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl ScanReceiver {
    /// Bind the scanner socket and spawn the receive loop. A bind failure
    /// surfaces immediately; everything after that runs on the receive
    /// thread.
    pub fn start(settings: ReceiverSettings) -> ScanResult<Self> {
        let listener = TcpListener::bind((settings.bind_host.as_str(), settings.bind_port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ReceiverShared {
            num_timepts: settings.num_timepts,
            completion: CompletionTable::new(settings.num_timepts),
            series: RwLock::new(None),
            alive: AtomicBool::new(true),
            peer: Mutex::new(None),
            metrics: SessionMetrics::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("scan-receiver".into())
            .spawn(move || serve(listener, loop_shared))?;

        let logger = LogManager::new("scan-receiver");
        logger.record(&format!(
            "listening on {} for {} timepoints",
            local_addr, settings.num_timepts
        ));

        Ok(Self {
            shared,
            local_addr,
            handle: Some(handle),
        })
    }

    /// Address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking volume fetch; `None` until the volume has fully
    /// arrived.
    pub fn get_volume(&self, vol_idx: usize) -> Option<Array3<f64>> {
        if !self.shared.completion.is_complete(vol_idx) {
            return None;
        }
        let guard = self.shared.series.read().unwrap();
        guard.as_ref().and_then(|buffer| buffer.volume(vol_idx))
    }

    /// Block up to `timeout` for the given volume's arrival.
    pub fn wait_for_volume(&self, vol_idx: usize, timeout: Duration) -> bool {
        self.shared.completion.wait_for(vol_idx, timeout)
    }

    /// Series format recorded from the first header, once one has arrived.
    pub fn get_format(&self) -> Option<SeriesFormat> {
        let guard = self.shared.series.read().unwrap();
        guard.as_ref().map(|buffer| buffer.format().clone())
    }

    /// Voxel-to-mm affine of the series, once the first volume has arrived.
    pub fn get_affine(&self) -> Option<[[f64; 4]; 4]> {
        self.get_format().map(|format| format.affine)
    }

    pub fn num_received(&self) -> usize {
        self.shared.completion.count_complete()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Archive the full 4D series (affine and TR included) as NIfTI-1.
    pub fn save_series(&self, path: &std::path::Path) -> ScanResult<()> {
        let guard = self.shared.series.read().unwrap();
        let buffer = guard.as_ref().ok_or_else(|| {
            ScanError::SeriesUnavailable("no volumes were received this session".into())
        })?;
        let format = buffer.format();
        crate::io::nifti::write_series(path, buffer.data(), &format.affine, format.tr)
    }

    /// Stop the receive loop and release the socket. Idempotent.
    pub fn shutdown(&mut self) {
        let was_alive = self.shared.alive.swap(false, Ordering::SeqCst);
        if let Some(peer) = self.shared.peer.lock().unwrap().take() {
            let _ = peer.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if was_alive {
            LogManager::new("scan-receiver").record("shut down");
        }
    }
}

impl Drop for ScanReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: TcpListener, shared: Arc<ReceiverShared>) {
    let logger = LogManager::new("scan-receiver");
    while shared.alive.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                logger.record(&format!("scanner connected from {}", peer_addr));
                let _ = stream.set_nodelay(true);
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                match stream.try_clone() {
                    Ok(clone) => *shared.peer.lock().unwrap() = Some(clone),
                    Err(err) => {
                        logger.record_warn(&format!("could not track peer socket: {}", err));
                        continue;
                    }
                }
                // a shutdown racing the accept must not leave this thread
                // blocked on an untracked peer
                if !shared.alive.load(Ordering::SeqCst) {
                    if let Some(peer) = shared.peer.lock().unwrap().take() {
                        let _ = peer.shutdown(Shutdown::Both);
                    }
                    break;
                }
                match handle_peer(stream, &shared, &logger) {
                    Ok(volumes) => logger.record(&format!(
                        "scanner connection closed after {} volumes",
                        volumes
                    )),
                    Err(err) => {
                        shared.metrics.record_error();
                        if shared.alive.load(Ordering::SeqCst) {
                            logger.record_warn(&format!("scanner connection failed: {}", err));
                        }
                    }
                }
                shared.peer.lock().unwrap().take();
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

fn handle_peer(
    stream: TcpStream,
    shared: &ReceiverShared,
    logger: &LogManager,
) -> ScanResult<usize> {
    let mut reader = FrameReader::new(BufReader::new(stream.try_clone()?));
    let mut writer = FrameWriter::new(BufWriter::new(stream));

    // handshake: echo the greeting back unmodified
    let greeting = reader.read_text()?;
    writer.write_text(&greeting)?;
    logger.record_debug(&format!("handshake echoed ({} bytes)", greeting.len()));

    let mut volumes = 0;
    while shared.alive.load(Ordering::SeqCst) {
        let header_frame = match reader.try_read_frame()? {
            Some(frame) => frame,
            None => break, // peer finished and closed cleanly
        };
        let header = VolumeHeader::from_json(&header_frame)?;
        if header.vol_idx >= shared.num_timepts {
            return Err(ScanError::Protocol(format!(
                "volIdx {} outside the expected {} timepoints",
                header.vol_idx, shared.num_timepts
            )));
        }

        let payload = reader.read_frame()?;
        if payload.len() != header.expected_payload_len() {
            return Err(ScanError::Protocol(format!(
                "volIdx {} payload is {} bytes, header declares {}",
                header.vol_idx,
                payload.len(),
                header.expected_payload_len()
            )));
        }
        let samples = header.dtype.decode(&payload)?;

        {
            let mut guard = shared.series.write().unwrap();
            if let Some(existing) = guard.as_ref() {
                existing.format().ensure_matches(&header)?;
            }
            let buffer = guard.get_or_insert_with(|| {
                logger.record(&format!(
                    "first header arrived: allocating {:?} x {} {} series",
                    header.shape, shared.num_timepts, header.dtype
                ));
                SeriesBuffer::new(SeriesFormat::from_header(&header), shared.num_timepts)
            });
            buffer.write_volume(header.vol_idx, &samples)?;
        }

        if !shared.completion.mark_complete(header.vol_idx) {
            logger.record_warn(&format!(
                "duplicate volIdx {}; keeping the latest payload",
                header.vol_idx
            ));
        }
        shared.metrics.record_volume();
        volumes += 1;

        // The sender may close right after its last payload without reading
        // this confirmation; a failed send must not kill the loop.
        let confirmation = format!("received volIdx {}", header.vol_idx);
        if let Err(err) = writer.write_text(&confirmation) {
            logger.record_debug(&format!(
                "confirmation for volIdx {} not delivered: {}",
                header.vol_idx, err
            ));
            break;
        }
        logger.record_debug(&format!(
            "stored volIdx {} ({} of {})",
            header.vol_idx,
            shared.completion.count_complete(),
            shared.num_timepts
        ));
    }
    Ok(volumes)
}

//! Client half of the volume transport: connects to a scan receiver,
//! performs the echo handshake, and streams volumes in lockstep, blocking
//! on each confirmation before the next send.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crate::prelude::{ScanError, ScanResult};
use crate::series::VolumeHeader;
use crate::telemetry::LogManager;
use crate::transport::frame::{FrameReader, FrameWriter};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct VolumeSender {
    reader: FrameReader<BufReader<TcpStream>>,
    writer: FrameWriter<BufWriter<TcpStream>>,
    logger: LogManager,
}

impl VolumeSender {
    pub fn connect(addr: SocketAddr) -> ScanResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = FrameReader::new(BufReader::new(stream.try_clone()?));
        let writer = FrameWriter::new(BufWriter::new(stream));
        Ok(Self {
            reader,
            writer,
            logger: LogManager::new("volume-sender"),
        })
    }

    /// Connect, retrying until the receiver starts accepting or the timeout
    /// elapses.
    pub fn connect_with_retry(addr: SocketAddr, timeout: Duration) -> ScanResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(addr) {
                Ok(sender) => return Ok(sender),
                Err(err) if Instant::now() >= deadline => return Err(err),
                Err(_) => thread::sleep(RETRY_INTERVAL),
            }
        }
    }

    /// Send the greeting and verify the receiver echoes it unmodified.
    pub fn handshake(&mut self, greeting: &str) -> ScanResult<()> {
        self.writer.write_text(greeting)?;
        let echo = self.reader.read_text()?;
        if echo != greeting {
            return Err(ScanError::HandshakeFailed(format!(
                "expected echo of {:?}, received {:?}",
                greeting, echo
            )));
        }
        self.logger.record_debug("handshake confirmed");
        Ok(())
    }

    /// Send one volume (header frame, then payload frame) and block until
    /// the receiver's confirmation arrives. Returns the confirmation text.
    pub fn send_volume(&mut self, header: &VolumeHeader, payload: &[u8]) -> ScanResult<String> {
        if payload.len() != header.expected_payload_len() {
            return Err(ScanError::Protocol(format!(
                "payload is {} bytes but the header declares {}",
                payload.len(),
                header.expected_payload_len()
            )));
        }
        self.writer.write_frame(&header.to_json()?)?;
        self.writer.write_frame(payload)?;
        let confirmation = self.reader.read_text()?;
        self.logger
            .record_debug(&format!("volIdx {} confirmed: {}", header.vol_idx, confirmation));
        Ok(confirmation)
    }
}

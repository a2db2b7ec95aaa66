//! Wire framing for the scanner connection: every message is a 4-byte
//! big-endian length prefix followed by that many payload bytes. Volume
//! headers and handshake/confirmation strings travel as UTF-8 frames, voxel
//! payloads as raw frames.

use std::io::{self, Read, Write};

use crate::prelude::{ScanError, ScanResult};

/// Upper bound on a single frame. A 512^3 float64 volume is exactly 1 GiB;
/// anything larger is treated as a corrupt prefix rather than an allocation
/// request.
pub const MAX_FRAME_BYTES: usize = 1 << 30;

pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn read_prefix(&mut self) -> ScanResult<Option<u32>> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            let count = self.inner.read(&mut prefix[filled..])?;
            if count == 0 {
                if filled == 0 {
                    // clean EOF at a frame boundary
                    return Ok(None);
                }
                return Err(ScanError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a frame prefix",
                )));
            }
            filled += count;
        }
        Ok(Some(u32::from_be_bytes(prefix)))
    }

    /// Read the next frame, or `None` if the peer closed the connection at
    /// a frame boundary.
    pub fn try_read_frame(&mut self) -> ScanResult<Option<Vec<u8>>> {
        let len = match self.read_prefix()? {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        if len > MAX_FRAME_BYTES {
            return Err(ScanError::Protocol(format!(
                "frame length {} exceeds the {} byte limit",
                len, MAX_FRAME_BYTES
            )));
        }
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    /// Read the next frame, treating EOF as an error.
    pub fn read_frame(&mut self) -> ScanResult<Vec<u8>> {
        self.try_read_frame()?.ok_or_else(|| {
            ScanError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the expected frame",
            ))
        })
    }

    /// Read a frame and decode it as UTF-8.
    pub fn read_text(&mut self) -> ScanResult<String> {
        let frame = self.read_frame()?;
        String::from_utf8(frame)
            .map_err(|err| ScanError::Protocol(format!("frame is not valid UTF-8: {}", err)))
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame and flush it. Flushing per frame keeps the lockstep
    /// exchange moving even through a buffered writer.
    pub fn write_frame(&mut self, payload: &[u8]) -> ScanResult<()> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            ScanError::Protocol(format!("frame of {} bytes is unencodable", payload.len()))
        })?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn write_text(&mut self, text: &str) -> ScanResult<()> {
        self.write_frame(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_round_trip() {
        let mut encoded = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut encoded);
            writer.write_text("hello scanner").unwrap();
            writer.write_frame(&[0x01, 0x02, 0x03]).unwrap();
            writer.write_frame(&[]).unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(encoded));
        assert_eq!(reader.read_text().unwrap(), "hello scanner");
        assert_eq!(reader.read_frame().unwrap(), vec![0x01, 0x02, 0x03]);
        assert_eq!(reader.read_frame().unwrap(), Vec::<u8>::new());
        assert!(reader.try_read_frame().unwrap().is_none());
    }

    #[test]
    fn eof_inside_prefix_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00, 0x00]));
        assert!(matches!(
            reader.try_read_frame().unwrap_err(),
            ScanError::Io(_)
        ));
    }

    #[test]
    fn eof_inside_payload_is_an_error() {
        let mut truncated = Vec::new();
        FrameWriter::new(&mut truncated)
            .write_frame(&[1, 2, 3, 4])
            .unwrap();
        truncated.pop();
        let mut reader = FrameReader::new(Cursor::new(truncated));
        assert!(matches!(reader.read_frame().unwrap_err(), ScanError::Io(_)));
    }

    #[test]
    fn oversized_prefix_is_a_protocol_violation() {
        let prefix = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        let mut reader = FrameReader::new(Cursor::new(prefix.to_vec()));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            ScanError::Protocol(_)
        ));
    }
}
